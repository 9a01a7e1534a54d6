use thiserror::Error;

/// Failures of the SQLite catalog store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a booking or event operation is refused.
///
/// The first three are the outcomes of the admission check; `Store` covers
/// anything the database rejected for reasons other than a business rule.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("sold out")]
    SoldOut,
    #[error("already booked")]
    AlreadyBooked,
    #[error("event not found")]
    EventNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("only the organizer can change this event")]
    NotOrganizer,
    #[error("capacity cannot drop below the {booked} spots already booked")]
    CapacityBelowBooked { booked: i64 },
    #[error("{0}")]
    Invalid(String),
    #[error("store write failed")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// True for rejections caused by the request rather than the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BookingError::Store(_))
    }
}

impl From<rusqlite::Error> for BookingError {
    fn from(err: rusqlite::Error) -> Self {
        BookingError::Store(StoreError::Sqlite(err))
    }
}

impl From<r2d2::Error> for BookingError {
    fn from(err: r2d2::Error) -> Self {
        BookingError::Store(StoreError::Pool(err))
    }
}
