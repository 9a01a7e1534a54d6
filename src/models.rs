use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rocket::form::FromFormField;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
    pub capacity: i64,
    pub remaining_spots: i64,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub category_color: Option<String>,
    pub organizer_id: i64,
    pub organizer_name: String,
    pub price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_sold_out(&self) -> bool {
        self.remaining_spots <= 0
    }

    pub fn booked_count(&self) -> i64 {
        self.capacity - self.remaining_spots
    }
}

/// Fields an organizer supplies when creating or editing an event.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
    pub capacity: i64,
    pub price_cents: i64,
    pub category_id: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
    Waitlist,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Pending => "PENDING",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Waitlist => "WAITLIST",
        }
    }

    /// Whether the booking still holds a spot for its attendee.
    pub fn is_active(self) -> bool {
        self != BookingStatus::Cancelled
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "PENDING" => Ok(BookingStatus::Pending),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "WAITLIST" => Ok(BookingStatus::Waitlist),
            other => Err(format!("unknown booking status {other:?}")),
        }
    }
}

impl ToSql for BookingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BookingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err: String| FromSqlError::Other(err.into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: i64,
    pub event_id: i64,
    pub event_title: String,
    pub attendee_id: i64,
    pub attendee_name: String,
    pub status: BookingStatus,
    pub booking_date: DateTime<Utc>,
    pub total_amount_cents: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromFormField)]
pub enum PriceFilter {
    #[default]
    #[field(value = "all")]
    All,
    #[field(value = "free")]
    Free,
    #[field(value = "paid")]
    Paid,
}

impl PriceFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceFilter::All => "all",
            PriceFilter::Free => "free",
            PriceFilter::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromFormField)]
pub enum EventSort {
    #[default]
    #[field(value = "date")]
    Date,
    #[field(value = "price")]
    Price,
}

impl EventSort {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSort::Date => "date",
            EventSort::Price => "price",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub category_id: Option<i64>,
    pub search: Option<String>,
    pub price: PriceFilter,
    pub sort: EventSort,
    pub organizer_id: Option<i64>,
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub attendee_id: Option<i64>,
    pub event_id: Option<i64>,
    pub include_cancelled: bool,
}

impl BookingFilter {
    /// Active bookings a single attendee holds for a single event.
    pub fn held_by(attendee_id: i64, event_id: i64) -> Self {
        BookingFilter {
            attendee_id: Some(attendee_id),
            event_id: Some(event_id),
            include_cancelled: false,
        }
    }
}
