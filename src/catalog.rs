//! Organizer-side maintenance of events and categories.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::db;
use crate::error::BookingError;
use crate::models::{Category, Event, EventDraft, User};

fn validate_draft(conn: &Connection, draft: &EventDraft) -> Result<(), BookingError> {
    if draft.title.trim().is_empty() {
        return Err(BookingError::Invalid("title is required".to_string()));
    }
    if draft.location.trim().is_empty() {
        return Err(BookingError::Invalid("location is required".to_string()));
    }
    if draft.capacity < 0 {
        return Err(BookingError::Invalid("capacity cannot be negative".to_string()));
    }
    if draft.price_cents < 0 {
        return Err(BookingError::Invalid("price cannot be negative".to_string()));
    }
    if db::category_by_id(conn, draft.category_id)?.is_none() {
        return Err(BookingError::Invalid("unknown category".to_string()));
    }
    Ok(())
}

/// Persists a new event owned by `organizer` with `remaining_spots = capacity`.
pub fn create_event(
    conn: &Connection,
    organizer: Option<&User>,
    draft: &EventDraft,
    now: DateTime<Utc>,
) -> Result<Event, BookingError> {
    let organizer = organizer.ok_or(BookingError::NotAuthenticated)?;
    validate_draft(conn, draft)?;
    let event_id = db::insert_event(conn, organizer.id, draft, now)?;
    info!(event_id, organizer_id = organizer.id, capacity = draft.capacity, "event created");
    db::event_by_id(conn, event_id)?.ok_or(BookingError::EventNotFound)
}

fn owned_event(conn: &Connection, organizer: &User, event_id: i64) -> Result<Event, BookingError> {
    let event = db::event_by_id(conn, event_id)?.ok_or(BookingError::EventNotFound)?;
    if event.organizer_id != organizer.id {
        return Err(BookingError::NotOrganizer);
    }
    Ok(event)
}

/// Applies an organizer's edit. A capacity change moves `remaining_spots` by
/// the same amount; shrinking below the booked count is refused.
pub fn update_event(
    conn: &mut Connection,
    organizer: &User,
    event_id: i64,
    draft: &EventDraft,
) -> Result<Event, BookingError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let event = owned_event(&tx, organizer, event_id)?;
    validate_draft(&tx, draft)?;

    let remaining_spots = event.remaining_spots + (draft.capacity - event.capacity);
    if remaining_spots < 0 {
        return Err(BookingError::CapacityBelowBooked {
            booked: event.booked_count(),
        });
    }
    db::update_event(&tx, event_id, draft, remaining_spots)?;
    let updated = db::event_by_id(&tx, event_id)?.ok_or(BookingError::EventNotFound)?;
    tx.commit()?;

    info!(event_id, capacity = updated.capacity, remaining_spots, "event updated");
    Ok(updated)
}

pub fn delete_event(conn: &Connection, organizer: &User, event_id: i64) -> Result<(), BookingError> {
    owned_event(conn, organizer, event_id)?;
    db::delete_event(conn, event_id)?;
    info!(event_id, organizer_id = organizer.id, "event deleted");
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn create_category(
    conn: &Connection,
    user: Option<&User>,
    name: &str,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<Category, BookingError> {
    user.ok_or(BookingError::NotAuthenticated)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(BookingError::Invalid("category name is required".to_string()));
    }
    let id = db::insert_category(conn, name, non_blank(description), non_blank(color))?;
    info!(category_id = id, name, "category created");
    Ok(Category {
        id,
        name: name.to_string(),
        description: non_blank(description).map(str::to_string),
        color: non_blank(color).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::book_event;
    use crate::db::tests::{draft, memory_db, user};

    #[test]
    fn created_event_has_full_availability() {
        let conn = memory_db();
        let organizer = user(&conn, "org");
        let cat = db::insert_category(&conn, "Workshops", None, None).unwrap();

        let event = create_event(&conn, Some(&organizer), &draft("Rust", 30, 0, cat), Utc::now()).unwrap();
        assert_eq!(event.remaining_spots, 30);
        assert_eq!(event.organizer_id, organizer.id);
    }

    #[test]
    fn creation_requires_identity_and_valid_fields() {
        let conn = memory_db();
        let organizer = user(&conn, "org");
        let cat = db::insert_category(&conn, "Workshops", None, None).unwrap();

        let err = create_event(&conn, None, &draft("Rust", 30, 0, cat), Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));

        let err = create_event(&conn, Some(&organizer), &draft("  ", 30, 0, cat), Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::Invalid(_)));

        let err = create_event(&conn, Some(&organizer), &draft("Rust", -1, 0, cat), Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::Invalid(_)));

        let err = create_event(&conn, Some(&organizer), &draft("Rust", 5, 0, cat + 1), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "unknown category");
    }

    #[test]
    fn capacity_edit_shifts_remaining_spots() {
        let mut conn = memory_db();
        let organizer = user(&conn, "org");
        let guest = user(&conn, "guest");
        let cat = db::insert_category(&conn, "Workshops", None, None).unwrap();
        let event = create_event(&conn, Some(&organizer), &draft("Rust", 3, 0, cat), Utc::now()).unwrap();
        book_event(&mut conn, Some(&guest), event.id, Utc::now()).unwrap();

        let grown = update_event(&mut conn, &organizer, event.id, &draft("Rust", 10, 0, cat)).unwrap();
        assert_eq!(grown.remaining_spots, 9);

        let shrunk = update_event(&mut conn, &organizer, event.id, &draft("Rust", 1, 0, cat)).unwrap();
        assert_eq!(shrunk.remaining_spots, 0);

        let err = update_event(&mut conn, &organizer, event.id, &draft("Rust", 0, 0, cat)).unwrap_err();
        assert!(matches!(err, BookingError::CapacityBelowBooked { booked: 1 }));
    }

    #[test]
    fn only_organizer_may_edit_or_delete() {
        let mut conn = memory_db();
        let organizer = user(&conn, "org");
        let guest = user(&conn, "guest");
        let cat = db::insert_category(&conn, "Workshops", None, None).unwrap();
        let event = create_event(&conn, Some(&organizer), &draft("Rust", 3, 0, cat), Utc::now()).unwrap();

        let err = update_event(&mut conn, &guest, event.id, &draft("Mine", 3, 0, cat)).unwrap_err();
        assert!(matches!(err, BookingError::NotOrganizer));
        let err = delete_event(&conn, &guest, event.id).unwrap_err();
        assert!(matches!(err, BookingError::NotOrganizer));

        delete_event(&conn, &organizer, event.id).unwrap();
        assert!(db::event_by_id(&conn, event.id).unwrap().is_none());
    }

    #[test]
    fn category_needs_a_name_and_a_user() {
        let conn = memory_db();
        let member = user(&conn, "member");

        let err = create_category(&conn, None, "Sports", None, None).unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));
        let err = create_category(&conn, Some(&member), " ", None, None).unwrap_err();
        assert!(matches!(err, BookingError::Invalid(_)));

        let category = create_category(&conn, Some(&member), " Sports ", Some(""), Some("#45B7D1")).unwrap();
        assert_eq!(category.name, "Sports");
        assert_eq!(category.description, None);
        assert_eq!(db::list_categories(&conn).unwrap().len(), 1);
    }
}
