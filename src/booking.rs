//! Booking admission and the writes that keep `remaining_spots` in step with
//! the bookings table.
//!
//! Admission is decided by [`check_admission`], a pure function over an event
//! snapshot. [`book_event`] re-runs it inside an immediate SQLite transaction
//! and only then takes a spot with a conditional decrement, so two requests
//! racing for the last spot cannot both succeed.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};

use crate::db;
use crate::error::BookingError;
use crate::models::{Booking, BookingFilter, BookingStatus, Event, User};

/// Decides whether `user` may book `event`, given the bookings the user
/// already holds. Checks run in order: identity, availability, duplicates.
pub fn check_admission(
    user: Option<&User>,
    event: &Event,
    held: &[Booking],
) -> Result<(), BookingError> {
    let Some(user) = user else {
        return Err(BookingError::NotAuthenticated);
    };
    if event.remaining_spots <= 0 {
        return Err(BookingError::SoldOut);
    }
    let already_booked = held
        .iter()
        .any(|b| b.event_id == event.id && b.attendee_id == user.id && b.status.is_active());
    if already_booked {
        return Err(BookingError::AlreadyBooked);
    }
    Ok(())
}

/// Books one spot of `event_id` for `user`.
///
/// The booking row is written only after the decrement succeeded, and both
/// writes commit together.
pub fn book_event(
    conn: &mut Connection,
    user: Option<&User>,
    event_id: i64,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let Some(user) = user else {
        warn!(event_id, "booking rejected: not authenticated");
        return Err(BookingError::NotAuthenticated);
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let event = db::event_by_id(&tx, event_id)?
        .filter(|event| event.is_active)
        .ok_or(BookingError::EventNotFound)?;
    let held = db::list_bookings(&tx, &BookingFilter::held_by(user.id, event_id))?;

    if let Err(err) = check_admission(Some(user), &event, &held) {
        warn!(event_id, user_id = user.id, reason = %err, "booking rejected");
        return Err(err);
    }

    if !db::decrement_remaining_spots(&tx, event_id)? {
        warn!(event_id, user_id = user.id, "booking rejected: no spot left at commit");
        return Err(BookingError::SoldOut);
    }

    let booking_id = db::insert_booking(
        &tx,
        event_id,
        user.id,
        BookingStatus::Confirmed,
        now,
        event.price_cents,
    )
    .map_err(|err| {
        if db::is_unique_violation(&err) {
            BookingError::AlreadyBooked
        } else {
            err.into()
        }
    })?;
    tx.commit()?;

    info!(
        booking_id,
        event_id,
        user_id = user.id,
        remaining_spots = event.remaining_spots - 1,
        "booking confirmed"
    );
    Ok(Booking {
        id: booking_id,
        event_id,
        event_title: event.title,
        attendee_id: user.id,
        attendee_name: user.username.clone(),
        status: BookingStatus::Confirmed,
        booking_date: now,
        total_amount_cents: event.price_cents,
    })
}

/// Cancels one of `user`'s active bookings and returns its spot to the event.
pub fn cancel_booking(
    conn: &mut Connection,
    user: &User,
    booking_id: i64,
) -> Result<Booking, BookingError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut booking = db::booking_by_id(&tx, booking_id)?
        .filter(|b| b.attendee_id == user.id && b.status.is_active())
        .ok_or(BookingError::BookingNotFound)?;

    db::update_booking_status(&tx, booking_id, BookingStatus::Cancelled)?;
    if !db::increment_remaining_spots(&tx, booking.event_id)? {
        warn!(booking_id, event_id = booking.event_id, "event already at capacity on cancel");
    }
    tx.commit()?;

    info!(booking_id, event_id = booking.event_id, user_id = user.id, "booking cancelled");
    booking.status = BookingStatus::Cancelled;
    Ok(booking)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    use super::*;
    use crate::db::tests::{draft, memory_db, user};

    fn snapshot(remaining_spots: i64) -> Event {
        Event {
            id: 7,
            title: "Summer Music Festival".to_string(),
            description: None,
            date: NaiveDate::from_ymd_opt(2030, 7, 15).unwrap(),
            time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            location: "Central Park".to_string(),
            capacity: 500,
            remaining_spots,
            category_id: Some(1),
            category_name: Some("Concerts".to_string()),
            category_color: None,
            organizer_id: 1,
            organizer_name: "org".to_string(),
            price_cents: 7500,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn held(event_id: i64, attendee_id: i64, status: BookingStatus) -> Booking {
        Booking {
            id: 1,
            event_id,
            event_title: "Summer Music Festival".to_string(),
            attendee_id,
            attendee_name: "alice".to_string(),
            status,
            booking_date: Utc::now(),
            total_amount_cents: 7500,
        }
    }

    fn alice() -> User {
        User {
            id: 2,
            username: "alice".to_string(),
        }
    }

    fn event_with_capacity(conn: &Connection, capacity: i64, price_cents: i64) -> i64 {
        let organizer = user(conn, "organizer");
        let cat = db::insert_category(conn, "Workshops", None, None).unwrap();
        db::insert_event(conn, organizer.id, &draft("Workshop", capacity, price_cents, cat), Utc::now())
            .unwrap()
    }

    fn remaining(conn: &Connection, event_id: i64) -> i64 {
        db::event_by_id(conn, event_id).unwrap().unwrap().remaining_spots
    }

    #[test]
    fn admits_authenticated_user_with_spots_left() {
        assert!(check_admission(Some(&alice()), &snapshot(3), &[]).is_ok());
    }

    #[test]
    fn anonymous_requests_are_rejected_regardless_of_capacity() {
        let err = check_admission(None, &snapshot(500), &[]).unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));
        let err = check_admission(None, &snapshot(0), &[]).unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));
    }

    #[test]
    fn sold_out_is_checked_before_duplicates() {
        let existing = [held(7, 2, BookingStatus::Confirmed)];
        let err = check_admission(Some(&alice()), &snapshot(0), &existing).unwrap_err();
        assert!(matches!(err, BookingError::SoldOut));
        assert_eq!(err.to_string(), "sold out");
    }

    #[test]
    fn existing_booking_for_same_event_rejects() {
        let existing = [held(7, 2, BookingStatus::Confirmed)];
        let err = check_admission(Some(&alice()), &snapshot(10), &existing).unwrap_err();
        assert!(matches!(err, BookingError::AlreadyBooked));
    }

    #[test]
    fn cancelled_or_unrelated_bookings_do_not_block() {
        let existing = [
            held(7, 2, BookingStatus::Cancelled),
            held(8, 2, BookingStatus::Confirmed),
            held(7, 3, BookingStatus::Confirmed),
        ];
        assert!(check_admission(Some(&alice()), &snapshot(10), &existing).is_ok());
    }

    #[test]
    fn last_spot_goes_to_first_user_only() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 1, 0);
        let a = user(&conn, "a");
        let b = user(&conn, "b");

        let booking = book_event(&mut conn, Some(&a), event, Utc::now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(remaining(&conn, event), 0);

        let err = book_event(&mut conn, Some(&b), event, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::SoldOut));
        assert_eq!(remaining(&conn, event), 0);
        let all = db::list_bookings(&conn, &BookingFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn free_event_records_zero_total() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 30, 0);
        let guest = user(&conn, "guest");

        let booking = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap();
        assert_eq!(booking.total_amount_cents, 0);
        let stored = db::booking_by_id(&conn, booking.id).unwrap().unwrap();
        assert_eq!(stored.total_amount_cents, 0);
        assert_eq!(remaining(&conn, event), 29);
    }

    #[test]
    fn paid_event_records_price_as_total() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 100, 1000);
        let guest = user(&conn, "guest");

        let booking = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap();
        assert_eq!(booking.total_amount_cents, 1000);
    }

    #[test]
    fn second_booking_by_same_user_is_rejected() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 10, 0);
        let guest = user(&conn, "guest");

        book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap();
        let err = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::AlreadyBooked));
        assert_eq!(remaining(&conn, event), 9);
    }

    #[test]
    fn anonymous_commit_writes_nothing() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 10, 0);

        let err = book_event(&mut conn, None, event, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::NotAuthenticated));
        assert_eq!(remaining(&conn, event), 10);
    }

    #[test]
    fn booking_missing_or_inactive_event_fails() {
        let mut conn = memory_db();
        let guest = user(&conn, "guest");
        let err = book_event(&mut conn, Some(&guest), 99, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::EventNotFound));

        let organizer = user(&conn, "organizer");
        let cat = db::insert_category(&conn, "Talks", None, None).unwrap();
        let mut hidden = draft("Hidden", 5, 0, cat);
        hidden.is_active = false;
        let event = db::insert_event(&conn, organizer.id, &hidden, Utc::now()).unwrap();
        let err = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::EventNotFound));
    }

    #[test]
    fn cancelling_frees_the_spot_for_rebooking() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 1, 0);
        let guest = user(&conn, "guest");
        let other = user(&conn, "other");

        let booking = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap();
        let cancelled = cancel_booking(&mut conn, &guest, booking.id).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(remaining(&conn, event), 1);

        book_event(&mut conn, Some(&other), event, Utc::now()).unwrap();
        assert_eq!(remaining(&conn, event), 0);
    }

    #[test]
    fn only_the_holder_can_cancel_and_only_once() {
        let mut conn = memory_db();
        let event = event_with_capacity(&conn, 3, 0);
        let guest = user(&conn, "guest");
        let other = user(&conn, "other");
        let booking = book_event(&mut conn, Some(&guest), event, Utc::now()).unwrap();

        let err = cancel_booking(&mut conn, &other, booking.id).unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound));

        cancel_booking(&mut conn, &guest, booking.id).unwrap();
        let err = cancel_booking(&mut conn, &guest, booking.id).unwrap_err();
        assert!(matches!(err, BookingError::BookingNotFound));
        assert_eq!(remaining(&conn, event), 3);
    }

    #[test]
    fn concurrent_requests_for_the_last_spot_admit_one() {
        let path = std::env::temp_dir().join(format!("eventbook-race-{}.sqlite", uuid::Uuid::new_v4()));
        let pool = db::init_db(&path).unwrap();

        let (event, users) = {
            let conn = pool.get().unwrap();
            let event = event_with_capacity(&conn, 1, 0);
            let users = (0..16).map(|i| user(&conn, &format!("racer{i}"))).collect::<Vec<_>>();
            (event, users)
        };

        let results = std::thread::scope(|scope| {
            let handles = users
                .iter()
                .map(|racer| {
                    let pool = &pool;
                    scope.spawn(move || {
                        let mut conn = pool.get().unwrap();
                        book_event(&mut conn, Some(racer), event, Utc::now())
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(admitted, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, BookingError::SoldOut), "unexpected {err:?}");
        }
        {
            let conn = pool.get().unwrap();
            assert_eq!(remaining(&conn, event), 0);
            let filter = BookingFilter {
                event_id: Some(event),
                ..BookingFilter::default()
            };
            assert_eq!(db::list_bookings(&conn, &filter).unwrap().len(), 1);
        }

        drop(pool);
        let _ = std::fs::remove_file(&path);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Book(usize),
        Cancel(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![(0..6usize).prop_map(Step::Book), (0..6usize).prop_map(Step::Cancel)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn remaining_spots_track_active_bookings(
            capacity in 0..5i64,
            steps in proptest::collection::vec(step(), 0..40),
        ) {
            let mut conn = memory_db();
            let event = event_with_capacity(&conn, capacity, 0);
            let users: Vec<User> = (0..6).map(|i| user(&conn, &format!("user-{i}"))).collect();

            for step in steps {
                match step {
                    Step::Book(i) => {
                        let result = book_event(&mut conn, Some(&users[i]), event, Utc::now());
                        if let Err(err) = result {
                            prop_assert!(err.is_rejection());
                        }
                    }
                    Step::Cancel(i) => {
                        let held = db::list_bookings(&conn, &BookingFilter::held_by(users[i].id, event)).unwrap();
                        if let Some(booking) = held.first() {
                            cancel_booking(&mut conn, &users[i], booking.id).unwrap();
                        }
                    }
                }

                let spots = remaining(&conn, event);
                let active = db::list_bookings(
                    &conn,
                    &BookingFilter { event_id: Some(event), ..BookingFilter::default() },
                ).unwrap().len() as i64;
                prop_assert!(spots >= 0 && spots <= capacity);
                prop_assert_eq!(spots, capacity - active);
            }
        }
    }
}
