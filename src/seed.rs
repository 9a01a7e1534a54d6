use chrono::{Days, NaiveTime, Utc};
use rusqlite::{Connection, Result};
use tracing::info;

use crate::db;
use crate::models::EventDraft;

const DEMO_ORGANIZER: &str = "demo-organizer";

const CATEGORIES: [(&str, &str, &str); 6] = [
    ("Concerts", "Live music performances and concerts", "#FF6B6B"),
    ("Workshops", "Educational workshops and training sessions", "#4ECDC4"),
    ("Sports", "Sports events and athletic competitions", "#45B7D1"),
    ("Conferences", "Professional conferences and seminars", "#96CEB4"),
    ("Art & Culture", "Art exhibitions, theater, and cultural events", "#FECA57"),
    ("Food & Drink", "Food festivals, tastings, and culinary events", "#FF9FF3"),
];

struct SampleEvent {
    title: &'static str,
    description: &'static str,
    days_ahead: u64,
    hour: u32,
    location: &'static str,
    capacity: i64,
    price_cents: i64,
    category: &'static str,
}

const EVENTS: [SampleEvent; 3] = [
    SampleEvent {
        title: "Summer Music Festival",
        description: "Join us for an amazing outdoor music festival featuring local and international artists.",
        days_ahead: 60,
        hour: 18,
        location: "Central Park, New York",
        capacity: 500,
        price_cents: 7500,
        category: "Concerts",
    },
    SampleEvent {
        title: "Web Development Workshop",
        description: "Learn modern web development techniques with a typed frontend stack.",
        days_ahead: 25,
        hour: 9,
        location: "Tech Hub, San Francisco",
        capacity: 30,
        price_cents: 0,
        category: "Workshops",
    },
    SampleEvent {
        title: "Local Basketball Tournament",
        description: "Community basketball tournament for all skill levels.",
        days_ahead: 15,
        hour: 14,
        location: "Community Sports Center",
        capacity: 100,
        price_cents: 1000,
        category: "Sports",
    },
];

/// Fills an empty catalog with demo categories and events. Does nothing if
/// any category already exists. All rows are written in one transaction.
pub fn seed_demo_data(conn: &Connection) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    if db::category_count(&tx)? > 0 {
        return Ok(false);
    }
    insert_demo_rows(&tx)?;
    tx.commit()?;

    info!(categories = CATEGORIES.len(), events = EVENTS.len(), "seeded demo catalog");
    Ok(true)
}

fn insert_demo_rows(conn: &Connection) -> Result<()> {
    let now = Utc::now();
    let mut category_ids = Vec::with_capacity(CATEGORIES.len());
    for (name, description, color) in CATEGORIES {
        let id = db::insert_category(conn, name, Some(description), Some(color))?;
        category_ids.push((name, id));
    }

    // The "!" hash never verifies, so nobody can sign in as the demo organizer.
    let organizer_id = match db::user_id_by_name(conn, DEMO_ORGANIZER)? {
        Some(id) => id,
        None => db::insert_user(conn, DEMO_ORGANIZER, "!", &now.to_rfc3339())?,
    };

    let today = now.date_naive();
    for sample in &EVENTS {
        let Some(&(_, category_id)) = category_ids.iter().find(|(name, _)| *name == sample.category) else {
            continue;
        };
        let draft = EventDraft {
            title: sample.title.to_string(),
            description: Some(sample.description.to_string()),
            date: today.checked_add_days(Days::new(sample.days_ahead)).unwrap_or(today),
            time: NaiveTime::from_hms_opt(sample.hour, 0, 0).unwrap_or_default(),
            location: sample.location.to_string(),
            capacity: sample.capacity,
            price_cents: sample.price_cents,
            category_id,
            is_active: true,
        };
        db::insert_event(conn, organizer_id, &draft, now)?;
    }
    Ok(())
}
