use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};

use crate::error::StoreError;
use crate::models::{
    Booking, BookingFilter, BookingStatus, Category, Event, EventDraft, EventFilter, EventSort,
    PriceFilter, User,
};

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_db(path: &Path) -> std::result::Result<DbPool, StoreError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
    let pool = Pool::new(manager)?;
    {
        let conn = pool.get()?;
        run_migrations(&conn)?;
    }
    Ok(pool)
}

fn configure_connection(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    register_functions(conn)
}

/// SQLite's `lower()` only folds ASCII; `fold_case` lowercases the full
/// Unicode range the same way search terms are folded.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(trim(name)) > 0),
            description TEXT,
            color TEXT
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            location TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK(capacity >= 0),
            remaining_spots INTEGER NOT NULL
                CHECK(remaining_spots >= 0 AND remaining_spots <= capacity),
            category_id INTEGER,
            organizer_id INTEGER NOT NULL,
            price_cents INTEGER NOT NULL DEFAULT 0 CHECK(price_cents >= 0),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE SET NULL,
            FOREIGN KEY(organizer_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS bookings (
            id INTEGER PRIMARY KEY,
            event_id INTEGER NOT NULL,
            attendee_id INTEGER NOT NULL,
            status TEXT NOT NULL
                CHECK(status IN ('CONFIRMED', 'PENDING', 'CANCELLED', 'WAITLIST')),
            booking_date TEXT NOT NULL,
            total_amount_cents INTEGER NOT NULL CHECK(total_amount_cents >= 0),
            FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
            FOREIGN KEY(attendee_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS bookings_one_active_per_attendee
            ON bookings(event_id, attendee_id)
            WHERE status != 'CANCELLED';

        CREATE INDEX IF NOT EXISTS events_by_category ON events(category_id);
        ",
    )
}

/// True when `err` came from the index that allows one active booking per
/// attendee and event (or any other uniqueness constraint).
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// Categories

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, name, description, color
        FROM categories
        ORDER BY name
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            color: row.get(3)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn category_by_id(conn: &Connection, category_id: i64) -> Result<Option<Category>> {
    conn.query_row(
        "SELECT id, name, description, color FROM categories WHERE id = ?1",
        params![category_id],
        |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                color: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn insert_category(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO categories (name, description, color) VALUES (?1, ?2, ?3)",
        params![name, description, color],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn category_count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
}

// Events

const EVENT_SELECT: &str = "
    SELECT e.id, e.title, e.description, e.date, e.time, e.location,
           e.capacity, e.remaining_spots, e.category_id, c.name, c.color,
           e.organizer_id, u.username, e.price_cents, e.is_active, e.created_at
    FROM events e
    LEFT JOIN categories c ON e.category_id = c.id
    JOIN users u ON e.organizer_id = u.id
";

fn event_from_row(row: &Row<'_>) -> Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        location: row.get(5)?,
        capacity: row.get(6)?,
        remaining_spots: row.get(7)?,
        category_id: row.get(8)?,
        category_name: row.get(9)?,
        category_color: row.get(10)?,
        organizer_id: row.get(11)?,
        organizer_name: row.get(12)?,
        price_cents: row.get(13)?,
        is_active: row.get(14)?,
        created_at: row.get(15)?,
    })
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub fn list_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<Event>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.include_inactive {
        clauses.push("e.is_active = 1".to_string());
    }
    if let Some(category_id) = filter.category_id {
        values.push(Value::Integer(category_id));
        clauses.push(format!("e.category_id = ?{}", values.len()));
    }
    if let Some(organizer_id) = filter.organizer_id {
        values.push(Value::Integer(organizer_id));
        clauses.push(format!("e.organizer_id = ?{}", values.len()));
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        values.push(Value::Text(like_pattern(term)));
        let n = values.len();
        clauses.push(format!(
            "(fold_case(e.title) LIKE ?{n} ESCAPE '\\' \
             OR fold_case(coalesce(e.description, '')) LIKE ?{n} ESCAPE '\\')"
        ));
    }
    match filter.price {
        PriceFilter::All => {}
        PriceFilter::Free => clauses.push("e.price_cents = 0".to_string()),
        PriceFilter::Paid => clauses.push("e.price_cents > 0".to_string()),
    }

    let mut query = EVENT_SELECT.to_string();
    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query.push_str(match filter.sort {
        EventSort::Date => " ORDER BY e.date, e.time, e.id",
        EventSort::Price => " ORDER BY e.price_cents, e.date, e.time, e.id",
    });

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), event_from_row)?;
    rows.collect()
}

pub fn event_by_id(conn: &Connection, event_id: i64) -> Result<Option<Event>> {
    conn.query_row(
        &format!("{EVENT_SELECT} WHERE e.id = ?1"),
        params![event_id],
        event_from_row,
    )
    .optional()
}

/// Stores a new event with every spot still available.
pub fn insert_event(
    conn: &Connection,
    organizer_id: i64,
    draft: &EventDraft,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO events (
            title, description, date, time, location, capacity, remaining_spots,
            category_id, organizer_id, price_cents, is_active, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
        params![
            draft.title,
            draft.description,
            draft.date,
            draft.time,
            draft.location,
            draft.capacity,
            draft.category_id,
            organizer_id,
            draft.price_cents,
            draft.is_active,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_event(
    conn: &Connection,
    event_id: i64,
    draft: &EventDraft,
    remaining_spots: i64,
) -> Result<()> {
    conn.execute(
        "
        UPDATE events
        SET title = ?2, description = ?3, date = ?4, time = ?5, location = ?6,
            capacity = ?7, remaining_spots = ?8, category_id = ?9,
            price_cents = ?10, is_active = ?11
        WHERE id = ?1
        ",
        params![
            event_id,
            draft.title,
            draft.description,
            draft.date,
            draft.time,
            draft.location,
            draft.capacity,
            remaining_spots,
            draft.category_id,
            draft.price_cents,
            draft.is_active
        ],
    )?;
    Ok(())
}

pub fn delete_event(conn: &Connection, event_id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM events WHERE id = ?1", params![event_id])?;
    Ok(changed == 1)
}

/// Takes one spot if any is left. Returns false when the event is sold out
/// (or missing), leaving the row untouched.
pub fn decrement_remaining_spots(conn: &Connection, event_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "
        UPDATE events
        SET remaining_spots = remaining_spots - 1
        WHERE id = ?1 AND remaining_spots > 0
        ",
        params![event_id],
    )?;
    Ok(changed == 1)
}

/// Gives one spot back, never above capacity.
pub fn increment_remaining_spots(conn: &Connection, event_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "
        UPDATE events
        SET remaining_spots = remaining_spots + 1
        WHERE id = ?1 AND remaining_spots < capacity
        ",
        params![event_id],
    )?;
    Ok(changed == 1)
}

// Bookings

const BOOKING_SELECT: &str = "
    SELECT b.id, b.event_id, e.title, b.attendee_id, u.username,
           b.status, b.booking_date, b.total_amount_cents
    FROM bookings b
    JOIN events e ON b.event_id = e.id
    JOIN users u ON b.attendee_id = u.id
";

fn booking_from_row(row: &Row<'_>) -> Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        event_id: row.get(1)?,
        event_title: row.get(2)?,
        attendee_id: row.get(3)?,
        attendee_name: row.get(4)?,
        status: row.get(5)?,
        booking_date: row.get(6)?,
        total_amount_cents: row.get(7)?,
    })
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> Result<Vec<Booking>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(attendee_id) = filter.attendee_id {
        values.push(Value::Integer(attendee_id));
        clauses.push(format!("b.attendee_id = ?{}", values.len()));
    }
    if let Some(event_id) = filter.event_id {
        values.push(Value::Integer(event_id));
        clauses.push(format!("b.event_id = ?{}", values.len()));
    }
    if !filter.include_cancelled {
        clauses.push("b.status != 'CANCELLED'".to_string());
    }

    let mut query = BOOKING_SELECT.to_string();
    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query.push_str(" ORDER BY b.booking_date DESC, b.id DESC");

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), booking_from_row)?;
    rows.collect()
}

pub fn booking_by_id(conn: &Connection, booking_id: i64) -> Result<Option<Booking>> {
    conn.query_row(
        &format!("{BOOKING_SELECT} WHERE b.id = ?1"),
        params![booking_id],
        booking_from_row,
    )
    .optional()
}

pub fn insert_booking(
    conn: &Connection,
    event_id: i64,
    attendee_id: i64,
    status: BookingStatus,
    booking_date: DateTime<Utc>,
    total_amount_cents: i64,
) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO bookings (event_id, attendee_id, status, booking_date, total_amount_cents)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![event_id, attendee_id, status, booking_date, total_amount_cents],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_booking_status(conn: &Connection, booking_id: i64, status: BookingStatus) -> Result<()> {
    conn.execute(
        "UPDATE bookings SET status = ?1 WHERE id = ?2",
        params![status, booking_id],
    )?;
    Ok(())
}

// Users and sessions

pub fn insert_user(conn: &Connection, username: &str, password_hash: &str, created_at: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_id_by_name(conn: &Connection, username: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )
    .optional()
}

pub fn user_credentials(conn: &Connection, username: &str) -> Result<Option<(i64, String)>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, password_hash
        FROM users
        WHERE username = ?1
        ",
    )?;
    let mut rows = stmt.query(params![username])?;
    if let Some(row) = rows.next()? {
        Ok(Some((row.get(0)?, row.get(1)?)))
    } else {
        Ok(None)
    }
}

pub fn create_session(conn: &Connection, user_id: i64, token: &str, created_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, created_at],
    )?;
    Ok(())
}

pub fn user_by_session(conn: &Connection, token: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "
        SELECT u.id, u.username
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
        ",
    )?;
    let mut rows = stmt.query(params![token])?;
    if let Some(row) = rows.next()? {
        Ok(Some(User {
            id: row.get(0)?,
            username: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Keeps only the `keep` newest sessions of a user.
pub fn prune_sessions(conn: &Connection, user_id: i64, keep: i64) -> Result<()> {
    conn.execute(
        "
        DELETE FROM sessions
        WHERE user_id = ?1
          AND id NOT IN (
            SELECT id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
          )
        ",
        params![user_id, keep],
    )?;
    Ok(())
}
