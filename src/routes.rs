use std::collections::HashSet;
use std::fmt::Display;

use chrono::{NaiveDate, NaiveTime, Utc};
use rocket::form::Form;
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;
use tracing::error;

use crate::auth::require_user;
use crate::db::{self, DbPool};
use crate::error::BookingError;
use crate::models::{
    Booking, BookingFilter, Category, Event, EventDraft, EventFilter, EventSort, PriceFilter, User,
};
use crate::money::{format_money, format_price, parse_price_to_cents};
use crate::{booking, catalog};

#[derive(FromForm, Serialize, Default)]
pub struct EventForm {
    title: String,
    description: String,
    date: String,
    time: String,
    location: String,
    capacity: String,
    price: String,
    category_id: Option<i64>,
    is_active: bool,
}

impl From<&Event> for EventForm {
    fn from(event: &Event) -> Self {
        EventForm {
            title: event.title.clone(),
            description: event.description.clone().unwrap_or_default(),
            date: event.date.format("%Y-%m-%d").to_string(),
            time: event.time.format("%H:%M").to_string(),
            location: event.location.clone(),
            capacity: event.capacity.to_string(),
            price: format_money(event.price_cents),
            category_id: event.category_id,
            is_active: event.is_active,
        }
    }
}

impl EventForm {
    fn to_draft(&self) -> Result<EventDraft, &'static str> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("Enter a title");
        }
        let location = self.location.trim();
        if location.is_empty() {
            return Err("Enter a location");
        }
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| "Enter a valid date")?;
        let time = parse_time(self.time.trim()).ok_or("Enter a valid time")?;
        let capacity: i64 = self
            .capacity
            .trim()
            .parse()
            .ok()
            .filter(|c| *c >= 0)
            .ok_or("Capacity must be a whole number of zero or more")?;
        let price_cents = parse_price_to_cents(&self.price)
            .ok_or("Price must be a non-negative amount like 10 or 7.50")?;
        let category_id = self.category_id.ok_or("Choose a category")?;
        let description = Some(self.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(EventDraft {
            title: title.to_string(),
            description,
            date,
            time,
            location: location.to_string(),
            capacity,
            price_cents,
            category_id,
            is_active: self.is_active,
        })
    }
}

fn parse_time(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M:%S"))
        .ok()
}

#[derive(FromForm)]
pub struct CategoryForm {
    name: String,
    description: Option<String>,
    color: Option<String>,
}

#[derive(Serialize)]
struct EventView {
    id: i64,
    title: String,
    description: Option<String>,
    date: String,
    time: String,
    location: String,
    capacity: i64,
    remaining_spots: i64,
    price: String,
    category_name: Option<String>,
    category_color: Option<String>,
    organizer_name: String,
    is_active: bool,
    sold_out: bool,
    booked: bool,
    organized: bool,
    can_book: bool,
    action_label: &'static str,
}

#[derive(Serialize)]
struct BookingView {
    id: i64,
    event_id: i64,
    event_title: String,
    attendee_name: String,
    status: String,
    booked_on: String,
    total: String,
    active: bool,
}

fn event_view(event: Event, user: Option<&User>, booked: &HashSet<i64>) -> EventView {
    let is_booked = booked.contains(&event.id);
    let sold_out = event.is_sold_out();
    let action_label = match user {
        None => "Sign in to Book",
        Some(_) if is_booked => "Already Booked",
        Some(_) if !event.is_active => "Not Listed",
        Some(_) if sold_out => "Sold Out",
        Some(_) => "Book Event",
    };
    EventView {
        id: event.id,
        title: event.title,
        description: event.description,
        date: event.date.format("%a, %b %-d %Y").to_string(),
        time: event.time.format("%H:%M").to_string(),
        location: event.location,
        capacity: event.capacity,
        remaining_spots: event.remaining_spots,
        price: format_price(event.price_cents),
        category_name: event.category_name,
        category_color: event.category_color,
        organizer_name: event.organizer_name,
        is_active: event.is_active,
        sold_out,
        booked: is_booked,
        organized: user.is_some_and(|u| u.id == event.organizer_id),
        can_book: user.is_some() && event.is_active && !sold_out && !is_booked,
        action_label,
    }
}

fn booking_view(booking: Booking) -> BookingView {
    BookingView {
        id: booking.id,
        event_id: booking.event_id,
        event_title: booking.event_title,
        attendee_name: booking.attendee_name,
        status: booking.status.to_string(),
        booked_on: booking.booking_date.format("%Y-%m-%d %H:%M UTC").to_string(),
        total: format_money(booking.total_amount_cents),
        active: booking.status.is_active(),
    }
}

fn store_failure(err: impl Display) -> Status {
    error!(error = %err, "catalog store failure");
    Status::InternalServerError
}

pub(crate) fn flash_context(flash: Option<FlashMessage<'_>>) -> serde_json::Value {
    match flash {
        Some(flash) => serde_json::json!({
            "kind": flash.kind(),
            "message": flash.message(),
        }),
        None => serde_json::Value::Null,
    }
}

/// Flash for a refused operation. Store failures are logged here; business
/// rejections are already logged where they are decided.
fn rejected(to: String, prefix: &str, err: &BookingError) -> Flash<Redirect> {
    if !err.is_rejection() {
        error!(error = ?err, "{prefix}");
    }
    Flash::error(Redirect::to(to), format!("{prefix}: {err}"))
}

fn active_event_ids(conn: &rusqlite::Connection, user: Option<&User>) -> rusqlite::Result<(HashSet<i64>, Vec<Booking>)> {
    let Some(user) = user else {
        return Ok((HashSet::new(), Vec::new()));
    };
    let bookings = db::list_bookings(
        conn,
        &BookingFilter {
            attendee_id: Some(user.id),
            ..BookingFilter::default()
        },
    )?;
    let ids = bookings.iter().map(|b| b.event_id).collect();
    Ok((ids, bookings))
}

#[get("/?<category>&<q>&<price>&<sort>")]
pub fn index(
    pool: &State<DbPool>,
    user: Option<User>,
    flash: Option<FlashMessage<'_>>,
    category: Option<i64>,
    q: Option<String>,
    price: Option<PriceFilter>,
    sort: Option<EventSort>,
) -> Result<Template, Status> {
    let conn = pool.get().map_err(store_failure)?;
    let filter = EventFilter {
        category_id: category,
        search: q.clone(),
        price: price.unwrap_or_default(),
        sort: sort.unwrap_or_default(),
        ..EventFilter::default()
    };
    let categories = db::list_categories(&conn).map_err(store_failure)?;
    let events = db::list_events(&conn, &filter).map_err(store_failure)?;
    let (booked, my_bookings) = active_event_ids(&conn, user.as_ref()).map_err(store_failure)?;
    let organized = match user.as_ref() {
        Some(user) => {
            let mine = EventFilter {
                organizer_id: Some(user.id),
                include_inactive: true,
                ..EventFilter::default()
            };
            db::list_events(&conn, &mine).map_err(store_failure)?
        }
        None => Vec::new(),
    };

    let event_views = events
        .into_iter()
        .map(|event| event_view(event, user.as_ref(), &booked))
        .collect::<Vec<_>>();
    let booking_views = my_bookings.into_iter().map(booking_view).collect::<Vec<_>>();
    let organized_views = organized
        .into_iter()
        .map(|event| event_view(event, user.as_ref(), &booked))
        .collect::<Vec<_>>();

    let context = serde_json::json!({
        "user": user,
        "flash": flash_context(flash),
        "categories": categories,
        "events": event_views,
        "bookings": booking_views,
        "organized": organized_views,
        "selected_category": category,
        "q": q.unwrap_or_default(),
        "price": filter.price.as_str(),
        "sort": filter.sort.as_str(),
    });
    Ok(Template::render("index", &context))
}

#[get("/events/<id>")]
pub fn event_detail(
    pool: &State<DbPool>,
    user: Option<User>,
    flash: Option<FlashMessage<'_>>,
    id: i64,
) -> Result<Template, Status> {
    let conn = pool.get().map_err(store_failure)?;
    let event = db::event_by_id(&conn, id)
        .map_err(store_failure)?
        .ok_or(Status::NotFound)?;
    let is_organizer = user.as_ref().is_some_and(|u| u.id == event.organizer_id);
    if !event.is_active && !is_organizer {
        return Err(Status::NotFound);
    }

    let (booked, _) = active_event_ids(&conn, user.as_ref()).map_err(store_failure)?;
    let attendees = if is_organizer {
        let filter = BookingFilter {
            event_id: Some(id),
            include_cancelled: true,
            ..BookingFilter::default()
        };
        db::list_bookings(&conn, &filter)
            .map_err(store_failure)?
            .into_iter()
            .map(booking_view)
            .collect()
    } else {
        Vec::new()
    };

    let context = serde_json::json!({
        "user": user,
        "flash": flash_context(flash),
        "event": event_view(event, user.as_ref(), &booked),
        "attendees": attendees,
    });
    Ok(Template::render("event", &context))
}

fn render_event_form(
    user: &User,
    categories: &[Category],
    form: &EventForm,
    action: String,
    editing: bool,
    error: Option<&str>,
) -> Template {
    Template::render(
        "event_form",
        serde_json::json!({
            "user": user,
            "categories": categories,
            "form": form,
            "action": action,
            "editing": editing,
            "error": error,
        }),
    )
}

#[get("/events/new")]
pub fn new_event(pool: &State<DbPool>, user: Option<User>) -> Result<Template, Flash<Redirect>> {
    let user = require_user(user, "create events")?;
    let conn = pool
        .get()
        .map_err(|_| Flash::error(Redirect::to("/"), "Database unavailable"))?;
    let categories = db::list_categories(&conn).unwrap_or_default();
    let form = EventForm {
        is_active: true,
        ..EventForm::default()
    };
    Ok(render_event_form(&user, &categories, &form, "/events".to_string(), false, None))
}

#[post("/events", data = "<form>")]
pub fn create_event(
    pool: &State<DbPool>,
    user: Option<User>,
    form: Form<EventForm>,
) -> Result<Flash<Redirect>, Template> {
    let user = match require_user(user, "create events") {
        Ok(user) => user,
        Err(to_login) => return Ok(to_login),
    };
    let form = form.into_inner();
    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(err) => {
            error!(error = %err, "no database connection");
            return Ok(Flash::error(Redirect::to("/"), "Failed to create event"));
        }
    };
    let categories = db::list_categories(&conn).unwrap_or_default();
    let action = "/events".to_string();

    let draft = match form.to_draft() {
        Ok(draft) => draft,
        Err(msg) => return Err(render_event_form(&user, &categories, &form, action, false, Some(msg))),
    };
    match catalog::create_event(&conn, Some(&user), &draft, Utc::now()) {
        Ok(event) => Ok(Flash::success(
            Redirect::to(format!("/events/{}", event.id)),
            format!("Created {}", event.title),
        )),
        Err(err @ BookingError::Invalid(_)) => {
            let msg = err.to_string();
            Err(render_event_form(&user, &categories, &form, action, false, Some(&msg)))
        }
        Err(err) => Ok(rejected("/".to_string(), "Failed to create event", &err)),
    }
}

#[get("/events/<id>/edit")]
pub fn edit_event(pool: &State<DbPool>, user: Option<User>, id: i64) -> Result<Template, Flash<Redirect>> {
    let user = require_user(user, "edit events")?;
    let back = format!("/events/{id}");
    let conn = pool
        .get()
        .map_err(|_| Flash::error(Redirect::to(back.clone()), "Database unavailable"))?;
    let event = match db::event_by_id(&conn, id) {
        Ok(Some(event)) => event,
        Ok(None) => return Err(Flash::error(Redirect::to("/"), "event not found")),
        Err(err) => return Err(rejected("/".to_string(), "Failed to load event", &err.into())),
    };
    if event.organizer_id != user.id {
        return Err(Flash::error(Redirect::to(back), BookingError::NotOrganizer.to_string()));
    }
    let categories = db::list_categories(&conn).unwrap_or_default();
    Ok(render_event_form(
        &user,
        &categories,
        &EventForm::from(&event),
        format!("/events/{id}/edit"),
        true,
        None,
    ))
}

#[post("/events/<id>/edit", data = "<form>")]
pub fn edit_event_post(
    pool: &State<DbPool>,
    user: Option<User>,
    id: i64,
    form: Form<EventForm>,
) -> Result<Flash<Redirect>, Template> {
    let user = match require_user(user, "edit events") {
        Ok(user) => user,
        Err(to_login) => return Ok(to_login),
    };
    let form = form.into_inner();
    let back = format!("/events/{id}");
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(err) => {
            error!(error = %err, "no database connection");
            return Ok(Flash::error(Redirect::to(back), "Failed to update event"));
        }
    };
    let categories = db::list_categories(&conn).unwrap_or_default();
    let action = format!("/events/{id}/edit");

    let draft = match form.to_draft() {
        Ok(draft) => draft,
        Err(msg) => return Err(render_event_form(&user, &categories, &form, action, true, Some(msg))),
    };
    match catalog::update_event(&mut conn, &user, id, &draft) {
        Ok(event) => Ok(Flash::success(Redirect::to(back), format!("Updated {}", event.title))),
        Err(err @ (BookingError::Invalid(_) | BookingError::CapacityBelowBooked { .. })) => {
            let msg = err.to_string();
            Err(render_event_form(&user, &categories, &form, action, true, Some(&msg)))
        }
        Err(err) => Ok(rejected(back, "Failed to update event", &err)),
    }
}

#[post("/events/<id>/delete")]
pub fn delete_event(pool: &State<DbPool>, user: Option<User>, id: i64) -> Flash<Redirect> {
    let user = match require_user(user, "delete events") {
        Ok(user) => user,
        Err(to_login) => return to_login,
    };
    let result = pool
        .get()
        .map_err(BookingError::from)
        .and_then(|conn| catalog::delete_event(&conn, &user, id));
    match result {
        Ok(()) => Flash::success(Redirect::to("/"), "Event deleted"),
        Err(err) => rejected(format!("/events/{id}"), "Failed to delete event", &err),
    }
}

#[post("/events/<id>/book")]
pub fn book(pool: &State<DbPool>, user: Option<User>, id: i64) -> Flash<Redirect> {
    let result = pool
        .get()
        .map_err(BookingError::from)
        .and_then(|mut conn| booking::book_event(&mut conn, user.as_ref(), id, Utc::now()));
    match result {
        Ok(booking) => Flash::success(
            Redirect::to("/"),
            format!(
                "Booked {}. Total: {}",
                booking.event_title,
                format_price(booking.total_amount_cents)
            ),
        ),
        Err(err) => rejected("/".to_string(), "Failed to book event", &err),
    }
}

#[post("/bookings/<id>/cancel")]
pub fn cancel(pool: &State<DbPool>, user: Option<User>, id: i64) -> Flash<Redirect> {
    let user = match require_user(user, "manage bookings") {
        Ok(user) => user,
        Err(to_login) => return to_login,
    };
    let result = pool
        .get()
        .map_err(BookingError::from)
        .and_then(|mut conn| booking::cancel_booking(&mut conn, &user, id));
    match result {
        Ok(booking) => Flash::success(
            Redirect::to("/"),
            format!("Cancelled your booking for {}", booking.event_title),
        ),
        Err(err) => rejected("/".to_string(), "Failed to cancel booking", &err),
    }
}

#[get("/categories")]
pub fn categories(
    pool: &State<DbPool>,
    user: Option<User>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, Status> {
    let conn = pool.get().map_err(store_failure)?;
    let list = db::list_categories(&conn).map_err(store_failure)?;
    let context = serde_json::json!({
        "user": user,
        "flash": flash_context(flash),
        "categories": list,
    });
    Ok(Template::render("categories", &context))
}

#[post("/categories", data = "<form>")]
pub fn add_category(pool: &State<DbPool>, user: Option<User>, form: Form<CategoryForm>) -> Flash<Redirect> {
    let form = form.into_inner();
    let result = pool.get().map_err(BookingError::from).and_then(|conn| {
        catalog::create_category(
            &conn,
            user.as_ref(),
            &form.name,
            form.description.as_deref(),
            form.color.as_deref(),
        )
    });
    match result {
        Ok(category) => Flash::success(Redirect::to("/categories"), format!("Added {}", category.name)),
        Err(err) => rejected("/categories".to_string(), "Failed to add category", &err),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        index,
        event_detail,
        new_event,
        create_event,
        edit_event,
        edit_event_post,
        delete_event,
        book,
        cancel,
        categories,
        add_category
    ]
}
