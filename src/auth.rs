use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rocket::form::Form;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{self, FlashMessage, FromRequest, Request};
use rocket::response::{Flash, Redirect};
use rocket::State;
use rocket_dyn_templates::Template;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{self, DbPool};
use crate::models::User;
use crate::routes::flash_context;

pub const SESSION_COOKIE: &str = "session";

#[derive(FromForm)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(FromForm)]
pub struct RegisterForm {
    username: String,
    password: String,
    confirm_password: String,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// The signed-in user, resolved from the session cookie. Requests without a
/// valid session are forwarded; handlers that allow anonymous access take
/// `Option<User>`.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(token) = request.cookies().get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
            return request::Outcome::Forward(Status::Unauthorized);
        };
        let Some(pool) = request.rocket().state::<DbPool>() else {
            return request::Outcome::Error((Status::InternalServerError, ()));
        };
        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = %err, "no database connection for session lookup");
                return request::Outcome::Error((Status::ServiceUnavailable, ()));
            }
        };
        match db::user_by_session(&conn, &token) {
            Ok(Some(user)) => request::Outcome::Success(user),
            Ok(None) => request::Outcome::Forward(Status::Unauthorized),
            Err(err) => {
                error!(error = %err, "session lookup failed");
                request::Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

/// Sends anonymous visitors to the login page with a notice.
pub fn require_user(user: Option<User>, action: &str) -> Result<User, Flash<Redirect>> {
    user.ok_or_else(|| Flash::error(Redirect::to("/login"), format!("Please sign in to {action}")))
}

fn start_session(
    pool: &DbPool,
    config: &AppConfig,
    cookies: &CookieJar<'_>,
    user_id: i64,
) -> Result<(), &'static str> {
    let conn = pool.get().map_err(|_| "Database unavailable")?;
    let token = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    db::create_session(&conn, user_id, &token, &created_at).map_err(|_| "Could not create a session")?;
    db::prune_sessions(&conn, user_id, config.max_sessions).map_err(|_| "Could not update sessions")?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    cookies.add(cookie);
    Ok(())
}

fn render_login(error: Option<&str>, flash: Option<FlashMessage<'_>>) -> Template {
    Template::render(
        "login",
        serde_json::json!({
            "error": error,
            "flash": flash_context(flash),
        }),
    )
}

fn render_register(error: Option<&str>, min_password_len: usize, flash: Option<FlashMessage<'_>>) -> Template {
    Template::render(
        "register",
        serde_json::json!({
            "error": error,
            "min_password_len": min_password_len,
            "flash": flash_context(flash),
        }),
    )
}

#[get("/register")]
pub fn register(
    user: Option<User>,
    config: &State<AppConfig>,
    flash: Option<FlashMessage<'_>>,
) -> Result<Template, Redirect> {
    if user.is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(render_register(None, config.min_password_len, flash))
}

#[post("/register", data = "<form>")]
pub fn register_post(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<RegisterForm>,
) -> Result<Redirect, Template> {
    let form = form.into_inner();
    let min = config.min_password_len;
    let username = form.username.trim();
    if username.is_empty() {
        return Err(render_register(Some("Enter a username"), min, None));
    }
    if form.password.chars().count() < min {
        return Err(render_register(Some("Password is too short"), min, None));
    }
    if form.password != form.confirm_password {
        return Err(render_register(Some("Passwords do not match"), min, None));
    }

    let conn = pool
        .get()
        .map_err(|_| render_register(Some("Database unavailable"), min, None))?;
    let password_hash = hash_password(&form.password)
        .map_err(|_| render_register(Some("Could not store the password"), min, None))?;
    let user_id = db::insert_user(&conn, username, &password_hash, &Utc::now().to_rfc3339())
        .map_err(|_| render_register(Some("That username is taken"), min, None))?;
    drop(conn);

    start_session(pool, config, cookies, user_id).map_err(|msg| render_register(Some(msg), min, None))?;
    info!(user_id, username, "account created");
    Ok(Redirect::to("/"))
}

#[get("/login")]
pub fn login(user: Option<User>, flash: Option<FlashMessage<'_>>) -> Result<Template, Redirect> {
    if user.is_some() {
        return Err(Redirect::to("/"));
    }
    Ok(render_login(None, flash))
}

#[post("/login", data = "<form>")]
pub fn login_post(
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
    form: Form<LoginForm>,
) -> Result<Redirect, Template> {
    let form = form.into_inner();
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(render_login(Some("Enter your username and password"), None));
    }

    let conn = pool.get().map_err(|_| render_login(Some("Database unavailable"), None))?;
    let creds = db::user_credentials(&conn, username)
        .map_err(|_| render_login(Some("Could not look up the user"), None))?;
    drop(conn);
    let Some((user_id, hash)) = creds else {
        return Err(render_login(Some("Wrong username or password"), None));
    };
    if !verify_password(&hash, &form.password) {
        warn!(username, "failed sign-in");
        return Err(render_login(Some("Wrong username or password"), None));
    }

    start_session(pool, config, cookies, user_id).map_err(|msg| render_login(Some(msg), None))?;
    info!(user_id, "signed in");
    Ok(Redirect::to("/"))
}

#[get("/logout")]
pub fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Redirect {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            let _ = db::delete_session(&conn, cookie.value());
        }
    }
    cookies.remove(Cookie::from(SESSION_COOKIE));
    Redirect::to("/login")
}
