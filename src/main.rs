#[macro_use]
extern crate rocket;

mod auth;
mod booking;
mod catalog;
mod config;
mod db;
mod error;
mod models;
mod money;
mod routes;
mod seed;

use rocket::fairing::{self, AdHoc};
use rocket::figment::Figment;
use rocket::fs::{relative, FileServer};
use rocket::{Build, Rocket};
use rocket_dyn_templates::Template;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

async fn init_database(rocket: Rocket<Build>) -> fairing::Result {
    let Some(config) = rocket.state::<AppConfig>().cloned() else {
        error!("application config was not loaded");
        return Err(rocket);
    };

    let pool = match db::init_db(&config.database_path) {
        Ok(pool) => pool,
        Err(err) => {
            error!(path = %config.database_path.display(), error = %err, "failed to open database");
            return Err(rocket);
        }
    };

    if config.seed_demo_data {
        let seeded = pool
            .get()
            .map_err(error::StoreError::from)
            .and_then(|conn| seed::seed_demo_data(&conn).map_err(error::StoreError::from));
        if let Err(err) = seeded {
            error!(error = %err, "failed to seed demo data");
            return Err(rocket);
        }
    }

    info!(path = %config.database_path.display(), "catalog store ready");
    Ok(rocket.manage(pool))
}

fn build(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(AdHoc::config::<AppConfig>())
        .attach(AdHoc::try_on_ignite("SQLite catalog", init_database))
        .mount("/", routes::routes())
        .mount(
            "/",
            routes![
                auth::register,
                auth::register_post,
                auth::login,
                auth::login_post,
                auth::logout
            ],
        )
        .mount("/static", FileServer::from(relative!("static")))
        .attach(Template::fairing())
}

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _rocket = build(rocket::Config::figment()).launch().await?;
    Ok(())
}
