use std::path::PathBuf;

use serde::Deserialize;

/// Application settings read from Rocket's figment (`Rocket.toml` or
/// `ROCKET_*` environment variables), alongside Rocket's own keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub max_sessions: i64,
    pub min_password_len: usize,
    pub seed_demo_data: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("data/events.sqlite"),
            max_sessions: 5,
            min_password_len: 8,
            seed_demo_data: false,
        }
    }
}
