use std::env;

use chrono_tz::Tz;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:months.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Settings shared by the service and the seed tool.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Reference timezone for every calendar computation.
    pub timezone: Tz,
}

impl Config {
    /// Read `.env` (if any) and then the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("could not read .env: {e}");
            }
        }

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let bind_addr = env::var("MONTHS_BIND").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let timezone = env::var("MONTHS_TIMEZONE")
            .map(|tz| parse_timezone(&tz))
            .unwrap_or(chrono_tz::UTC);

        Self {
            database_url,
            bind_addr,
            timezone,
        }
    }
}

/// Parse an IANA timezone name, falling back to UTC on garbage.
pub fn parse_timezone(tz_str: &str) -> Tz {
    tz_str.parse().unwrap_or_else(|_| {
        tracing::warn!("invalid timezone '{tz_str}', falling back to UTC");
        chrono_tz::UTC
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("MONTHS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("months=info,warn"));

    let format = env::var("MONTHS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}
