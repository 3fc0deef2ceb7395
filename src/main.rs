use anyhow::Result;
use axum::routing::get_service;
use clap::Parser;
use std::fs;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use months::api::{self, AppState};
use months::config::{self, Config};
use months::db;

#[derive(Parser, Debug)]
#[command(name = "months")]
#[command(about = "Serve the monthly task calendar")]
struct Args {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    db: Option<String>,

    /// Address to listen on (overrides MONTHS_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// IANA timezone used for all calendar days (overrides MONTHS_TIMEZONE)
    #[arg(long)]
    timezone: Option<String>,

    /// Directory served under /static
    #[arg(long, default_value = "static")]
    static_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    config::init_tracing();

    let mut config = Config::from_env();
    if let Some(db) = args.db {
        config.database_url = db;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(tz) = args.timezone {
        config.timezone = config::parse_timezone(&tz);
    }

    let pool = db::init_db(&config.database_url).await?;
    tracing::info!(database = %config.database_url, timezone = %config.timezone, "database initialized");

    fs::create_dir_all(&args.static_dir)?;
    let static_dir = ServeDir::new(&args.static_dir);

    let app = api::router()
        .with_state(AppState::new(pool, config.timezone))
        .nest_service("/static", get_service(static_dir))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
