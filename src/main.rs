// src/main.rs
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clock;
mod config;
mod error;
mod export;
mod holiday_calculator;
mod holiday_service;
mod holiday_tests;
mod memory_store;
mod models;
mod permissions;
mod preferences;
mod routes;
mod schedule_grid;
mod schedule_service;
mod shift_templates;
mod sqlite_store;
mod store;

use clock::{Clock, SystemClock};
use config::Config;
use holiday_service::{HolidayInput, HolidayService};
use memory_store::MemoryStore;
use permissions::{Actor, GrantAll, PermissionChecker, StaticPermissions};
use routes::{router, AppState};
use shift_templates::{ShiftTemplateInput, ShiftTemplateService};
use sqlite_store::SqliteStore;
use store::Store;

const GENERATION_CHECK_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "rota-core", version, about = "Staff scheduling backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Regenerate holiday instances for one year
    GenerateHolidays {
        /// Defaults to next calendar year
        #[arg(long)]
        year: Option<i32>,
    },
    /// Insert the standard holidays, the day/night shift templates and users
    Seed {
        #[arg(long, value_delimiter = ',')]
        users: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Loading configuration failed")?;
    let store = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store, clock).await,
        Command::GenerateHolidays { year } => {
            let year = year.unwrap_or(clock.today().year() + 1);
            let written = HolidayService::new(store, clock)
                .generate_for_year(year)
                .await
                .with_context(|| format!("Generating holidays for {} failed", year))?;
            info!("Done: {} holiday instance(s) for {}", written, year);
            Ok(())
        }
        Command::Seed { users } => seed(store, clock, &users).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = SqliteStore::connect(url)
                .await
                .with_context(|| format!("Opening database {} failed", url))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No DATABASE_URL configured, using an in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn load_permissions(config: &Config) -> Result<Arc<dyn PermissionChecker>> {
    match &config.permissions_file {
        Some(path) => {
            let permissions = StaticPermissions::load(path)
                .with_context(|| format!("Loading permissions from {} failed", path))?;
            Ok(Arc::new(permissions))
        }
        None => {
            warn!("No PERMISSIONS_FILE configured, every user holds every permission");
            Ok(Arc::new(GrantAll))
        }
    }
}

async fn serve(config: Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Result<()> {
    let permissions = load_permissions(&config)?;
    let state = AppState::new(store, clock.clone(), permissions);

    // Annual holiday generation
    let holidays = state.holidays.clone();
    let generation_config = config.clone();
    tokio::spawn(async move {
        let mut last_run: Option<NaiveDate> = None;
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(GENERATION_CHECK_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let today = clock.today();
            if !generation_config.is_generation_day(today) || last_run == Some(today) {
                continue;
            }
            let year = today.year() + 1;
            info!("Running scheduled holiday generation for {}", year);
            match holidays.generate_for_year(year).await {
                Ok(written) => {
                    info!("Scheduled generation wrote {} instance(s) for {}", written, year);
                    last_run = Some(today);
                }
                Err(e) => error!("Scheduled holiday generation for {} failed: {}", year, e),
            }
        }
    });

    let app = router(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Binding {} failed", addr))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}

// --- Seeding ---

const FIXED_HOLIDAYS: [(&str, &str); 10] = [
    ("Nowy Rok", "01-01"),
    ("Święto Trzech Króli", "01-06"),
    ("Święto Pracy", "05-01"),
    ("Święto Konstytucji 3 Maja", "05-03"),
    ("Wniebowzięcie Najświętszej Maryi Panny", "08-15"),
    ("Wszystkich Świętych", "11-01"),
    ("Narodowe Święto Niepodległości", "11-11"),
    ("Wigilia Bożego Narodzenia", "12-24"),
    ("Boże Narodzenie (pierwszy dzień)", "12-25"),
    ("Boże Narodzenie (drugi dzień)", "12-26"),
];

/// Days after Easter Sunday.
const EASTER_HOLIDAYS: [(&str, i32); 4] = [
    ("Wielkanoc", 0),
    ("Poniedziałek Wielkanocny", 1),
    ("Zielone Świątki", 49),
    ("Boże Ciało", 60),
];

const SHIFT_TEMPLATES: [(&str, &str, &str, i64); 2] = [
    ("Dniówka", "07:00", "19:00", 2),
    ("Nocka", "19:00", "07:00", 2),
];

async fn seed(store: Arc<dyn Store>, clock: Arc<dyn Clock>, users: &[String]) -> Result<()> {
    let actor = Actor::System;
    let holidays = HolidayService::new(store.clone(), clock.clone());
    let templates = ShiftTemplateService::new(store.clone(), clock);

    let existing: HashSet<String> = store
        .list_holiday_definitions(true)
        .await?
        .into_iter()
        .map(|definition| definition.name)
        .collect();

    let fixed = FIXED_HOLIDAYS.iter().map(|(name, day_month)| {
        (*name, json!({ "name": name, "day_month": day_month }))
    });
    let easter = EASTER_HOLIDAYS.iter().map(|(name, offset)| {
        (
            *name,
            json!({
                "name": name,
                "calculation_rule": {"base_type": "event", "base_event": "easter", "offset": offset}
            }),
        )
    });
    let mut created = 0;
    for (name, body) in fixed.chain(easter) {
        if existing.contains(name) {
            continue;
        }
        let input: HolidayInput = serde_json::from_value(body)?;
        holidays
            .create(&actor, input)
            .await
            .with_context(|| format!("Seeding holiday '{}' failed", name))?;
        created += 1;
    }
    info!("Seeded {} holiday definition(s)", created);

    let existing: HashSet<String> = store
        .list_shift_templates(true)
        .await?
        .into_iter()
        .map(|template| template.name)
        .collect();
    for (name, time_from, time_to, staff) in SHIFT_TEMPLATES {
        if existing.contains(name) {
            continue;
        }
        templates
            .create(
                &actor,
                ShiftTemplateInput {
                    name: name.to_string(),
                    time_from: time_from.to_string(),
                    time_to: time_to.to_string(),
                    duration_hours: None,
                    required_staff_count: Some(staff),
                },
            )
            .await
            .with_context(|| format!("Seeding shift template '{}' failed", name))?;
    }

    for name in users.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
        let user = store.insert_user(name).await?;
        info!("Seeded user {} ({})", user.name, user.id);
    }
    Ok(())
}
