pub mod api;
mod app;
pub mod auth;
pub mod db;
pub mod error;
pub mod navigation;
pub mod settings;
pub mod stream;
pub mod telemetry;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use log::{error, info, warn};

pub use app::MonitorApp;
pub use error::{MonitorError, MonitorResult};

use auth::SqliteCredentialStorage;
use db::Database;
use navigation::Navigation;
use settings::SettingsStore;
use stream::ConnectionState;

pub const DATA_DIR_ENV: &str = "FLOORLINK_DATA_DIR";
pub const DEBUG_ENV: &str = "FLOORLINK_DEBUG";
pub const USER_ENV: &str = "FLOORLINK_USER";
pub const PASSWORD_ENV: &str = "FLOORLINK_PASSWORD";

const HEARTBEAT_TICK: Duration = Duration::from_secs(1);
const HEARTBEAT_EVERY: u64 = 10;

fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".floorlink"))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("floorlink starting up...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(monitor()) {
        error!("floorlink stopped: {err:#}");
    }
}

async fn monitor() -> anyhow::Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let database = Database::new(data_dir.join("floorlink.sqlite3"))?;
    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let app = MonitorApp::new(&settings, Arc::new(SqliteCredentialStorage::new(database)))?;

    if !app.credentials().is_authenticated().await {
        match (std::env::var(USER_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(user), Ok(password)) => app
                .login(&user, &password)
                .await
                .context("login failed")?,
            _ => warn!("no stored session; set {USER_ENV} and {PASSWORD_ENV} to log in"),
        }
    }

    match app.enter_dashboard().await {
        Navigation::Entered { route, path, .. } if route != "dashboard" => {
            warn!("dashboard unavailable, landed on {path}");
            return Ok(());
        }
        Navigation::NotFound { path } => {
            warn!("dashboard route missing ({path})");
            return Ok(());
        }
        Navigation::Entered { .. } => {
            info!("dashboard entered on {}", app.profile().monitoring_base)
        }
    }

    let every = if env_flag(DEBUG_ENV) { 1 } else { HEARTBEAT_EVERY };
    let mut ticker = tokio::time::interval(HEARTBEAT_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ticks += 1;
                if ticks % every != 0 {
                    continue;
                }

                let state = app.connection().state();
                let machines = app.board().snapshots();
                let errors = machines.iter().filter(|m| m.is_error()).count();
                info!(
                    "board: {} machines, {} in error, {} events applied, stream {:?}",
                    machines.len(),
                    errors,
                    app.board().applied_events(),
                    state
                );

                if state == ConnectionState::Errored && !app.connection().is_running().await {
                    match app.connection().last_failure() {
                        Some(err) if err.is_unauthorized() => {
                            error!("live stream rejected the session; log in again")
                        }
                        _ => error!("live stream gave up; restart to reconnect"),
                    }
                    break;
                }
            }
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    warn!("failed to listen for Ctrl-C: {err}");
                }
                info!("shutting down");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
