//! XivMulti - Launch and supervise several isolated game client profiles

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xivmulti::cli::{self, Cli};
use xivmulti::core::{AppState, Settings};
use xivmulti::{APP_NAME, APP_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = AppState::load_settings(cli.data_dir.clone())?;
    init_logging(&settings);

    info!("{} v{} starting...", APP_NAME, APP_VERSION);
    let state = AppState::load(settings.data_directory.clone())?;
    cli::run(cli.command, &state).await
}

/// Initialize the logging system.
///
/// Logs go to the console and, when the logs directory is writable, to a
/// daily `log_YYYY-MM-DD.txt` file.
fn init_logging(settings: &Settings) {
    let default_level = if settings.debug_logging {
        "xivmulti=debug"
    } else {
        "xivmulti=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let logs_dir = settings.get_logs_directory();
    let log_path = logs_dir.join(format!(
        "log_{}.txt",
        chrono::Local::now().format("%Y-%m-%d")
    ));
    let file = fs::create_dir_all(&logs_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    });

    let (file_layer, file_error) = match file {
        Ok(file) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("Logging to console only, cannot open {:?}: {}", log_path, e);
    }
}
