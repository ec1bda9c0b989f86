pub mod error;
pub mod guard;
pub mod models;
pub mod protocol;
pub mod rotation;
pub mod settings;
pub mod surface;
pub mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

pub use error::{RotationError, RotationResult};
pub use rotation::{RotationController, RotationSettings, RotationStatus};

use rotation::commands::handle_json;
use settings::SettingsStore;
use surface::MemoryDriver;

/// Wait before an automatic start so the host can finish booting.
const AUTO_START_DELAY: Duration = Duration::from_secs(2);

/// Headless entry point: loads the settings, runs the scheduler against the
/// in-process surface host and takes JSON commands on stdin, one per line.
/// A bare `reload` line re-reads the settings file.
pub async fn run() -> anyhow::Result<()> {
    let debug_mode = std::env::var("KIOSK_ROTATOR_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Kiosk rotator starting up...");

    let settings = SettingsStore::from_env()?;
    info!("Using settings at {}", settings.path().display());
    let config = settings.config();

    let driver = Arc::new(MemoryDriver::new());
    let (controller, scheduler) = RotationController::spawn(
        driver,
        settings.subscribe(),
        RotationSettings::default(),
    );

    if config.auto_start {
        let controller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_START_DELAY).await;
            if let Err(err) = controller.start().await {
                error!("Auto-start failed: {err}");
            }
        });
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "reload" {
                        match settings.reload() {
                            Ok(()) => info!("Settings reloaded"),
                            Err(err) => warn!("Settings reload failed: {err:#}"),
                        }
                        continue;
                    }
                    println!("{}", handle_json(&controller, line).await);
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("Command input failed: {err}; ignoring stdin from now on");
                    stdin_open = false;
                }
            },
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    warn!("Interrupt handler failed: {err}");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    controller.shutdown();
    scheduler.await.context("scheduler task failed to join")?;
    Ok(())
}
