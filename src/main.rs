mod config;
mod controller;
mod error;
mod logging;
mod player;
mod station;
mod ui;

use anyhow::Result;
use config::RadioConfig;
use controller::StationController;
use player::{HandleOptions, RodioFactory};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let log_file = logging::init();

    let config = RadioConfig::load()?;
    info!(
        stations = config.stations.len(),
        transport = ?config.transport,
        log = ?log_file,
        "starting"
    );

    let client = Client::builder()
        .user_agent(concat!("station_radio/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let (tx, rx) = mpsc::unbounded_channel();

    let factory = RodioFactory::new(client, tx).map_err(|e| {
        eprintln!("Failed to start audio output: {}", e);
        eprintln!("Make sure you have audio drivers installed and working");
        e
    })?;

    let options = HandleOptions {
        transport: config.transport,
        volume: config.volume,
    };
    let mut controller =
        StationController::new(config.stations(), ui::TuiView::default(), factory, options)?;

    let ui_result = ui::run_ui(&mut controller, rx);

    if let Err(e) = ui_result {
        error!(error = ?e, "UI error");
        eprintln!("UI error: {:?}", e);
    } else {
        println!("Thanks for listening!");
    }

    Ok(())
}
