use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;

use lapcast::config::AppConfig;
use lapcast::logging::setup_logging;
use lapcast::{console, RaceData, Session};

// The main entry point of the application.
// It returns a Result so start-up failures are reported with their context.
fn main() -> Result<()> {
    // .env values become defaults for the env-backed flags
    dotenvy::dotenv().ok();
    let config = AppConfig::parse();
    config.validate().map_err(anyhow::Error::msg)?;

    setup_logging(&config.log_level, config.log_file.as_deref())
        .context("failed to set up logging")?;

    // Load the three tables once; every interaction reuses them.
    let data = RaceData::load(&config.data_files())
        .with_context(|| format!("failed to load race data from {}", config.data_dir.display()))?;
    info!(
        target: "main",
        "{} races between {} and {}",
        data.races(&config.seasons()).len(),
        config.first_season,
        config.last_season
    );

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut session = Session::new(&data, config.seasons(), rng);

    let stdin = io::stdin();
    let stdout = io::stdout();
    console::run(&mut session, stdin.lock(), stdout.lock())?;
    Ok(())
}
