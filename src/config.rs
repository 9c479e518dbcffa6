use std::ops::RangeInclusive;
use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_DATA_DIR: &str = ".";
pub const LAP_TIMES_FILE: &str = "lap_times.csv";
pub const PIT_STOPS_FILE: &str = "pit_stops.csv";
pub const RACES_FILE: &str = "races.csv";

/// Command-line and environment configuration for the console.
#[derive(Parser, Debug, Clone)]
#[command(name = "lapcast")]
#[command(author, version, about = "Race lap time prediction console", long_about = None)]
pub struct AppConfig {
    /// Directory holding lap_times.csv, pit_stops.csv and races.csv
    #[arg(long, env = "LAPCAST_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// First season offered for race selection
    #[arg(long, default_value_t = 2014)]
    pub first_season: i32,

    /// Last season offered for race selection
    #[arg(long, default_value_t = 2023)]
    pub last_season: i32,

    /// Seed for auto-populated lap tables (random when absent)
    #[arg(long)]
    pub seed: Option<u64>,

    /// OFF, ERROR, WARN, INFO, DEBUG or TRACE
    #[arg(long, env = "LOGGING_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Also append log lines to this file
    #[arg(long, env = "LAPCAST_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn seasons(&self) -> RangeInclusive<i32> {
        self.first_season..=self.last_season
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.first_season > self.last_season {
            return Err(format!(
                "first season {} is after last season {}",
                self.first_season, self.last_season
            ));
        }
        Ok(())
    }

    pub fn data_files(&self) -> DataFiles {
        DataFiles {
            lap_times: self.data_dir.join(LAP_TIMES_FILE),
            pit_stops: self.data_dir.join(PIT_STOPS_FILE),
            races: self.data_dir.join(RACES_FILE),
        }
    }
}

/// Resolved locations of the three input tables.
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub lap_times: PathBuf,
    pub pit_stops: PathBuf,
    pub races: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_hybrid_era() {
        let config = AppConfig::parse_from(["lapcast"]);
        assert_eq!(config.seasons(), 2014..=2023);
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_season_window_is_rejected() {
        let config =
            AppConfig::parse_from(["lapcast", "--first-season", "2020", "--last-season", "2018"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn data_files_are_joined_onto_the_data_dir() {
        let config = AppConfig::parse_from(["lapcast", "--data-dir", "/tmp/f1"]);
        let files = config.data_files();
        assert_eq!(files.lap_times, PathBuf::from("/tmp/f1/lap_times.csv"));
        assert_eq!(files.pit_stops, PathBuf::from("/tmp/f1/pit_stops.csv"));
        assert_eq!(files.races, PathBuf::from("/tmp/f1/races.csv"));
    }
}
