use thiserror::Error;

/// Failures while loading or joining the lap, pit-stop and race tables.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("could not read {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
    #[error("no laps recorded for driver {driver_id} in race {race_id}")]
    NoLaps { race_id: u32, driver_id: u32 },
    #[error("lap {lap} appears more than once for driver {driver_id} in race {race_id}")]
    DuplicateLap {
        race_id: u32,
        driver_id: u32,
        lap: u32,
    },
}

/// Failures raised by the ARIMA fit or its forecasts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("need at least {needed} observations to fit, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("series contains a non-finite value at index {index}")]
    NonFinite { index: usize },
    #[error("optimizer failed: {0}")]
    Optimizer(String),
    #[error("fit is degenerate: {0}")]
    Degenerate(String),
}

/// Errors surfaced to the user while driving a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("race {0} is not available in the selected seasons")]
    UnknownRace(u32),
    #[error("driver {driver_id} has no laps in race {race_id}")]
    UnknownDriver { race_id: u32, driver_id: u32 },
    #[error("select a race first")]
    NoRaceSelected,
    #[error("select a driver first")]
    NoDriverSelected,
    #[error("lap count must be between {min} and {max}, got {got}")]
    InvalidLapCount { min: usize, max: usize, got: usize },
    #[error("row {row} does not exist (table has {len} rows)")]
    InvalidRow { row: usize, len: usize },
    #[error("invalid pit lap list '{input}': {reason}")]
    InvalidPitLaps { input: String, reason: String },
    #[error("pit stop time for lap {lap} must not be negative, got {milliseconds}")]
    NegativePitTime { lap: u32, milliseconds: i64 },
    #[error("subtracting {milliseconds} ms from lap {lap} overflows its lap time")]
    PitTimeOverflow { lap: u32, milliseconds: i64 },
    #[error("cannot label {horizon} laps after lap {lap}")]
    LapOutOfRange { lap: u32, horizon: usize },
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

/// A console line that could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for the list")]
    Unknown(String),
    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("'{value}' is not {argument}")]
    InvalidNumber { argument: &'static str, value: String },
    #[error("{0}")]
    PitLaps(String),
}
