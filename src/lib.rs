//! # lapcast
//!
//! Pit-adjusted lap times and ARIMA lap-time forecasts for a race/driver pair.
//!
//! * [`data`] loads the lap, pit-stop and race tables and joins them.
//! * [`model`] fits ARIMA(2, 1, 2) and produces in-sample fits and forecasts.
//! * [`session`] holds the state of one interactive session.
//! * [`console`] is the text front end used by the binary.

pub mod config;
pub mod console;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod session;

pub use data::{AdjustedLapRecord, LapRecord, PitStopRecord, RaceData, RaceMeta};
pub use error::{CommandError, DataError, ForecastError, SessionError};
pub use model::{ArimaOrder, FitSummary, LapTimeModel, FORECAST_HORIZON};
pub use session::{
    ManualLap, ManualLapTable, Outcome, PitAdjustment, Session, SessionEvent, ValidationWarning,
};
