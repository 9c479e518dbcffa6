use std::fmt;
use std::ops::RangeInclusive;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::Rng;

use crate::data::{lap_range, AdjustedLapRecord, RaceData, RaceMeta};
use crate::error::{DataError, SessionError};
use crate::model::{ArimaOrder, FitSummary, LapTimeModel, FORECAST_HORIZON};

pub const MIN_POPULATE_LAPS: usize = 1;
pub const MAX_POPULATE_LAPS: usize = 20;
pub const MIN_FORECAST_LAPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualLap {
    pub lap: u32,
    pub milliseconds: i64,
}

/// The user-editable lap table. Row order is the order forecasts see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualLapTable {
    rows: Vec<ManualLap>,
}

impl ManualLapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<ManualLap>) -> Self {
        Self { rows }
    }

    /// Laps `1..=count` with durations drawn uniformly from `[min, max]`.
    pub fn populate<R: Rng>(rng: &mut R, count: usize, min: i64, max: i64) -> Self {
        let rows = (1..=count as u32)
            .map(|lap| ManualLap { lap, milliseconds: rng.gen_range(min..=max) })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[ManualLap] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, lap: u32, milliseconds: i64) {
        self.rows.push(ManualLap { lap, milliseconds });
    }

    pub fn edit(&mut self, row: usize, lap: u32, milliseconds: i64) -> Result<(), SessionError> {
        let len = self.rows.len();
        let entry = self.rows.get_mut(row).ok_or(SessionError::InvalidRow { row, len })?;
        *entry = ManualLap { lap, milliseconds };
        Ok(())
    }

    pub fn remove(&mut self, row: usize) -> Result<ManualLap, SessionError> {
        if row >= self.rows.len() {
            return Err(SessionError::InvalidRow { row, len: self.rows.len() });
        }
        Ok(self.rows.remove(row))
    }

    /// Subtract `milliseconds` from every row for `lap` and return how many
    /// rows changed. No row changes if any of them would overflow.
    pub fn subtract_pit_time(
        &mut self,
        lap: u32,
        milliseconds: i64,
    ) -> Result<usize, SessionError> {
        let mut adjusted = Vec::new();
        for (index, row) in self.rows.iter().enumerate().filter(|(_, r)| r.lap == lap) {
            let remaining = row
                .milliseconds
                .checked_sub(milliseconds)
                .ok_or(SessionError::PitTimeOverflow { lap, milliseconds })?;
            adjusted.push((index, remaining));
        }
        for &(index, remaining) in &adjusted {
            self.rows[index].milliseconds = remaining;
        }
        Ok(adjusted.len())
    }

    pub fn durations(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.milliseconds as f64).collect()
    }

    pub fn last_lap(&self) -> Option<u32> {
        self.rows.last().map(|r| r.lap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitAdjustment {
    pub lap: u32,
    pub milliseconds: i64,
}

/// Parse a comma-separated list of lap numbers such as `"12, 31"`.
pub fn parse_pit_laps(input: &str) -> Result<Vec<u32>, SessionError> {
    input
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u32>().map_err(|e| SessionError::InvalidPitLaps {
                input: input.to_string(),
                reason: format!("'{}': {}", part, e),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPoint {
    pub lap: u32,
    pub actual: f64,
    pub fitted: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InSampleFit {
    pub race_id: u32,
    pub driver_id: u32,
    pub points: Vec<FitPoint>,
    pub summary: FitSummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedLap {
    pub lap: u32,
    pub milliseconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub lap: u32,
    pub milliseconds: f64,
    pub predicted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport {
    pub predictions: Vec<PredictedLap>,
    // table rows followed by the predictions
    pub combined: Vec<SeriesPoint>,
    pub summary: FitSummary,
}

/// Recoverable conditions reported to the user instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationWarning {
    TooFewLaps { got: usize, needed: usize },
    NoLapTable,
    NoTrainedModel,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::TooFewLaps { needed, .. } => write!(
                f,
                "Too few laps to accurately predict the next {}, please enter at least {} laps.",
                FORECAST_HORIZON, needed
            ),
            ValidationWarning::NoLapTable => write!(f, "Please enter lap times before predicting."),
            ValidationWarning::NoTrainedModel => write!(f, "Train a model first."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SelectRace(u32),
    SelectDriver(u32),
    ShowLaps,
    TrainModel,
    Explain,
    PopulateLaps(usize),
    AddLap { lap: u32, milliseconds: i64 },
    EditLap { row: usize, lap: u32, milliseconds: i64 },
    RemoveLap { row: usize },
    AdjustPitStops(Vec<PitAdjustment>),
    ShowTable,
    Predict,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    RaceSelected { race: RaceMeta, drivers: Vec<u32> },
    Laps(Vec<AdjustedLapRecord>),
    Trained(InSampleFit),
    Explained(InSampleFit),
    Table(ManualLapTable),
    Forecast(ForecastReport),
    Warning(ValidationWarning),
    Reset,
}

struct TrainedModel {
    race_id: u32,
    driver_id: u32,
    laps: Vec<AdjustedLapRecord>,
    model: LapTimeModel,
}

impl TrainedModel {
    fn in_sample(&self) -> InSampleFit {
        let fitted = self.model.fitted_values();
        let points = self
            .laps
            .iter()
            .zip(fitted)
            .map(|(lap, fitted)| FitPoint { lap: lap.lap, actual: lap.milliseconds as f64, fitted })
            .collect();
        InSampleFit {
            race_id: self.race_id,
            driver_id: self.driver_id,
            points,
            summary: self.model.summary(),
        }
    }
}

/// Session-scoped state for one user: selection, trained model and lap table.
///
/// Every interaction is a [`SessionEvent`] passed to [`Session::handle`]. A
/// failing event leaves the state as it was before the event.
pub struct Session<'a, R: Rng = StdRng> {
    data: &'a RaceData,
    seasons: RangeInclusive<i32>,
    rng: R,
    race: Option<u32>,
    driver: Option<u32>,
    adjusted: Option<Vec<AdjustedLapRecord>>,
    trained: Option<TrainedModel>,
    table: Option<ManualLapTable>,
}

impl<'a, R: Rng> Session<'a, R> {
    pub fn new(data: &'a RaceData, seasons: RangeInclusive<i32>, rng: R) -> Self {
        Session {
            data,
            seasons,
            rng,
            race: None,
            driver: None,
            adjusted: None,
            trained: None,
            table: None,
        }
    }

    pub fn races(&self) -> Vec<&'a RaceMeta> {
        self.data.races(&self.seasons)
    }

    pub fn selected_race(&self) -> Option<u32> {
        self.race
    }

    pub fn selected_driver(&self) -> Option<u32> {
        self.driver
    }

    pub fn drivers(&self) -> Result<Vec<u32>, SessionError> {
        let race = self.race.ok_or(SessionError::NoRaceSelected)?;
        Ok(self.data.drivers_for_race(race))
    }

    pub fn adjusted_laps(&self) -> Option<&[AdjustedLapRecord]> {
        self.adjusted.as_deref()
    }

    pub fn table(&self) -> Option<&ManualLapTable> {
        self.table.as_ref()
    }

    pub fn trained_model(&self) -> Option<&LapTimeModel> {
        self.trained.as_ref().map(|t| &t.model)
    }

    pub fn handle(&mut self, event: SessionEvent) -> Result<Outcome, SessionError> {
        match event {
            SessionEvent::SelectRace(race_id) => self.select_race(race_id),
            SessionEvent::SelectDriver(driver_id) => self.select_driver(driver_id),
            SessionEvent::ShowLaps => {
                self.adjusted.clone().map(Outcome::Laps).ok_or(SessionError::NoDriverSelected)
            }
            SessionEvent::TrainModel => self.train(),
            SessionEvent::Explain => Ok(match &self.trained {
                Some(trained) => Outcome::Explained(trained.in_sample()),
                None => Outcome::Warning(ValidationWarning::NoTrainedModel),
            }),
            SessionEvent::PopulateLaps(count) => self.populate(count),
            SessionEvent::AddLap { lap, milliseconds } => {
                let table = self.table.get_or_insert_with(ManualLapTable::new);
                table.push(lap, milliseconds);
                Ok(Outcome::Table(table.clone()))
            }
            SessionEvent::EditLap { row, lap, milliseconds } => {
                let table = self.table.as_mut().ok_or(SessionError::InvalidRow { row, len: 0 })?;
                table.edit(row, lap, milliseconds)?;
                Ok(Outcome::Table(table.clone()))
            }
            SessionEvent::RemoveLap { row } => {
                let table = self.table.as_mut().ok_or(SessionError::InvalidRow { row, len: 0 })?;
                table.remove(row)?;
                Ok(Outcome::Table(table.clone()))
            }
            SessionEvent::AdjustPitStops(adjustments) => self.adjust_pit_stops(&adjustments),
            SessionEvent::ShowTable => Ok(match &self.table {
                Some(table) => Outcome::Table(table.clone()),
                None => Outcome::Warning(ValidationWarning::NoLapTable),
            }),
            SessionEvent::Predict => self.predict(),
            SessionEvent::Reset => {
                self.race = None;
                self.driver = None;
                self.adjusted = None;
                self.trained = None;
                self.table = None;
                info!(target: "session:reset", "session cleared");
                Ok(Outcome::Reset)
            }
        }
    }

    fn select_race(&mut self, race_id: u32) -> Result<Outcome, SessionError> {
        let race = self
            .data
            .race(race_id)
            .filter(|r| self.seasons.contains(&r.year))
            .ok_or(SessionError::UnknownRace(race_id))?
            .clone();
        self.race = Some(race_id);
        self.driver = None;
        self.adjusted = None;
        info!(target: "session:select_race", "selected {}", race.label());
        Ok(Outcome::RaceSelected { race, drivers: self.data.drivers_for_race(race_id) })
    }

    fn select_driver(&mut self, driver_id: u32) -> Result<Outcome, SessionError> {
        let race_id = self.race.ok_or(SessionError::NoRaceSelected)?;
        let laps = self.data.adjusted_laps(race_id, driver_id).map_err(|e| match e {
            DataError::NoLaps { .. } => SessionError::UnknownDriver { race_id, driver_id },
            other => SessionError::Data(other),
        })?;
        self.driver = Some(driver_id);
        self.adjusted = Some(laps.clone());
        info!(
            target: "session:select_driver",
            "driver {} in race {}: {} laps, {} pit laps",
            driver_id, race_id, laps.len(), laps.iter().filter(|l| l.is_pit_stop).count()
        );
        Ok(Outcome::Laps(laps))
    }

    fn train(&mut self) -> Result<Outcome, SessionError> {
        let (race_id, driver_id, laps) = match (self.race, self.driver, &self.adjusted) {
            (Some(race), Some(driver), Some(laps)) => (race, driver, laps.clone()),
            _ => return Err(SessionError::NoDriverSelected),
        };
        let series: Vec<f64> = laps.iter().map(|l| l.milliseconds as f64).collect();
        let model = LapTimeModel::fit(&series, ArimaOrder::LAP_TIME)?;
        let trained = TrainedModel { race_id, driver_id, laps, model };
        let fit = trained.in_sample();
        self.trained = Some(trained);
        info!(
            target: "session:train",
            "model trained for driver {} in race {}", driver_id, race_id
        );
        Ok(Outcome::Trained(fit))
    }

    fn populate(&mut self, count: usize) -> Result<Outcome, SessionError> {
        if !(MIN_POPULATE_LAPS..=MAX_POPULATE_LAPS).contains(&count) {
            return Err(SessionError::InvalidLapCount {
                min: MIN_POPULATE_LAPS,
                max: MAX_POPULATE_LAPS,
                got: count,
            });
        }
        let laps = self.adjusted.as_deref().ok_or(SessionError::NoDriverSelected)?;
        let (min, max) = lap_range(laps).ok_or(SessionError::NoDriverSelected)?;
        let table = ManualLapTable::populate(&mut self.rng, count, min, max);
        self.table = Some(table.clone());
        Ok(Outcome::Table(table))
    }

    fn adjust_pit_stops(
        &mut self,
        adjustments: &[PitAdjustment],
    ) -> Result<Outcome, SessionError> {
        if let Some(bad) = adjustments.iter().find(|a| a.milliseconds < 0) {
            return Err(SessionError::NegativePitTime {
                lap: bad.lap,
                milliseconds: bad.milliseconds,
            });
        }
        let table = match self.table.as_mut() {
            Some(table) => table,
            None => return Ok(Outcome::Warning(ValidationWarning::NoLapTable)),
        };
        // all adjustments land together or not at all
        let mut adjusted = table.clone();
        for adjustment in adjustments {
            if adjusted.subtract_pit_time(adjustment.lap, adjustment.milliseconds)? == 0 {
                warn!(
                    target: "session:adjust_pit_stops",
                    "lap {} is not in the table", adjustment.lap
                );
            }
        }
        *table = adjusted;
        Ok(Outcome::Table(table.clone()))
    }

    fn predict(&mut self) -> Result<Outcome, SessionError> {
        let table = match &self.table {
            Some(table) => table,
            None => return Ok(Outcome::Warning(ValidationWarning::NoLapTable)),
        };
        if table.len() < MIN_FORECAST_LAPS {
            return Ok(Outcome::Warning(ValidationWarning::TooFewLaps {
                got: table.len(),
                needed: MIN_FORECAST_LAPS,
            }));
        }

        let last_lap = table.last_lap().unwrap_or_default();
        let final_lap = u32::try_from(FORECAST_HORIZON)
            .ok()
            .and_then(|horizon| last_lap.checked_add(horizon))
            .ok_or(SessionError::LapOutOfRange { lap: last_lap, horizon: FORECAST_HORIZON })?;

        let model = LapTimeModel::fit(&table.durations(), ArimaOrder::LAP_TIME)?;
        let predictions: Vec<PredictedLap> = (last_lap + 1..=final_lap)
            .zip(model.forecast(FORECAST_HORIZON))
            .map(|(lap, milliseconds)| PredictedLap { lap, milliseconds })
            .collect();

        let actual = table.rows().iter().map(|r| SeriesPoint {
            lap: r.lap,
            milliseconds: r.milliseconds as f64,
            predicted: false,
        });
        let predicted = predictions.iter().map(|p| SeriesPoint {
            lap: p.lap,
            milliseconds: p.milliseconds,
            predicted: true,
        });
        let combined = actual.chain(predicted).collect();

        info!(target: "session:predict", "forecast laps {}..={}", last_lap + 1, final_lap);
        Ok(Outcome::Forecast(ForecastReport { predictions, combined, summary: model.summary() }))
    }
}
