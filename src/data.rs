use csv::ReaderBuilder;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::config::DataFiles;
use crate::error::DataError;

// renaming the columns we need from the Ergast-style exports, everything else is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LapRecord {
    #[serde(rename = "raceId")] pub race_id: u32,
    #[serde(rename = "driverId")] pub driver_id: u32,
    #[serde(rename = "lap")] pub lap: u32,
    #[serde(rename = "milliseconds")] pub milliseconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PitStopRecord {
    #[serde(rename = "raceId")] pub race_id: u32,
    #[serde(rename = "driverId")] pub driver_id: u32,
    #[serde(rename = "lap")] pub lap: u32,
    #[serde(rename = "milliseconds")] pub milliseconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RaceMeta {
    #[serde(rename = "raceId")] pub race_id: u32,
    #[serde(rename = "year")] pub year: i32,
    #[serde(rename = "name")] pub name: String,
}

impl RaceMeta {
    /// Selection label, e.g. `"1098 - Bahrain Grand Prix"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.race_id, self.name)
    }
}

// a lap with its pit-stop time taken out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustedLapRecord {
    pub lap: u32,
    pub raw_milliseconds: i64,
    pub pit_milliseconds: i64,
    pub milliseconds: i64,
    pub is_pit_stop: bool,
}

type DriverKey = (u32, u32);
type PitKey = (u32, u32, u32);

/// The three tables, loaded once and indexed for the race/driver lookups.
pub struct RaceData {
    races: Vec<RaceMeta>,
    laps: HashMap<DriverKey, Vec<LapRecord>>,
    pit_stops: HashMap<PitKey, PitTotal>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PitTotal {
    milliseconds: i64,
    stops: usize,
}

impl RaceData {
    pub fn load(files: &DataFiles) -> Result<Self, DataError> {
        let laps: Vec<LapRecord> = read_file(&files.lap_times)?;
        let pits: Vec<PitStopRecord> = read_file(&files.pit_stops)?;
        let races: Vec<RaceMeta> = read_file(&files.races)?;
        info!(
            target: "data:load",
            "loaded {} laps, {} pit stops, {} races",
            laps.len(), pits.len(), races.len()
        );
        Ok(Self::from_records(laps, pits, races))
    }

    pub fn from_readers<L: Read, P: Read, R: Read>(
        laps: L,
        pits: P,
        races: R,
    ) -> Result<Self, DataError> {
        let laps = read_table::<LapRecord, _>("lap times", laps)?;
        let pits = read_table::<PitStopRecord, _>("pit stops", pits)?;
        let races = read_table::<RaceMeta, _>("races", races)?;
        Ok(Self::from_records(laps, pits, races))
    }

    pub fn from_records(
        laps: Vec<LapRecord>,
        pits: Vec<PitStopRecord>,
        mut races: Vec<RaceMeta>,
    ) -> Self {
        let mut lap_index: HashMap<DriverKey, Vec<LapRecord>> = HashMap::new();
        for lap in laps {
            lap_index.entry((lap.race_id, lap.driver_id)).or_default().push(lap);
        }
        // keep every driver's laps in lap order so lookups never have to sort
        lap_index.values_mut().for_each(|laps| laps.sort_by_key(|l| l.lap));

        let mut pit_index: HashMap<PitKey, PitTotal> = HashMap::new();
        for pit in pits {
            let total = pit_index.entry((pit.race_id, pit.driver_id, pit.lap)).or_default();
            total.milliseconds += pit.milliseconds;
            total.stops += 1;
        }

        races.sort_by_key(|r| r.race_id);
        RaceData { races, laps: lap_index, pit_stops: pit_index }
    }

    pub fn races(&self, seasons: &RangeInclusive<i32>) -> Vec<&RaceMeta> {
        self.races.iter().filter(|r| seasons.contains(&r.year)).collect()
    }

    pub fn race(&self, race_id: u32) -> Option<&RaceMeta> {
        self.races.iter().find(|r| r.race_id == race_id)
    }

    pub fn drivers_for_race(&self, race_id: u32) -> Vec<u32> {
        self.laps
            .keys()
            .filter(|(race, _)| *race == race_id)
            .map(|(_, driver)| *driver)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Laps of one driver in one race with pit-stop time subtracted, ordered by lap.
    pub fn adjusted_laps(
        &self,
        race_id: u32,
        driver_id: u32,
    ) -> Result<Vec<AdjustedLapRecord>, DataError> {
        let laps = self
            .laps
            .get(&(race_id, driver_id))
            .filter(|laps| !laps.is_empty())
            .ok_or(DataError::NoLaps { race_id, driver_id })?;

        let mut adjusted = Vec::with_capacity(laps.len());
        let mut previous_lap = None;
        for lap in laps {
            if previous_lap == Some(lap.lap) {
                return Err(DataError::DuplicateLap { race_id, driver_id, lap: lap.lap });
            }
            previous_lap = Some(lap.lap);

            let pit = self.pit_stops.get(&(race_id, driver_id, lap.lap));
            if let Some(total) = pit.filter(|t| t.stops > 1) {
                warn!(
                    target: "data:adjusted_laps",
                    "{} pit stops recorded on lap {} (race {}, driver {}), subtracting their sum",
                    total.stops, lap.lap, race_id, driver_id
                );
            }
            let pit_milliseconds = pit.map_or(0, |t| t.milliseconds);
            adjusted.push(AdjustedLapRecord {
                lap: lap.lap,
                raw_milliseconds: lap.milliseconds,
                pit_milliseconds,
                milliseconds: lap.milliseconds - pit_milliseconds,
                is_pit_stop: pit.is_some(),
            });
        }
        Ok(adjusted)
    }
}

/// Smallest and largest adjusted lap time, `None` for an empty series.
pub fn lap_range(laps: &[AdjustedLapRecord]) -> Option<(i64, i64)> {
    let min = laps.iter().map(|l| l.milliseconds).min()?;
    let max = laps.iter().map(|l| l.milliseconds).max()?;
    Some((min, max))
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DataError> {
    let file = path.display().to_string();
    let handle = File::open(path)
        .map_err(|e| DataError::Csv { file: file.clone(), source: csv::Error::from(e) })?;
    read_table(&file, handle)
}

fn read_table<T: DeserializeOwned, R: Read>(file: &str, reader: R) -> Result<Vec<T>, DataError> {
    let mut reader =
        ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| DataError::Csv { file: file.to_string(), source })
}
