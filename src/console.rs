//! Line-oriented presentation layer over a [`Session`].

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use log::warn;
use rand::Rng;

use crate::data::AdjustedLapRecord;
use crate::error::CommandError;
use crate::model::FitSummary;
use crate::session::{
    parse_pit_laps, ForecastReport, InSampleFit, ManualLapTable, Outcome, PitAdjustment, Session,
    SessionEvent,
};

const HELP: &str = "\
Commands:
  races                     list races in the selected seasons
  race <id>                 select a race
  drivers                   list drivers of the selected race
  driver <id>               select a driver and load pit-adjusted laps
  laps                      show the pit-adjusted laps again
  train                     fit the lap-time model on the adjusted laps
  explain                   show actual vs predicted laps of the trained model
  populate <n>              fill the lap table with n random laps (1-20)
  table                     show the lap table
  add <lap> <ms>            append a row
  edit <row> <lap> <ms>     replace a row
  remove <row>              delete a row
  pit <lap,lap,...>         subtract pit stop times from those laps
  predict                   predict the next 5 laps from the table
  reset                     clear the session
  help                      show this text
  quit                      leave";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event(SessionEvent),
    Races,
    Drivers,
    PitStops(Vec<u32>),
    Help,
    Quit,
}

fn number<T: FromStr>(
    value: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<T, CommandError> {
    let value = value.ok_or(CommandError::MissingArgument { command, argument })?;
    value
        .parse()
        .map_err(|_| CommandError::InvalidNumber { argument, value: value.to_string() })
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let keyword = match words.next() {
        Some(keyword) => keyword.to_lowercase(),
        None => return Ok(None),
    };

    let command = match keyword.as_str() {
        "races" => Command::Races,
        "race" => {
            Command::Event(SessionEvent::SelectRace(number(words.next(), "race", "a race id")?))
        }
        "drivers" => Command::Drivers,
        "driver" => {
            let driver = number(words.next(), "driver", "a driver id")?;
            Command::Event(SessionEvent::SelectDriver(driver))
        }
        "laps" => Command::Event(SessionEvent::ShowLaps),
        "train" => Command::Event(SessionEvent::TrainModel),
        "explain" => Command::Event(SessionEvent::Explain),
        "populate" => {
            let count = number(words.next(), "populate", "a lap count")?;
            Command::Event(SessionEvent::PopulateLaps(count))
        }
        "table" => Command::Event(SessionEvent::ShowTable),
        "add" => Command::Event(SessionEvent::AddLap {
            lap: number(words.next(), "add", "a lap number")?,
            milliseconds: number(words.next(), "add", "a lap time in milliseconds")?,
        }),
        "edit" => Command::Event(SessionEvent::EditLap {
            row: number(words.next(), "edit", "a row number")?,
            lap: number(words.next(), "edit", "a lap number")?,
            milliseconds: number(words.next(), "edit", "a lap time in milliseconds")?,
        }),
        "remove" => Command::Event(SessionEvent::RemoveLap {
            row: number(words.next(), "remove", "a row number")?,
        }),
        "pit" => {
            let rest: Vec<&str> = words.collect();
            if rest.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "pit",
                    argument: "a list of laps",
                });
            }
            let laps = parse_pit_laps(&rest.join(" "))
                .map_err(|e| CommandError::PitLaps(e.to_string()))?;
            Command::PitStops(laps)
        }
        "predict" => Command::Event(SessionEvent::Predict),
        "reset" => Command::Event(SessionEvent::Reset),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Drive `session` from `input` until `quit` or end of input.
pub fn run<R: Rng, I: BufRead, O: Write>(
    session: &mut Session<'_, R>,
    mut input: I,
    mut out: O,
) -> io::Result<()> {
    writeln!(out, "Race Lap Time Prediction")?;
    writeln!(out, "Type 'help' for commands.")?;

    loop {
        let line = match prompt(&mut input, &mut out, "> ")? {
            Some(line) => line,
            None => break,
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Races => {
                for race in session.races() {
                    writeln!(out, "{}", race.label())?;
                }
            }
            Command::Drivers => match session.drivers() {
                Ok(drivers) => writeln!(out, "Drivers: {}", join(&drivers))?,
                Err(e) => writeln!(out, "Error: {}", e)?,
            },
            Command::PitStops(laps) => {
                let mut adjustments = Vec::with_capacity(laps.len());
                for lap in laps {
                    let question = format!("Enter pit stop time for lap {}: ", lap);
                    let answer = match prompt(&mut input, &mut out, &question)? {
                        Some(answer) => answer,
                        None => return Ok(()),
                    };
                    let answer = answer.trim();
                    let milliseconds = if answer.is_empty() {
                        0
                    } else {
                        match answer.parse::<i64>() {
                            Ok(ms) => ms,
                            Err(_) => {
                                writeln!(out, "'{}' is not a number of milliseconds", answer)?;
                                writeln!(out, "Pit adjustment cancelled.")?;
                                adjustments.clear();
                                break;
                            }
                        }
                    };
                    adjustments.push(PitAdjustment { lap, milliseconds });
                }
                if !adjustments.is_empty() {
                    dispatch(session, SessionEvent::AdjustPitStops(adjustments), &mut out)?;
                }
            }
            Command::Event(event) => dispatch(session, event, &mut out)?,
        }
    }
    Ok(())
}

fn prompt<I: BufRead, O: Write>(
    input: &mut I,
    out: &mut O,
    text: &str,
) -> io::Result<Option<String>> {
    write!(out, "{}", text)?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

fn dispatch<R: Rng, O: Write>(
    session: &mut Session<'_, R>,
    event: SessionEvent,
    out: &mut O,
) -> io::Result<()> {
    match session.handle(event) {
        Ok(outcome) => render_outcome(&outcome, out),
        Err(e) => {
            warn!(target: "console", "{}", e);
            writeln!(out, "Error: {}", e)
        }
    }
}

pub fn render_outcome<O: Write>(outcome: &Outcome, out: &mut O) -> io::Result<()> {
    match outcome {
        Outcome::RaceSelected { race, drivers } => {
            writeln!(out, "Selected {} ({})", race.label(), race.year)?;
            writeln!(out, "Drivers: {}", join(drivers))
        }
        Outcome::Laps(laps) => render_laps(laps, out),
        Outcome::Trained(fit) => {
            writeln!(out, "Model trained successfully!")?;
            render_fit(fit, out)
        }
        Outcome::Explained(fit) => render_fit(fit, out),
        Outcome::Table(table) => render_table(table, out),
        Outcome::Forecast(report) => render_forecast(report, out),
        Outcome::Warning(warning) => writeln!(out, "Warning: {}", warning),
        Outcome::Reset => writeln!(out, "Session cleared."),
    }
}

fn render_laps<O: Write>(laps: &[AdjustedLapRecord], out: &mut O) -> io::Result<()> {
    writeln!(
        out,
        "{:>4} {:>10} {:>8} {:>12} {:>4}",
        "Lap", "Raw ms", "Pit ms", "Adjusted ms", "Pit"
    )?;
    for lap in laps {
        writeln!(
            out,
            "{:>4} {:>10} {:>8} {:>12} {:>4}",
            lap.lap,
            lap.raw_milliseconds,
            lap.pit_milliseconds,
            lap.milliseconds,
            if lap.is_pit_stop { "yes" } else { "" }
        )?;
    }
    Ok(())
}

fn render_summary<O: Write>(summary: &FitSummary, out: &mut O) -> io::Result<()> {
    writeln!(
        out,
        "{}  ar {:?}  ma {:?}",
        summary.order,
        summary.ar.iter().map(|c| format!("{:.4}", c)).collect::<Vec<_>>(),
        summary.ma.iter().map(|c| format!("{:.4}", c)).collect::<Vec<_>>()
    )?;
    writeln!(
        out,
        "sigma2 {:.1}  rmse {:.1} ms  aic {:.2}  stationary {}  invertible {}  iterations {}{}",
        summary.sigma2,
        summary.rmse,
        summary.aic,
        yes_no(summary.stationary),
        yes_no(summary.invertible),
        summary.iterations,
        if summary.converged { "" } else { " (not converged)" }
    )
}

fn render_fit<O: Write>(fit: &InSampleFit, out: &mut O) -> io::Result<()> {
    writeln!(
        out,
        "Actual vs Predicted Lap Times (race {}, driver {})",
        fit.race_id, fit.driver_id
    )?;
    render_summary(&fit.summary, out)?;
    writeln!(out, "{:>4} {:>12} {:>12}", "Lap", "Actual", "Predicted")?;
    for point in &fit.points {
        writeln!(out, "{:>4} {:>12.0} {:>12.1}", point.lap, point.actual, point.fitted)?;
    }
    Ok(())
}

fn render_table<O: Write>(table: &ManualLapTable, out: &mut O) -> io::Result<()> {
    writeln!(out, "{:>4} {:>4} {:>12}", "Row", "Lap", "Milliseconds")?;
    for (row, lap) in table.rows().iter().enumerate() {
        writeln!(out, "{:>4} {:>4} {:>12}", row, lap.lap, lap.milliseconds)?;
    }
    Ok(())
}

fn render_forecast<O: Write>(report: &ForecastReport, out: &mut O) -> io::Result<()> {
    render_summary(&report.summary, out)?;
    writeln!(out, "{:>4} {:>14} {:>10}", "Lap", "Milliseconds", "")?;
    for point in &report.combined {
        writeln!(
            out,
            "{:>4} {:>14.1} {:>10}",
            point.lap,
            point.milliseconds,
            if point.predicted { "predicted" } else { "actual" }
        )?;
    }
    writeln!(out, "Predicted lap times for the next {} laps:", report.predictions.len())?;
    writeln!(out, "{:>4} {:>22}", "lap", "predicted_milliseconds")?;
    for prediction in &report.predictions {
        writeln!(out, "{:>4} {:>22.1}", prediction.lap, prediction.milliseconds)?;
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn join(ids: &[u32]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selection_commands() {
        assert_eq!(
            parse_command("race 1100").unwrap(),
            Some(Command::Event(SessionEvent::SelectRace(1100)))
        );
        assert_eq!(
            parse_command("  DRIVER 44 ").unwrap(),
            Some(Command::Event(SessionEvent::SelectDriver(44)))
        );
        assert_eq!(parse_command("races").unwrap(), Some(Command::Races));
        assert_eq!(parse_command("").unwrap(), None);
    }

    #[test]
    fn parses_table_edits() {
        assert_eq!(
            parse_command("edit 2 7 91234").unwrap(),
            Some(Command::Event(SessionEvent::EditLap { row: 2, lap: 7, milliseconds: 91234 }))
        );
        assert_eq!(
            parse_command("add 6 90000").unwrap(),
            Some(Command::Event(SessionEvent::AddLap { lap: 6, milliseconds: 90000 }))
        );
        assert_eq!(
            parse_command("remove 0").unwrap(),
            Some(Command::Event(SessionEvent::RemoveLap { row: 0 }))
        );
    }

    #[test]
    fn pit_lists_may_contain_spaces() {
        assert_eq!(parse_command("pit 12, 31").unwrap(), Some(Command::PitStops(vec![12, 31])));
        assert!(matches!(parse_command("pit 12,b"), Err(CommandError::PitLaps(_))));
        assert!(matches!(
            parse_command("pit"),
            Err(CommandError::MissingArgument { command: "pit", .. })
        ));
    }

    #[test]
    fn reports_bad_arguments() {
        assert_eq!(
            parse_command("populate").unwrap_err(),
            CommandError::MissingArgument { command: "populate", argument: "a lap count" }
        );
        assert_eq!(
            parse_command("race abc").unwrap_err(),
            CommandError::InvalidNumber { argument: "a race id", value: "abc".to_string() }
        );
        assert_eq!(parse_command("fly").unwrap_err(), CommandError::Unknown("fly".to_string()));
    }

    #[test]
    fn warnings_are_prefixed() {
        let mut out = Vec::new();
        let warning = Outcome::Warning(crate::session::ValidationWarning::NoLapTable);
        render_outcome(&warning, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Warning: Please enter lap times before predicting.\n"
        );
    }
}
