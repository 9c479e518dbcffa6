use lapcast::session::SeriesPoint;
use lapcast::{console, Outcome, RaceData, Session, SessionEvent, ValidationWarning};
use rand::rngs::StdRng;
use rand::SeedableRng;

const LAPS: &str = "\
raceId,driverId,lap,position,time,milliseconds
1100,1,1,1,1:35.102,95102
1100,1,2,1,1:31.480,91480
1100,1,3,1,1:31.215,91215
1100,1,4,1,1:53.004,113004
1100,1,5,1,1:31.990,91990
1100,1,6,1,1:31.320,91320
1100,1,7,1,1:31.650,91650
1100,1,8,1,1:31.105,91105
1100,1,9,1,1:30.870,90870
1100,1,10,1,1:31.400,91400
1100,1,11,1,1:30.990,90990
1100,1,12,1,1:31.230,91230
1100,11,1,2,1:36.000,96000
";

const PITS: &str = "\
raceId,driverId,stop,lap,time,duration,milliseconds
1100,1,1,4,15:12:40,22.104,22104
";

const RACES: &str = "\
raceId,year,round,circuitId,name,date,time,url
1100,2023,5,79,Miami Grand Prix,2023-05-07,19:30:00,http://example.org/miami
950,2016,1,1,Australian Grand Prix,2016-03-20,05:00:00,http://example.org/melbourne
800,2009,1,1,Australian Grand Prix,2009-03-29,06:00:00,http://example.org/melbourne
";

fn data() -> RaceData {
    RaceData::from_readers(LAPS.as_bytes(), PITS.as_bytes(), RACES.as_bytes()).unwrap()
}

fn run_script(data: &RaceData, script: &str) -> String {
    let mut session = Session::new(data, 2014..=2023, StdRng::seed_from_u64(7));
    let mut out = Vec::new();
    console::run(&mut session, script.as_bytes(), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn full_session_through_the_console() {
    let data = data();
    let output = run_script(
        &data,
        "races\nrace 1100\ndriver 1\ntrain\npopulate 6\npit 2, 3\n1000\n\npredict\nquit\n",
    );

    assert!(output.contains("950 - Australian Grand Prix"));
    assert!(output.contains("1100 - Miami Grand Prix"));
    assert!(!output.contains("800 - Australian Grand Prix"));
    assert!(output.contains("Drivers: 1, 11"));
    assert!(output.contains("Model trained successfully!"));
    assert!(output.contains("Enter pit stop time for lap 2: "));
    assert!(output.contains("Enter pit stop time for lap 3: "));
    let predictions = output
        .split("Predicted lap times for the next 5 laps:")
        .nth(1)
        .expect("prediction table");
    for lap in 7..=11 {
        assert!(
            predictions.contains(&format!("\n{:>4} ", lap)),
            "missing lap {} in\n{}",
            lap,
            predictions
        );
    }
}

#[test]
fn console_reports_errors_and_keeps_going() {
    let data = data();
    let output = run_script(
        &data,
        "race 800\npredict\nadd 1 90000\npredict\nfly\nrace 950\ndrivers\n",
    );

    assert!(output.contains("Error: race 800 is not available in the selected seasons"));
    assert!(output.contains("Warning: Please enter lap times before predicting."));
    assert!(output.contains(
        "Warning: Too few laps to accurately predict the next 5, please enter at least 5 laps."
    ));
    assert!(output.contains("unknown command 'fly'"));
    assert!(output.contains("Drivers: \n"));
}

#[test]
fn pit_adjusted_history_feeds_the_trained_model() {
    let data = data();
    let mut session = Session::new(&data, 2014..=2023, StdRng::seed_from_u64(1));
    session.handle(SessionEvent::SelectRace(1100)).unwrap();
    session.handle(SessionEvent::SelectDriver(1)).unwrap();

    let fit = match session.handle(SessionEvent::TrainModel).unwrap() {
        Outcome::Trained(fit) => fit,
        other => panic!("unexpected {:?}", other),
    };
    let pit_lap = fit.points.iter().find(|p| p.lap == 4).unwrap();
    assert_eq!(pit_lap.actual, 113004.0 - 22104.0);
    assert_eq!(fit.points.len(), 12);
    assert_eq!(session.trained_model().unwrap().series().len(), 12);
}

#[test]
fn five_row_example_forecasts_laps_six_to_ten() {
    let data = data();
    let mut session = Session::new(&data, 2014..=2023, StdRng::seed_from_u64(1));
    for (lap, milliseconds) in [(1, 90000), (2, 89500), (3, 91000), (4, 90200), (5, 89800)] {
        session.handle(SessionEvent::AddLap { lap, milliseconds }).unwrap();
    }

    let report = match session.handle(SessionEvent::Predict).unwrap() {
        Outcome::Forecast(report) => report,
        other => panic!("unexpected {:?}", other),
    };
    let labels: Vec<u32> = report.predictions.iter().map(|p| p.lap).collect();
    assert_eq!(labels, vec![6, 7, 8, 9, 10]);
    assert!(report.predictions.iter().all(|p| p.milliseconds.is_finite()));

    let actual: Vec<&SeriesPoint> = report.combined.iter().filter(|p| !p.predicted).collect();
    assert_eq!(actual.len(), 5);
    assert_eq!(actual[2].milliseconds, 91000.0);

    session.handle(SessionEvent::RemoveLap { row: 4 }).unwrap();
    assert_eq!(
        session.handle(SessionEvent::Predict).unwrap(),
        Outcome::Warning(ValidationWarning::TooFewLaps { got: 4, needed: 5 })
    );
}

#[test]
fn out_of_range_input_fails_the_command_not_the_console() {
    let data = data();
    let output = run_script(
        &data,
        "add 4294967291 90000\nadd 4294967292 89500\nadd 4294967293 91000\n\
         add 4294967294 90200\nadd 4294967295 89800\npredict\n\
         add 1 -9223372036854775808\npit 1\n5\ntable\n",
    );

    assert!(output.contains("Error: cannot label 5 laps after lap 4294967295"));
    assert!(output.contains("Error: subtracting 5 ms from lap 1 overflows its lap time"));
    assert!(output.contains("-9223372036854775808"));
}
