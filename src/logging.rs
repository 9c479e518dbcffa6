use std::path::Path;

use fern::Dispatch;
use log::LevelFilter;

pub fn level_from_str(verbosity: &str) -> LevelFilter {
    match verbosity.to_uppercase().as_str() {
        "OFF" => LevelFilter::Off,
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        // default to info
        _ => LevelFilter::Info,
    }
}

/// Install the global logger. Lines go to stderr, and to `log_file` when given.
pub fn setup_logging(verbosity: &str, log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let mut base_config = Dispatch::new()
        .level(level_from_str(verbosity))
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        base_config = base_config.chain(fern::log_file(path)?);
    }

    base_config.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels_case_insensitively() {
        assert_eq!(level_from_str("OFF"), LevelFilter::Off);
        assert_eq!(level_from_str("warn"), LevelFilter::Warn);
        assert_eq!(level_from_str("Debug"), LevelFilter::Debug);
        assert_eq!(level_from_str("TRACE"), LevelFilter::Trace);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(level_from_str("chatty"), LevelFilter::Info);
        assert_eq!(level_from_str(""), LevelFilter::Info);
    }
}
