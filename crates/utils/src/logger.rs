use env_logger::Builder;
use log::LevelFilter;

/// Maps a configured level name, themed or standard, to a filter.
pub fn parse_level(log_level: &str) -> Option<LevelFilter> {
    let level = match log_level.to_lowercase().as_str() {
        "whisper" => LevelFilter::Trace,
        "haunt" => LevelFilter::Debug,
        "spooky" => LevelFilter::Info,
        "scream" => LevelFilter::Warn,
        "poltergeist" => LevelFilter::Error,
        "silence" => LevelFilter::Off,

        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,

        _ => return None,
    };
    Some(level)
}

pub fn init_logger(log_level: &str) {
    let level = parse_level(log_level).unwrap_or_else(|| {
        eprintln!(
            "Invalid log level '{}', defaulting to 'spooky' (info)",
            log_level
        );
        LevelFilter::Info
    });

    // RUST_LOG still wins for per-module overrides
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn themed_and_standard_names_match() {
        assert_eq!(parse_level("whisper"), parse_level("trace"));
        assert_eq!(parse_level("haunt"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("SPOOKY"), Some(LevelFilter::Info));
        assert_eq!(parse_level("scream"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("poltergeist"), Some(LevelFilter::Error));
        assert_eq!(parse_level("silence"), Some(LevelFilter::Off));
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_eq!(parse_level("loud"), None);
    }
}
