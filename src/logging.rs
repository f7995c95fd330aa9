use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static LOG_ONCE: Once = Once::new();

/// Level used when neither the environment nor the command line says otherwise.
const DEFAULT_LEVEL: LevelFilter = LevelFilter::Warn;

fn env_level() -> Option<LevelFilter> {
    std::env::var("AS111_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(parse_level)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

pub fn parse_level(input: &str) -> Option<LevelFilter> {
    input.parse::<LevelFilter>().ok()
}

/// Level for a number of `-v` flags (or `verbose`/`debug` words).
pub fn verbosity_level(verbosity: u8) -> Option<LevelFilter> {
    match verbosity {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    }
}

/// Install the stderr logger once.
///
/// Command-line verbosity wins over `AS111_LOG`/`RUST_LOG`, which win over
/// the default of `warn`.
pub fn init_logging(verbosity: u8) {
    let level = verbosity_level(verbosity)
        .or_else(env_level)
        .unwrap_or(DEFAULT_LEVEL);
    LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_to_str(level));
        let mut builder = env_logger::Builder::from_env(env);
        builder
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true);
        if verbosity > 0 {
            builder.filter_level(level);
        }
        if let Err(e) = builder.try_init() {
            log::warn!("logger already installed, keeping it: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(verbosity_level(0), None);
        assert_eq!(verbosity_level(1), Some(LevelFilter::Info));
        assert_eq!(verbosity_level(2), Some(LevelFilter::Debug));
        assert_eq!(verbosity_level(7), Some(LevelFilter::Trace));
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("loud"), None);
        assert_eq!(level_to_str(LevelFilter::Warn), "warn");
    }

    #[test]
    fn init_keeps_an_existing_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
        init_logging(1);
        init_logging(2);
        log::info!("still logging");
    }
}
