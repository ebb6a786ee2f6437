use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
    parse_level(
        std::env::var("ADNS_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .as_deref(),
    )
    .unwrap_or(LevelFilter::Info)
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

fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Map `-v`/`-w` onto a level. Without either flag the environment level
/// stands as is; the flags only ever raise it.
fn effective_level(env: LevelFilter, verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => env,
        1 => env.max(LevelFilter::Debug),
        _ => env.max(LevelFilter::Trace),
    }
}

/// Initialize stderr logging based on `ADNS_LOG`/`RUST_LOG` and the command
/// line verbosity (1 = at least debug, 2 = at least trace with bus dumps).
pub fn init_rust_logging(verbosity: u8) {
    let level = effective_level(env_level(), verbosity);
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_to_str(level));
        env_logger::Builder::from_env(env)
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(effective_level(LevelFilter::Info, 0), LevelFilter::Info);
        assert_eq!(effective_level(LevelFilter::Info, 1), LevelFilter::Debug);
        assert_eq!(effective_level(LevelFilter::Info, 2), LevelFilter::Trace);
        assert_eq!(effective_level(LevelFilter::Trace, 0), LevelFilter::Trace);
        assert_eq!(effective_level(LevelFilter::Trace, 1), LevelFilter::Trace);
    }

    #[test]
    fn quieter_env_level_is_kept_without_flags() {
        assert_eq!(effective_level(LevelFilter::Warn, 0), LevelFilter::Warn);
        assert_eq!(effective_level(LevelFilter::Off, 0), LevelFilter::Off);
        assert_eq!(effective_level(LevelFilter::Error, 1), LevelFilter::Debug);
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level(Some("DEBUG")), Some(LevelFilter::Debug));
        assert_eq!(parse_level(Some("bogus")), None);
        assert_eq!(parse_level(None), None);
        assert_eq!(level_to_str(LevelFilter::Warn), "warn");
    }
}
