//! Structured logging setup for stagebox
//!
//! Logs go to stderr through `tracing-subscriber`, so stdout stays reserved
//! for command output (image ids, plans, reports). The level comes from the
//! command line, then `STAGEBOX_LOG_LEVEL`, and `RUST_LOG` can refine it.
//!
//! # Example
//!
//! ```no_run
//! use stagebox::util::logging;
//!
//! logging::init_from_env();
//!
//! use tracing::{info, warn};
//! info!("Application started");
//! warn!(stage = "builder", "Cache miss");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "STAGEBOX_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "STAGEBOX_LOG_JSON";

static INIT: Once = Once::new();

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for stagebox's own events
    pub level: Level,

    /// One JSON object per event instead of pretty text
    pub use_json: bool,

    /// Include the module target (e.g., stagebox::docker) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level and format from the command line flags, falling back to the environment.
    ///
    /// An explicit `--log-level` wins over `-v`/`-q`, which win over
    /// `STAGEBOX_LOG_LEVEL`.
    pub fn from_flags(log_level: Option<&str>, verbose: bool, quiet: bool) -> Self {
        let level = if let Some(level) = log_level {
            parse_level(level)
        } else if verbose {
            Level::DEBUG
        } else if quiet {
            Level::ERROR
        } else {
            env::var(LOG_LEVEL_ENV)
                .map(|v| parse_level(&v))
                .unwrap_or(Level::INFO)
        };

        Self {
            level,
            use_json: json_from_env(),
            include_location: level == Level::TRACE,
            ..Default::default()
        }
    }
}

/// Parses a log level, defaulting to INFO on anything unrecognized
///
/// ```
/// use stagebox::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Builds the event filter: stagebox at `level`, noisy transport crates at warn
/// unless `RUST_LOG` says otherwise.
pub fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("stagebox={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    if env::var("RUST_LOG").is_err() {
        for quiet in ["hyper=warn", "hyper_util=warn", "h2=warn", "bollard=warn"] {
            if let Ok(directive) = quiet.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `STAGEBOX_LOG_LEVEL` and `STAGEBOX_LOG_JSON`
pub fn init_from_env() {
    init_logging(LoggingConfig::from_flags(None, false, false));
}

fn json_from_env() -> bool {
    env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}
