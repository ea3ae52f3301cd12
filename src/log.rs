//! Initialisation of the program logger.
//!
//! Messages are written to the terminal (coloured when it supports it) and, when an output folder
//! is known, to plain-text log files. The allocation engine itself only uses the `log` facade.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the FAIR_SHARES_LOG_LEVEL
/// environment variable or the settings.toml file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable which overrides the log level
const LOG_LEVEL_ENV_VAR: &str = "FAIR_SHARES_LOG_LEVEL";

/// Log file for messages about the ordinary progress of an allocation
const LOG_INFO_FILE_NAME: &str = "fair_shares_info.log";

/// Log file for warnings (e.g. approximated targets) and errors
const LOG_ERROR_FILE_NAME: &str = "fair_shares_error.log";

/// Messages from other crates are only shown at this level or above
const DEPENDENCY_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Initialise the program logger using the `fern` logging library with colourised output.
///
/// The user can specify their preferred logging level via the `settings.toml` file (defaulting to
/// `info` if not present) or with the `FAIR_SHARES_LOG_LEVEL` environment variable. If both are
/// provided, the environment variable takes precedence.
///
/// Possible log level options are `off`, `error`, `warn`, `info`, `debug` and `trace`. The
/// `debug` level reports the progress of the convergence speed search.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level specified in `settings.toml`
/// * `log_file_path`: The location to save log files (if Some, log files will be created)
pub fn init(log_level_from_settings: Option<&str>, log_file_path: Option<&Path>) -> Result<()> {
    if is_logger_initialised() {
        bail!("Logger already initialised");
    }

    let log_level = match env::var(LOG_LEVEL_ENV_VAR) {
        Ok(level) => parse_log_level(&level)
            .with_context(|| format!("Invalid value for {LOG_LEVEL_ENV_VAR}"))?,
        Err(_) => parse_log_level(log_level_from_settings.unwrap_or(DEFAULT_LOG_LEVEL))?,
    };

    // Log files record info messages even when the terminal is quieter
    let max_level = if log_file_path.is_some() {
        log_level.max(LevelFilter::Info)
    } else {
        log_level
    };
    let mut dispatch = Dispatch::new()
        .level(max_level.min(DEPENDENCY_LOG_LEVEL))
        .level_for(env!("CARGO_CRATE_NAME"), max_level)
        .chain(terminal_dispatch(log_level));
    if let Some(log_file_path) = log_file_path {
        dispatch = dispatch.chain(file_dispatch(log_file_path, log_level)?);
    }

    dispatch.apply().context("Logger already initialised")?;
    LOGGER_INIT.get_or_init(|| ());

    Ok(())
}

/// Convert a log level name (case-insensitive) to a [`LevelFilter`]
fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    let filter = match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    };

    Ok(filter)
}

/// Messages for the terminal: warnings and errors on stderr, everything else on stdout
fn terminal_dispatch(log_level: LevelFilter) -> Dispatch {
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_colour = std::io::stdout().is_terminal().then_some(colours);
    let stderr_colour = std::io::stderr().is_terminal().then_some(colours);

    Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .level(log_level)
                .format(move |out, message, record| {
                    write_log_coloured(out, message, record, stdout_colour.as_ref());
                })
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .level(log_level.min(LevelFilter::Warn))
                .format(move |out, message, record| {
                    write_log_coloured(out, message, record, stderr_colour.as_ref());
                })
                .chain(std::io::stderr()),
        )
}

/// Messages for the log files in `dir`. Warnings are always recorded in the error file.
fn file_dispatch(dir: &Path, log_level: LevelFilter) -> Result<Dispatch> {
    Ok(Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .level(log_level.max(LevelFilter::Info))
                .format(write_log_plain)
                .chain(create_log_file(&dir.join(LOG_INFO_FILE_NAME))?),
        )
        .chain(
            Dispatch::new()
                .level(LevelFilter::Warn)
                .format(write_log_plain)
                .chain(create_log_file(&dir.join(LOG_ERROR_FILE_NAME))?),
        ))
}

/// Create (or truncate) a log file
fn create_log_file(file_path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(file_path)
        .with_context(|| format!("Failed to create log file {}", file_path.display()))
}

/// Write a log message with a timestamp, level and the module it came from
fn write_log<T: Display>(out: FormatCallback, level: T, target: &str, message: &Arguments) {
    let timestamp = Local::now().format("%H:%M:%S");

    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}

/// Write to the log with no colours
fn write_log_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    write_log(out, record.level(), record.target(), message);
}

/// Write to the log, colouring the level if `colours` is provided
fn write_log_coloured(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    match colours {
        Some(colours) => write_log(out, colours.color(record.level()), record.target(), message),
        None => write_log_plain(out, message, record),
    }
}
