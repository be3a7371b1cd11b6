//! Logging setup for hosts that embed the cache.
//!
//! The crate logs through the `log` facade only. A host that has no logger
//! of its own can call [`init_logging`] to install an `env_logger` backend
//! scoped to this crate's messages. Levels are chosen by (in priority order):
//!
//! 1. `RUST_LOG` environment variable (if set)
//! 2. `quiet` (errors only) or `verbose` (info/debug/trace)
//! 3. Default: warnings, so store trouble is visible but hits and misses are not
//!
//! # Example
//!
//! ```rust,no_run
//! use media_columns::logging::init_logging;
//!
//! // Show probe failures and cache misses
//! init_logging(2, false);
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Module path whose records the installed logger shows.
const CRATE_TARGET: &str = "media_columns";

/// Install an `env_logger` backend for this crate's messages.
///
/// Returns false if the process already has a logger; in that case the
/// existing one is left alone.
///
/// * `verbose` - 0 = warn, 1 = info, 2 = debug, 3+ = trace
/// * `quiet` - only errors (overridden by `RUST_LOG`)
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let use_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if use_env {
        builder.parse_default_env();
    } else {
        builder.filter_module(CRATE_TARGET, determine_level(verbose, quiet));
    }
    configure_format(&mut builder, verbose);

    match builder.try_init() {
        Ok(()) => {
            log::debug!("Logging initialized at level {}", current_level_name());
            true
        }
        Err(_) => false,
    }
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Timestamped lines; the module path is added once debug output is on.
fn configure_format(builder: &mut Builder, verbose: u8) {
    builder.format(move |buf, record| {
        let timestamp = buf.timestamp_millis();
        let level = record.level();
        let level_style = buf.default_level_style(level);

        if verbose >= 2 {
            writeln!(
                buf,
                "{} {level_style}{:<5}{level_style:#} [{}] {}",
                timestamp,
                level,
                record.module_path().unwrap_or(CRATE_TARGET),
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{} {level_style}{:<5}{level_style:#} {}",
                timestamp,
                level,
                record.args()
            )
        }
    });
}

/// Name of the maximum enabled level.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
