//! Tracing setup for the command-line tool.
//!
//! Every run writes to a daily-rotated log file through a non-blocking
//! writer. `--verbose` adds a stderr layer on top; `--quiet` keeps stderr
//! free of log output entirely.

use camino::Utf8PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::args::GlobalArgs;

const LOG_FILE: &str = "gantry.log";

/// Initialize the tracing subscriber.
///
/// Sets up:
/// - File layer: writes `gantry.log` into `--log-dir` (or the temp directory) with daily rotation
/// - Stderr layer: only with `--verbose`, DEBUG for `-v` and TRACE for `-vv`
/// - `EnvFilter`: respects `RUST_LOG` env var, defaults to "info"
///
/// Returns a `WorkerGuard` that must be kept alive for the file logging to work.
pub fn init_tracing(args: &GlobalArgs) -> WorkerGuard {
    let dir = args
        .log_dir
        .clone()
        .or_else(|| Utf8PathBuf::from_path_buf(std::env::temp_dir()).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let stderr_layer = stderr_level(args).map(|level| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(level)
    });

    Registry::default().with(file_layer).with(stderr_layer).init();

    guard
}

fn stderr_level(args: &GlobalArgs) -> Option<LevelFilter> {
    if args.quiet {
        return None;
    }
    match args.verbose {
        0 => None,
        1 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(quiet: bool, verbose: u8) -> GlobalArgs {
        GlobalArgs {
            quiet,
            verbose,
            log_dir: None,
        }
    }

    #[test]
    fn stderr_follows_verbosity() {
        assert_eq!(stderr_level(&args(false, 0)), None);
        assert_eq!(stderr_level(&args(false, 1)), Some(LevelFilter::DEBUG));
        assert_eq!(stderr_level(&args(false, 3)), Some(LevelFilter::TRACE));
        assert_eq!(stderr_level(&args(true, 0)), None);
    }
}
