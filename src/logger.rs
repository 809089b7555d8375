use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;

use crate::domain::rank::Rank;

// Define where to store logs
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "pull_map.log";

fn log_file_path(rank: Option<Rank>) -> String {
    match rank {
        // One file per rank.
        Some(rank) => format!("{}/rank-{}.log", LOG_DIR, rank),
        None => format!("{}/{}", LOG_DIR, LOG_FILE),
    }
}

/// Initializes the global logger.
///
/// This function should be called once at the very beginning of the
/// application's `main` function, as soon as the rank of the process is known.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Example: `RUST_LOG=debug pull-map local --size 4`
///
/// If `RUST_LOG` is not set, it defaults to `info`.
/// Logs will be written to `logs/rank-<r>.log` (or `logs/pull_map.log`) and the console.
pub fn init(rank: Option<Rank>) {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory at '{}': {}", LOG_DIR, e);
    }

    let log_file_path = log_file_path(rank);
    let prefix = rank.map(|r| format!("rank {} ", r)).unwrap_or_default();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new().level(log_level_filter).level_for("mio", LevelFilter::Warn).level_for("tokio_util", LevelFilter::Warn);

    let console_prefix = prefix.clone();
    let console_config = Dispatch::new()
        .format(move |out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {}{} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                console_prefix,
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let mut dispatch = base_config.chain(console_config);

    match fern::log_file(&log_file_path) {
        Ok(file) => {
            let file_config = Dispatch::new()
                .format(move |out, message, record| {
                    out.finish(format_args!(
                        "[{} {}{} {}] {}",
                        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        prefix,
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(file);
            dispatch = dispatch.chain(file_config);
        }
        Err(e) => eprintln!("Failed to open log file '{}': {}", log_file_path, e),
    }

    if let Err(e) = dispatch.apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
        return;
    }

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}
