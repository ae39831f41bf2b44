//! Structured logging setup with tracing

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolling log files are named `<prefix>.<date>`
pub const LOG_FILE_PREFIX: &str = "dircache.log";

/// Initialize the logging system
pub fn init_logging() -> anyhow::Result<WorkerGuard> {
    let log_dir = super::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(debug_assertions)]
    {
        // Development: pretty console output + file
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init()?;
    }

    #[cfg(not(debug_assertions))]
    {
        // Release: JSON file only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init()?;
    }

    tracing::info!("Logging initialized in {:?}", log_dir);
    Ok(guard)
}

/// Clean up log files older than specified days
pub fn cleanup_old_logs(days: u32) -> anyhow::Result<usize> {
    let log_dir = super::log_dir();
    if !log_dir.exists() {
        return Ok(0);
    }
    cleanup_logs_in(&log_dir, days)
}

/// Delete rolled log files in `dir` last modified more than `days` ago
pub fn cleanup_logs_in(dir: &Path, days: u32) -> anyhow::Result<usize> {
    let threshold = SystemTime::now() - Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let mut deleted = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        if modified.is_ok_and(|m| m < threshold) && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
            tracing::debug!("Deleted old log: {:?}", path);
        }
    }

    tracing::info!("Cleaned up {} old log files", deleted);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_only_touches_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dircache.log.2026-01-01"), b"{}").unwrap();
        std::fs::write(dir.path().join("dircache.log.2026-01-02"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        // Nothing is a day old yet
        assert_eq!(cleanup_logs_in(dir.path(), 1).unwrap(), 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_logs_in(dir.path(), 0).unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }
}
