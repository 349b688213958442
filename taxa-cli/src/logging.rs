//! Tracing setup: stderr always, plus an append-only log file for refreshes.
//!
//! The refresh log rotates by size into numbered generations next to it
//! (`taxa-refresh.log.1` is the newest); the oldest generation is dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use taxa_core::Settings;

/// Size at which the refresh log is rotated (5 MiB).
const ROTATE_AT_BYTES: u64 = 5 * 1024 * 1024;

/// Rotated generations kept beside the live log.
const KEEP_GENERATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    /// Explicit flags win over `RUST_LOG`; `RUST_LOG` wins over the default.
    fn filter(self) -> EnvFilter {
        match self {
            Verbosity::Verbose => EnvFilter::new("debug"),
            Verbosity::Quiet => EnvFilter::new("warn"),
            Verbosity::Normal => {
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
            }
        }
    }
}

/// Install the global subscriber. With `refresh_log`, the refresh log under
/// its `log_dir` is rotated if due and then appended to without ANSI colors.
pub fn init(verbosity: Verbosity, refresh_log: Option<&Settings>) -> Result<()> {
    let mut rotated = false;
    let file_layer = match refresh_log {
        Some(settings) => {
            fs::create_dir_all(&settings.log_dir).with_context(|| {
                format!("failed to create log directory {}", settings.log_dir.display())
            })?;
            let path = settings.log_file_path();
            rotated = rotate_refresh_log(settings, ROTATE_AT_BYTES)
                .with_context(|| format!("failed to rotate {}", path.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(verbosity.filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    if let (true, Some(settings)) = (rotated, refresh_log) {
        tracing::info!(
            backup = %settings.log_backup_path(1).display(),
            "refresh log rotated"
        );
    }
    Ok(())
}

/// Move the live refresh log to generation 1 once it holds `limit` bytes,
/// shifting older generations up by one. Returns whether it rotated.
fn rotate_refresh_log(settings: &Settings, limit: u64) -> io::Result<bool> {
    let live = settings.log_file_path();
    match fs::metadata(&live) {
        Ok(meta) if meta.len() >= limit => {}
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }

    ignore_missing(fs::remove_file(settings.log_backup_path(KEEP_GENERATIONS)))?;
    for generation in (1..KEEP_GENERATIONS).rev() {
        ignore_missing(fs::rename(
            settings.log_backup_path(generation),
            settings.log_backup_path(generation + 1),
        ))?;
    }
    fs::rename(&live, settings.log_backup_path(1))?;
    Ok(true)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIMIT: u64 = 1024;

    fn settings_with_log(tmp: &TempDir, bytes: usize) -> Settings {
        let settings = Settings::defaults_at(tmp.path());
        fs::create_dir_all(&settings.log_dir).unwrap();
        fs::write(settings.log_file_path(), vec![b'x'; bytes]).unwrap();
        settings
    }

    #[test]
    fn log_below_limit_stays_put() {
        let tmp = TempDir::new().unwrap();
        let settings = settings_with_log(&tmp, 10);
        assert!(!rotate_refresh_log(&settings, LIMIT).unwrap());
        assert!(settings.log_file_path().exists());
        assert!(!settings.log_backup_path(1).exists());
    }

    #[test]
    fn full_log_becomes_newest_generation() {
        let tmp = TempDir::new().unwrap();
        let settings = settings_with_log(&tmp, LIMIT as usize);
        fs::write(settings.log_backup_path(1), "older").unwrap();

        assert!(rotate_refresh_log(&settings, LIMIT).unwrap());
        assert!(!settings.log_file_path().exists());
        assert_eq!(fs::metadata(settings.log_backup_path(1)).unwrap().len(), LIMIT);
        assert_eq!(fs::read_to_string(settings.log_backup_path(2)).unwrap(), "older");
    }

    #[test]
    fn oldest_generation_falls_off() {
        let tmp = TempDir::new().unwrap();
        let settings = settings_with_log(&tmp, LIMIT as usize + 1);
        for generation in 1..=KEEP_GENERATIONS {
            fs::write(settings.log_backup_path(generation), format!("gen-{generation}")).unwrap();
        }

        assert!(rotate_refresh_log(&settings, LIMIT).unwrap());
        assert_eq!(
            fs::read_to_string(settings.log_backup_path(KEEP_GENERATIONS)).unwrap(),
            format!("gen-{}", KEEP_GENERATIONS - 1)
        );
        assert!(!settings.log_backup_path(KEEP_GENERATIONS + 1).exists());
    }

    #[test]
    fn missing_log_is_not_rotated() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::defaults_at(tmp.path());
        assert!(!rotate_refresh_log(&settings, LIMIT).unwrap());
    }

    #[test]
    fn verbose_wins_over_quiet() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }
}
