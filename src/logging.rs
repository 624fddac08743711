//! Logging setup for the GPU fan curve daemon

use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOG_FILENAME: &str = "fan_speed.log";

/// Rotate the log file once it grows past this many bytes
pub const LOG_SIZE_LIMIT: u64 = 1024 * 1024;

/// Rotated files kept next to the live log
pub const LOG_BACKUP_COUNT: u32 = 2;

/// Map `-v` occurrences to a level filter
pub fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Parse a level name such as `info` or `DEBUG`
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

/// Setup logging to stderr and, when `log_dir` is given, to a size-rotated file in it
pub fn setup(level: LevelFilter, log_dir: Option<&Path>) -> Result<(), fern::InitError> {
    let mut dispatch = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILENAME);
        rotate(&path, LOG_SIZE_LIMIT, LOG_BACKUP_COUNT)?;
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn backup_path(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

/// Shift `path` to `path.1`, `path.1` to `path.2` and so on when it exceeds `limit` bytes
fn rotate(path: &Path, limit: u64, backups: u32) -> std::io::Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(()),
    };
    if size <= limit || backups == 0 {
        return Ok(());
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..backups).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(level_from_verbosity(0), LevelFilter::Warn);
        assert_eq!(level_from_verbosity(2), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(9), LevelFilter::Trace);
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("info"), Some(LevelFilter::Info));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_rotation_keeps_two_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILENAME);

        for round in 0..3 {
            fs::write(&path, format!("round {} {}", round, "x".repeat(32))).unwrap();
            rotate(&path, 16, 2).unwrap();
        }

        assert!(!path.exists());
        let newest = fs::read_to_string(backup_path(&path, 1)).unwrap();
        let older = fs::read_to_string(backup_path(&path, 2)).unwrap();
        assert!(newest.starts_with("round 2"));
        assert!(older.starts_with("round 1"));
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn test_small_file_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILENAME);
        fs::write(&path, "short").unwrap();

        rotate(&path, LOG_SIZE_LIMIT, LOG_BACKUP_COUNT).unwrap();
        assert!(path.exists());
        assert!(!backup_path(&path, 1).exists());
    }
}
