//! 日志目录维护: 删除过期日志, 压缩历史日志.

use super::LoggingConfig;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一次维护的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// 删除的过期文件数
    pub removed: usize,
    /// 新压缩的历史文件数
    pub compressed: usize,
}

/// 维护日志目录
///
/// 只处理文件名符合 `<prefix>.<YYYY-MM-DD>.log[.gz]` 的文件, 今天的日志保持不动.
pub fn run_maintenance(config: &LoggingConfig) -> Result<MaintenanceReport> {
    run_maintenance_at(config, Local::now().date_naive())
}

fn run_maintenance_at(config: &LoggingConfig, today: NaiveDate) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();
    let directory = config.directory.as_path();
    if !directory.exists() {
        return Ok(report);
    }
    let cutoff = today - ChronoDuration::days(config.retention_days);

    let entries = fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败, path={}", directory.display()))?;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((date, compressed)) = parse_log_name(&file_name, &config.file_prefix) else {
            continue;
        };
        let path = entry.path();

        if date < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(err) => warn!("删除过期日志失败, path={}: {}", path.display(), err),
            }
            continue;
        }
        if config.compress_history && !compressed && date < today {
            match compress_to_gz(&path) {
                Ok(true) => report.compressed += 1,
                Ok(false) => {}
                Err(err) => warn!("压缩日志失败, path={}: {}", path.display(), err),
            }
        }
    }
    Ok(report)
}

/// 把日志压缩为同名 `.gz` 并删除原文件; `.gz` 已存在时什么也不做
fn compress_to_gz(path: &Path) -> Result<bool> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(false);
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(true)
}

/// 解析日志文件名, 返回日期和是否已压缩
fn parse_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date_part, compressed) = match rest.strip_suffix(".log.gz") {
        Some(d) => (d, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::log_path;
    use std::io::Read;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            directory: dir.path().to_path_buf(),
            file_prefix: "lao".to_string(),
            retention_days: 7,
            compress_history: true,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        match NaiveDate::from_ymd_opt(y, m, d) {
            Some(date) => date,
            None => panic!("无效日期"),
        }
    }

    #[test]
    fn test_解析日志文件名() {
        assert_eq!(
            parse_log_name("lao.2026-02-06.log", "lao"),
            Some((day(2026, 2, 6), false))
        );
        assert_eq!(
            parse_log_name("lao.2026-02-06.log.gz", "lao"),
            Some((day(2026, 2, 6), true))
        );
        assert_eq!(parse_log_name("lao.log", "lao"), None);
        assert_eq!(parse_log_name("other.2026-02-06.log", "lao"), None);
        assert_eq!(parse_log_name("lao.2026-2-6.log", "lao"), None);
    }

    #[test]
    fn test_删除过期并压缩历史() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let today = day(2026, 3, 20);
        let old = log_path(dir.path(), "lao", day(2026, 3, 1));
        let yesterday = log_path(dir.path(), "lao", day(2026, 3, 19));
        let current = log_path(dir.path(), "lao", today);
        fs::write(&old, "旧日志").unwrap();
        fs::write(&yesterday, "昨天的日志").unwrap();
        fs::write(&current, "今天的日志").unwrap();
        fs::write(dir.path().join("notes.txt"), "无关文件").unwrap();

        let report = run_maintenance_at(&config, today).unwrap();
        assert_eq!(report, MaintenanceReport { removed: 1, compressed: 1 });
        assert!(!old.exists());
        assert!(!yesterday.exists());
        assert!(current.exists());
        assert!(dir.path().join("notes.txt").exists());

        let gz = File::open(format!("{}.gz", yesterday.display())).unwrap();
        let mut text = String::new();
        flate2::read::GzDecoder::new(gz).read_to_string(&mut text).unwrap();
        assert_eq!(text, "昨天的日志");
    }

    #[test]
    fn test_关闭压缩() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.compress_history = false;
        let yesterday = log_path(dir.path(), "lao", day(2026, 3, 19));
        fs::write(&yesterday, "x").unwrap();
        let report = run_maintenance_at(&config, day(2026, 3, 20)).unwrap();
        assert_eq!(report, MaintenanceReport::default());
        assert!(yesterday.exists());
    }

    #[test]
    fn test_目录不存在() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.directory = dir.path().join("missing");
        assert_eq!(run_maintenance(&config).unwrap(), MaintenanceReport::default());
    }
}
