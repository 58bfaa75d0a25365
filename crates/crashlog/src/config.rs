use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_LINES: usize = 10_000;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_TICKS_PER_PASS: u32 = 3_600;

/// Truncation policy. The defaults keep roughly the last 10k lines, checked
/// once an hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub max_lines: usize,
    /// Wake-up interval of the truncation thread.
    pub tick_ms: u64,
    /// Wake-ups between truncation passes.
    pub ticks_per_pass: u32,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            tick_ms: DEFAULT_TICK_MS,
            ticks_per_pass: DEFAULT_TICKS_PER_PASS,
        }
    }
}

impl LoggerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn ticks_per_pass(&self) -> u32 {
        self.ticks_per_pass.max(1)
    }

    /// Missing file means defaults; a present but unreadable file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path)
            .with_context(|| format!("read config failed: {}", path.display()))?;
        let v: Self = serde_json::from_str(&s).context("parse logger config failed")?;
        Ok(v)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir failed: {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(self).context("serialize logger config failed")?;
        fs::write(path, s).with_context(|| format!("write config failed: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let td = tempfile::tempdir().unwrap();
        let cfg = LoggerConfig::load(&td.path().join("crashlog.json")).unwrap();
        assert_eq!(cfg, LoggerConfig::default());
        assert_eq!(cfg.tick(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("crashlog.json");
        fs::write(&p, r#"{"max_lines": 500}"#).unwrap();
        let cfg = LoggerConfig::load(&p).unwrap();
        assert_eq!(cfg.max_lines, 500);
        assert_eq!(cfg.ticks_per_pass, DEFAULT_TICKS_PER_PASS);
    }

    #[test]
    fn save_then_load() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("nested").join("crashlog.json");
        let cfg = LoggerConfig {
            max_lines: 42,
            tick_ms: 5,
            ticks_per_pass: 2,
        };
        cfg.save(&p).unwrap();
        assert_eq!(LoggerConfig::load(&p).unwrap(), cfg);
    }

    #[test]
    fn save_reports_an_unusable_parent() {
        let td = tempfile::tempdir().unwrap();
        let blocker = td.path().join("blocker");
        fs::write(&blocker, "file, not a dir").unwrap();
        let err = LoggerConfig::default()
            .save(&blocker.join("crashlog.json"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("create config dir failed"), "{err:#}");
    }

    #[test]
    fn garbage_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("crashlog.json");
        fs::write(&p, "not json").unwrap();
        assert!(LoggerConfig::load(&p).is_err());
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let cfg = LoggerConfig {
            max_lines: 1,
            tick_ms: 0,
            ticks_per_pass: 0,
        };
        assert_eq!(cfg.tick(), Duration::from_millis(1));
        assert_eq!(cfg.ticks_per_pass(), 1);
    }
}
