use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::schedule::{Schedule, DEFAULT_SCHEDULE};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub feeds: FeedsConfig,
    pub advanced: AdvancedConfig,
    pub schedules: Vec<ScheduleConfig>,
    /// Owners whose sources may send cookies.
    pub cookie_allowlist: Vec<String>,
    pub delivery: DeliveryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub refresh_interval_minutes: u64,
    /// Consecutive failures before a target is disabled. `0` turns failure
    /// accounting off.
    pub fail_limit: u32,
    pub warn_fraction: f64,
    pub notify_fail: bool,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorMethod {
    #[default]
    Sequential,
    Isolated,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub batch_size: usize,
    pub processor_method: ProcessorMethod,
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub name: String,
    pub refresh_interval_minutes: Option<u64>,
    pub keywords: Vec<String>,
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Distinct articles allowed per medium inside `rate_limit_window_seconds`.
    /// `None` disables the ceiling.
    pub rate_limit_max: Option<u64>,
    pub rate_limit_window_seconds: u64,
    /// Days delivery records are kept. `0` keeps them forever.
    pub retention_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub show_feed_errors: bool,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 15,
            fail_limit: 18,
            warn_fraction: 0.75,
            notify_fail: true,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            batch_size: 400,
            processor_method: ProcessorMethod::Sequential,
            batch_delay_ms: 200,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: None,
            rate_limit_window_seconds: 60,
            retention_days: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            show_feed_errors: true,
        }
    }
}

impl FeedsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.max(1) * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl DeliveryConfig {
    /// How long delivery records must be kept, never shorter than the rate
    /// limit window. `None` when retention is off.
    pub fn retention(&self) -> Option<Duration> {
        if self.retention_days == 0 {
            return None;
        }
        let days = Duration::from_secs(self.retention_days * 24 * 60 * 60);
        Some(days.max(Duration::from_secs(self.rate_limit_window_seconds)))
    }
}

impl AdvancedConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl RelayConfig {
    /// `<config dir>/feedrelay/config.json`
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join("feedrelay");
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir.join("config.json"))
    }

    /// Loads the configuration from the default location, writing the
    /// defaults there when no file exists yet.
    pub fn load() -> Self {
        match Self::config_file_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!(error = %e, "no configuration location, using defaults");
                Self::default()
            }
        }
    }

    /// Reads `path`. A missing file is created with the defaults; an
    /// unreadable or invalid one is left untouched and the defaults are used.
    pub fn load_from(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let default_config = Self::default();
                if let Err(save_err) = default_config.save_to(path) {
                    warn!(error = %save_err, "unable to save default configuration");
                }
                default_config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "unable to load configuration, using defaults without overwriting it"
                );
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.advanced.batch_size == 0 {
            return Err(ConfigError::Invalid("advanced.batch_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.feeds.warn_fraction) {
            return Err(ConfigError::Invalid(
                "feeds.warn_fraction must be within 0.0..=1.0".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for schedule in &self.schedules {
            if schedule.name.trim().is_empty() {
                return Err(ConfigError::Invalid("schedule without a name".into()));
            }
            if !names.insert(schedule.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate schedule name {}",
                    schedule.name
                )));
            }
        }
        Ok(())
    }

    /// All schedules, with a `default` schedule added when none is configured.
    pub fn schedules(&self) -> Vec<Schedule> {
        let mut schedules: Vec<Schedule> = self
            .schedules
            .iter()
            .map(|cfg| Schedule {
                name: cfg.name.clone(),
                refresh_interval: cfg
                    .refresh_interval_minutes
                    .map(|m| Duration::from_secs(m.max(1) * 60))
                    .unwrap_or_else(|| self.feeds.refresh_interval()),
                keywords: cfg.keywords.clone(),
                source_ids: cfg.source_ids.clone(),
            })
            .collect();
        if !schedules.iter().any(|s| s.name == DEFAULT_SCHEDULE) {
            schedules.push(Schedule::default_with_interval(self.feeds.refresh_interval()));
        }
        schedules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: RelayConfig =
            serde_json::from_str(r#"{"advanced":{"processor_method":"parallel"}}"#).unwrap();
        assert_eq!(cfg.advanced.processor_method, ProcessorMethod::Parallel);
        assert_eq!(cfg.advanced.batch_size, 400);
        assert_eq!(cfg.feeds.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_schedule_is_always_present() {
        let mut cfg = RelayConfig::default();
        cfg.schedules.push(ScheduleConfig {
            name: "news".into(),
            refresh_interval_minutes: Some(4),
            keywords: vec!["york".into()],
            source_ids: vec![],
        });
        let schedules = cfg.schedules();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].refresh_interval, Duration::from_secs(240));
        assert!(schedules.iter().any(|s| s.is_default()));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = RelayConfig::default();
        cfg.advanced.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "feedrelay_config_{tag}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = temp_dir("missing");
        let path = dir.join("config.json");

        let cfg = RelayConfig::load_from(&path);
        assert_eq!(cfg.advanced.batch_size, 400);
        assert!(RelayConfig::from_file(&path).is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_file_is_not_overwritten() {
        let dir = temp_dir("invalid");
        let path = dir.join("config.json");
        let original = r#"{"feeds":{"warn_fraction":1.5},"schedules":[{"name":"news","keywords":["york"]}]}"#;
        std::fs::write(&path, original).unwrap();

        let cfg = RelayConfig::load_from(&path);
        assert!(cfg.schedules.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);

        std::fs::write(&path, "{ not json").unwrap();
        let _ = RelayConfig::load_from(&path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
