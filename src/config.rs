//! Configuration loader and validator for the channel posting bot.
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub session: Session,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Offset of the admin's local clock from UTC. Calendar days and picked
    /// hours are interpreted in this offset.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    pub admin_user_id: i64,
}

/// Delivery poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scheduler {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_true")]
    pub fail_fast_on_permanent: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            max_attempts: default_max_attempts(),
            fail_fast_on_permanent: true,
        }
    }
}

/// Draft session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_attempts() -> i64 {
    3
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/postbot.db", self.app.data_dir))
    }

    /// The admin's local offset. Validation guarantees it is in range.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.app.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_interval_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(ConfigError::Invalid(
            "app.utc_offset_minutes must be within (-1440, 1440)",
        ));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.admin_user_id <= 0 {
        return Err(ConfigError::Invalid("telegram.admin_user_id must be > 0"));
    }

    if cfg.scheduler.poll_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.poll_interval_seconds must be > 0",
        ));
    }
    if cfg.scheduler.max_attempts < 1 {
        return Err(ConfigError::Invalid("scheduler.max_attempts must be >= 1"));
    }

    if cfg.session.ttl_seconds == 0 {
        return Err(ConfigError::Invalid("session.ttl_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML document shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  utc_offset_minutes: 180

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admin_user_id: 123456789

scheduler:
  poll_interval_seconds: 60
  max_attempts: 3
  fail_fast_on_permanent: true

session:
  ttl_seconds: 3600
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.local_offset().local_minus_utc(), 180 * 60);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let yaml = r#"app:
  data_dir: "./data"
telegram:
  bot_token: "t"
  admin_user_id: 1
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.scheduler, Scheduler::default());
        assert_eq!(cfg.scheduler.max_attempts, 3);
        assert_eq!(cfg.session.ttl_seconds, 3600);
        assert_eq!(cfg.app.utc_offset_minutes, 0);
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_scheduler_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scheduler.poll_interval_seconds = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_seconds")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scheduler.max_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.utc_offset_minutes = 24 * 60;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.admin_user_id, 123456789);
    }
}
