//! Configuration loader and validator for the publishing fleet.
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
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
    pub publish: Publish,
    pub otp: Otp,
    pub driver: Driver,
    /// Category names, one per managed account, in processing order.
    pub categories: Vec<String>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Per-category persistent browser profiles live under this.
    pub data_dir: String,
    /// Screenshot/HTML dumps on auth milestones and failures.
    pub debug_dir: String,
    /// When true, the first failed item aborts the rest of its category.
    #[serde(default)]
    pub abort_on_item_failure: bool,
}

/// Publish decision settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Publish {
    /// Items due within this many minutes of "now" are posted immediately.
    pub post_now_margin_minutes: u32,
    /// Target zone for schedule dialogs, minutes east of UTC (IST = 330).
    pub target_offset_minutes: i32,
}

/// One-time-passcode retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Otp {
    /// Git repository holding `<category>/otp.txt` files.
    pub repo_url: String,
    pub attempts: u32,
    pub wait_seconds: u64,
}

/// Browser automation service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Driver {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Wait after ordinary UI actions before the next observation.
    pub settle_ms: u64,
    /// Wait after login/submit clicks, which render slower.
    pub long_settle_ms: u64,
}

/// Credential triple for one category, resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl Config {
    /// Ensure required directories exist (creates data/debug dirs if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.debug_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Persistent browser profile directory for a category.
    pub fn profile_dir(&self, category: &str) -> PathBuf {
        Path::new(&self.app.data_dir).join(category).join("login_data")
    }

    /// Debug artifact directory for a category.
    pub fn debug_dir(&self, category: &str) -> PathBuf {
        Path::new(&self.app.debug_dir).join(category)
    }

    /// Scratch checkout directory for OTP fetches. Categories run
    /// sequentially, so one scratch dir is never shared by two attempts.
    pub fn otp_work_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("otp_scratch")
    }

    pub fn post_now_margin(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.publish.post_now_margin_minutes))
    }

    /// Target zone for schedule conversion. Offset is validated in `load`.
    pub fn target_zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.publish.target_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.driver.settle_ms)
    }

    pub fn long_settle(&self) -> Duration {
        Duration::from_millis(self.driver.long_settle_ms)
    }

    pub fn otp_wait(&self) -> Duration {
        Duration::from_secs(self.otp.wait_seconds)
    }
}

/// Resolve the credential triple for a category from `<NAME>_EMAIL`,
/// `<NAME>_USERNAME` and `<NAME>_PASSWORD`. Returns None when any member
/// is absent or empty; the caller skips the category.
pub fn resolve_credentials(category: &str) -> Option<Credentials> {
    let prefix = category.to_uppercase();
    let get = |suffix: &str| {
        std::env::var(format!("{prefix}_{suffix}"))
            .ok()
            .filter(|v| !v.trim().is_empty())
    };
    Some(Credentials {
        email: get("EMAIL")?,
        username: get("USERNAME")?,
        password: get("PASSWORD")?,
    })
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
    if cfg.app.debug_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.debug_dir must be non-empty"));
    }

    if cfg.publish.post_now_margin_minutes == 0 {
        return Err(ConfigError::Invalid(
            "publish.post_now_margin_minutes must be > 0",
        ));
    }
    if FixedOffset::east_opt(cfg.publish.target_offset_minutes * 60).is_none() {
        return Err(ConfigError::Invalid(
            "publish.target_offset_minutes must be a valid UTC offset",
        ));
    }

    if cfg.otp.repo_url.trim().is_empty() {
        return Err(ConfigError::Invalid("otp.repo_url must be non-empty"));
    }
    if cfg.otp.attempts == 0 {
        return Err(ConfigError::Invalid("otp.attempts must be > 0"));
    }

    if cfg.driver.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("driver.base_url must be non-empty"));
    }
    if cfg.driver.settle_ms == 0 || cfg.driver.long_settle_ms == 0 {
        return Err(ConfigError::Invalid("driver settle delays must be > 0"));
    }

    if cfg.categories.is_empty() {
        return Err(ConfigError::Invalid("categories must name at least one category"));
    }
    for name in &cfg.categories {
        // Names become env prefixes, paths and OTP repo paths.
        let ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !ok {
            return Err(ConfigError::Invalid(
                "categories must be lowercase ascii (a-z, 0-9, _)",
            ));
        }
    }

    Ok(())
}

/// Canonical example configuration, used by unit tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  debug_dir: "./debug"
  abort_on_item_failure: false

publish:
  post_now_margin_minutes: 5
  target_offset_minutes: 330

otp:
  repo_url: "https://example.com/fleet/login_otps"
  attempts: 3
  wait_seconds: 120

driver:
  base_url: "http://127.0.0.1:3000"
  settle_ms: 5000
  long_settle_ms: 7000

categories:
  - formula
  - tech
  - hollywood
  - movies
  - unews
  - news
"#
}
