use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "REPLY_JOBS_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to the user's data directory.
    pub database: Option<PathBuf>,
    pub ai: AiConfig,
    pub pacing: PacingConfig,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub reply_delay_ms: u64,
    pub job_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: 5000,
            job_delay_ms: 2000,
        }
    }
}

impl PacingConfig {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }
}

impl Config {
    /// Reads the config file named by `REPLY_JOBS_CONFIG`, or
    /// `~/.config/reply-jobs/config.toml`. A missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => PathBuf::from(p),
            None => dirs::config_dir()
                .context("Cannot determine config directory")?
                .join("reply-jobs")
                .join("config.toml"),
        };

        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = Self::from_file(&path)?;
        tracing::info!("Config loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .context("Cannot determine data directory")?
                .join("reply-jobs")
                .join("reply-jobs.db")),
        }
    }

    /// Key from the `[ai]` section, falling back to `ANTHROPIC_API_KEY`.
    pub fn ai_api_key(&self) -> Option<String> {
        self.ai
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}
