//! Application configuration loaded from a TOML file.
//!
//! See `config/afx.example.toml` for a full example. Validation happens at
//! load time so every component can trust its settings.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings for the content generator collaborator.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    /// `disabled` or `openrouter`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for one generation call; overruns consume a regeneration
    /// attempt.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: default_base_url(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Settings for the QA engine and the daily review pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct QaConfig {
    /// Model-assisted checker: `disabled` or `openrouter`.
    #[serde(default = "default_provider")]
    pub checker: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    /// Failures beyond this many regeneration attempts ban the chunk.
    #[serde(default = "default_regeneration_cap")]
    pub regeneration_cap: i64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            checker: "disabled".to_string(),
            model: None,
            base_url: default_base_url(),
            timeout_secs: default_check_timeout_secs(),
            regeneration_cap: default_regeneration_cap(),
        }
    }
}

/// Settings for the daily QA scheduler.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Chunks are re-reviewed once their last review is older than this.
    #[serde(default = "default_review_interval_hours")]
    pub review_interval_hours: u64,
    /// Rows fetched per selection query while draining.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// How often the watch loop wakes to check whether work is due.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            review_interval_hours: default_review_interval_hours(),
            batch_size: default_batch_size(),
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    45
}
fn default_check_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_regeneration_cap() -> i64 {
    3
}
fn default_review_interval_hours() -> u64 {
    24
}
fn default_batch_size() -> i64 {
    50
}
fn default_tick_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.generator.provider.as_str() {
        "disabled" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled or openrouter.",
            other
        ),
    }
    if config.generator.provider == "openrouter" && config.generator.model.is_none() {
        anyhow::bail!("generator.model must be specified when provider is 'openrouter'");
    }
    if config.generator.timeout_secs == 0 {
        anyhow::bail!("generator.timeout_secs must be > 0");
    }

    match config.qa.checker.as_str() {
        "disabled" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown QA checker: '{}'. Must be disabled or openrouter.",
            other
        ),
    }
    if config.qa.checker == "openrouter" && config.qa.model.is_none() {
        anyhow::bail!("qa.model must be specified when checker is 'openrouter'");
    }
    if config.qa.regeneration_cap < 0 {
        anyhow::bail!("qa.regeneration_cap must be >= 0");
    }

    if config.scheduler.review_interval_hours == 0 {
        anyhow::bail!("scheduler.review_interval_hours must be >= 1");
    }
    if config.scheduler.batch_size < 1 {
        anyhow::bail!("scheduler.batch_size must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config("[db]\npath = \"/tmp/afx.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.generator.provider, "disabled");
        assert_eq!(cfg.qa.regeneration_cap, 3);
        assert_eq!(cfg.scheduler.review_interval_hours, 24);
    }

    #[test]
    fn openrouter_generator_requires_model() {
        let f = write_config(
            "[db]\npath = \"/tmp/afx.sqlite\"\n\n[generator]\nprovider = \"openrouter\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn unknown_checker_rejected() {
        let f = write_config(
            "[db]\npath = \"/tmp/afx.sqlite\"\n\n[qa]\nchecker = \"ouija\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
