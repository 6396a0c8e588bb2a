use eyre::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{self, GhdashError};
use crate::scheduler::{BUDGET_ENV_VAR, MAX_BUDGET, SchedulerConfig, parse_budget};

/// Environment variable that overrides `github.api_url`
pub const API_URL_ENV_VAR: &str = "GITHUB_API_URL";

const PUBLIC_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub github: GitHubConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Web URL; derived from `api_url` when unset
    pub base_url: Option<String>,
    /// Name of the environment variable holding the token
    pub token_env: String,
    pub timeout_ms: u64,
    pub per_page: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: PUBLIC_API_URL.to_string(),
            base_url: None,
            token_env: "GITHUB_TOKEN".to_string(),
            timeout_ms: 30000,
            per_page: 100,
        }
    }
}

impl GitHubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Web URL for links, explicit or derived from the API URL.
    pub fn web_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| derive_base_url(&self.api_url))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            github: GitHubConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply `MAX_REQUESTS_PER_MINUTE` and `GITHUB_API_URL` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(BUDGET_ENV_VAR) {
            self.scheduler.max_requests_per_minute = parse_budget(Some(&raw));
            log::debug!(
                "{} set, budget is {}",
                BUDGET_ENV_VAR,
                self.scheduler.max_requests_per_minute
            );
        }
        if let Some(url) = lookup(API_URL_ENV_VAR).filter(|u| !u.trim().is_empty()) {
            self.github.api_url = url.trim().to_string();
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        check_url("github.api_url", &self.github.api_url)?;
        if let Some(base) = &self.github.base_url {
            check_url("github.base_url", base)?;
        }
        let budget = self.scheduler.max_requests_per_minute;
        if !(1..=MAX_BUDGET).contains(&budget) {
            return Err(GhdashError::Config(format!(
                "scheduler.max_requests_per_minute must be between 1 and {}, got {}",
                MAX_BUDGET, budget
            )));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(GhdashError::Config("scheduler.max_attempts must be at least 1".to_string()));
        }
        if self.github.timeout_ms == 0 {
            return Err(GhdashError::Config("github.timeout_ms must be greater than 0".to_string()));
        }
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> error::Result<()> {
    let url = Url::parse(value).map_err(|e| GhdashError::Config(format!("{} '{}': {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(GhdashError::Config(format!(
            "{} '{}': unsupported scheme {}",
            field, value, other
        ))),
    }
}

/// Web URL for an API URL.
///
/// `https://api.github.com` maps to `https://github.com`; an enterprise
/// `https://host/api/v3` maps to `https://host`. Anything else is returned
/// without its trailing slash.
pub fn derive_base_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if let Some(host) = url.host_str().and_then(|h| h.strip_prefix("api.")).map(str::to_string) {
        if url.set_host(Some(&host)).is_ok() {
            url.set_path("");
        }
    } else if let Some(prefix) = url.path().strip_suffix("/api/v3").map(str::to_string) {
        url.set_path(&prefix);
    }

    url.as_str().trim_end_matches('/').to_string()
}
