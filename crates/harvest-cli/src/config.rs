//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harvest_core::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use harvest_hh::config::{
    DEFAULT_CATEGORY, DEFAULT_END_ID, DEFAULT_ROLES_URL, DEFAULT_START_ID, DEFAULT_TOKEN_URL,
    DEFAULT_VACANCIES_URL,
};
use harvest_hh::engine::DEFAULT_WORKERS;
use serde::Deserialize;

/// Global configuration for harvest
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub fetch: FetchConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub vacancies_url: String,
    pub roles_url: String,
    pub token_url: String,
    /// The API rejects requests without a descriptive User-Agent
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            vacancies_url: DEFAULT_VACANCIES_URL.to_string(),
            roles_url: DEFAULT_ROLES_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub client_id: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub client_secret: Option<String>,
    pub token_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: std::env::var("CLIENT_ID").ok(),
            client_secret: std::env::var("CLIENT_SECRET").ok(),
            token_file: PathBuf::from("token.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub start_id: u64,
    pub end_id: u64,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub category: String,
    pub year: i32,
    pub checkpoint_file: PathBuf,
    /// Defaults to `vacancies_{year}.jsonl`
    pub output_file: Option<PathBuf>,
    pub flush_every: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            start_id: DEFAULT_START_ID,
            end_id: DEFAULT_END_ID,
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            category: DEFAULT_CATEGORY.to_string(),
            year: 2024,
            checkpoint_file: PathBuf::from("processed_vacancy_ids.json"),
            output_file: None,
            flush_every: 1,
        }
    }
}

impl FetchConfig {
    pub fn output_file(&self, year: i32) -> PathBuf {
        self.output_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("vacancies_{year}.jsonl")))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Seconds
    pub connect_timeout: u64,
    /// Seconds, whole request including body
    pub request_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            request_timeout: 60,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./harvest.toml (current directory)
    /// 2. ~/.config/harvest/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("harvest.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "harvest") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn endpoints(&self) -> harvest_hh::Endpoints {
        harvest_hh::Endpoints {
            vacancies_url: self.api.vacancies_url.clone(),
            roles_url: self.api.roles_url.clone(),
            token_url: self.api.token_url.clone(),
            client_id: self.auth.client_id.clone().unwrap_or_default(),
            client_secret: self.auth.client_secret.clone().unwrap_or_default(),
        }
    }

    pub fn http_config(&self) -> harvest_core::HttpConfig {
        let mut http = harvest_core::HttpConfig {
            connect_timeout: std::time::Duration::from_secs(self.http.connect_timeout),
            request_timeout: std::time::Duration::from_secs(self.http.request_timeout),
            ..Default::default()
        };
        if let Some(agent) = &self.api.user_agent {
            http.user_agent = agent.clone();
        }
        http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.start_id, 90_000_000);
        assert_eq!(config.fetch.end_id, 120_000_000);
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.retry_delay_ms, 2000);
        assert_eq!(config.fetch.category, "11");
        assert_eq!(
            config.fetch.output_file(2024),
            PathBuf::from("vacancies_2024.jsonl")
        );
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("HARVEST_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${HARVEST_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("HARVEST_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[api]
user_agent = "harvest-test/1.0 (ops@example.com)"

[auth]
client_id = "abc"
token_file = "/var/lib/harvest/token.json"

[fetch]
start_id = 100
end_id = 200
workers = 4
year = 2023
flush_every = 50

[http]
request_timeout = 15
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.client_id.as_deref(), Some("abc"));
        assert_eq!(
            config.auth.token_file,
            PathBuf::from("/var/lib/harvest/token.json")
        );
        assert_eq!(config.fetch.start_id, 100);
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.fetch.flush_every, 50);
        // Untouched fields keep their defaults
        assert_eq!(config.fetch.category, "11");
        assert_eq!(config.http.connect_timeout, 30);

        let http = config.http_config();
        assert_eq!(http.request_timeout, std::time::Duration::from_secs(15));
        assert!(http.user_agent.starts_with("harvest-test"));
    }

    #[test]
    fn from_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[fetch\nworkers = ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }
}
