//! Runtime configuration for the vacancy fetcher

use std::ops::Range;
use std::path::PathBuf;

use harvest_core::{CandidateId, RetryPolicy};

use crate::filter::DateWindow;

pub const DEFAULT_VACANCIES_URL: &str = "https://api.hh.ru/vacancies";
pub const DEFAULT_ROLES_URL: &str = "https://api.hh.ru/professional_roles";
pub const DEFAULT_TOKEN_URL: &str = "https://hh.ru/oauth/token";
pub const DEFAULT_CATEGORY: &str = "11";
pub const DEFAULT_START_ID: CandidateId = 90_000_000;
pub const DEFAULT_END_ID: CandidateId = 120_000_000;

/// API endpoints and client credentials
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Record endpoint; `GET {vacancies_url}/{id}`, also the search listing
    pub vacancies_url: String,
    pub roles_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            vacancies_url: DEFAULT_VACANCIES_URL.to_string(),
            roles_url: DEFAULT_ROLES_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

/// Everything the fetch engine needs for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Endpoints,
    pub token_file: PathBuf,
    pub range: Range<CandidateId>,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub category_id: String,
    pub window: DateWindow,
    pub checkpoint_file: PathBuf,
    pub output_file: PathBuf,
    pub flush_every: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.range.start < self.range.end,
            "Empty id range {}..{}",
            self.range.start,
            self.range.end
        );
        anyhow::ensure!(self.workers > 0, "workers must be at least 1");
        anyhow::ensure!(self.retry.max_retries > 0, "max_retries must be at least 1");
        anyhow::ensure!(
            self.window.from < self.window.to,
            "Empty date window {}",
            self.window
        );
        anyhow::ensure!(
            !self.endpoints.client_id.is_empty() && !self.endpoints.client_secret.is_empty(),
            "CLIENT_ID and CLIENT_SECRET must be set (config [auth] or environment)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_WORKERS;

    fn config() -> Config {
        Config {
            endpoints: Endpoints {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                ..Default::default()
            },
            token_file: PathBuf::from("token.json"),
            range: DEFAULT_START_ID..DEFAULT_END_ID,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            category_id: DEFAULT_CATEGORY.to_string(),
            window: DateWindow::year(2024).unwrap(),
            checkpoint_file: PathBuf::from("processed_vacancy_ids.json"),
            output_file: PathBuf::from("vacancies_2024.jsonl"),
            flush_every: 1,
        }
    }

    #[test]
    fn defaults_are_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_empty_range() {
        let mut c = config();
        c.range = 10..10;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut c = config();
        c.endpoints.client_secret.clear();
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("CLIENT_SECRET"));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut c = config();
        c.workers = 0;
        assert!(c.validate().is_err());
    }
}
