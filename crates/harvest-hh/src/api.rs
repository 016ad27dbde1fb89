//! Vacancy API client with per-response retry classification

use harvest_core::stream::{self, RawResponse, http_client};
use harvest_core::{CandidateId, HttpError, RetryPolicy, Shutdown};
use serde_json::Value;

use crate::auth::{AuthError, TokenManager};

/// One GET for one record. Implemented over HTTP by [`HhApi`].
pub trait RecordApi: Send + Sync {
    /// Any status is `Ok`; `Err` means the exchange itself failed.
    fn get_record(&self, id: CandidateId, access_token: &str) -> Result<RawResponse, HttpError>;
}

impl<T: RecordApi + ?Sized> RecordApi for std::sync::Arc<T> {
    fn get_record(&self, id: CandidateId, access_token: &str) -> Result<RawResponse, HttpError> {
        (**self).get_record(id, access_token)
    }
}

/// `GET {base_url}/{id}` with a bearer token
#[derive(Debug, Clone)]
pub struct HhApi {
    base_url: String,
    shutdown: Shutdown,
}

impl HhApi {
    pub fn new(base_url: &str, shutdown: Shutdown) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            shutdown,
        }
    }
}

impl RecordApi for HhApi {
    fn get_record(&self, id: CandidateId, access_token: &str) -> Result<RawResponse, HttpError> {
        let request = http_client()
            .get(format!("{}/{id}", self.base_url))
            .bearer_auth(access_token);
        stream::execute(request, &self.shutdown)
    }
}

/// Result of fetching one ID, before filtering
#[derive(Debug)]
pub enum FetchResult {
    Found(Value),
    NotFound,
    /// Every attempt failed; carries the last error
    Exhausted(HttpError),
    /// Shutdown observed; the ID was not settled
    Stopped,
}

/// Applies the retry policy around [`RecordApi`] calls.
///
/// | response          | action                                  |
/// |-------------------|-----------------------------------------|
/// | 2xx               | parse JSON body, done                   |
/// | 404               | `NotFound`, no retry                    |
/// | 429 / 403         | wait `2 * base_delay`, retry            |
/// | other / transport | wait `base_delay`, retry                |
///
/// `max_retries` bounds the total number of calls.
pub struct RateLimitedClient<A> {
    api: A,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl<A: RecordApi> RateLimitedClient<A> {
    pub fn new(api: A, policy: RetryPolicy, shutdown: Shutdown) -> Self {
        Self {
            api,
            policy,
            shutdown,
        }
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Fetch one record. Only token failures are `Err`.
    pub fn fetch(&self, id: CandidateId, tokens: &TokenManager) -> Result<FetchResult, AuthError> {
        let mut attempt = 0u32;
        loop {
            if self.shutdown.is_requested() {
                return Ok(FetchResult::Stopped);
            }
            attempt += 1;

            let token = match tokens.ensure_valid() {
                Ok(token) => token,
                Err(AuthError::Interrupted) => return Ok(FetchResult::Stopped),
                Err(e) => return Err(e),
            };

            let err = match self.api.get_record(id, &token) {
                Ok(response) if response.is_success() => {
                    match serde_json::from_str(&response.body) {
                        Ok(record) => return Ok(FetchResult::Found(record)),
                        Err(e) => HttpError::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("invalid JSON body: {e}"),
                        )),
                    }
                }
                Ok(response) if response.status == 404 => return Ok(FetchResult::NotFound),
                Ok(response) => response.into_error(),
                Err(HttpError::Aborted) => return Ok(FetchResult::Stopped),
                Err(e) => e,
            };

            if attempt >= self.policy.max_retries {
                log::warn!("ID {id}: giving up after {attempt} attempts: {err}");
                return Ok(FetchResult::Exhausted(err));
            }

            let delay = self.policy.delay_for(&err);
            match err.status() {
                Some(429) => log::warn!("ID {id}: 429 Too Many Requests, waiting {delay:?}"),
                Some(403) => log::warn!("ID {id}: 403 Forbidden, waiting {delay:?}"),
                _ => log::warn!(
                    "ID {id}: {err}, retry {attempt}/{} in {delay:?}",
                    self.policy.max_retries
                ),
            }
            if !self.shutdown.sleep(delay) {
                return Ok(FetchResult::Stopped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, TokenEndpoint, TokenResponse, TokenStore};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Replays scripted statuses, then keeps repeating the last one
    struct Scripted {
        statuses: Mutex<Vec<u16>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(mut statuses: Vec<u16>) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RecordApi for &Scripted {
        fn get_record(&self, id: CandidateId, _token: &str) -> Result<RawResponse, HttpError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop().unwrap()
            } else {
                statuses[0]
            };
            Ok(RawResponse {
                status,
                body: format!(r#"{{"id":"{id}"}}"#),
            })
        }
    }

    struct NoRefresh;

    impl TokenEndpoint for NoRefresh {
        fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, AuthError> {
            Err(AuthError::RefreshFailed)
        }
    }

    fn tokens(dir: &TempDir) -> TokenManager {
        let store = TokenStore::new(dir.path().join("token.json"));
        store
            .save(&Credential {
                access_token: "token".to_string(),
                refresh_token: "refresh".to_string(),
                issued_at: chrono::Utc::now(),
                ttl_seconds: 3600,
            })
            .unwrap();
        TokenManager::new(store, Box::new(NoRefresh))
    }

    fn policy(ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(ms),
        }
    }

    #[test]
    fn success_returns_record() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![200]);
        let client = RateLimitedClient::new(&api, policy(1), Shutdown::new());
        let result = client.fetch(7, &tokens(&dir)).unwrap();
        assert!(matches!(result, FetchResult::Found(v) if v["id"] == "7"));
        assert_eq!(api.calls().len(), 1);
    }

    #[test]
    fn not_found_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![404]);
        let client = RateLimitedClient::new(&api, policy(1), Shutdown::new());
        assert!(matches!(
            client.fetch(1, &tokens(&dir)).unwrap(),
            FetchResult::NotFound
        ));
        assert_eq!(api.calls().len(), 1);
    }

    #[test]
    fn rate_limited_then_success_waits_double() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![429, 429, 429, 200]);
        let client = RateLimitedClient::new(&api, policy(20), Shutdown::new());
        let result = client.fetch(1, &tokens(&dir)).unwrap();
        assert!(matches!(result, FetchResult::Found(_)));

        let calls = api.calls();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(40));
        }
    }

    #[test]
    fn server_error_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![500]);
        let client = RateLimitedClient::new(&api, policy(1), Shutdown::new());
        let result = client.fetch(1, &tokens(&dir)).unwrap();
        assert!(matches!(result, FetchResult::Exhausted(e) if e.status() == Some(500)));
        assert_eq!(api.calls().len(), 5);
    }

    #[test]
    fn invalid_body_is_retried() {
        struct Garbage;
        impl RecordApi for Garbage {
            fn get_record(&self, _: CandidateId, _: &str) -> Result<RawResponse, HttpError> {
                Ok(RawResponse {
                    status: 200,
                    body: "<html>".to_string(),
                })
            }
        }
        let dir = TempDir::new().unwrap();
        let client = RateLimitedClient::new(Garbage, policy(1), Shutdown::new());
        assert!(matches!(
            client.fetch(1, &tokens(&dir)).unwrap(),
            FetchResult::Exhausted(HttpError::Io(_))
        ));
    }

    #[test]
    fn shutdown_before_call_issues_no_request() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![200]);
        let shutdown = Shutdown::new();
        shutdown.request();
        let client = RateLimitedClient::new(&api, policy(1), shutdown);
        assert!(matches!(
            client.fetch(1, &tokens(&dir)).unwrap(),
            FetchResult::Stopped
        ));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn shutdown_during_backoff_stops() {
        let dir = TempDir::new().unwrap();
        let api = Scripted::new(vec![503]);
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let client = RateLimitedClient::new(&api, policy(10_000), shutdown);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.request();
        });
        let start = Instant::now();
        let result = client.fetch(1, &tokens(&dir)).unwrap();
        handle.join().unwrap();

        assert!(matches!(result, FetchResult::Stopped));
        assert_eq!(api.calls().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn auth_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let manager = TokenManager::new(
            TokenStore::new(dir.path().join("missing.json")),
            Box::new(NoRefresh),
        );
        let api = Scripted::new(vec![200]);
        let client = RateLimitedClient::new(&api, policy(1), Shutdown::new());
        assert!(client.fetch(1, &manager).is_err());
        assert!(api.calls().is_empty());
    }
}
