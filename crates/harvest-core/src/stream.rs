//! Shared HTTP client and runtime.
//!
//! Uses async reqwest internally on a shared tokio runtime, but presents a
//! sync interface so rayon workers can call it directly.

use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use crate::error::HttpError;
use crate::shutdown::Shutdown;

/// HTTP settings applied once at startup, before the first request.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline (send + body)
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install global HTTP settings. Only the first call has an effect.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::warn!("HTTP config already initialized, ignoring override");
    }
}

/// Current HTTP settings (defaults if never set)
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let config = http_config();
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Status code and body text of a completed exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-success response into an [`HttpError::Status`]
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Status error carrying the start of the body as message
    pub fn into_error(self) -> HttpError {
        HttpError::Status {
            status: self.status,
            message: truncate(&self.body, 200).to_string(),
        }
    }
}

/// Send a request on the shared runtime and read the full body.
///
/// Any status is returned as `Ok`; only transport failures are errors.
/// A forced shutdown abandons the call with [`HttpError::Aborted`].
pub fn execute(
    request: reqwest::RequestBuilder,
    shutdown: &Shutdown,
) -> Result<RawResponse, HttpError> {
    SHARED_RUNTIME.handle().block_on(async {
        let call = async {
            let response = request.send().await.map_err(HttpError::from_reqwest)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(HttpError::from_reqwest)?;
            Ok(RawResponse { status, body })
        };

        tokio::select! {
            biased;
            () = shutdown.forced() => Err(HttpError::Aborted),
            result = call => result,
        }
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn success_range() {
        assert!(response(200, "").is_success());
        assert!(response(204, "").is_success());
        assert!(!response(304, "").is_success());
        assert!(!response(404, "").is_success());
    }

    #[test]
    fn error_for_status_keeps_success() {
        let r = response(200, "{}").error_for_status().unwrap();
        assert_eq!(r.body, "{}");
    }

    #[test]
    fn error_for_status_maps_failure() {
        let err = response(400, "bad_grant").error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(format!("{err}"), "HTTP 400: bad_grant");
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let s = "ошибка";
        let t = truncate(s, 3);
        assert!(s.starts_with(t));
        assert!(t.len() <= 3);
    }

    #[test]
    fn forced_shutdown_aborts_pending_call() {
        let shutdown = Shutdown::new();
        shutdown.request();
        shutdown.request();
        // Unroutable address: the select must resolve through the forced branch
        let request = http_client().get("http://10.255.255.1:9/");
        let err = execute(request, &shutdown).unwrap_err();
        assert!(matches!(err, HttpError::Aborted));
    }
}
