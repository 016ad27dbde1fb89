//! OAuth access-token lifecycle shared by all workers.
//!
//! The credential file has the layout written by the interactive
//! authorization helper: `{access_token, refresh_token, timestamp, expires_in}`
//! with `timestamp` in unix seconds (integer or fractional).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use harvest_core::stream::{self, http_client};
use harvest_core::{HttpError, Shutdown, write_atomic};
use serde::{Deserialize, Serialize};

/// Tokens this close to expiry are treated as expired
pub const EXPIRY_MARGIN: TimeDelta = TimeDelta::seconds(60);

/// Access/refresh token pair with expiry bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

/// `None` if the lifetime does not fit in a timestamp
fn expiry(issued_at: DateTime<Utc>, ttl_seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(ttl_seconds).and_then(|ttl| issued_at.checked_add_signed(ttl))
}

impl Credential {
    pub fn issued_now(response: TokenResponse) -> Result<Self, AuthError> {
        let issued_at = Utc::now();
        if expiry(issued_at, response.expires_in).is_none() {
            return Err(AuthError::InvalidResponse(format!(
                "expires_in out of range: {}",
                response.expires_in
            )));
        }
        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            issued_at,
            ttl_seconds: response.expires_in,
        })
    }

    /// Out-of-range lifetimes count as expired on issue
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.issued_at, self.ttl_seconds).unwrap_or(self.issued_at)
    }

    /// Valid at `now` with [`EXPIRY_MARGIN`] to spare
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && expiry(self.issued_at, self.ttl_seconds)
                .and_then(|at| at.checked_sub_signed(EXPIRY_MARGIN))
                .is_some_and(|deadline| now < deadline)
    }
}

/// On-disk credential layout
#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    access_token: String,
    refresh_token: String,
    timestamp: f64,
    expires_in: i64,
}

impl From<&Credential> for CredentialFile {
    fn from(c: &Credential) -> Self {
        Self {
            access_token: c.access_token.clone(),
            refresh_token: c.refresh_token.clone(),
            timestamp: c.issued_at.timestamp_millis() as f64 / 1000.0,
            expires_in: c.ttl_seconds,
        }
    }
}

impl TryFrom<CredentialFile> for Credential {
    type Error = io::Error;

    fn try_from(f: CredentialFile) -> Result<Self, Self::Error> {
        let issued_at = DateTime::from_timestamp_millis((f.timestamp * 1000.0) as i64)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("credential timestamp out of range: {}", f.timestamp),
                )
            })?;
        if expiry(issued_at, f.expires_in).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("credential expires_in out of range: {}", f.expires_in),
            ));
        }
        Ok(Self {
            access_token: f.access_token,
            refresh_token: f.refresh_token,
            issued_at,
            ttl_seconds: f.expires_in,
        })
    }
}

/// Body of a successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug)]
pub enum AuthError {
    /// No credential file; run the interactive authorization first
    MissingCredential(PathBuf),
    /// Credential file unreadable or unwritable
    Store(io::Error),
    /// Token endpoint rejected the refresh or was unreachable
    Endpoint(HttpError),
    /// Token endpoint answered 2xx with an unusable body
    InvalidResponse(String),
    /// An earlier refresh failed; no further attempts are made
    RefreshFailed,
    /// Refresh abandoned by forced shutdown
    Interrupted,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential(p) => {
                write!(f, "no credential at {}, authorize first", p.display())
            }
            Self::Store(e) => write!(f, "credential store: {e}"),
            Self::Endpoint(e) => write!(f, "token refresh failed: {e}"),
            Self::InvalidResponse(msg) => write!(f, "invalid token response: {msg}"),
            Self::RefreshFailed => f.write_str("token refresh failed earlier in this run"),
            Self::Interrupted => f.write_str("token refresh interrupted by shutdown"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Endpoint(e) => Some(e),
            _ => None,
        }
    }
}

/// Credential file persistence
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` if the file does not exist
    pub fn load(&self) -> io::Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        let file: CredentialFile = serde_json::from_slice(&bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt credential {}: {e}", self.path.display()),
            )
        })?;
        Credential::try_from(file).map(Some)
    }

    /// Replace the stored credential atomically
    pub fn save(&self, credential: &Credential) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(&CredentialFile::from(credential))
            .map_err(io::Error::other)?;
        write_atomic(&self.path, &json)
    }
}

/// Exchanges a refresh token for a new credential
pub trait TokenEndpoint: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

/// OAuth token endpoint (`grant_type=refresh_token`)
#[derive(Debug, Clone)]
pub struct HhTokenEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub shutdown: Shutdown,
}

impl TokenEndpoint for HhTokenEndpoint {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let request = http_client().post(&self.token_url).form(&form);
        let response = stream::execute(request, &self.shutdown)
            .and_then(|r| r.error_for_status())
            .map_err(|e| match e {
                HttpError::Aborted => AuthError::Interrupted,
                e => AuthError::Endpoint(e),
            })?;
        serde_json::from_str(&response.body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

/// Hands out valid access tokens to concurrent workers.
///
/// Valid cached tokens are served under a shared read lock. Refresh is
/// single-flight: callers queue on `refresh_lock` and re-check the cache
/// once they hold it, so one expiry causes exactly one endpoint call.
pub struct TokenManager {
    store: TokenStore,
    endpoint: Box<dyn TokenEndpoint>,
    cache: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
    failed: AtomicBool,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(store: TokenStore, endpoint: Box<dyn TokenEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            failed: AtomicBool::new(false),
        }
    }

    /// Return a currently valid access token, refreshing first if needed.
    pub fn ensure_valid(&self) -> Result<String, AuthError> {
        if let Some(token) = self.cached_valid_token() {
            return Ok(token);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(AuthError::RefreshFailed);
        }

        let _guard = self.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
        // Another worker may have refreshed (or failed) while we waited
        if self.failed.load(Ordering::Acquire) {
            return Err(AuthError::RefreshFailed);
        }
        let current = self.current_locked()?;
        if current.is_valid_at(Utc::now()) {
            return Ok(current.access_token);
        }
        log::info!("Access token expired at {}, refreshing", current.expires_at());
        self.refresh_locked(&current.refresh_token)
    }

    /// Refresh regardless of expiry
    pub fn refresh_now(&self) -> Result<Credential, AuthError> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.current_locked()?;
        self.refresh_locked(&current.refresh_token)?;
        self.current_locked()
    }

    /// Credential currently in use, loading it from disk on first call
    pub fn status(&self) -> Result<Credential, AuthError> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.current_locked()
    }

    fn cached_valid_token(&self) -> Option<String> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|c| c.is_valid_at(Utc::now()))
            .map(|c| c.access_token.clone())
    }

    /// Caller must hold `refresh_lock`
    fn current_locked(&self) -> Result<Credential, AuthError> {
        if let Some(c) = self.cache.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(c);
        }
        let loaded = self
            .store
            .load()
            .map_err(AuthError::Store)?
            .ok_or_else(|| AuthError::MissingCredential(self.store.path().to_path_buf()))?;
        log::debug!("Loaded credential, expires at {}", loaded.expires_at());
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(loaded.clone());
        Ok(loaded)
    }

    /// Caller must hold `refresh_lock`
    fn refresh_locked(&self, refresh_token: &str) -> Result<String, AuthError> {
        let result = self.endpoint.refresh(refresh_token).and_then(|response| {
            let credential = Credential::issued_now(response)?;
            self.store.save(&credential).map_err(AuthError::Store)?;
            Ok(credential)
        });

        match result {
            Ok(credential) => {
                log::info!("Access token refreshed, valid until {}", credential.expires_at());
                let token = credential.access_token.clone();
                *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(credential);
                Ok(token)
            }
            Err(AuthError::Interrupted) => Err(AuthError::Interrupted),
            Err(e) => {
                log::error!("{e}");
                self.failed.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}
