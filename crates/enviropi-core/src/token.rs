//! Token lifecycle for the private telemetry API.
//!
//! ```text
//!   credentials ──POST token/request──▶ token ──PUT token/renew──▶ token
//!        ▲                                  │
//!        └──────── 401 from collector ──────┘  (force re-acquire)
//! ```
//!
//! The token body is opaque JSON; it is stored verbatim on disk so a restart
//! can renew it instead of requesting a fresh one.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{Value, json};
use thiserror::Error;

use crate::http::{HttpRequest, HttpTransport, Method, TransportError, join_url};

/// Renew when this long has passed since the last renewal attempt.
pub const DEFAULT_RENEWAL_PERIOD: Duration = Duration::from_secs(25);

// ---------------------------------------------------------------------------
// Credentials and token
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub raw: Value,
    pub acquired_at: Instant,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("token request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token response is not JSON: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The on-disk copy of the last token response.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.iot/token`, or `.iot/token` relative to the working directory
    /// when `HOME` is unset.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".iot")
            .join("token")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted token. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<Value>, TokenStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TokenStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| TokenStoreError::Json {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the persisted token with `raw_body`.
    pub fn save(&self, raw_body: &str) -> Result<(), TokenStoreError> {
        let io_err = |source| TokenStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(io_err)?;
        // `mode` only applies on creation; tighten a file left by older runs.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        file.write_all(raw_body.as_bytes()).map_err(io_err)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// What a call to [`TokenManager::ensure_valid`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureAction {
    /// Token present and inside the renewal period.
    Unchanged,
    /// A renewal exchange was attempted (it may have failed).
    Renewed,
    /// A fresh token was acquired from credentials.
    Acquired,
}

pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    credentials: Credentials,
    serial_number: String,
    store: Option<TokenStore>,
    renewal_period: Duration,
    token: Option<Token>,
    last_renewal: Option<Instant>,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        credentials: Credentials,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            credentials,
            serial_number: serial_number.into(),
            store: None,
            renewal_period: DEFAULT_RENEWAL_PERIOD,
            token: None,
            last_renewal: None,
        }
    }

    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_renewal_period(mut self, period: Duration) -> Self {
        self.renewal_period = period;
        self
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn invalidate(&mut self) {
        self.token = None;
        self.last_renewal = None;
    }

    /// Adopt a token persisted by an earlier run, if there is one.
    ///
    /// The loaded token has not been renewed by this process, so the next
    /// non-forced [`ensure_valid`](Self::ensure_valid) renews it.
    pub fn load_persisted(&mut self, now: Instant) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load() {
            Ok(Some(raw)) => {
                debug!("loaded token from {}", store.path().display());
                self.token = Some(Token {
                    raw,
                    acquired_at: now,
                });
                self.last_renewal = None;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("ignoring persisted token: {e}");
                false
            }
        }
    }

    /// Exchange credentials and device serial for a new token.
    pub fn acquire(&mut self, now: Instant) -> Result<(), AuthError> {
        let url = join_url(&self.base_url, "token/request");
        debug!(
            "requesting token for {} / {}",
            self.credentials.username, self.serial_number
        );
        let request = HttpRequest::new(Method::Post, &url).json(&json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
            "serialNumber": self.serial_number,
        }));

        let response = self.transport.execute(&request)?;
        if !response.is_success() {
            warn!("token request failed with {}", response.body_for_log());
            return Err(AuthError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let raw: Value = serde_json::from_str(&response.body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if let Some(store) = &self.store {
            match store.save(&response.body) {
                Ok(()) => debug!("token written to {}", store.path().display()),
                Err(e) => warn!("token acquired but not persisted: {e}"),
            }
        }

        self.token = Some(Token {
            raw,
            acquired_at: now,
        });
        self.last_renewal = Some(now);
        info!("acquired telemetry token from {}", request.host());
        Ok(())
    }

    /// Exchange the current token for a refreshed one.
    ///
    /// Failures are logged and leave the current token in place; returns
    /// whether the renewal succeeded.
    pub fn renew(&mut self, now: Instant) -> bool {
        let Some(current) = &self.token else {
            return false;
        };
        let url = join_url(&self.base_url, "token/renew");
        let request = HttpRequest::new(Method::Put, &url).json(&json!({ "token": current.raw }));

        let response = match self.transport.execute(&request) {
            Ok(r) => r,
            Err(e) => {
                warn!("token renew: {e}");
                return false;
            }
        };
        if !response.is_success() {
            warn!(
                "token renew: HTTP {} {}",
                response.status,
                response.body_for_log()
            );
            return false;
        }

        // Some deployments answer a renewal with an empty body; keep the
        // current token in that case.
        if let Ok(raw) = serde_json::from_str::<Value>(&response.body) {
            if let Some(store) = &self.store {
                if let Err(e) = store.save(&response.body) {
                    warn!("renewed token not persisted: {e}");
                }
            }
            self.token = Some(Token {
                raw,
                acquired_at: now,
            });
        }
        debug!("token renew: OK");
        true
    }

    /// Make sure a usable token is loaded before an authenticated call.
    ///
    /// `force` (or no token at all) discards any token and acquires from
    /// scratch. Otherwise the token is renewed once the renewal period has
    /// elapsed; the renewal clock restarts whether or not renewal worked.
    pub fn ensure_valid(&mut self, force: bool, now: Instant) -> Result<EnsureAction, AuthError> {
        if force || self.token.is_none() {
            if force {
                debug!("ignoring current token, requesting new token");
            }
            self.invalidate();
            return match self.acquire(now) {
                Ok(()) => Ok(EnsureAction::Acquired),
                Err(e) => {
                    error!("failed to get new token: {e}");
                    Err(e)
                }
            };
        }

        let due = self
            .last_renewal
            .is_none_or(|last| now.saturating_duration_since(last) > self.renewal_period);
        if due {
            debug!("renewing token");
            self.renew(now);
            self.last_renewal = Some(now);
            Ok(EnsureAction::Renewed)
        } else {
            Ok(EnsureAction::Unchanged)
        }
    }
}
