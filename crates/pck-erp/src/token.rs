//! Bearer token supply.
//!
//! [`FileTokenStore`] keeps the token record in a local JSON file written by
//! the OAuth callback:
//!
//! ```json
//! { "access_token": "...", "refresh_token": "...", "expires_at": 1760000000000 }
//! ```
//!
//! `expires_at` is epoch milliseconds. The file is re-read on every request so
//! a new login takes effect immediately. Refreshes are serialised through one
//! async mutex; two concurrent callers never spend the same refresh token.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::GatewayError;
use crate::oauth::{now_millis, OAuthClient};

/// Refresh when the token has less than this left.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Token record
// ---------------------------------------------------------------------------

/// Raw token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Persisted token state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenRecord {
    /// Build a record from a grant received at `now_ms`.
    ///
    /// `previous_refresh` is used when the grant does not rotate the refresh token.
    pub fn from_grant(
        grant: TokenGrant,
        previous_refresh: Option<&str>,
        now_ms: i64,
    ) -> Result<Self, GatewayError> {
        let refresh_token = grant
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))
            .ok_or_else(|| GatewayError::Decode("token grant without refresh_token".into()))?;
        Ok(Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at: now_ms + grant.expires_in.saturating_mul(1000),
        })
    }

    pub fn expires_within(&self, now_ms: i64, margin: Duration) -> bool {
        let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        self.expires_at.saturating_sub(margin_ms) <= now_ms
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Supplies a valid bearer token on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, GatewayError>;
}

/// Fixed token; for probes against a sandbox and for tests.
#[derive(Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, GatewayError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    oauth: OAuthClient,
    refresh_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>, oauth: OAuthClient) -> Self {
        Self {
            path: path.into(),
            oauth,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// `Ok(None)` when no login has happened yet.
    pub async fn load(&self) -> Result<Option<TokenRecord>, GatewayError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&self.path, e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| GatewayError::Storage(format!("{}: {e}", self.path.display())))
    }

    /// Write the record through a temp file so readers never see a torn file.
    pub async fn save(&self, record: &TokenRecord) -> Result<(), GatewayError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| GatewayError::Storage(format!("encode token record: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error(&self.path, e))
    }
}

#[async_trait]
impl TokenProvider for FileTokenStore {
    async fn access_token(&self) -> Result<String, GatewayError> {
        let _refresh = self.refresh_lock.lock().await;

        let record = self.load().await?.ok_or_else(|| {
            GatewayError::Unauthorized("no token stored; authorize through /oauth/login".into())
        })?;
        if !record.expires_within(now_millis(), REFRESH_MARGIN) {
            return Ok(record.access_token);
        }

        info!(expires_at = record.expires_at, "access token expiring; refreshing");
        let fresh = self.oauth.refresh(&record.refresh_token).await?;
        self.save(&fresh).await?;
        Ok(fresh.access_token)
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> GatewayError {
    GatewayError::Storage(format!("{}: {err}", path.display()))
}
