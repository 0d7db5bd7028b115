//! Runtime configuration for the verification daemon.
//!
//! # Contract
//! - Every setting comes from an environment variable; [`Settings::from_env`]
//!   is called **once** at startup and the result is passed to constructors.
//!   Do not scatter `std::env::var` calls across the codebase.
//! - Resolution goes through a lookup function so tests can feed a map
//!   instead of mutating the process environment.
//! - Error messages name the variable, never its value.
//! - `Debug` output redacts the OAuth client secret.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_API_BASE: &str = "https://www.bling.com.br/Api/v3";
pub const DEFAULT_OAUTH_BASE: &str = "https://www.bling.com.br/Api/v3/oauth";
pub const DEFAULT_TOKEN_PATH: &str = "./bling_token.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PORT: u16 = 3000;

// ---------------------------------------------------------------------------
// Env var names
// ---------------------------------------------------------------------------

pub const ENV_CLIENT_ID: &str = "BLING_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "BLING_CLIENT_SECRET";
pub const ENV_REDIRECT_URI: &str = "BLING_REDIRECT_URI";
pub const ENV_VERIFIED_SITUATION: &str = "BLING_SITUACAO_VERIFICADO_ID";
pub const ENV_API_BASE: &str = "BLING_API_BASE";
pub const ENV_OAUTH_BASE: &str = "BLING_OAUTH_BASE";
pub const ENV_TOKEN_PATH: &str = "BLING_TOKEN_PATH";
pub const ENV_TIMEOUT_SECS: &str = "BLING_TIMEOUT_SECS";
pub const ENV_DAEMON_ADDR: &str = "PCK_DAEMON_ADDR";
pub const ENV_PORT: &str = "PORT";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// OAuth application credentials registered with the ERP.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Everything needed to reach the ERP.
#[derive(Debug, Clone)]
pub struct ErpSettings {
    pub credentials: OAuthCredentials,
    /// REST API root, no trailing slash.
    pub api_base: String,
    /// OAuth root (`{oauth_base}/authorize`, `{oauth_base}/token`), no trailing slash.
    pub oauth_base: String,
    /// Where the OAuth callback persists the token record.
    pub token_path: PathBuf,
    /// Per-request timeout for every remote call.
    pub timeout: Duration,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub erp: ErpSettings,
    /// Account-specific situation id meaning "verified".
    pub verified_situation_id: i64,
    pub bind_addr: SocketAddr,
}

impl Settings {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve through `lookup`, which returns the raw value of a variable.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &str| get(name).with_context(|| format!("{name} is not set"));

        let credentials = OAuthCredentials {
            client_id: require(ENV_CLIENT_ID)?,
            client_secret: require(ENV_CLIENT_SECRET)?,
            redirect_uri: require(ENV_REDIRECT_URI)?,
        };

        let verified_situation_id: i64 = require(ENV_VERIFIED_SITUATION)?
            .parse()
            .with_context(|| format!("{ENV_VERIFIED_SITUATION} must be an integer"))?;
        if verified_situation_id <= 0 {
            bail!("{ENV_VERIFIED_SITUATION} must be a positive situation id");
        }

        let timeout_secs = match get(ENV_TIMEOUT_SECS) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a positive number of seconds"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let erp = ErpSettings {
            credentials,
            api_base: trim_base(get(ENV_API_BASE).unwrap_or_else(|| DEFAULT_API_BASE.into())),
            oauth_base: trim_base(get(ENV_OAUTH_BASE).unwrap_or_else(|| DEFAULT_OAUTH_BASE.into())),
            token_path: get(ENV_TOKEN_PATH)
                .unwrap_or_else(|| DEFAULT_TOKEN_PATH.into())
                .into(),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            erp,
            verified_situation_id,
            bind_addr: resolve_bind_addr(&get)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// `PCK_DAEMON_ADDR` wins; otherwise bind all interfaces on `PORT`.
fn resolve_bind_addr<G>(get: &G) -> Result<SocketAddr>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(ENV_DAEMON_ADDR) {
        return raw
            .parse()
            .with_context(|| format!("{ENV_DAEMON_ADDR} must be a socket address like 127.0.0.1:3000"));
    }
    let port = match get(ENV_PORT) {
        Some(raw) => raw
            .parse::<u16>()
            .with_context(|| format!("{ENV_PORT} must be a TCP port"))?,
        None => DEFAULT_PORT,
    };
    Ok(SocketAddr::from(([0, 0, 0, 0], port)))
}
