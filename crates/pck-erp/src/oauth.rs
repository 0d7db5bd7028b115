//! OAuth 2.0 authorization-code client for the ERP.
//!
//! Two grants are used: `authorization_code` once, from the login callback,
//! and `refresh_token` whenever the stored access token is about to expire.
//! Both authenticate the application with HTTP basic auth.

use std::time::Duration;

use pck_config::OAuthCredentials;
use reqwest::Url;

use crate::error::{ensure_success, GatewayError};
use crate::token::{TokenGrant, TokenRecord};

#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    base_url: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        credentials: OAuthCredentials,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Consent screen URL the operator is redirected to.
    pub fn authorize_url(&self, state: &str) -> Result<String, GatewayError> {
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.base_url),
            &[
                ("response_type", "code"),
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| GatewayError::Transport(format!("invalid oauth base url: {e}")))?;
        Ok(url.into())
    }

    /// Trade the callback `code` for a token record.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord, GatewayError> {
        let grant = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ])
            .await?;
        TokenRecord::from_grant(grant, None, now_millis())
    }

    /// Obtain a fresh access token. The ERP may rotate the refresh token; when
    /// it does not send one, the current one is kept.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, GatewayError> {
        let grant = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        TokenRecord::from_grant(grant, Some(refresh_token), now_millis())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, GatewayError> {
        const WHAT: &str = "oauth token";

        let resp = self
            .http
            .post(format!("{}/token", self.base_url))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, WHAT))?;

        ensure_success(resp, WHAT)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, WHAT))
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
