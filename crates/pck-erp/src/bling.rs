//! Bling API v3 implementation of [`ErpGateway`].
//!
//! Every request carries a bearer token fetched from the [`TokenProvider`]
//! right before sending, so a refresh between calls is picked up without
//! rebuilding the gateway. The `reqwest` client enforces the per-request
//! timeout; a timeout surfaces as [`GatewayError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pck_session::{OrderNumber, ProductId, RemoteOrderId};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ensure_success, GatewayError};
use crate::gateway::ErpGateway;
use crate::model::{Envelope, OrderSummary, RemoteProduct};
use crate::token::TokenProvider;

pub struct BlingGateway {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for BlingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlingGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BlingGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, GatewayError> {
        let token = self.tokens.access_token().await?;
        debug!(method = method.as_str(), path, "bling request");

        let resp = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, path))?;

        ensure_success(resp, path).await
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let resp = self.call(Method::GET, path, query).await?;
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, path))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ErpGateway for BlingGateway {
    async fn find_order(&self, number: OrderNumber) -> Result<Option<RemoteOrderId>, GatewayError> {
        let found: Vec<OrderSummary> = self
            .get_data("/pedidos/vendas", &[("numero", number.to_string())])
            .await?;
        Ok(found.first().map(|o| o.id))
    }

    async fn order_document(&self, id: RemoteOrderId) -> Result<Value, GatewayError> {
        self.get_data(&format!("/pedidos/vendas/{id}"), &[]).await
    }

    async fn product(&self, id: ProductId) -> Result<RemoteProduct, GatewayError> {
        self.get_data(&format!("/produtos/{id}"), &[]).await
    }

    async fn set_situation(&self, id: RemoteOrderId, situation: i64) -> Result<(), GatewayError> {
        self.call(
            Method::PATCH,
            &format!("/pedidos/vendas/{id}/situacoes/{situation}"),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn post_stock(&self, id: RemoteOrderId) -> Result<(), GatewayError> {
        self.call(
            Method::POST,
            &format!("/pedidos/vendas/{id}/lancar-estoque"),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        self.call(Method::GET, "/produtos", &[("limite", "1".to_string())])
            .await?;
        Ok(())
    }
}
