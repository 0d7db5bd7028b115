//! Axum router and all HTTP handlers for pck-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.

use std::{collections::BTreeMap, convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use pck_session::{OrderLine, OrderNumber, ProductId, SessionSnapshot};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    api_types::{
        ConnectionStatus, FinalizeResponse, HealthResponse, OAuthCallbackQuery, ScanRequest,
        ScanResponse,
    },
    error::ApiError,
    monitor::MonitorBus,
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/oauth/login", get(oauth_login))
        .route("/oauth/callback", get(oauth_callback))
        .route("/bling/status", get(bling_status))
        .route("/pedido/:numero", get(load_order))
        .route("/scan", post(scan))
        .route("/finalizar", post(finalize))
        .route("/monitor/stream", get(monitor_stream))
        .route("/status/:numero", get(remote_status))
        .route("/sessao", get(session_snapshot))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: st.build.service.to_string(),
        version: st.build.version.to_string(),
    })
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

/// Redirect the operator to the ERP consent screen.
pub(crate) async fn oauth_login(State(st): State<Arc<AppState>>) -> Response {
    let state = Uuid::new_v4().simple().to_string();
    let url = match st.oauth.authorize_url(&state) {
        Ok(url) => url,
        Err(err) => {
            error!(%err, "cannot build authorize url");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Erro ao autenticar no Bling").into_response();
        }
    };
    match HeaderValue::from_str(&url) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(err) => {
            error!(%err, "authorize url is not a valid header");
            (StatusCode::INTERNAL_SERVER_ERROR, "Erro ao autenticar no Bling").into_response()
        }
    }
}

/// Exchange the authorization code and persist the token record.
pub(crate) async fn oauth_callback(
    State(st): State<Arc<AppState>>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Response {
    let Some(code) = q.code.filter(|c| !c.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Code não recebido do Bling").into_response();
    };

    let saved = match st.oauth.exchange_code(&code).await {
        Ok(record) => st.tokens.save(&record).await,
        Err(err) => Err(err),
    };
    match saved {
        Ok(()) => {
            info!(path = %st.tokens.path().display(), "oauth token stored");
            (
                StatusCode::OK,
                "Bling autenticado com sucesso. Pode fechar esta página.",
            )
                .into_response()
        }
        Err(err) => {
            error!(%err, "oauth callback failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Erro ao autenticar no Bling").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /bling/status
// ---------------------------------------------------------------------------

pub(crate) async fn bling_status(State(st): State<Arc<AppState>>) -> Response {
    match st.gateway.probe().await {
        Ok(()) => Json(ConnectionStatus {
            conectado: true,
            erro: None,
        })
        .into_response(),
        Err(err) => {
            info!(%err, "bling probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ConnectionStatus {
                    conectado: false,
                    erro: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Verification flow
// ---------------------------------------------------------------------------

pub(crate) async fn load_order(
    State(st): State<Arc<AppState>>,
    Path(numero): Path<String>,
) -> Result<Json<BTreeMap<ProductId, OrderLine>>, ApiError> {
    let number: OrderNumber = numero.parse()?;
    let lines = st.workflow.load(number).await?;
    Ok(Json(lines))
}

pub(crate) async fn scan(
    State(st): State<Arc<AppState>>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Json(req) = body?;
    let receipt = st.workflow.scan(&req.codigo).await?;
    Ok(Json(ScanResponse {
        product_id: receipt.product_id,
        scanned: receipt.scanned,
    }))
}

pub(crate) async fn finalize(
    State(st): State<Arc<AppState>>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let outcome = st.workflow.finalize().await?;
    Ok(Json(FinalizeResponse {
        ok: true,
        aviso: outcome.warning().map(str::to_string),
    }))
}

/// Remote order document, straight from the ERP. Debug aid.
pub(crate) async fn remote_status(
    State(st): State<Arc<AppState>>,
    Path(numero): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let number: OrderNumber = numero.parse()?;
    Ok(Json(st.workflow.remote_order(number).await?))
}

pub(crate) async fn session_snapshot(State(st): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(st.workflow.snapshot().await)
}

// ---------------------------------------------------------------------------
// GET /monitor/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn monitor_stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = monitor_to_sse(st.bus());

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn monitor_to_sse(bus: &MonitorBus) -> impl Stream<Item = Result<Event, Infallible>> {
    bus.subscribe()
        .into_stream(bus.clone())
        .filter_map(|ev| async move {
            let data = serde_json::to_string(&ev).ok()?;
            Some(Ok(Event::default().data(data)))
        })
}
