//! In-process scenario tests for pck-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`; the ERP is a `ScriptedErp`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use pck_config::OAuthCredentials;
use pck_daemon::{routes, state::AppState};
use pck_erp::{FileTokenStore, GatewayError, OAuthClient, Situations};
use pck_testkit::{item, ErpCall, ErpOp, ScriptedErp};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

const VERIFIED: i64 = 24;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    erp: ScriptedErp,
    state: Arc<AppState>,
    dir: tempfile::TempDir,
}

fn harness_with_oauth(oauth_base: &str) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let erp = ScriptedErp::new();
    let oauth = OAuthClient::new(
        OAuthCredentials {
            client_id: "client-abc".into(),
            client_secret: "secret-xyz".into(),
            redirect_uri: "http://localhost:3000/oauth/callback".into(),
        },
        oauth_base,
        Duration::from_secs(5),
    )
    .expect("oauth client");
    let tokens = Arc::new(FileTokenStore::new(
        dir.path().join("bling_token.json"),
        oauth.clone(),
    ));
    let state = Arc::new(AppState::new(
        Arc::new(erp.clone()),
        Situations::new(VERIFIED),
        oauth,
        tokens,
    ));
    Harness { erp, state, dir }
}

fn harness() -> Harness {
    harness_with_oauth("https://www.bling.com.br/Api/v3/oauth")
}

/// Order 500: product 11 ×3 (embedded code), product 12 ×1 (barcode only).
fn seed_order_500(erp: &ScriptedErp) {
    erp.add_order(
        500,
        9500,
        Situations::OPEN,
        vec![
            item(11, "Caneta azul", 3.0).code("SKU-11"),
            item(12, "Caderno", 1.0),
        ],
    );
    erp.add_product(11, None, None);
    erp.add_product(12, Some("7890012"), None);
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(h: &Harness, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let router = routes::build_router(Arc::clone(&h.state));
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

/// Parse body bytes as a `serde_json::Value`.
fn parse_json(b: bytes::Bytes) -> Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

async fn scan(h: &Harness, code: &str) -> (StatusCode, Value) {
    let (status, body) = call(h, post_json("/scan", json!({ "codigo": code }))).await;
    (status, parse_json(body))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let h = harness();
    let (status, body) = call(&h, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pck-daemon");
}

// ---------------------------------------------------------------------------
// End-to-end verification of order 500
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_500_load_scan_finalize_end_to_end() {
    let h = harness();
    seed_order_500(&h.erp);

    let (status, body) = call(&h, get("/pedido/500")).await;
    assert_eq!(status, StatusCode::OK);
    let lines = parse_json(body);
    assert_eq!(
        lines["11"],
        json!({ "idProduto": 11, "nome": "Caneta azul", "pedido": 3, "bipado": 0, "codigos": ["SKU-11"] })
    );
    assert_eq!(lines["12"]["codigos"], json!(["7890012"]));
    // Open orders are moved to in-progress on load.
    assert_eq!(h.erp.situation_of(9500), Some(Situations::IN_PROGRESS));

    for expected in 1..=3 {
        let (status, json) = scan(&h, "SKU-11").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "idProduto": 11, "bipado": expected }));
    }
    let (status, json) = scan(&h, "SKU-11").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["erro"], "Quantidade excedida");

    let (status, json) = scan(&h, "7890012").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bipado"], 1);

    let (status, body) = call(&h, post_empty("/finalizar")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!({ "ok": true }));
    assert!(h.erp.calls().contains(&ErpCall::PostStock(9500)));
    assert_eq!(h.erp.situation_of(9500), Some(VERIFIED));

    let (status, json) = scan(&h, "SKU-11").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["erro"], "Produto não pertence ao pedido");

    let (status, body) = call(&h, post_empty("/finalizar")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["erro"], "Pedido não carregado");
}

#[tokio::test]
async fn numeric_scan_codes_and_surrounding_whitespace_are_accepted() {
    let h = harness();
    seed_order_500(&h.erp);
    call(&h, get("/pedido/500")).await;

    let (status, body) = call(&h, post_json("/scan", json!({ "codigo": 7890012 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["idProduto"], 12);

    let (status, json) = scan(&h, "  SKU-11\n").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["idProduto"], 11);
}

#[tokio::test]
async fn malformed_scan_body_is_400_with_erro() {
    let h = harness();
    seed_order_500(&h.erp);
    call(&h, get("/pedido/500")).await;

    let not_json = Request::builder()
        .method("POST")
        .uri("/scan")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("codigo=SKU-11"))
        .unwrap();
    let requests = vec![
        post_json("/scan", json!({})),
        post_json("/scan", json!({ "codigo": null })),
        post_json("/scan", json!({ "codigo": ["SKU-11"] })),
        not_json,
        post_empty("/scan"),
    ];
    for req in requests {
        let (status, body) = call(&h, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse_json(body)["erro"], "Produto não pertence ao pedido");
    }

    // Nothing was counted.
    let (_, json) = scan(&h, "SKU-11").await;
    assert_eq!(json["bipado"], 1);
}

// ---------------------------------------------------------------------------
// GET /pedido/:numero failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_order_number_is_400_without_remote_calls() {
    let h = harness();
    for uri in ["/pedido/abc", "/pedido/0", "/pedido/-3"] {
        let (status, body) = call(&h, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(parse_json(body)["erro"], "Número de pedido inválido");
    }
    assert!(h.erp.calls().is_empty());
}

#[tokio::test]
async fn unknown_order_is_404() {
    let h = harness();
    let (status, body) = call(&h, get("/pedido/404404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["erro"], "Pedido não encontrado");
}

#[tokio::test]
async fn already_verified_order_is_409_and_keeps_previous_session() {
    let h = harness();
    h.erp.add_order(1000, 10_000, Situations::IN_PROGRESS, vec![item(1, "Fita", 2.0).code("F1")]);
    h.erp.add_order(1001, 10_001, VERIFIED, vec![item(2, "Cola", 1.0).code("C2")]);

    let (status, _) = call(&h, get("/pedido/1000")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = scan(&h, "F1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h, get("/pedido/1001")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse_json(body)["erro"], "ESTE PEDIDO JÁ FOI VERIFICADO");

    let (_, body) = call(&h, get("/sessao")).await;
    let snap = parse_json(body);
    assert_eq!(snap["fase"], "LOADED");
    assert_eq!(snap["pedido"], 1000);
    assert_eq!(snap["linhas"]["1"]["bipado"], 1);

    // The verified order was never touched.
    assert_eq!(
        h.erp.count_calls(|c| matches!(c, ErpCall::SetSituation { order: 10_001, .. })),
        0
    );
}

#[tokio::test]
async fn gateway_failure_on_load_is_500() {
    let h = harness();
    seed_order_500(&h.erp);
    h.erp.fail_next(ErpOp::OrderDocument, GatewayError::Transport("connection reset".into()));

    let (status, body) = call(&h, get("/pedido/500")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(parse_json(body)["erro"].is_string());

    // Guard was released: the retry goes through.
    let (status, _) = call(&h, get("/pedido/500")).await;
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// POST /finalizar outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finalize_timeout_answers_ok_with_warning() {
    let h = harness();
    seed_order_500(&h.erp);
    call(&h, get("/pedido/500")).await;
    h.erp.fail_next(ErpOp::SetSituation, GatewayError::Timeout("deadline".into()));

    let (status, body) = call(&h, post_empty("/finalizar")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert!(json["aviso"].as_str().is_some_and(|s| !s.is_empty()));

    let (_, body) = call(&h, get("/sessao")).await;
    assert_eq!(parse_json(body)["fase"], "EMPTY");
}

#[tokio::test]
async fn finalize_hard_failure_is_500_and_keeps_session() {
    let h = harness();
    seed_order_500(&h.erp);
    call(&h, get("/pedido/500")).await;
    scan(&h, "SKU-11").await;
    h.erp.fail_next(
        ErpOp::PostStock,
        GatewayError::Rejected {
            what: "stock".into(),
            status: 422,
            body: "estoque insuficiente".into(),
        },
    );

    let (status, body) = call(&h, post_empty("/finalizar")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(parse_json(body)["erro"].is_string());

    let (_, body) = call(&h, get("/sessao")).await;
    let snap = parse_json(body);
    assert_eq!(snap["fase"], "LOADED");
    assert_eq!(snap["linhas"]["11"]["bipado"], 1);
}

// ---------------------------------------------------------------------------
// GET /status/:numero  GET /sessao
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_status_returns_raw_document_without_loading() {
    let h = harness();
    seed_order_500(&h.erp);

    let (status, body) = call(&h, get("/status/500")).await;
    assert_eq!(status, StatusCode::OK);
    let doc = parse_json(body);
    assert_eq!(doc["id"], 9500);
    assert_eq!(doc["situacao"]["id"], Situations::OPEN);

    let (_, body) = call(&h, get("/sessao")).await;
    assert_eq!(parse_json(body), json!({ "fase": "EMPTY", "pedido": null, "linhas": {} }));

    let (status, body) = call(&h, get("/status/77")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["erro"], "Pedido não encontrado");
}

// ---------------------------------------------------------------------------
// GET /bling/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bling_status_reports_probe_result() {
    let h = harness();
    let (status, body) = call(&h, get("/bling/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!({ "conectado": true }));

    h.erp.fail_next(ErpOp::Probe, GatewayError::Unauthorized("no token stored".into()));
    let (status, body) = call(&h, get("/bling/status")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json = parse_json(body);
    assert_eq!(json["conectado"], false);
    assert!(json["erro"].as_str().unwrap().contains("no token stored"));
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oauth_login_redirects_to_consent_screen() {
    let h = harness();
    let resp = routes::build_router(Arc::clone(&h.state))
        .oneshot(get("/oauth/login"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);

    let location = resp.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://www.bling.com.br/Api/v3/oauth/authorize?"));
    assert!(location.contains("response_type=code"));
    assert!(location.contains("client_id=client-abc"));
    assert!(location.contains("state="));
    assert!(!location.contains("secret-xyz"));
}

#[tokio::test]
async fn oauth_callback_without_code_is_400() {
    let h = harness();
    let (status, body) = call(&h, get("/oauth/callback")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], "Code não recebido do Bling".as_bytes());
}

#[tokio::test]
async fn oauth_callback_exchanges_code_and_persists_token() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .header_exists("authorization")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=abc123");
            then.status(200).json_body(json!({
                "access_token": "acc-1",
                "refresh_token": "ref-1",
                "expires_in": 21600,
                "token_type": "Bearer"
            }));
        })
        .await;
    let h = harness_with_oauth(&server.url("/oauth"));

    let (status, body) = call(&h, get("/oauth/callback?code=abc123&state=xyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(std::str::from_utf8(&body).unwrap().contains("autenticado com sucesso"));
    token.assert_async().await;

    let stored: Value = serde_json::from_str(
        &std::fs::read_to_string(h.dir.path().join("bling_token.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(stored["access_token"], "acc-1");
    assert_eq!(stored["refresh_token"], "ref-1");
    assert!(stored["expires_at"].as_i64().unwrap() > chrono::Utc::now().timestamp_millis());
}

#[tokio::test]
async fn oauth_callback_exchange_failure_is_500() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(400).json_body(json!({ "error": { "type": "invalid_grant" } }));
        })
        .await;
    let h = harness_with_oauth(&server.url("/oauth"));

    let (status, body) = call(&h, get("/oauth/callback?code=stale")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], "Erro ao autenticar no Bling".as_bytes());
    assert!(!h.dir.path().join("bling_token.json").exists());
}

// ---------------------------------------------------------------------------
// GET /monitor/stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monitor_stream_opens_with_connected_event() {
    let h = harness();
    let resp = routes::build_router(Arc::clone(&h.state))
        .oneshot(get("/monitor/stream"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(h.state.bus().subscriber_count(), 1);

    let mut body = resp.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("no sse frame")
        .expect("stream ended")
        .expect("body error");
    let data = frame.into_data().expect("data frame");
    let text = std::str::from_utf8(&data).unwrap();
    assert!(text.starts_with("data: "), "{text}");
    let event: Value = serde_json::from_str(text.trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(event["evento"], "CONNECTED");

    drop(body);
    assert_eq!(h.state.bus().subscriber_count(), 0);
}
