//! pck-daemon entry point.
//!
//! Thin on purpose: load `.env`, set up tracing, resolve settings, wire the
//! token store, ERP gateway and workflow into the shared state, attach
//! middleware and serve until Ctrl-C. Handlers live in `routes.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pck_config::Settings;
use pck_daemon::{routes, state};
use pck_erp::{BlingGateway, FileTokenStore, OAuthClient, Situations};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::dotenv();

    init_tracing();

    let settings = Settings::from_env().context("invalid configuration")?;
    let erp = &settings.erp;

    let oauth = OAuthClient::new(erp.credentials.clone(), erp.oauth_base.as_str(), erp.timeout)
        .context("oauth client")?;
    let tokens = Arc::new(FileTokenStore::new(&erp.token_path, oauth.clone()));
    let gateway = Arc::new(
        BlingGateway::new(erp.api_base.as_str(), erp.timeout, tokens.clone())
            .context("bling gateway")?,
    );

    let shared = Arc::new(state::AppState::new(
        gateway,
        Situations::new(settings.verified_situation_id),
        oauth,
        tokens,
    ));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!(
        api_base = %erp.api_base,
        token_path = %erp.token_path.display(),
        verified_situation = settings.verified_situation_id,
        "pck-daemon listening on http://{}",
        settings.bind_addr
    );

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("bind {}", settings.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("pck-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
