//! Shared runtime state for pck-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The workflow owns the
//! session and the guard; the OAuth client and token store back the login
//! endpoints; the gateway handle is kept for the connectivity probe.

use std::sync::Arc;

use pck_erp::{ErpGateway, FileTokenStore, OAuthClient, Situations};
use serde::Serialize;

use crate::monitor::MonitorBus;
use crate::workflow::VerificationWorkflow;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            service: "pck-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub build: BuildInfo,
    pub workflow: Arc<VerificationWorkflow>,
    pub gateway: Arc<dyn ErpGateway>,
    pub oauth: OAuthClient,
    pub tokens: Arc<FileTokenStore>,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn ErpGateway>,
        situations: Situations,
        oauth: OAuthClient,
        tokens: Arc<FileTokenStore>,
    ) -> Self {
        let workflow = Arc::new(VerificationWorkflow::new(
            Arc::clone(&gateway),
            situations,
            MonitorBus::new(),
        ));
        Self {
            build: BuildInfo::current(),
            workflow,
            gateway,
            oauth,
            tokens,
        }
    }

    pub fn bus(&self) -> &MonitorBus {
        self.workflow.bus()
    }
}
