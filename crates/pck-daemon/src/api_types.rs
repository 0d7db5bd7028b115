//! Request and response bodies of the pck-daemon HTTP endpoints.
//!
//! Field names follow what the scanning and monitor pages already speak
//! (Portuguese JSON keys). No business logic lives here.

use pck_session::ProductId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub erro: String,
}

// ---------------------------------------------------------------------------
// GET /bling/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub conectado: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /scan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    /// Scanner guns and keyboard wedges send strings; some clients send numbers.
    #[serde(deserialize_with = "code_as_string")]
    pub codigo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    #[serde(rename = "idProduto")]
    pub product_id: ProductId,
    #[serde(rename = "bipado")]
    pub scanned: u32,
}

fn code_as_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("codigo must be a string, got {other}"))),
    }
}

// ---------------------------------------------------------------------------
// POST /finalizar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aviso: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /oauth/callback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    /// Echoed by the ERP; not checked.
    pub state: Option<String>,
}
