//! Wire shapes of the ERP responses the workflow consumes.
//!
//! Only the fields the verification flow reads are modelled; everything else
//! in the payload is ignored. Codes and quantities are decoded leniently
//! because the ERP returns them as strings or numbers depending on how the
//! product was registered.

use pck_session::{ProductId, RemoteOrderId};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Situation codes
// ---------------------------------------------------------------------------

/// Order situation ids of the ERP account.
///
/// "Open" and "In progress" are fixed in this domain; the "Verified" id is
/// created per account and comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Situations {
    pub verified: i64,
}

impl Situations {
    pub const OPEN: i64 = 6;
    pub const IN_PROGRESS: i64 = 15;

    pub fn new(verified: i64) -> Self {
        Self { verified }
    }
}

// ---------------------------------------------------------------------------
// Envelope / refs
// ---------------------------------------------------------------------------

/// Every ERP response wraps its payload in `{"data": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Entry of the order search result.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSummary {
    pub id: RemoteOrderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SituationRef {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Sales order detail (`GET /pedidos/vendas/{id}`).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrder {
    pub id: RemoteOrderId,
    #[serde(default, rename = "situacao")]
    pub situation: Option<SituationRef>,
    #[serde(default, rename = "itens")]
    pub items: Vec<RemoteOrderItem>,
}

impl RemoteOrder {
    pub fn situation_id(&self) -> Option<i64> {
        self.situation.map(|s| s.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrderItem {
    /// Product code embedded in the order line (often the SKU or EAN).
    #[serde(default, rename = "codigo", deserialize_with = "lenient_code")]
    pub code: Option<String>,
    #[serde(default, rename = "descricao")]
    pub description: String,
    #[serde(rename = "quantidade", deserialize_with = "lenient_quantity")]
    pub quantity: f64,
    #[serde(rename = "produto")]
    pub product: ProductRef,
}

impl RemoteOrderItem {
    /// Whole units to verify: the remote quantity rounded to the nearest
    /// integer, or `None` when that is below one.
    pub fn ordered_units(&self) -> Option<u32> {
        let rounded = self.quantity.round();
        (rounded.is_finite() && rounded >= 1.0 && rounded <= f64::from(u32::MAX))
            .then_some(rounded as u32)
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// Product detail (`GET /produtos/{id}`).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProduct {
    pub id: ProductId,
    #[serde(default, rename = "nome")]
    pub name: Option<String>,
    #[serde(default, rename = "codigoBarras", deserialize_with = "lenient_code")]
    pub barcode: Option<String>,
    #[serde(default, deserialize_with = "lenient_code")]
    pub gtin: Option<String>,
}

impl RemoteProduct {
    /// Barcode first, then GTIN.
    pub fn scan_codes(&self) -> impl Iterator<Item = &str> {
        self.barcode.iter().chain(self.gtin.iter()).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Lenient decoders
// ---------------------------------------------------------------------------

fn lenient_code<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_quantity<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("quantity out of range")),
        Value::String(s) => s
            .trim()
            .replace(',', ".")
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid quantity {s:?}"))),
        other => Err(D::Error::custom(format!("invalid quantity {other}"))),
    }
}
