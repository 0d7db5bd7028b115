//! A single product line of the active order.
//!
//! # Invariant
//!
//! `scanned_qty <= ordered_qty` at all times. A scan that would break the
//! bound is rejected with [`ScanError::QuantityExceeded`]; it is never
//! clamped and never recorded.

use serde::Serialize;

use crate::ids::ProductId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Construction failure for an [`OrderLine`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("ordered quantity must be at least 1 (product {0})")]
    ZeroQuantity(ProductId),
}

/// A scan that was refused. Refused scans never mutate the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The code does not resolve to any line of the active order.
    #[error("code {code:?} does not belong to the active order")]
    NotInOrder { code: String },
    /// The line is already fully scanned.
    #[error("product {product_id} already scanned {ordered} of {ordered}")]
    QuantityExceeded { product_id: ProductId, ordered: u32 },
}

// ---------------------------------------------------------------------------
// OrderLine
// ---------------------------------------------------------------------------

/// One product entry of the active order.
///
/// Serialised with the field names the scanning UI expects
/// (`idProduto`, `nome`, `pedido`, `bipado`, `codigos`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    #[serde(rename = "idProduto")]
    product_id: ProductId,
    #[serde(rename = "nome")]
    name: String,
    #[serde(rename = "pedido")]
    ordered_qty: u32,
    #[serde(rename = "bipado")]
    scanned_qty: u32,
    /// Barcodes for this product, insertion order, no duplicates.
    #[serde(rename = "codigos")]
    codes: Vec<String>,
}

impl OrderLine {
    /// A fresh, unscanned line with no codes.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        ordered_qty: u32,
    ) -> Result<Self, LineError> {
        if ordered_qty == 0 {
            return Err(LineError::ZeroQuantity(product_id));
        }
        Ok(Self {
            product_id,
            name: name.into(),
            ordered_qty,
            scanned_qty: 0,
            codes: Vec::new(),
        })
    }

    /// Attach a barcode. Blank codes and codes already present are ignored.
    ///
    /// Returns `true` if the code was added.
    pub fn add_code(&mut self, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() || self.codes.iter().any(|c| c == code) {
            return false;
        }
        self.codes.push(code.to_string());
        true
    }

    /// Count one physical unit. Returns the new scanned quantity.
    pub fn record_scan(&mut self) -> Result<u32, ScanError> {
        if self.scanned_qty >= self.ordered_qty {
            return Err(ScanError::QuantityExceeded {
                product_id: self.product_id,
                ordered: self.ordered_qty,
            });
        }
        self.scanned_qty += 1;
        Ok(self.scanned_qty)
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordered_qty(&self) -> u32 {
        self.ordered_qty
    }

    pub fn scanned_qty(&self) -> u32 {
        self.scanned_qty
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn is_complete(&self) -> bool {
        self.scanned_qty == self.ordered_qty
    }
}
