//! The single active verification session.
//!
//! # Lifecycle
//!
//! ```text
//!   EMPTY ──load──► LOADING ──populate──► LOADED ──finalize──► FINALIZING ──clear──► EMPTY
//!                                          │  ▲
//!                                          └──┘ scan
//! ```
//!
//! `OrderSession` only stores the populated/empty distinction. The transient
//! `LOADING` / `FINALIZING` phases belong to whoever holds the single-flight
//! guard and are combined in [`SessionPhase::derive`].
//!
//! Lines and barcode index live together inside [`ActiveOrder`], so they can
//! only ever be replaced or cleared as a unit.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ids::{OrderNumber, ProductId, RemoteOrderId};
use crate::index::BarcodeIndex;
use crate::line::{OrderLine, ScanError};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// A remote operation holding the single-flight guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Load,
    Finalize,
}

/// Externally visible phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Empty,
    Loading,
    Loaded,
    Finalizing,
}

impl SessionPhase {
    /// Combine the stored session state with the operation currently in flight.
    pub fn derive(loaded: bool, in_flight: Option<Operation>) -> Self {
        match (in_flight, loaded) {
            (Some(Operation::Load), _) => SessionPhase::Loading,
            (Some(Operation::Finalize), _) => SessionPhase::Finalizing,
            (None, true) => SessionPhase::Loaded,
            (None, false) => SessionPhase::Empty,
        }
    }
}

// ---------------------------------------------------------------------------
// ActiveOrder
// ---------------------------------------------------------------------------

/// A populated session: one remote order, its lines and their barcodes.
#[derive(Debug, Clone)]
pub struct ActiveOrder {
    remote_id: RemoteOrderId,
    number: OrderNumber,
    lines: BTreeMap<ProductId, OrderLine>,
    index: BarcodeIndex,
}

impl ActiveOrder {
    pub fn remote_id(&self) -> RemoteOrderId {
        self.remote_id
    }

    pub fn number(&self) -> OrderNumber {
        self.number
    }

    pub fn lines(&self) -> &BTreeMap<ProductId, OrderLine> {
        &self.lines
    }

    pub fn index(&self) -> &BarcodeIndex {
        &self.index
    }
}

/// Result of an accepted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReceipt {
    pub product_id: ProductId,
    pub name: String,
    pub scanned: u32,
    pub ordered: u32,
}

/// Serializable view of the session for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    #[serde(rename = "fase")]
    pub phase: SessionPhase,
    #[serde(rename = "pedido")]
    pub order_number: Option<OrderNumber>,
    #[serde(rename = "linhas")]
    pub lines: BTreeMap<ProductId, OrderLine>,
}

// ---------------------------------------------------------------------------
// OrderSession
// ---------------------------------------------------------------------------

/// Owner of "the one active order". Empty at process start.
#[derive(Debug, Clone, Default)]
pub struct OrderSession {
    active: Option<ActiveOrder>,
}

impl OrderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was loaded with a new order.
    ///
    /// `lines` must be in remote order: a product listed twice keeps its last
    /// line, and a code shared by two lines resolves to the last one.
    pub fn populate(&mut self, remote_id: RemoteOrderId, number: OrderNumber, lines: Vec<OrderLine>) {
        let index = BarcodeIndex::build(&lines);
        let lines = lines
            .into_iter()
            .map(|line| (line.product_id(), line))
            .collect();
        self.active = Some(ActiveOrder {
            remote_id,
            number,
            lines,
            index,
        });
    }

    /// Drop the active order, its lines and its index. Returns what was loaded.
    pub fn clear(&mut self) -> Option<ActiveOrder> {
        self.active.take()
    }

    /// Resolve `code` and count one unit on the owning line.
    pub fn scan(&mut self, code: &str) -> Result<ScanReceipt, ScanError> {
        let not_in_order = || ScanError::NotInOrder {
            code: code.to_string(),
        };
        let active = self.active.as_mut().ok_or_else(not_in_order)?;
        let product_id = active.index.resolve(code).ok_or_else(not_in_order)?;
        let line = active.lines.get_mut(&product_id).ok_or_else(not_in_order)?;

        let scanned = line.record_scan()?;
        Ok(ScanReceipt {
            product_id,
            name: line.name().to_string(),
            scanned,
            ordered: line.ordered_qty(),
        })
    }

    pub fn active(&self) -> Option<&ActiveOrder> {
        self.active.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    pub fn remote_order_id(&self) -> Option<RemoteOrderId> {
        self.active.as_ref().map(ActiveOrder::remote_id)
    }

    /// Clone of the current lines (empty when nothing is loaded).
    pub fn lines(&self) -> BTreeMap<ProductId, OrderLine> {
        self.active
            .as_ref()
            .map(|a| a.lines.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, in_flight: Option<Operation>) -> SessionSnapshot {
        SessionSnapshot {
            phase: SessionPhase::derive(self.is_loaded(), in_flight),
            order_number: self.active.as_ref().map(ActiveOrder::number),
            lines: self.lines(),
        }
    }
}
