//! Barcode → product resolution for the active order.

use std::collections::HashMap;

use crate::ids::ProductId;
use crate::line::OrderLine;

/// Maps every scannable code of the active order to its owning line.
///
/// Built from scratch on every load and never patched incrementally, so codes
/// of a previous order cannot leak into the current one. When two lines share
/// a code, the line visited last wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarcodeIndex {
    codes: HashMap<String, ProductId>,
}

impl BarcodeIndex {
    /// Build the index from lines in remote order.
    pub fn build<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a OrderLine>,
    {
        let mut codes = HashMap::new();
        for line in lines {
            for code in line.codes() {
                codes.insert(code.clone(), line.product_id());
            }
        }
        Self { codes }
    }

    pub fn resolve(&self, code: &str) -> Option<ProductId> {
        self.codes.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
