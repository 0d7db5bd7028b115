//! The call surface the verification workflow needs from the ERP.

use async_trait::async_trait;
use pck_session::{OrderNumber, ProductId, RemoteOrderId};
use serde_json::Value;

use crate::error::GatewayError;
use crate::model::{RemoteOrder, RemoteProduct};

/// Remote ERP operations.
///
/// Object-safe and `Send + Sync` so the daemon can hold an
/// `Arc<dyn ErpGateway>` and swap in a scripted double under test.
#[async_trait]
pub trait ErpGateway: Send + Sync {
    /// Resolve an operator-facing order number. `Ok(None)` when no order has it;
    /// when several match, the first one reported by the ERP is used.
    async fn find_order(&self, number: OrderNumber) -> Result<Option<RemoteOrderId>, GatewayError>;

    /// The order detail exactly as the ERP returned it (the `data` object).
    async fn order_document(&self, id: RemoteOrderId) -> Result<Value, GatewayError>;

    /// Typed view of [`ErpGateway::order_document`].
    async fn order(&self, id: RemoteOrderId) -> Result<RemoteOrder, GatewayError> {
        let doc = self.order_document(id).await?;
        serde_json::from_value(doc).map_err(|e| GatewayError::Decode(format!("order {id}: {e}")))
    }

    async fn product(&self, id: ProductId) -> Result<RemoteProduct, GatewayError>;

    /// Move the order to another situation.
    async fn set_situation(&self, id: RemoteOrderId, situation: i64) -> Result<(), GatewayError>;

    /// Post the stock movement for every line of the order.
    async fn post_stock(&self, id: RemoteOrderId) -> Result<(), GatewayError>;

    /// Cheapest authenticated call, used as a connectivity check.
    async fn probe(&self) -> Result<(), GatewayError>;
}
