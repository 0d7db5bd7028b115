//! Deterministic in-memory ERP for tests.
//!
//! [`ScriptedErp`] implements [`ErpGateway`] over plain maps:
//! - orders are registered by number with a remote id, situation and items;
//! - products are registered by id with optional barcode / GTIN;
//! - failures are scripted per operation (queued, consumed in order) or per
//!   product (sticky);
//! - every call is recorded in [`ScriptedErp::calls`];
//! - `set_situation` really updates the stored situation, so reloading a
//!   finalized order sees the new situation.
//!
//! Any operation can be held open with [`ScriptedErp::hold_next`] to keep a
//! load or finalize in flight while a test races other requests against it
//! (or abandons the caller). [`ScriptedErp::limit_product_lookups`] emulates
//! the ERP rate limit: product lookups above the ceiling answer HTTP 429.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pck_erp::{ErpGateway, GatewayError, RemoteProduct};
use pck_session::{OrderNumber, ProductId, RemoteOrderId};
use serde_json::{json, Value};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One order line fixture.
#[derive(Debug, Clone)]
pub struct ItemFixture {
    pub product_id: i64,
    pub description: String,
    pub quantity: f64,
    pub code: Option<String>,
}

/// Line without an embedded code.
pub fn item(product_id: i64, description: &str, quantity: f64) -> ItemFixture {
    ItemFixture {
        product_id,
        description: description.to_string(),
        quantity,
        code: None,
    }
}

impl ItemFixture {
    pub fn code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

/// Remote operation, for scripting failures and inspecting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErpOp {
    FindOrder,
    OrderDocument,
    Product,
    SetSituation,
    PostStock,
    Probe,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErpCall {
    FindOrder(u64),
    OrderDocument(i64),
    Product(i64),
    SetSituation { order: i64, situation: i64 },
    PostStock(i64),
    Probe,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    remote_id: RemoteOrderId,
    situation: i64,
    items: Vec<ItemFixture>,
}

#[derive(Debug, Default)]
struct Script {
    orders: BTreeMap<u64, StoredOrder>,
    products: HashMap<i64, (Option<String>, Option<String>)>,
    failing_products: HashMap<i64, GatewayError>,
    queued_failures: HashMap<ErpOp, VecDeque<GatewayError>>,
    calls: Vec<ErpCall>,
}

// ---------------------------------------------------------------------------
// ScriptedErp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ScriptedErp {
    script: Arc<Mutex<Script>>,
    holds: Arc<Mutex<HashMap<ErpOp, Arc<Notify>>>>,
    product_ceiling: Arc<Mutex<Option<usize>>>,
    products_in_flight: Arc<AtomicUsize>,
}

impl ScriptedErp {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an order reachable by `number`.
    pub fn add_order(&self, number: u64, remote_id: i64, situation: i64, items: Vec<ItemFixture>) {
        self.script().orders.insert(
            number,
            StoredOrder {
                remote_id: RemoteOrderId(remote_id),
                situation,
                items,
            },
        );
    }

    /// Register product detail with optional barcode and GTIN.
    pub fn add_product(&self, id: i64, barcode: Option<&str>, gtin: Option<&str>) {
        self.script()
            .products
            .insert(id, (barcode.map(str::to_string), gtin.map(str::to_string)));
    }

    /// Every `product(id)` call fails with `err`.
    pub fn fail_product(&self, id: i64, err: GatewayError) {
        self.script().failing_products.insert(id, err);
    }

    /// The next call of `op` fails with `err`; queue several to fail several.
    pub fn fail_next(&self, op: ErpOp, err: GatewayError) {
        self.script()
            .queued_failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<ErpCall> {
        self.script().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&ErpCall) -> bool) -> usize {
        self.script().calls.iter().filter(|c| pred(*c)).count()
    }

    /// Current situation of the order with `remote_id`.
    pub fn situation_of(&self, remote_id: i64) -> Option<i64> {
        self.script()
            .orders
            .values()
            .find(|o| o.remote_id == RemoteOrderId(remote_id))
            .map(|o| o.situation)
    }

    /// The next call of `op` waits until the returned handle is notified.
    pub fn hold_next(&self, op: ErpOp) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, Arc::clone(&notify));
        notify
    }

    /// Product lookups beyond `max` concurrent calls fail with HTTP 429.
    pub fn limit_product_lookups(&self, max: usize) {
        *self
            .product_ceiling
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(max);
    }

    async fn wait_if_held(&self, op: ErpOp) {
        let hold = self
            .holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op);
        if let Some(notify) = hold {
            notify.notified().await;
        }
    }

    fn lookup_product(&self, id: ProductId) -> Result<RemoteProduct, GatewayError> {
        self.enter(ErpOp::Product, ErpCall::Product(id.0))?;
        let script = self.script();
        if let Some(err) = script.failing_products.get(&id.0) {
            return Err(err.clone());
        }
        let (barcode, gtin) = script
            .products
            .get(&id.0)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("/produtos/{id}")))?;
        Ok(RemoteProduct {
            id,
            name: None,
            barcode,
            gtin,
        })
    }

    /// Record `call`, then pop a queued failure for `op` if any.
    fn enter(&self, op: ErpOp, call: ErpCall) -> Result<(), GatewayError> {
        let mut script = self.script();
        script.calls.push(call);
        match script.queued_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ErpGateway for ScriptedErp {
    async fn find_order(&self, number: OrderNumber) -> Result<Option<RemoteOrderId>, GatewayError> {
        self.wait_if_held(ErpOp::FindOrder).await;
        self.enter(ErpOp::FindOrder, ErpCall::FindOrder(number.get()))?;
        Ok(self.script().orders.get(&number.get()).map(|o| o.remote_id))
    }

    async fn order_document(&self, id: RemoteOrderId) -> Result<Value, GatewayError> {
        self.wait_if_held(ErpOp::OrderDocument).await;
        self.enter(ErpOp::OrderDocument, ErpCall::OrderDocument(id.0))?;
        let script = self.script();
        let (number, order) = script
            .orders
            .iter()
            .find(|(_, o)| o.remote_id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("/pedidos/vendas/{id}")))?;

        let items: Vec<Value> = order
            .items
            .iter()
            .map(|i| {
                json!({
                    "codigo": i.code,
                    "descricao": i.description,
                    "quantidade": i.quantity,
                    "produto": { "id": i.product_id },
                })
            })
            .collect();

        Ok(json!({
            "id": order.remote_id,
            "numero": number,
            "situacao": { "id": order.situation },
            "itens": items,
        }))
    }

    async fn product(&self, id: ProductId) -> Result<RemoteProduct, GatewayError> {
        self.wait_if_held(ErpOp::Product).await;
        let ceiling = *self
            .product_ceiling
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(max) = ceiling else {
            return self.lookup_product(id);
        };

        let in_flight = self.products_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        // Let sibling lookups start before this one answers.
        tokio::task::yield_now().await;
        let result = if in_flight > max {
            self.script().calls.push(ErpCall::Product(id.0));
            Err(GatewayError::Rejected {
                what: format!("/produtos/{id}"),
                status: 429,
                body: "too many requests".into(),
            })
        } else {
            self.lookup_product(id)
        };
        self.products_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn set_situation(&self, id: RemoteOrderId, situation: i64) -> Result<(), GatewayError> {
        self.wait_if_held(ErpOp::SetSituation).await;
        self.enter(
            ErpOp::SetSituation,
            ErpCall::SetSituation {
                order: id.0,
                situation,
            },
        )?;
        let mut script = self.script();
        let order = script
            .orders
            .values_mut()
            .find(|o| o.remote_id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("/pedidos/vendas/{id}")))?;
        order.situation = situation;
        Ok(())
    }

    async fn post_stock(&self, id: RemoteOrderId) -> Result<(), GatewayError> {
        self.wait_if_held(ErpOp::PostStock).await;
        self.enter(ErpOp::PostStock, ErpCall::PostStock(id.0))
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        self.enter(ErpOp::Probe, ErpCall::Probe)
    }
}
