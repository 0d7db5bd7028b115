//! Order verification workflow: load, scan, finalize.
//!
//! # Guard
//! Load and Finalize talk to the ERP and must never overlap. Both take the
//! single-flight guard through [`VerificationWorkflow::try_begin`]; a second
//! caller gets [`WorkflowError::Busy`] immediately, nothing queues. The guard
//! is an RAII [`FlightPermit`], so every exit path releases it.
//!
//! # Session
//! All session mutations (population, scan increments, clearing) happen
//! under one async mutex. Monitor events for a mutation are published while
//! that lock is still held, so subscribers see them in mutation order.
//!
//! # Detached remote work
//! [`VerificationWorkflow::load`] and [`VerificationWorkflow::finalize`] run
//! on their own spawned task and the caller only awaits its handle. A caller
//! that goes away (client disconnect, timeout) cannot stop the sequence
//! halfway between a remote state change and the matching session update.
//!
//! # Finalize outcomes
//! A timeout on either remote step, or a not-found on the situation
//! transition, usually means the ERP applied the change and answered late
//! or asynchronously. Those are reported as [`FinalizeOutcome::AmbiguousSuccess`]
//! and the session is cleared as if the call had succeeded.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use pck_erp::{ErpGateway, GatewayError, Situations};
use pck_session::{
    Operation, OrderLine, OrderNumber, OrderSession, ProductId, RemoteOrderId, ScanError,
    ScanReceipt, SessionPhase, SessionSnapshot,
};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::monitor::{EventKind, MonitorBus};

const TIMEOUT_WARNING: &str =
    "O Bling demorou para responder. O pedido provavelmente foi finalizado; confira no Bling.";
const ASYNC_WARNING: &str =
    "O Bling está processando o pedido em segundo plano; confira a situação no Bling.";

// ---------------------------------------------------------------------------
// Errors / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0:?} already in progress")]
    Busy(Operation),
    #[error("order {0} not found")]
    OrderNotFound(OrderNumber),
    #[error("order {0} is already verified")]
    AlreadyVerified(OrderNumber),
    #[error("no order loaded")]
    NoActiveOrder,
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0:?} task aborted: {1}")]
    Aborted(Operation, String),
}

/// Why a finalize was accepted despite a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityReason {
    /// A remote step timed out.
    Timeout,
    /// The situation transition answered not-found.
    Async,
}

impl AmbiguityReason {
    pub fn warning(self) -> &'static str {
        match self {
            AmbiguityReason::Timeout => TIMEOUT_WARNING,
            AmbiguityReason::Async => ASYNC_WARNING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Completed,
    AmbiguousSuccess {
        reason: AmbiguityReason,
        warning: String,
    },
}

impl FinalizeOutcome {
    fn ambiguous(reason: AmbiguityReason) -> Self {
        FinalizeOutcome::AmbiguousSuccess {
            reason,
            warning: reason.warning().to_string(),
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            FinalizeOutcome::Completed => None,
            FinalizeOutcome::AmbiguousSuccess { warning, .. } => Some(warning),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeStep {
    PostStock,
    Transition,
}

fn classify(step: FinalizeStep, err: &GatewayError) -> Option<AmbiguityReason> {
    if err.is_timeout() {
        Some(AmbiguityReason::Timeout)
    } else if step == FinalizeStep::Transition && err.is_not_found() {
        Some(AmbiguityReason::Async)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Proof of holding the single-flight guard. Released on drop.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    slot: &'a Mutex<Option<Operation>>,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct VerificationWorkflow {
    gateway: Arc<dyn ErpGateway>,
    situations: Situations,
    session: AsyncMutex<OrderSession>,
    in_flight: Mutex<Option<Operation>>,
    bus: MonitorBus,
}

impl VerificationWorkflow {
    pub fn new(gateway: Arc<dyn ErpGateway>, situations: Situations, bus: MonitorBus) -> Self {
        Self {
            gateway,
            situations,
            session: AsyncMutex::new(OrderSession::new()),
            in_flight: Mutex::new(None),
            bus,
        }
    }

    pub fn bus(&self) -> &MonitorBus {
        &self.bus
    }

    pub fn situations(&self) -> Situations {
        self.situations
    }

    /// Take the single-flight guard for `op`, or fail `Busy` with the
    /// operation currently holding it.
    pub fn try_begin(&self, op: Operation) -> Result<FlightPermit<'_>, WorkflowError> {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = *slot {
            return Err(WorkflowError::Busy(current));
        }
        *slot = Some(op);
        Ok(FlightPermit {
            slot: &self.in_flight,
        })
    }

    pub fn in_flight(&self) -> Option<Operation> {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Fetch order `number` and make it the active session.
    ///
    /// Any error leaves the previous session untouched.
    pub async fn load(
        self: &Arc<Self>,
        number: OrderNumber,
    ) -> Result<BTreeMap<ProductId, OrderLine>, WorkflowError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_load(number).await })
            .await
            .map_err(|e| WorkflowError::Aborted(Operation::Load, e.to_string()))?
    }

    async fn run_load(
        &self,
        number: OrderNumber,
    ) -> Result<BTreeMap<ProductId, OrderLine>, WorkflowError> {
        let _permit = self.try_begin(Operation::Load)?;

        let remote_id = self
            .gateway
            .find_order(number)
            .await?
            .ok_or(WorkflowError::OrderNotFound(number))?;
        let order = self.gateway.order(remote_id).await?;

        let situation = order.situation_id();
        if situation == Some(self.situations.verified) {
            info!(order_number = %number, remote_order_id = %remote_id, "order already verified");
            return Err(WorkflowError::AlreadyVerified(number));
        }
        if situation == Some(Situations::OPEN) {
            if let Err(err) = self
                .gateway
                .set_situation(remote_id, Situations::IN_PROGRESS)
                .await
            {
                warn!(order_number = %number, remote_order_id = %remote_id, %err,
                    "could not move order to in-progress");
            }
        }

        let mut lines = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let units = item.ordered_units().unwrap_or(0);
            let mut line = match OrderLine::new(item.product.id, item.description.as_str(), units) {
                Ok(line) => line,
                Err(err) => {
                    warn!(order_number = %number, quantity = item.quantity, %err, "skipping order line");
                    continue;
                }
            };
            if let Some(code) = &item.code {
                line.add_code(code);
            }
            lines.push(line);
        }

        self.enrich(&mut lines).await;

        let mut session = self.session.lock().await;
        session.populate(remote_id, number, lines);
        let loaded = session.lines();
        self.bus.publish(EventKind::Loaded { order: number });
        info!(order_number = %number, remote_order_id = %remote_id, lines = loaded.len(), "order loaded");
        Ok(loaded)
    }

    /// Add product barcodes / GTINs to each line. One lookup at a time: the
    /// ERP rate-limits per account. A failed lookup leaves its line with the
    /// codes it already has.
    async fn enrich(&self, lines: &mut [OrderLine]) {
        for line in lines.iter_mut() {
            let product_id = line.product_id();
            match self.gateway.product(product_id).await {
                Ok(product) => {
                    for code in product.scan_codes() {
                        line.add_code(code);
                    }
                }
                Err(err) => warn!(product_id = %product_id, %err, "product lookup failed"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    pub async fn scan(&self, code: &str) -> Result<ScanReceipt, WorkflowError> {
        let code = code.trim();
        let mut session = self.session.lock().await;
        let receipt = match session.scan(code) {
            Ok(receipt) => receipt,
            Err(err) => {
                info!(code, %err, "scan refused");
                return Err(err.into());
            }
        };

        self.bus.publish(EventKind::Scan {
            product: receipt.name.clone(),
            scanned: receipt.scanned,
            total: receipt.ordered,
        });
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    /// Post stock and mark the active order verified, then clear the session.
    pub async fn finalize(self: &Arc<Self>) -> Result<FinalizeOutcome, WorkflowError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_finalize().await })
            .await
            .map_err(|e| WorkflowError::Aborted(Operation::Finalize, e.to_string()))?
    }

    async fn run_finalize(&self) -> Result<FinalizeOutcome, WorkflowError> {
        let _permit = self.try_begin(Operation::Finalize)?;

        let (remote_id, number) = {
            let session = self.session.lock().await;
            let active = session.active().ok_or(WorkflowError::NoActiveOrder)?;
            (active.remote_id(), active.number())
        };

        let outcome = match self.post_and_verify(remote_id).await {
            Ok(()) => FinalizeOutcome::Completed,
            Err((step, err)) => match classify(step, &err) {
                Some(reason) => {
                    warn!(order_number = %number, remote_order_id = %remote_id, ?step, %err,
                        "finalize treated as probable success");
                    FinalizeOutcome::ambiguous(reason)
                }
                None => {
                    error!(order_number = %number, remote_order_id = %remote_id, ?step, %err,
                        "finalize failed");
                    return Err(err.into());
                }
            },
        };

        let mut session = self.session.lock().await;
        session.clear();
        let event = match &outcome {
            FinalizeOutcome::Completed => EventKind::Finalized { order: number },
            FinalizeOutcome::AmbiguousSuccess {
                reason: AmbiguityReason::Timeout,
                warning,
            } => EventKind::FinalizedTimeout {
                order: number,
                warning: warning.clone(),
            },
            FinalizeOutcome::AmbiguousSuccess {
                reason: AmbiguityReason::Async,
                warning,
            } => EventKind::FinalizedAsync {
                order: number,
                warning: warning.clone(),
            },
        };
        self.bus.publish(event);
        info!(order_number = %number, remote_order_id = %remote_id, ?outcome, "order finalized");
        Ok(outcome)
    }

    async fn post_and_verify(
        &self,
        remote_id: RemoteOrderId,
    ) -> Result<(), (FinalizeStep, GatewayError)> {
        self.gateway
            .post_stock(remote_id)
            .await
            .map_err(|e| (FinalizeStep::PostStock, e))?;
        self.gateway
            .set_situation(remote_id, self.situations.verified)
            .await
            .map_err(|e| (FinalizeStep::Transition, e))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Raw remote order document for `number`. Does not touch the session.
    pub async fn remote_order(&self, number: OrderNumber) -> Result<Value, WorkflowError> {
        let remote_id = self
            .gateway
            .find_order(number)
            .await?
            .ok_or(WorkflowError::OrderNotFound(number))?;
        Ok(self.gateway.order_document(remote_id).await?)
    }

    pub async fn phase(&self) -> SessionPhase {
        let loaded = self.session.lock().await.is_loaded();
        SessionPhase::derive(loaded, self.in_flight())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let in_flight = self.in_flight();
        self.session.lock().await.snapshot(in_flight)
    }

    pub async fn lines(&self) -> BTreeMap<ProductId, OrderLine> {
        self.session.lock().await.lines()
    }
}
