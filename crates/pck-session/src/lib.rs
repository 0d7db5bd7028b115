//! pck-session
//!
//! Pure domain model for the one active verification session: order lines,
//! the barcode index derived from them, and the session that owns both.
//!
//! All logic here is deterministic: no IO, no clock, no locking. Callers
//! (the daemon workflow) wrap [`OrderSession`] in their own mutex.

pub mod ids;
pub mod index;
pub mod line;
pub mod session;

pub use ids::{OrderNumber, OrderNumberError, ProductId, RemoteOrderId};
pub use index::BarcodeIndex;
pub use line::{LineError, OrderLine, ScanError};
pub use session::{ActiveOrder, Operation, OrderSession, ScanReceipt, SessionPhase, SessionSnapshot};
