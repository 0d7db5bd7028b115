//! pck-daemon library target.
//!
//! Exposes the workflow, the monitor bus, the router and the state so the
//! scenario tests can drive them in-process. The binary `main.rs` depends on
//! this library target.

pub mod api_types;
pub mod error;
pub mod monitor;
pub mod routes;
pub mod state;
pub mod workflow;
