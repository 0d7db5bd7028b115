//! pck-erp
//!
//! Boundary to the remote ERP (Bling API v3).
//!
//! The verification workflow only ever sees the [`ErpGateway`] trait; the
//! concrete [`BlingGateway`] speaks HTTP and pulls bearer tokens from a
//! [`TokenProvider`]. The OAuth client and the file-backed token store that
//! feed it live here too, since they share the same error type and HTTP stack.

pub mod bling;
pub mod error;
pub mod gateway;
pub mod model;
pub mod oauth;
pub mod token;

pub use bling::BlingGateway;
pub use error::GatewayError;
pub use gateway::ErpGateway;
pub use model::{ProductRef, RemoteOrder, RemoteOrderItem, RemoteProduct, SituationRef, Situations};
pub use oauth::OAuthClient;
pub use token::{FileTokenStore, StaticToken, TokenGrant, TokenProvider, TokenRecord};
