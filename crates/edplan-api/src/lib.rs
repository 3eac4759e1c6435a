//! EdPlan HTTP Ingress
//!
//! JSON-over-HTTP surface for the generation pipeline. Authentication is
//! upstream; requests arrive with an injected principal. Every successful
//! response carries a `_metadata` envelope with the server timestamp and the
//! request's correlation id.

pub mod auth;
pub mod error;
pub mod routes;

pub use auth::*;
pub use error::*;
pub use routes::*;
