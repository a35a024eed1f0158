//! Messaging gateway integration: authenticated HTTP client, endpoint
//! resolution across gateway versions, and payload normalization.
//!
//! All gateway access funnels through [`GatewayClient`]; normalization
//! happens once, at this boundary, so the rest of the application never sees
//! raw gateway shapes.

mod client;
mod error;
pub mod normalize;
mod resolve;

pub use client::GatewayClient;
pub use error::GatewayError;
pub use resolve::{EndpointResolver, Operation, OperationParams, Resolved};
