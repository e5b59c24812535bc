//! # roomlink-common
//!
//! Shared configuration, error taxonomy, and identifiers used across the roomlink crates.
//! This is the foundation layer: no call handling, just primitives and contracts.

pub mod config;
pub mod error;
pub mod ids;

pub use error::{GatewayError, GatewayResult, RpcError};
pub use ids::ClientId;
