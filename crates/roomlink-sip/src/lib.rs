//! # roomlink-sip
//!
//! SIP-to-conference gateway control plane.
//!
//! A SIP peer (desk phone, PBX trunk, softphone) is bridged into a conference
//! room as a regular participant:
//! - the peer's media is published into the room and mixed into its common output
//! - the room's common mix is subscribed back to the peer
//! - the room's controller is discovered through the cluster scheduler
//!
//! The SIP stack, the RPC wire and the media-routing fabric stay outside this
//! crate behind the [`SipStack`], [`RpcTransport`] and [`MediaRouter`] traits.

pub mod controller;
pub mod locator;
pub mod manager;
pub mod negotiator;
pub mod router;
pub mod session;
pub mod sip;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use locator::{ControllerLocator, RetryPolicy};
pub use manager::{CallSessionManager, GatewayIdentity, GatewayMode, GatewayStats, InternalAddress};
pub use router::{LinkupSources, MediaRouter};
pub use sip::{CallConnection, ConnectionParams, SipEvent, SipStack};
pub use transport::RpcTransport;
