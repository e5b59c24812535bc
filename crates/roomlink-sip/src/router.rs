//! Media-routing fabric seam.
//!
//! The fabric moves RTP between the SIP connection and the room. The gateway
//! registers each published stream as a local source and each subscription as a
//! local destination, keyed by the ids it generated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection kind registered with the fabric for SIP media.
pub const CONNECTION_KIND: &str = "sip";

/// One internal media endpoint another node streams from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAddress {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

/// Sources a local connection gets linked to, per media kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkupSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<StreamAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<StreamAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StreamAddress>,
}

#[async_trait]
pub trait MediaRouter: Send + Sync {
    /// Register media arriving on `handle` as the room-facing source `id`.
    async fn add_local_source(&self, id: &str, kind: &str, handle: &str) -> anyhow::Result<()>;

    /// Register `handle` as the sink for subscription `id`.
    async fn add_local_destination(&self, id: &str, kind: &str, handle: &str) -> anyhow::Result<()>;

    /// Drop a source or destination previously registered under `id`.
    async fn remove_connection(&self, id: &str) -> anyhow::Result<()>;

    async fn linkup(&self, connection_id: &str, from: &LinkupSources) -> anyhow::Result<()>;

    async fn cutoff(&self, connection_id: &str) -> anyhow::Result<()>;
}
