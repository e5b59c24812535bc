//! SIP stack seam: the command surface and the events it emits.
//!
//! The SIP stack owns registration, INVITE/BYE handling and RTP. The gateway
//! drives it through [`SipStack`] and consumes [`SipEvent`]s from a channel.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::types::CallInfo;

/// Events emitted by the SIP stack.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SipEvent {
    /// A peer sent an INVITE and waits for accept/reject.
    IncomingCall { peer_uri: String },

    /// Media negotiation of a call completed.
    CallEstablished(CallInfo),

    /// A re-INVITE changed the call's media.
    CallUpdated(CallInfo),

    /// The peer hung up or the dialog died.
    CallClosed { peer_uri: String },

    RegisterOk,

    RegisterFailed,

    /// In-call media change reported by the peer (e.g. resolution switch).
    MediaUpdate {
        peer_uri: String,
        direction: String,
        update: Value,
    },
}

impl SipEvent {
    /// Peer the event belongs to. Registration events belong to none.
    pub fn peer_uri(&self) -> Option<&str> {
        match self {
            Self::IncomingCall { peer_uri } | Self::CallClosed { peer_uri } | Self::MediaUpdate { peer_uri, .. } => {
                Some(peer_uri.as_str())
            }
            Self::CallEstablished(info) | Self::CallUpdated(info) => Some(info.peer_uri.as_str()),
            Self::RegisterOk | Self::RegisterFailed => None,
        }
    }
}

/// Parameters of the media connection for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub peer_uri: String,
    pub audio: bool,
    pub video: bool,
    pub red: bool,
    pub ulpfec: bool,
}

impl ConnectionParams {
    pub fn for_call(info: &CallInfo) -> Self {
        let video = info.video.as_ref();
        Self {
            peer_uri: info.peer_uri.clone(),
            audio: info.audio.is_some(),
            video: video.is_some(),
            red: video.is_some_and(|v| v.red),
            ulpfec: video.is_some_and(|v| v.ulpfec),
        }
    }
}

/// A live media connection created by the SIP stack.
pub trait CallConnection: Send + Sync {
    /// Handle the media-routing fabric uses to address this connection.
    fn handle(&self) -> String;

    fn close(self: Box<Self>);
}

/// Owned wrapper around a [`CallConnection`]; closing consumes it.
pub struct MediaConnection {
    handle: String,
    inner: Box<dyn CallConnection>,
}

impl MediaConnection {
    pub fn new(inner: Box<dyn CallConnection>) -> Self {
        Self {
            handle: inner.handle(),
            inner,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn close(self) {
        self.inner.close();
    }
}

impl fmt::Debug for MediaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaConnection")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SipStack: Send + Sync {
    /// Start registration. `false` means the stack refused to even try;
    /// otherwise the outcome arrives as `RegisterOk`/`RegisterFailed`.
    async fn register(&self, server: &str, user: &str, password: &str, display_name: &str) -> bool;

    async fn accept(&self, peer_uri: &str);

    async fn reject(&self, peer_uri: &str);

    async fn make_call(&self, peer_uri: &str, audio: bool, video: bool) -> bool;

    async fn hangup(&self, peer_uri: &str);

    /// Unregister and release the stack.
    async fn close(&self);

    async fn create_connection(&self, params: ConnectionParams) -> Box<dyn CallConnection>;
}
