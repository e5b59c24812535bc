//! Per-call state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use roomlink_common::ClientId;

use crate::sip::MediaConnection;
use crate::types::{CallInfo, MediaSpec, RoomStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Joined (or joining) the room, media not negotiated yet.
    Joining,
    Established,
    /// A media update is being applied; further updates queue in `pending_info`.
    Updating,
}

/// Stream and subscription ids registered with the fabric and the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalBindings {
    pub stream_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// One SIP call bridged into a room.
#[derive(Debug)]
pub struct CallSession {
    pub id: ClientId,
    pub peer_uri: String,
    controller: String,
    pub state: SessionState,
    pub connection: Option<MediaConnection>,
    pub published_stream_id: Option<String>,
    pub subscription_id: Option<String>,
    pub audio_source: Option<RoomStream>,
    pub video_source: Option<RoomStream>,
    /// Requested outbound media of a gateway-initiated call.
    pub media_out: Option<MediaSpec>,
    pub current_info: Option<CallInfo>,
    pub pending_info: Option<CallInfo>,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(id: ClientId, peer_uri: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            id,
            peer_uri: peer_uri.into(),
            controller: controller.into(),
            state: SessionState::Joining,
            connection: None,
            published_stream_id: None,
            subscription_id: None,
            audio_source: None,
            video_source: None,
            media_out: None,
            current_info: None,
            pending_info: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_media_out(mut self, media_out: MediaSpec) -> Self {
        self.media_out = Some(media_out);
        self
    }

    /// Controller address, fixed for the session's lifetime.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn is_updating(&self) -> bool {
        self.state == SessionState::Updating
    }

    pub fn has_source(&self) -> bool {
        self.audio_source.is_some() || self.video_source.is_some()
    }

    /// Detach the current ids so they can be torn down exactly once.
    pub fn take_bindings(&mut self) -> LocalBindings {
        LocalBindings {
            stream_id: self.published_stream_id.take(),
            subscription_id: self.subscription_id.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_taken_once() {
        let mut session = CallSession::new(ClientId::incoming(), "sip:a@x", "ctrl");
        session.published_stream_id = Some("s1".into());
        session.subscription_id = Some("sub1".into());

        let first = session.take_bindings();
        assert_eq!(first.stream_id.as_deref(), Some("s1"));
        assert_eq!(first.subscription_id.as_deref(), Some("sub1"));
        assert_eq!(session.take_bindings(), LocalBindings::default());
    }

    #[test]
    fn new_session_is_joining() {
        let session = CallSession::new(ClientId::outgoing(), "sip:b@x", "ctrl");
        assert_eq!(session.state, SessionState::Joining);
        assert_eq!(session.controller(), "ctrl");
        assert!(!session.has_source());
    }
}
