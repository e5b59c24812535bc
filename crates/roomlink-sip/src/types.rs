//! Wire and domain types shared by the gateway components.
//!
//! Capability descriptors arrive from the SIP stack in its flat JSON layout
//! (`audio_codec`, `videoResolution`, ...) and are folded into [`CallInfo`].
//! Room streams arrive from the controller's `join` answer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use roomlink_common::GatewayError;

/// SDP direction attribute of the gateway side of a media line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    /// Media flows from the peer into the gateway, so it gets published to the room.
    pub fn inbound(self) -> bool {
        self != Self::SendOnly
    }

    /// Media flows from the gateway to the peer, so a room stream gets subscribed.
    pub fn outbound(self) -> bool {
        self != Self::RecvOnly
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOffer {
    pub codec: String,
    pub direction: MediaDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOffer {
    pub codec: String,
    /// Raw fmtp text (carries `profile-level-id` and legacy size classes).
    pub fmtp: String,
    pub direction: MediaDirection,
    pub red: bool,
    pub ulpfec: bool,
}

/// Negotiated capabilities of one call, as reported by the SIP stack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "CallInfoWire")]
pub struct CallInfo {
    pub peer_uri: String,
    pub audio: Option<AudioOffer>,
    pub video: Option<VideoOffer>,
}

impl CallInfo {
    /// Field-by-field media comparison used to drop no-op updates.
    ///
    /// Audio: presence, codec, direction. Video: presence, codec, fmtp,
    /// direction, red, ulpfec. The peer address is not compared.
    pub fn same_media(&self, other: &CallInfo) -> bool {
        self.audio == other.audio && self.video == other.video
    }

    pub fn publishes(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| a.direction.inbound())
            || self.video.as_ref().is_some_and(|v| v.direction.inbound())
    }
}

#[derive(Deserialize)]
struct CallInfoWire {
    #[serde(rename = "peerURI")]
    peer_uri: String,
    #[serde(default)]
    audio: bool,
    #[serde(default)]
    audio_codec: String,
    #[serde(default)]
    audio_dir: MediaDirection,
    #[serde(default)]
    video: bool,
    #[serde(default)]
    video_codec: String,
    #[serde(default, rename = "videoResolution")]
    video_resolution: String,
    #[serde(default)]
    video_dir: MediaDirection,
    #[serde(default)]
    support_red: bool,
    #[serde(default)]
    support_ulpfec: bool,
}

impl From<CallInfoWire> for CallInfo {
    fn from(wire: CallInfoWire) -> Self {
        let audio = wire.audio.then(|| AudioOffer {
            codec: wire.audio_codec,
            direction: wire.audio_dir,
        });
        let video = wire.video.then(|| VideoOffer {
            codec: wire.video_codec,
            fmtp: wire.video_resolution,
            direction: wire.video_dir,
            red: wire.support_red,
            ulpfec: wire.support_ulpfec,
        });
        Self {
            peer_uri: wire.peer_uri,
            audio,
            video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A stream advertised by the controller in its `join` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStream {
    pub id: String,
    /// `mixed` for composite room output, `forward` for a participant's own stream.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub info: StreamInfo,
    #[serde(default)]
    pub media: StreamMedia,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMedia {
    #[serde(default)]
    pub tracks: Vec<StreamTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTrack {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub optional: TrackOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackOptions {
    #[serde(default)]
    pub parameters: OptionalParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionalParameters {
    #[serde(default)]
    pub resolution: Vec<Resolution>,
}

impl RoomStream {
    pub const COMMON_MIX: &'static str = "common";

    /// The room's composite output stream.
    pub fn is_common_mix(&self) -> bool {
        self.kind == "mixed" && self.info.label.as_deref() == Some(Self::COMMON_MIX)
    }

    /// Resolutions the controller can scale this stream's video to.
    pub fn video_resolutions(&self) -> &[Resolution] {
        self.media
            .tracks
            .iter()
            .find(|t| t.kind == "video")
            .map(|t| t.optional.parameters.resolution.as_slice())
            .unwrap_or(&[])
    }
}

/// Per-kind media request of an outbound call (`mediaIn` / `mediaOut`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSpec {
    #[serde(default, deserialize_with = "object_or_false")]
    pub audio: Option<TrackSpec>,
    #[serde(default, deserialize_with = "object_or_false")]
    pub video: Option<TrackSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    /// Room stream to subscribe from (only meaningful in `mediaOut`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    /// Explicit output parameters; override resolution negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl MediaSpec {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn audio_from(&self) -> Option<&str> {
        self.audio.as_ref().and_then(|t| t.from.as_deref())
    }

    pub fn video_from(&self) -> Option<&str> {
        self.video.as_ref().and_then(|t| t.from.as_deref())
    }

    pub fn video_parameters(&self) -> Option<&Value> {
        self.video.as_ref().and_then(|t| t.parameters.as_ref())
    }
}

/// Accepts `false`/`null`/absent as "not requested" and an object as a track spec.
fn object_or_false<'de, D>(deserializer: D) -> Result<Option<TrackSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some(TrackSpec::default())),
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    Node,
    Worker,
    #[serde(other)]
    Other,
}

/// Cluster notification naming a failed node or worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultMessage {
    pub purpose: String,
    #[serde(rename = "type")]
    pub kind: FaultKind,
    pub id: String,
}

impl FaultMessage {
    /// Whether a session bound to `controller` lives on the failed process.
    pub fn hits(&self, controller: &str) -> bool {
        if self.purpose != "conference" {
            return false;
        }
        match self.kind {
            FaultKind::Node => controller == self.id,
            FaultKind::Worker => controller.starts_with(&self.id),
            FaultKind::Other => false,
        }
    }
}

/// Options accepted by `init`, in the agent's field naming.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitOptions {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sip_server: Option<String>,
    #[serde(default)]
    pub sip_user: Option<String>,
    #[serde(default)]
    pub sip_passwd: Option<String>,
}

/// Validated registration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipAccount {
    pub room_id: String,
    pub server: String,
    pub user: String,
    pub password: String,
}

impl InitOptions {
    pub fn validate(self) -> Result<SipAccount, GatewayError> {
        fn required(value: Option<String>, what: &str) -> Result<String, GatewayError> {
            match value {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(GatewayError::InvalidOptions(format!("Invalid {what}"))),
            }
        }

        Ok(SipAccount {
            room_id: required(self.room_id, "room id")?,
            server: required(self.sip_server, "sip server url")?,
            user: required(self.sip_user, "sip user id")?,
            password: self.sip_passwd.unwrap_or_default(),
        })
    }
}

/// Prefix `sip:` and append `@<server>` when the caller passed a bare user.
pub fn normalize_peer_uri(peer: &str, sip_server: &str) -> String {
    let mut uri = if peer.starts_with("sip:") {
        peer.to_string()
    } else {
        format!("sip:{peer}")
    };
    if !uri.contains('@') {
        uri.push('@');
        uri.push_str(sip_server);
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_info_from_stack_layout() {
        let info: CallInfo = serde_json::from_value(json!({
            "peerURI": "sip:alice@example.com",
            "audio": true,
            "audio_codec": "opus",
            "audio_dir": "sendrecv",
            "video": true,
            "video_codec": "H264",
            "videoResolution": "profile-level-id=42e01f;packetization-mode=1",
            "video_dir": "recvonly",
            "support_red": true,
            "support_ulpfec": false
        }))
        .unwrap();

        assert_eq!(info.peer_uri, "sip:alice@example.com");
        assert_eq!(info.audio.as_ref().unwrap().codec, "opus");
        let video = info.video.as_ref().unwrap();
        assert_eq!(video.direction, MediaDirection::RecvOnly);
        assert!(video.red);
        assert!(info.publishes());
    }

    #[test]
    fn absent_media_is_none() {
        let info: CallInfo = serde_json::from_value(json!({
            "peerURI": "sip:bob@example.com",
            "audio": false,
            "video": false
        }))
        .unwrap();
        assert!(info.audio.is_none());
        assert!(info.video.is_none());
        assert!(!info.publishes());
    }

    #[test]
    fn same_media_ignores_peer_but_not_flags() {
        let a = CallInfo {
            peer_uri: "sip:a@x".into(),
            audio: Some(AudioOffer {
                codec: "PCMU".into(),
                direction: MediaDirection::SendRecv,
            }),
            video: Some(VideoOffer {
                codec: "VP8".into(),
                fmtp: String::new(),
                direction: MediaDirection::SendRecv,
                red: false,
                ulpfec: false,
            }),
        };
        let mut b = a.clone();
        b.peer_uri = "sip:other@x".into();
        assert!(a.same_media(&b));

        b.video.as_mut().unwrap().ulpfec = true;
        assert!(!a.same_media(&b));
    }

    #[test]
    fn common_mix_detection_and_resolutions() {
        let stream: RoomStream = serde_json::from_value(json!({
            "id": "mix-1",
            "type": "mixed",
            "info": { "label": "common" },
            "media": { "tracks": [
                { "type": "audio" },
                { "type": "video", "optional": { "parameters": {
                    "resolution": [{ "width": 640, "height": 480 }]
                } } }
            ] }
        }))
        .unwrap();
        assert!(stream.is_common_mix());
        assert_eq!(stream.video_resolutions(), &[Resolution::new(640, 480)]);

        let forward: RoomStream =
            serde_json::from_value(json!({ "id": "f-1", "type": "forward" })).unwrap();
        assert!(!forward.is_common_mix());
        assert!(forward.video_resolutions().is_empty());
    }

    #[test]
    fn media_spec_accepts_false() {
        let spec: MediaSpec = serde_json::from_value(json!({
            "audio": { "from": "s1" },
            "video": false
        }))
        .unwrap();
        assert_eq!(spec.audio_from(), Some("s1"));
        assert!(!spec.has_video());
    }

    #[test]
    fn fault_matching() {
        let node = FaultMessage {
            purpose: "conference".into(),
            kind: FaultKind::Node,
            id: "ctrlA".into(),
        };
        assert!(node.hits("ctrlA"));
        assert!(!node.hits("ctrlA-1"));

        let worker = FaultMessage {
            kind: FaultKind::Worker,
            ..node.clone()
        };
        assert!(worker.hits("ctrlA-1"));
        assert!(!worker.hits("ctrlB"));

        let other = FaultMessage {
            purpose: "webrtc".into(),
            ..node
        };
        assert!(!other.hits("ctrlA"));
    }

    #[test]
    fn init_options_validation() {
        let err = InitOptions::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid options: Invalid room id");

        let ok = InitOptions {
            room_id: Some("room".into()),
            sip_server: Some("sip.example.com".into()),
            sip_user: Some("gw".into()),
            sip_passwd: None,
        }
        .validate()
        .unwrap();
        assert_eq!(ok.password, "");
    }

    #[test]
    fn peer_uri_normalization() {
        assert_eq!(normalize_peer_uri("1001", "pbx.local"), "sip:1001@pbx.local");
        assert_eq!(normalize_peer_uri("sip:1001@other", "pbx.local"), "sip:1001@other");
    }
}
