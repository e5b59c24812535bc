//! Typed calls to a conference controller.
//!
//! The controller speaks positional JSON arguments; this module owns the
//! payload shapes so the manager works with structs instead of `json!` blobs.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use roomlink_common::{ClientId, GatewayError, GatewayResult, RpcError};

use crate::negotiator::{AudioFormat, VideoFormat};
use crate::transport::RpcTransport;
use crate::types::RoomStream;

/// Where a stream is produced or consumed, as a placement hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locality {
    pub agent: String,
    pub node: String,
}

/// Participant announced on `join`.
#[derive(Debug, Clone, Serialize)]
pub struct Participant<'a> {
    pub id: &'a ClientId,
    pub user: &'a str,
    pub role: &'static str,
    pub portal: &'a str,
}

impl<'a> Participant<'a> {
    pub fn sip(id: &'a ClientId, peer_uri: &'a str, portal: &'a str) -> Self {
        Self {
            id,
            user: peer_uri,
            role: "sip",
            portal,
        }
    }
}

// ─── Publish ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media: PublishMedia,
    pub locality: Locality,
}

/// Published tracks. An absent kind is sent as `false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishMedia {
    #[serde(serialize_with = "format_or_false")]
    pub audio: Option<AudioFormat>,
    #[serde(serialize_with = "format_or_false")]
    pub video: Option<VideoFormat>,
}

fn format_or_false<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match value {
        Some(format) => format.serialize(serializer),
        None => serializer.serialize_bool(false),
    }
}

// ─── Subscribe ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media: SubscribeMedia,
    pub locality: Locality,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscribeMedia {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<SubscribeAudio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<SubscribeVideo>,
}

impl SubscribeMedia {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeAudio {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeVideo {
    pub from: String,
    pub format: VideoCodec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoCodec {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl From<&VideoFormat> for VideoCodec {
    fn from(format: &VideoFormat) -> Self {
        Self {
            codec: format.codec.clone(),
            profile: format.profile.clone(),
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JoinAnswer {
    room: JoinedRoom,
}

#[derive(Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    streams: Vec<RoomStream>,
}

/// RPC client bound to one controller address.
pub struct ControllerClient {
    rpc: Arc<dyn RpcTransport>,
    address: String,
}

impl ControllerClient {
    pub fn new(rpc: Arc<dyn RpcTransport>, address: impl Into<String>) -> Self {
        Self {
            rpc,
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, method: &str, args: Value) -> GatewayResult<Value> {
        self.rpc
            .invoke(&self.address, method, args)
            .await
            .map_err(|reason| GatewayError::rpc(method, reason))
    }

    /// Join `room` and return the streams it currently carries.
    pub async fn join(&self, room: &str, participant: &Participant<'_>) -> GatewayResult<Vec<RoomStream>> {
        let answer = self.call("join", json!([room, participant])).await?;
        let joined: JoinAnswer = serde_json::from_value(answer).map_err(|e| {
            GatewayError::rpc("join", RpcError::Failed(format!("malformed join answer: {e}")))
        })?;
        Ok(joined.room.streams)
    }

    /// Fire-and-forget. Teardown never waits on the controller.
    pub fn leave(&self, client: &ClientId) {
        debug!(client = %client, controller = %self.address, "Leaving room");
        self.rpc.cast(&self.address, "leave", json!([client]));
    }

    pub async fn query(&self, client: &ClientId, room: &str) -> GatewayResult<Value> {
        self.call("query", json!([client, room])).await
    }

    /// Publish a stream and mix it into the room's common output.
    pub async fn publish(&self, client: &ClientId, stream_id: &str, info: &PublishInfo) -> GatewayResult<()> {
        self.call("publish", json!([client, stream_id, info])).await?;
        debug!(client = %client, stream = stream_id, "Published, adding to common mix");
        let control = json!({ "id": stream_id, "operation": "mix", "data": "common" });
        self.call("streamControl", json!([client, stream_id, control])).await?;
        Ok(())
    }

    pub async fn subscribe(&self, client: &ClientId, subscription_id: &str, info: &SubscribeInfo) -> GatewayResult<()> {
        self.call("subscribe", json!([client, subscription_id, info]))
            .await
            .map(|_| ())
    }

    pub async fn unpublish(&self, client: &ClientId, stream_id: &str) -> GatewayResult<()> {
        self.call("unpublish", json!([client, stream_id])).await.map(|_| ())
    }

    pub async fn unsubscribe(&self, client: &ClientId, subscription_id: &str) -> GatewayResult<()> {
        self.call("unsubscribe", json!([client, subscription_id]))
            .await
            .map(|_| ())
    }

    pub fn notify_media_update(&self, stream_id: &str, direction: &str, update: Value) {
        self.rpc
            .cast(&self.address, "onMediaUpdate", json!([stream_id, direction, update]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiator::{audio_format, video_format};
    use crate::testing::FakeTransport;

    fn locality() -> Locality {
        Locality {
            agent: "agent-1".into(),
            node: "node-1".into(),
        }
    }

    #[test]
    fn publish_info_sends_false_for_missing_kind() {
        let info = PublishInfo {
            kind: "sip",
            media: PublishMedia {
                audio: audio_format("PCMU"),
                video: None,
            },
            locality: locality(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "type": "sip",
                "media": { "audio": { "codec": "pcmu" }, "video": false },
                "locality": { "agent": "agent-1", "node": "node-1" }
            })
        );
    }

    #[test]
    fn subscribe_video_carries_codec_and_profile_only() {
        let format = video_format("H264", "profile-level-id=42e01f");
        let media = SubscribeMedia {
            audio: None,
            video: Some(SubscribeVideo {
                from: "mix".into(),
                format: VideoCodec::from(&format),
                parameters: Some(json!({ "resolution": { "width": 352, "height": 288 } })),
            }),
        };
        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            json!({ "video": {
                "from": "mix",
                "format": { "codec": "h264", "profile": "CB" },
                "parameters": { "resolution": { "width": 352, "height": 288 } }
            } })
        );
    }

    #[tokio::test]
    async fn publish_adds_stream_to_common_mix() {
        let rpc = Arc::new(FakeTransport::new());
        let client = ClientId::from("SipIn1");
        let ctl = ControllerClient::new(rpc.clone(), "ctrl");
        let info = PublishInfo {
            kind: "sip",
            media: PublishMedia {
                audio: audio_format("opus"),
                video: None,
            },
            locality: locality(),
        };

        ctl.publish(&client, "s1", &info).await.unwrap();

        let control = rpc.calls_to("streamControl");
        assert_eq!(control.len(), 1);
        assert_eq!(
            control[0].args,
            json!(["SipIn1", "s1", { "id": "s1", "operation": "mix", "data": "common" }])
        );
    }

    #[tokio::test]
    async fn join_returns_room_streams() {
        let rpc = Arc::new(FakeTransport::new());
        rpc.respond("join", |_, _| {
            Ok(json!({ "room": { "streams": [
                { "id": "mix", "type": "mixed", "info": { "label": "common" } }
            ] } }))
        });
        let client = ClientId::from("SipIn1");
        let ctl = ControllerClient::new(rpc.clone(), "ctrl");

        let streams = ctl
            .join("room-1", &Participant::sip(&client, "sip:a@x", "node-1"))
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);
        assert!(streams[0].is_common_mix());
        assert_eq!(
            rpc.calls_to("join")[0].args,
            json!(["room-1", { "id": "SipIn1", "user": "sip:a@x", "role": "sip", "portal": "node-1" }])
        );
    }

    #[test]
    fn leave_is_cast_without_waiting() {
        let rpc = Arc::new(FakeTransport::new());
        let client = ClientId::from("SipIn1");
        ControllerClient::new(rpc.clone(), "ctrl").leave(&client);

        assert_eq!(rpc.total(), 0);
        let leaves = rpc.casts_to("leave");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].target, "ctrl");
        assert_eq!(leaves[0].args, json!(["SipIn1"]));
    }

    #[tokio::test]
    async fn malformed_join_answer_is_an_rpc_error() {
        let rpc = Arc::new(FakeTransport::new());
        rpc.respond("join", |_, _| Ok(json!("nope")));
        let client = ClientId::from("SipIn1");
        let ctl = ControllerClient::new(rpc, "ctrl");

        let err = ctl
            .join("room-1", &Participant::sip(&client, "sip:a@x", "node-1"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RPC_ERROR");
    }
}
