//! Media setup: binding a negotiated call to room streams, and re-binding it
//! when the peer re-negotiates.

use serde_json::json;
use tracing::{debug, error, info, warn};

use roomlink_common::ids::generate_id;
use roomlink_common::{ClientId, GatewayError, GatewayResult};

use super::{CallSessionManager, Ending};
use crate::controller::{
    PublishInfo, PublishMedia, SubscribeAudio, SubscribeInfo, SubscribeMedia, SubscribeVideo, VideoCodec,
};
use crate::negotiator::{self, AudioFormat, VideoFormat};
use crate::router::CONNECTION_KIND;
use crate::session::{CallSession, SessionState};
use crate::sip::{ConnectionParams, MediaConnection};
use crate::types::CallInfo;

/// Everything setup needs from the session, captured under the lock.
struct SetupPlan {
    controller: String,
    handle: String,
    publish: Option<(String, PublishInfo)>,
    subscribe: Option<(String, SubscribeInfo)>,
}

/// Snapshot taken when an update cycle starts.
struct UpdateStart {
    client: ClientId,
    controller: String,
    stream_id: Option<String>,
    subscription_id: Option<String>,
}

impl UpdateStart {
    fn of(session: &CallSession) -> Self {
        Self {
            client: session.id.clone(),
            controller: session.controller().to_string(),
            stream_id: session.published_stream_id.clone(),
            subscription_id: session.subscription_id.clone(),
        }
    }
}

impl CallSessionManager {
    pub async fn on_call_established(&self, info: CallInfo) {
        let client = self.state.lock().await.store.id_for_peer(&info.peer_uri);
        let Some(client) = client else {
            error!(peer = %info.peer_uri, "Call established for unknown peer, ignore it");
            return;
        };

        let connection = self
            .sip
            .create_connection(ConnectionParams::for_call(&info))
            .await;
        if !self
            .install_connection(&client, MediaConnection::new(connection))
            .await
        {
            return;
        }

        match self.setup_call(&client, info).await {
            Ok(()) => info!(client = %client, "Call established"),
            Err(e) => error!(client = %client, error = %e, "Error during call establish"),
        }
    }

    /// Publish the peer's media and subscribe it to its bound room streams.
    ///
    /// On any failure the whole session is unwound.
    pub(super) async fn setup_call(&self, client: &ClientId, info: CallInfo) -> GatewayResult<()> {
        let audio_format = info.audio.as_ref().and_then(|a| negotiator::audio_format(&a.codec));
        let video_format = info
            .video
            .as_ref()
            .map(|v| negotiator::video_format(&v.codec, &v.fmtp));

        let plan = {
            let mut state = self.state.lock().await;
            let session = state
                .store
                .get_mut(client)
                .ok_or_else(|| GatewayError::SessionNotFound(client.to_string()))?;
            self.plan_setup(session, &info, audio_format, video_format)?
        };

        let controller = self.controller(&plan.controller);

        let published = async {
            let Some((stream_id, publish)) = &plan.publish else {
                return Ok(());
            };
            if let Err(e) = self
                .router
                .add_local_source(stream_id, CONNECTION_KIND, &plan.handle)
                .await
            {
                warn!(client = %client, stream = %stream_id, error = %e, "Failed to add local source");
            }
            controller.publish(client, stream_id, publish).await
        };

        let subscribed = async {
            let Some((subscription_id, subscribe)) = &plan.subscribe else {
                return Ok(());
            };
            if let Err(e) = self
                .router
                .add_local_destination(subscription_id, CONNECTION_KIND, &plan.handle)
                .await
            {
                warn!(client = %client, subscription = %subscription_id, error = %e, "Failed to add local destination");
            }
            controller.subscribe(client, subscription_id, subscribe).await
        };

        let (published, subscribed) = tokio::join!(published, subscribed);
        if let Err(e) = published.and(subscribed) {
            warn!(client = %client, error = %e, "Call setup failed, unwinding session");
            self.terminate(client, Ending::LOCAL).await;
            return Err(GatewayError::SetupPartialFailure(e.to_string()));
        }

        let mut state = self.state.lock().await;
        let session = state
            .store
            .get_mut(client)
            .ok_or_else(|| GatewayError::SessionNotFound(client.to_string()))?;
        if session.state == SessionState::Joining {
            session.state = SessionState::Established;
        }
        session.current_info = Some(info);
        Ok(())
    }

    /// Decide what to publish and subscribe, and record the new ids on the
    /// session before any RPC goes out.
    fn plan_setup(
        &self,
        session: &mut CallSession,
        info: &CallInfo,
        audio_format: Option<AudioFormat>,
        video_format: Option<VideoFormat>,
    ) -> GatewayResult<SetupPlan> {
        let handle = session
            .connection
            .as_ref()
            .map(|c| c.handle().to_string())
            .ok_or_else(|| GatewayError::SetupPartialFailure("no media connection".into()))?;

        let publish = info.publishes().then(|| {
            let media = PublishMedia {
                audio: info
                    .audio
                    .as_ref()
                    .filter(|a| a.direction.inbound())
                    .and(audio_format.clone()),
                video: info
                    .video
                    .as_ref()
                    .filter(|v| v.direction.inbound())
                    .and(video_format.clone()),
            };
            let info = PublishInfo {
                kind: "sip",
                media,
                locality: self.locality(),
            };
            (generate_id(), info)
        });

        let audio = info
            .audio
            .as_ref()
            .filter(|a| a.direction.outbound())
            .and(session.audio_source.as_ref())
            .map(|source| SubscribeAudio {
                from: source.id.clone(),
                format: audio_format,
            });

        let video = match (info.video.as_ref(), session.video_source.as_ref(), video_format) {
            (Some(offer), Some(source), Some(format)) if offer.direction.outbound() => {
                let parameters = session
                    .media_out
                    .as_ref()
                    .and_then(|m| m.video_parameters().cloned())
                    .or_else(|| {
                        negotiator::nearest_resolution(&offer.fmtp, source.video_resolutions())
                            .map(|resolution| json!({ "resolution": resolution }))
                    });
                Some(SubscribeVideo {
                    from: source.id.clone(),
                    format: VideoCodec::from(&format),
                    parameters,
                })
            }
            _ => None,
        };

        let media = SubscribeMedia { audio, video };
        let subscribe = (!media.is_empty()).then(|| {
            let info = SubscribeInfo {
                kind: "sip",
                media,
                locality: self.locality(),
            };
            (generate_id(), info)
        });

        session.published_stream_id = publish.as_ref().map(|(id, _)| id.clone());
        session.subscription_id = subscribe.as_ref().map(|(id, _)| id.clone());
        debug!(
            client = %session.id,
            stream = ?session.published_stream_id,
            subscription = ?session.subscription_id,
            "Media setup planned"
        );

        Ok(SetupPlan {
            controller: session.controller().to_string(),
            handle,
            publish,
            subscribe,
        })
    }

    // ─── Updates ──────────────────────────────────────────────────────

    /// Apply a re-negotiation. Updates arriving mid-flight collapse into the
    /// latest one, which is applied after the current cycle finishes.
    pub async fn on_call_updated(&self, info: CallInfo) {
        let mut next = self.begin_update(info).await;
        while let Some((start, info)) = next.take() {
            next = self.apply_update(start, info).await;
        }
    }

    /// Decide whether `info` starts an update cycle, marking the session
    /// `Updating` if it does.
    async fn begin_update(&self, info: CallInfo) -> Option<(UpdateStart, CallInfo)> {
        let mut state = self.state.lock().await;
        let Some(client) = state.store.id_for_peer(&info.peer_uri) else {
            warn!(peer = %info.peer_uri, "Call not established, ignore update");
            return None;
        };
        let session = state.store.get_mut(&client)?;
        let Some(current) = &session.current_info else {
            warn!(client = %session.id, "Call not established, ignore update");
            return None;
        };
        if session.is_updating() {
            warn!(client = %session.id, "Too frequent call update request, process it later");
            session.pending_info = Some(info);
            return None;
        }
        if current.same_media(&info) {
            debug!(client = %session.id, "Same as current info, ignore update");
            return None;
        }
        session.state = SessionState::Updating;
        Some((UpdateStart::of(session), info))
    }

    /// One update cycle. Returns the next cycle when a descriptor was queued
    /// meanwhile; the session stays `Updating` across the hand-off.
    async fn apply_update(&self, start: UpdateStart, info: CallInfo) -> Option<(UpdateStart, CallInfo)> {
        let client = &start.client;
        let controller = self.controller(&start.controller);
        let unpublished = async {
            if let Some(stream_id) = &start.stream_id {
                if let Err(e) = controller.unpublish(client, stream_id).await {
                    warn!(client = %client, error = %e, "Unpublish during update failed");
                }
            }
        };
        let unsubscribed = async {
            if let Some(subscription_id) = &start.subscription_id {
                if let Err(e) = controller.unsubscribe(client, subscription_id).await {
                    warn!(client = %client, error = %e, "Unsubscribe during update failed");
                }
            }
        };
        tokio::join!(unpublished, unsubscribed);

        let detached = {
            let mut state = self.state.lock().await;
            let session = state.store.get_mut(client)?;
            (session.take_bindings(), session.connection.take())
        };
        let (bindings, previous) = detached;
        if let Some(previous) = previous {
            previous.close();
        }
        self.unbind(bindings).await;

        let connection = self
            .sip
            .create_connection(ConnectionParams::for_call(&info))
            .await;
        if !self
            .install_connection(client, MediaConnection::new(connection))
            .await
        {
            return None;
        }

        if let Err(e) = self.setup_call(client, info).await {
            error!(client = %client, error = %e, "Error during call update");
            return None;
        }
        info!(client = %client, "Call updated");

        let mut state = self.state.lock().await;
        let session = state.store.get_mut(client)?;
        let queued = session.pending_info.take();
        match queued {
            Some(next) if session.current_info.as_ref().is_none_or(|c| !c.same_media(&next)) => {
                debug!(client = %client, "Applying update queued during previous cycle");
                Some((UpdateStart::of(session), next))
            }
            _ => {
                session.state = SessionState::Established;
                None
            }
        }
    }
}
