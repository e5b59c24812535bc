//! Call session manager: the gateway's process surface.
//!
//! Owns every [`CallSession`] and drives it through its lifecycle:
//! admission, room join, media setup and updates, teardown. SIP events arrive
//! on a channel consumed by [`CallSessionManager::run`], in order per peer;
//! the process API (`init`, `make_call`, `drop_call`, ...) is called directly.
//!
//! All shared state sits behind one async mutex. The lock is taken for short
//! synchronous sections only and never held while a collaborator is awaited;
//! after every await the session is looked up again because it may be gone.

mod setup;


use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use roomlink_common::config::AgentConfig;
use roomlink_common::{ClientId, GatewayError, GatewayResult};

use crate::controller::{ControllerClient, Locality, Participant};
use crate::locator::{ControllerLocator, RetryPolicy};
use crate::router::{LinkupSources, MediaRouter};
use crate::session::{CallSession, LocalBindings, SessionState};
use crate::sip::{MediaConnection, SipEvent, SipStack};
use crate::store::CallSessionStore;
use crate::transport::RpcTransport;
use crate::types::{FaultMessage, InitOptions, MediaSpec, RoomStream, normalize_peer_uri};

/// Who this gateway is within the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayIdentity {
    pub agent_id: String,
    pub node_id: String,
    pub cluster: String,
    pub internal_ip: String,
    pub internal_port: u16,
}

impl From<&AgentConfig> for GatewayIdentity {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            agent_id: cfg.id.clone(),
            node_id: cfg.node_id.clone(),
            cluster: cfg.cluster.clone(),
            internal_ip: cfg.internal_ip.clone(),
            internal_port: cfg.internal_port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Serving,
    /// Draining: every call is torn down and new ones are refused.
    Recycling,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalAddress {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub mode: GatewayMode,
    pub room_id: Option<String>,
    pub calls: usize,
    pub updating: usize,
}

/// Room and SIP server this gateway registered for.
#[derive(Debug, Clone)]
struct RoomBinding {
    room_id: String,
    sip_server: String,
}

struct GatewayState {
    mode: GatewayMode,
    binding: Option<RoomBinding>,
    registration: Option<oneshot::Sender<bool>>,
    store: CallSessionStore,
}

impl GatewayState {
    /// Admission rules shared by both call directions.
    fn admit(&self, peer_uri: &str) -> GatewayResult<&RoomBinding> {
        if self.mode == GatewayMode::Recycling {
            return Err(GatewayError::DrainRejected);
        }
        let binding = self.binding.as_ref().ok_or(GatewayError::NotInitialized)?;
        if self.store.contains_peer(peer_uri) {
            return Err(GatewayError::DuplicatePeer(peer_uri.to_string()));
        }
        Ok(binding)
    }
}

/// How a session ends. Decides which side effects teardown performs.
#[derive(Debug, Clone, Copy)]
struct Ending {
    hangup: bool,
    leave: bool,
}

impl Ending {
    /// The peer hung up; the dialog is already gone.
    const REMOTE: Self = Self {
        hangup: false,
        leave: true,
    };
    /// The gateway ends the call.
    const LOCAL: Self = Self {
        hangup: true,
        leave: true,
    };
    /// The controller is gone or never admitted the participant.
    const DETACHED: Self = Self {
        hangup: true,
        leave: false,
    };
}

/// Events waiting behind a running handler, per peer. A peer has an entry
/// exactly while a task is draining its events.
type PeerQueues = Arc<Mutex<HashMap<String, VecDeque<SipEvent>>>>;

pub struct CallSessionManager {
    identity: GatewayIdentity,
    sip: Arc<dyn SipStack>,
    rpc: Arc<dyn RpcTransport>,
    router: Arc<dyn MediaRouter>,
    locator: ControllerLocator,
    state: Mutex<GatewayState>,
}

impl CallSessionManager {
    pub fn new(
        identity: GatewayIdentity,
        policy: RetryPolicy,
        sip: Arc<dyn SipStack>,
        rpc: Arc<dyn RpcTransport>,
        router: Arc<dyn MediaRouter>,
    ) -> Self {
        let locator = ControllerLocator::new(rpc.clone(), identity.cluster.clone(), policy);
        Self {
            identity,
            sip,
            rpc,
            router,
            locator,
            state: Mutex::new(GatewayState {
                mode: GatewayMode::Serving,
                binding: None,
                registration: None,
                store: CallSessionStore::new(),
            }),
        }
    }

    fn controller(&self, address: &str) -> ControllerClient {
        ControllerClient::new(self.rpc.clone(), address)
    }

    fn locality(&self) -> Locality {
        Locality {
            agent: self.identity.agent_id.clone(),
            node: self.identity.node_id.clone(),
        }
    }

    // ─── Event loop ───────────────────────────────────────────────────

    /// Consume SIP events until the sender side closes.
    ///
    /// Peers are handled concurrently so a slow discovery never blocks other
    /// calls, but the events of one peer run one after another in arrival
    /// order.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SipEvent>) {
        let queues: PeerQueues = Arc::default();
        while let Some(event) = events.recv().await {
            let Some(peer) = event.peer_uri().map(str::to_string) else {
                let manager = Arc::clone(&self);
                tokio::spawn(async move {
                    manager.handle_sip_event(event).await;
                });
                continue;
            };

            {
                let mut pending = queues.lock().await;
                if let Some(queue) = pending.get_mut(&peer) {
                    queue.push_back(event);
                    continue;
                }
                pending.insert(peer.clone(), VecDeque::new());
            }
            tokio::spawn(Arc::clone(&self).drain_peer(queues.clone(), peer, event));
        }
        debug!("SIP event channel closed");
    }

    /// Handle `first`, then every event queued behind it for the same peer.
    async fn drain_peer(self: Arc<Self>, queues: PeerQueues, peer: String, first: SipEvent) {
        let mut next = Some(first);
        while let Some(event) = next {
            self.handle_sip_event(event).await;
            let mut pending = queues.lock().await;
            next = pending.get_mut(&peer).and_then(VecDeque::pop_front);
            if next.is_none() {
                pending.remove(&peer);
            }
        }
    }

    pub async fn handle_sip_event(&self, event: SipEvent) {
        match event {
            SipEvent::IncomingCall { peer_uri } => self.on_incoming_call(peer_uri).await,
            SipEvent::CallEstablished(info) => self.on_call_established(info).await,
            SipEvent::CallUpdated(info) => self.on_call_updated(info).await,
            SipEvent::CallClosed { peer_uri } => self.on_call_closed(&peer_uri).await,
            SipEvent::RegisterOk => self.on_registration(true).await,
            SipEvent::RegisterFailed => self.on_registration(false).await,
            SipEvent::MediaUpdate {
                peer_uri,
                direction,
                update,
            } => self.on_media_update(&peer_uri, &direction, update).await,
        }
    }

    // ─── Registration ─────────────────────────────────────────────────

    /// Register with the SIP server and bind the gateway to a room.
    ///
    /// A second `init` while a registration exists is a no-op success.
    pub async fn init(&self, options: InitOptions) -> GatewayResult<()> {
        let account = options.validate()?;

        let registered = {
            let mut state = self.state.lock().await;
            if state.binding.is_some() {
                info!("SIP gateway already exists, ignore init request");
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.registration = Some(tx);
            state.binding = Some(RoomBinding {
                room_id: account.room_id.clone(),
                sip_server: account.server.clone(),
            });
            rx
        };

        info!(server = %account.server, user = %account.user, room = %account.room_id, "Registering SIP gateway");
        if !self
            .sip
            .register(&account.server, &account.user, &account.password, &account.user)
            .await
        {
            error!(server = %account.server, "SIP stack refused to register");
            self.abandon_registration().await;
            return Err(GatewayError::RegistrationFailed);
        }

        match registered.await {
            Ok(true) => {
                info!(room = %account.room_id, "SIP gateway registered");
                Ok(())
            }
            _ => {
                self.abandon_registration().await;
                Err(GatewayError::RegistrationFailed)
            }
        }
    }

    async fn on_registration(&self, ok: bool) {
        let waiter = self.state.lock().await.registration.take();
        if !ok {
            error!("SIP registration failed");
        }
        match waiter {
            Some(tx) => {
                let _ = tx.send(ok);
            }
            None => debug!(ok, "Registration result without a pending init"),
        }
    }

    async fn abandon_registration(&self) {
        {
            let mut state = self.state.lock().await;
            state.binding = None;
            state.registration = None;
        }
        self.sip.close().await;
    }

    // ─── Incoming calls ───────────────────────────────────────────────

    pub async fn on_incoming_call(&self, peer_uri: String) {
        let room = {
            let state = self.state.lock().await;
            state.admit(&peer_uri).map(|b| b.room_id.clone())
        };

        let admitted = match room {
            Ok(room) => self.join_incoming(&peer_uri, &room).await,
            Err(e) => Err(e),
        };

        match admitted {
            Ok(client) => {
                info!(client = %client, peer = %peer_uri, "Accept incoming call");
                self.sip.accept(&peer_uri).await;
            }
            Err(GatewayError::DrainRejected) => {
                info!(peer = %peer_uri, "Working in recycling mode, reject incoming call");
                self.sip.reject(&peer_uri).await;
            }
            Err(e) => {
                error!(peer = %peer_uri, error = %e, "Reject incoming call");
                self.sip.reject(&peer_uri).await;
            }
        }
    }

    async fn join_incoming(&self, peer_uri: &str, room: &str) -> GatewayResult<ClientId> {
        let address = self.locator.locate(room).await?;
        let client = ClientId::incoming();

        {
            // Discovery may have outlived a drain, a clean or a racing call.
            let mut state = self.state.lock().await;
            state.admit(peer_uri)?;
            state
                .store
                .insert(CallSession::new(client.clone(), peer_uri, address.as_str()))?;
        }
        debug!(client = %client, controller = %address, "Session created, joining room");

        let controller = self.controller(&address);
        let participant = Participant::sip(&client, peer_uri, &self.identity.node_id);
        let streams = match controller.join(room, &participant).await {
            Ok(streams) => streams,
            Err(e) => {
                self.state.lock().await.store.remove(&client);
                return Err(e);
            }
        };

        let mixed = streams.into_iter().find(RoomStream::is_common_mix);
        let bound = {
            let mut state = self.state.lock().await;
            let recycling = state.mode == GatewayMode::Recycling;
            let bound = state.store.get_mut(&client).map(|session| {
                if let Some(stream) = mixed.as_ref().filter(|_| !recycling) {
                    session.audio_source = Some(stream.clone());
                    session.video_source = Some(stream.clone());
                    return Ok(());
                }
                if recycling {
                    Err(GatewayError::DrainRejected)
                } else {
                    Err(GatewayError::JoinRejected("No mixed stream in room".into()))
                }
            });
            if matches!(bound, Some(Err(_))) {
                state.store.remove(&client);
            }
            bound.unwrap_or_else(|| {
                Err(if recycling {
                    GatewayError::DrainRejected
                } else {
                    GatewayError::SessionNotFound(client.to_string())
                })
            })
        };

        if let Err(e) = bound {
            controller.leave(&client);
            return Err(e);
        }
        Ok(client)
    }

    // ─── Outgoing calls ───────────────────────────────────────────────

    /// Call `peer` and bridge it into the room through `controller`.
    pub async fn make_call(
        &self,
        peer: &str,
        media_in: MediaSpec,
        media_out: MediaSpec,
        controller: &str,
    ) -> GatewayResult<ClientId> {
        let client = ClientId::outgoing();
        let (peer_uri, room) = {
            let mut state = self.state.lock().await;
            let peer_uri = match &state.binding {
                Some(binding) => normalize_peer_uri(peer, &binding.sip_server),
                None => peer.to_string(),
            };
            let room = state.admit(&peer_uri)?.room_id.clone();
            if media_in.has_audio() != media_out.has_audio() || media_in.has_video() != media_out.has_video() {
                error!(peer = %peer_uri, "Inconsistent audio/video in/out requirement");
                return Err(GatewayError::NegotiationMismatch);
            }
            // Reserve the peer before dialing so a racing incoming call is refused.
            state.store.insert(
                CallSession::new(client.clone(), peer_uri.as_str(), controller).with_media_out(media_out.clone()),
            )?;
            (peer_uri, room)
        };

        if !self
            .sip
            .make_call(&peer_uri, media_in.has_audio(), media_in.has_video())
            .await
        {
            error!(peer = %peer_uri, "SIP stack failed to make the call");
            self.state.lock().await.store.remove(&client);
            return Err(GatewayError::SipCallFailed(peer_uri));
        }

        if let Err(e) = self.still_admitted(&client).await {
            warn!(client = %client, peer = %peer_uri, error = %e, "Session ended while dialing, hanging up");
            self.state.lock().await.store.remove(&client);
            self.sip.hangup(&peer_uri).await;
            return Err(e);
        }
        info!(client = %client, peer = %peer_uri, controller, "Outgoing call placed, joining room");

        let participant = Participant::sip(&client, &peer_uri, &self.identity.node_id);
        let streams = match self.controller(controller).join(&room, &participant).await {
            Ok(streams) => streams,
            Err(e) => {
                error!(client = %client, error = %e, "Joining room failed");
                self.terminate(&client, Ending::DETACHED).await;
                return Err(GatewayError::JoinRejected("Joining room failed".into()));
            }
        };

        let bound = {
            let mut state = self.state.lock().await;
            state.store.get_mut(&client).map(|session| {
                for stream in &streams {
                    if media_out.audio_from() == Some(stream.id.as_str()) {
                        session.audio_source = Some(stream.clone());
                    }
                    if media_out.video_from() == Some(stream.id.as_str()) {
                        session.video_source = Some(stream.clone());
                    }
                }
                session.has_source()
            })
        };

        match bound {
            Some(true) => Ok(client),
            Some(false) => {
                error!(client = %client, "No available streams in room");
                self.terminate(&client, Ending::LOCAL).await;
                Err(GatewayError::JoinRejected("No available streams in room".into()))
            }
            None => {
                // Torn down while joining; the join may have landed after its leave.
                self.controller(controller).leave(&client);
                match self.still_admitted(&client).await {
                    Err(e) => Err(e),
                    Ok(()) => Err(GatewayError::SessionNotFound(client.to_string())),
                }
            }
        }
    }

    /// Whether a session created earlier survived the awaits since. Drain
    /// removes every session, so a missing one while recycling means drain.
    async fn still_admitted(&self, client: &ClientId) -> GatewayResult<()> {
        let state = self.state.lock().await;
        if state.mode == GatewayMode::Recycling {
            Err(GatewayError::DrainRejected)
        } else if state.store.get(client).is_none() {
            Err(GatewayError::SessionNotFound(client.to_string()))
        } else {
            Ok(())
        }
    }

    // ─── Teardown ─────────────────────────────────────────────────────

    pub async fn on_call_closed(&self, peer_uri: &str) {
        let client = self.state.lock().await.store.id_for_peer(peer_uri);
        match client {
            Some(client) => {
                debug!(client = %client, peer = %peer_uri, "Call closed by peer");
                self.terminate(&client, Ending::REMOTE).await;
            }
            None => debug!(peer = %peer_uri, "Call closed for unknown peer"),
        }
    }

    /// Controller-initiated removal of a participant.
    pub async fn drop_call(&self, client: &ClientId) {
        if !self.terminate(client, Ending::LOCAL).await {
            debug!(client = %client, "Drop for unknown session");
        }
    }

    /// Hang up a call placed with `make_call`. Unknown ids succeed.
    pub async fn end_call(&self, client: &ClientId) -> GatewayResult<()> {
        if !self.terminate(client, Ending::LOCAL).await {
            debug!(client = %client, "End call for unknown session");
        }
        Ok(())
    }

    /// Remove a session and release everything it holds. Returns `false` if
    /// the session was already gone.
    async fn terminate(&self, client: &ClientId, ending: Ending) -> bool {
        let Some(mut session) = self.state.lock().await.store.remove(client) else {
            return false;
        };

        if ending.hangup {
            self.sip.hangup(&session.peer_uri).await;
        }
        self.unbind(session.take_bindings()).await;
        if let Some(connection) = session.connection.take() {
            connection.close();
        }
        if ending.leave {
            self.controller(session.controller()).leave(&session.id);
        }

        info!(client = %session.id, peer = %session.peer_uri, "Call session terminated");
        true
    }

    /// Remove fabric registrations. Failures are logged and swallowed.
    async fn unbind(&self, bindings: LocalBindings) {
        let ids = [bindings.stream_id, bindings.subscription_id];
        let removals = ids.iter().flatten().map(|id| async move {
            if let Err(e) = self.router.remove_connection(id).await {
                warn!(connection = %id, error = %e, "Failed to remove local connection");
            }
        });
        join_all(removals).await;
    }

    /// Install a freshly created connection, closing any previous one. If the
    /// session vanished meanwhile the new connection is closed instead.
    async fn install_connection(&self, client: &ClientId, connection: MediaConnection) -> bool {
        let mut state = self.state.lock().await;
        match state.store.get_mut(client) {
            Some(session) => {
                if let Some(previous) = session.connection.replace(connection) {
                    previous.close();
                }
                true
            }
            None => {
                connection.close();
                false
            }
        }
    }

    // ─── Cluster events ───────────────────────────────────────────────

    /// Tear down every session bound to a failed controller node or worker.
    pub async fn on_fault_detected(&self, fault: FaultMessage) {
        let victims = self
            .state
            .lock()
            .await
            .store
            .ids_by_controller(|controller| fault.hits(controller));
        if victims.is_empty() {
            return;
        }

        error!(fault = %fault.id, count = victims.len(), "Fault detected on conference controller, terminating calls");
        join_all(victims.iter().map(|client| self.terminate(client, Ending::DETACHED))).await;
    }

    pub async fn on_media_update(&self, peer_uri: &str, direction: &str, update: Value) {
        if direction != "in" {
            return;
        }
        let target = {
            let state = self.state.lock().await;
            state
                .store
                .id_for_peer(peer_uri)
                .and_then(|id| state.store.get(&id))
                .and_then(|s| Some((s.controller().to_string(), s.published_stream_id.clone()?)))
        };
        match target {
            Some((address, stream_id)) => {
                debug!(peer = %peer_uri, stream = %stream_id, "Forward media update");
                self.controller(&address)
                    .notify_media_update(&stream_id, direction, update);
            }
            None => debug!(peer = %peer_uri, "Media update without a published stream"),
        }
    }

    // ─── Drain ────────────────────────────────────────────────────────

    /// Tear down every call and refuse new ones until [`exit_drain`](Self::exit_drain).
    pub async fn enter_drain(&self) {
        let clients = {
            let mut state = self.state.lock().await;
            state.mode = GatewayMode::Recycling;
            state.store.ids()
        };
        info!(count = clients.len(), "Entering recycling mode");
        join_all(clients.iter().map(|client| self.terminate(client, Ending::LOCAL))).await;
    }

    pub async fn exit_drain(&self) {
        self.state.lock().await.mode = GatewayMode::Serving;
        info!("Leaving recycling mode");
    }

    /// Drop every call, unregister and forget the room binding.
    pub async fn clean(&self) {
        info!("Clean SIP gateway");
        self.enter_drain().await;
        self.sip.close().await;
        {
            let mut state = self.state.lock().await;
            state.binding = None;
            state.registration = None;
        }
        self.exit_drain().await;
    }

    pub async fn close(&self) {
        let initialized = self.state.lock().await.binding.is_some();
        if initialized {
            self.clean().await;
        }
    }

    // ─── Process API ──────────────────────────────────────────────────

    pub async fn publish(&self, stream_id: &str, stream_type: &str, _options: Value) -> GatewayResult<()> {
        debug!(stream = stream_id, stream_type, "publish");
        Ok(())
    }

    pub async fn unpublish(&self, stream_id: &str) -> GatewayResult<()> {
        debug!(stream = stream_id, "unpublish");
        Ok(())
    }

    pub async fn subscribe(&self, subscription_id: &str, subscription_type: &str, _options: Value) -> GatewayResult<()> {
        debug!(subscription = subscription_id, subscription_type, "subscribe");
        Ok(())
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> GatewayResult<()> {
        debug!(subscription = subscription_id, "unsubscribe");
        Ok(())
    }

    pub async fn linkup(&self, connection_id: &str, from: &LinkupSources) -> GatewayResult<()> {
        self.router.linkup(connection_id, from).await?;
        Ok(())
    }

    pub async fn cutoff(&self, connection_id: &str) -> GatewayResult<()> {
        self.router.cutoff(connection_id).await?;
        Ok(())
    }

    pub async fn notify(&self, participant: &str, event: &str, _data: Value) -> GatewayResult<()> {
        debug!(participant, event, "notify");
        Ok(())
    }

    pub fn keep_alive(&self) -> bool {
        true
    }

    pub fn internal_address(&self) -> InternalAddress {
        InternalAddress {
            ip: self.identity.internal_ip.clone(),
            port: self.identity.internal_port,
        }
    }

    /// Ask the session's controller for the room as seen by this participant.
    pub async fn query_room(&self, client: &ClientId) -> GatewayResult<Value> {
        let (address, room) = {
            let state = self.state.lock().await;
            let session = state
                .store
                .get(client)
                .ok_or_else(|| GatewayError::SessionNotFound(client.to_string()))?;
            let room = state
                .binding
                .as_ref()
                .map(|b| b.room_id.clone())
                .ok_or(GatewayError::NotInitialized)?;
            (session.controller().to_string(), room)
        };
        self.controller(&address).query(client, &room).await
    }

    pub async fn stats(&self) -> GatewayStats {
        let state = self.state.lock().await;
        GatewayStats {
            mode: state.mode,
            room_id: state.binding.as_ref().map(|b| b.room_id.clone()),
            calls: state.store.len(),
            updating: state
                .store
                .sessions()
                .filter(|s| s.state == SessionState::Updating)
                .count(),
        }
    }
}
