//! Control API: the gateway's process surface over HTTP.
//!
//! Routes:
//! - GET    /health               Liveness (keep-alive)
//! - GET    /internal-address     Media-fabric address of this node
//! - GET    /stats                Mode, room binding and call counts
//! - POST   /init                 Register with the SIP server for a room
//! - POST   /calls                Place an outbound call
//! - DELETE /calls/{client_id}    End an outbound call
//! - POST   /calls/{client_id}/drop  Controller-initiated removal
//! - GET    /calls/{client_id}/room  Room as seen by the participant
//! - POST   /notify               Participant notification (ack)
//! - POST   /faults               Cluster fault notification
//! - POST   /clean                Drop all calls and unregister
//! - POST   /drain, DELETE /drain   Enter / leave recycling mode
//! - POST   /linkup, /cutoff/{id}   Internal media links
//! - POST   /publish, /unpublish, /subscribe, /unsubscribe  Acks
//! - POST   /sip/events           Events from the SIP user agent

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use roomlink_common::{ClientId, GatewayError, GatewayResult};
use roomlink_sip::types::{FaultMessage, InitOptions, MediaSpec};
use roomlink_sip::{CallSessionManager, GatewayStats, InternalAddress, LinkupSources, SipEvent};

/// Shared state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CallSessionManager>,
    /// Feeds the manager's event loop.
    pub events: mpsc::Sender<SipEvent>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal-address", get(internal_address))
        .route("/stats", get(stats))
        .route("/init", post(init))
        .route("/calls", post(make_call))
        .route("/calls/{client_id}", delete(end_call))
        .route("/calls/{client_id}/drop", post(drop_call))
        .route("/calls/{client_id}/room", get(query_room))
        .route("/notify", post(notify))
        .route("/faults", post(fault))
        .route("/clean", post(clean))
        .route("/drain", post(enter_drain).delete(exit_drain))
        .route("/linkup", post(linkup))
        .route("/cutoff/{connection_id}", post(cutoff))
        .route("/publish", post(publish))
        .route("/unpublish", post(unpublish))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/sip/events", post(sip_event))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.manager.keep_alive() { "ok" } else { "down" },
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn internal_address(State(state): State<AppState>) -> Json<InternalAddress> {
    Json(state.manager.internal_address())
}

async fn stats(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.manager.stats().await)
}

async fn init(State(state): State<AppState>, Json(options): Json<InitOptions>) -> GatewayResult<StatusCode> {
    state.manager.init(options).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Calls ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MakeCallRequest {
    peer_uri: String,
    #[serde(default)]
    media_in: MediaSpec,
    #[serde(default)]
    media_out: MediaSpec,
    controller: String,
}

#[derive(Serialize)]
struct MakeCallResponse {
    client_id: ClientId,
}

/// POST /calls  Place an outbound call and join it to the room.
async fn make_call(
    State(state): State<AppState>,
    Json(req): Json<MakeCallRequest>,
) -> GatewayResult<(StatusCode, Json<MakeCallResponse>)> {
    let client_id = state
        .manager
        .make_call(&req.peer_uri, req.media_in, req.media_out, &req.controller)
        .await?;
    Ok((StatusCode::CREATED, Json(MakeCallResponse { client_id })))
}

async fn end_call(State(state): State<AppState>, Path(client_id): Path<String>) -> GatewayResult<StatusCode> {
    state.manager.end_call(&ClientId::from(client_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn drop_call(State(state): State<AppState>, Path(client_id): Path<String>) -> StatusCode {
    state.manager.drop_call(&ClientId::from(client_id)).await;
    StatusCode::NO_CONTENT
}

async fn query_room(State(state): State<AppState>, Path(client_id): Path<String>) -> GatewayResult<Json<Value>> {
    let room = state.manager.query_room(&ClientId::from(client_id)).await?;
    Ok(Json(room))
}

// ─── Cluster ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    participant: String,
    event: String,
    #[serde(default)]
    data: Value,
}

async fn notify(State(state): State<AppState>, Json(req): Json<NotifyRequest>) -> GatewayResult<StatusCode> {
    state
        .manager
        .notify(&req.participant, &req.event, req.data)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fault(State(state): State<AppState>, Json(fault): Json<FaultMessage>) -> StatusCode {
    state.manager.on_fault_detected(fault).await;
    StatusCode::NO_CONTENT
}

async fn clean(State(state): State<AppState>) -> StatusCode {
    state.manager.clean().await;
    StatusCode::NO_CONTENT
}

async fn enter_drain(State(state): State<AppState>) -> StatusCode {
    state.manager.enter_drain().await;
    StatusCode::NO_CONTENT
}

async fn exit_drain(State(state): State<AppState>) -> StatusCode {
    state.manager.exit_drain().await;
    StatusCode::NO_CONTENT
}

// ─── Media fabric ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LinkupRequest {
    connection_id: String,
    #[serde(default)]
    from: LinkupSources,
}

async fn linkup(State(state): State<AppState>, Json(req): Json<LinkupRequest>) -> GatewayResult<StatusCode> {
    state.manager.linkup(&req.connection_id, &req.from).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cutoff(State(state): State<AppState>, Path(connection_id): Path<String>) -> GatewayResult<StatusCode> {
    state.manager.cutoff(&connection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    stream_id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscription_id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    options: Value,
}

async fn publish(State(state): State<AppState>, Json(req): Json<PublishRequest>) -> GatewayResult<StatusCode> {
    state
        .manager
        .publish(&req.stream_id, &req.kind, req.options)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unpublish(State(state): State<AppState>, Json(req): Json<PublishRequest>) -> GatewayResult<StatusCode> {
    state.manager.unpublish(&req.stream_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn subscribe(State(state): State<AppState>, Json(req): Json<SubscribeRequest>) -> GatewayResult<StatusCode> {
    state
        .manager
        .subscribe(&req.subscription_id, &req.kind, req.options)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unsubscribe(State(state): State<AppState>, Json(req): Json<SubscribeRequest>) -> GatewayResult<StatusCode> {
    state.manager.unsubscribe(&req.subscription_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── SIP agent callbacks ─────────────────────────────────────────────────────

/// POST /sip/events  Queue an event for the manager's event loop.
async fn sip_event(State(state): State<AppState>, Json(event): Json<SipEvent>) -> GatewayResult<StatusCode> {
    state
        .events
        .send(event)
        .await
        .map_err(|_| GatewayError::Internal(anyhow::anyhow!("SIP event loop has stopped")))?;
    Ok(StatusCode::ACCEPTED)
}
