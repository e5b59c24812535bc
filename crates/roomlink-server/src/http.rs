//! JSON-over-HTTP adapters for the gateway's collaborators.
//!
//! - [`HttpRpcTransport`]: cluster RPC, `POST {target}/rpc/{method}` with the
//!   positional arguments as body
//! - [`HttpSipAgent`]: commands to the SIP user-agent sidecar; its events come
//!   back on the control API's `/sip/events`
//! - [`HttpMediaRouter`]: the media-routing sidecar

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use roomlink_common::RpcError;
use roomlink_sip::router::{LinkupSources, MediaRouter};
use roomlink_sip::sip::{CallConnection, ConnectionParams, SipStack};
use roomlink_sip::transport::RpcTransport;

/// Shared client for all adapters.
pub fn client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("roomlink/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// RPC targets are bare `host:port` node ids or full base URLs.
fn endpoint(target: &str, method: &str) -> String {
    let base = target.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/rpc/{method}")
    } else {
        format!("http://{base}/rpc/{method}")
    }
}

fn rpc_error(e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Failed(e.to_string())
    }
}

// ─── RPC ─────────────────────────────────────────────────────────────────────

pub struct HttpRpcTransport {
    http: Client,
}

impl HttpRpcTransport {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn invoke(&self, target: &str, method: &str, args: Value) -> Result<Value, RpcError> {
        let url = endpoint(target, method);
        debug!("RPC POST {}", url);
        let resp = self
            .http
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(rpc_error)?
            .error_for_status()
            .map_err(rpc_error)?;
        resp.json().await.map_err(rpc_error)
    }

    fn cast(&self, target: &str, method: &str, args: Value) {
        let url = endpoint(target, method);
        let http = self.http.clone();
        tokio::spawn(async move {
            let sent = http
                .post(&url)
                .json(&args)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = sent {
                warn!(url = %url, error = %e, "RPC cast failed");
            }
        });
    }
}

// ─── SIP agent ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Deserialize)]
struct ConnectionResponse {
    handle: String,
}

pub struct HttpSipAgent {
    http: Client,
    base_url: String,
}

impl HttpSipAgent {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("SIP agent POST {}", url);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Commands whose answer carries nothing but success.
    async fn command(&self, path: &str, body: Value) {
        let url = format!("{}{}", self.base_url, path);
        let sent = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = sent {
            warn!(url = %url, error = %e, "SIP agent command failed");
        }
    }

    async fn confirmed(&self, path: &str, body: Value) -> bool {
        match self.post::<OkResponse>(path, body).await {
            Ok(resp) => resp.ok,
            Err(e) => {
                warn!(path, error = %e, "SIP agent request failed");
                false
            }
        }
    }
}

#[async_trait]
impl SipStack for HttpSipAgent {
    async fn register(&self, server: &str, user: &str, password: &str, display_name: &str) -> bool {
        let body = json!({
            "server": server,
            "user": user,
            "password": password,
            "display_name": display_name,
        });
        self.confirmed("/register", body).await
    }

    async fn accept(&self, peer_uri: &str) {
        self.command("/accept", json!({ "peer_uri": peer_uri })).await;
    }

    async fn reject(&self, peer_uri: &str) {
        self.command("/reject", json!({ "peer_uri": peer_uri })).await;
    }

    async fn make_call(&self, peer_uri: &str, audio: bool, video: bool) -> bool {
        let body = json!({ "peer_uri": peer_uri, "audio": audio, "video": video });
        self.confirmed("/call", body).await
    }

    async fn hangup(&self, peer_uri: &str) {
        self.command("/hangup", json!({ "peer_uri": peer_uri })).await;
    }

    async fn close(&self) {
        self.command("/close", json!({})).await;
    }

    async fn create_connection(&self, params: ConnectionParams) -> Box<dyn CallConnection> {
        let body = json!({
            "peer_uri": params.peer_uri,
            "audio": params.audio,
            "video": params.video,
            "red": params.red,
            "ulpfec": params.ulpfec,
        });
        // Without an explicit handle the agent addresses the connection by peer.
        let handle = match self.post::<ConnectionResponse>("/connections", body).await {
            Ok(resp) => resp.handle,
            Err(e) => {
                warn!(peer = %params.peer_uri, error = %e, "Connection setup request failed");
                params.peer_uri.clone()
            }
        };
        Box::new(HttpCallConnection {
            http: self.http.clone(),
            url: format!("{}/connections/close", self.base_url),
            handle,
        })
    }
}

struct HttpCallConnection {
    http: Client,
    url: String,
    handle: String,
}

impl CallConnection for HttpCallConnection {
    fn handle(&self) -> String {
        self.handle.clone()
    }

    fn close(self: Box<Self>) {
        let Self { http, url, handle } = *self;
        tokio::spawn(async move {
            let sent = http
                .post(&url)
                .json(&json!({ "handle": handle }))
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = sent {
                warn!(handle = %handle, error = %e, "Failed to close media connection");
            }
        });
    }
}

// ─── Media router ────────────────────────────────────────────────────────────

pub struct HttpMediaRouter {
    http: Client,
    base_url: String,
}

impl HttpMediaRouter {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> anyhow::Result<()> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Media router POST {}", url);
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl MediaRouter for HttpMediaRouter {
    async fn add_local_source(&self, id: &str, kind: &str, handle: &str) -> anyhow::Result<()> {
        self.post("/sources", json!({ "id": id, "kind": kind, "handle": handle }))
            .await
    }

    async fn add_local_destination(&self, id: &str, kind: &str, handle: &str) -> anyhow::Result<()> {
        self.post("/destinations", json!({ "id": id, "kind": kind, "handle": handle }))
            .await
    }

    async fn remove_connection(&self, id: &str) -> anyhow::Result<()> {
        self.post("/connections/remove", json!({ "id": id })).await
    }

    async fn linkup(&self, connection_id: &str, from: &LinkupSources) -> anyhow::Result<()> {
        self.post("/linkup", json!({ "connection_id": connection_id, "from": from }))
            .await
    }

    async fn cutoff(&self, connection_id: &str) -> anyhow::Result<()> {
        self.post("/cutoff", json!({ "connection_id": connection_id }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_accept_node_ids_and_urls() {
        assert_eq!(endpoint("10.0.0.7:9000", "join"), "http://10.0.0.7:9000/rpc/join");
        assert_eq!(
            endpoint("https://ctrl.example.com/", "getNode"),
            "https://ctrl.example.com/rpc/getNode"
        );
    }

    #[tokio::test]
    async fn unreachable_target_is_not_a_timeout() {
        let rpc = HttpRpcTransport::new(client(Duration::from_secs(1)).unwrap());
        let err = rpc
            .invoke("127.0.0.1:1", "schedule", json!([]))
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
    }
}
