//! # roomlink
//!
//! SIP gateway process. Wires the call session manager to its collaborators:
//! - cluster RPC, SIP user agent and media router over HTTP
//! - control API (HTTP) for the cluster and the SIP agent's event callbacks
//!
//! One process serves one room at a time, bound by `init` or by the `[sip]`
//! config section at startup.

mod http;
mod routes;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use roomlink_sip::types::InitOptions;
use roomlink_sip::{CallSessionManager, GatewayIdentity, RetryPolicy};

use crate::http::{HttpMediaRouter, HttpRpcTransport, HttpSipAgent};
use crate::routes::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "SIP to conference room gateway", long_about = None)]
struct Args {
    /// Config file (extension optional; missing file means defaults + env)
    #[arg(short, long, default_value = "config", env = "ROOMLINK_CONFIG")]
    config: String,

    /// Capacity of the SIP event queue
    #[arg(long, default_value_t = 1024)]
    event_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = roomlink_common::config::init(&args.config)?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomlink=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("Starting roomlink v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(node = %config.agent.node_id, cluster = %config.agent.cluster, "Gateway identity");

    // === Collaborators ===
    let client = http::client(config.rpc.timeout())?;
    let rpc = Arc::new(HttpRpcTransport::new(client.clone()));
    let sip = Arc::new(HttpSipAgent::new(client.clone(), &config.rpc.sip_agent_url));
    let router = Arc::new(HttpMediaRouter::new(client, &config.rpc.media_router_url));

    // === Call session manager ===
    let manager = Arc::new(CallSessionManager::new(
        GatewayIdentity::from(&config.agent),
        RetryPolicy::from(&config.discovery),
        sip,
        rpc,
        router,
    ));
    let (events_tx, events_rx) = mpsc::channel(args.event_queue);
    tokio::spawn(manager.clone().run(events_rx));

    // === Control API ===
    let app = routes::build_router(AppState {
        manager: manager.clone(),
        events: events_tx,
    });
    let addr = SocketAddr::new(config.control.host.parse()?, config.control.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Control API listening on http://{addr}");

    // Startup registration runs once the API is up, since the SIP agent
    // reports the outcome through it.
    if let (Some(room_id), Some(server), Some(user)) = (&config.sip.room_id, &config.sip.server, &config.sip.user) {
        let options = InitOptions {
            room_id: Some(room_id.clone()),
            sip_server: Some(server.clone()),
            sip_user: Some(user.clone()),
            sip_passwd: config.sip.password.clone(),
        };
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.init(options).await {
                tracing::error!(error = %e, "Startup SIP registration failed");
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    manager.close().await;
    Ok(())
}
