//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use roomlink_common::RpcError;

use crate::router::{LinkupSources, MediaRouter};
use crate::sip::{CallConnection, ConnectionParams, SipStack};
use crate::transport::RpcTransport;

// ─── RPC ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub target: String,
    pub method: String,
    pub args: Value,
}

type Responder = Box<dyn FnMut(&str, &Value) -> Result<Value, RpcError> + Send>;

/// Scripted transport: per-method responders (default `Ok(null)`), optional
/// gates that park invocations until a permit is added, and a call log.
#[derive(Default)]
pub(crate) struct FakeTransport {
    responders: Mutex<HashMap<String, Responder>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<RecordedCall>>,
    casts: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond<F>(&self, method: &str, responder: F)
    where
        F: FnMut(&str, &Value) -> Result<Value, RpcError> + Send + 'static,
    {
        self.responders
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(responder));
    }

    /// Script discovery to `controller` and a join answer carrying `streams`.
    pub fn conference(&self, controller: &str, streams: Value) {
        self.respond("schedule", |_, _| Ok(json!({ "id": "worker-1" })));
        let controller = controller.to_string();
        self.respond("getNode", move |_, _| Ok(json!(controller)));
        self.respond("join", move |_, _| Ok(json!({ "room": { "streams": streams } })));
    }

    /// Park every later `method` invocation until the returned semaphore gets a permit.
    pub fn hold(&self, method: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(method.to_string(), gate.clone());
        gate
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn casts(&self) -> Vec<RecordedCall> {
        self.casts.lock().unwrap().clone()
    }

    pub fn casts_to(&self, method: &str) -> Vec<RecordedCall> {
        self.casts()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    pub fn cast_count(&self, method: &str) -> usize {
        self.casts_to(method).len()
    }

    /// Wait until `method` has been invoked at least `n` times.
    pub async fn wait_for(&self, method: &str, n: usize) {
        for _ in 0..1_000 {
            if self.count(method) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("{method} was not invoked {n} times");
    }
}

#[async_trait]
impl RpcTransport for FakeTransport {
    async fn invoke(&self, target: &str, method: &str, args: Value) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push(RecordedCall {
            target: target.to_string(),
            method: method.to_string(),
            args: args.clone(),
        });

        let gate = self.gates.lock().unwrap().get(method).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let mut responders = self.responders.lock().unwrap();
        match responders.get_mut(method) {
            Some(responder) => responder(target, &args),
            None => Ok(Value::Null),
        }
    }

    fn cast(&self, target: &str, method: &str, args: Value) {
        self.casts.lock().unwrap().push(RecordedCall {
            target: target.to_string(),
            method: method.to_string(),
            args,
        });
    }
}

// ─── SIP ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SipCommand {
    Register { server: String, user: String },
    Accept(String),
    Reject(String),
    MakeCall { peer: String, audio: bool, video: bool },
    Hangup(String),
    Close,
}

#[derive(Default)]
struct ConnectionLog {
    opened: AtomicUsize,
    closed: Mutex<Vec<String>>,
}

pub(crate) struct FakeConnection {
    handle: String,
    log: Arc<ConnectionLog>,
}

impl CallConnection for FakeConnection {
    fn handle(&self) -> String {
        self.handle.clone()
    }

    fn close(self: Box<Self>) {
        self.log.closed.lock().unwrap().push(self.handle.clone());
    }
}

pub(crate) struct FakeSip {
    commands: Mutex<Vec<SipCommand>>,
    refuse_register: AtomicBool,
    refuse_calls: AtomicBool,
    call_gate: Mutex<Option<Arc<Semaphore>>>,
    connections: Arc<ConnectionLog>,
    params: Mutex<Vec<ConnectionParams>>,
}

impl FakeSip {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            refuse_register: AtomicBool::new(false),
            refuse_calls: AtomicBool::new(false),
            call_gate: Mutex::new(None),
            connections: Arc::new(ConnectionLog::default()),
            params: Mutex::new(Vec::new()),
        }
    }

    pub fn refuse_register(&self) {
        self.refuse_register.store(true, Ordering::SeqCst);
    }

    pub fn refuse_calls(&self) {
        self.refuse_calls.store(true, Ordering::SeqCst);
    }

    /// Park later `make_call`s, after they are recorded, until the returned
    /// semaphore gets a permit.
    pub fn hold_calls(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.call_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn commands(&self) -> Vec<SipCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connection_params(&self) -> Vec<ConnectionParams> {
        self.params.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.connections.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<String> {
        self.connections.closed.lock().unwrap().clone()
    }

    /// Connections created and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.opened() - self.closed().len()
    }

    fn record(&self, command: SipCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl SipStack for FakeSip {
    async fn register(&self, server: &str, user: &str, _password: &str, _display_name: &str) -> bool {
        self.record(SipCommand::Register {
            server: server.to_string(),
            user: user.to_string(),
        });
        !self.refuse_register.load(Ordering::SeqCst)
    }

    async fn accept(&self, peer_uri: &str) {
        self.record(SipCommand::Accept(peer_uri.to_string()));
    }

    async fn reject(&self, peer_uri: &str) {
        self.record(SipCommand::Reject(peer_uri.to_string()));
    }

    async fn make_call(&self, peer_uri: &str, audio: bool, video: bool) -> bool {
        self.record(SipCommand::MakeCall {
            peer: peer_uri.to_string(),
            audio,
            video,
        });
        let gate = self.call_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        !self.refuse_calls.load(Ordering::SeqCst)
    }

    async fn hangup(&self, peer_uri: &str) {
        self.record(SipCommand::Hangup(peer_uri.to_string()));
    }

    async fn close(&self) {
        self.record(SipCommand::Close);
    }

    async fn create_connection(&self, params: ConnectionParams) -> Box<dyn CallConnection> {
        let n = self.connections.opened.fetch_add(1, Ordering::SeqCst);
        let handle = format!("conn-{n}-{}", params.peer_uri);
        self.params.lock().unwrap().push(params);
        Box::new(FakeConnection {
            handle,
            log: self.connections.clone(),
        })
    }
}

// ─── Media routing ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RouterOp {
    AddSource { id: String, handle: String },
    AddDestination { id: String, handle: String },
    Remove(String),
    Linkup(String),
    Cutoff(String),
}

#[derive(Default)]
pub(crate) struct FakeRouter {
    ops: Mutex<Vec<RouterOp>>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<RouterOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RouterOp::Remove(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: RouterOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl MediaRouter for FakeRouter {
    async fn add_local_source(&self, id: &str, _kind: &str, handle: &str) -> anyhow::Result<()> {
        self.record(RouterOp::AddSource {
            id: id.to_string(),
            handle: handle.to_string(),
        });
        Ok(())
    }

    async fn add_local_destination(&self, id: &str, _kind: &str, handle: &str) -> anyhow::Result<()> {
        self.record(RouterOp::AddDestination {
            id: id.to_string(),
            handle: handle.to_string(),
        });
        Ok(())
    }

    async fn remove_connection(&self, id: &str) -> anyhow::Result<()> {
        self.record(RouterOp::Remove(id.to_string()));
        Ok(())
    }

    async fn linkup(&self, connection_id: &str, _from: &LinkupSources) -> anyhow::Result<()> {
        self.record(RouterOp::Linkup(connection_id.to_string()));
        Ok(())
    }

    async fn cutoff(&self, connection_id: &str) -> anyhow::Result<()> {
        self.record(RouterOp::Cutoff(connection_id.to_string()));
        Ok(())
    }
}
