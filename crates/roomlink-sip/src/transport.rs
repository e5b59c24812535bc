//! Uniform asynchronous RPC surface towards the cluster.
//!
//! Every controller and scheduler interaction goes through [`RpcTransport`].
//! Implementations decide the wire (HTTP, message bus, gRPC); callers only see
//! JSON arguments, a JSON answer, and a timeout/other failure split.

use async_trait::async_trait;
use serde_json::Value;

use roomlink_common::RpcError;

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Call `method` on `target` and wait for its answer.
    async fn invoke(&self, target: &str, method: &str, args: Value) -> Result<Value, RpcError>;

    /// Fire-and-forget notification. Delivery failures are the transport's to log.
    fn cast(&self, target: &str, method: &str, args: Value);
}
