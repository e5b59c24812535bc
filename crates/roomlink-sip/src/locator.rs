//! Controller discovery.
//!
//! Finding the controller of a room takes two RPCs: `schedule` on the cluster
//! coordinator reserves a conference worker, then `getNode` on that worker
//! returns the controller address. Either step can fail transiently, so the
//! pair is retried under a budget where timeouts cost more than other errors.

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use roomlink_common::config::DiscoveryConfig;
use roomlink_common::{GatewayError, GatewayResult, RpcError};

use crate::transport::RpcTransport;

/// Retry budget and pacing for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub budget: i32,
    pub timeout_penalty: i32,
    pub failure_penalty: i32,
    pub delay: Duration,
    pub reservation: Duration,
}

impl RetryPolicy {
    fn penalty(&self, reason: &RpcError) -> i32 {
        if reason.is_timeout() {
            self.timeout_penalty
        } else {
            self.failure_penalty
        }
    }
}

impl From<&DiscoveryConfig> for RetryPolicy {
    fn from(cfg: &DiscoveryConfig) -> Self {
        Self {
            budget: cfg.budget,
            timeout_penalty: cfg.timeout_penalty,
            failure_penalty: cfg.failure_penalty,
            delay: Duration::from_millis(cfg.retry_delay_ms),
            reservation: Duration::from_millis(cfg.reservation_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

#[derive(Deserialize)]
struct ScheduleAnswer {
    id: String,
}

/// Why a single discovery attempt did not produce an address.
enum AttemptError {
    Rpc { method: &'static str, reason: RpcError },
    Malformed(String),
}

pub struct ControllerLocator {
    rpc: Arc<dyn RpcTransport>,
    cluster: String,
    policy: RetryPolicy,
}

impl ControllerLocator {
    pub fn new(rpc: Arc<dyn RpcTransport>, cluster: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            rpc,
            cluster: cluster.into(),
            policy,
        }
    }

    /// Resolve the controller address of `room`.
    ///
    /// Attempts run strictly one after another; the first success ends the
    /// search. Each failure costs budget and waits `delay` before the next try.
    pub async fn locate(&self, room: &str) -> GatewayResult<String> {
        let mut budget = self.policy.budget;

        loop {
            if budget <= 0 {
                warn!(room, "Controller discovery ran out of budget");
                return Err(GatewayError::DiscoveryTimeout {
                    room: room.to_string(),
                });
            }

            match self.attempt(room).await {
                Ok(controller) => {
                    debug!(room, controller = %controller, "Got controller");
                    return Ok(controller);
                }
                Err(AttemptError::Malformed(detail)) => {
                    warn!(room, detail = %detail, "Unusable discovery answer");
                    return Err(GatewayError::DiscoveryFailure(detail));
                }
                Err(AttemptError::Rpc { method, reason }) => {
                    budget -= self.policy.penalty(&reason);
                    warn!(room, method, reason = %reason, budget, "Discovery attempt failed, keep trying");
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }

    async fn attempt(&self, room: &str) -> Result<String, AttemptError> {
        debug!(cluster = %self.cluster, room, "Send controller schedule RPC request");
        let args = json!([
            "conference",
            room,
            "preference",
            self.policy.reservation.as_millis() as u64
        ]);
        let answer = self
            .rpc
            .invoke(&self.cluster, "schedule", args)
            .await
            .map_err(|reason| AttemptError::Rpc {
                method: "schedule",
                reason,
            })?;

        let scheduler = serde_json::from_value::<ScheduleAnswer>(answer)
            .ok()
            .map(|a| a.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AttemptError::Malformed("schedule answer carries no worker id".into()))?;

        let args = json!([{ "room": room, "task": room }]);
        let answer = self
            .rpc
            .invoke(&scheduler, "getNode", args)
            .await
            .map_err(|reason| AttemptError::Rpc {
                method: "getNode",
                reason,
            })?;

        match answer {
            Value::String(controller) if !controller.is_empty() => Ok(controller),
            other => Err(AttemptError::Malformed(format!(
                "getNode answered {other} instead of a controller address"
            ))),
        }
    }
}
