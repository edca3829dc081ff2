//! Dispatchers: the transport endpoints that execute plan subtrees.
//!
//! The real cluster transport lives elsewhere; this module consumes it
//! through [`PlanDispatcher`] only. The in-process model is a mailbox
//! per shard-owning coordinator: dispatch mails the plan and awaits the
//! reply. Transport failures never escape as errors; they come back
//! embedded in [`QueryResponse`], and each dispatch is at-most-once.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use pulse_common::{EngineConfig, PulseError, Result};

use crate::exec_plan::ExecPlan;
use crate::shard_map::{ShardCoordinator, ShardMap};

/// One timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A keyed series of samples; the unit flowing through transformers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeVector {
    pub key: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

/// Successful execution payload for one dispatched plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    pub range_vectors: Vec<RangeVector>,
}

/// Failure surfaced by the executing side or the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub query_id: String,
    pub message: String,
}

/// Outcome of one dispatch, failures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResponse {
    Result(QueryResult),
    Error(QueryError),
}

/// Transport endpoint owning the execution of one plan subtree.
///
/// `dispatch` is semantically at-most-once per call; anything that goes
/// wrong is reported through the returned [`QueryResponse`].
pub trait PlanDispatcher: fmt::Debug + Send + Sync {
    /// Ship `plan` to the endpoint and await its response.
    fn dispatch(&self, plan: &ExecPlan) -> BoxFuture<'static, QueryResponse>;

    /// Stable identity of the target endpoint.
    ///
    /// Two dispatchers with equal targets ship to the same place; the
    /// planner's dispatcher picker dedups on this.
    fn target(&self) -> &str;
}

/// Request envelope delivered to a coordinator's mailbox.
#[derive(Debug)]
pub struct PlanEnvelope {
    pub plan: ExecPlan,
    pub reply: oneshot::Sender<QueryResponse>,
}

/// Address and mailbox of one shard-owning coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorEndpoint {
    addr: String,
    mailbox: mpsc::Sender<PlanEnvelope>,
}

impl CoordinatorEndpoint {
    pub fn new(addr: impl Into<String>, mailbox: mpsc::Sender<PlanEnvelope>) -> Self {
        Self {
            addr: addr.into(),
            mailbox,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

/// Dispatcher that mails plans to a coordinator endpoint.
#[derive(Debug, Clone)]
pub struct ActorPlanDispatcher {
    endpoint: CoordinatorEndpoint,
    timeout_ms: u64,
}

impl ActorPlanDispatcher {
    pub fn new(endpoint: CoordinatorEndpoint) -> Self {
        Self {
            endpoint,
            timeout_ms: EngineConfig::default().dispatch_timeout_ms,
        }
    }

    /// Override the reply timeout, usually from [`EngineConfig`].
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl PlanDispatcher for ActorPlanDispatcher {
    fn dispatch(&self, plan: &ExecPlan) -> BoxFuture<'static, QueryResponse> {
        let endpoint = self.endpoint.clone();
        let timeout = Duration::from_millis(self.timeout_ms);
        let plan = plan.clone();
        async move {
            let query_id = plan.query_id.clone();
            let (reply, rx) = oneshot::channel();
            let envelope = PlanEnvelope { plan, reply };
            if endpoint.mailbox.send(envelope).await.is_err() {
                warn!(coordinator = %endpoint.addr, "coordinator mailbox closed");
                return QueryResponse::Error(QueryError {
                    query_id,
                    message: format!("coordinator {} unreachable", endpoint.addr),
                });
            }
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => QueryResponse::Error(QueryError {
                    query_id,
                    message: format!("coordinator {} dropped the reply", endpoint.addr),
                }),
                Err(_) => QueryResponse::Error(QueryError {
                    query_id,
                    message: format!(
                        "coordinator {} did not reply within {}ms",
                        endpoint.addr,
                        timeout.as_millis()
                    ),
                }),
            }
        }
        .boxed()
    }

    fn target(&self) -> &str {
        self.endpoint.addr()
    }
}

/// Placeholder carried by deserialized plans until the receiving node
/// rebinds real dispatchers.
#[derive(Debug, Clone, Default)]
pub struct UnboundDispatcher;

impl PlanDispatcher for UnboundDispatcher {
    fn dispatch(&self, plan: &ExecPlan) -> BoxFuture<'static, QueryResponse> {
        let query_id = plan.query_id.clone();
        async move {
            QueryResponse::Error(QueryError {
                query_id,
                message: "plan dispatcher not bound".to_string(),
            })
        }
        .boxed()
    }

    fn target(&self) -> &str {
        "unbound"
    }
}

/// Bind `shard` to the dispatcher of its owning coordinator.
pub fn dispatcher_for_shard(
    shard: u32,
    shard_map: &dyn ShardMap,
) -> Result<ActorPlanDispatcher> {
    match shard_map.coord_for_shard(shard) {
        ShardCoordinator::Assigned(endpoint) => Ok(ActorPlanDispatcher::new(endpoint)),
        ShardCoordinator::Unassigned => Err(PulseError::ShardsUnavailable(format!(
            "shard {shard} has no assigned coordinator"
        ))),
    }
}
