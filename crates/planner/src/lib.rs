//! Query planning stack for pulse.
//!
//! Architecture role:
//! - logical plan algebra for time-series queries
//! - materialization of logical trees into shard-routed exec trees
//! - shard resolution from shard-key filters via the record layer's
//!   routing hash
//! - dispatcher binding against the cluster shard map
//!
//! Key modules:
//! - [`logical_plan`]
//! - [`exec_plan`]
//! - [`planner`]
//! - [`shard_map`]
//! - [`dispatch`]

pub mod dispatch;
pub mod exec_plan;
pub mod logical_plan;
pub mod planner;
pub mod shard_map;

pub use dispatch::{
    dispatcher_for_shard, ActorPlanDispatcher, CoordinatorEndpoint, PlanDispatcher, PlanEnvelope,
    QueryError, QueryResponse, QueryResult, RangeVector, Sample, UnboundDispatcher,
};
pub use exec_plan::{
    BinaryJoinExec, DistConcatExec, ExecNode, ExecPlan, RangeVectorTransformer,
    ReduceAggregateExec, RowKeyRange, SelectRawPartitionsExec,
};
pub use logical_plan::{
    AggregationOperator, BinaryOperator, ColumnFilter, Filter, FilterValue, InstantFunction,
    JoinCardinality, LogicalPlan, RangeFunction, RangeSelector,
};
pub use planner::{QueryOptions, QueryPlanner};
pub use shard_map::{shards_from_filters, Dataset, ShardCoordinator, ShardMap};
