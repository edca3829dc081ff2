use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::{PlanDispatcher, UnboundDispatcher};
use crate::logical_plan::{
    AggregationOperator, BinaryOperator, ColumnFilter, InstantFunction, JoinCardinality,
    RangeFunction,
};

/// The physical execution tree produced by materialization.
///
/// Every node carries the materialization-wide `query_id` and
/// `submit_time_ms`, the dispatcher owning its subtree, and an ordered
/// transformer stack. The tree is immutable once the planner returns
/// it, except that `transformers` grows during materialization and is
/// frozen before dispatch.
///
/// The dispatcher is a live transport handle and stays off the wire;
/// deserialized plans carry an [`UnboundDispatcher`] until the
/// receiving node rebinds them. Everything else round-trips losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecPlan {
    /// UUID assigned once per materialization, constant across the tree.
    pub query_id: String,
    /// Epoch milliseconds stamped once at the materialization root.
    pub submit_time_ms: i64,
    #[serde(skip, default = "unbound_dispatcher")]
    dispatcher: Arc<dyn PlanDispatcher>,
    transformers: Vec<RangeVectorTransformer>,
    /// The node variant and its children.
    pub node: ExecNode,
}

fn unbound_dispatcher() -> Arc<dyn PlanDispatcher> {
    Arc::new(UnboundDispatcher)
}

/// Exec node variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecNode {
    /// Leaf scan of one shard's matching partitions.
    SelectRawPartitions(SelectRawPartitionsExec),
    /// Concatenation of multi-shard results.
    DistConcat(DistConcatExec),
    /// Second-stage aggregation across shard-local aggregates.
    ReduceAggregate(ReduceAggregateExec),
    /// Cross-shard binary join.
    BinaryJoin(BinaryJoinExec),
}

/// Leaf scan operator.
///
/// Produces a lazy sequence of range vectors from one shard, bounded by
/// the item limit in effect on the executing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRawPartitionsExec {
    /// Dataset the shard belongs to.
    pub dataset: String,
    /// Shard to scan.
    pub shard: u32,
    /// Partition filters pushed to the scan.
    pub filters: Vec<ColumnFilter>,
    /// Row-key range bounding the scan.
    pub row_key_range: RowKeyRange,
    /// Data columns to read.
    pub columns: Vec<String>,
}

/// Concatenates the streams of its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistConcatExec {
    /// Child subtrees, one per shard-local plan.
    pub children: Vec<ExecPlan>,
}

/// Reduces shard-local aggregates into the final aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceAggregateExec {
    /// Child subtrees carrying shard-local map-reduce transformers.
    pub children: Vec<ExecPlan>,
    /// Aggregation operator.
    pub operator: AggregationOperator,
    /// Operator parameters (e.g. k for top-k).
    pub params: Vec<f64>,
}

/// Joins the lhs and rhs child streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryJoinExec {
    /// Left-side subtrees.
    pub lhs: Vec<ExecPlan>,
    /// Right-side subtrees.
    pub rhs: Vec<ExecPlan>,
    /// Join arithmetic operator.
    pub operator: BinaryOperator,
    /// Join cardinality.
    pub cardinality: JoinCardinality,
    /// Keys to join on; empty means all shared keys.
    pub on: Vec<String>,
    /// Keys excluded from the join key set.
    pub ignoring: Vec<String>,
}

/// Row-key range bounding a leaf scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RowKeyRange {
    /// Scan between two row keys inclusive.
    Interval { from_ms: i64, to_ms: i64 },
    /// Scan everything the shard holds.
    AllChunks,
    /// Scan only encoded (persisted) chunks.
    EncodedChunks,
    /// Scan only the in-memory write buffers.
    WriteBuffers,
}

/// A pure stream transformer appended to an exec node.
///
/// Given a stream of range vectors, each yields a stream of range
/// vectors; the executing side applies a node's transformers in append
/// order before the node's own reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeVectorTransformer {
    /// Resample raw samples onto a periodic (start, step, end) grid,
    /// optionally applying a windowed range function.
    PeriodicSamplesMapper {
        start_ms: i64,
        step_ms: i64,
        end_ms: i64,
        window_ms: Option<i64>,
        function: Option<RangeFunction>,
        function_args: Vec<f64>,
    },
    /// Apply an instant function to every sample.
    InstantVectorFunctionMapper {
        function: InstantFunction,
        function_args: Vec<f64>,
    },
    /// Shard-local first stage of a distributed aggregation.
    AggregateMapReduce {
        operator: AggregationOperator,
        params: Vec<f64>,
        without: Vec<String>,
        by: Vec<String>,
    },
    /// Final presentation stage after cross-shard reduction.
    AggregatePresenter {
        operator: AggregationOperator,
        params: Vec<f64>,
    },
    /// Scalar arithmetic against every sample.
    ScalarOperationMapper {
        operator: BinaryOperator,
        scalar: f64,
        scalar_is_lhs: bool,
    },
}

impl ExecPlan {
    pub(crate) fn new(
        query_id: &str,
        submit_time_ms: i64,
        dispatcher: Arc<dyn PlanDispatcher>,
        node: ExecNode,
    ) -> Self {
        Self {
            query_id: query_id.to_string(),
            submit_time_ms,
            dispatcher,
            transformers: Vec::new(),
            node,
        }
    }

    /// The transport endpoint that will execute this subtree.
    pub fn dispatcher(&self) -> &Arc<dyn PlanDispatcher> {
        &self.dispatcher
    }

    /// Rebind the dispatcher, e.g. after the plan crossed the wire.
    pub fn rebind_dispatcher(&mut self, dispatcher: Arc<dyn PlanDispatcher>) {
        self.dispatcher = dispatcher;
    }

    /// Transformers in application order.
    pub fn transformers(&self) -> &[RangeVectorTransformer] {
        &self.transformers
    }

    /// Append a transformer. Only the planner calls this, during
    /// materialization; the stack is frozen once the plan is returned.
    pub fn add_range_vector_transformer(&mut self, transformer: RangeVectorTransformer) {
        self.transformers.push(transformer);
    }

    /// Direct children of this node.
    pub fn children(&self) -> Vec<&ExecPlan> {
        match &self.node {
            ExecNode::SelectRawPartitions(_) => Vec::new(),
            ExecNode::DistConcat(x) => x.children.iter().collect(),
            ExecNode::ReduceAggregate(x) => x.children.iter().collect(),
            ExecNode::BinaryJoin(x) => x.lhs.iter().chain(x.rhs.iter()).collect(),
        }
    }

    /// Deterministic indent-based rendering for debugging.
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        self.fmt_node(0, &mut out);
        out
    }

    fn fmt_node(&self, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        match &self.node {
            ExecNode::SelectRawPartitions(x) => {
                out.push_str(&format!(
                    "{pad}SelectRawPartitionsExec dataset={} shard={} filters={} range={:?} columns={:?} on={}\n",
                    x.dataset,
                    x.shard,
                    x.filters.len(),
                    x.row_key_range,
                    x.columns,
                    self.dispatcher.target(),
                ));
            }
            ExecNode::DistConcat(x) => {
                out.push_str(&format!(
                    "{pad}DistConcatExec children={} on={}\n",
                    x.children.len(),
                    self.dispatcher.target(),
                ));
            }
            ExecNode::ReduceAggregate(x) => {
                out.push_str(&format!(
                    "{pad}ReduceAggregateExec operator={:?} params={:?} on={}\n",
                    x.operator,
                    x.params,
                    self.dispatcher.target(),
                ));
            }
            ExecNode::BinaryJoin(x) => {
                out.push_str(&format!(
                    "{pad}BinaryJoinExec operator={:?} cardinality={:?} on_keys={:?} ignoring={:?} on={}\n",
                    x.operator,
                    x.cardinality,
                    x.on,
                    x.ignoring,
                    self.dispatcher.target(),
                ));
            }
        }
        for t in &self.transformers {
            out.push_str(&format!("{pad}  ~{}\n", fmt_transformer(t)));
        }
        match &self.node {
            ExecNode::BinaryJoin(x) => {
                out.push_str(&format!("{pad}  lhs:\n"));
                for c in &x.lhs {
                    c.fmt_node(indent + 2, out);
                }
                out.push_str(&format!("{pad}  rhs:\n"));
                for c in &x.rhs {
                    c.fmt_node(indent + 2, out);
                }
            }
            _ => {
                for c in self.children() {
                    c.fmt_node(indent + 1, out);
                }
            }
        }
    }
}

fn fmt_transformer(t: &RangeVectorTransformer) -> String {
    match t {
        RangeVectorTransformer::PeriodicSamplesMapper {
            start_ms,
            step_ms,
            end_ms,
            window_ms,
            function,
            function_args,
        } => format!(
            "PeriodicSamplesMapper start={start_ms} step={step_ms} end={end_ms} window={window_ms:?} function={function:?} args={function_args:?}"
        ),
        RangeVectorTransformer::InstantVectorFunctionMapper {
            function,
            function_args,
        } => format!("InstantVectorFunctionMapper function={function:?} args={function_args:?}"),
        RangeVectorTransformer::AggregateMapReduce {
            operator,
            params,
            without,
            by,
        } => format!(
            "AggregateMapReduce operator={operator:?} params={params:?} without={without:?} by={by:?}"
        ),
        RangeVectorTransformer::AggregatePresenter { operator, params } => {
            format!("AggregatePresenter operator={operator:?} params={params:?}")
        }
        RangeVectorTransformer::ScalarOperationMapper {
            operator,
            scalar,
            scalar_is_lhs,
        } => format!(
            "ScalarOperationMapper operator={operator:?} scalar={scalar} scalar_is_lhs={scalar_is_lhs}"
        ),
    }
}
