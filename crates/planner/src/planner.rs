//! Materialization: lowering a logical plan to a dispatchable exec tree.
//!
//! Contracts:
//! - recursion returns one exec plan per target shard at the leaves,
//!   propagating upward; aggregates and joins collapse the list;
//! - every node's dispatcher is its own (leaves) or one of its
//!   children's (internal nodes);
//! - `query_id` and `submit_time_ms` are stamped once per
//!   materialization and shared by every node;
//! - errors surface before anything is dispatched; a partial plan is
//!   never returned.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pulse_common::metrics::global_metrics;
use pulse_common::{EngineConfig, PulseError, Result};
use rand::seq::SliceRandom;
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::{dispatcher_for_shard, PlanDispatcher};
use crate::exec_plan::{
    BinaryJoinExec, DistConcatExec, ExecNode, ExecPlan, RangeVectorTransformer,
    ReduceAggregateExec, RowKeyRange, SelectRawPartitionsExec,
};
use crate::logical_plan::{LogicalPlan, RangeSelector};
use crate::shard_map::{shards_from_filters, Dataset, ShardMap};

/// Per-query planning options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Explicit shard list for datasets without shard-key columns.
    pub shard_overrides: Option<Vec<u32>>,
    /// Log2 of the maximum shard fan-out for one query.
    pub shard_key_spread: u32,
    /// Soft cap on range vectors produced by one leaf scan.
    pub item_limit: usize,
}

impl QueryOptions {
    /// Options seeded from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            shard_overrides: None,
            shard_key_spread: config.default_shard_key_spread,
            item_limit: config.item_limit,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Lowers logical plans against one dataset into exec trees.
pub struct QueryPlanner {
    dataset: Dataset,
    shard_map: Arc<dyn ShardMap>,
}

impl QueryPlanner {
    pub fn new(dataset: Dataset, shard_map: Arc<dyn ShardMap>) -> Self {
        Self { dataset, shard_map }
    }

    /// Materialize `root` into a dispatchable exec tree.
    pub fn materialize(&self, root: &LogicalPlan, options: &QueryOptions) -> Result<ExecPlan> {
        let query_id = Uuid::new_v4().to_string();
        let submit_time_ms = epoch_ms();
        match self.walk(root, &query_id, submit_time_ms, options) {
            Ok(mut plans) => {
                let plan = if plans.len() == 1 {
                    plans.pop().expect("one plan")
                } else {
                    let dispatcher = pick_dispatcher(&plans)?;
                    ExecPlan::new(
                        &query_id,
                        submit_time_ms,
                        dispatcher,
                        ExecNode::DistConcat(DistConcatExec { children: plans }),
                    )
                };
                debug!(
                    dataset = %self.dataset.name,
                    query_id = %query_id,
                    "materialized exec plan"
                );
                global_metrics().inc_plans_materialized(&self.dataset.name);
                Ok(plan)
            }
            Err(e) => {
                global_metrics().inc_planning_failures(&self.dataset.name, failure_kind(&e));
                Err(e)
            }
        }
    }

    fn walk(
        &self,
        plan: &LogicalPlan,
        query_id: &str,
        submit_time_ms: i64,
        options: &QueryOptions,
    ) -> Result<Vec<ExecPlan>> {
        match plan {
            LogicalPlan::RawSeries {
                filters,
                columns,
                range_selector,
            } => {
                let shards =
                    shards_from_filters(&self.dataset, filters, options, self.shard_map.as_ref())?;
                if shards.is_empty() {
                    return Err(PulseError::BadQuery(format!(
                        "filters resolved to no shards of dataset {}",
                        self.dataset.name
                    )));
                }
                global_metrics().add_shards_resolved(&self.dataset.name, shards.len() as u64);
                shards
                    .iter()
                    .map(|&shard| {
                        let dispatcher = dispatcher_for_shard(shard, self.shard_map.as_ref())?;
                        Ok(ExecPlan::new(
                            query_id,
                            submit_time_ms,
                            Arc::new(dispatcher),
                            ExecNode::SelectRawPartitions(SelectRawPartitionsExec {
                                dataset: self.dataset.name.clone(),
                                shard,
                                filters: filters.clone(),
                                row_key_range: to_row_key_range(range_selector),
                                columns: columns.clone(),
                            }),
                        ))
                    })
                    .collect()
            }

            LogicalPlan::PeriodicSeries {
                raw_series,
                start_ms,
                step_ms,
                end_ms,
            } => {
                let mut children = self.walk(raw_series, query_id, submit_time_ms, options)?;
                for child in &mut children {
                    child.add_range_vector_transformer(
                        RangeVectorTransformer::PeriodicSamplesMapper {
                            start_ms: *start_ms,
                            step_ms: *step_ms,
                            end_ms: *end_ms,
                            window_ms: None,
                            function: None,
                            function_args: Vec::new(),
                        },
                    );
                }
                Ok(children)
            }

            LogicalPlan::PeriodicSeriesWithWindowing {
                raw_series,
                start_ms,
                step_ms,
                end_ms,
                window_ms,
                function,
                function_args,
            } => {
                let mut children = self.walk(raw_series, query_id, submit_time_ms, options)?;
                for child in &mut children {
                    child.add_range_vector_transformer(
                        RangeVectorTransformer::PeriodicSamplesMapper {
                            start_ms: *start_ms,
                            step_ms: *step_ms,
                            end_ms: *end_ms,
                            window_ms: Some(*window_ms),
                            function: Some(*function),
                            function_args: function_args.clone(),
                        },
                    );
                }
                Ok(children)
            }

            LogicalPlan::ApplyInstantFunction {
                vectors,
                function,
                function_args,
            } => {
                let mut children = self.walk(vectors, query_id, submit_time_ms, options)?;
                for child in &mut children {
                    child.add_range_vector_transformer(
                        RangeVectorTransformer::InstantVectorFunctionMapper {
                            function: *function,
                            function_args: function_args.clone(),
                        },
                    );
                }
                Ok(children)
            }

            LogicalPlan::ScalarVectorBinaryOperation {
                vector,
                operator,
                scalar,
                scalar_is_lhs,
            } => {
                let mut children = self.walk(vector, query_id, submit_time_ms, options)?;
                for child in &mut children {
                    child.add_range_vector_transformer(
                        RangeVectorTransformer::ScalarOperationMapper {
                            operator: *operator,
                            scalar: *scalar,
                            scalar_is_lhs: *scalar_is_lhs,
                        },
                    );
                }
                Ok(children)
            }

            LogicalPlan::Aggregate {
                vectors,
                operator,
                params,
                without,
                by,
            } => {
                let mut children = self.walk(vectors, query_id, submit_time_ms, options)?;
                for child in &mut children {
                    child.add_range_vector_transformer(
                        RangeVectorTransformer::AggregateMapReduce {
                            operator: *operator,
                            params: params.clone(),
                            without: without.clone(),
                            by: by.clone(),
                        },
                    );
                }
                let dispatcher = pick_dispatcher(&children)?;
                let mut reducer = ExecPlan::new(
                    query_id,
                    submit_time_ms,
                    dispatcher,
                    ExecNode::ReduceAggregate(ReduceAggregateExec {
                        children,
                        operator: *operator,
                        params: params.clone(),
                    }),
                );
                reducer.add_range_vector_transformer(RangeVectorTransformer::AggregatePresenter {
                    operator: *operator,
                    params: params.clone(),
                });
                Ok(vec![reducer])
            }

            LogicalPlan::BinaryJoin {
                lhs,
                rhs,
                operator,
                cardinality,
                on,
                ignoring,
            } => {
                let lhs_plans = self.walk(lhs, query_id, submit_time_ms, options)?;
                let rhs_plans = self.walk(rhs, query_id, submit_time_ms, options)?;
                let dispatcher = pick_dispatcher_over(
                    lhs_plans.iter().chain(rhs_plans.iter()),
                )?;
                Ok(vec![ExecPlan::new(
                    query_id,
                    submit_time_ms,
                    dispatcher,
                    ExecNode::BinaryJoin(BinaryJoinExec {
                        lhs: lhs_plans,
                        rhs: rhs_plans,
                        operator: *operator,
                        cardinality: *cardinality,
                        on: on.clone(),
                        ignoring: ignoring.clone(),
                    }),
                )])
            }
        }
    }
}

/// Convert a logical range selector to the leaf scan's row-key range.
///
/// The match is exhaustive on purpose: a new selector variant must be
/// mapped here explicitly rather than fall through to a default.
fn to_row_key_range(selector: &RangeSelector) -> RowKeyRange {
    match selector {
        RangeSelector::Interval { from_ms, to_ms } => RowKeyRange::Interval {
            from_ms: *from_ms,
            to_ms: *to_ms,
        },
        RangeSelector::AllChunks => RowKeyRange::AllChunks,
        RangeSelector::EncodedChunks => RowKeyRange::EncodedChunks,
        RangeSelector::WriteBuffers => RowKeyRange::WriteBuffers,
    }
}

/// Pick a dispatcher uniformly at random among the distinct dispatchers
/// of `children`.
///
/// The choice only spreads reducer load across endpoints; correctness
/// is independent of which child endpoint hosts the parent node, so
/// the thread-local generator is fine and no determinism is promised.
fn pick_dispatcher(children: &[ExecPlan]) -> Result<Arc<dyn PlanDispatcher>> {
    pick_dispatcher_over(children.iter())
}

fn pick_dispatcher_over<'a>(
    children: impl Iterator<Item = &'a ExecPlan>,
) -> Result<Arc<dyn PlanDispatcher>> {
    let mut distinct: Vec<&Arc<dyn PlanDispatcher>> = Vec::new();
    for child in children {
        let d = child.dispatcher();
        if !distinct.iter().any(|seen| seen.target() == d.target()) {
            distinct.push(d);
        }
    }
    distinct
        .choose(&mut rand::thread_rng())
        .map(|d| Arc::clone(*d))
        .ok_or_else(|| {
            PulseError::BadQuery("cannot pick a dispatcher with no children".to_string())
        })
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn failure_kind(e: &PulseError) -> &'static str {
    match e {
        PulseError::BadQuery(_) => "bad_query",
        PulseError::ShardsUnavailable(_) => "shards_unavailable",
        _ => "other",
    }
}
