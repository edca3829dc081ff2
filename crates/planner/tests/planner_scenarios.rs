mod support;

use std::collections::HashSet;
use std::sync::Arc;

use pulse_common::PulseError;
use pulse_planner::{
    AggregationOperator, BinaryOperator, ColumnFilter, Dataset, ExecNode, ExecPlan, Filter,
    FilterValue, JoinCardinality, LogicalPlan, QueryOptions, QueryPlanner, RangeSelector,
    RangeVectorTransformer, RowKeyRange,
};
use pulse_record::shard_key_hash;
use support::StaticShardMap;

fn raw_series(filters: Vec<ColumnFilter>) -> LogicalPlan {
    LogicalPlan::RawSeries {
        filters,
        columns: vec!["value".to_string()],
        range_selector: RangeSelector::AllChunks,
    }
}

fn periodic(raw: LogicalPlan) -> LogicalPlan {
    LogicalPlan::PeriodicSeries {
        raw_series: Box::new(raw),
        start_ms: 1000,
        step_ms: 10,
        end_ms: 1100,
    }
}

fn api_filters() -> Vec<ColumnFilter> {
    vec![
        ColumnFilter::equals_str("job", "api"),
        ColumnFilter::equals_str("instance", "i-1"),
        ColumnFilter::equals_str("method", "GET"),
    ]
}

fn two_shard_planner() -> QueryPlanner {
    let mut map = StaticShardMap::default();
    let _rx3 = map.assign(3);
    let _rx7 = map.assign(7);
    let hash = shard_key_hash(&["job", "instance"], &["api", "i-1"]);
    map.by_hash.insert(hash, vec![3, 7]);
    QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string(), "instance".to_string()]),
        Arc::new(map),
    )
}

fn collect_query_ids(plan: &ExecPlan, ids: &mut HashSet<String>, times: &mut HashSet<i64>) {
    ids.insert(plan.query_id.clone());
    times.insert(plan.submit_time_ms);
    for child in plan.children() {
        collect_query_ids(child, ids, times);
    }
}

fn assert_dispatcher_containment(plan: &ExecPlan) {
    let children = plan.children();
    if !children.is_empty() {
        let child_targets: HashSet<&str> =
            children.iter().map(|c| c.dispatcher().target()).collect();
        assert!(
            child_targets.contains(plan.dispatcher().target()),
            "internal node dispatcher {} not among children {:?}",
            plan.dispatcher().target(),
            child_targets
        );
    }
    for child in children {
        assert_dispatcher_containment(child);
    }
}

#[test]
fn periodic_series_over_two_shards_concatenates_leaves() {
    let planner = two_shard_planner();
    let plan = planner
        .materialize(&periodic(raw_series(api_filters())), &QueryOptions::default())
        .unwrap();

    let ExecNode::DistConcat(concat) = &plan.node else {
        panic!("expected DistConcatExec root, got {}", plan.print_tree());
    };
    assert_eq!(concat.children.len(), 2);

    let mut shards = HashSet::new();
    for child in &concat.children {
        let ExecNode::SelectRawPartitions(leaf) = &child.node else {
            panic!("expected leaf under the concat");
        };
        shards.insert(leaf.shard);
        assert_eq!(leaf.dataset, "metrics");
        assert_eq!(leaf.filters.len(), 3);
        assert_eq!(leaf.row_key_range, RowKeyRange::AllChunks);
        assert_eq!(leaf.columns, vec!["value".to_string()]);
        assert_eq!(child.dispatcher().target(), format!("coord-{}", leaf.shard));
        assert_eq!(
            child.transformers(),
            &[RangeVectorTransformer::PeriodicSamplesMapper {
                start_ms: 1000,
                step_ms: 10,
                end_ms: 1100,
                window_ms: None,
                function: None,
                function_args: vec![],
            }]
        );
    }
    assert_eq!(shards, [3u32, 7].into_iter().collect());

    assert_dispatcher_containment(&plan);
}

#[test]
fn query_id_and_submit_time_are_constant_across_the_tree() {
    let planner = two_shard_planner();
    let plan = planner
        .materialize(&periodic(raw_series(api_filters())), &QueryOptions::default())
        .unwrap();

    let mut ids = HashSet::new();
    let mut times = HashSet::new();
    collect_query_ids(&plan, &mut ids, &mut times);
    assert_eq!(ids.len(), 1);
    assert_eq!(times.len(), 1);
    // materializations get distinct ids
    let again = planner
        .materialize(&periodic(raw_series(api_filters())), &QueryOptions::default())
        .unwrap();
    assert_ne!(plan.query_id, again.query_id);
}

#[test]
fn missing_shard_key_filter_is_a_bad_query() {
    let planner = two_shard_planner();
    let err = planner
        .materialize(
            &periodic(raw_series(vec![ColumnFilter::equals_str("job", "api")])),
            &QueryOptions::default(),
        )
        .unwrap_err();
    match err {
        PulseError::BadQuery(msg) => assert!(msg.contains("instance"), "{msg}"),
        other => panic!("expected BadQuery, got {other}"),
    }
}

#[test]
fn non_equality_shard_key_filter_is_a_bad_query() {
    let planner = two_shard_planner();
    let filters = vec![
        ColumnFilter::equals_str("job", "api"),
        ColumnFilter {
            column: "instance".to_string(),
            filter: Filter::NotEquals(FilterValue::Str("i-1".to_string())),
        },
    ];
    let err = planner
        .materialize(&periodic(raw_series(filters)), &QueryOptions::default())
        .unwrap_err();
    match err {
        PulseError::BadQuery(msg) => assert!(msg.contains("instance"), "{msg}"),
        other => panic!("expected BadQuery, got {other}"),
    }
}

#[test]
fn duplicate_shard_key_column_is_a_bad_query_not_a_panic() {
    let mut map = StaticShardMap::default();
    let _rx3 = map.assign(3);
    let planner = QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string(), "job".to_string()]),
        Arc::new(map),
    );
    let err = planner
        .materialize(
            &periodic(raw_series(vec![ColumnFilter::equals_str("job", "api")])),
            &QueryOptions::default(),
        )
        .unwrap_err();
    match err {
        PulseError::BadQuery(msg) => {
            assert!(msg.contains("job") && msg.contains("more than once"), "{msg}")
        }
        other => panic!("expected BadQuery, got {other}"),
    }
}

#[test]
fn unassigned_shard_surfaces_shards_unavailable() {
    let mut map = StaticShardMap::default();
    let _rx3 = map.assign(3);
    // shard 7 resolves but has no coordinator
    let hash = shard_key_hash(&["job", "instance"], &["api", "i-1"]);
    map.by_hash.insert(hash, vec![3, 7]);
    let planner = QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string(), "instance".to_string()]),
        Arc::new(map),
    );
    let err = planner
        .materialize(&periodic(raw_series(api_filters())), &QueryOptions::default())
        .unwrap_err();
    assert!(matches!(err, PulseError::ShardsUnavailable(_)), "{err}");
}

#[test]
fn dataset_without_shard_keys_requires_overrides() {
    let mut map = StaticShardMap::default();
    let _rx0 = map.assign(0);
    let _rx1 = map.assign(1);
    let planner = QueryPlanner::new(Dataset::new("events", vec![]), Arc::new(map));

    let err = planner
        .materialize(&raw_series(api_filters()), &QueryOptions::default())
        .unwrap_err();
    assert!(matches!(err, PulseError::BadQuery(_)), "{err}");

    let options = QueryOptions {
        shard_overrides: Some(vec![0, 1]),
        ..QueryOptions::default()
    };
    let plan = planner.materialize(&raw_series(api_filters()), &options).unwrap();
    let ExecNode::DistConcat(concat) = &plan.node else {
        panic!("expected concat over the override shards");
    };
    assert_eq!(concat.children.len(), 2);
}

#[test]
fn aggregate_stacks_map_reduce_and_presents_on_the_reducer() {
    let mut map = StaticShardMap::default();
    for shard in [1u32, 2, 5] {
        let _rx = map.assign(shard);
    }
    let hash = shard_key_hash(&["job", "instance"], &["api", "i-1"]);
    map.by_hash.insert(hash, vec![1, 2, 5]);
    let planner = QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string(), "instance".to_string()]),
        Arc::new(map),
    );

    let logical = LogicalPlan::Aggregate {
        vectors: Box::new(periodic(raw_series(api_filters()))),
        operator: AggregationOperator::Sum,
        params: vec![],
        without: vec!["pod".to_string()],
        by: vec![],
    };
    let plan = planner.materialize(&logical, &QueryOptions::default()).unwrap();

    let ExecNode::ReduceAggregate(reduce) = &plan.node else {
        panic!("expected ReduceAggregateExec root, got {}", plan.print_tree());
    };
    assert_eq!(reduce.operator, AggregationOperator::Sum);
    assert!(reduce.params.is_empty());
    assert_eq!(reduce.children.len(), 3);
    assert_eq!(
        plan.transformers(),
        &[RangeVectorTransformer::AggregatePresenter {
            operator: AggregationOperator::Sum,
            params: vec![],
        }]
    );

    for child in &reduce.children {
        assert!(matches!(child.node, ExecNode::SelectRawPartitions(_)));
        let ts = child.transformers();
        assert_eq!(ts.len(), 2, "mapper then map-reduce, in order");
        assert!(matches!(
            ts[0],
            RangeVectorTransformer::PeriodicSamplesMapper { .. }
        ));
        assert_eq!(
            ts[1],
            RangeVectorTransformer::AggregateMapReduce {
                operator: AggregationOperator::Sum,
                params: vec![],
                without: vec!["pod".to_string()],
                by: vec![],
            }
        );
    }

    assert_dispatcher_containment(&plan);
}

#[test]
fn binary_join_holds_both_sides_and_picks_from_their_union() {
    let mut map = StaticShardMap::default();
    let _rx1 = map.assign(1);
    let _rx2 = map.assign(2);
    map.by_hash
        .insert(shard_key_hash(&["job"], &["svc-a"]), vec![1, 2]);
    map.by_hash
        .insert(shard_key_hash(&["job"], &["svc-b"]), vec![1]);
    let planner = QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string()]),
        Arc::new(map),
    );

    let logical = LogicalPlan::BinaryJoin {
        lhs: Box::new(periodic(raw_series(vec![ColumnFilter::equals_str(
            "job", "svc-a",
        )]))),
        rhs: Box::new(periodic(raw_series(vec![ColumnFilter::equals_str(
            "job", "svc-b",
        )]))),
        operator: BinaryOperator::Mul,
        cardinality: JoinCardinality::OneToOne,
        on: vec!["service".to_string()],
        ignoring: vec![],
    };
    let plan = planner.materialize(&logical, &QueryOptions::default()).unwrap();

    let ExecNode::BinaryJoin(join) = &plan.node else {
        panic!("expected BinaryJoinExec root, got {}", plan.print_tree());
    };
    assert_eq!(join.lhs.len(), 2);
    assert_eq!(join.rhs.len(), 1);
    assert_eq!(join.operator, BinaryOperator::Mul);
    assert_eq!(join.cardinality, JoinCardinality::OneToOne);
    assert_eq!(join.on, vec!["service".to_string()]);
    assert!(join.ignoring.is_empty());
    for side in join.lhs.iter().chain(join.rhs.iter()) {
        assert!(matches!(side.node, ExecNode::SelectRawPartitions(_)));
        assert_eq!(side.transformers().len(), 1);
    }

    let union_targets: HashSet<&str> = join
        .lhs
        .iter()
        .chain(join.rhs.iter())
        .map(|p| p.dispatcher().target())
        .collect();
    assert!(union_targets.contains(plan.dispatcher().target()));
}

#[test]
fn instant_function_and_scalar_operation_stack_in_append_order() {
    let planner = two_shard_planner();
    let logical = LogicalPlan::ScalarVectorBinaryOperation {
        vector: Box::new(LogicalPlan::ApplyInstantFunction {
            vectors: Box::new(periodic(raw_series(api_filters()))),
            function: pulse_planner::InstantFunction::Abs,
            function_args: vec![],
        }),
        operator: BinaryOperator::Add,
        scalar: 4.0,
        scalar_is_lhs: false,
    };
    let plan = planner.materialize(&logical, &QueryOptions::default()).unwrap();

    for child in plan.children() {
        let ts = child.transformers();
        assert_eq!(ts.len(), 3);
        assert!(matches!(
            ts[0],
            RangeVectorTransformer::PeriodicSamplesMapper { .. }
        ));
        assert!(matches!(
            ts[1],
            RangeVectorTransformer::InstantVectorFunctionMapper { .. }
        ));
        assert_eq!(
            ts[2],
            RangeVectorTransformer::ScalarOperationMapper {
                operator: BinaryOperator::Add,
                scalar: 4.0,
                scalar_is_lhs: false,
            }
        );
    }
}

#[test]
fn windowed_periodic_series_carries_the_range_function() {
    let planner = two_shard_planner();
    let logical = LogicalPlan::PeriodicSeriesWithWindowing {
        raw_series: Box::new(raw_series(api_filters())),
        start_ms: 1000,
        step_ms: 10,
        end_ms: 1100,
        window_ms: 300,
        function: pulse_planner::RangeFunction::Rate,
        function_args: vec![],
    };
    let plan = planner.materialize(&logical, &QueryOptions::default()).unwrap();
    for child in plan.children() {
        assert_eq!(
            child.transformers(),
            &[RangeVectorTransformer::PeriodicSamplesMapper {
                start_ms: 1000,
                step_ms: 10,
                end_ms: 1100,
                window_ms: Some(300),
                function: Some(pulse_planner::RangeFunction::Rate),
                function_args: vec![],
            }]
        );
    }
}

#[test]
fn print_tree_renders_nodes_and_transformers() {
    let planner = two_shard_planner();
    let plan = planner
        .materialize(&periodic(raw_series(api_filters())), &QueryOptions::default())
        .unwrap();
    let rendered = plan.print_tree();
    assert!(rendered.contains("DistConcatExec"), "{rendered}");
    assert!(rendered.contains("SelectRawPartitionsExec"), "{rendered}");
    assert!(rendered.contains("~PeriodicSamplesMapper"), "{rendered}");
    assert!(rendered.contains("shard=3"), "{rendered}");
    assert!(rendered.contains("shard=7"), "{rendered}");
}
