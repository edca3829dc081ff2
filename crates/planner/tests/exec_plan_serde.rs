mod support;

use std::sync::Arc;

use pulse_planner::{
    ColumnFilter, Dataset, ExecNode, ExecPlan, LogicalPlan, QueryOptions, QueryPlanner,
    RangeSelector,
};
use pulse_record::shard_key_hash;
use support::StaticShardMap;

fn materialized_two_shard_plan() -> ExecPlan {
    let mut map = StaticShardMap::default();
    let _rx3 = map.assign(3);
    let _rx7 = map.assign(7);
    let hash = shard_key_hash(&["job"], &["api"]);
    map.by_hash.insert(hash, vec![3, 7]);
    let planner = QueryPlanner::new(
        Dataset::new("metrics", vec!["job".to_string()]),
        Arc::new(map),
    );
    let logical = LogicalPlan::PeriodicSeries {
        raw_series: Box::new(LogicalPlan::RawSeries {
            filters: vec![ColumnFilter::equals_str("job", "api")],
            columns: vec!["value".to_string()],
            range_selector: RangeSelector::Interval {
                from_ms: 500,
                to_ms: 1500,
            },
        }),
        start_ms: 1000,
        step_ms: 10,
        end_ms: 1100,
    };
    planner.materialize(&logical, &QueryOptions::default()).unwrap()
}

#[test]
fn exec_plan_round_trips_through_json() {
    let plan = materialized_two_shard_plan();

    let encoded = serde_json::to_string(&plan).unwrap();
    let decoded: ExecPlan = serde_json::from_str(&encoded).unwrap();

    assert_eq!(decoded.query_id, plan.query_id);
    assert_eq!(decoded.submit_time_ms, plan.submit_time_ms);

    let ExecNode::DistConcat(before) = &plan.node else {
        panic!("expected concat root");
    };
    let ExecNode::DistConcat(after) = &decoded.node else {
        panic!("decoded root changed shape");
    };
    assert_eq!(before.children.len(), after.children.len());
    for (b, a) in before.children.iter().zip(after.children.iter()) {
        assert_eq!(b.query_id, a.query_id);
        // transformer stacks survive in order
        assert_eq!(b.transformers(), a.transformers());
        let (ExecNode::SelectRawPartitions(bl), ExecNode::SelectRawPartitions(al)) =
            (&b.node, &a.node)
        else {
            panic!("leaf shape changed");
        };
        assert_eq!(bl.shard, al.shard);
        assert_eq!(bl.filters, al.filters);
        assert_eq!(bl.row_key_range, al.row_key_range);
        assert_eq!(bl.columns, al.columns);
    }
}

#[test]
fn deserialized_plans_carry_an_unbound_dispatcher() {
    let plan = materialized_two_shard_plan();
    let encoded = serde_json::to_string(&plan).unwrap();
    let decoded: ExecPlan = serde_json::from_str(&encoded).unwrap();

    // the transport handle never crosses the wire
    assert_ne!(plan.dispatcher().target(), "unbound");
    assert_eq!(decoded.dispatcher().target(), "unbound");
    for child in decoded.children() {
        assert_eq!(child.dispatcher().target(), "unbound");
    }
}
