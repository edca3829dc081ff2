use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Equals(FilterValue),
    NotEquals(FilterValue),
    In(Vec<FilterValue>),
    EqualsRegex(String),
    NotEqualsRegex(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub filter: Filter,
}

impl ColumnFilter {
    pub fn equals_str(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            filter: Filter::Equals(FilterValue::Str(value.into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RangeSelector {
    Interval { from_ms: i64, to_ms: i64 },
    AllChunks,
    EncodedChunks,
    WriteBuffers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeFunction {
    Rate,
    Increase,
    Delta,
    SumOverTime,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    CountOverTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstantFunction {
    Abs,
    Ceil,
    Floor,
    Exp,
    Ln,
    Log2,
    Log10,
    Round,
    Sqrt,
    ClampMin,
    ClampMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationOperator {
    Sum,
    Min,
    Max,
    Avg,
    Count,
    TopK,
    BottomK,
    Stddev,
    Stdvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinCardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    RawSeries {
        filters: Vec<ColumnFilter>,
        columns: Vec<String>,
        range_selector: RangeSelector,
    },
    PeriodicSeries {
        raw_series: Box<LogicalPlan>,
        start_ms: i64,
        step_ms: i64,
        end_ms: i64,
    },
    PeriodicSeriesWithWindowing {
        raw_series: Box<LogicalPlan>,
        start_ms: i64,
        step_ms: i64,
        end_ms: i64,
        window_ms: i64,
        function: RangeFunction,
        function_args: Vec<f64>,
    },
    ApplyInstantFunction {
        vectors: Box<LogicalPlan>,
        function: InstantFunction,
        function_args: Vec<f64>,
    },
    Aggregate {
        vectors: Box<LogicalPlan>,
        operator: AggregationOperator,
        params: Vec<f64>,
        without: Vec<String>,
        by: Vec<String>,
    },
    BinaryJoin {
        lhs: Box<LogicalPlan>,
        rhs: Box<LogicalPlan>,
        operator: BinaryOperator,
        cardinality: JoinCardinality,
        on: Vec<String>,
        ignoring: Vec<String>,
    },
    ScalarVectorBinaryOperation {
        vector: Box<LogicalPlan>,
        operator: BinaryOperator,
        scalar: f64,
        scalar_is_lhs: bool,
    },
}
