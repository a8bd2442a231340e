use std::cmp::Ordering;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::engine::{
    candidate_generator::{CandidateTuples, GeneratorOptions, Tuple},
    distance,
    join_planner::{JoinPlan, PlannedProjection},
    predicate::{check_dimension, check_field, field_value},
};
use crate::store::Dataset;
use crate::utils::{
    error::EngineResult,
    request::OrderDirection,
    types::{Point, QueryResult, ResultStatus, Row, Value},
};

/// Runs validated join plans against a dataset snapshot
pub trait JoinExecutor: Send + Sync {
    /// Execute a plan; a cancelled run returns the rows found so far tagged `Cancelled`
    fn execute(&self, plan: JoinPlan, dataset: &Dataset, cancel: &CancellationToken) -> EngineResult<QueryResult>;
}

/// Default implementation of JoinExecutor
pub struct DefaultJoinExecutor {
    options: GeneratorOptions,
}

impl DefaultJoinExecutor {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    /// Every field the plan reads must exist in the dataset
    fn check_fields(&self, plan: &JoinPlan, dataset: &Dataset) -> EngineResult<()> {
        for role in &plan.roles {
            role.filter.check_fields(dataset)?;
        }
        for constraint in &plan.partition_constraints {
            check_dimension(&constraint.dimension, dataset)?;
        }
        for projection in &plan.projections {
            if let PlannedProjection::Field { field, .. } = projection {
                check_field(field, dataset)?;
            }
        }
        Ok(())
    }

    /// Apply distance constraints in plan order, stopping at the first failure
    fn satisfies_distances(&self, plan: &JoinPlan, tuple: &Tuple<'_>) -> EngineResult<bool> {
        for constraint in &plan.distance_constraints {
            let a = &tuple[constraint.left].coordinates;
            let b = &tuple[constraint.right].coordinates;
            let ok = if constraint.inclusive {
                distance::within(a, b, constraint.radius, constraint.kind)?
            } else {
                distance::closer_than(a, b, constraint.radius, constraint.kind)?
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn project(&self, plan: &JoinPlan, tuple: &Tuple<'_>) -> EngineResult<Row> {
        let mut values = Vec::with_capacity(plan.projections.len());
        for projection in &plan.projections {
            let value = match projection {
                PlannedProjection::Field { role, field } => field_value(tuple[*role], field),
                PlannedProjection::Distance { left, right, kind } => Value::Float(distance::distance(
                    &tuple[*left].coordinates,
                    &tuple[*right].coordinates,
                    *kind,
                )?),
                PlannedProjection::ClusterSpread { roles, kind } => {
                    let points: Vec<Point> = roles.iter().map(|r| tuple[*r].coordinates).collect();
                    Value::Float(distance::cluster_spread(&points, *kind)?)
                }
            };
            values.push(value);
        }
        Ok(Row::new(values))
    }

    /// Apply a limit to query results
    fn apply_limit(&self, mut result: QueryResult, limit: Option<usize>) -> QueryResult {
        if let Some(limit) = limit {
            result.rows.truncate(limit);
        }
        result
    }

    /// Stable multi-column sort over output column indexes
    fn apply_sort(&self, mut result: QueryResult, ordering: &[(usize, OrderDirection)]) -> QueryResult {
        if ordering.is_empty() {
            return result;
        }

        let null = Value::Null;
        result.rows.sort_by(|a, b| {
            for (index, direction) in ordering {
                let val_a = a.get(*index).unwrap_or(&null);
                let val_b = b.get(*index).unwrap_or(&null);
                let comparison = compare_values(val_a, val_b);
                let comparison = match direction {
                    OrderDirection::Ascending => comparison,
                    OrderDirection::Descending => comparison.reverse(),
                };
                if comparison != Ordering::Equal {
                    return comparison;
                }
            }
            Ordering::Equal
        });
        result
    }
}

impl Default for DefaultJoinExecutor {
    fn default() -> Self {
        Self::new(GeneratorOptions::default())
    }
}

/// Total order over result values: nulls first, numbers compared across integer and float
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Point { .. } => 4,
        }
    }

    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        }
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::Point { x: ax, y: ay }, Value::Point { x: bx, y: by }) => {
            ax.total_cmp(bx).then_with(|| ay.total_cmp(by))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

impl JoinExecutor for DefaultJoinExecutor {
    fn execute(&self, plan: JoinPlan, dataset: &Dataset, cancel: &CancellationToken) -> EngineResult<QueryResult> {
        let start_time = Instant::now();
        self.check_fields(&plan, dataset)?;

        let early_stop = plan.early_stop();
        let mut rows = Vec::new();
        let mut status = ResultStatus::Completed;
        let mut visited = 0usize;

        let mut tuples = CandidateTuples::new(&plan, dataset, self.options, cancel);
        for tuple in tuples.by_ref() {
            if cancel.is_cancelled() {
                status = ResultStatus::Cancelled;
                break;
            }
            visited += 1;
            if !self.satisfies_distances(&plan, &tuple)? {
                continue;
            }
            rows.push(self.project(&plan, &tuple)?);
            if early_stop.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }
        if tuples.interrupted() {
            status = ResultStatus::Cancelled;
        }

        let mut result = QueryResult::new();
        result.columns = plan.columns.clone();
        result.rows = rows;
        result.status = status;
        let result = self.apply_sort(result, &plan.ordering);
        let mut result = self.apply_limit(result, plan.limit);
        result.execution_time = start_time.elapsed();

        if result.is_cancelled() {
            warn!(partial_rows = result.row_count(), visited, "join cancelled");
        } else {
            info!(
                rows = result.row_count(),
                visited,
                elapsed_ms = result.execution_time.as_millis() as u64,
                "join executed"
            );
        }
        Ok(result)
    }
}
