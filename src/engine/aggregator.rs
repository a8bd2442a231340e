use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::engine::{
    join_executor::compare_values,
    predicate::{check_field, field_value, EntityFilter},
};
use crate::store::Dataset;
use crate::utils::{
    error::{EngineError, EngineResult, RequestError},
    request::{AggregateFunction, AggregateRequest, OrderDirection, PredicateOperator, StddevVariant},
    types::{ColumnMetadata, DataType, Entity, QueryResult, ResultStatus, Row, Value},
};

/// Group key ordered with the same rules as result sorting; numerically
/// equal integers and floats fall into one group
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            let ordering = compare_values(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Running sums for one attribute within a group
#[derive(Debug, Clone, Default)]
struct Moments {
    count: usize,
    sum: f64,
    sum_squares: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Moments {
    fn add(&mut self, value: &Value) {
        let Some(v) = value.as_f64() else {
            return;
        };
        self.count += 1;
        self.sum += v;
        self.sum_squares += v * v;
        if self.min.as_ref().map_or(true, |m| compare_values(value, m) == Ordering::Less) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |m| compare_values(value, m) == Ordering::Greater) {
            self.max = Some(value.clone());
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn stddev(&self, variant: StddevVariant) -> Option<f64> {
        let n = self.count as f64;
        let divisor = match variant {
            StddevVariant::Sample if self.count >= 2 => n - 1.0,
            StddevVariant::Population if self.count >= 1 => n,
            _ => return None,
        };
        let mean = self.sum / n;
        // Rounding can push the variance of equal values slightly below zero
        let variance = ((self.sum_squares - n * mean * mean) / divisor).max(0.0);
        Some(variance.sqrt())
    }
}

/// Per-group accumulator
#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: usize,
    sum_x: f64,
    sum_y: f64,
    attributes: BTreeMap<String, Moments>,
}

impl Accumulator {
    fn add(&mut self, entity: &Entity, attributes: &[&str]) {
        self.count += 1;
        self.sum_x += entity.coordinates.x;
        self.sum_y += entity.coordinates.y;
        for name in attributes {
            let moments = self.attributes.entry(name.to_string()).or_default();
            if let Some(value) = entity.attribute(name) {
                moments.add(value);
            }
        }
    }

    fn value(&self, function: &AggregateFunction, variant: StddevVariant) -> Value {
        let moments = |attr: &str| self.attributes.get(attr);
        let float = |v: Option<f64>| v.map(Value::Float).unwrap_or(Value::Null);
        match function {
            AggregateFunction::Count => Value::Integer(self.count as i64),
            AggregateFunction::Sum(attr) => float(moments(attr).filter(|m| m.count > 0).map(|m| m.sum)),
            AggregateFunction::Avg(attr) => float(moments(attr).and_then(Moments::mean)),
            AggregateFunction::Min(attr) => moments(attr).and_then(|m| m.min.clone()).unwrap_or(Value::Null),
            AggregateFunction::Max(attr) => moments(attr).and_then(|m| m.max.clone()).unwrap_or(Value::Null),
            AggregateFunction::Stddev(attr) => float(moments(attr).and_then(|m| m.stddev(variant))),
            AggregateFunction::Centroid if self.count > 0 => Value::Point {
                x: self.sum_x / self.count as f64,
                y: self.sum_y / self.count as f64,
            },
            AggregateFunction::Centroid => Value::Null,
        }
    }
}

/// Computes grouped statistics over a dataset snapshot
pub trait Aggregator: Send + Sync {
    fn aggregate(
        &self,
        request: AggregateRequest,
        dataset: &Dataset,
        cancel: &CancellationToken,
    ) -> EngineResult<QueryResult>;
}

/// Default implementation of Aggregator
pub struct DefaultAggregator {
    default_stddev: StddevVariant,
}

impl DefaultAggregator {
    pub fn new(default_stddev: StddevVariant) -> Self {
        Self { default_stddev }
    }

    fn validate(&self, request: &AggregateRequest, dataset: &Dataset) -> EngineResult<EntityFilter> {
        if request.functions.is_empty() {
            return Err(RequestError::NoAggregates.into());
        }
        let filter = EntityFilter::compile(&request.predicates)?;

        for having in &request.having {
            if !having.value.is_finite() {
                return Err(RequestError::InvalidOperand {
                    operator: having.operator.to_string(),
                    value: having.value.to_string(),
                }
                .into());
            }
            if !matches!(
                having.operator,
                PredicateOperator::Equal
                    | PredicateOperator::NotEqual
                    | PredicateOperator::GreaterThan
                    | PredicateOperator::GreaterThanOrEqual
                    | PredicateOperator::LessThan
                    | PredicateOperator::LessThanOrEqual
            ) {
                return Err(RequestError::InvalidOperand {
                    operator: having.operator.to_string(),
                    value: having.value.to_string(),
                }
                .into());
            }
            if !request.functions.contains(&having.function) {
                return Err(RequestError::UnknownColumn(having.function.output_name()).into());
            }
        }

        let mut names = Vec::new();
        for function in &request.functions {
            let name = function.output_name();
            if names.contains(&name) {
                return Err(RequestError::DuplicateColumn(name).into());
            }
            names.push(name);
        }
        if let Some(order_by) = &request.ordering {
            for column in &order_by.columns {
                if !names.contains(&column.column) && !request.group_by.iter().any(|f| f.label() == column.column) {
                    return Err(RequestError::UnknownColumn(column.column.clone()).into());
                }
            }
        }

        // Data checks come after every structural check
        filter.check_fields(dataset)?;
        for field in &request.group_by {
            check_field(field, dataset)?;
        }
        for function in &request.functions {
            if let Some(attr) = function.attribute() {
                if !dataset.attributes().contains(attr) {
                    return Err(EngineError::UnknownAttribute(attr.to_string()));
                }
            }
        }
        Ok(filter)
    }

    fn columns(&self, request: &AggregateRequest) -> Vec<ColumnMetadata> {
        let group_columns = request.group_by.iter().map(|field| ColumnMetadata {
            name: field.label().to_string(),
            data_type: DataType::Text,
            nullable: true,
        });
        let function_columns = request.functions.iter().map(|function| ColumnMetadata {
            name: function.output_name(),
            data_type: match function {
                AggregateFunction::Count => DataType::Integer,
                AggregateFunction::Centroid => DataType::Point,
                _ => DataType::Float,
            },
            nullable: !matches!(function, AggregateFunction::Count),
        });
        group_columns.chain(function_columns).collect()
    }
}

impl Default for DefaultAggregator {
    fn default() -> Self {
        Self::new(StddevVariant::Sample)
    }
}

fn having_holds(value: &Value, operator: PredicateOperator, threshold: f64) -> bool {
    let Some(v) = value.as_f64() else {
        return false;
    };
    match operator {
        PredicateOperator::Equal => v == threshold,
        PredicateOperator::NotEqual => v != threshold,
        PredicateOperator::GreaterThan => v > threshold,
        PredicateOperator::GreaterThanOrEqual => v >= threshold,
        PredicateOperator::LessThan => v < threshold,
        PredicateOperator::LessThanOrEqual => v <= threshold,
        _ => false,
    }
}

impl Aggregator for DefaultAggregator {
    fn aggregate(
        &self,
        request: AggregateRequest,
        dataset: &Dataset,
        cancel: &CancellationToken,
    ) -> EngineResult<QueryResult> {
        let start_time = Instant::now();
        let filter = self.validate(&request, dataset)?;
        let variant = request.stddev.unwrap_or(self.default_stddev);

        let mut attributes: Vec<&str> = request.functions.iter().filter_map(|f| f.attribute()).collect();
        attributes.sort_unstable();
        attributes.dedup();

        let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();
        let mut status = ResultStatus::Completed;
        for entity in dataset.store().iter() {
            if cancel.is_cancelled() {
                status = ResultStatus::Cancelled;
                break;
            }
            if !filter.matches(entity) {
                continue;
            }
            let key = GroupKey(request.group_by.iter().map(|f| field_value(entity, f)).collect());
            groups.entry(key).or_default().add(entity, &attributes);
        }
        debug!(groups = groups.len(), "aggregation accumulated");

        let mut rows = Vec::with_capacity(groups.len());
        for (key, accumulator) in groups {
            let keep = request.having.iter().all(|having| {
                having_holds(&accumulator.value(&having.function, variant), having.operator, having.value)
            });
            if !keep {
                continue;
            }
            let mut values = key.0;
            values.extend(request.functions.iter().map(|f| accumulator.value(f, variant)));
            rows.push(Row::new(values));
        }

        let mut result = QueryResult::new();
        result.columns = self.columns(&request);
        result.rows = rows;
        result.status = status;

        if let Some(order_by) = &request.ordering {
            let ordering: Vec<(usize, OrderDirection)> = order_by
                .columns
                .iter()
                .filter_map(|c| result.column_index(&c.column).map(|i| (i, c.direction)))
                .collect();
            result.rows.sort_by(|a, b| {
                for (index, direction) in &ordering {
                    let ordering = compare_values(&a.values[*index], &b.values[*index]);
                    let ordering = match direction {
                        OrderDirection::Ascending => ordering,
                        OrderDirection::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = request.limit {
            result.rows.truncate(limit as usize);
        }
        result.execution_time = start_time.elapsed();

        if result.is_cancelled() {
            warn!(partial_groups = result.row_count(), "aggregation cancelled");
        } else {
            info!(groups = result.row_count(), "aggregation executed");
        }
        Ok(result)
    }
}
