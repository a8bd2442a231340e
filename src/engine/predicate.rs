use std::cmp::Ordering;
use regex::Regex;
use crate::store::Dataset;
use crate::utils::{
    error::{EngineError, EngineResult, RequestError},
    request::{Field, Predicate, PredicateOperator, PredicateValue},
    types::{Entity, Key, PartitionValue, Value},
};

/// A predicate with its operand checked and any pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    field: Field,
    test: Test,
}

#[derive(Debug, Clone)]
enum Test {
    Compare(PredicateOperator, PredicateValue),
    Pattern(Regex),
    In(Vec<PredicateValue>),
    IsNull,
    IsNotNull,
}

/// Conjunction of compiled predicates over a single entity
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    predicates: Vec<CompiledPredicate>,
}

/// Read a field of an entity as a result value; missing partitions and attributes are NULL
pub fn field_value(entity: &Entity, field: &Field) -> Value {
    match field {
        Field::Id => entity.id.to_value(),
        Field::Name => Value::Text(entity.name.clone()),
        Field::Category => Value::Text(entity.category.clone()),
        Field::X => Value::Float(entity.coordinates.x),
        Field::Y => Value::Float(entity.coordinates.y),
        Field::Partition(dimension) => entity
            .partition(dimension)
            .map(Key::to_value)
            .unwrap_or(Value::Null),
        Field::Attribute(name) => entity.attribute(name).cloned().unwrap_or(Value::Null),
    }
}

/// Fail with `UnknownAttribute` when the dataset has never seen the field
pub fn check_field(field: &Field, dataset: &Dataset) -> EngineResult<()> {
    match field {
        Field::Attribute(name) if !dataset.attributes().contains(name) => {
            Err(EngineError::UnknownAttribute(name.clone()))
        }
        Field::Partition(dimension) => check_dimension(dimension, dataset),
        _ => Ok(()),
    }
}

pub fn check_dimension(dimension: &str, dataset: &Dataset) -> EngineResult<()> {
    if dataset.partitions().has_dimension(dimension) {
        Ok(())
    } else {
        Err(EngineError::UnknownAttribute(format!("partition:{}", dimension)))
    }
}

/// Translate a SQL LIKE pattern into an anchored regex.
///
/// `%` matches any run of characters, `_` exactly one; a backslash makes the
/// next character literal.
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, RequestError> {
    let mut regex = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                } else {
                    return Err(RequestError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "pattern ends with an escape character".to_string(),
                    });
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| RequestError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn invalid_operand(operator: PredicateOperator, value: &PredicateValue) -> RequestError {
    RequestError::InvalidOperand {
        operator: operator.to_string(),
        value: value.to_string(),
    }
}

fn is_scalar(value: &PredicateValue) -> bool {
    !matches!(value, PredicateValue::List(_) | PredicateValue::Null)
}

impl CompiledPredicate {
    /// Check the operand shape and compile patterns
    pub fn compile(predicate: &Predicate) -> Result<Self, RequestError> {
        let operator = predicate.operator;
        let test = match operator {
            PredicateOperator::Equal
            | PredicateOperator::NotEqual
            | PredicateOperator::GreaterThan
            | PredicateOperator::GreaterThanOrEqual
            | PredicateOperator::LessThan
            | PredicateOperator::LessThanOrEqual => {
                if !is_scalar(&predicate.value) {
                    return Err(invalid_operand(operator, &predicate.value));
                }
                Test::Compare(operator, predicate.value.clone())
            }
            PredicateOperator::Like | PredicateOperator::ILike => match &predicate.value {
                PredicateValue::String(pattern) => {
                    Test::Pattern(like_to_regex(pattern, operator == PredicateOperator::ILike)?)
                }
                other => return Err(invalid_operand(operator, other)),
            },
            PredicateOperator::In => match &predicate.value {
                PredicateValue::List(items) if items.iter().all(is_scalar) => Test::In(items.clone()),
                other => return Err(invalid_operand(operator, other)),
            },
            PredicateOperator::IsNull => Test::IsNull,
            PredicateOperator::IsNotNull => Test::IsNotNull,
        };

        Ok(Self {
            field: predicate.field.clone(),
            test,
        })
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        let value = field_value(entity, &self.field);
        match &self.test {
            Test::IsNull => value.is_null(),
            Test::IsNotNull => !value.is_null(),
            _ if value.is_null() => false,
            Test::Compare(operator, operand) => match compare(&value, operand) {
                Some(ordering) => match operator {
                    PredicateOperator::Equal => ordering == Ordering::Equal,
                    PredicateOperator::NotEqual => ordering != Ordering::Equal,
                    PredicateOperator::GreaterThan => ordering == Ordering::Greater,
                    PredicateOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                    PredicateOperator::LessThan => ordering == Ordering::Less,
                    PredicateOperator::LessThanOrEqual => ordering != Ordering::Greater,
                    _ => false,
                },
                // Incomparable types only satisfy inequality
                None => *operator == PredicateOperator::NotEqual,
            },
            Test::Pattern(regex) => match &value {
                Value::Text(text) => regex.is_match(text),
                _ => false,
            },
            Test::In(items) => items
                .iter()
                .any(|item| compare(&value, item) == Some(Ordering::Equal)),
        }
    }

    /// Partition bucket this predicate pins the entity to, if it is a literal equality
    pub fn partition_seed(&self) -> Option<(&str, PartitionValue)> {
        let Field::Partition(dimension) = &self.field else {
            return None;
        };
        match &self.test {
            Test::Compare(PredicateOperator::Equal, PredicateValue::Integer(i)) => {
                Some((dimension.as_str(), Key::Int(*i)))
            }
            Test::Compare(PredicateOperator::Equal, PredicateValue::String(s)) => {
                Some((dimension.as_str(), Key::Text(s.clone())))
            }
            _ => None,
        }
    }
}

/// Compare an entity value with a predicate operand; `None` when the types don't compare
fn compare(value: &Value, operand: &PredicateValue) -> Option<Ordering> {
    match (value, operand) {
        (Value::Integer(v), PredicateValue::Integer(p)) => Some(v.cmp(p)),
        (Value::Text(v), PredicateValue::String(p)) => Some(v.as_str().cmp(p.as_str())),
        (Value::Boolean(v), PredicateValue::Boolean(p)) => Some(v.cmp(p)),
        (Value::Integer(_) | Value::Float(_), PredicateValue::Integer(_) | PredicateValue::Number(_)) => {
            let v = value.as_f64()?;
            let p = match operand {
                PredicateValue::Integer(i) => *i as f64,
                PredicateValue::Number(n) => *n,
                _ => return None,
            };
            v.partial_cmp(&p)
        }
        _ => None,
    }
}

impl EntityFilter {
    pub fn compile(predicates: &[Predicate]) -> Result<Self, RequestError> {
        Ok(Self {
            predicates: predicates
                .iter()
                .map(CompiledPredicate::compile)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.predicates.iter().all(|p| p.matches(entity))
    }

    /// Raise `UnknownAttribute` for any field the dataset does not define
    pub fn check_fields(&self, dataset: &Dataset) -> EngineResult<()> {
        for predicate in &self.predicates {
            check_field(predicate.field(), dataset)?;
        }
        Ok(())
    }

    /// The most selective literal partition equality, if any
    pub fn partition_seed(&self, dataset: &Dataset) -> Option<(&str, PartitionValue)> {
        self.predicates
            .iter()
            .filter_map(CompiledPredicate::partition_seed)
            .min_by_key(|(dimension, value)| dataset.partitions().bucket_len(dimension, value))
    }
}
