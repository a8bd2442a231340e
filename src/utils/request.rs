use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity field addressed by predicates, projections and grouping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Name,
    Category,
    X,
    Y,
    Partition(String),
    Attribute(String),
}

/// WHERE-style predicate over one entity field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Field,
    pub operator: PredicateOperator,
    #[serde(default = "null_predicate_value")]
    pub value: PredicateValue,
}

/// Predicate operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// SQL LIKE, case-sensitive (`%` and `_` wildcards)
    Like,
    /// SQL ILIKE, case-insensitive
    #[serde(rename = "ilike")]
    ILike,
    In,
    IsNull,
    IsNotNull,
}

/// Values in predicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(String),
    List(Vec<PredicateValue>),
    Null,
}

/// Distance function used by a constraint or lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
    /// Plain Euclidean distance on raw coordinate units
    Euclidean,
    /// Haversine great-circle distance in meters over longitude/latitude
    Geodesic,
}

/// Standard deviation estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StddevVariant {
    Sample,
    Population,
}

/// One role (alias) of a join, bound to its own predicate set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub alias: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

/// Two roles must share the same value for a partition dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConstraint {
    pub dimension: String,
    pub left: String,
    pub right: String,
}

/// Maximum distance between the points of two roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraint {
    pub left: String,
    pub right: String,
    pub max_distance: f64,
    /// Falls back to the engine's configured default
    #[serde(default)]
    pub kind: Option<DistanceKind>,
    /// `<=` when set, strict `<` otherwise
    #[serde(default)]
    pub inclusive: bool,
}

/// Output expression of a join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectionExpr {
    Field { role: String, field: Field },
    Distance {
        left: String,
        right: String,
        #[serde(default)]
        kind: Option<DistanceKind>,
    },
    /// Maximum pairwise distance among the listed roles
    ClusterSpread {
        roles: Vec<String>,
        #[serde(default)]
        kind: Option<DistanceKind>,
    },
}

/// Output column of a join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(flatten)]
    pub expr: ProjectionExpr,
    #[serde(default)]
    pub alias: Option<String>,
}

/// ORDER BY specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub columns: Vec<OrderColumn>,
}

/// Column ordering specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderColumn {
    pub column: String,
    #[serde(default = "default_direction")]
    pub direction: OrderDirection,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// Declarative N-way proximity join over the point store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinRequest {
    pub roles: Vec<Role>,
    #[serde(default)]
    pub partition_constraints: Vec<PartitionConstraint>,
    #[serde(default)]
    pub distance_constraints: Vec<DistanceConstraint>,
    #[serde(default)]
    pub projections: Vec<Projection>,
    #[serde(default)]
    pub ordering: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Aggregate functions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Stddev(String),
    Centroid,
}

/// HAVING filter applied to a group's aggregate value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Having {
    pub function: AggregateFunction,
    pub operator: PredicateOperator,
    pub value: f64,
}

/// Grouped statistics over filtered entities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateRequest {
    #[serde(default)]
    pub group_by: Vec<Field>,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    pub functions: Vec<AggregateFunction>,
    #[serde(default)]
    pub having: Vec<Having>,
    #[serde(default)]
    pub ordering: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Overrides the engine's configured default
    #[serde(default)]
    pub stddev: Option<StddevVariant>,
}

/// k-nearest-neighbour lookup around a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestRequest {
    pub x: f64,
    pub y: f64,
    pub k: usize,
    #[serde(default)]
    pub kind: Option<DistanceKind>,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

fn null_predicate_value() -> PredicateValue {
    PredicateValue::Null
}

fn default_direction() -> OrderDirection {
    OrderDirection::Ascending
}

impl Field {
    /// Column-name fragment used for default output names
    pub fn label(&self) -> &str {
        match self {
            Field::Id => "id",
            Field::Name => "name",
            Field::Category => "category",
            Field::X => "x",
            Field::Y => "y",
            Field::Partition(dimension) => dimension,
            Field::Attribute(name) => name,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl fmt::Display for PredicateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            PredicateOperator::Equal => "=",
            PredicateOperator::NotEqual => "<>",
            PredicateOperator::GreaterThan => ">",
            PredicateOperator::GreaterThanOrEqual => ">=",
            PredicateOperator::LessThan => "<",
            PredicateOperator::LessThanOrEqual => "<=",
            PredicateOperator::Like => "LIKE",
            PredicateOperator::ILike => "ILIKE",
            PredicateOperator::In => "IN",
            PredicateOperator::IsNull => "IS NULL",
            PredicateOperator::IsNotNull => "IS NOT NULL",
        };
        write!(f, "{}", symbol)
    }
}

impl fmt::Display for PredicateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateValue::Integer(i) => write!(f, "{}", i),
            PredicateValue::Number(n) => write!(f, "{}", n),
            PredicateValue::Boolean(b) => write!(f, "{}", b),
            PredicateValue::String(s) => write!(f, "'{}'", s),
            PredicateValue::List(values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
            PredicateValue::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for PredicateValue {
    fn from(value: i64) -> Self {
        PredicateValue::Integer(value)
    }
}

impl From<i32> for PredicateValue {
    fn from(value: i32) -> Self {
        PredicateValue::Integer(value as i64)
    }
}

impl From<f64> for PredicateValue {
    fn from(value: f64) -> Self {
        PredicateValue::Number(value)
    }
}

impl From<bool> for PredicateValue {
    fn from(value: bool) -> Self {
        PredicateValue::Boolean(value)
    }
}

impl From<&str> for PredicateValue {
    fn from(value: &str) -> Self {
        PredicateValue::String(value.to_string())
    }
}

impl Predicate {
    pub fn new(field: Field, operator: PredicateOperator, value: impl Into<PredicateValue>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: Field, value: impl Into<PredicateValue>) -> Self {
        Self::new(field, PredicateOperator::Equal, value)
    }

    pub fn like(field: Field, pattern: &str) -> Self {
        Self::new(field, PredicateOperator::Like, pattern)
    }

    pub fn ilike(field: Field, pattern: &str) -> Self {
        Self::new(field, PredicateOperator::ILike, pattern)
    }

    pub fn category(category: &str) -> Self {
        Self::equals(Field::Category, category)
    }

    /// Case-sensitive substring match on the entity name; LIKE wildcards in
    /// `fragment` match literally
    pub fn name_contains(fragment: &str) -> Self {
        let mut pattern = String::with_capacity(fragment.len() + 2);
        pattern.push('%');
        for c in fragment.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Self::like(Field::Name, &pattern)
    }

    pub fn is_null(field: Field) -> Self {
        Self::new(field, PredicateOperator::IsNull, PredicateValue::Null)
    }

    pub fn is_not_null(field: Field) -> Self {
        Self::new(field, PredicateOperator::IsNotNull, PredicateValue::Null)
    }
}

impl Projection {
    pub fn field(role: &str, field: Field) -> Self {
        Self {
            expr: ProjectionExpr::Field { role: role.to_string(), field },
            alias: None,
        }
    }

    pub fn distance(left: &str, right: &str) -> Self {
        Self {
            expr: ProjectionExpr::Distance {
                left: left.to_string(),
                right: right.to_string(),
                kind: None,
            },
            alias: None,
        }
    }

    pub fn cluster_spread(roles: &[&str]) -> Self {
        Self {
            expr: ProjectionExpr::ClusterSpread {
                roles: roles.iter().map(|r| r.to_string()).collect(),
                kind: None,
            },
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Output column name: the alias, or a name derived from the expression
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            ProjectionExpr::Field { role, field } => format!("{}.{}", role, field),
            ProjectionExpr::Distance { left, right, .. } => format!("distance({},{})", left, right),
            ProjectionExpr::ClusterSpread { roles, .. } => format!("spread({})", roles.join(",")),
        }
    }
}

impl OrderBy {
    pub fn ascending(column: &str) -> Self {
        Self {
            columns: vec![OrderColumn {
                column: column.to_string(),
                direction: OrderDirection::Ascending,
            }],
        }
    }

    pub fn descending(column: &str) -> Self {
        Self {
            columns: vec![OrderColumn {
                column: column.to_string(),
                direction: OrderDirection::Descending,
            }],
        }
    }

    pub fn then(mut self, column: &str, direction: OrderDirection) -> Self {
        self.columns.push(OrderColumn {
            column: column.to_string(),
            direction,
        });
        self
    }
}

impl JoinRequest {
    /// Create an empty join request
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, alias: &str, predicates: Vec<Predicate>) -> Self {
        self.roles.push(Role {
            alias: alias.to_string(),
            predicates,
        });
        self
    }

    pub fn same_partition(mut self, dimension: &str, left: &str, right: &str) -> Self {
        self.partition_constraints.push(PartitionConstraint {
            dimension: dimension.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        });
        self
    }

    /// Strict `distance(left, right) < max_distance` using the default distance kind
    pub fn within(mut self, left: &str, right: &str, max_distance: f64) -> Self {
        self.distance_constraints.push(DistanceConstraint {
            left: left.to_string(),
            right: right.to_string(),
            max_distance,
            kind: None,
            inclusive: false,
        });
        self
    }

    pub fn within_using(mut self, left: &str, right: &str, max_distance: f64, kind: DistanceKind) -> Self {
        self.distance_constraints.push(DistanceConstraint {
            left: left.to_string(),
            right: right.to_string(),
            max_distance,
            kind: Some(kind),
            inclusive: false,
        });
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.ordering = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl AggregateFunction {
    /// Key under which the function's value is emitted
    pub fn output_name(&self) -> String {
        match self {
            AggregateFunction::Count => "count".to_string(),
            AggregateFunction::Sum(attr) => format!("sum_{}", attr),
            AggregateFunction::Avg(attr) => format!("avg_{}", attr),
            AggregateFunction::Min(attr) => format!("min_{}", attr),
            AggregateFunction::Max(attr) => format!("max_{}", attr),
            AggregateFunction::Stddev(attr) => format!("stddev_{}", attr),
            AggregateFunction::Centroid => "centroid".to_string(),
        }
    }

    /// Attribute the function reads, if any
    pub fn attribute(&self) -> Option<&str> {
        match self {
            AggregateFunction::Sum(attr)
            | AggregateFunction::Avg(attr)
            | AggregateFunction::Min(attr)
            | AggregateFunction::Max(attr)
            | AggregateFunction::Stddev(attr) => Some(attr),
            AggregateFunction::Count | AggregateFunction::Centroid => None,
        }
    }
}

impl AggregateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_by(mut self, field: Field) -> Self {
        self.group_by.push(field);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn function(mut self, function: AggregateFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn having(mut self, function: AggregateFunction, operator: PredicateOperator, value: f64) -> Self {
        self.having.push(Having { function, operator, value });
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.ordering = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn stddev(mut self, variant: StddevVariant) -> Self {
        self.stddev = Some(variant);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request_builder() {
        let request = JoinRequest::new()
            .role("p1", vec![])
            .role("p2", vec![Predicate::category("swimming_pool")])
            .same_partition("zipcode", "p1", "p2")
            .within("p1", "p2", 400.0)
            .project(Projection::field("p1", Field::Name))
            .limit(10);

        assert_eq!(request.roles.len(), 2);
        assert_eq!(request.partition_constraints[0].dimension, "zipcode");
        assert!(!request.distance_constraints[0].inclusive);
        assert_eq!(request.distance_constraints[0].kind, None);
        assert_eq!(request.limit, Some(10));
    }

    #[test]
    fn test_projection_output_names() {
        assert_eq!(Projection::field("p1", Field::Name).output_name(), "p1.name");
        assert_eq!(
            Projection::field("p3", Field::Partition("zipcode".to_string())).output_name(),
            "p3.zipcode"
        );
        assert_eq!(Projection::distance("p1", "p3").output_name(), "distance(p1,p3)");
        assert_eq!(Projection::cluster_spread(&["p1", "p2", "p3"]).output_name(), "spread(p1,p2,p3)");
        assert_eq!(Projection::distance("p1", "p2").with_alias("d").output_name(), "d");
    }

    #[test]
    fn test_join_request_from_json() {
        let json = r#"{
            "roles": [
                {"alias": "p1", "predicates": [{"field": "category", "operator": "equal", "value": "ice_cream"}]},
                {"alias": "p3", "predicates": [{"field": "name", "operator": "like", "value": "%ALDI%"}]}
            ],
            "partition_constraints": [{"dimension": "zipcode", "left": "p1", "right": "p3"}],
            "distance_constraints": [{"left": "p1", "right": "p3", "max_distance": 300.0, "kind": "geodesic"}],
            "projections": [
                {"type": "field", "role": "p1", "field": "name"},
                {"type": "field", "role": "p1", "field": {"partition": "zipcode"}, "alias": "zip"},
                {"type": "distance", "left": "p1", "right": "p3"}
            ],
            "ordering": {"columns": [{"column": "distance(p1,p3)"}]},
            "limit": 5
        }"#;

        let request: JoinRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.roles[1].predicates[0].value, PredicateValue::String("%ALDI%".to_string()));
        assert_eq!(request.distance_constraints[0].kind, Some(DistanceKind::Geodesic));
        assert_eq!(request.projections[1].output_name(), "zip");
        assert_eq!(
            request.projections[1].expr,
            ProjectionExpr::Field { role: "p1".to_string(), field: Field::Partition("zipcode".to_string()) }
        );
        assert_eq!(request.ordering.unwrap().columns[0].direction, OrderDirection::Ascending);
    }

    #[test]
    fn test_aggregate_request_from_json() {
        let json = r#"{
            "group_by": [{"partition": "city_id"}, "category"],
            "functions": ["count", {"avg": "rating"}, "centroid"],
            "having": [{"function": "count", "operator": "greater_than_or_equal", "value": 3}]
        }"#;

        let request: AggregateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.group_by, vec![Field::Partition("city_id".to_string()), Field::Category]);
        assert_eq!(request.functions[1], AggregateFunction::Avg("rating".to_string()));
        assert_eq!(request.functions[1].output_name(), "avg_rating");
        assert_eq!(request.having[0].operator, PredicateOperator::GreaterThanOrEqual);
        assert!(request.stddev.is_none());
    }

    #[test]
    fn test_predicate_value_types() {
        match PredicateValue::from(10115) {
            PredicateValue::Integer(i) => assert_eq!(i, 10115),
            _ => panic!("Expected integer value"),
        }
        match PredicateValue::from(3.5) {
            PredicateValue::Number(n) => assert_eq!(n, 3.5),
            _ => panic!("Expected number value"),
        }
        let list: PredicateValue = serde_json::from_str(r#"["cafe", "bar"]"#).unwrap();
        assert_eq!(list.to_string(), "('cafe', 'bar')");
        assert_eq!(Predicate::name_contains("ALDI").value, PredicateValue::String("%ALDI%".to_string()));
    }
}
