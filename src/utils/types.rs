use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque equality token used for entity ids and partition values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

/// Unique, immutable entity identifier
pub type EntityId = Key;

/// Value of one partition dimension (zipcode, region, landkreis, ...)
pub type PartitionValue = Key;

/// A coordinate pair: x is longitude, y is latitude for geodesic data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A point of interest or business record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub coordinates: Point,
    #[serde(default)]
    pub partition_keys: BTreeMap<String, PartitionValue>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Individual cell values in results and entity attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Point { x: f64, y: f64 },
    Null,
}

/// Supported data types of result columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Integer,
    Float,
    Boolean,
    Point,
}

/// Metadata for result columns
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// A row of data in query results
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Whether an execution ran to completion or was stopped by a cancellation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Completed,
    Cancelled,
}

/// Join or lookup query result
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
    pub status: ResultStatus,
    pub execution_time: Duration,
}

impl Key {
    /// Convert to a result value
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::Integer(*i),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Entity {
    /// Create an entity with empty name, category, partitions and attributes
    pub fn new(id: impl Into<EntityId>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            coordinates: Point::new(x, y),
            partition_keys: BTreeMap::new(),
            category: String::new(),
            name: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_partition(mut self, dimension: &str, value: impl Into<PartitionValue>) -> Self {
        self.partition_keys.insert(dimension.to_string(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Value of a partition dimension, if populated
    pub fn partition(&self, dimension: &str) -> Option<&PartitionValue> {
        self.partition_keys.get(dimension)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::Point { .. } => DataType::Point,
            // Default for null values
            Value::Text(_) | Value::Null => DataType::Text,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::Point { x, y } => write!(f, "POINT({} {})", x, y),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl QueryResult {
    /// Create a new empty, completed result
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            status: ResultStatus::Completed,
            execution_time: Duration::from_millis(0),
        }
    }

    /// Get the number of rows in the result
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ResultStatus::Cancelled
    }

    /// Position of a named output column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    /// Look up a cell by row position and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Rows as column-name keyed maps
    pub fn row_maps(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }

    /// Turn a cancelled result into an error so it cannot be mistaken for a complete one
    pub fn into_complete(self) -> crate::utils::error::EngineResult<Self> {
        match self.status {
            ResultStatus::Completed => Ok(self),
            ResultStatus::Cancelled => Err(crate::utils::error::EngineError::Cancelled {
                partial_rows: self.rows.len(),
            }),
        }
    }
}

impl Row {
    /// Create a new row with the given values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

impl Default for QueryResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let entity = Entity::new(1, 13.38, 52.53)
            .with_name("Eis Café")
            .with_category("ice_cream")
            .with_partition("zipcode", 10115)
            .with_attribute("rating", 4.5);

        assert_eq!(entity.id, Key::Int(1));
        assert_eq!(entity.coordinates, Point::new(13.38, 52.53));
        assert_eq!(entity.partition("zipcode"), Some(&Key::Int(10115)));
        assert_eq!(entity.partition("region"), None);
        assert_eq!(entity.attribute("rating"), Some(&Value::Float(4.5)));
        assert_eq!(entity.category, "ice_cream");
    }

    #[test]
    fn test_key_ordering_and_display() {
        assert!(Key::Int(2) < Key::Int(10));
        assert!(Key::Int(99) < Key::Text("a".to_string()));
        assert_eq!(Key::from("n123").to_string(), "n123");
        assert_eq!(Key::Int(42).to_value(), Value::Integer(42));
    }

    #[test]
    fn test_entity_deserialization() {
        let json = r#"{
            "id": "node/17",
            "coordinates": {"x": 13.4, "y": 52.5},
            "partition_keys": {"zipcode": 10115, "landkreis": "Berlin"},
            "category": "restaurant",
            "attributes": {"rating": 4, "vegan": true}
        }"#;

        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.id, Key::Text("node/17".to_string()));
        assert_eq!(entity.partition("landkreis"), Some(&Key::Text("Berlin".to_string())));
        assert_eq!(entity.attribute("rating"), Some(&Value::Integer(4)));
        assert_eq!(entity.attribute("vegan"), Some(&Value::Boolean(true)));
        assert!(entity.name.is_empty());
    }

    #[test]
    fn test_query_result_lookup() {
        let mut result = QueryResult::new();
        result.columns = vec![ColumnMetadata {
            name: "p1.name".to_string(),
            data_type: DataType::Text,
            nullable: false,
        }];
        result.rows = vec![Row::new(vec![Value::Text("Stadtbad".to_string())])];

        assert_eq!(result.column_index("p1.name"), Some(0));
        assert_eq!(result.value(0, "p1.name"), Some(&Value::Text("Stadtbad".to_string())));
        assert_eq!(result.value(0, "p2.name"), None);
        assert_eq!(result.row_maps()[0]["p1.name"], Value::Text("Stadtbad".to_string()));
    }

    #[test]
    fn test_cancelled_result_is_not_complete() {
        let mut result = QueryResult::new();
        result.rows = vec![Row::new(vec![Value::Integer(1)])];
        result.status = ResultStatus::Cancelled;

        assert!(result.is_cancelled());
        match result.into_complete() {
            Err(crate::utils::error::EngineError::Cancelled { partial_rows }) => assert_eq!(partial_rows, 1),
            _ => panic!("Expected Cancelled error"),
        }
    }

    #[test]
    fn test_value_numeric_view() {
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Text("3".to_string()).as_f64(), None);
        assert!(Value::Null.is_null());
    }
}
