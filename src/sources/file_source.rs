use async_trait::async_trait;
use std::path::{Path, PathBuf};
use csv::ReaderBuilder;
use glob::glob;
use tracing::debug;

use crate::sources::source_trait::PointSource;
use crate::utils::{
    error::{EngineResult, SourceError},
    types::{Entity, Key, Point, Value},
};

const PARTITION_PREFIX: &str = "partition:";

/// Point source reading CSV or JSON files, optionally through a glob pattern
pub struct FilePointSource {
    pattern: String,
    supported_extensions: Vec<String>,
}

/// Role of a CSV column
#[derive(Debug, Clone, PartialEq)]
enum CsvColumn {
    Id,
    Name,
    Category,
    X,
    Y,
    Partition(String),
    Attribute(String),
}

impl FilePointSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            supported_extensions: vec!["csv".to_string(), "json".to_string()],
        }
    }

    /// Check if a file extension is supported
    fn is_supported_extension(&self, extension: &str) -> bool {
        self.supported_extensions.iter().any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Expand the pattern into the files to read, in path order
    fn resolve_paths(&self) -> Result<Vec<PathBuf>, SourceError> {
        if self.pattern.contains(['*', '?', '[']) {
            let entries = glob(&self.pattern).map_err(|e| SourceError::InvalidPattern(e.to_string()))?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|path| path.is_file() && self.is_supported_extension(&Self::extension(path)))
                .collect();
            if paths.is_empty() {
                return Err(SourceError::NoMatches(self.pattern.clone()));
            }
            paths.sort();
            return Ok(paths);
        }

        let path = PathBuf::from(&self.pattern);
        if !path.is_file() {
            return Err(SourceError::ReadFailed {
                path: self.pattern.clone(),
                reason: "file not found".to_string(),
            });
        }
        if !self.is_supported_extension(&Self::extension(&path)) {
            return Err(SourceError::UnsupportedFormat(self.pattern.clone()));
        }
        Ok(vec![path])
    }

    fn classify(header: &str) -> CsvColumn {
        if let Some(dimension) = header.strip_prefix(PARTITION_PREFIX) {
            return CsvColumn::Partition(dimension.to_string());
        }
        match header.to_ascii_lowercase().as_str() {
            "id" => CsvColumn::Id,
            "name" => CsvColumn::Name,
            "category" => CsvColumn::Category,
            "x" | "lon" | "lng" | "longitude" => CsvColumn::X,
            "y" | "lat" | "latitude" => CsvColumn::Y,
            _ => CsvColumn::Attribute(header.to_string()),
        }
    }

    fn parse_key(field: &str) -> Key {
        field.parse::<i64>().map(Key::Int).unwrap_or_else(|_| Key::Text(field.to_string()))
    }

    /// Infer an attribute value from its text form
    fn parse_value(field: &str) -> Value {
        if let Ok(int_val) = field.parse::<i64>() {
            Value::Integer(int_val)
        } else if let Ok(float_val) = field.parse::<f64>() {
            Value::Float(float_val)
        } else if let Ok(bool_val) = field.parse::<bool>() {
            Value::Boolean(bool_val)
        } else {
            Value::Text(field.to_string())
        }
    }

    /// Parse a CSV file with an `id,name,category,x,y` layout plus partition and attribute columns
    fn parse_csv(&self, path: &Path, content: &str) -> Result<Vec<Entity>, SourceError> {
        let display = path.display().to_string();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers().map_err(|e| SourceError::ReadFailed {
            path: display.clone(),
            reason: format!("failed to read CSV headers: {}", e),
        })?;
        let columns: Vec<CsvColumn> = headers.iter().map(Self::classify).collect();
        for required in [CsvColumn::Id, CsvColumn::X, CsvColumn::Y] {
            if !columns.contains(&required) {
                return Err(SourceError::MalformedRecord {
                    path: display,
                    line: 1,
                    reason: format!("missing required column {:?}", required).to_lowercase(),
                });
            }
        }

        let mut entities = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| SourceError::MalformedRecord {
                path: display.clone(),
                line: e.position().map_or(0, |p| p.line()),
                reason: e.to_string(),
            })?;
            let line = record.position().map_or(0, |p| p.line());
            let malformed = |reason: String| SourceError::MalformedRecord {
                path: display.clone(),
                line,
                reason,
            };

            let mut id = None;
            let mut point = Point::new(f64::NAN, f64::NAN);
            let mut entity = Entity::new(0, 0.0, 0.0);
            for (column, field) in columns.iter().zip(record.iter()) {
                if field.is_empty() {
                    continue;
                }
                match column {
                    CsvColumn::Id => id = Some(Self::parse_key(field)),
                    CsvColumn::Name => entity.name = field.to_string(),
                    CsvColumn::Category => entity.category = field.to_string(),
                    CsvColumn::X => {
                        point.x = field
                            .parse()
                            .map_err(|_| malformed(format!("invalid x coordinate '{}'", field)))?
                    }
                    CsvColumn::Y => {
                        point.y = field
                            .parse()
                            .map_err(|_| malformed(format!("invalid y coordinate '{}'", field)))?
                    }
                    CsvColumn::Partition(dimension) => {
                        entity.partition_keys.insert(dimension.clone(), Self::parse_key(field));
                    }
                    CsvColumn::Attribute(name) => {
                        entity.attributes.insert(name.clone(), Self::parse_value(field));
                    }
                }
            }

            entity.id = id.ok_or_else(|| malformed("missing id".to_string()))?;
            if !point.is_finite() {
                return Err(malformed(format!("missing or non-finite coordinates for id {}", entity.id)));
            }
            entity.coordinates = point;
            entities.push(entity);
        }

        Ok(entities)
    }

    /// Parse a JSON array of entity objects
    fn parse_json(&self, path: &Path, content: &str) -> Result<Vec<Entity>, SourceError> {
        serde_json::from_str(content).map_err(|e| SourceError::MalformedRecord {
            path: path.display().to_string(),
            line: e.line() as u64,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PointSource for FilePointSource {
    async fn load(&self) -> EngineResult<Vec<Entity>> {
        let mut entities = Vec::new();
        for path in self.resolve_paths()? {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| SourceError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

            let parsed = match Self::extension(&path).as_str() {
                "csv" => self.parse_csv(&path, &content)?,
                "json" => self.parse_json(&path, &content)?,
                _ => return Err(SourceError::UnsupportedFormat(path.display().to_string()).into()),
            };
            debug!(path = %path.display(), entities = parsed.len(), "file parsed");
            entities.extend(parsed);
        }
        Ok(entities)
    }

    fn describe(&self) -> String {
        format!("files matching {}", self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_columns() {
        assert_eq!(FilePointSource::classify("id"), CsvColumn::Id);
        assert_eq!(FilePointSource::classify("Lat"), CsvColumn::Y);
        assert_eq!(
            FilePointSource::classify("partition:zipcode"),
            CsvColumn::Partition("zipcode".to_string())
        );
        assert_eq!(FilePointSource::classify("rating"), CsvColumn::Attribute("rating".to_string()));
    }

    #[test]
    fn test_parse_csv_record() {
        let source = FilePointSource::new("unused.csv");
        let content = "id,name,category,x,y,partition:zipcode,rating,open\n\
                       7,Stadtbad,swimming_pool,13.39,52.53,10115,4.5,true\n\
                       n8,Kiosk,kiosk,13.40,52.52,,,\n";
        let entities = source.parse_csv(Path::new("pois.csv"), content).unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, Key::Int(7));
        assert_eq!(entities[0].partition("zipcode"), Some(&Key::Int(10115)));
        assert_eq!(entities[0].attribute("rating"), Some(&Value::Float(4.5)));
        assert_eq!(entities[0].attribute("open"), Some(&Value::Boolean(true)));
        assert_eq!(entities[1].id, Key::Text("n8".to_string()));
        assert!(entities[1].partition_keys.is_empty());
        assert!(entities[1].attributes.is_empty());
    }

    #[test]
    fn test_parse_csv_rejects_bad_coordinates() {
        let source = FilePointSource::new("unused.csv");
        let content = "id,x,y\n1,13.4,52.5\n2,east,52.5\n";
        match source.parse_csv(Path::new("bad.csv"), content) {
            Err(SourceError::MalformedRecord { line, reason, .. }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("east"));
            }
            _ => panic!("Expected MalformedRecord error"),
        }

        let missing = source.parse_csv(Path::new("bad.csv"), "id,name\n1,a\n");
        assert!(matches!(missing, Err(SourceError::MalformedRecord { line: 1, .. })));
    }
}
