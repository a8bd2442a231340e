use poi_engine::{Engine, EngineConfig, EngineError, FilePointSource, Key, PointSource, SourceError, Value};
use std::fs;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn test_load_csv_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "berlin.csv",
        "id,name,category,x,y,partition:zipcode,partition:region,rating\n\
         1,Eis Café,ice_cream,13.3958,52.5310,10115,Berlin,4.6\n\
         2,Stadtbad,swimming_pool,13.3984,52.5330,10115,Berlin,\n",
    );

    let entities = FilePointSource::new(path).load().await.unwrap();

    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].name, "Eis Café");
    assert_eq!(entities[0].coordinates.x, 13.3958);
    assert_eq!(entities[0].partition("region"), Some(&Key::Text("Berlin".to_string())));
    assert_eq!(entities[0].attribute("rating"), Some(&Value::Float(4.6)));
    assert_eq!(entities[1].attribute("rating"), None);
}

#[tokio::test]
async fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "pois.json",
        r#"[
            {"id": "node/1", "coordinates": {"x": 1.0, "y": 2.0}, "category": "kiosk"},
            {"id": "node/2", "coordinates": {"x": 3.0, "y": 4.0}, "partition_keys": {"zipcode": 12043}}
        ]"#,
    );

    let entities = FilePointSource::new(path).load().await.unwrap();

    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].id, Key::Text("node/1".to_string()));
    assert_eq!(entities[0].category, "kiosk");
    assert_eq!(entities[1].partition("zipcode"), Some(&Key::Int(12043)));
}

#[tokio::test]
async fn test_glob_pattern_combines_files() {
    let dir = TempDir::new().unwrap();
    write_file(&dir, "a.csv", "id,x,y\n1,0,0\n2,1,1\n");
    write_file(&dir, "b.json", r#"[{"id": 3, "coordinates": {"x": 2.0, "y": 2.0}}]"#);
    write_file(&dir, "notes.txt", "not a dataset");

    let pattern = format!("{}/*", dir.path().display());
    let source = FilePointSource::new(pattern.clone());
    let entities = source.load().await.unwrap();

    assert_eq!(entities.len(), 3);
    assert!(source.describe().contains(&pattern));
}

#[tokio::test]
async fn test_source_errors() {
    let dir = TempDir::new().unwrap();
    let xml = write_file(&dir, "pois.xml", "<pois/>");

    match FilePointSource::new(xml).load().await {
        Err(EngineError::Source(SourceError::UnsupportedFormat(_))) => {}
        _ => panic!("Expected UnsupportedFormat error"),
    }

    let pattern = format!("{}/*.csv", dir.path().display());
    match FilePointSource::new(pattern).load().await {
        Err(EngineError::Source(SourceError::NoMatches(_))) => {}
        _ => panic!("Expected NoMatches error"),
    }

    let missing = format!("{}/missing.csv", dir.path().display());
    match FilePointSource::new(missing).load().await {
        Err(EngineError::Source(SourceError::ReadFailed { .. })) => {}
        _ => panic!("Expected ReadFailed error"),
    }

    let broken = write_file(&dir, "broken.json", "[{\"id\": 1}]");
    match FilePointSource::new(broken).load().await {
        Err(EngineError::Source(SourceError::MalformedRecord { line, .. })) => assert_eq!(line, 1),
        _ => panic!("Expected MalformedRecord error"),
    }
}

#[tokio::test]
async fn test_engine_bulk_load_from_files() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "pois.csv",
        "id,category,x,y,partition:zipcode\n1,cafe,0,0,10115\n2,cafe,5,0,10115\n3,bar,9,0,10119\n",
    );
    let engine = Engine::new(EngineConfig::default());

    let loaded = engine
        .bulk_load(&FilePointSource::new(format!("{}/*.csv", dir.path().display())))
        .await
        .unwrap();

    assert_eq!(loaded, 3);
    let stats = engine.stats().await;
    assert_eq!(stats.partitions[0].dimension, "zipcode");
    assert_eq!(stats.partitions[0].cardinality, 2);
}
