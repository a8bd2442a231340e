use std::path::Path;
use std::time::Duration;
use anyhow::Context;
use clap::Parser;
use serde::de::DeserializeOwned;
use crate::cli::{CliArgs, Commands, DatasetArgs, DistanceArg, OutputFormat, OutputFormatter};
use crate::engine::{Engine, EngineBuilder};
use crate::sources::FilePointSource;
use crate::utils::{
    config::EngineConfig,
    error::EngineResult,
    request::{AggregateRequest, JoinRequest, NearestRequest, Predicate},
    telemetry::init_logging,
};

/// Main CLI runner that handles command execution
pub struct CliRunner {
    engine: Engine,
}

impl CliRunner {
    /// Build an engine from the configuration and load the dataset
    pub async fn new(config: EngineConfig, data: &str) -> EngineResult<Self> {
        let engine = EngineBuilder::new().with_config(config).build()?;
        engine.bulk_load(&FilePointSource::new(data)).await?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Execute a join request file and return formatted results
    pub async fn run_join(
        &self,
        request_path: &str,
        format: &OutputFormat,
        timeout: Option<Duration>,
    ) -> anyhow::Result<String> {
        let request: JoinRequest = load_request(request_path)?;
        let result = match timeout {
            Some(deadline) => self.engine.execute_join_with_deadline(request, deadline).await?,
            None => self.engine.execute_join(request).await?,
        };
        if result.is_cancelled() {
            eprintln!(
                "{}",
                OutputFormatter::format_warning(&format!("join cancelled after {} rows", result.row_count()))
            );
        }
        Ok(OutputFormatter::format_result(&result, format))
    }

    pub async fn run_aggregate(&self, request_path: &str, format: &OutputFormat) -> anyhow::Result<String> {
        let request: AggregateRequest = load_request(request_path)?;
        let result = self.engine.aggregate(request).await?;
        Ok(OutputFormatter::format_result(&result, format))
    }

    pub async fn run_nearest(
        &self,
        request: NearestRequest,
        format: &OutputFormat,
    ) -> anyhow::Result<String> {
        let result = self.engine.nearest(request).await?;
        Ok(OutputFormatter::format_result(&result, format))
    }

    pub async fn run_stats(&self, format: &OutputFormat) -> String {
        OutputFormatter::format_stats(&self.engine.stats().await, format)
    }
}

/// Read and parse a JSON request file
pub fn load_request<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse request file {}", path.display()))
}

fn load_config(dataset: &DatasetArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &dataset.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if dataset.verbose {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}

/// Main entry point for CLI execution
pub async fn run_cli() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = match load_config(args.command.dataset()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&format!("{:#}", e)));
            std::process::exit(1);
        }
    };
    let _log_guards = init_logging(&config.logging);

    let data = args.command.dataset().data.clone();
    let runner = match CliRunner::new(config, &data).await {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    };

    let output = match args.command {
        Commands::Join { request, format, timeout_ms, .. } => {
            runner.run_join(&request, &format, timeout_ms.map(Duration::from_millis)).await
        }
        Commands::Aggregate { request, format, .. } => runner.run_aggregate(&request, &format).await,
        Commands::Nearest { x, y, k, distance, category, format, .. } => {
            let request = NearestRequest {
                x,
                y,
                k,
                kind: distance.map(DistanceArg::into),
                predicates: category.iter().map(|c| Predicate::category(c)).collect(),
            };
            runner.run_nearest(request, &format).await
        }
        Commands::Stats { format, .. } => Ok(runner.run_stats(&format).await),
    };

    match output {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&format!("{:#}", e)));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"roles": [{{"alias": "p1"}}, {{"alias": "p2"}}],
                "distance_constraints": [{{"left": "p1", "right": "p2", "max_distance": 300.0}}]}}"#
        )
        .unwrap();

        let request: JoinRequest = load_request(file.path()).unwrap();
        assert_eq!(request.roles.len(), 2);
        assert_eq!(request.distance_constraints[0].max_distance, 300.0);
        assert!(!request.distance_constraints[0].inclusive);
    }

    #[test]
    fn test_load_request_reports_path() {
        let error = load_request::<JoinRequest>("/nonexistent/join.json").unwrap_err();
        assert!(format!("{:#}", error).contains("/nonexistent/join.json"));
    }
}
