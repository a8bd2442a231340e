use clap::{Args, Parser, Subcommand, ValueEnum};
use crate::utils::request::DistanceKind;

/// POI Engine CLI - proximity joins and cluster statistics over point-of-interest data
#[derive(Parser, Debug)]
#[command(name = "poi")]
#[command(about = "Partition-aware spatial proximity join engine")]
#[command(version = "0.1.0")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a proximity join request
    Join {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// JSON join request file
        #[arg(short, long, value_name = "FILE")]
        request: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Cancel the join after this many milliseconds and print the rows found so far
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Compute grouped statistics
    Aggregate {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// JSON aggregate request file
        #[arg(short, long, value_name = "FILE")]
        request: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Find the entities closest to a point
    Nearest {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// Number of neighbours
        #[arg(short, long, default_value_t = 5)]
        k: usize,

        /// Distance function; defaults to the configured one
        #[arg(long)]
        distance: Option<DistanceArg>,

        /// Only consider entities of this category
        #[arg(long)]
        category: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show dataset and index statistics
    Stats {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

/// Options shared by every command that loads a dataset
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// CSV or JSON file, or a glob pattern matching several
    #[arg(short, long, value_name = "GLOB")]
    pub data: String,

    /// Engine configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    /// Formatted table output
    Table,
    /// JSON output
    Json,
    /// CSV output
    Csv,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DistanceArg {
    Euclidean,
    Geodesic,
}

impl Commands {
    pub fn dataset(&self) -> &DatasetArgs {
        match self {
            Commands::Join { dataset, .. }
            | Commands::Aggregate { dataset, .. }
            | Commands::Nearest { dataset, .. }
            | Commands::Stats { dataset, .. } => dataset,
        }
    }
}

impl From<DistanceArg> for DistanceKind {
    fn from(arg: DistanceArg) -> Self {
        match arg {
            DistanceArg::Euclidean => DistanceKind::Euclidean,
            DistanceArg::Geodesic => DistanceKind::Geodesic,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_command() {
        let args = CliArgs::try_parse_from([
            "poi", "join", "--data", "pois/*.csv", "--request", "join.json", "--format", "json",
        ])
        .unwrap();

        match args.command {
            Commands::Join { dataset, request, format, timeout_ms } => {
                assert_eq!(dataset.data, "pois/*.csv");
                assert_eq!(request, "join.json");
                assert!(matches!(format, OutputFormat::Json));
                assert!(timeout_ms.is_none());
            }
            _ => panic!("Expected Join command"),
        }
    }

    #[test]
    fn test_parse_nearest_with_negative_coordinates() {
        let args = CliArgs::try_parse_from([
            "poi", "nearest", "-d", "pois.json", "--x", "-73.98", "--y", "40.75", "-k", "3",
            "--distance", "geodesic",
        ])
        .unwrap();

        match args.command {
            Commands::Nearest { x, y, k, distance, .. } => {
                assert_eq!(x, -73.98);
                assert_eq!(y, 40.75);
                assert_eq!(k, 3);
                assert_eq!(distance.map(DistanceKind::from), Some(DistanceKind::Geodesic));
            }
            _ => panic!("Expected Nearest command"),
        }
    }

    #[test]
    fn test_data_is_required() {
        assert!(CliArgs::try_parse_from(["poi", "stats"]).is_err());
    }
}
