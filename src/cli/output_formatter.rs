use colored::*;
use serde_json::{json, Value as JsonValue};
use crate::engine::DatasetStats;
use crate::utils::types::{QueryResult, Value};
use crate::cli::cli_args::OutputFormat;

/// Formats query results for CLI output
pub struct OutputFormatter;

impl OutputFormatter {
    /// Format query results according to the specified format
    pub fn format_result(result: &QueryResult, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(result),
            OutputFormat::Json => Self::format_json(result),
            OutputFormat::Csv => Self::format_csv(result),
        }
    }

    /// Format results as a colored table
    fn format_table(result: &QueryResult) -> String {
        if result.is_empty() {
            return "No results found.".dimmed().to_string();
        }

        let mut col_widths: Vec<usize> = result.columns.iter().map(|col| col.name.len()).collect();
        for row in &result.rows {
            for (i, value) in row.values.iter().enumerate() {
                if i < col_widths.len() {
                    col_widths[i] = col_widths[i].max(Self::value_to_string(value).len());
                }
            }
        }
        for width in &mut col_widths {
            *width = (*width).max(8);
        }

        let mut output = String::new();
        output.push_str(&Self::format_table_separator(&col_widths, '+'));
        output.push('|');
        for (i, col) in result.columns.iter().enumerate() {
            output.push_str(&format!(" {:<width$} |", col.name.bold().cyan(), width = col_widths[i]));
        }
        output.push('\n');
        output.push_str(&Self::format_table_separator(&col_widths, '|'));

        for row in &result.rows {
            output.push('|');
            for (i, value) in row.values.iter().enumerate() {
                if i < col_widths.len() {
                    output.push_str(&format!(
                        " {:<width$} |",
                        Self::format_value_colored(value),
                        width = col_widths[i]
                    ));
                }
            }
            output.push('\n');
        }
        output.push_str(&Self::format_table_separator(&col_widths, '+'));

        output.push_str(&format!(
            "\n{} {} in {}ms\n",
            result.row_count().to_string().green().bold(),
            if result.row_count() == 1 { "row" } else { "rows" },
            result.execution_time.as_millis()
        ));
        if result.is_cancelled() {
            output.push_str(&Self::format_warning("execution was cancelled; results are partial"));
            output.push('\n');
        }

        output
    }

    fn format_table_separator(col_widths: &[usize], edge: char) -> String {
        let mut separator = String::new();
        separator.push(edge);
        for &width in col_widths {
            separator.push_str(&"-".repeat(width + 2));
            separator.push(edge);
        }
        separator.push('\n');
        separator
    }

    /// Format results as JSON
    fn format_json(result: &QueryResult) -> String {
        let rows: Vec<JsonValue> = result
            .rows
            .iter()
            .map(|row| {
                let row_obj: serde_json::Map<String, JsonValue> = result
                    .columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(col, value)| (col.name.clone(), Self::value_to_json(value)))
                    .collect();
                JsonValue::Object(row_obj)
            })
            .collect();

        let output = json!({
            "data": rows,
            "metadata": {
                "columns": result.columns.iter().map(|col| {
                    json!({
                        "name": col.name,
                        "type": col.data_type,
                        "nullable": col.nullable
                    })
                }).collect::<Vec<_>>(),
                "row_count": result.row_count(),
                "cancelled": result.is_cancelled(),
                "execution_time_ms": result.execution_time.as_millis() as u64
            }
        });

        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format results as CSV
    fn format_csv(result: &QueryResult) -> String {
        let mut output = String::new();

        let headers: Vec<String> = result.columns.iter().map(|col| Self::escape_csv_field(&col.name)).collect();
        output.push_str(&headers.join(","));
        output.push('\n');

        for row in &result.rows {
            let values: Vec<String> = row
                .values
                .iter()
                .map(|value| match value {
                    // Empty cells read back as absent
                    Value::Null => String::new(),
                    other => Self::escape_csv_field(&Self::value_to_string(other)),
                })
                .collect();
            output.push_str(&values.join(","));
            output.push('\n');
        }

        output
    }

    /// Format dataset statistics as an indented listing or JSON
    pub fn format_stats(stats: &DatasetStats, format: &OutputFormat) -> String {
        if let OutputFormat::Json = format {
            return serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string());
        }

        let mut output = String::new();
        output.push_str(&format!("{} {}\n", "Entities:".bold(), stats.entities.to_string().green()));
        output.push_str(&format!(
            "{} cell size {}, {} occupied cells\n",
            "Spatial grid:".bold(),
            Self::format_float(stats.cell_size),
            stats.occupied_cells
        ));

        output.push_str(&format!("\n{}\n", "Partition dimensions:".bold()));
        if stats.partitions.is_empty() {
            output.push_str(&format!("  {}\n", "none".dimmed()));
        }
        for partition in &stats.partitions {
            output.push_str(&format!(
                "  {} {} {} values, {} populated, {} per bucket\n",
                "•".green(),
                partition.dimension.cyan().bold(),
                partition.cardinality,
                partition.populated,
                Self::format_float(partition.expected_bucket_size)
            ));
        }

        output.push_str(&format!("\n{}\n", "Attributes:".bold()));
        if stats.attributes.is_empty() {
            output.push_str(&format!("  {}\n", "none".dimmed()));
        }
        for attribute in &stats.attributes {
            let types: Vec<String> = attribute.types.iter().map(|t| format!("{:?}", t).to_lowercase()).collect();
            output.push_str(&format!(
                "  {} {} {} ({} entities)\n",
                "•".green(),
                attribute.name.cyan().bold(),
                types.join("|").blue(),
                attribute.count
            ));
        }

        output
    }

    /// Print floats without trailing zeros, up to six decimals
    fn format_float(value: f64) -> String {
        if value.fract() == 0.0 && value.is_finite() {
            return format!("{:.1}", value);
        }
        let text = format!("{:.6}", value);
        text.trim_end_matches('0').to_string()
    }

    /// Convert a Value to a display string
    fn value_to_string(value: &Value) -> String {
        match value {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => Self::format_float(*f),
            Value::Boolean(b) => b.to_string(),
            Value::Point { x, y } => format!("POINT({} {})", Self::format_float(*x), Self::format_float(*y)),
            Value::Null => "NULL".to_string(),
        }
    }

    /// Convert a Value to a colored string for table display
    fn format_value_colored(value: &Value) -> ColoredString {
        match value {
            Value::Text(s) => s.normal(),
            Value::Integer(_) | Value::Float(_) => Self::value_to_string(value).blue(),
            Value::Boolean(true) => "true".green(),
            Value::Boolean(false) => "false".red(),
            Value::Point { .. } => Self::value_to_string(value).magenta(),
            Value::Null => "NULL".dimmed(),
        }
    }

    /// Convert a Value to JSON
    fn value_to_json(value: &Value) -> JsonValue {
        match value {
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Point { x, y } => json!({ "x": x, "y": y }),
            Value::Null => JsonValue::Null,
        }
    }

    /// Escape CSV field if it contains special characters
    fn escape_csv_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    /// Format error message for CLI display
    pub fn format_error(error: &dyn std::fmt::Display) -> String {
        format!("{} {}", "Error:".red().bold(), error.to_string().red())
    }

    pub fn format_warning(message: &str) -> String {
        format!("{} {}", "Warning:".yellow().bold(), message)
    }

    /// Format info message for CLI display
    pub fn format_info(message: &str) -> String {
        format!("{} {}", "Info:".blue().bold(), message)
    }
}
