//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use vigil_engine::assertion::Verdict;
use vigil_runner::{ScenarioReport, StepReport};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for StepReport {
    fn headers() -> Vec<&'static str> {
        vec!["STEP", "VERDICT", "CORRELATION", "LATENCY", "WAITED", "DETAIL"]
    }

    fn row(&self) -> Vec<String> {
        let correlation = self
            .correlation
            .as_ref()
            .map_or_else(|| "-".to_string(), |c| c.verdict.to_string());
        let latency = self
            .correlation
            .as_ref()
            .and_then(|c| c.latency)
            .map_or_else(|| "-".to_string(), |l| format!("{}ms", l.as_millis()));
        let waited = self
            .correlation
            .as_ref()
            .map_or_else(|| "-".to_string(), |c| format!("{}ms", c.waited.as_millis()));
        let detail = if self.skipped {
            "skipped".to_string()
        } else if let Some(error) = &self.driver_error {
            error.clone()
        } else {
            self.diagnostic
                .as_ref()
                .map(|d| d.message.clone())
                .unwrap_or_default()
        };

        vec![
            self.name.clone(),
            verdict_cell(self),
            correlation,
            latency,
            waited,
            detail,
        ]
    }
}

fn verdict_cell(step: &StepReport) -> String {
    if step.skipped {
        return "skipped".dimmed().to_string();
    }
    match step.verdict {
        Verdict::Pass => "pass".green().to_string(),
        Verdict::Fail => "fail".red().to_string(),
        Verdict::Inconclusive => "inconclusive".yellow().to_string(),
    }
}

/// Print one scenario report
pub fn print_report(report: &ScenarioReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let symbol = match report.overall() {
                Verdict::Pass => "✓".green(),
                Verdict::Fail => "✗".red(),
                Verdict::Inconclusive => "?".yellow(),
            };
            println!();
            println!(
                "{} {} ({} ms{})",
                symbol,
                report.scenario.bold(),
                report.duration_ms,
                if report.aborted { ", aborted" } else { "" }
            );
            print_list(&report.steps, OutputFormat::Table);
        }
        other => print_item(report, other),
    }
}

/// Print a single item
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Table | OutputFormat::Plain => {
            println!("{}", serde_json::to_string_pretty(item).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(item).unwrap_or_default());
        }
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for item in items {
                for (header, value) in T::headers().iter().zip(item.row().iter()) {
                    println!("{}: {}", header, value);
                }
                println!();
            }
        }
    }
}
