//! Validate command: parse scenario files and report problems

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use vigil_runner::Scenario;

use crate::output::{print_list, OutputFormat, TableDisplay};
use crate::{EXIT_FAIL, EXIT_PASS};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario files to validate
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ValidationRow {
    file: String,
    ok: bool,
    name: String,
    steps: usize,
    problem: String,
}

impl TableDisplay for ValidationRow {
    fn headers() -> Vec<&'static str> {
        vec!["FILE", "STATUS", "SCENARIO", "STEPS", "PROBLEM"]
    }

    fn row(&self) -> Vec<String> {
        let status = if self.ok {
            "ok".green().to_string()
        } else {
            "error".red().to_string()
        };
        vec![
            self.file.clone(),
            status,
            self.name.clone(),
            self.steps.to_string(),
            self.problem.clone(),
        ]
    }
}

pub fn execute(args: ValidateArgs, format: OutputFormat) -> anyhow::Result<i32> {
    let mut rows = Vec::new();
    let mut failed = false;

    for path in &args.scenarios {
        match Scenario::from_file(path) {
            Ok(scenario) => rows.push(ValidationRow {
                file: path.display().to_string(),
                ok: true,
                name: scenario.name,
                steps: scenario.steps.len(),
                problem: String::new(),
            }),
            Err(e) => {
                failed = true;
                rows.push(ValidationRow {
                    file: path.display().to_string(),
                    ok: false,
                    name: "-".to_string(),
                    steps: 0,
                    problem: e.to_string(),
                });
            }
        }
    }

    print_list(&rows, format);
    Ok(if failed { EXIT_FAIL } else { EXIT_PASS })
}
