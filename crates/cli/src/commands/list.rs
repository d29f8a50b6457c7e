//! List command: enumerate scenarios in a directory

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use vigil_runner::Scenario;

use crate::output::{print_list, OutputFormat, TableDisplay};
use crate::EXIT_PASS;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory of scenario files
    #[arg(long, default_value = "scenarios")]
    pub scenarios_dir: PathBuf,

    /// Show only scenarios carrying this tag
    #[arg(long)]
    pub tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScenarioRow {
    name: String,
    description: String,
    tags: Vec<String>,
    steps: usize,
    login: bool,
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "DESCRIPTION", "TAGS", "STEPS", "LOGIN"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.description.clone(),
            self.tags.join(", "),
            self.steps.to_string(),
            if self.login { "yes" } else { "no" }.to_string(),
        ]
    }
}

pub fn execute(args: ListArgs, format: OutputFormat) -> anyhow::Result<i32> {
    let mut scenarios = Scenario::load_all(&args.scenarios_dir)?;
    if let Some(tag) = &args.tag {
        scenarios.retain(|s| s.tags.iter().any(|t| t == tag));
    }

    let rows: Vec<ScenarioRow> = scenarios
        .iter()
        .map(|s| ScenarioRow {
            name: s.name.clone(),
            description: s.description.clone(),
            tags: s.tags.clone(),
            steps: s.steps.len(),
            login: s.session.login.is_some(),
        })
        .collect();

    print_list(&rows, format);
    Ok(EXIT_PASS)
}
