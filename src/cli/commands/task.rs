//! Task CLI commands.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::output::{output, status_cell, table, task_status_color, truncate, CommandOutput};
use crate::domain::models::{ClientConfig, TaskDefinition, TaskExecution};

#[derive(Args, Debug)]
pub struct OrchestrateArgs {
    /// Swarm id
    pub swarm_id: String,
    /// YAML or JSON file holding a list of tasks, or `{ tasks: [...] }`
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<TaskDefinition>),
    Wrapped { tasks: Vec<TaskDefinition> },
}

impl From<TaskFile> for Vec<TaskDefinition> {
    fn from(file: TaskFile) -> Self {
        match file {
            TaskFile::List(tasks) | TaskFile::Wrapped { tasks } => tasks,
        }
    }
}

/// Parse a task batch; `.json` files are read as JSON, everything else as YAML.
pub fn parse_task_file(path: &Path, content: &str) -> Result<Vec<TaskDefinition>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let file: TaskFile = if is_json {
        serde_json::from_str(content).context("Invalid JSON task file")?
    } else {
        serde_yaml::from_str(content).context("Invalid YAML task file")?
    };
    Ok(file.into())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateOutput {
    pub swarm_id: String,
    pub submitted: Vec<TaskExecution>,
}

impl CommandOutput for OrchestrateOutput {
    fn to_human(&self) -> String {
        if self.submitted.is_empty() {
            return "No tasks submitted.".to_string();
        }
        let mut tasks = table(["ORDER", "TASK", "STATUS", "AGENTS"]);
        for (i, task) in self.submitted.iter().enumerate() {
            tasks.add_row(vec![
                Cell::new(i + 1),
                Cell::new(truncate(&task.task_id, 32)),
                status_cell(task.status, task_status_color(task.status)),
                Cell::new(task.assigned_agents.join(", ")),
            ]);
        }
        format!(
            "Submitted {} task(s) to swarm {}:\n{tasks}",
            self.submitted.len(),
            self.swarm_id
        )
    }
}

pub async fn orchestrate(args: OrchestrateArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let tasks = parse_task_file(&args.file, &content)?;

    let (api, _) = super::connect(config).await?;
    // Capability-aware ordering needs the swarm's agents in the mirror.
    api.client().swarm_status(&args.swarm_id).await?;
    let submitted = api
        .task_orchestrate(&args.swarm_id, &tasks)
        .await
        .with_context(|| format!("Failed to orchestrate {} task(s)", tasks.len()))?;
    api.client().disconnect().await;

    output(
        &OrchestrateOutput {
            swarm_id: args.swarm_id,
            submitted,
        },
        json_mode,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskPriority;

    #[test]
    fn test_parse_yaml_list() {
        let yaml = r"
- id: build
  description: compile
  priority: high
- id: test
  dependencies: [build]
";
        let tasks = parse_task_file(Path::new("tasks.yaml"), yaml).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[1].dependencies, vec!["build".to_string()]);
    }

    #[test]
    fn test_parse_wrapped_json() {
        let json = r#"{ "tasks": [ { "id": "a" }, { "id": "b", "dependencies": ["a"] } ] }"#;
        let tasks = parse_task_file(Path::new("batch.JSON"), json).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_task_file(Path::new("t.json"), "not json").is_err());
    }
}
