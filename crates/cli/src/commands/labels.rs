//! Commands querying a running scheduler service

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::commands::replay::{node_rows, task_rows};
use crate::output::{
    color_status, format_optional, format_score, print_json, print_table, print_warning,
    OutputFormat,
};

/// Show current node and task labels
pub async fn show_labels(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let labels = client.labels().await?;

    match format {
        OutputFormat::Json => print_json(&labels)?,
        OutputFormat::Table => {
            match &labels.node_labels {
                Some(nodes) => print_table(
                    &format!("Node labels ({} mode, revision {})", nodes.mode, nodes.revision),
                    node_rows(nodes),
                ),
                None => print_warning("No node labels yet, placement is in cold mode"),
            }
            println!();
            match &labels.task_labels {
                Some(tasks) => print_table(
                    &format!(
                        "Task labels (revision {}, from node revision {})",
                        tasks.revision, tasks.node_revision
                    ),
                    task_rows(tasks),
                ),
                None => print_warning("No task labels yet"),
            }
        }
    }
    Ok(())
}

/// Row for the estimations table
#[derive(Tabled)]
struct EstimationRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Score")]
    score: String,
}

/// Show general and per-task node rankings
pub async fn show_estimations(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let estimations = client.estimations().await?;

    match format {
        OutputFormat::Json => print_json(&estimations)?,
        OutputFormat::Table => {
            let general = estimations.general.iter().map(|(node, score)| EstimationRow {
                scope: "general".to_string(),
                node: node.clone(),
                score: format_score(*score),
            });
            let per_task = estimations.per_task.iter().flat_map(|(task, scores)| {
                scores.iter().map(move |(node, score)| EstimationRow {
                    scope: task.clone(),
                    node: node.clone(),
                    score: format_score(*score),
                })
            });
            print_table("Node speed estimations", general.chain(per_task).collect::<Vec<_>>());
        }
    }
    Ok(())
}

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show engine status and component health
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "status": status,
            "health": health,
        }))?,
        OutputFormat::Table => {
            println!("{}", "Scheduler Status".bold());
            println!("{}", "=".repeat(40));
            println!("Execution:      {}", status.execution.cyan());
            println!("Labelling:      {}", status.labelling_mode);
            println!("Estimator:      {}", format_optional(status.estimator.as_deref()));
            println!("Placement:      {}", color_status(status.placement_mode.as_str()));
            println!("Observations:   {}", status.observations);
            println!("Node revision:  {}", format_optional(status.node_labels_revision));
            println!("Task revision:  {}", format_optional(status.task_labels_revision));
            if status.estimator_faulted {
                println!("{}", "Estimator faulted".red().bold());
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    component: name.clone(),
                    status: color_status(component.status.as_str()),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table("Components", rows);
        }
    }
    Ok(())
}
