//! Offline replay of recorded task terminations
//!
//! Feeds a JSON Lines file of terminations through a fresh engine, in
//! file order, and writes the labelling history as CSV files.

use anyhow::{Context, Result};
use colored::Colorize;
use scheduler_lib::{
    export::CsvExporter, NodeLabels, TaremaConfig, TaremaError, Tarema, TaskLabels,
    TaskTermination,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tabled::Tabled;
use tracing::{debug, warn};

use crate::output::{
    format_optional, format_score, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Replay inputs
#[derive(Debug, Clone)]
pub struct ReplayArgs {
    /// JSON Lines file, one termination per line
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub expected_nodes: Option<usize>,
    pub benchmarks: Option<PathBuf>,
    /// JSON engine configuration; flags override its fields
    pub engine_config: Option<PathBuf>,
}

/// What a replay did
#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub terminations: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub node_relabels: usize,
    pub task_relabels: usize,
    pub estimator_not_ready: usize,
    pub node_labels: Option<NodeLabels>,
    pub task_labels: Option<TaskLabels>,
}

fn engine_config(args: &ReplayArgs) -> Result<TaremaConfig> {
    let mut config = match &args.engine_config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read engine config {}", path.display()))?;
            serde_json::from_str(&content).context("Failed to parse engine config")?
        }
        None => TaremaConfig::default(),
    };
    if let Some(expected_nodes) = args.expected_nodes {
        config.expected_nodes = expected_nodes;
    }
    if let Some(benchmarks) = &args.benchmarks {
        config.benchmark_file = Some(benchmarks.clone());
    }
    Ok(config)
}

/// Run the replay and return its summary
pub fn replay(args: &ReplayArgs) -> Result<ReplaySummary> {
    let config = engine_config(args)?;
    let execution = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay".to_string());

    let engine = Tarema::new(execution, config)
        .context("Failed to build placement engine")?
        .with_exporter(CsvExporter::new(&args.out_dir)?);

    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;

    let mut summary = ReplaySummary::default();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", args.input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        summary.terminations += 1;

        let termination: TaskTermination = match serde_json::from_str(&line) {
            Ok(termination) => termination,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed termination");
                summary.rejected += 1;
                continue;
            }
        };

        match engine.on_task_terminated(&termination) {
            Ok(outcome) if !outcome.accepted => summary.duplicates += 1,
            Ok(outcome) => {
                summary.accepted += 1;
                summary.node_relabels += usize::from(outcome.node_labels_revision.is_some());
                summary.task_relabels += usize::from(outcome.task_labels_revision.is_some());
                summary.estimator_not_ready += usize::from(outcome.estimator_not_ready);
            }
            Err(TaremaError::Trace(e)) => {
                warn!(line = index + 1, error = %e, "Skipping invalid trace");
                summary.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        "Replay finished"
    );
    summary.node_labels = engine.node_labels().map(|l| (*l).clone());
    summary.task_labels = engine.task_labels().map(|l| (*l).clone());
    Ok(summary)
}

/// Row for node label tables
#[derive(Tabled)]
pub struct NodeRow {
    #[tabled(rename = "Node")]
    pub node: String,
    #[tabled(rename = "Label (cpu-mem-read-write)")]
    pub label: String,
    #[tabled(rename = "Score")]
    pub score: String,
}

/// Row for task label tables
#[derive(Tabled)]
pub struct TaskRow {
    #[tabled(rename = "Task")]
    pub task: String,
    #[tabled(rename = "Label (cpu-mem-read-write)")]
    pub label: String,
}

pub fn node_rows(labels: &NodeLabels) -> Vec<NodeRow> {
    labels
        .labels
        .iter()
        .map(|(node, label)| NodeRow {
            node: node.clone(),
            label: label.to_string(),
            score: format_optional(
                labels
                    .estimations
                    .as_ref()
                    .and_then(|e| e.get(node))
                    .map(|s| format_score(*s)),
            ),
        })
        .collect()
}

pub fn task_rows(labels: &TaskLabels) -> Vec<TaskRow> {
    labels
        .labels
        .iter()
        .map(|(task, label)| TaskRow {
            task: task.clone(),
            label: label.to_string(),
        })
        .collect()
}

/// Replay and print the outcome
pub fn run(args: ReplayArgs, format: OutputFormat) -> Result<()> {
    let summary = replay(&args)?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("{}", "Replay Summary".bold());
            println!("{}", "=".repeat(40));
            println!("Terminations:   {}", summary.terminations);
            println!("Accepted:       {}", summary.accepted.to_string().green());
            println!("Duplicates:     {}", summary.duplicates);
            println!("Rejected:       {}", summary.rejected.to_string().red());
            println!("Node relabels:  {}", summary.node_relabels);
            println!("Task relabels:  {}", summary.task_relabels);
            println!();

            match &summary.node_labels {
                Some(labels) => print_table(
                    &format!("Node labels (revision {})", labels.revision),
                    node_rows(labels),
                ),
                None => print_warning("Estimator never became ready, no node labels"),
            }
            if let Some(labels) = &summary.task_labels {
                println!();
                print_table(
                    &format!("Task labels (revision {})", labels.revision),
                    task_rows(labels),
                );
            }
            println!();
            print_info(&format!("CSV files written to {}", args.out_dir.display()));
            print_success("Replay complete");
        }
    }
    Ok(())
}
