//! CSV dumps of labelling history
//!
//! Every recalculation appends one row to each affected file. A file's
//! header is written once when the file is created; node files use one
//! column per node, taken from the first labelling written to them.
//!
//! - `node_labels.csv`: label vector (`cpu-mem-read-write`) per node
//! - `node_estimations.csv`: estimator score per node (online mode)
//! - `node_silh.csv`: silhouette of the chosen clustering per dimension
//! - `task_labels.csv`: `task=label;...` for every labelled task type

use crate::labels::{NodeLabels, TaskLabels};
use crate::models::Dimension;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const NODE_LABELS_FILE: &str = "node_labels.csv";
pub const NODE_ESTIMATIONS_FILE: &str = "node_estimations.csv";
pub const NODE_SILHOUETTE_FILE: &str = "node_silh.csv";
pub const TASK_LABELS_FILE: &str = "task_labels.csv";

/// One append-only CSV file with a fixed header
#[derive(Debug)]
struct CsvFile {
    path: PathBuf,
    header: Option<Vec<String>>,
}

impl CsvFile {
    fn new(path: PathBuf) -> Self {
        Self { path, header: None }
    }

    /// Header of the file, writing `columns` as the header if the file is new
    fn ensure_header(&mut self, columns: impl FnOnce() -> Vec<String>) -> Result<Vec<String>> {
        if let Some(header) = &self.header {
            return Ok(header.clone());
        }

        let existing = if self.path.exists() {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_path(&self.path)
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            let header = reader
                .headers()
                .with_context(|| format!("Failed to read header of {}", self.path.display()))?;
            (!header.is_empty()).then(|| header.iter().map(str::to_string).collect::<Vec<_>>())
        } else {
            None
        };

        let header = match existing {
            Some(header) => header,
            None => {
                let header = columns();
                self.write_line(&header)?;
                debug!(path = %self.path.display(), "Created CSV file");
                header
            }
        };
        self.header = Some(header.clone());
        Ok(header)
    }

    fn write_line(&self, fields: &[String]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(fields)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }
}

/// Appends labelling history to CSV files in one directory
#[derive(Debug)]
pub struct CsvExporter {
    dir: PathBuf,
    node_labels: CsvFile,
    node_estimations: CsvFile,
    node_silhouette: CsvFile,
    task_labels: CsvFile,
}

impl CsvExporter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
        Ok(Self {
            node_labels: CsvFile::new(dir.join(NODE_LABELS_FILE)),
            node_estimations: CsvFile::new(dir.join(NODE_ESTIMATIONS_FILE)),
            node_silhouette: CsvFile::new(dir.join(NODE_SILHOUETTE_FILE)),
            task_labels: CsvFile::new(dir.join(TASK_LABELS_FILE)),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one node labelling to the node files
    pub fn record_node_labels(&mut self, labels: &NodeLabels) -> Result<()> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let nodes: Vec<String> = labels.labels.keys().cloned().collect();

        let header = self
            .node_labels
            .ensure_header(|| prefixed_header(&nodes))?;
        let mut row = vec![labels.revision.to_string(), timestamp.clone()];
        row.extend(header.iter().skip(2).map(|node| {
            labels
                .label(node)
                .map(|l| l.to_string())
                .unwrap_or_default()
        }));
        self.node_labels.write_line(&row)?;

        if let Some(estimations) = &labels.estimations {
            let header = self
                .node_estimations
                .ensure_header(|| prefixed_header(&nodes))?;
            let mut row = vec![labels.revision.to_string(), timestamp.clone()];
            row.extend(header.iter().skip(2).map(|node| {
                estimations
                    .get(node)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }));
            self.node_estimations.write_line(&row)?;
        }

        let dimensions: Vec<String> = Dimension::ALL.iter().map(|d| d.to_string()).collect();
        self.node_silhouette
            .ensure_header(|| prefixed_header(&dimensions))?;
        let mut row = vec![labels.revision.to_string(), timestamp];
        row.extend(Dimension::ALL.iter().map(|d| {
            labels
                .silhouette
                .get(d)
                .map(|s| s.to_string())
                .unwrap_or_default()
        }));
        self.node_silhouette.write_line(&row)
    }

    /// Append one task labelling to `task_labels.csv`
    pub fn record_task_labels(&mut self, labels: &TaskLabels) -> Result<()> {
        self.task_labels.ensure_header(|| {
            ["revision", "timestamp", "node_revision", "labels"]
                .iter()
                .map(|c| c.to_string())
                .collect()
        })?;
        let encoded = labels
            .labels
            .iter()
            .map(|(task, label)| format!("{task}={label}"))
            .collect::<Vec<_>>()
            .join(";");
        self.task_labels.write_line(&[
            labels.revision.to_string(),
            chrono::Utc::now().to_rfc3339(),
            labels.node_revision.to_string(),
            encoded,
        ])
    }
}

fn prefixed_header(columns: &[String]) -> Vec<String> {
    let mut header = vec!["revision".to_string(), "timestamp".to_string()];
    header.extend(columns.iter().cloned());
    header
}
