//! Scheduler service configuration

use anyhow::{Context, Result};
use scheduler_lib::TaremaConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Scheduler service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Workflow execution this scheduler serves
    #[serde(default = "default_execution")]
    pub execution: String,

    /// API server port for control, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory receiving the labelling CSV history, if any
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    /// Engine settings
    #[serde(default)]
    pub engine: TaremaConfig,
}

fn default_execution() -> String {
    std::env::var("WORKFLOW_EXECUTION").unwrap_or_else(|_| "default".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution: default_execution(),
            api_port: default_api_port(),
            export_dir: None,
            engine: TaremaConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from `TAREMA_*` environment variables
    ///
    /// Nested engine settings use `__`, e.g. `TAREMA_ENGINE__EXPECTED_NODES=4`.
    pub fn load() -> Result<Self> {
        Self::from_source(
            config::Environment::with_prefix("TAREMA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(source: impl config::Source + Send + Sync + 'static) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read scheduler configuration")?;
        config
            .try_deserialize()
            .context("Invalid scheduler configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_lib::config::EstimatorKind;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("TAREMA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = SchedulerConfig::from_source(environment(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert!(config.export_dir.is_none());
        assert_eq!(config.engine, TaremaConfig::default());
    }

    #[test]
    fn test_nested_engine_settings() {
        let config = SchedulerConfig::from_source(environment(&[
            ("TAREMA_API_PORT", "9000"),
            ("TAREMA_EXECUTION", "rnaseq-1"),
            ("TAREMA_ENGINE__EXPECTED_NODES", "4"),
            ("TAREMA_ENGINE__ESTIMATOR", "constant"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.execution, "rnaseq-1");
        assert_eq!(config.engine.expected_nodes, 4);
        assert_eq!(config.engine.estimator, EstimatorKind::Constant);
    }
}
