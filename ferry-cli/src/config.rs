//! Pipeline file loading
//!
//! Reads the YAML pipeline file: named registries and servers plus the
//! ordered list of stages.

use anyhow::{Context, Result};
use ferry_core::domain::{PipelineDefinition, Registry, Server, Stage};
use ferry_runner::Resources;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Contents of a pipeline file
#[derive(Debug, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub registries: HashMap<String, Registry>,
    #[serde(default)]
    pub servers: HashMap<String, Server>,
    #[serde(default, alias = "stages")]
    pub pipeline: Vec<Stage>,
}

impl PipelineFile {
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = serde_yml::from_str(content)?;

        for (index, stage) in file.pipeline.iter().enumerate() {
            if stage.tasks.is_empty() {
                anyhow::bail!("Stage {} '{}' has no tasks", index + 1, stage.name);
            }
        }

        Ok(file)
    }

    pub fn definition(&self) -> PipelineDefinition {
        PipelineDefinition::new(self.pipeline.clone())
    }

    pub fn resources(&self) -> Resources {
        Resources {
            servers: self.servers.clone(),
            registries: self.registries.clone(),
        }
    }
}

/// Loads and parses the pipeline file at `path`
pub fn load(path: &Path) -> Result<PipelineFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

    PipelineFile::parse(&content)
        .with_context(|| format!("Failed to parse pipeline file: {}", path.display()))
}
