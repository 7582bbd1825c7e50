//! Pipeline run command

use anyhow::{Context, Result};
use ferry_core::domain::PipelineDefinition;
use ferry_runner::pipeline::{select_server, select_stage_range, select_tasks};
use ferry_runner::{EngineConfig, EventSink, Pipeline, StageRange, expand_auto_scan};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{self, PipelineFile};
use crate::render;

const EVENT_QUEUE: usize = 1024;

/// Load, narrow and run the pipeline, printing events as they arrive
pub async fn run_pipeline(
    config_path: &Path,
    range: Option<StageRange>,
    only: Vec<String>,
    server: Option<String>,
) -> Result<()> {
    let file = config::load(config_path)?;
    let definition = prepare(&file, range, &only, server.as_deref())?;

    if definition.stages.is_empty() {
        println!("Nothing to run.");
        return Ok(());
    }

    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    engine.validate().context("Invalid engine configuration")?;

    let (events, rx) = EventSink::channel(EVENT_QUEUE);
    let printer = tokio::spawn(render::print_events(rx, render::task_names(&definition)));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running tasks");
            interrupt.cancel();
        }
    });

    let pipeline = Pipeline::new(definition, file.resources(), engine, events);
    let result = pipeline.run(&cancel).await;

    // The printer stops once the last sender is gone
    drop(pipeline);
    printer.await.context("Event printer stopped abnormally")?;

    result.context("Pipeline failed")?;
    info!("Run finished");
    Ok(())
}

/// Expands auto-scanned image builds, then applies the selection filters
/// in order: stage range, task names, server
fn prepare(
    file: &PipelineFile,
    range: Option<StageRange>,
    only: &[String],
    server: Option<&str>,
) -> Result<PipelineDefinition> {
    let mut definition =
        expand_auto_scan(&file.definition()).context("Dockerfile auto-scan failed")?;

    if let Some(range) = range {
        definition = select_stage_range(&definition, range)?;
    }

    if !only.is_empty() {
        definition = select_tasks(&definition, only)?;
    }

    if let Some(server) = server {
        definition = select_server(&definition, server, &file.servers)?;
    }

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
servers:
  prod:
    host: prod.internal
    username: deploy
    auth:
      type: password
      password: x
  staging:
    host: staging.internal
    username: deploy
    auth:
      type: password
      password: x

pipeline:
  - name: Build
    tasks:
      - name: compile
        type: shell
        config:
          command: make
  - name: Test
    tasks:
      - name: unit
        type: shell
        config:
          command: make test
  - name: Deploy
    parallel: true
    tasks:
      - name: ship-prod
        type: remote-deploy
        config:
          server: prod
          commands: [uptime]
      - name: ship-staging
        type: remote-deploy
        config:
          server: staging
          commands: [uptime]
"#;

    fn names(definition: &PipelineDefinition) -> Vec<String> {
        definition
            .stages
            .iter()
            .flat_map(|s| s.tasks.iter().map(|t| t.name.clone()))
            .collect()
    }

    #[test]
    fn test_prepare_without_filters_keeps_everything() {
        let file = PipelineFile::parse(FILE).unwrap();
        let definition = prepare(&file, None, &[], None).unwrap();
        assert_eq!(definition.task_count(), 4);
    }

    #[test]
    fn test_prepare_applies_filters_in_order() {
        let file = PipelineFile::parse(FILE).unwrap();

        let definition = prepare(
            &file,
            Some(StageRange::parse("2-").unwrap()),
            &[],
            Some("staging"),
        )
        .unwrap();
        assert_eq!(names(&definition), vec!["unit", "ship-staging"]);

        let definition = prepare(&file, None, &["compile".to_string()], None).unwrap();
        assert_eq!(names(&definition), vec!["compile"]);
    }

    #[test]
    fn test_prepare_rejects_unknown_server() {
        let file = PipelineFile::parse(FILE).unwrap();
        let err = prepare(&file, None, &[], Some("dev")).unwrap_err();
        assert!(err.to_string().contains("Unknown server"));
    }
}
