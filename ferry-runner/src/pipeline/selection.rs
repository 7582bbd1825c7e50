//! Pre-run task selection
//!
//! Each filter takes a definition and returns a narrowed copy. Stages left
//! without tasks are dropped. None of this is orchestrator state.

use ferry_core::domain::{PipelineDefinition, Server, TaskKind};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SelectionError;

/// 1-based, inclusive stage range; `end: None` runs to the last stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl StageRange {
    /// Parses `N`, `N-M`, `N-` or `-M`
    pub fn parse(input: &str) -> Result<Self, SelectionError> {
        let input = input.trim();
        let invalid = || SelectionError::InvalidRange(input.to_string());
        let number = |s: &str| -> Result<usize, SelectionError> {
            match s.trim().parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(invalid()),
            }
        };

        if input.is_empty() {
            return Err(invalid());
        }

        let range = match input.split_once('-') {
            Some((start, end)) => {
                let start = if start.trim().is_empty() { 1 } else { number(start)? };
                let end = if end.trim().is_empty() { None } else { Some(number(end)?) };
                Self { start, end }
            }
            None => {
                let n = number(input)?;
                Self {
                    start: n,
                    end: Some(n),
                }
            }
        };

        if range.end.is_some_and(|end| end < range.start) {
            return Err(invalid());
        }

        Ok(range)
    }
}

impl FromStr for StageRange {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end == self.start => write!(f, "{}", self.start),
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-", self.start),
        }
    }
}

/// Keeps only the stages inside `range`; an end past the last stage is
/// clamped
pub fn select_stage_range(
    definition: &PipelineDefinition,
    range: StageRange,
) -> Result<PipelineDefinition, SelectionError> {
    if range.start == 0 || range.end.is_some_and(|end| end < range.start) {
        return Err(SelectionError::InvalidRange(range.to_string()));
    }

    let total = definition.stages.len();
    if range.start > total {
        return Err(SelectionError::StageOutOfRange {
            start: range.start,
            total,
        });
    }

    let end = range.end.unwrap_or(total).min(total);
    let stages = definition.stages[range.start - 1..end].to_vec();
    Ok(PipelineDefinition::new(stages))
}

/// Keeps only the tasks whose name is in `names`
pub fn select_tasks(
    definition: &PipelineDefinition,
    names: &[String],
) -> Result<PipelineDefinition, SelectionError> {
    let selected = retain_tasks(definition, |task| names.contains(&task.name));
    if selected.stages.is_empty() {
        return Err(SelectionError::NoMatchingTasks(names.join(", ")));
    }
    Ok(selected)
}

/// Keeps only the remote deployments targeting `server`; tasks of every
/// other kind are left alone
pub fn select_server(
    definition: &PipelineDefinition,
    server: &str,
    servers: &HashMap<String, Server>,
) -> Result<PipelineDefinition, SelectionError> {
    if !servers.contains_key(server) {
        return Err(SelectionError::UnknownServer(server.to_string()));
    }

    let selected = retain_tasks(definition, |task| match &task.kind {
        TaskKind::RemoteDeploy(cfg) => cfg.server == server,
        _ => true,
    });

    let deploys = selected
        .stages
        .iter()
        .flat_map(|s| &s.tasks)
        .filter(|t| t.kind.target_server().is_some())
        .count();
    if deploys == 0 {
        return Err(SelectionError::NoMatchingTasks(format!("server '{}'", server)));
    }

    Ok(selected)
}

fn retain_tasks<F>(definition: &PipelineDefinition, keep: F) -> PipelineDefinition
where
    F: Fn(&ferry_core::domain::TaskSpec) -> bool,
{
    let stages = definition
        .stages
        .iter()
        .filter_map(|stage| {
            let tasks: Vec<_> = stage.tasks.iter().filter(|t| keep(t)).cloned().collect();
            if tasks.is_empty() {
                return None;
            }
            let mut stage = stage.clone();
            stage.tasks = tasks;
            Some(stage)
        })
        .collect();

    PipelineDefinition::new(stages)
}
