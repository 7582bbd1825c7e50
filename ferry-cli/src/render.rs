//! Terminal rendering of pipeline events

use colored::*;
use ferry_core::domain::{OutputLine, PipelineDefinition, TaskId, TaskStatus};
use ferry_core::event::{PipelineEvent, TaskFailure};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Task display names keyed by runtime id
pub fn task_names(definition: &PipelineDefinition) -> HashMap<TaskId, String> {
    definition
        .stages
        .iter()
        .enumerate()
        .flat_map(|(s, stage)| {
            stage
                .tasks
                .iter()
                .enumerate()
                .map(move |(t, task)| (TaskId::new(s, t), task.name.clone()))
        })
        .collect()
}

/// Prints events until the sending side is dropped
pub async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>, names: HashMap<TaskId, String>) {
    let name = |id: &TaskId| names.get(id).cloned().unwrap_or_else(|| id.to_string());

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PipelineStarted => {
                println!("{}", "▶ Pipeline started".bold());
            }
            PipelineEvent::StageStarted { index, name } => {
                println!();
                println!(
                    "{}",
                    format!("== Stage {}: {} ==", index + 1, name).cyan().bold()
                );
            }
            PipelineEvent::StageCompleted {
                index,
                name,
                success,
                duration,
            } => {
                let line = format!(
                    "Stage {} '{}' {} in {}",
                    index + 1,
                    name,
                    if success { "completed" } else { "failed" },
                    format_duration(duration)
                );
                if success {
                    println!("{}", line.green());
                } else {
                    println!("{}", line.red());
                }
            }
            PipelineEvent::TaskStatusChanged { task_id, status } => {
                print_status(&name(&task_id), status);
            }
            PipelineEvent::Output { task_id, line } => {
                print_line(&name(&task_id), &line);
            }
            PipelineEvent::OutputBatch { task_id, lines } => {
                let task = name(&task_id);
                for line in &lines {
                    print_line(&task, line);
                }
            }
            PipelineEvent::PipelineCompleted {
                success,
                duration,
                failure,
            } => {
                println!();
                if success {
                    println!(
                        "{}",
                        format!("✓ Pipeline succeeded in {}", format_duration(duration))
                            .green()
                            .bold()
                    );
                } else {
                    println!(
                        "{}",
                        format!("✗ Pipeline failed after {}", format_duration(duration))
                            .red()
                            .bold()
                    );
                    if let Some(failure) = failure {
                        print_failure(&failure, &name);
                    }
                }
            }
        }
    }
}

fn print_status(task: &str, status: TaskStatus) {
    match status {
        TaskStatus::Pending => {}
        TaskStatus::Running => println!("  {} {}", "→".dimmed(), task.bold()),
        TaskStatus::Success => println!("  {} {}", "✓".green(), task),
        TaskStatus::Failed => println!("  {} {} {}", "✗".red(), task, "failed".red()),
        TaskStatus::Skipped => println!("  {} {} {}", "-".yellow(), task, "skipped".yellow()),
        TaskStatus::Cancelled => {
            println!("  {} {} {}", "!".yellow(), task, "cancelled".yellow())
        }
    }
}

fn print_line(task: &str, line: &OutputLine) {
    let prefix = format!("[{}]", task).dimmed();
    if line.is_error {
        println!("    {} {}", prefix, line.text.red());
    } else {
        println!("    {} {}", prefix, line.text);
    }
}

fn print_failure<F>(failure: &TaskFailure, name: F)
where
    F: Fn(&TaskId) -> String,
{
    println!(
        "  Task:  {} ({}, stage {})",
        failure.task_name.bold(),
        failure.task_id,
        failure.stage_index + 1
    );
    println!("  Error: {}", failure.message.red());

    if !failure.output_tail.is_empty() {
        println!("  {}", "Last output:".dimmed());
        for line in &failure.output_tail {
            println!("    {}", line.text.dimmed());
        }
    }

    if !failure.suppressed.is_empty() {
        println!("  {}", "Also failed in this stage:".yellow());
        for (task_id, message) in &failure.suppressed {
            println!("    - {}: {}", name(task_id), message);
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::{ShellConfig, Stage, TaskKind, TaskSpec};

    #[test]
    fn test_task_names_follow_runtime_ids() {
        let shell = |name: &str| TaskSpec::new(name, TaskKind::Shell(ShellConfig::default()));
        let definition = PipelineDefinition::new(vec![
            Stage::new("a", "A", false).with_task(shell("lint")),
            Stage::new("b", "B", true)
                .with_task(shell("api"))
                .with_task(shell("web")),
        ]);

        let names = task_names(&definition);
        assert_eq!(names.len(), 3);
        assert_eq!(names[&TaskId::new(0, 0)], "lint");
        assert_eq!(names[&TaskId::new(1, 1)], "web");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}
