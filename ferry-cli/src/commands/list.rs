//! Pipeline listing

use anyhow::Result;
use colored::*;
use ferry_core::domain::{ServerAuth, TaskKind};
use std::path::Path;

use crate::config;

/// Print stages, tasks and the servers they target
pub fn list_pipeline(config_path: &Path) -> Result<()> {
    let file = config::load(config_path)?;

    if file.pipeline.is_empty() {
        println!("{}", "No stages defined.".yellow());
        return Ok(());
    }

    for (index, stage) in file.pipeline.iter().enumerate() {
        let mode = if stage.parallel { "parallel" } else { "sequential" };
        println!(
            "{} {} {}",
            format!("{:>2}.", index + 1).cyan(),
            stage.name.bold(),
            format!("({})", mode).dimmed()
        );

        for task in &stage.tasks {
            let target = match &task.kind {
                TaskKind::RemoteDeploy(cfg) => format!(" -> {}", cfg.server),
                TaskKind::ImageBuild(cfg) if !cfg.image_name.is_empty() => {
                    format!(" -> {}", cfg.reference())
                }
                _ => String::new(),
            };
            println!(
                "    {} {} {}{}",
                "▸".cyan(),
                task.name,
                task.kind.name().dimmed(),
                target.dimmed()
            );
        }
    }

    if !file.servers.is_empty() {
        println!();
        println!("{}", "Servers:".bold());
        let mut servers: Vec<_> = file.servers.iter().collect();
        servers.sort_by(|a, b| a.0.cmp(b.0));
        for (name, server) in servers {
            let auth = match server.auth {
                ServerAuth::Password { .. } => "password",
                ServerAuth::Key { .. } => "key",
            };
            println!(
                "    {} {} {}",
                name.cyan(),
                server.address(),
                format!("({})", auth).dimmed()
            );
        }
    }

    Ok(())
}
