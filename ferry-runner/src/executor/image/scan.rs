//! Dockerfile discovery
//!
//! Walks a directory tree and derives one image build task per Dockerfile,
//! using the containing directory as build context and as the image name.

use ferry_core::domain::{
    AutoScanConfig, ImageBuildConfig, PipelineDefinition, TaskKind, TaskSpec,
};
use glob_match::glob_match;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::TaskError;

pub struct ImageScanner {
    root: PathBuf,
    pattern: Option<String>,
    exclude: Vec<String>,
    image_prefix: Option<String>,
    tag: Option<String>,
    platforms: Vec<String>,
}

impl ImageScanner {
    pub fn new(root: impl Into<PathBuf>, config: &AutoScanConfig) -> Self {
        Self {
            root: root.into(),
            pattern: config.pattern.clone().filter(|p| !p.is_empty()),
            exclude: config.exclude.clone(),
            image_prefix: config.image_prefix.clone().filter(|p| !p.is_empty()),
            tag: config.tag.clone().filter(|t| !t.is_empty()),
            platforms: config.platforms.clone(),
        }
    }

    /// Finds every matching Dockerfile and returns one build task per file,
    /// ordered by path
    pub fn scan(&self) -> Result<Vec<TaskSpec>, TaskError> {
        let mut found = Vec::new();
        self.walk(&self.root, &mut found)?;
        found.sort();

        info!(
            "Found {} Dockerfile(s) under {}",
            found.len(),
            self.root.display()
        );

        Ok(found.iter().map(|path| self.task_for(path)).collect())
    }

    fn walk(&self, dir: &Path, found: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if self.is_excluded(&path) {
                    debug!("Skipping excluded directory {}", path.display());
                    continue;
                }
                self.walk(&path, found)?;
            } else if file_type.is_file() && self.matches(&path) && !self.is_excluded(&path) {
                found.push(path);
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Exclude globs match either the entry's base name or its path
    /// relative to the scan root
    fn is_excluded(&self, path: &Path) -> bool {
        let base = base_name(path);
        let rel = self.relative(path);
        self.exclude
            .iter()
            .any(|glob| glob_match(glob, &base) || glob_match(glob, &rel))
    }

    fn matches(&self, path: &Path) -> bool {
        let base = base_name(path);
        match &self.pattern {
            Some(pattern) => glob_match(pattern, &self.relative(path)) || glob_match(pattern, &base),
            None => base == "Dockerfile" || base.starts_with("Dockerfile."),
        }
    }

    fn task_for(&self, dockerfile: &Path) -> TaskSpec {
        let context = dockerfile.parent().unwrap_or(&self.root).to_path_buf();
        let dir_name = dir_name(&context);

        let image_name = match &self.image_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), dir_name),
            None => dir_name.clone(),
        };

        let config = ImageBuildConfig {
            dockerfile: Some(dockerfile.display().to_string()),
            context: Some(context.display().to_string()),
            image_name,
            tag: self.tag.clone(),
            platforms: self.platforms.clone(),
            ..Default::default()
        };

        TaskSpec::new(format!("build-{}", dir_name), TaskKind::ImageBuild(config))
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .or_else(|| {
            dir.canonicalize()
                .ok()
                .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| "root".to_string())
}

/// Replaces every image build task with auto-scan enabled by the tasks its
/// scan produces
///
/// Discovered tasks inherit the template task's build arguments, push
/// settings, timeout and output batching.
pub fn expand_auto_scan(definition: &PipelineDefinition) -> Result<PipelineDefinition, TaskError> {
    let mut expanded = definition.clone();

    for stage in &mut expanded.stages {
        let mut tasks = Vec::with_capacity(stage.tasks.len());

        for task in std::mem::take(&mut stage.tasks) {
            let scan_target = match &task.kind {
                TaskKind::ImageBuild(cfg) => cfg
                    .auto_scan
                    .as_ref()
                    .filter(|s| s.enabled)
                    .map(|s| (cfg.clone(), s.clone())),
                _ => None,
            };

            let Some((template, scan)) = scan_target else {
                tasks.push(task);
                continue;
            };
            let root = scan
                .root
                .clone()
                .or_else(|| template.working_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));

            let discovered = ImageScanner::new(root, &scan).scan()?;
            info!(
                "Task '{}' expanded into {} image build(s)",
                task.name,
                discovered.len()
            );

            tasks.extend(discovered.into_iter().map(|mut spec| {
                if let TaskKind::ImageBuild(cfg) = &mut spec.kind {
                    cfg.build_args = template.build_args.clone();
                    cfg.push_on_build = template.push_on_build;
                    cfg.push_latest_on_build = template.push_latest_on_build;
                    cfg.timeout = template.timeout;
                    cfg.batch_output = template.batch_output;
                    if cfg.platforms.is_empty() {
                        cfg.platforms = template.platforms.clone();
                    }
                }
                spec
            }));
        }

        stage.tasks = tasks;
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::Stage;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for (path, body) in [
            ("svcA/Dockerfile", "FROM alpine"),
            ("svcB/Dockerfile.prod", "FROM alpine"),
            ("svcB/README.md", "docs"),
            ("vendor/Dockerfile", "FROM scratch"),
            ("vendor/nested/Dockerfile", "FROM scratch"),
        ] {
            let file = root.join(path);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, body).unwrap();
        }
        dir
    }

    fn scan_config(exclude: &[&str]) -> AutoScanConfig {
        AutoScanConfig {
            enabled: true,
            exclude: exclude.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_skips_excluded_directories() {
        let dir = tree();
        let tasks = ImageScanner::new(dir.path(), &scan_config(&["vendor"]))
            .scan()
            .unwrap();

        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["build-svcA", "build-svcB"]);

        match &tasks[1].kind {
            TaskKind::ImageBuild(cfg) => {
                assert_eq!(cfg.image_name, "svcB");
                assert!(cfg.dockerfile.as_ref().unwrap().ends_with("Dockerfile.prod"));
                assert_eq!(
                    cfg.context.as_deref(),
                    Some(dir.path().join("svcB").display().to_string().as_str())
                );
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_scan_without_exclude_finds_everything() {
        let dir = tree();
        let tasks = ImageScanner::new(dir.path(), &scan_config(&[])).scan().unwrap();
        assert_eq!(tasks.len(), 4);
    }

    #[test]
    fn test_prefix_and_tag() {
        let dir = tree();
        let config = AutoScanConfig {
            image_prefix: Some("registry.local/team/".to_string()),
            tag: Some("2.0".to_string()),
            ..scan_config(&["vendor"])
        };
        let tasks = ImageScanner::new(dir.path(), &config).scan().unwrap();

        match &tasks[0].kind {
            TaskKind::ImageBuild(cfg) => assert_eq!(cfg.reference(), "registry.local/team/svcA:2.0"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_expand_auto_scan_replaces_template() {
        let dir = tree();
        let template = ImageBuildConfig {
            timeout: Some(900),
            batch_output: true,
            auto_scan: Some(AutoScanConfig {
                root: Some(dir.path().to_path_buf()),
                ..scan_config(&["vendor"])
            }),
            ..Default::default()
        };

        let definition = PipelineDefinition::new(vec![
            Stage::new("images", "Images", true)
                .with_task(TaskSpec::new("scan", TaskKind::ImageBuild(template)))
                .with_task(TaskSpec::new(
                    "manual",
                    TaskKind::ImageBuild(ImageBuildConfig {
                        image_name: "manual".to_string(),
                        ..Default::default()
                    }),
                )),
        ]);

        let expanded = expand_auto_scan(&definition).unwrap();
        let names: Vec<&str> = expanded.stages[0]
            .tasks
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["build-svcA", "build-svcB", "manual"]);
        assert!(expanded.stages[0].tasks[0].kind.batches_output());
        assert_eq!(
            expanded.stages[0].tasks[1].kind.timeout(),
            Some(std::time::Duration::from_secs(900))
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let result = ImageScanner::new("/definitely/not/here", &scan_config(&[])).scan();
        assert!(matches!(result, Err(TaskError::Io(_))));
    }
}
