//! Container image executors
//!
//! - `build`: single and multi-platform image builds
//! - `push`: registry login, push, and the optional `latest` re-push
//! - `scan`: Dockerfile discovery that expands into build tasks
//! - `reference`: image reference helpers

mod build;
mod push;
mod reference;
mod scan;

pub use build::ImageBuildExecutor;
pub use push::ImagePushExecutor;
pub use reference::latest_variant;
pub use scan::{ImageScanner, expand_auto_scan};
