//! State shared by the tasks of one run

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use crate::executor::BuiltImage;

#[derive(Debug, Default)]
struct Images {
    built: Vec<String>,
    pushed: HashSet<String>,
}

/// Images built and pushed during this run
///
/// Written by image build tasks (possibly several at once in a parallel
/// stage) and read by later push tasks. The lock is never held across an
/// await point.
#[derive(Debug, Default)]
pub struct RunState {
    images: RwLock<Images>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful build; returns false if the reference was
    /// already recorded
    pub fn record_built(&self, image: &BuiltImage) -> bool {
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);

        if image.pushed {
            images.pushed.insert(image.reference.clone());
        }

        if images.built.contains(&image.reference) {
            return false;
        }
        images.built.push(image.reference.clone());
        true
    }

    /// Built references, in the order their builds finished
    pub fn built_images(&self) -> Vec<String> {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .built
            .clone()
    }

    pub fn is_pushed(&self, reference: &str) -> bool {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pushed
            .contains(reference)
    }

    /// Built references no build has pushed yet, in build order
    pub fn unpushed_images(&self) -> Vec<String> {
        let images = self.images.read().unwrap_or_else(PoisonError::into_inner);
        images
            .built
            .iter()
            .filter(|r| !images.pushed.contains(*r))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn image(reference: &str, pushed: bool) -> BuiltImage {
        BuiltImage {
            reference: reference.to_string(),
            pushed,
        }
    }

    #[test]
    fn test_reference_recorded_once() {
        let state = RunState::new();
        assert!(state.record_built(&image("api:1", false)));
        assert!(!state.record_built(&image("api:1", false)));
        assert_eq!(state.built_images(), vec!["api:1"]);
    }

    #[test]
    fn test_pushed_images_are_not_offered_again() {
        let state = RunState::new();
        state.record_built(&image("api:1", false));
        state.record_built(&image("web:1", true));
        state.record_built(&image("worker:1", false));

        assert!(state.is_pushed("web:1"));
        assert_eq!(state.unpushed_images(), vec!["api:1", "worker:1"]);
    }

    #[test]
    fn test_concurrent_writers() {
        let state = Arc::new(RunState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    state.record_built(&image(&format!("svc{}:1", i), false));
                    state.record_built(&image("shared:1", false));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let built = state.built_images();
        assert_eq!(built.len(), 9);
        assert_eq!(built.iter().filter(|r| *r == "shared:1").count(), 1);
    }
}
