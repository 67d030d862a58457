//! Base-target arbitration.

use nalgebra::Matrix4;
use tracing::{debug, info};

use crate::tracker::registry::TargetRegistry;
use crate::tracker::target::TargetKey;

/// World-reference origin: an ordered candidate list and the currently selected base target.
#[derive(Debug, Clone)]
pub struct Origin {
    candidates: Vec<TargetKey>,
    base: Option<TargetKey>,
    world: Matrix4<f32>,
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

impl Origin {
    /// Create an arbiter with no candidates and an identity world pose.
    pub fn new() -> Self {
        Self::with_world(Matrix4::identity())
    }

    /// Origin placed at `world` in engine space.
    pub fn with_world(world: Matrix4<f32>) -> Self {
        Self {
            candidates: Vec::new(),
            base: None,
            world,
        }
    }

    /// World pose the base target is pinned to.
    pub fn world(&self) -> &Matrix4<f32> {
        &self.world
    }

    /// Move the world pose of the base target.
    pub fn set_world(&mut self, world: Matrix4<f32>) {
        self.world = world;
    }

    /// Base target chosen by the last evaluation.
    pub fn base(&self) -> Option<TargetKey> {
        self.base
    }

    /// Candidates in priority order.
    pub fn candidates(&self) -> &[TargetKey] {
        &self.candidates
    }

    /// Add a candidate. Already-present candidates keep their position.
    pub fn add_candidate(&mut self, key: TargetKey, at_front: bool) {
        if self.candidates.contains(&key) {
            return;
        }
        if at_front {
            self.candidates.insert(0, key);
        } else {
            self.candidates.push(key);
        }
    }

    /// Drop `key`; the base is cleared if it was `key`.
    pub fn remove_candidate(&mut self, key: TargetKey) {
        self.candidates.retain(|k| *k != key);
        if self.base == Some(key) {
            debug!(target_key = %key, "Base target removed from candidates");
            self.base = None;
        }
    }

    /// Drop every candidate and the base.
    pub fn clear_all(&mut self) {
        self.candidates.clear();
        self.base = None;
    }

    /// Re-select the base target against the registry's current visibility.
    pub fn evaluate(&mut self, registry: &TargetRegistry) -> Option<TargetKey> {
        self.evaluate_with(|key| registry.is_visible(key))
    }

    /// Keep the current base while it stays visible; otherwise take the first
    /// visible candidate in insertion order.
    pub fn evaluate_with(&mut self, is_visible: impl Fn(TargetKey) -> bool) -> Option<TargetKey> {
        if let Some(base) = self.base {
            if self.candidates.contains(&base) && is_visible(base) {
                return Some(base);
            }
        }

        let selected = self.candidates.iter().copied().find(|k| is_visible(*k));
        if selected != self.base {
            match selected {
                Some(key) => info!(target_key = %key, "Base target selected"),
                None => debug!("No visible base target"),
            }
        }
        self.base = selected;
        selected
    }
}
