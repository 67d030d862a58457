//! In-memory tracker driven by scripted poses.
//!
//! Useful for replaying recorded sessions and for exercising the pipeline
//! without a recognition engine.

use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;

use nalgebra::Matrix4;
use parking_lot::Mutex;
use tracing::debug;

use super::{OpticalParams, PatternInfo, TrackerBackend};
use crate::tracker::{TargetId, TargetKind, TargetOption};

#[derive(Debug, Default)]
struct ScriptedTarget {
    config: String,
    pose: Option<[f32; 16]>,
    options: Vec<TargetOption>,
    patterns: Vec<PatternInfo>,
}

#[derive(Debug, Default)]
struct ScriptState {
    next_id: i32,
    targets: BTreeMap<TargetId, ScriptedTarget>,
    removed: Vec<TargetId>,
    rejected: HashSet<String>,
    optical: Option<OpticalParams>,
    registration_delay: Duration,
}

/// Scripted [`TrackerBackend`]: targets report whatever pose was last set for them.
#[derive(Debug, Default)]
pub struct ScriptedTracker {
    state: Mutex<ScriptState>,
}

impl ScriptedTracker {
    /// Create a tracker with no targets and no rejections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `add_target` fail for this exact configuration string.
    pub fn reject(&self, config: &str) {
        self.state.lock().rejected.insert(config.to_string());
    }

    /// Delay every `add_target` call, simulating slow dataset loading.
    pub fn set_registration_delay(&self, delay: Duration) {
        self.state.lock().registration_delay = delay;
    }

    /// Pose reported for `id` from now on; `None` makes it invisible.
    pub fn set_pose(&self, id: TargetId, pose: Option<Matrix4<f32>>) {
        if let Some(target) = self.state.lock().targets.get_mut(&id) {
            target.pose = pose.map(|m| to_row_major(&m));
        }
    }

    /// Id currently loaded for `config`, if any.
    pub fn id_for(&self, config: &str) -> Option<TargetId> {
        self.state
            .lock()
            .targets
            .iter()
            .find(|(_, target)| target.config == config)
            .map(|(id, _)| *id)
    }

    /// Script the patterns reported for `id`.
    pub fn set_patterns(&self, id: TargetId, patterns: Vec<PatternInfo>) {
        if let Some(target) = self.state.lock().targets.get_mut(&id) {
            target.patterns = patterns;
        }
    }

    /// Script the result of loading optical parameters.
    pub fn set_optical_params(&self, params: Option<OpticalParams>) {
        self.state.lock().optical = params;
    }

    /// Options applied to `id`, in call order.
    pub fn options(&self, id: TargetId) -> Vec<TargetOption> {
        self.state
            .lock()
            .targets
            .get(&id)
            .map(|target| target.options.clone())
            .unwrap_or_default()
    }

    /// Ids passed to `remove_target`, in call order.
    pub fn removed(&self) -> Vec<TargetId> {
        self.state.lock().removed.clone()
    }

    /// Number of targets currently held by the tracker.
    pub fn loaded(&self) -> usize {
        self.state.lock().targets.len()
    }
}

impl TrackerBackend for ScriptedTracker {
    fn add_target(&self, config: &str) -> Option<TargetId> {
        let delay = self.state.lock().registration_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if state.rejected.contains(config) || TargetKind::from_config(config).is_err() {
            debug!(config, "Scripted tracker refusing target");
            return None;
        }
        let id = TargetId(state.next_id);
        state.next_id += 1;
        state.targets.insert(
            id,
            ScriptedTarget {
                config: config.to_string(),
                ..Default::default()
            },
        );
        Some(id)
    }

    fn remove_target(&self, id: TargetId) {
        let mut state = self.state.lock();
        state.targets.remove(&id);
        state.removed.push(id);
    }

    fn query_pose(&self, id: TargetId) -> Option<[f32; 16]> {
        self.state.lock().targets.get(&id).and_then(|target| target.pose)
    }

    fn pattern_count(&self, id: TargetId) -> usize {
        self.state
            .lock()
            .targets
            .get(&id)
            .map_or(0, |target| target.patterns.len())
    }

    fn pattern_config(&self, id: TargetId, index: usize) -> Option<PatternInfo> {
        self.state
            .lock()
            .targets
            .get(&id)
            .and_then(|target| target.patterns.get(index).cloned())
    }

    fn set_target_option(&self, id: TargetId, option: TargetOption) {
        if let Some(target) = self.state.lock().targets.get_mut(&id) {
            target.options.push(option);
        }
    }

    fn load_optical_params(&self, bytes: &[u8]) -> Option<OpticalParams> {
        if bytes.is_empty() {
            return None;
        }
        self.state.lock().optical.clone()
    }
}

fn to_row_major(m: &Matrix4<f32>) -> [f32; 16] {
    let mut values = [0.0; 16];
    for row in 0..4 {
        for col in 0..4 {
            values[row * 4 + col] = m[(row, col)];
        }
    }
    values
}
