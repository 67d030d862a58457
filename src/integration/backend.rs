//! Trait for the external recognition engine.

use nalgebra::Matrix4;

use crate::tracker::{TargetId, TargetOption};

/// Layout of one pattern inside a (multi-)target.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternInfo {
    /// Pattern pose relative to the target origin, tracker space
    pub matrix: Matrix4<f32>,
    pub width: f32,
    pub height: f32,
    /// Pattern image dimensions in pixels
    pub image_size: (u32, u32),
}

/// Optical see-through display calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalParams {
    pub fovy: f32,
    pub aspect: f32,
    /// Eye offset relative to the tracking camera
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
}

/// Trait for fiducial recognition engines.
///
/// Implement this trait to connect any tracker to the pose pipeline. Calls may
/// arrive from the registration threads and the tracker-update context at the
/// same time, so implementations synchronize internally.
///
/// # Example
///
/// ```ignore
/// use fiducial_pose_rs::integration::{OpticalParams, PatternInfo, TrackerBackend};
/// use fiducial_pose_rs::tracker::{TargetId, TargetOption};
///
/// struct MyTracker { /* engine handle */ }
///
/// impl TrackerBackend for MyTracker {
///     fn add_target(&self, config: &str) -> Option<TargetId> { todo!() }
///     // ...
/// }
/// ```
pub trait TrackerBackend: Send + Sync {
    /// Load a target from its configuration string. `None` when the tracker refuses it.
    fn add_target(&self, config: &str) -> Option<TargetId>;

    fn remove_target(&self, id: TargetId);

    /// This cycle's pose as 16 row-major floats, or `None` when not visible.
    fn query_pose(&self, id: TargetId) -> Option<[f32; 16]>;

    fn pattern_count(&self, id: TargetId) -> usize;

    fn pattern_config(&self, id: TargetId, index: usize) -> Option<PatternInfo>;

    fn set_target_option(&self, id: TargetId, option: TargetOption);

    fn load_optical_params(&self, bytes: &[u8]) -> Option<OpticalParams>;
}
