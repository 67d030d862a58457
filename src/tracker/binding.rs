//! Attachment of a renderable object to a tagged target.

use std::sync::Arc;

use nalgebra::{Matrix4, UnitQuaternion};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PoseError, Result};
use crate::pose::{Pose, SmoothedPose, SmoothingParams};
use crate::tracker::binding_state::BindingState;
use crate::tracker::events::{EventBus, PoseEvent, PoseEventSink};
use crate::tracker::origin::Origin;
use crate::tracker::registry::TargetRegistry;
use crate::tracker::target::{TargetKey, TargetSnapshot};

/// Whether the host is actively running or in an edit/preview mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    Running,
    Preview,
}

/// Timing for one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Seconds since an arbitrary epoch; must not decrease
    pub time: f64,
    /// Seconds since the previous frame
    pub delta: f32,
    pub mode: PlaybackMode,
}

impl FrameContext {
    /// Frame timing in [`PlaybackMode::Running`].
    pub fn new(time: f64, delta: f32) -> Self {
        Self {
            time,
            delta,
            mode: PlaybackMode::Running,
        }
    }
}

/// Read-only view of the shared state a binding needs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct SceneView<'a> {
    pub registry: &'a TargetRegistry,
    pub origin: &'a Origin,
    /// Tracker units to engine units
    pub unit_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    pub tag: String,
    /// Continuous invisibility required before `MarkerLost` fires
    pub grace_seconds: f32,
    pub smoothing: SmoothingParams,
    /// Euler offset (roll, pitch, yaw in degrees) composed after smoothing
    pub rotation_offset_deg: Option<[f32; 3]>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            tag: String::new(),
            grace_seconds: 0.5,
            smoothing: SmoothingParams::default(),
            rotation_offset_deg: None,
        }
    }
}

impl BindingConfig {
    /// Create a configuration with default timing for `tag`.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// Check the values the state machine and smoother run with.
    pub fn validate(&self) -> Result<()> {
        if self.grace_seconds.is_nan() || self.grace_seconds < 0.0 {
            return Err(PoseError::Configuration(format!(
                "binding '{}': grace_seconds must be non-negative, got {}",
                self.tag, self.grace_seconds
            )));
        }
        if self
            .rotation_offset_deg
            .is_some_and(|offset| offset.iter().any(|angle| !angle.is_finite()))
        {
            return Err(PoseError::Configuration(format!(
                "binding '{}': rotation_offset_deg must be finite",
                self.tag
            )));
        }
        self.smoothing.validate().map_err(|err| match err {
            PoseError::Configuration(reason) => {
                PoseError::Configuration(format!("binding '{}': {reason}", self.tag))
            }
            other => other,
        })
    }
}

pub struct AttachmentBinding {
    config: BindingConfig,
    rotation_offset: Option<UnitQuaternion<f32>>,
    target: Option<TargetKey>,
    state: BindingState,
    /// Time the target was last seen becoming invisible
    lost_since: Option<f64>,
    /// Inside a tracked session: `MarkerFound` sent, `MarkerLost` not yet
    found: bool,
    smoother: SmoothedPose,
    /// Frame time of the previous smoother step
    last_chase: Option<f64>,
    transform: Option<Matrix4<f32>>,
    events: EventBus,
}

impl AttachmentBinding {
    /// Create an unresolved binding. Call [`BindingConfig::validate`] first for untrusted input.
    pub fn new(config: BindingConfig) -> Self {
        let rotation_offset = config.rotation_offset_deg.map(|[roll, pitch, yaw]| {
            UnitQuaternion::from_euler_angles(roll.to_radians(), pitch.to_radians(), yaw.to_radians())
        });
        Self {
            config,
            rotation_offset,
            target: None,
            state: BindingState::Unresolved,
            lost_since: None,
            found: false,
            smoother: SmoothedPose::new(),
            last_chase: None,
            transform: None,
            events: EventBus::new(),
        }
    }

    /// Tag this binding resolves against.
    pub fn tag(&self) -> &str {
        &self.config.tag
    }

    /// Get a reference to the binding configuration.
    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Current state of the found/lost machine.
    pub fn state(&self) -> BindingState {
        self.state
    }

    /// Registry key of the resolved target, if any.
    pub fn target(&self) -> Option<TargetKey> {
        self.target
    }

    /// Last transform applied to the bound object.
    pub fn transform(&self) -> Option<Matrix4<f32>> {
        self.transform
    }

    /// Visible, or invisible for less than the grace period after a tracked session.
    pub fn is_shown(&self) -> bool {
        self.state == BindingState::Visible || self.found
    }

    /// Receive this binding's found/tracked/lost events.
    pub fn subscribe(&mut self, sink: Arc<dyn PoseEventSink>) {
        self.events.subscribe(sink);
    }

    /// Drop the resolved target and all per-session state.
    pub fn deactivate(&mut self) {
        if self.target.is_some() {
            debug!(tag = %self.config.tag, "Binding deactivated");
        }
        self.target = None;
        self.state = BindingState::Unresolved;
        self.lost_since = None;
        self.found = false;
        self.transform = None;
        self.reset_smoother();
    }

    fn reset_smoother(&mut self) {
        self.smoother.reset();
        self.last_chase = None;
    }

    /// Run one frame of the state machine. Returns the transform to render with,
    /// or `None` while the object is hidden or has no pose yet.
    ///
    /// In [`PlaybackMode::Preview`] a hidden target keeps the object shown and
    /// no events fire.
    pub fn update(&mut self, ctx: &FrameContext, scene: &SceneView<'_>) -> Option<Matrix4<f32>> {
        let key = self.resolve(ctx, scene)?;
        let Some(snapshot) = scene.registry.snapshot(key) else {
            debug!(tag = %self.config.tag, target_key = %key, "Bound target disappeared");
            if self.found {
                self.emit_lost(key);
            }
            self.deactivate();
            return None;
        };

        if snapshot.visible {
            self.on_visible(ctx, scene, &snapshot);
        } else if ctx.mode == PlaybackMode::Preview {
            self.state = BindingState::Visible;
            self.lost_since = None;
        } else {
            self.on_hidden(ctx, key);
        }

        if self.is_shown() { self.transform } else { None }
    }

    fn resolve(&mut self, ctx: &FrameContext, scene: &SceneView<'_>) -> Option<TargetKey> {
        if let Some(key) = self.target {
            return Some(key);
        }
        let key = scene.registry.find_by_tag(&self.config.tag)?;
        self.target = Some(key);
        self.reset_smoother();
        self.found = false;
        self.lost_since = None;
        self.state = match ctx.mode {
            PlaybackMode::Running => BindingState::NotVisible,
            PlaybackMode::Preview => BindingState::Visible,
        };
        debug!(tag = %self.config.tag, target_key = %key, "Binding resolved");
        Some(key)
    }

    fn on_visible(&mut self, ctx: &FrameContext, scene: &SceneView<'_>, snapshot: &TargetSnapshot) {
        self.state = BindingState::Visible;
        self.lost_since = None;

        if !self.found {
            self.found = true;
            info!(tag = %self.config.tag, target_key = %snapshot.key, "Marker found");
            self.events.emit(PoseEvent::MarkerFound {
                tag: self.config.tag.clone(),
                target: snapshot.key,
            });
        }

        if let Some(transform) = self.compute_transform(ctx, scene, snapshot) {
            self.transform = Some(transform);
        }
        self.events.emit(PoseEvent::MarkerTracked {
            tag: self.config.tag.clone(),
            target: snapshot.key,
            transform: self.transform,
        });
    }

    fn on_hidden(&mut self, ctx: &FrameContext, key: TargetKey) {
        if self.state == BindingState::Visible {
            self.state = BindingState::NotVisible;
            self.lost_since = Some(ctx.time);
        }

        let Some(since) = self.lost_since else {
            return;
        };
        if self.found && ctx.time - since >= f64::from(self.config.grace_seconds) {
            self.emit_lost(key);
            self.reset_smoother();
        }
    }

    fn emit_lost(&mut self, key: TargetKey) {
        self.found = false;
        info!(tag = %self.config.tag, target_key = %key, "Marker lost");
        self.events.emit(PoseEvent::MarkerLost {
            tag: self.config.tag.clone(),
            target: key,
        });
    }

    /// `origin · base⁻¹ · target`, smoothed for multi-target kinds.
    fn compute_transform(
        &mut self,
        ctx: &FrameContext,
        scene: &SceneView<'_>,
        snapshot: &TargetSnapshot,
    ) -> Option<Matrix4<f32>> {
        let base_key = scene.origin.base()?;
        let relative = if base_key == snapshot.key {
            Matrix4::identity()
        } else {
            let target = snapshot.engine_pose(scene.unit_scale)?;
            let base = scene.registry.snapshot(base_key)?.engine_pose(scene.unit_scale)?;
            base.try_inverse()? * target
        };
        let world = scene.origin.world() * relative;

        if snapshot.kind.is_smoothed() {
            let sample = Pose::from_matrix(&world);
            // Frames without a tracker update are skipped, so step by the time since the last chase.
            let dt = match self.last_chase {
                Some(previous) => (ctx.time - previous) as f32,
                None => ctx.delta,
            };
            self.last_chase = Some(ctx.time);
            let mut pose = self.smoother.chase_with_delta(&sample, &self.config.smoothing, dt);
            if let Some(offset) = &self.rotation_offset {
                pose.rotation = pose.rotation * offset;
            }
            Some(pose.to_matrix())
        } else {
            match &self.rotation_offset {
                Some(offset) => Some(world * offset.to_homogeneous()),
                None => Some(world),
            }
        }
    }
}

impl std::fmt::Debug for AttachmentBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentBinding")
            .field("tag", &self.config.tag)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("found", &self.found)
            .finish()
    }
}
