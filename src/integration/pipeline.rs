//! PosePipeline combining the tracker-update context with the per-frame evaluation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};
use nalgebra::Matrix4;
use tracing::{debug, info, warn};

use super::TrackerBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pose::convert;
use crate::tracker::{
    AttachmentBinding, BindingState, CameraPose, CameraPoseResolver, EventBus, FrameContext,
    Origin, PendingRegistration, PlaybackMode, PoseEvent, PoseEventSink, SceneView,
    ScreenOrientation, TargetKey, TargetRegistry,
};

/// Handle for the tracker-update context.
///
/// Cheap to clone and safe to move to another thread.
#[derive(Clone)]
pub struct TrackerUpdater {
    registry: Arc<TargetRegistry>,
    pending: Arc<AtomicBool>,
}

impl TrackerUpdater {
    /// Query every registered target once and flag the next frame for evaluation.
    /// Returns the number of visible targets.
    pub fn update(&self) -> usize {
        let visible = self.registry.update_all();
        self.pending.store(true, Ordering::Release);
        visible
    }

    /// Run [`update`](Self::update) every `period` on a background thread.
    pub fn spawn(self, period: Duration) -> Result<UpdaterHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(period);
        let thread = thread::Builder::new()
            .name("tracker-update".to_string())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "Tracker update loop started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            self.update();
                        }
                    }
                }
                info!("Tracker update loop stopped");
            })?;
        Ok(UpdaterHandle {
            stop: stop_tx,
            thread,
        })
    }
}

/// Running background update loop.
pub struct UpdaterHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl UpdaterHandle {
    /// Stop the loop and wait for it to exit.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("Tracker update loop panicked");
        }
    }
}

/// Transform of one bound object after a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTransform {
    pub tag: String,
    pub state: BindingState,
    pub shown: bool,
    pub transform: Option<Matrix4<f32>>,
}

/// Render-ready output of [`PosePipeline::frame`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutput {
    /// False when no tracker update arrived since the previous frame
    pub evaluated: bool,
    pub base: Option<TargetKey>,
    pub objects: Vec<ObjectTransform>,
    pub camera: Option<CameraPose>,
}

struct CameraRig {
    resolver: CameraPoseResolver,
    tag: Option<String>,
}

/// The full pose pipeline: registry, base-target arbiter, bindings, and camera.
pub struct PosePipeline {
    registry: Arc<TargetRegistry>,
    pending: Arc<AtomicBool>,
    origin: Origin,
    bindings: Vec<AttachmentBinding>,
    camera: Option<CameraRig>,
    orientation: ScreenOrientation,
    unit_scale: f32,
    update_period: Duration,
    events: EventBus,
    last: FrameOutput,
}

impl PosePipeline {
    /// Create an empty pipeline converting tracker units with `unit_scale`.
    pub fn new(backend: Arc<dyn TrackerBackend>, unit_scale: f32) -> Self {
        Self {
            registry: Arc::new(TargetRegistry::new(backend)),
            pending: Arc::new(AtomicBool::new(false)),
            origin: Origin::new(),
            bindings: Vec::new(),
            camera: None,
            orientation: ScreenOrientation::default(),
            unit_scale,
            update_period: Duration::from_secs_f32(1.0 / 30.0),
            events: EventBus::new(),
            last: FrameOutput::default(),
        }
    }

    /// Declare every configured target, origin candidate, binding and camera.
    /// Targets still need [`register_all`](Self::register_all).
    pub fn from_config(backend: Arc<dyn TrackerBackend>, config: &PipelineConfig) -> Result<Self> {
        let mut pipeline = Self::new(backend, config.tracking.unit_scale);
        if config.tracking.update_rate_hz > 0.0 {
            pipeline.update_period = Duration::from_secs_f32(1.0 / config.tracking.update_rate_hz);
        }

        for entry in &config.targets {
            let key = pipeline.registry.add(&entry.tag, &entry.config, entry.options)?;
            if entry.origin_candidate {
                pipeline.origin.add_candidate(key, entry.at_front);
            }
        }
        for binding in &config.bindings {
            binding.validate()?;
            pipeline.add_binding(AttachmentBinding::new(binding.clone()));
        }
        if let Some(camera) = &config.camera {
            let optical = camera.optical_offset.as_ref().map(convert::from_row_major);
            pipeline.set_camera(camera.tag.clone(), optical);
            pipeline.orientation = camera.orientation;
        }
        Ok(pipeline)
    }

    /// Get a reference to the target registry.
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Get a reference to the base-target arbiter.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Get a mutable reference to the base-target arbiter.
    pub fn origin_mut(&mut self) -> &mut Origin {
        &mut self.origin
    }

    /// All bindings, in evaluation order.
    pub fn bindings(&self) -> &[AttachmentBinding] {
        &self.bindings
    }

    /// First binding with `tag`.
    pub fn binding(&self, tag: &str) -> Option<&AttachmentBinding> {
        self.bindings.iter().find(|b| b.tag() == tag)
    }

    pub fn screen_orientation(&self) -> ScreenOrientation {
        self.orientation
    }

    /// Attach a binding; it also receives every pipeline-level sink.
    pub fn add_binding(&mut self, mut binding: AttachmentBinding) {
        for sink in self.events.sinks() {
            binding.subscribe(sink);
        }
        self.bindings.push(binding);
    }

    /// Subscribe to pipeline events and the events of every binding.
    pub fn subscribe(&mut self, sink: Arc<dyn PoseEventSink>) {
        for binding in &mut self.bindings {
            binding.subscribe(sink.clone());
        }
        self.events.subscribe(sink);
    }

    /// Follow `tag` with the camera, or the base target when `None`.
    pub fn set_camera(&mut self, tag: Option<String>, optical_offset: Option<Matrix4<f32>>) {
        self.camera = Some(CameraRig {
            resolver: CameraPoseResolver::new(optical_offset),
            tag,
        });
    }

    /// Hand every declared, unregistered target to the tracker.
    pub fn register_all(&self) -> Result<Vec<PendingRegistration>> {
        self.registry
            .snapshots()
            .into_iter()
            .filter(|snapshot| snapshot.id.is_none())
            .map(|snapshot| {
                let tag = snapshot.tag.clone();
                self.registry.register(snapshot.key, move |outcome| {
                    debug!(tag = %tag, ?outcome, "Registration complete");
                })
            })
            .collect()
    }

    /// Handle for the tracker-update context sharing this pipeline's pending flag.
    pub fn updater(&self) -> TrackerUpdater {
        TrackerUpdater {
            registry: Arc::clone(&self.registry),
            pending: Arc::clone(&self.pending),
        }
    }

    /// Start the background tracker-update loop at the configured rate.
    pub fn spawn_updater(&self) -> Result<UpdaterHandle> {
        self.updater().spawn(self.update_period)
    }

    /// Emits `OrientationChanged` when the orientation actually changes.
    pub fn set_screen_orientation(&mut self, orientation: ScreenOrientation) {
        if orientation == self.orientation {
            return;
        }
        info!(?orientation, "Screen orientation changed");
        self.orientation = orientation;
        self.events.emit(PoseEvent::OrientationChanged(orientation));
    }

    /// Switch video source: the camera forgets its pose and takes a new optical offset.
    pub fn swap_camera(&mut self, optical_offset: Option<Matrix4<f32>>) {
        if let Some(rig) = &mut self.camera {
            rig.resolver.clear();
            rig.resolver.set_optical_offset(optical_offset);
        }
        info!("Camera swapped");
        self.events.emit(PoseEvent::CameraSwapped);
    }

    /// Unregister every target and reset all bindings.
    pub fn stop(&mut self) {
        for key in self.registry.keys() {
            if let Err(e) = self.registry.unregister(key) {
                warn!(target_key = %key, error = %e, "Failed to unregister target");
            }
        }
        for binding in &mut self.bindings {
            binding.deactivate();
        }
        if let Some(rig) = &mut self.camera {
            rig.resolver.clear();
        }
        self.pending.store(false, Ordering::Release);
        self.last = FrameOutput::default();
        info!("Pose pipeline stopped");
        self.events.emit(PoseEvent::CameraStopped);
    }

    /// Evaluate one rendered frame.
    ///
    /// While running, evaluates at most once per tracker update; without a new
    /// update the previous output is returned with `evaluated == false`.
    /// Preview frames are always evaluated since no tracker drives them.
    pub fn frame(&mut self, ctx: &FrameContext) -> FrameOutput {
        let pending = self.pending.swap(false, Ordering::AcqRel);
        if !pending && ctx.mode == PlaybackMode::Running {
            return FrameOutput {
                evaluated: false,
                ..self.last.clone()
            };
        }

        let base = self.origin.evaluate(&self.registry);
        let scene = SceneView {
            registry: &self.registry,
            origin: &self.origin,
            unit_scale: self.unit_scale,
        };

        let objects = self
            .bindings
            .iter_mut()
            .map(|binding| {
                let transform = binding.update(ctx, &scene);
                ObjectTransform {
                    tag: binding.tag().to_string(),
                    state: binding.state(),
                    shown: binding.is_shown(),
                    transform,
                }
            })
            .collect();

        let camera = self.camera.as_mut().map(|rig| {
            let key = match &rig.tag {
                Some(tag) => scene.registry.find_by_tag(tag),
                None => base,
            };
            let target_pose = key
                .and_then(|key| scene.registry.snapshot(key))
                .filter(|snapshot| snapshot.visible)
                .and_then(|snapshot| snapshot.engine_pose(scene.unit_scale));
            rig.resolver
                .resolve(scene.origin.world(), target_pose.as_ref(), self.orientation)
        });

        self.last = FrameOutput {
            evaluated: true,
            base,
            objects,
            camera,
        };
        self.last.clone()
    }
}
