//! Notifications delivered to the hosting environment.
//!
//! Delivery is synchronous within the frame context and best-effort: sinks
//! return nothing and a disconnected channel is ignored.

use std::sync::Arc;

use crossbeam_channel::Sender;
use nalgebra::Matrix4;
use parking_lot::Mutex;

use crate::tracker::camera::ScreenOrientation;
use crate::tracker::target::TargetKey;

#[derive(Debug, Clone, PartialEq)]
pub enum PoseEvent {
    MarkerFound {
        tag: String,
        target: TargetKey,
    },
    MarkerTracked {
        tag: String,
        target: TargetKey,
        /// Transform applied this frame, if the base target allowed one
        transform: Option<Matrix4<f32>>,
    },
    MarkerLost {
        tag: String,
        target: TargetKey,
    },
    OrientationChanged(ScreenOrientation),
    CameraSwapped,
    CameraStopped,
}

impl PoseEvent {
    /// Host-facing event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MarkerFound { .. } => "OnMarkerFound",
            Self::MarkerTracked { .. } => "OnMarkerTracked",
            Self::MarkerLost { .. } => "OnMarkerLost",
            Self::OrientationChanged(_) => "OnOrientationChanged",
            Self::CameraSwapped => "OnCameraSwapped",
            Self::CameraStopped => "OnCameraStopped",
        }
    }
}

pub trait PoseEventSink: Send + Sync {
    fn on_event(&self, event: &PoseEvent);
}

/// Forwards events into a crossbeam channel.
pub struct ChannelSink {
    sender: Sender<PoseEvent>,
}

impl ChannelSink {
    /// Forward events into `sender`.
    pub fn new(sender: Sender<PoseEvent>) -> Self {
        Self { sender }
    }
}

impl PoseEventSink for ChannelSink {
    fn on_event(&self, event: &PoseEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PoseEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event received so far, oldest first.
    pub fn events(&self) -> Vec<PoseEvent> {
        self.events.lock().clone()
    }

    /// Host-facing names of the received events, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(PoseEvent::name).collect()
    }

    /// How many received events carry `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Forget everything received.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PoseEventSink for RecordingSink {
    fn on_event(&self, event: &PoseEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Ordered observer list.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn PoseEventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink; sinks are called in subscription order.
    pub fn subscribe(&mut self, sink: Arc<dyn PoseEventSink>) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, event: PoseEvent) {
        tracing::trace!(event = event.name(), sinks = self.sinks.len(), "Emitting event");
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    pub fn sinks(&self) -> impl Iterator<Item = Arc<dyn PoseEventSink>> + '_ {
        self.sinks.iter().cloned()
    }

    /// Number of subscribed sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("sinks", &self.sinks.len()).finish()
    }
}
