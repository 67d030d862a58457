//! Integration module connecting an external recognition engine with the pose pipeline.
//!
//! This module provides the tracker trait the pipeline consumes, an in-memory
//! scripted implementation, and the frame pipeline that ties the tracker-update
//! and frame contexts together.

mod backend;
mod builder;
mod pipeline;
mod scripted;

pub use backend::{OpticalParams, PatternInfo, TrackerBackend};
pub use builder::TargetConfigBuilder;
pub use pipeline::{FrameOutput, ObjectTransform, PosePipeline, TrackerUpdater, UpdaterHandle};
pub use scripted::ScriptedTracker;
