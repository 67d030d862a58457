//! Real-time pose pipeline for fiducial targets.
//!
//! Raw per-frame poses from an external recognition engine flow through the
//! [`tracker::TargetRegistry`], the base-target arbiter, and the attachment
//! bindings before leaving as engine-space transforms.

pub mod config;
pub mod error;
pub mod integration;
pub mod pose;
pub mod tracker;

pub use config::PipelineConfig;
pub use error::{PoseError, Result};
pub use integration::{FrameOutput, PosePipeline, TrackerBackend, TrackerUpdater};
pub use pose::{ConversionVariant, Pose, SmoothedPose, SmoothingParams};
pub use tracker::{
    AttachmentBinding, BindingState, CameraPoseResolver, Origin, PoseEvent, TargetKey, TargetKind,
    TargetRegistry,
};
