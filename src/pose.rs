//! Pose math: chirality conversion, pose decomposition, and critically-damped smoothing.

pub mod convert;
mod smooth_damp;
mod smoothed;

use nalgebra::{Isometry3, Matrix4, Translation3, UnitQuaternion, Vector3};

pub use convert::ConversionVariant;
pub use smooth_damp::{delta_angle, smooth_damp, smooth_damp_angle, smooth_damp_vec3};
pub use smoothed::{SmoothedPose, SmoothingParams};

/// Rotation and position of an object in engine space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: UnitQuaternion<f32>,
    pub position: Vector3<f32>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create a pose from its parts.
    pub fn new(rotation: UnitQuaternion<f32>, position: Vector3<f32>) -> Self {
        Self { rotation, position }
    }

    /// Identity rotation at the origin.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
        }
    }

    /// Decompose a homogeneous transform. Scale is discarded.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        Self {
            rotation: convert::rotation_of(matrix),
            position: convert::position_of(matrix),
        }
    }

    /// Compose rotation and translation into a homogeneous transform.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Isometry3::from_parts(Translation3::from(self.position), self.rotation).to_homogeneous()
    }

    /// True when every quaternion and position component is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.coords.iter().all(|c| c.is_finite())
            && self.position.iter().all(|c| c.is_finite())
    }
}
