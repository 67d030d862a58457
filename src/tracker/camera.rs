//! Camera world pose derived from the tracked target.

use std::f32::consts::PI;

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::pose::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl ScreenOrientation {
    /// Orientations whose video image arrives rotated by 180 degrees.
    pub fn is_flipped(self) -> bool {
        matches!(self, Self::PortraitUpsideDown | Self::LandscapeRight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub pose: Pose,
    /// False when the pose was carried over from an earlier frame
    pub visible: bool,
}

/// Inverts target poses into camera poses, remembering the last good one.
///
/// For a stereo rig use one resolver per eye, each with that eye's optical offset.
#[derive(Debug, Clone, Default)]
pub struct CameraPoseResolver {
    optical_offset: Option<Matrix4<f32>>,
    last: Option<Pose>,
}

impl CameraPoseResolver {
    /// Create a resolver with an optional eye/optical offset.
    pub fn new(optical_offset: Option<Matrix4<f32>>) -> Self {
        Self {
            optical_offset,
            last: None,
        }
    }

    pub fn optical_offset(&self) -> Option<&Matrix4<f32>> {
        self.optical_offset.as_ref()
    }

    /// Replace the optical offset used by later resolves.
    pub fn set_optical_offset(&mut self, optical_offset: Option<Matrix4<f32>>) {
        self.optical_offset = optical_offset;
    }

    /// Pose from the last successful resolve.
    pub fn last(&self) -> Option<Pose> {
        self.last
    }

    /// Forget the remembered pose, e.g. after switching video sources.
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// Camera pose in world space for an engine-space `target_pose` seen from the camera.
    ///
    /// Without a target pose, or when it cannot be inverted, the previous camera
    /// pose is returned with `visible == false`.
    pub fn resolve(
        &mut self,
        origin: &Matrix4<f32>,
        target_pose: Option<&Matrix4<f32>>,
        orientation: ScreenOrientation,
    ) -> CameraPose {
        let inverse = target_pose.and_then(|target| {
            let mut view = *target;
            if orientation.is_flipped() {
                view = forward_flip() * view;
            }
            if let Some(optical) = &self.optical_offset {
                view = optical * view;
            }
            view.try_inverse()
        });

        match inverse {
            Some(inverse) => {
                let pose = Pose::from_matrix(&(origin * inverse));
                self.last = Some(pose);
                CameraPose {
                    pose,
                    visible: true,
                }
            }
            None => {
                trace!("No camera pose this frame; keeping previous");
                CameraPose {
                    pose: self.last.unwrap_or_default(),
                    visible: false,
                }
            }
        }
    }
}

/// 180 degrees about the forward (Z) axis.
fn forward_flip() -> Matrix4<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI).to_homogeneous()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_at(z: f32) -> Matrix4<f32> {
        Matrix4::new_translation(&Vector3::new(0.0, 0.0, z))
    }

    #[test]
    fn test_camera_is_inverse_of_target() {
        let mut resolver = CameraPoseResolver::new(None);
        let target = target_at(2.0);
        let camera = resolver.resolve(&Matrix4::identity(), Some(&target), ScreenOrientation::Portrait);
        assert!(camera.visible);
        assert!((camera.pose.position - Vector3::new(0.0, 0.0, -2.0)).norm() < 1e-5);
        assert!(camera.pose.rotation.angle() < 1e-5);
    }

    #[test]
    fn test_origin_offsets_camera() {
        let mut resolver = CameraPoseResolver::new(None);
        let origin = Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0));
        let camera = resolver.resolve(&origin, Some(&target_at(2.0)), ScreenOrientation::Portrait);
        assert!((camera.pose.position - Vector3::new(1.0, 0.0, -2.0)).norm() < 1e-5);
    }

    #[test]
    fn test_flipped_orientation_rolls_camera() {
        let mut resolver = CameraPoseResolver::new(None);
        let camera = resolver.resolve(
            &Matrix4::identity(),
            Some(&target_at(2.0)),
            ScreenOrientation::PortraitUpsideDown,
        );
        let up = camera.pose.rotation * Vector3::y();
        assert!((up + Vector3::y()).norm() < 1e-4);
        assert!((camera.pose.position - Vector3::new(0.0, 0.0, -2.0)).norm() < 1e-4);
    }

    #[test]
    fn test_optical_offset_applied_before_inverse() {
        let offset = Matrix4::new_translation(&Vector3::new(0.5, 0.0, 0.0));
        let mut resolver = CameraPoseResolver::new(Some(offset));
        let camera = resolver.resolve(&Matrix4::identity(), Some(&target_at(2.0)), ScreenOrientation::Portrait);
        assert!((camera.pose.position - Vector3::new(-0.5, 0.0, -2.0)).norm() < 1e-5);
    }

    #[test]
    fn test_missing_pose_keeps_previous() {
        let mut resolver = CameraPoseResolver::new(None);
        let first = resolver.resolve(&Matrix4::identity(), Some(&target_at(3.0)), ScreenOrientation::Portrait);
        let second = resolver.resolve(&Matrix4::identity(), None, ScreenOrientation::Portrait);
        assert!(!second.visible);
        assert_eq!(second.pose, first.pose);

        let singular = Matrix4::zeros();
        let third = resolver.resolve(&Matrix4::identity(), Some(&singular), ScreenOrientation::Portrait);
        assert!(!third.visible);
        assert_eq!(third.pose, first.pose);
    }
}
