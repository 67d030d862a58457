//! Conversion between the tracker's right-handed frame and the engine's left-handed frame.
//!
//! Tracker poses place the target in the X-Y plane with +Z pointing out of the
//! target. Two element-level conversions exist and consumers depend on the exact
//! element placement of each, so neither is expressed as a basis change.
//!
//! | element         | `Legacy`                          | `Current`          |
//! |-----------------|-----------------------------------|--------------------|
//! | m02, m12        | negated                           | unchanged          |
//! | m20, m21        | negated                           | negated            |
//! | m22             | unchanged                         | negated            |
//! | m23             | negated                           | negated            |
//! | m32             | negated                           | negated            |
//!
//! The two variants are not inverses of one another. Each is its own inverse.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Which element-sign table [`to_engine_space`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionVariant {
    /// Flips the Z basis vector and the Z component of the other basis vectors.
    Legacy,
    /// Negates the Z row.
    #[default]
    Current,
}

impl ConversionVariant {
    /// Map the tracker-facing `use_alternate_axis` flag onto a variant.
    pub fn from_alternate_axis(use_alternate_axis: bool) -> Self {
        if use_alternate_axis {
            Self::Current
        } else {
            Self::Legacy
        }
    }

    fn negated(self) -> &'static [(usize, usize)] {
        match self {
            Self::Legacy => &[(0, 2), (1, 2), (2, 0), (2, 1), (2, 3), (3, 2)],
            Self::Current => &[(2, 0), (2, 1), (2, 2), (2, 3), (3, 2)],
        }
    }
}

/// Convert a right-handed tracker matrix into the engine's left-handed convention.
pub fn to_engine_space(rh: &Matrix4<f32>, variant: ConversionVariant) -> Matrix4<f32> {
    let mut lh = *rh;
    for &(row, col) in variant.negated() {
        lh[(row, col)] = -lh[(row, col)];
    }
    lh
}

/// Convert to engine space and rescale the translation into engine units.
pub fn to_engine_pose(rh: &Matrix4<f32>, variant: ConversionVariant, unit_scale: f32) -> Matrix4<f32> {
    scale_translation(&to_engine_space(rh, variant), unit_scale)
}

/// Multiply the translation column by `factor`, leaving the basis untouched.
pub fn scale_translation(m: &Matrix4<f32>, factor: f32) -> Matrix4<f32> {
    let mut scaled = *m;
    for row in 0..3 {
        scaled[(row, 3)] *= factor;
    }
    scaled
}

/// Build a matrix from the tracker's 16-float row-major layout.
pub fn from_row_major(values: &[f32; 16]) -> Matrix4<f32> {
    Matrix4::from_row_slice(values)
}

/// Translation stored in the fourth column.
pub fn position_of(m: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Rotation looking along the Z basis column with the Y basis column as up.
///
/// A zero Z column means the tracker produced an invalid pose; identity is
/// returned instead of failing.
pub fn rotation_of(m: &Matrix4<f32>) -> UnitQuaternion<f32> {
    let forward = Vector3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]);
    let up = Vector3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]);
    look_rotation(&forward, &up)
}

/// Per-axis scale: magnitudes of the three basis columns.
pub fn scale_of(m: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(
        m.fixed_view::<3, 1>(0, 0).norm(),
        m.fixed_view::<3, 1>(0, 1).norm(),
        m.fixed_view::<3, 1>(0, 2).norm(),
    )
}

/// Rotation that maps +Z onto `forward` and keeps +Y as close to `up` as possible.
pub fn look_rotation(forward: &Vector3<f32>, up: &Vector3<f32>) -> UnitQuaternion<f32> {
    if !forward.iter().all(|c| c.is_finite()) || forward.norm_squared() <= f32::EPSILON {
        return UnitQuaternion::identity();
    }
    if !up.iter().all(|c| c.is_finite()) || up.cross(forward).norm_squared() <= f32::EPSILON {
        // Up is parallel to forward; any roll is acceptable.
        return UnitQuaternion::rotation_between(&Vector3::z(), forward).unwrap_or_else(|| {
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::PI)
        });
    }
    UnitQuaternion::face_towards(forward, up)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered() -> Matrix4<f32> {
        from_row_major(&[
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        ])
    }

    fn sign_pattern(converted: &Matrix4<f32>) -> Vec<(usize, usize)> {
        let original = numbered();
        let mut flipped = Vec::new();
        for row in 0..4 {
            for col in 0..4 {
                if converted[(row, col)] == -original[(row, col)] {
                    flipped.push((row, col));
                } else {
                    assert_eq!(converted[(row, col)], original[(row, col)]);
                }
            }
        }
        flipped
    }

    #[test]
    fn test_legacy_sign_pattern() {
        let lh = to_engine_space(&numbered(), ConversionVariant::Legacy);
        assert_eq!(
            sign_pattern(&lh),
            vec![(0, 2), (1, 2), (2, 0), (2, 1), (2, 3), (3, 2)]
        );
    }

    #[test]
    fn test_current_sign_pattern() {
        let lh = to_engine_space(&numbered(), ConversionVariant::Current);
        assert_eq!(sign_pattern(&lh), vec![(2, 0), (2, 1), (2, 2), (2, 3), (3, 2)]);
    }

    #[test]
    fn test_current_applied_twice_restores_input() {
        let m = numbered();
        let once = to_engine_space(&m, ConversionVariant::Current);
        assert_ne!(once, m);
        let twice = to_engine_space(&once, ConversionVariant::Current);
        assert_eq!(twice, m);
    }

    #[test]
    fn test_variants_are_not_interchangeable() {
        let m = numbered();
        let legacy = to_engine_space(&m, ConversionVariant::Legacy);
        let current = to_engine_space(&m, ConversionVariant::Current);
        assert_ne!(legacy, current);
        assert_ne!(to_engine_space(&legacy, ConversionVariant::Current), m);
    }

    #[test]
    fn test_alternate_axis_flag() {
        assert_eq!(ConversionVariant::from_alternate_axis(true), ConversionVariant::Current);
        assert_eq!(ConversionVariant::from_alternate_axis(false), ConversionVariant::Legacy);
    }

    #[test]
    fn test_position_and_scale() {
        let m = numbered();
        assert_eq!(position_of(&m), Vector3::new(4.0, 8.0, 12.0));

        let scale = scale_of(&Matrix4::new_nonuniform_scaling(&Vector3::new(2.0, 3.0, 4.0)));
        assert_eq!(scale, Vector3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_engine_pose_scales_translation_only() {
        let mut m = Matrix4::identity();
        m[(0, 3)] = 100.0;
        m[(1, 3)] = -50.0;
        m[(2, 3)] = 400.0;
        let lh = to_engine_pose(&m, ConversionVariant::Current, 0.001);
        assert!((lh[(0, 3)] - 0.1).abs() < 1e-6);
        assert!((lh[(1, 3)] + 0.05).abs() < 1e-6);
        assert!((lh[(2, 3)] + 0.4).abs() < 1e-6);
        assert_eq!(lh[(0, 0)], 1.0);
        assert_eq!(lh[(2, 2)], -1.0);
    }

    #[test]
    fn test_rotation_of_zero_forward_is_identity() {
        let mut m = Matrix4::identity();
        m[(0, 2)] = 0.0;
        m[(1, 2)] = 0.0;
        m[(2, 2)] = 0.0;
        assert_eq!(rotation_of(&m), UnitQuaternion::identity());
        assert_eq!(rotation_of(&Matrix4::zeros()), UnitQuaternion::identity());
    }

    #[test]
    fn test_rotation_of_recovers_rotation() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let m = q.to_homogeneous();
        assert!(rotation_of(&m).angle_to(&q) < 1e-4);
    }

    #[test]
    fn test_rotation_of_ignores_uniform_scale() {
        let q = UnitQuaternion::from_euler_angles(-0.5, 0.25, 0.0);
        let m = q.to_homogeneous() * Matrix4::new_scaling(80.0);
        assert!(rotation_of(&m).angle_to(&q) < 1e-4);
    }

    #[test]
    fn test_look_rotation_parallel_up() {
        let q = look_rotation(&Vector3::new(0.0, 1.0, 0.0), &Vector3::new(0.0, 1.0, 0.0));
        let mapped = q * Vector3::z();
        assert!((mapped - Vector3::y()).norm() < 1e-5);

        let back = look_rotation(&Vector3::new(0.0, 0.0, -1.0), &Vector3::new(0.0, 0.0, 1.0));
        assert!((back * Vector3::z() + Vector3::z()).norm() < 1e-5);
    }
}
