//! Thread-safe smoothed rotation/position store.

use std::time::{Duration, Instant};

use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PoseError, Result};
use crate::pose::Pose;
use crate::pose::smooth_damp::{smooth_damp_angle, smooth_damp_vec3};

/// Weight kept on the spring-smoothed rotation when blending back toward the raw sample.
const ROTATION_BIAS: f32 = 0.9;

/// Tuning for [`SmoothedPose::chase`]. Rotation speeds are in degrees per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub rotation_smooth_time: f32,
    pub position_smooth_time: f32,
    pub rotation_max_speed: f32,
    pub position_max_speed: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            rotation_smooth_time: 0.1,
            position_smooth_time: 0.1,
            rotation_max_speed: f32::INFINITY,
            position_max_speed: f32::INFINITY,
        }
    }
}

impl SmoothingParams {
    /// Reject negative or NaN times and speeds. Infinite speeds mean unbounded.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("rotation_smooth_time", self.rotation_smooth_time),
            ("position_smooth_time", self.position_smooth_time),
            ("rotation_max_speed", self.rotation_max_speed),
            ("position_max_speed", self.position_max_speed),
        ];
        for (name, value) in fields {
            if value.is_nan() || value < 0.0 {
                return Err(PoseError::Configuration(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        for (name, value) in &fields[..2] {
            if value.is_infinite() {
                return Err(PoseError::Configuration(format!("{name} must be finite")));
            }
        }
        Ok(())
    }
}

/// Pausable elapsed-time accumulator.
#[derive(Debug)]
struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    fn started() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Seconds accumulated since the previous lap.
    fn lap(&mut self) -> f32 {
        let mut total = self.accumulated;
        if let Some(since) = self.running_since {
            total += since.elapsed();
            self.running_since = Some(Instant::now());
        }
        self.accumulated = Duration::ZERO;
        total.as_secs_f32()
    }

    fn clear(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
    }
}

#[derive(Debug)]
struct SmoothedState {
    rotation: Option<UnitQuaternion<f32>>,
    position: Option<Vector3<f32>>,
    /// Per-Euler-axis angular velocity (roll, pitch, yaw) in degrees per second.
    rotation_velocity: Vector3<f32>,
    position_velocity: Vector3<f32>,
    enabled: bool,
    rotation_clock: Stopwatch,
    position_clock: Stopwatch,
}

impl SmoothedState {
    fn step(&mut self, target: &Pose, params: &SmoothingParams, rot_dt: f32, pos_dt: f32) -> Pose {
        assert!(
            target.is_finite(),
            "non-finite pose sample fed to smoother: {target:?}"
        );

        let rotation = match self.rotation {
            None => target.rotation,
            Some(current) => smooth_rotation(
                current,
                target.rotation,
                &mut self.rotation_velocity,
                params,
                rot_dt,
            ),
        };
        let position = match self.position {
            None => target.position,
            Some(current) => smooth_damp_vec3(
                current,
                target.position,
                &mut self.position_velocity,
                params.position_smooth_time,
                params.position_max_speed,
                pos_dt,
            ),
        };

        let smoothed = Pose { rotation, position };
        assert!(
            smoothed.is_finite(),
            "smoother produced a non-finite pose: {smoothed:?} (velocities {:?} / {:?})",
            self.rotation_velocity,
            self.position_velocity
        );
        self.rotation = Some(rotation);
        self.position = Some(position);
        smoothed
    }
}

fn smooth_rotation(
    current: UnitQuaternion<f32>,
    target: UnitQuaternion<f32>,
    velocity: &mut Vector3<f32>,
    params: &SmoothingParams,
    dt: f32,
) -> UnitQuaternion<f32> {
    if dt <= 0.0 {
        return current;
    }
    let (cr, cp, cy) = current.euler_angles();
    let (tr, tp, ty) = target.euler_angles();
    let axis = |c: f32, t: f32, v: &mut f32| {
        smooth_damp_angle(
            c.to_degrees(),
            t.to_degrees(),
            v,
            params.rotation_smooth_time,
            params.rotation_max_speed,
            dt,
        )
        .to_radians()
    };
    let roll = axis(cr, tr, &mut velocity.x);
    let pitch = axis(cp, tp, &mut velocity.y);
    let yaw = axis(cy, ty, &mut velocity.z);
    let smoothed = UnitQuaternion::from_euler_angles(roll, pitch, yaw);

    // Nearly identical or opposite inputs have no stable slerp; keep the spring result.
    target
        .try_slerp(&smoothed, ROTATION_BIAS, 1.0e-6)
        .unwrap_or(smoothed)
}

/// Smoothed rotation/position pair shared between the tracker-update and frame contexts.
///
/// All access goes through one internal lock; readers get copies.
#[derive(Debug)]
pub struct SmoothedPose {
    state: Mutex<SmoothedState>,
}

impl Default for SmoothedPose {
    fn default() -> Self {
        Self::new()
    }
}

impl SmoothedPose {
    /// Create an empty, enabled smoother.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SmoothedState {
                rotation: None,
                position: None,
                rotation_velocity: Vector3::zeros(),
                position_velocity: Vector3::zeros(),
                enabled: true,
                rotation_clock: Stopwatch::started(),
                position_clock: Stopwatch::started(),
            }),
        }
    }

    /// Overwrite rotation and position, discarding velocity.
    ///
    /// # Panics
    /// If `pose` has a non-finite component.
    pub fn set_instant(&self, pose: &Pose) {
        assert!(pose.is_finite(), "non-finite pose set on smoother: {pose:?}");
        let mut state = self.state.lock();
        state.rotation = Some(pose.rotation);
        state.position = Some(pose.position);
        state.rotation_velocity = Vector3::zeros();
        state.position_velocity = Vector3::zeros();
        state.rotation_clock.clear();
        state.position_clock.clear();
    }

    /// Advance toward `target` using the time elapsed since the previous chase.
    ///
    /// Rotation and position keep separate clocks. The first sample after a
    /// reset is taken as-is.
    ///
    /// # Panics
    /// If `target` or the produced pose has a non-finite component.
    pub fn chase(&self, target: &Pose, params: &SmoothingParams) -> Pose {
        let mut state = self.state.lock();
        let rot_dt = state.rotation_clock.lap();
        let pos_dt = state.position_clock.lap();
        state.step(target, params, rot_dt, pos_dt)
    }

    /// Advance toward `target` by an explicit step of `dt` seconds.
    ///
    /// While disabled the step is treated as zero length.
    pub fn chase_with_delta(&self, target: &Pose, params: &SmoothingParams, dt: f32) -> Pose {
        let mut state = self.state.lock();
        let dt = if state.enabled { dt } else { 0.0 };
        state.step(target, params, dt, dt)
    }

    /// Clear rotation, position and both velocities, whether or not enabled.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.rotation = None;
        state.position = None;
        state.rotation_velocity = Vector3::zeros();
        state.position_velocity = Vector3::zeros();
        state.rotation_clock.clear();
        state.position_clock.clear();
    }

    /// Pause or resume the internal clocks. Stored values are kept.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if enabled {
            state.rotation_clock.start();
            state.position_clock.start();
        } else {
            state.rotation_clock.stop();
            state.position_clock.stop();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Current smoothed rotation, unset after a reset.
    pub fn rotation(&self) -> Option<UnitQuaternion<f32>> {
        self.state.lock().rotation
    }

    /// Current smoothed position, unset after a reset.
    pub fn position(&self) -> Option<Vector3<f32>> {
        self.state.lock().position
    }

    /// Both halves read under a single lock.
    pub fn pose(&self) -> Option<Pose> {
        let state = self.state.lock();
        Some(Pose {
            rotation: state.rotation?,
            position: state.position?,
        })
    }

    pub fn rotation_velocity(&self) -> Vector3<f32> {
        self.state.lock().rotation_velocity
    }

    pub fn position_velocity(&self) -> Vector3<f32> {
        self.state.lock().position_velocity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn target() -> Pose {
        Pose::new(
            UnitQuaternion::from_euler_angles(0.2, -0.3, 0.6),
            Vector3::new(0.5, -0.25, 1.5),
        )
    }

    #[test]
    fn test_first_sample_is_taken_as_is() {
        let smoothed = SmoothedPose::new();
        assert!(smoothed.pose().is_none());
        let out = smoothed.chase_with_delta(&target(), &SmoothingParams::default(), DT);
        assert_eq!(out, target());
        assert_eq!(smoothed.pose(), Some(target()));
    }

    #[test]
    fn test_chase_converges_and_stays() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        let params = SmoothingParams::default();

        let mut out = Pose::identity();
        for _ in 0..600 {
            out = smoothed.chase_with_delta(&target(), &params, DT);
        }
        assert!((out.position - target().position).norm() < 1e-3);
        assert!(out.rotation.angle_to(&target().rotation) < 1e-3);

        for _ in 0..120 {
            out = smoothed.chase_with_delta(&target(), &params, DT);
            assert!((out.position - target().position).norm() < 1e-3);
            assert!(out.rotation.angle_to(&target().rotation) < 1e-3);
        }
    }

    #[test]
    fn test_chase_moves_partially_per_step() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        let out = smoothed.chase_with_delta(&target(), &SmoothingParams::default(), DT);
        let start_distance = target().position.norm();
        let distance = (out.position - target().position).norm();
        assert!(distance > 0.0 && distance < start_distance);
        assert!(smoothed.position_velocity().norm() > 0.0);
    }

    #[test]
    fn test_rotation_blends_spring_result_toward_sample() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        let yaw = 0.6_f32;
        let raw = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw);
        let out = smoothed.chase_with_delta(
            &Pose::new(raw, Vector3::zeros()),
            &SmoothingParams::default(),
            DT,
        );

        let mut velocity = 0.0;
        let spring_yaw =
            smooth_damp_angle(0.0, yaw.to_degrees(), &mut velocity, 0.1, f32::INFINITY, DT).to_radians();
        let spring_gap = yaw - spring_yaw;
        assert!(spring_gap > 0.1, "spring moved too far: {spring_gap}");

        // 90% of the way from the raw sample to the spring result.
        assert!((out.rotation.angle_to(&raw) - 0.9 * spring_gap).abs() < 1e-4);
        let spring = UnitQuaternion::from_euler_angles(0.0, 0.0, spring_yaw);
        assert!((out.rotation.angle_to(&spring) - 0.1 * spring_gap).abs() < 1e-4);
    }

    #[test]
    fn test_rotation_at_target_stays_put() {
        let smoothed = SmoothedPose::new();
        let at = target();
        smoothed.set_instant(&at);
        for _ in 0..10 {
            let out = smoothed.chase_with_delta(&at, &SmoothingParams::default(), DT);
            assert!(out.rotation.angle_to(&at.rotation) < 1e-5);
        }
    }

    #[test]
    fn test_validate_params() {
        assert!(SmoothingParams::default().validate().is_ok());
        let zero = SmoothingParams {
            rotation_smooth_time: 0.0,
            position_max_speed: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_ok());

        let defaults = SmoothingParams::default();
        for bad in [
            SmoothingParams {
                rotation_max_speed: -1.0,
                ..defaults
            },
            SmoothingParams {
                position_max_speed: f32::NAN,
                ..defaults
            },
            SmoothingParams {
                position_smooth_time: -0.1,
                ..defaults
            },
            SmoothingParams {
                rotation_smooth_time: f32::INFINITY,
                ..defaults
            },
        ] {
            assert!(
                matches!(bad.validate(), Err(PoseError::Configuration(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_negative_max_speed_does_not_panic() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        let params = SmoothingParams {
            rotation_max_speed: -1.0,
            position_max_speed: -1.0,
            ..Default::default()
        };
        let out = smoothed.chase_with_delta(&target(), &params, DT);
        assert!(out.is_finite());
        // Zero speed: nothing moves, and never away from the target.
        assert!((out.position - target().position).norm() <= target().position.norm() + 1e-6);
    }

    #[test]
    fn test_set_instant_discards_velocity() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        smoothed.chase_with_delta(&target(), &SmoothingParams::default(), DT);
        smoothed.set_instant(&target());
        assert_eq!(smoothed.position_velocity(), Vector3::zeros());
        assert_eq!(smoothed.rotation_velocity(), Vector3::zeros());
        assert_eq!(smoothed.pose(), Some(target()));
    }

    #[test]
    fn test_reset_clears_even_when_disabled() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&target());
        smoothed.set_enabled(false);
        smoothed.reset();
        assert!(smoothed.rotation().is_none());
        assert!(smoothed.position().is_none());
        assert!(!smoothed.is_enabled());
    }

    #[test]
    fn test_disabled_holds_value() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        smoothed.set_enabled(false);
        let out = smoothed.chase_with_delta(&target(), &SmoothingParams::default(), DT);
        assert_eq!(out.position, Vector3::zeros());

        smoothed.set_enabled(true);
        let out = smoothed.chase_with_delta(&target(), &SmoothingParams::default(), DT);
        assert!(out.position.norm() > 0.0);
    }

    #[test]
    fn test_wall_clock_chase_moves_toward_target() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        std::thread::sleep(Duration::from_millis(20));
        let out = smoothed.chase(&target(), &SmoothingParams::default());
        assert!(out.position.norm() > 0.0);
        assert!(out.position.norm() <= target().position.norm() + 1e-6);
    }

    #[test]
    #[should_panic(expected = "non-finite")]
    fn test_nan_sample_is_fatal() {
        let smoothed = SmoothedPose::new();
        smoothed.set_instant(&Pose::identity());
        let mut bad = target();
        bad.position.x = f32::NAN;
        smoothed.chase_with_delta(&bad, &SmoothingParams::default(), DT);
    }

    #[test]
    #[should_panic(expected = "non-finite")]
    fn test_nan_instant_is_fatal() {
        let smoothed = SmoothedPose::new();
        let mut bad = target();
        bad.position.z = f32::INFINITY;
        smoothed.set_instant(&bad);
    }

    #[test]
    fn test_concurrent_access_never_tears() {
        let smoothed = Arc::new(SmoothedPose::new());
        let a = Pose::new(UnitQuaternion::identity(), Vector3::new(1.0, 1.0, 1.0));
        let b = Pose::new(UnitQuaternion::identity(), Vector3::new(-1.0, -1.0, -1.0));

        let writer = {
            let smoothed = Arc::clone(&smoothed);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    smoothed.set_instant(if i % 2 == 0 { &a } else { &b });
                }
            })
        };
        for _ in 0..2000 {
            if let Some(pose) = smoothed.pose() {
                let p = pose.position;
                assert!(p.x == p.y && p.y == p.z);
            }
        }
        writer.join().unwrap();
    }
}
