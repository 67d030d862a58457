//! Critically-damped spring integrators.
//!
//! The decay uses the usual polynomial approximation of `exp(-omega * dt)`,
//! bounded so the value never moves faster than `max_speed` and never
//! overshoots the target.

use nalgebra::Vector3;

/// Smallest smoothing time accepted; shorter values would divide by ~0.
const MIN_SMOOTH_TIME: f32 = 1.0e-4;

fn decay(omega: f32, dt: f32) -> f32 {
    let x = omega * dt;
    1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x)
}

/// Move `current` toward `target`, updating `velocity` in place.
///
/// A non-positive `dt` leaves both value and velocity untouched. A negative or
/// NaN `max_speed` is treated as zero.
pub fn smooth_damp(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    max_speed: f32,
    dt: f32,
) -> f32 {
    if dt <= 0.0 {
        return current;
    }
    let smooth_time = smooth_time.max(MIN_SMOOTH_TIME);
    let omega = 2.0 / smooth_time;
    let exp = decay(omega, dt);

    let max_change = max_speed.max(0.0) * smooth_time;
    let change = (current - target).clamp(-max_change, max_change);
    let clamped_target = current - change;

    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut output = clamped_target + (change + temp) * exp;

    // Overshoot: snap onto the target.
    if (target - current > 0.0) == (output > target) {
        output = target;
        *velocity = (output - target) / dt;
    }
    output
}

/// Shortest signed difference `target - current` in degrees, in `(-180, 180]`.
pub fn delta_angle(current: f32, target: f32) -> f32 {
    let mut delta = (target - current).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

/// [`smooth_damp`] for angles in degrees, taking the short way around.
pub fn smooth_damp_angle(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    max_speed: f32,
    dt: f32,
) -> f32 {
    let target = current + delta_angle(current, target);
    smooth_damp(current, target, velocity, smooth_time, max_speed, dt)
}

/// Vector form of [`smooth_damp`]; `max_speed` bounds the length of the step.
pub fn smooth_damp_vec3(
    current: Vector3<f32>,
    target: Vector3<f32>,
    velocity: &mut Vector3<f32>,
    smooth_time: f32,
    max_speed: f32,
    dt: f32,
) -> Vector3<f32> {
    if dt <= 0.0 {
        return current;
    }
    let smooth_time = smooth_time.max(MIN_SMOOTH_TIME);
    let omega = 2.0 / smooth_time;
    let exp = decay(omega, dt);

    let mut change = current - target;
    let max_change = max_speed.max(0.0) * smooth_time;
    let distance = change.norm();
    if distance > max_change {
        change *= max_change / distance;
    }
    let clamped_target = current - change;

    let temp = (*velocity + change * omega) * dt;
    *velocity = (*velocity - temp * omega) * exp;
    let mut output = clamped_target + (change + temp) * exp;

    if (target - current).dot(&(output - target)) > 0.0 {
        output = target;
        *velocity = Vector3::zeros();
    }
    output
}
