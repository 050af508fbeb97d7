//! Gravity-based sensor frame rotation.
//!
//! A motionless accelerometer only observes gravity, which fixes roll and
//! pitch of the mounting but leaves yaw unobservable. Yaw is pinned to zero.

use nalgebra::{Rotation3, Vector3};

/// Roll and pitch (radians) of a mean gravity vector.
///
/// `roll = atan2(ay, az)`, `pitch = atan2(-ax, sqrt(ay² + az²))`.
#[must_use]
pub fn roll_pitch(gravity: [f64; 3]) -> (f64, f64) {
    let [ax, ay, az] = gravity;
    let roll = ay.atan2(az);
    let pitch = (-ax).atan2(ay.hypot(az));
    (roll, pitch)
}

/// Rotation aligning a sensor's static gravity reading with its +Z axis.
///
/// Built from X-Y-Z Euler angles `(roll, pitch, 0)`, i.e. `Rz(0)·Ry(pitch)·Rx(roll)`.
#[must_use]
pub fn gravity_rotation(gravity: [f64; 3]) -> Rotation3<f64> {
    let (roll, pitch) = roll_pitch(gravity);
    Rotation3::from_euler_angles(roll, pitch, 0.0)
}

/// Left-multiply a 3-vector by `rotation`.
#[inline]
#[must_use]
pub fn rotate(rotation: &Rotation3<f64>, v: [f64; 3]) -> [f64; 3] {
    let r = rotation * Vector3::new(v[0], v[1], v[2]);
    [r.x, r.y, r.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_level_sensor_is_identity() {
        let r = gravity_rotation([0.0, 0.0, 9.81]);
        let v = rotate(&r, [1.0, 2.0, 3.0]);
        assert_relative_eq!(v[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(v[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gravity_lands_on_z() {
        for g in [[3.0, -4.0, 8.0], [-9.0, 1.0, 2.0], [0.5, 9.7, -1.0]] {
            let r = gravity_rotation(g);
            let out = rotate(&r, g);
            let norm = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt();
            assert_relative_eq!(out[0], 0.0, epsilon = 1e-9);
            assert_relative_eq!(out[1], 0.0, epsilon = 1e-9);
            assert_relative_eq!(out[2], norm, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_orthonormal() {
        let r = gravity_rotation([1.0, 2.0, 9.0]);
        let m = r.matrix();
        let product = m.transpose() * m;
        assert_relative_eq!(product, nalgebra::Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-12);
    }
}
