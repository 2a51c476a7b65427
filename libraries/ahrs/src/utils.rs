use nalgebra as na;
use core::f32::consts::PI;

/// Squared norm below which a vector is treated as absent
const MIN_NORM_SQUARED: f32 = 1e-12;

/// Convert degrees to radians
pub fn deg_to_rad(deg: f32) -> f32 {
    deg * PI / 180.0
}

/// Convert radians to degrees
pub fn rad_to_deg(rad: f32) -> f32 {
    rad * 180.0 / PI
}

/// Normalize an angle to the range (-180, 180] degrees
pub fn normalize_degrees(angle: f32) -> f32 {
    let mut result = angle % 360.0;
    if result > 180.0 {
        result -= 360.0;
    }
    if result <= -180.0 {
        result += 360.0;
    }
    result
}

/// Signed difference `a - b` between two angles in degrees, wrapped to (-180, 180]
pub fn angle_diff_degrees(a: f32, b: f32) -> f32 {
    normalize_degrees(a - b)
}

/// Normalize a vector, or `None` if it is (numerically) the zero vector
pub fn try_normalize(v: &na::Vector3<f32>) -> Option<na::Vector3<f32>> {
    let norm_squared = v.norm_squared();
    if norm_squared > MIN_NORM_SQUARED && norm_squared.is_finite() {
        Some(v / norm_squared.sqrt())
    } else {
        None
    }
}

/// Convert a quaternion to Euler angles (roll, pitch, yaw) in degrees
pub fn quaternion_to_euler(q: &na::UnitQuaternion<f32>) -> na::Vector3<f32> {
    let (roll, pitch, yaw) = q.euler_angles();
    na::Vector3::new(rad_to_deg(roll), rad_to_deg(pitch), rad_to_deg(yaw))
}

/// Convert Euler angles (roll, pitch, yaw) in degrees to a quaternion
pub fn euler_to_quaternion(euler: &na::Vector3<f32>) -> na::UnitQuaternion<f32> {
    na::UnitQuaternion::from_euler_angles(
        deg_to_rad(euler.x),
        deg_to_rad(euler.y),
        deg_to_rad(euler.z),
    )
}

/// Tilt-compensated compass heading in degrees (North-West-Up).
///
/// Returns `None` when either reading is missing or the magnetic field is
/// parallel to gravity.
pub fn compass_heading(accel: &na::Vector3<f32>, mag: &na::Vector3<f32>) -> Option<f32> {
    let west = try_normalize(&accel.cross(mag))?;
    let north = try_normalize(&west.cross(accel))?;
    Some(rad_to_deg(west.x.atan2(north.x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_degrees() {
        assert!((normalize_degrees(190.0) + 170.0).abs() < 1e-4);
        assert!((normalize_degrees(-190.0) - 170.0).abs() < 1e-4);
        assert!((normalize_degrees(180.0) - 180.0).abs() < 1e-4);
        assert!((normalize_degrees(-180.0) - 180.0).abs() < 1e-4);
        assert!((normalize_degrees(725.0) - 5.0).abs() < 1e-3);
        assert!((angle_diff_degrees(-175.0, 175.0) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_euler_round_trip() {
        let euler = na::Vector3::new(10.0, -20.0, 30.0);
        let back = quaternion_to_euler(&euler_to_quaternion(&euler));
        assert!((back - euler).norm() < 1e-3);
    }

    #[test]
    fn test_try_normalize_rejects_zero() {
        assert!(try_normalize(&na::Vector3::zeros()).is_none());
        let unit = try_normalize(&na::Vector3::new(0.0, 3.0, 4.0)).unwrap();
        assert!((unit.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compass_heading_follows_yaw() {
        let field = na::Vector3::new(20.0, 0.0, -40.0);
        let up = na::Vector3::new(0.0, 0.0, 1.0);
        for yaw in [-150.0_f32, -45.0, 0.0, 30.0, 120.0] {
            let q = euler_to_quaternion(&na::Vector3::new(0.0, 0.0, yaw));
            let accel = q.inverse() * up;
            let mag = q.inverse() * field;
            let heading = compass_heading(&accel, &mag).unwrap();
            assert!(angle_diff_degrees(heading, yaw).abs() < 1e-3, "yaw {} heading {}", yaw, heading);
        }
        assert!(compass_heading(&up, &na::Vector3::zeros()).is_none());
    }
}
