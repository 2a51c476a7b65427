//! Synthetic sample series for known motions.
//!
//! Sensor readings are derived exactly from a true orientation and
//! acceleration history, so a correct estimator must recover that history.

use nalgebra as na;

use crate::sensors::Sample;

/// Earth magnetic field in the NWU frame, microtesla (mid-latitude, pointing
/// north and down)
pub const DEFAULT_EARTH_FIELD: [f32; 3] = [20.0, 0.0, -40.0];

/// Motion performed by the body
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    Stationary,
    /// Constant angular rate about a body-frame axis
    Rotation {
        axis: na::Unit<na::Vector3<f32>>,
        rate_dps: f32,
    },
    /// Accelerate then brake along an earth-frame direction: `acceleration_g`
    /// for the first half of the push, its negation for the second half, so
    /// the body is at rest again afterwards
    Push {
        acceleration_g: na::Vector3<f32>,
        start_s: f32,
        duration_s: f32,
    },
}

/// A motion together with the sensor setup that observes it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scenario {
    pub motion: Motion,
    pub sample_rate: f32,
    pub duration_s: f32,
    /// True orientation at t = 0
    pub initial_orientation: na::UnitQuaternion<f32>,
    /// Earth field in NWU, microtesla
    pub earth_field: na::Vector3<f32>,
    /// Constant offset added to every gyroscope reading, deg/s
    pub gyro_bias: na::Vector3<f32>,
    /// Constant offset added to every magnetometer reading, microtesla
    pub hard_iron_offset: na::Vector3<f32>,
}

impl Scenario {
    pub fn new(motion: Motion, sample_rate: f32, duration_s: f32) -> Self {
        Self {
            motion,
            sample_rate,
            duration_s,
            initial_orientation: na::UnitQuaternion::identity(),
            earth_field: na::Vector3::from(DEFAULT_EARTH_FIELD),
            gyro_bias: na::Vector3::zeros(),
            hard_iron_offset: na::Vector3::zeros(),
        }
    }

    pub fn stationary(sample_rate: f32, duration_s: f32) -> Self {
        Self::new(Motion::Stationary, sample_rate, duration_s)
    }

    pub fn rotation(axis: na::Vector3<f32>, rate_dps: f32, sample_rate: f32, duration_s: f32) -> Self {
        Self::new(
            Motion::Rotation {
                axis: na::Unit::new_normalize(axis),
                rate_dps,
            },
            sample_rate,
            duration_s,
        )
    }

    pub fn push(
        acceleration_g: na::Vector3<f32>,
        start_s: f32,
        push_duration_s: f32,
        sample_rate: f32,
        duration_s: f32,
    ) -> Self {
        Self::new(
            Motion::Push {
                acceleration_g,
                start_s,
                duration_s: push_duration_s,
            },
            sample_rate,
            duration_s,
        )
    }

    pub fn with_initial_orientation(mut self, orientation: na::UnitQuaternion<f32>) -> Self {
        self.initial_orientation = orientation;
        self
    }

    pub fn with_earth_field(mut self, field: na::Vector3<f32>) -> Self {
        self.earth_field = field;
        self
    }

    pub fn with_gyro_bias(mut self, bias: na::Vector3<f32>) -> Self {
        self.gyro_bias = bias;
        self
    }

    pub fn with_hard_iron_offset(mut self, offset: na::Vector3<f32>) -> Self {
        self.hard_iron_offset = offset;
        self
    }

    pub fn sample_count(&self) -> usize {
        (self.duration_s * self.sample_rate).round().max(0.0) as usize
    }

    pub fn timestamp(&self, index: usize) -> f32 {
        index as f32 / self.sample_rate
    }

    /// True body-to-earth orientation at time `t`
    pub fn orientation(&self, t: f32) -> na::UnitQuaternion<f32> {
        match self.motion {
            Motion::Rotation { axis, rate_dps } => {
                self.initial_orientation * na::UnitQuaternion::from_axis_angle(&axis, rate_dps.to_radians() * t)
            }
            Motion::Stationary | Motion::Push { .. } => self.initial_orientation,
        }
    }

    /// True earth-frame acceleration at time `t`, gravity excluded, g
    pub fn acceleration(&self, t: f32) -> na::Vector3<f32> {
        match self.motion {
            Motion::Push {
                acceleration_g,
                start_s,
                duration_s,
            } => {
                let elapsed = t - start_s;
                if elapsed < 0.0 || elapsed >= duration_s {
                    na::Vector3::zeros()
                } else if elapsed < 0.5 * duration_s {
                    acceleration_g
                } else {
                    -acceleration_g
                }
            }
            Motion::Stationary | Motion::Rotation { .. } => na::Vector3::zeros(),
        }
    }

    /// True angular rate in the body frame, deg/s
    pub fn angular_rate(&self) -> na::Vector3<f32> {
        match self.motion {
            Motion::Rotation { axis, rate_dps } => axis.into_inner() * rate_dps,
            Motion::Stationary | Motion::Push { .. } => na::Vector3::zeros(),
        }
    }

    /// Sensor readings at sample `index`
    pub fn sample(&self, index: usize) -> Sample {
        let t = self.timestamp(index);
        let orientation = self.orientation(t);
        let specific_force = na::Vector3::z() + self.acceleration(t);
        Sample::new(
            t,
            self.angular_rate() + self.gyro_bias,
            orientation.inverse_transform_vector(&specific_force),
            orientation.inverse_transform_vector(&self.earth_field) + self.hard_iron_offset,
        )
    }

    pub fn generate(&self) -> Vec<Sample> {
        (0..self.sample_count()).map(|i| self.sample(i)).collect()
    }
}

/// Unwrap a series of angles in degrees so consecutive values never jump by
/// more than 180°
pub fn unwrap_degrees(angles: &[f32]) -> Vec<f32> {
    let mut unwrapped = Vec::with_capacity(angles.len());
    let mut offset = 0.0;
    let mut previous: Option<f32> = None;
    for &angle in angles {
        if let Some(p) = previous {
            let step = angle - p;
            if step > 180.0 {
                offset -= 360.0;
            } else if step < -180.0 {
                offset += 360.0;
            }
        }
        previous = Some(angle);
        unwrapped.push(angle + offset);
    }
    unwrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_stationary_level_readings() {
        let samples = Scenario::stationary(50.0, 1.0).generate();
        assert_eq!(samples.len(), 50);
        for sample in &samples {
            assert_eq!(sample.gyro, na::Vector3::zeros());
            assert_abs_diff_eq!(sample.accel, na::Vector3::z(), epsilon = 1e-6);
            assert_abs_diff_eq!(sample.mag, na::Vector3::from(DEFAULT_EARTH_FIELD), epsilon = 1e-5);
        }
        assert!((samples[49].timestamp - 0.98).abs() < 1e-6);
    }

    #[test]
    fn test_rotation_heading_follows_truth() {
        let scenario = Scenario::rotation(na::Vector3::z(), 90.0, 50.0, 2.0);
        let sample = scenario.sample(25);
        // 0.5 s at 90 deg/s
        let heading = utils::compass_heading(&sample.accel, &sample.mag).unwrap();
        assert!((utils::angle_diff_degrees(heading, 45.0)).abs() < 1e-3, "heading {}", heading);
        assert_abs_diff_eq!(sample.gyro, na::Vector3::new(0.0, 0.0, 90.0), epsilon = 1e-6);
    }

    #[test]
    fn test_push_profile() {
        let scenario = Scenario::push(na::Vector3::new(0.5, 0.0, 0.0), 1.0, 1.0, 50.0, 3.0);
        assert_eq!(scenario.acceleration(0.99), na::Vector3::zeros());
        assert_eq!(scenario.acceleration(1.2).x, 0.5);
        assert_eq!(scenario.acceleration(1.7).x, -0.5);
        assert_eq!(scenario.acceleration(2.0), na::Vector3::zeros());
        assert_abs_diff_eq!(scenario.sample(60).accel, na::Vector3::new(0.5, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_sensor_offsets_are_applied() {
        let bias = na::Vector3::new(0.5, -0.3, 0.2);
        let offset = na::Vector3::new(10.0, -5.0, 3.0);
        let sample = Scenario::stationary(50.0, 1.0)
            .with_gyro_bias(bias)
            .with_hard_iron_offset(offset)
            .sample(3);
        assert_eq!(sample.gyro, bias);
        assert_abs_diff_eq!(sample.mag - offset, na::Vector3::from(DEFAULT_EARTH_FIELD), epsilon = 1e-5);
    }

    #[test]
    fn test_unwrap_degrees() {
        let unwrapped = unwrap_degrees(&[170.0, 179.0, -172.0, -100.0, 10.0]);
        assert_eq!(unwrapped, vec![170.0, 179.0, 188.0, 260.0, 370.0]);
        assert!(unwrap_degrees(&[]).is_empty());
    }
}
