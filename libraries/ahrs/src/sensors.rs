use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult, SensorType};

/// One inertial/magnetic sample as delivered by the ingestion side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in seconds, strictly increasing along a series
    pub timestamp: f32,

    /// Gyroscope measurements in body frame (x, y, z) in degrees per second
    pub gyro: na::Vector3<f32>,

    /// Accelerometer measurements in body frame (x, y, z) in g
    pub accel: na::Vector3<f32>,

    /// Magnetometer measurements in body frame (x, y, z) in microtesla.
    /// A zero vector means no magnetic reading is available.
    pub mag: na::Vector3<f32>,
}

impl Sample {
    pub fn new(
        timestamp: f32,
        gyro: na::Vector3<f32>,
        accel: na::Vector3<f32>,
        mag: na::Vector3<f32>,
    ) -> Self {
        Self {
            timestamp,
            gyro,
            accel,
            mag,
        }
    }

    /// Reject samples with any non-finite scalar
    pub fn validate(&self) -> AhrsResult<()> {
        helpers::check_scalar_finite(self.timestamp, SensorType::Clock)?;
        helpers::check_vector_finite(&self.gyro, SensorType::Gyroscope)?;
        helpers::check_vector_finite(&self.accel, SensorType::Accelerometer)?;
        helpers::check_vector_finite(&self.mag, SensorType::Magnetometer)
    }
}

/// Step from the previous timestamp, zero when there is none
pub fn time_step(previous: Option<f32>, timestamp: f32) -> f32 {
    previous.map_or(0.0, |p| timestamp - p)
}

/// Per-sample time steps of a series. The first sample has a step of zero.
pub fn time_deltas(samples: &[Sample]) -> Vec<f32> {
    samples
        .iter()
        .scan(None, |previous: &mut Option<f32>, sample| {
            let dt = time_step(*previous, sample.timestamp);
            *previous = Some(sample.timestamp);
            Some(dt)
        })
        .collect()
}
