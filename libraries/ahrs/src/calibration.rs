//! Magnetometer hard-/soft-iron correction.
//!
//! Only the application of a previously fitted correction lives here; the
//! parameters themselves come from configuration.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult, SensorType};

/// Hard-iron, soft-iron and handedness correction for a magnetometer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagCalibration {
    /// Additive bias subtracted from the raw reading, in microtesla
    pub hard_iron_offset: na::Vector3<f32>,

    /// Soft-iron matrix, applied to the offset-corrected reading as a row
    /// vector: `corrected = (raw - offset) · soft_iron_matrix`
    pub soft_iron_matrix: na::Matrix3<f32>,

    /// Per-axis sign flip (each entry +1 or -1) matching the fusion frame
    pub axis_sign_mask: na::Vector3<f32>,
}

impl Default for MagCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

impl MagCalibration {
    pub fn new(
        hard_iron_offset: na::Vector3<f32>,
        soft_iron_matrix: na::Matrix3<f32>,
        axis_sign_mask: na::Vector3<f32>,
    ) -> Self {
        Self {
            hard_iron_offset,
            soft_iron_matrix,
            axis_sign_mask,
        }
    }

    /// Correction that leaves readings untouched
    pub fn identity() -> Self {
        Self::new(
            na::Vector3::zeros(),
            na::Matrix3::identity(),
            na::Vector3::new(1.0, 1.0, 1.0),
        )
    }

    /// Check that every parameter is finite and the sign mask only holds ±1
    pub fn validate(&self) -> AhrsResult<()> {
        if self.hard_iron_offset.iter().any(|v| !v.is_finite()) {
            return Err(helpers::config_error(
                "hard iron offset contains NaN or infinite values",
                Some("calibration.hard_iron_offset"),
            ));
        }
        if self.soft_iron_matrix.iter().any(|v| !v.is_finite()) {
            return Err(helpers::config_error(
                "soft iron matrix contains NaN or infinite values",
                Some("calibration.soft_iron_matrix"),
            ));
        }
        if self.axis_sign_mask.iter().any(|s| *s != 1.0 && *s != -1.0) {
            return Err(helpers::config_error(
                format!("axis sign mask {:?} must only hold +1 or -1", self.axis_sign_mask.as_slice()),
                Some("calibration.axis_sign_mask"),
            ));
        }
        Ok(())
    }

    /// Apply the correction to a raw magnetometer reading
    pub fn calibrate(&self, raw: &na::Vector3<f32>) -> AhrsResult<na::Vector3<f32>> {
        helpers::check_vector_finite(raw, SensorType::Magnetometer)?;
        let corrected = self.soft_iron_matrix.tr_mul(&(raw - self.hard_iron_offset));
        Ok(corrected.component_mul(&self.axis_sign_mask))
    }
}
