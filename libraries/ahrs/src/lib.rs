//! # AHRS - Attitude and Heading Reference System
//!
//! Estimates the orientation of a moving body, and a best-effort velocity and
//! position, from a series of gyroscope, accelerometer and magnetometer
//! samples.
//!
//! ## Pipeline
//!
//! - Magnetometer hard-/soft-iron calibration ([`calibration`])
//! - Gyroscope bias tracking ([`gyro_bias`])
//! - Attitude fusion with disturbance rejection and recovery ([`fusion`])
//! - Motion detection with dilation ([`motion`])
//! - Motion-gated inertial integration ([`integrator`])
//!
//! [`pipeline::Pipeline`] chains them over a recorded series.
//!
//! ## Conventions
//!
//! The orientation quaternion rotates body-frame vectors into the
//! North-West-Up earth frame. A level body at rest reads an acceleration of
//! (0, 0, +1) g. Euler angles are Z-Y-X (yaw, pitch, roll) in degrees.
//!
//! ## Platform Support
//!
//! - **desktop** (default): links `std` into nalgebra, for SITL and tests

use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod error;
pub mod fusion;
pub mod gyro_bias;
pub mod integrator;
pub mod motion;
pub mod pipeline;
pub mod rejection;
pub mod sensors;
pub mod simulation;
pub mod utils;

pub use calibration::MagCalibration;
pub use error::{AhrsError, AhrsResult, PipelineFailure};
pub use fusion::{DiagnosticFlags, FusionEngine, FusionSettings, FusionState, FusionVariant, InternalStates};
pub use gyro_bias::{GyroBiasSettings, GyroBiasTracker};
pub use integrator::{InertialIntegrator, IntegrationFrame, IntegratorSettings, KinematicState};
pub use motion::{MotionDetector, MotionSettings, StreamingMotionDetector};
pub use pipeline::{EstimateRecord, Pipeline, PipelineOutput, RunSummary, SampleErrorPolicy};
pub use sensors::Sample;

/// Configuration for the AHRS pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AhrsConfig {
    /// Nominal sample rate in Hz, used to turn durations into sample counts
    pub sample_rate: f32,

    /// Magnetometer correction
    pub calibration: MagCalibration,

    /// Gyroscope bias tracking
    pub gyro_bias: GyroBiasSettings,

    /// Fusion variant and its parameters
    pub fusion: FusionSettings,

    /// Motion classification
    pub motion: MotionSettings,

    /// Velocity/position integration
    pub integrator: IntegratorSettings,

    /// Handling of samples with non-finite readings
    pub on_invalid_sample: SampleErrorPolicy,
}

impl Default for AhrsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 50.0,
            calibration: MagCalibration::identity(),
            gyro_bias: GyroBiasSettings::default(),
            fusion: FusionSettings::default(),
            motion: MotionSettings::default(),
            integrator: IntegratorSettings::default(),
            on_invalid_sample: SampleErrorPolicy::Abort,
        }
    }
}

impl AhrsConfig {
    /// Check every section of the configuration
    pub fn validate(&self) -> AhrsResult<()> {
        self.validate_rate()?;
        self.calibration.validate()?;
        self.gyro_bias.validate()?;
        self.fusion.validate()?;
        self.motion.validate()
    }

    pub(crate) fn validate_rate(&self) -> AhrsResult<()> {
        if self.sample_rate.is_finite() && self.sample_rate > 0.0 {
            Ok(())
        } else {
            Err(error::helpers::config_error(
                format!("sample rate must be positive, got {}", self.sample_rate),
                Some("sample_rate"),
            ))
        }
    }
}
