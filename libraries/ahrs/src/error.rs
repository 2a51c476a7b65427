use thiserror::Error;
use std::fmt;

use crate::fusion::FusionState;
use crate::pipeline::EstimateRecord;

/// Primary error type for the AHRS crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AhrsError {
    /// A sample carried a non-finite or missing scalar
    #[error("Invalid sample: {message}")]
    InvalidSample {
        /// Detailed error message
        message: String,
        /// The sensor whose reading was rejected
        sensor_type: SensorType,
    },

    /// Non-monotonic, non-positive or non-finite time step
    #[error("Invalid timestamp: {message}")]
    InvalidTimestamp {
        /// Detailed error message
        message: String,
        /// Time value that caused the error if available
        time_value: Option<f32>,
    },

    /// Orientation quaternion norm became non-finite or collapsed towards zero
    #[error("Numeric divergence detected in {filter_type}: {message}")]
    NumericDivergence {
        /// Detailed error message
        message: String,
        /// Filter that diverged
        filter_type: FilterType,
        /// Offending norm if available
        magnitude: Option<f32>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Detailed error message
        message: String,
        /// Configuration parameter that caused the error
        parameter: Option<String>,
    },
}

impl AhrsError {
    /// Whether processing of a series must stop when this error is raised.
    ///
    /// Only invalid samples may be skipped, and only when the run was
    /// configured to do so.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AhrsError::InvalidSample { .. })
    }
}

/// Types of sensors that could generate errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    /// Sample timestamp
    Clock,
    /// Gyroscope
    Gyroscope,
    /// Accelerometer
    Accelerometer,
    /// Magnetometer
    Magnetometer,
    /// Derived acceleration fed to the integrator
    Derived,
}

/// Types of filters that could diverge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Fixed-gain complementary blend
    Complementary,
    /// Rejection/recovery filter
    Rejection,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Clock => write!(f, "Clock"),
            SensorType::Gyroscope => write!(f, "Gyroscope"),
            SensorType::Accelerometer => write!(f, "Accelerometer"),
            SensorType::Magnetometer => write!(f, "Magnetometer"),
            SensorType::Derived => write!(f, "Derived acceleration"),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Complementary => write!(f, "complementary filter"),
            FilterType::Rejection => write!(f, "rejection filter"),
        }
    }
}

/// First fatal error of a run, with the context needed to report it.
#[derive(Error, Debug, Clone)]
#[error("sample {index}: {error}")]
pub struct PipelineFailure {
    /// Index into the input series of the sample that failed
    pub index: usize,
    /// What went wrong
    #[source]
    pub error: AhrsError,
    /// Filter state after the last successfully processed sample
    pub last_state: Option<FusionState>,
    /// Output of the last successfully processed sample
    pub last_record: Option<EstimateRecord>,
}

/// Helper functions for creating common errors
pub mod helpers {
    use super::*;

    /// Create an invalid sample error
    pub fn invalid_sample(message: impl Into<String>, sensor_type: SensorType) -> AhrsError {
        AhrsError::InvalidSample {
            message: message.into(),
            sensor_type,
        }
    }

    /// Create a timing error
    pub fn timing_error(message: impl Into<String>, time_value: Option<f32>) -> AhrsError {
        AhrsError::InvalidTimestamp {
            message: message.into(),
            time_value,
        }
    }

    /// Create a numeric divergence error
    pub fn divergence(
        message: impl Into<String>,
        filter_type: FilterType,
        magnitude: Option<f32>,
    ) -> AhrsError {
        AhrsError::NumericDivergence {
            message: message.into(),
            filter_type,
            magnitude,
        }
    }

    /// Create a configuration error
    pub fn config_error(
        message: impl Into<String>,
        parameter: Option<impl Into<String>>,
    ) -> AhrsError {
        AhrsError::Configuration {
            message: message.into(),
            parameter: parameter.map(|p| p.into()),
        }
    }

    /// Check if a vector contains invalid values (NaN or infinite)
    pub fn check_vector_finite(
        vec: &nalgebra::Vector3<f32>,
        sensor_type: SensorType,
    ) -> Result<(), AhrsError> {
        if vec.iter().any(|v| !v.is_finite()) {
            Err(invalid_sample(
                format!("{} reading {:?} contains NaN or infinite values", sensor_type, vec.as_slice()),
                sensor_type,
            ))
        } else {
            Ok(())
        }
    }

    /// Check that a scalar is finite
    pub fn check_scalar_finite(value: f32, sensor_type: SensorType) -> Result<(), AhrsError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(invalid_sample(
                format!("{} value {} is not finite", sensor_type, value),
                sensor_type,
            ))
        }
    }

    /// Check if a time delta is valid. A zero step is only accepted for the
    /// first sample of a series.
    pub fn check_time_delta(dt: f32, allow_zero: bool) -> Result<(), AhrsError> {
        if !dt.is_finite() || dt < 0.0 || (dt == 0.0 && !allow_zero) {
            Err(timing_error(format!("Invalid time delta: {}", dt), Some(dt)))
        } else {
            Ok(())
        }
    }

    /// Check that a configuration value is finite and not negative
    pub fn check_non_negative(value: f32, parameter: &str) -> Result<(), AhrsError> {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(config_error(
                format!("{} must be finite and non-negative, got {}", parameter, value),
                Some(parameter),
            ))
        }
    }
}

/// Type alias for Result with AhrsError
pub type AhrsResult<T> = Result<T, AhrsError>;
