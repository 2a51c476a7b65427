//! Batch driver running the full estimation chain over a recorded series.
//!
//! Per sample: calibrate the magnetometer, remove the gyroscope bias and
//! advance the fusion engine. Once the whole series is fused, the motion
//! detector classifies it and the integrator dead-reckons velocity and
//! position from the linear acceleration.

use log::{debug, info, warn};
use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::calibration::MagCalibration;
use crate::error::{helpers, AhrsError, AhrsResult, PipelineFailure};
use crate::fusion::{DiagnosticFlags, FusionEngine, FusionState, InternalStates};
use crate::gyro_bias::GyroBiasTracker;
use crate::integrator::{InertialIntegrator, IntegrationFrame};
use crate::motion::{MotionDetector, STANDARD_GRAVITY};
use crate::sensors::{time_step, Sample};
use crate::AhrsConfig;

/// What to do with a sample holding NaN or infinite readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleErrorPolicy {
    /// Stop the run and report the sample
    #[default]
    Abort,
    /// Drop the sample and carry on with the next one
    Skip,
}

/// Everything the pipeline derives for one input sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRecord {
    /// Index of the sample in the input series
    pub index: usize,
    pub timestamp: f32,
    /// Seconds since the previous processed sample, zero for the first
    pub dt: f32,

    pub orientation: na::UnitQuaternion<f32>,
    /// Roll, pitch and yaw in degrees
    pub euler_deg: na::Vector3<f32>,
    pub internal: InternalStates,
    pub flags: DiagnosticFlags,

    /// Gravity in the body frame, g
    pub gravity: na::Vector3<f32>,
    /// Body-frame acceleration without gravity, g
    pub linear_acceleration: na::Vector3<f32>,
    /// Earth-frame acceleration without gravity, g
    pub earth_acceleration: na::Vector3<f32>,

    pub moving: bool,
    /// m/s
    pub velocity: na::Vector3<f32>,
    /// m
    pub position: na::Vector3<f32>,
}

impl EstimateRecord {
    fn from_state(index: usize, timestamp: f32, dt: f32, state: &FusionState) -> Self {
        Self {
            index,
            timestamp,
            dt,
            orientation: state.orientation(),
            euler_deg: state.euler_angles(),
            internal: state.internal_states(),
            flags: state.flags(),
            gravity: state.gravity(),
            linear_acceleration: state.linear_acceleration(),
            earth_acceleration: state.earth_acceleration(),
            moving: false,
            velocity: na::Vector3::zeros(),
            position: na::Vector3::zeros(),
        }
    }
}

/// Counters over a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub moving: usize,
    pub angular_rate_recoveries: u32,
    pub acceleration_recoveries: u32,
    pub magnetic_recoveries: u32,
}

/// Aligned output series of a run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub records: Vec<EstimateRecord>,
    pub summary: RunSummary,
}

impl PipelineOutput {
    pub fn euler_angles(&self) -> Vec<na::Vector3<f32>> {
        self.records.iter().map(|r| r.euler_deg).collect()
    }

    pub fn motion(&self) -> Vec<bool> {
        self.records.iter().map(|r| r.moving).collect()
    }

    pub fn velocities(&self) -> Vec<na::Vector3<f32>> {
        self.records.iter().map(|r| r.velocity).collect()
    }

    pub fn positions(&self) -> Vec<na::Vector3<f32>> {
        self.records.iter().map(|r| r.position).collect()
    }
}

/// The estimation chain, configured once and reusable across series
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AhrsConfig,
    calibration: MagCalibration,
    /// `false` runs without bias compensation
    compensate_bias: bool,
    engine: FusionEngine,
    detector: MotionDetector,
}

impl Pipeline {
    /// Build the chain from a configuration.
    ///
    /// Invalid calibration or bias-tracker settings are not fatal: the
    /// pipeline falls back to the identity calibration and no bias
    /// compensation respectively.
    pub fn new(config: AhrsConfig) -> AhrsResult<Self> {
        config.validate_rate()?;
        config.motion.validate()?;

        let calibration = match config.calibration.validate() {
            Ok(()) => config.calibration,
            Err(e) => {
                warn!("{}; using identity magnetometer calibration", e);
                MagCalibration::identity()
            }
        };
        let compensate_bias = match config.gyro_bias.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("{}; gyroscope bias compensation disabled", e);
                false
            }
        };

        let engine = FusionEngine::new(&config.fusion, config.sample_rate)?;
        let detector = MotionDetector::new(&config.motion, config.sample_rate);
        debug!(
            "pipeline at {} Hz: motion margin {} samples, integrating in {:?} frame",
            config.sample_rate,
            detector.margin(),
            config.integrator.frame
        );

        Ok(Self {
            config,
            calibration,
            compensate_bias,
            engine,
            detector,
        })
    }

    pub fn config(&self) -> &AhrsConfig {
        &self.config
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Run over a series starting from the identity orientation
    pub fn run(&self, samples: &[Sample]) -> Result<PipelineOutput, PipelineFailure> {
        self.run_from(samples, na::UnitQuaternion::identity())
    }

    /// Run over a series starting from a given orientation estimate
    pub fn run_from(
        &self,
        samples: &[Sample],
        initial: na::UnitQuaternion<f32>,
    ) -> Result<PipelineOutput, PipelineFailure> {
        debug!("running pipeline over {} samples", samples.len());

        let mut bias = self
            .compensate_bias
            .then(|| GyroBiasTracker::new(&self.config.gyro_bias, self.config.sample_rate));
        let mut state = self.engine.initial_state(initial);
        let mut records: Vec<EstimateRecord> = Vec::with_capacity(samples.len());
        let mut summary = RunSummary::default();
        let mut previous_timestamp = None;

        for (index, sample) in samples.iter().enumerate() {
            if let Err(error) = sample.validate() {
                match self.config.on_invalid_sample {
                    SampleErrorPolicy::Skip if !error.is_fatal() => {
                        warn!("skipping sample {}: {}", index, error);
                        summary.skipped += 1;
                        continue;
                    }
                    _ => return Err(failure(index, error, &state, &records)),
                }
            }

            let dt = time_step(previous_timestamp, sample.timestamp);
            if previous_timestamp.is_some() {
                helpers::check_time_delta(dt, false).map_err(|e| failure(index, e, &state, &records))?;
            }

            let mag = self.calibration.calibrate(&sample.mag).unwrap_or_else(|e| {
                warn!("sample {}: {}; treating magnetometer as unavailable", index, e);
                na::Vector3::zeros()
            });
            let gyro = match bias.as_mut() {
                Some(tracker) => tracker.update(&sample.gyro),
                None => sample.gyro,
            };

            let before = state.flags();
            let next = self
                .engine
                .update(&state, &gyro, &sample.accel, &mag, dt)
                .map_err(|e| failure(index, e, &state, &records))?;
            count_recoveries(&mut summary, &before, &next.flags());
            state = next;

            previous_timestamp = Some(sample.timestamp);
            records.push(EstimateRecord::from_state(index, sample.timestamp, dt, &state));
        }
        summary.processed = records.len();

        let linear: Vec<na::Vector3<f32>> = records.iter().map(|r| r.linear_acceleration).collect();
        let moving = self.detector.detect(&linear);

        let mut integrator = InertialIntegrator::new();
        for i in 0..records.len() {
            let record = &records[i];
            let acceleration = match self.config.integrator.frame {
                IntegrationFrame::Body => record.linear_acceleration,
                IntegrationFrame::Earth => record.earth_acceleration,
            } * STANDARD_GRAVITY;
            let kinematics = integrator
                .step(record.dt, &acceleration, moving[i])
                .map_err(|e| integration_failure(record.index, e, &records[..i]))?;

            let record = &mut records[i];
            record.moving = moving[i];
            record.velocity = kinematics.velocity;
            record.position = kinematics.position;
        }
        summary.moving = moving.iter().filter(|m| **m).count();

        info!(
            "processed {} samples ({} skipped, {} moving), recoveries: angular rate {}, acceleration {}, magnetic {}",
            summary.processed,
            summary.skipped,
            summary.moving,
            summary.angular_rate_recoveries,
            summary.acceleration_recoveries,
            summary.magnetic_recoveries
        );
        Ok(PipelineOutput { records, summary })
    }
}

fn count_recoveries(summary: &mut RunSummary, before: &DiagnosticFlags, after: &DiagnosticFlags) {
    if after.angular_rate_recovery && !before.angular_rate_recovery {
        summary.angular_rate_recoveries += 1;
    }
    if after.acceleration_recovery && !before.acceleration_recovery {
        summary.acceleration_recoveries += 1;
    }
    if after.magnetic_recovery && !before.magnetic_recovery {
        summary.magnetic_recoveries += 1;
    }
}

fn failure(index: usize, error: AhrsError, state: &FusionState, records: &[EstimateRecord]) -> PipelineFailure {
    let last_record = records.last().cloned();
    PipelineFailure {
        index,
        error,
        last_state: last_record.as_ref().map(|_| state.clone()),
        last_record,
    }
}

/// Integration runs after the whole series is fused, so no fusion state
/// matches the last record any more
fn integration_failure(index: usize, error: AhrsError, records: &[EstimateRecord]) -> PipelineFailure {
    PipelineFailure {
        index,
        error,
        last_state: None,
        last_record: records.last().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorType;

    fn level_samples(n: usize, rate: f32) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::new(
                    i as f32 / rate,
                    na::Vector3::zeros(),
                    na::Vector3::z(),
                    na::Vector3::new(20.0, 0.0, -40.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_records_align_with_input() {
        let pipeline = Pipeline::new(AhrsConfig::default()).unwrap();
        let output = pipeline.run(&level_samples(20, 50.0)).unwrap();
        assert_eq!(output.records.len(), 20);
        assert_eq!(output.records[0].dt, 0.0);
        for (i, record) in output.records.iter().enumerate() {
            assert_eq!(record.index, i);
            if i > 0 {
                assert!((record.dt - 0.02).abs() < 1e-5);
            }
        }
        assert_eq!(output.summary.processed, 20);
        assert_eq!(output.summary.skipped, 0);
    }

    #[test]
    fn test_empty_series() {
        let pipeline = Pipeline::new(AhrsConfig::default()).unwrap();
        let output = pipeline.run(&[]).unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.summary, RunSummary::default());
    }

    #[test]
    fn test_failure_on_first_sample_has_no_last_state() {
        let pipeline = Pipeline::new(AhrsConfig::default()).unwrap();
        let mut samples = level_samples(3, 50.0);
        samples[0].accel.y = f32::INFINITY;
        let failure = pipeline.run(&samples).unwrap_err();
        assert_eq!(failure.index, 0);
        assert!(matches!(
            failure.error,
            AhrsError::InvalidSample { sensor_type: SensorType::Accelerometer, .. }
        ));
        assert!(failure.last_state.is_none());
        assert!(failure.last_record.is_none());
    }

    #[test]
    fn test_integration_failure_keeps_record_only() {
        let pipeline = Pipeline::new(AhrsConfig::default()).unwrap();
        let output = pipeline.run(&level_samples(4, 50.0)).unwrap();
        let error = helpers::timing_error("bad step", Some(-1.0));
        let failure = integration_failure(3, error.clone(), &output.records[..3]);
        assert_eq!(failure.index, 3);
        assert_eq!(failure.error, error);
        assert!(failure.last_state.is_none());
        assert_eq!(failure.last_record.unwrap().index, 2);
    }

    #[test]
    fn test_invalid_calibration_falls_back_to_identity() {
        let mut config = AhrsConfig::default();
        config.calibration.axis_sign_mask = na::Vector3::new(1.0, 0.5, 1.0);
        assert!(config.validate().is_err());

        let pipeline = Pipeline::new(config).unwrap();
        assert_eq!(pipeline.calibration, MagCalibration::identity());
        assert!(pipeline.run(&level_samples(5, 50.0)).is_ok());
    }

    #[test]
    fn test_invalid_bias_settings_disable_compensation() {
        let mut config = AhrsConfig::default();
        config.gyro_bias.cutoff_hz = -1.0;
        let pipeline = Pipeline::new(config).unwrap();
        assert!(!pipeline.compensate_bias);
    }

    #[test]
    fn test_rejects_bad_rate() {
        let config = AhrsConfig {
            sample_rate: 0.0,
            ..AhrsConfig::default()
        };
        assert!(matches!(Pipeline::new(config), Err(AhrsError::Configuration { .. })));
    }
}
