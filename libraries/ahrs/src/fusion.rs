//! Attitude fusion engine.
//!
//! Orientation is a unit quaternion rotating body-frame vectors into the
//! North-West-Up earth frame. Each update predicts the orientation from the
//! gyroscope, measures how far the predicted gravity and magnetic west
//! directions are from the accelerometer and magnetometer readings, and
//! pulls the prediction towards them.
//!
//! The engine itself is immutable after construction; all evolving filter
//! state lives in [`FusionState`], which `update` takes by reference and
//! returns anew.

use log::{debug, info, warn};
use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult, FilterType, SensorType};
use crate::rejection::{RejectionChannel, RejectionLimits, Verdict};
use crate::utils::{self, try_normalize};

/// Gain of the rejection filter at the first initialization sample
const INITIAL_GAIN: f32 = 10.0;
/// Fraction of the configured gyroscope range treated as saturation
const GYROSCOPE_RANGE_FACTOR: f32 = 0.98;
/// Quaternion norm under which the filter is considered collapsed
const MIN_QUATERNION_NORM: f32 = 1e-6;

/// Which correction scheme the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionVariant {
    /// Fixed-gain blend between gyro prediction and the accel/mag reference
    /// orientation. `gain` is the weight of the reference, in [0, 1].
    Complementary { gain: f32 },

    /// Gyro-rate feedback filter with per-channel rejection and recovery
    Rejection {
        gain: f32,
        /// Gyroscope full scale in deg/s, 0 disables the saturation check
        gyroscope_range_dps: f32,
        /// 0 disables acceleration rejection
        acceleration_rejection_deg: f32,
        /// 0 disables magnetic rejection
        magnetic_rejection_deg: f32,
        /// 0 disables rejection on both channels
        recovery_timeout_s: f32,
    },
}

impl Default for FusionVariant {
    fn default() -> Self {
        Self::rejection()
    }
}

impl FusionVariant {
    /// Complementary blend with its usual reference weight
    pub fn complementary() -> Self {
        FusionVariant::Complementary { gain: 0.98 }
    }

    /// Rejection filter with its usual thresholds
    pub fn rejection() -> Self {
        FusionVariant::Rejection {
            gain: 0.5,
            gyroscope_range_dps: 2000.0,
            acceleration_rejection_deg: 10.0,
            magnetic_rejection_deg: 10.0,
            recovery_timeout_s: 5.0,
        }
    }
}

/// Settings of the fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub variant: FusionVariant,

    /// Length of the initialization window in seconds
    pub initialisation_period_s: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            variant: FusionVariant::default(),
            initialisation_period_s: 3.0,
        }
    }
}

impl FusionSettings {
    pub fn validate(&self) -> AhrsResult<()> {
        helpers::check_non_negative(self.initialisation_period_s, "fusion.initialisation_period_s")?;
        match self.variant {
            FusionVariant::Complementary { gain } => {
                if !(0.0..=1.0).contains(&gain) {
                    return Err(helpers::config_error(
                        format!("complementary gain must lie in [0, 1], got {}", gain),
                        Some("fusion.variant.gain"),
                    ));
                }
            }
            FusionVariant::Rejection {
                gain,
                gyroscope_range_dps,
                acceleration_rejection_deg,
                magnetic_rejection_deg,
                recovery_timeout_s,
            } => {
                helpers::check_non_negative(gain, "fusion.variant.gain")?;
                helpers::check_non_negative(gyroscope_range_dps, "fusion.variant.gyroscope_range_dps")?;
                helpers::check_non_negative(
                    acceleration_rejection_deg,
                    "fusion.variant.acceleration_rejection_deg",
                )?;
                helpers::check_non_negative(magnetic_rejection_deg, "fusion.variant.magnetic_rejection_deg")?;
                helpers::check_non_negative(recovery_timeout_s, "fusion.variant.recovery_timeout_s")?;
            }
        }
        Ok(())
    }
}

/// Read-only view of the engine flags at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticFlags {
    pub initialising: bool,
    pub angular_rate_recovery: bool,
    pub acceleration_recovery: bool,
    pub magnetic_recovery: bool,
}

/// Internal error signals of the engine at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalStates {
    /// Angle between measured and predicted gravity, degrees
    pub acceleration_error_deg: f32,
    pub accelerometer_ignored: bool,
    /// Consecutive rejected accelerometer corrections
    pub acceleration_recovery_trigger: u32,
    /// Angle between measured and predicted magnetic west, degrees
    pub magnetic_error_deg: f32,
    pub magnetometer_ignored: bool,
    /// Consecutive rejected magnetometer corrections
    pub magnetic_recovery_trigger: u32,
}

/// Evolving state of the fusion engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionState {
    orientation: na::UnitQuaternion<f32>,

    /// Accelerometer reading of the last update, in g
    accelerometer: na::Vector3<f32>,

    acceleration: RejectionChannel,
    magnetic: RejectionChannel,

    /// Initialization samples still to run
    initialisation_remaining: u32,
    initialising: bool,
    angular_rate_recovery: bool,

    /// Number of updates applied since construction
    updates: u64,
}

impl FusionState {
    /// Orientation rotating body-frame vectors into the earth frame
    pub fn orientation(&self) -> na::UnitQuaternion<f32> {
        self.orientation
    }

    /// Roll, pitch and yaw in degrees
    pub fn euler_angles(&self) -> na::Vector3<f32> {
        utils::quaternion_to_euler(&self.orientation)
    }

    /// Gravity direction in the body frame, in g
    pub fn gravity(&self) -> na::Vector3<f32> {
        gravity_in_body(&self.orientation)
    }

    /// Accelerometer reading with gravity removed, body frame, in g
    pub fn linear_acceleration(&self) -> na::Vector3<f32> {
        self.accelerometer - self.gravity()
    }

    /// Accelerometer reading rotated into the earth frame with gravity removed, in g
    pub fn earth_acceleration(&self) -> na::Vector3<f32> {
        self.orientation * self.accelerometer - na::Vector3::z()
    }

    pub fn flags(&self) -> DiagnosticFlags {
        DiagnosticFlags {
            initialising: self.initialising,
            angular_rate_recovery: self.angular_rate_recovery,
            acceleration_recovery: self.acceleration.is_recovering(),
            magnetic_recovery: self.magnetic.is_recovering(),
        }
    }

    pub fn internal_states(&self) -> InternalStates {
        InternalStates {
            acceleration_error_deg: self.acceleration.error_deg(),
            accelerometer_ignored: self.acceleration.ignored(),
            acceleration_recovery_trigger: self.acceleration.trigger(),
            magnetic_error_deg: self.magnetic.error_deg(),
            magnetometer_ignored: self.magnetic.ignored(),
            magnetic_recovery_trigger: self.magnetic.trigger(),
        }
    }

    pub fn acceleration_channel(&self) -> &RejectionChannel {
        &self.acceleration
    }

    pub fn magnetic_channel(&self) -> &RejectionChannel {
        &self.magnetic
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Enter the next sample. Returns the number of initialization samples
    /// left including this one, or `None` once initialization is over.
    fn begin_sample(&mut self) -> Option<u32> {
        if self.initialisation_remaining == 0 {
            if self.initialising {
                info!("fusion initialisation complete after {} updates", self.updates);
                self.initialising = false;
                self.angular_rate_recovery = false;
            }
            return None;
        }
        let remaining = self.initialisation_remaining;
        self.initialisation_remaining -= 1;
        self.initialising = true;
        Some(remaining)
    }
}

/// The attitude fusion engine
#[derive(Debug, Clone)]
pub struct FusionEngine {
    variant: FusionVariant,
    gain: f32,
    /// Saturation threshold in deg/s
    gyroscope_range: f32,
    acceleration_limits: RejectionLimits,
    magnetic_limits: RejectionLimits,
    initialisation_samples: u32,
}

impl FusionEngine {
    /// Create an engine for a series sampled at `sample_rate` Hz
    pub fn new(settings: &FusionSettings, sample_rate: f32) -> AhrsResult<Self> {
        settings.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(helpers::config_error(
                format!("sample rate must be positive, got {}", sample_rate),
                Some("sample_rate"),
            ));
        }

        let initialisation_samples = seconds_to_samples(settings.initialisation_period_s, sample_rate);
        let engine = match settings.variant {
            FusionVariant::Complementary { gain } => Self {
                variant: settings.variant,
                gain,
                gyroscope_range: f32::MAX,
                acceleration_limits: RejectionLimits::disabled(),
                magnetic_limits: RejectionLimits::disabled(),
                initialisation_samples,
            },
            FusionVariant::Rejection {
                gain,
                gyroscope_range_dps,
                acceleration_rejection_deg,
                magnetic_rejection_deg,
                recovery_timeout_s,
            } => {
                let timeout_samples = seconds_to_samples(recovery_timeout_s, sample_rate);
                Self {
                    variant: settings.variant,
                    gain,
                    gyroscope_range: if gyroscope_range_dps == 0.0 {
                        f32::MAX
                    } else {
                        GYROSCOPE_RANGE_FACTOR * gyroscope_range_dps
                    },
                    acceleration_limits: RejectionLimits {
                        threshold_deg: acceleration_rejection_deg,
                        timeout_samples,
                    },
                    magnetic_limits: RejectionLimits {
                        threshold_deg: magnetic_rejection_deg,
                        timeout_samples,
                    },
                    initialisation_samples,
                }
            }
        };

        debug!(
            "fusion engine: {:?}, {} initialisation samples, recovery timeout {} samples",
            engine.variant, engine.initialisation_samples, engine.acceleration_limits.timeout_samples
        );
        Ok(engine)
    }

    /// State to start a run from, with the given initial orientation
    pub fn initial_state(&self, orientation: na::UnitQuaternion<f32>) -> FusionState {
        FusionState {
            orientation,
            accelerometer: na::Vector3::zeros(),
            acceleration: RejectionChannel::new(),
            magnetic: RejectionChannel::new(),
            initialisation_remaining: self.initialisation_samples,
            initialising: self.initialisation_samples > 0,
            angular_rate_recovery: false,
            updates: 0,
        }
    }

    pub fn variant(&self) -> FusionVariant {
        self.variant
    }

    pub fn initialisation_samples(&self) -> u32 {
        self.initialisation_samples
    }

    /// Advance the filter by one sample.
    ///
    /// * `gyro` - debiased angular rate, deg/s
    /// * `accel` - specific force, g (zero vector if unavailable)
    /// * `mag` - calibrated magnetic field, any unit (zero vector if unavailable)
    /// * `dt` - seconds since the previous sample, zero for the first one
    pub fn update(
        &self,
        state: &FusionState,
        gyro: &na::Vector3<f32>,
        accel: &na::Vector3<f32>,
        mag: &na::Vector3<f32>,
        dt: f32,
    ) -> AhrsResult<FusionState> {
        helpers::check_vector_finite(gyro, SensorType::Gyroscope)?;
        helpers::check_vector_finite(accel, SensorType::Accelerometer)?;
        helpers::check_vector_finite(mag, SensorType::Magnetometer)?;
        helpers::check_time_delta(dt, true)?;

        let mut next = state.clone();
        next.accelerometer = *accel;
        next.updates += 1;

        match self.variant {
            FusionVariant::Complementary { .. } => self.update_complementary(&mut next, gyro, accel, mag, dt)?,
            FusionVariant::Rejection { .. } => self.update_rejection(&mut next, gyro, accel, mag, dt)?,
        }
        Ok(next)
    }

    fn update_rejection(
        &self,
        next: &mut FusionState,
        gyro: &na::Vector3<f32>,
        accel: &na::Vector3<f32>,
        mag: &na::Vector3<f32>,
        dt: f32,
    ) -> AhrsResult<()> {
        if gyro.amax() > self.gyroscope_range {
            if !next.angular_rate_recovery {
                warn!(
                    "angular rate {:?} deg/s beyond gyroscope range, restarting initialisation",
                    gyro.as_slice()
                );
            }
            next.initialisation_remaining = self.initialisation_samples;
            next.angular_rate_recovery = true;
            next.acceleration.reset();
            next.magnetic.reset();
        }

        let initialising = next.begin_sample();
        let gain = match initialising {
            Some(remaining) => self.ramped_gain(remaining),
            None => self.gain,
        };

        let rate = gyro.map(utils::deg_to_rad);
        let predicted = renormalize(integrate(&next.orientation, &(rate * dt)), FilterType::Rejection, dt)?;
        let gravity = gravity_in_body(&predicted);
        let west = west_in_body(&predicted);

        let bypass = initialising.is_some();
        let mut correction = na::Vector3::zeros();

        let acceleration_was_recovering = next.acceleration.is_recovering();
        match try_normalize(accel) {
            Some(measured) => {
                let (feedback, error_deg) = feedback(&measured, &gravity);
                if next.acceleration.assess(error_deg, &self.acceleration_limits, bypass) == Verdict::Accepted {
                    correction += feedback;
                }
            }
            None => {
                next.acceleration.skip();
            }
        }
        log_recovery("acceleration", acceleration_was_recovering, &next.acceleration);

        let magnetic_was_recovering = next.magnetic.is_recovering();
        match try_normalize(&gravity.cross(mag)) {
            Some(measured_west) => {
                let (feedback, error_deg) = feedback(&measured_west, &west);
                if next.magnetic.assess(error_deg, &self.magnetic_limits, bypass) == Verdict::Accepted {
                    correction += feedback;
                }
            }
            None => {
                next.magnetic.skip();
            }
        }
        log_recovery("magnetic", magnetic_was_recovering, &next.magnetic);

        let corrected = integrate(&predicted, &(correction * gain * dt));
        next.orientation = renormalize(corrected, FilterType::Rejection, dt)?;
        Ok(())
    }

    fn update_complementary(
        &self,
        next: &mut FusionState,
        gyro: &na::Vector3<f32>,
        accel: &na::Vector3<f32>,
        mag: &na::Vector3<f32>,
        dt: f32,
    ) -> AhrsResult<()> {
        let initialising = next.begin_sample().is_some();

        let rate = gyro.map(utils::deg_to_rad);
        let predicted = renormalize(integrate(&next.orientation, &(rate * dt)), FilterType::Complementary, dt)?;
        let gravity = gravity_in_body(&predicted);
        let west = west_in_body(&predicted);

        // diagnostics only, this variant never rejects
        let disabled = RejectionLimits::disabled();
        let up = try_normalize(accel);
        match up {
            Some(measured) => {
                next.acceleration.assess(feedback(&measured, &gravity).1, &disabled, true);
            }
            None => {
                next.acceleration.skip();
            }
        }
        match try_normalize(&gravity.cross(mag)) {
            Some(measured_west) => {
                next.magnetic.assess(feedback(&measured_west, &west).1, &disabled, true);
            }
            None => {
                next.magnetic.skip();
            }
        }

        let weight = if initialising { 1.0 } else { self.gain };
        next.orientation = match up.map(|up| reference_orientation(&predicted, &up, mag)) {
            Some(reference) => blend(&predicted, &reference, weight)?,
            None => predicted,
        };
        Ok(())
    }

    /// Gain while initializing, falling linearly from `INITIAL_GAIN` to the
    /// configured gain over the initialization window
    fn ramped_gain(&self, remaining: u32) -> f32 {
        let total = self.initialisation_samples.max(1) as f32;
        self.gain + (INITIAL_GAIN - self.gain) * remaining as f32 / total
    }
}

/// Round a duration to a whole number of samples
pub(crate) fn seconds_to_samples(seconds: f32, sample_rate: f32) -> u32 {
    (seconds * sample_rate).round().max(0.0) as u32
}

/// Direction of gravity (earth up) seen from the body, unit length
fn gravity_in_body(q: &na::UnitQuaternion<f32>) -> na::Vector3<f32> {
    q.inverse_transform_vector(&na::Vector3::z())
}

/// Direction of earth west seen from the body, unit length
fn west_in_body(q: &na::UnitQuaternion<f32>) -> na::Vector3<f32> {
    q.inverse_transform_vector(&na::Vector3::y())
}

/// One first-order step of the quaternion kinematics `q' = ½ q ⊗ ω`, where
/// `rotation` is the body-frame rotation vector (rate × dt, radians).
fn integrate(q: &na::UnitQuaternion<f32>, rotation: &na::Vector3<f32>) -> na::Quaternion<f32> {
    let half = rotation * 0.5;
    let q = q.quaternion();
    q + q * na::Quaternion::from_imag(half)
}

/// Rotation-vector feedback pulling `reference` towards `sensor`, and the
/// angle between them in degrees.
///
/// Past 90° the cross product shrinks again, so it is normalized to keep
/// the correction at full strength.
fn feedback(sensor: &na::Vector3<f32>, reference: &na::Vector3<f32>) -> (na::Vector3<f32>, f32) {
    let cross = sensor.cross(reference);
    let dot = sensor.dot(reference);
    let error_deg = utils::rad_to_deg(cross.norm().atan2(dot));
    if dot >= 0.0 {
        return (cross, error_deg);
    }
    let direction = try_normalize(&cross).unwrap_or_else(|| perpendicular(reference));
    (direction, error_deg)
}

/// Any unit vector perpendicular to `v`
fn perpendicular(v: &na::Vector3<f32>) -> na::Vector3<f32> {
    let axis = if v.x.abs() < 0.9 { na::Vector3::x() } else { na::Vector3::y() };
    try_normalize(&v.cross(&axis)).unwrap_or_else(na::Vector3::z)
}

/// Orientation implied by the accelerometer (and magnetometer when present).
///
/// `up` must be unit length. Without a usable magnetic reading the heading
/// of `predicted` is kept and only its tilt is corrected.
fn reference_orientation(
    predicted: &na::UnitQuaternion<f32>,
    up: &na::Vector3<f32>,
    mag: &na::Vector3<f32>,
) -> na::UnitQuaternion<f32> {
    match try_normalize(&up.cross(mag)) {
        Some(west) => {
            let north = west.cross(up);
            // columns are the earth axes in body coordinates: earth -> body
            let earth_to_body =
                na::Rotation3::from_matrix_unchecked(na::Matrix3::from_columns(&[north, west, *up]));
            na::UnitQuaternion::from_rotation_matrix(&earth_to_body).inverse()
        }
        None => {
            let predicted_up = gravity_in_body(predicted);
            let tilt = na::UnitQuaternion::rotation_between(&predicted_up, up).unwrap_or_else(|| {
                na::UnitQuaternion::from_axis_angle(
                    &na::Unit::new_normalize(perpendicular(up)),
                    core::f32::consts::PI,
                )
            });
            predicted * tilt.inverse()
        }
    }
}

/// Normalized linear interpolation from `from` towards `to`
fn blend(
    from: &na::UnitQuaternion<f32>,
    to: &na::UnitQuaternion<f32>,
    weight: f32,
) -> AhrsResult<na::UnitQuaternion<f32>> {
    let mut target = to.into_inner();
    if from.coords.dot(&target.coords) < 0.0 {
        target = -target;
    }
    let blended = from.into_inner() * (1.0 - weight) + target * weight;
    renormalize(blended, FilterType::Complementary, weight)
}

fn renormalize(
    q: na::Quaternion<f32>,
    filter_type: FilterType,
    context: f32,
) -> AhrsResult<na::UnitQuaternion<f32>> {
    let norm = q.norm();
    if !norm.is_finite() || norm < MIN_QUATERNION_NORM {
        return Err(helpers::divergence(
            format!("quaternion norm {} (step parameter {})", norm, context),
            filter_type,
            Some(norm),
        ));
    }
    Ok(na::UnitQuaternion::new_unchecked(q / norm))
}

fn log_recovery(channel: &str, was_recovering: bool, state: &RejectionChannel) {
    if !was_recovering && state.is_recovering() {
        info!(
            "{} recovery triggered, forcing correction (recovery #{})",
            channel,
            state.recoveries()
        );
    } else if was_recovering && !state.is_recovering() {
        info!("{} recovery complete, error {:.2} deg", channel, state.error_deg());
    }
}
