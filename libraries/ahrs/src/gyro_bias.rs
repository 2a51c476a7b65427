use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult};

/// Settings for the gyroscope bias tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyroBiasSettings {
    /// Per-axis angular rate (deg/s) under which the body counts as stationary
    pub threshold_dps: f32,

    /// Seconds of continuous stillness before the bias starts adapting
    pub timeout_s: f32,

    /// Cutoff frequency of the bias low-pass filter in Hz
    pub cutoff_hz: f32,
}

impl Default for GyroBiasSettings {
    fn default() -> Self {
        Self {
            threshold_dps: 3.0,
            timeout_s: 5.0,
            cutoff_hz: 0.02,
        }
    }
}

impl GyroBiasSettings {
    pub fn validate(&self) -> AhrsResult<()> {
        helpers::check_non_negative(self.threshold_dps, "gyro_bias.threshold_dps")?;
        helpers::check_non_negative(self.timeout_s, "gyro_bias.timeout_s")?;
        helpers::check_non_negative(self.cutoff_hz, "gyro_bias.cutoff_hz")
    }
}

/// Slowly adapting estimate of the static gyroscope bias.
///
/// The estimate only moves while every debiased axis stays under the
/// threshold for longer than the timeout; otherwise it is held.
#[derive(Debug, Clone, Copy)]
pub struct GyroBiasTracker {
    threshold: f32,
    filter_coefficient: f32,
    /// Samples of stillness required before adapting
    timeout: u32,
    /// Consecutive still samples seen so far
    timer: u32,
    bias: na::Vector3<f32>,
}

impl GyroBiasTracker {
    pub fn new(settings: &GyroBiasSettings, sample_rate: f32) -> Self {
        let filter_coefficient = if sample_rate > 0.0 {
            (2.0 * core::f32::consts::PI * settings.cutoff_hz / sample_rate).min(1.0)
        } else {
            0.0
        };
        Self {
            threshold: settings.threshold_dps,
            filter_coefficient,
            timeout: (settings.timeout_s * sample_rate).round().max(0.0) as u32,
            timer: 0,
            bias: na::Vector3::zeros(),
        }
    }

    /// Subtract the current bias from a raw reading and adapt the estimate.
    ///
    /// Non-finite readings pass through untouched and reset the stillness
    /// timer so they can never leak into the estimate.
    pub fn update(&mut self, raw: &na::Vector3<f32>) -> na::Vector3<f32> {
        let debiased = raw - self.bias;

        if debiased.iter().any(|v| !v.is_finite() || v.abs() > self.threshold) {
            self.timer = 0;
            return debiased;
        }

        if self.timer < self.timeout {
            self.timer += 1;
            return debiased;
        }

        self.bias += debiased * self.filter_coefficient;
        debiased
    }

    /// Current bias estimate in deg/s
    pub fn bias(&self) -> na::Vector3<f32> {
        self.bias
    }

    /// Whether the estimate is currently adapting
    pub fn is_active(&self) -> bool {
        self.timer >= self.timeout
    }

    pub fn reset(&mut self) {
        self.timer = 0;
        self.bias = na::Vector3::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_bias_without_stillness() {
        let mut tracker = GyroBiasTracker::new(&GyroBiasSettings::default(), 50.0);
        let moving = na::Vector3::new(45.0, 0.0, -10.0);
        for _ in 0..1000 {
            assert_eq!(tracker.update(&moving), moving);
        }
        assert_eq!(tracker.bias(), na::Vector3::zeros());
        assert!(!tracker.is_active());
    }

    #[test]
    fn test_waits_for_timeout_before_adapting() {
        let settings = GyroBiasSettings::default();
        let mut tracker = GyroBiasTracker::new(&settings, 10.0);
        let still = na::Vector3::new(0.4, -0.2, 0.1);

        // 5 s at 10 Hz
        for _ in 0..50 {
            assert_eq!(tracker.update(&still), still);
        }
        assert!(tracker.is_active());
        assert_eq!(tracker.bias(), na::Vector3::zeros());

        tracker.update(&still);
        assert!(tracker.bias().norm() > 0.0);
    }

    #[test]
    fn test_converges_to_constant_bias() {
        let mut tracker = GyroBiasTracker::new(&GyroBiasSettings::default(), 50.0);
        let true_bias = na::Vector3::new(0.8, -0.5, 0.3);
        for _ in 0..(50 * 120) {
            tracker.update(&true_bias);
        }
        let error = (tracker.bias() - true_bias).norm();
        assert!(error < 0.05 * true_bias.norm(), "residual bias error {}", error);

        let corrected = tracker.update(&(true_bias + na::Vector3::new(0.0, 0.0, 1.0)));
        assert!((corrected - na::Vector3::new(0.0, 0.0, 1.0)).norm() < 0.05);
    }

    #[test]
    fn test_motion_resets_timer() {
        let mut tracker = GyroBiasTracker::new(&GyroBiasSettings::default(), 10.0);
        for _ in 0..49 {
            tracker.update(&na::Vector3::zeros());
        }
        tracker.update(&na::Vector3::new(0.0, 3.5, 0.0));
        assert!(!tracker.is_active());

        tracker.update(&na::Vector3::new(f32::NAN, 0.0, 0.0));
        assert_eq!(tracker.bias(), na::Vector3::zeros());
    }
}
