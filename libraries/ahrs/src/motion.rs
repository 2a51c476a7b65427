use std::collections::VecDeque;

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult};
use crate::fusion::seconds_to_samples;

/// Standard gravity in m/s^2
pub const STANDARD_GRAVITY: f32 = 9.81;

/// Settings for motion detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Linear acceleration magnitude in g above which a sample is moving
    pub threshold_g: f32,

    /// Seconds by which each moving sample is extended on both sides
    pub margin_s: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            threshold_g: 5.0 / STANDARD_GRAVITY,
            margin_s: 0.1,
        }
    }
}

impl MotionSettings {
    pub fn validate(&self) -> AhrsResult<()> {
        helpers::check_non_negative(self.threshold_g, "motion.threshold_g")?;
        helpers::check_non_negative(self.margin_s, "motion.margin_s")
    }
}

/// Classifies samples as moving or stationary from the linear acceleration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionDetector {
    threshold_g: f32,
    /// Dilation margin in samples
    margin: usize,
}

impl MotionDetector {
    pub fn new(settings: &MotionSettings, sample_rate: f32) -> Self {
        Self::with_margin(settings.threshold_g, seconds_to_samples(settings.margin_s, sample_rate) as usize)
    }

    pub fn with_margin(threshold_g: f32, margin: usize) -> Self {
        Self { threshold_g, margin }
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Raw per-sample rule, before dilation
    pub fn classify(&self, linear_acceleration: &na::Vector3<f32>) -> bool {
        linear_acceleration.norm() > self.threshold_g
    }

    /// Classify a whole series (in g) and dilate the result
    pub fn detect(&self, linear_acceleration: &[na::Vector3<f32>]) -> Vec<bool> {
        let raw: Vec<bool> = linear_acceleration.iter().map(|a| self.classify(a)).collect();
        dilate(&raw, self.margin)
    }

    pub fn streaming(&self) -> StreamingMotionDetector {
        StreamingMotionDetector::new(*self)
    }
}

/// Extend every moving sample by `margin` samples on both sides.
///
/// A forward sweep over the raw flags marks the `margin` samples after each
/// moving sample, then a backward sweep over that result marks the `margin`
/// samples before each moving one. Samples near either end only see what
/// is inside the series.
pub fn dilate(raw: &[bool], margin: usize) -> Vec<bool> {
    let mut forward = vec![false; raw.len()];
    let mut remaining = 0;
    for (flag, &moving) in forward.iter_mut().zip(raw) {
        if moving {
            remaining = margin;
            *flag = true;
        } else if remaining > 0 {
            remaining -= 1;
            *flag = true;
        }
    }

    let mut dilated = vec![false; raw.len()];
    remaining = 0;
    for (flag, &moving) in dilated.iter_mut().zip(&forward).rev() {
        if moving {
            remaining = margin;
            *flag = true;
        } else if remaining > 0 {
            remaining -= 1;
            *flag = true;
        }
    }
    dilated
}

/// Causal form of [`MotionDetector::detect`] with a fixed delay.
///
/// The flag of sample `i` is only final once sample `i + margin` has been
/// seen, so `push` returns the flag of the sample `margin` places back and
/// `flush` settles the tail at the end of the series.
#[derive(Debug, Clone)]
pub struct StreamingMotionDetector {
    detector: MotionDetector,
    /// Raw flags of the most recent `2 * margin + 1` samples
    window: VecDeque<bool>,
    received: usize,
    emitted: usize,
}

impl StreamingMotionDetector {
    pub fn new(detector: MotionDetector) -> Self {
        Self {
            detector,
            window: VecDeque::with_capacity(2 * detector.margin + 1),
            received: 0,
            emitted: 0,
        }
    }

    /// Feed the next linear acceleration (g). Returns the final flag for
    /// sample `received - 1 - margin` once enough samples are buffered.
    pub fn push(&mut self, linear_acceleration: &na::Vector3<f32>) -> Option<bool> {
        let margin = self.detector.margin;
        self.window.push_back(self.detector.classify(linear_acceleration));
        if self.window.len() > 2 * margin + 1 {
            self.window.pop_front();
        }
        self.received += 1;

        if self.received > margin {
            let index = self.emitted;
            self.emitted += 1;
            Some(self.flag_at(index))
        } else {
            None
        }
    }

    /// Flags of the samples still waiting for lookahead, in order
    pub fn flush(&mut self) -> Vec<bool> {
        let pending: Vec<bool> = (self.emitted..self.received).map(|i| self.flag_at(i)).collect();
        self.emitted = self.received;
        pending
    }

    /// Samples received but not yet emitted
    pub fn pending(&self) -> usize {
        self.received - self.emitted
    }

    fn flag_at(&self, index: usize) -> bool {
        let margin = self.detector.margin;
        let offset = self.received - self.window.len();
        let start = index.saturating_sub(margin).max(offset) - offset;
        let end = (index + margin).min(self.received - 1) - offset;
        self.window.range(start..=end).any(|&moving| moving)
    }
}
