//! Per-channel rejection and recovery of reference corrections.
//!
//! Each reference (gravity, magnetic field) runs its own small state machine:
//!
//! - `Accepting`: the correction is applied while its error stays under the
//!   threshold.
//! - `Rejecting`: the error exceeded the threshold; the correction is ignored
//!   and the trigger counts consecutive rejected samples.
//! - `Recovering`: the trigger passed the timeout; the correction is applied
//!   regardless of its error until the error falls back under the threshold.

use serde::{Deserialize, Serialize};

/// State of one correction channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    Accepting,
    Rejecting,
    Recovering,
}

/// Limits for one channel, in the units the engine works in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionLimits {
    /// Error in degrees above which the correction is rejected
    pub threshold_deg: f32,
    /// Consecutive rejected samples tolerated before recovery is forced
    pub timeout_samples: u32,
}

impl RejectionLimits {
    /// Limits that never reject
    pub fn disabled() -> Self {
        Self {
            threshold_deg: 0.0,
            timeout_samples: 0,
        }
    }

    /// A zero threshold or zero timeout turns rejection off
    pub fn is_enabled(&self) -> bool {
        self.threshold_deg > 0.0 && self.timeout_samples > 0
    }
}

/// Outcome of assessing one sample on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
    /// No reading was available for this sample
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RejectionChannel {
    mode: ChannelMode,
    /// Consecutive rejected samples
    trigger: u32,
    /// Error of the most recent assessed sample, degrees
    error_deg: f32,
    ignored: bool,
    /// Number of times this channel entered recovery
    recoveries: u32,
}

impl Default for RejectionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionChannel {
    pub fn new() -> Self {
        Self {
            mode: ChannelMode::Accepting,
            trigger: 0,
            error_deg: 0.0,
            ignored: false,
            recoveries: 0,
        }
    }

    /// Assess the correction error of one sample.
    ///
    /// `bypass` forces acceptance without touching the trigger, as used
    /// while the engine is initializing.
    pub fn assess(&mut self, error_deg: f32, limits: &RejectionLimits, bypass: bool) -> Verdict {
        self.error_deg = error_deg;

        if bypass || !limits.is_enabled() {
            self.mode = ChannelMode::Accepting;
            self.trigger = 0;
            return self.accept();
        }

        let within = error_deg <= limits.threshold_deg;
        match self.mode {
            ChannelMode::Recovering => {
                if within {
                    self.mode = ChannelMode::Accepting;
                    self.trigger = 0;
                }
                self.accept()
            }
            ChannelMode::Accepting | ChannelMode::Rejecting => {
                if within {
                    self.mode = ChannelMode::Accepting;
                    self.trigger = 0;
                    return self.accept();
                }
                self.trigger = self.trigger.saturating_add(1);
                if self.trigger > limits.timeout_samples {
                    self.mode = ChannelMode::Recovering;
                    self.recoveries += 1;
                } else {
                    self.mode = ChannelMode::Rejecting;
                }
                self.ignored = true;
                Verdict::Rejected
            }
        }
    }

    /// Record a sample without a reading for this channel
    pub fn skip(&mut self) -> Verdict {
        self.error_deg = 0.0;
        self.ignored = true;
        Verdict::Unavailable
    }

    /// Return to `Accepting`, keeping the recovery count
    pub fn reset(&mut self) {
        self.mode = ChannelMode::Accepting;
        self.trigger = 0;
        self.error_deg = 0.0;
        self.ignored = false;
    }

    fn accept(&mut self) -> Verdict {
        self.ignored = false;
        Verdict::Accepted
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn trigger(&self) -> u32 {
        self.trigger
    }

    pub fn error_deg(&self) -> f32 {
        self.error_deg
    }

    /// Whether the correction of the last sample was left out
    pub fn ignored(&self) -> bool {
        self.ignored
    }

    pub fn is_recovering(&self) -> bool {
        self.mode == ChannelMode::Recovering
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }
}
