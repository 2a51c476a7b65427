use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{helpers, AhrsResult, SensorType};

/// Frame whose acceleration is integrated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationFrame {
    /// Gravity-free acceleration in the body frame
    #[default]
    Body,
    /// Gravity-free acceleration rotated into the earth frame
    Earth,
}

/// Settings for the inertial integrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub frame: IntegrationFrame,
}

/// Velocity and position at one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    /// Velocity in m/s
    pub velocity: na::Vector3<f32>,

    /// Position in m
    pub position: na::Vector3<f32>,
}

/// Motion-gated double integration of linear acceleration.
///
/// Velocity only accumulates while the sample is moving and is reset to
/// zero otherwise; position always integrates velocity. Before the first
/// step both are zero, so the first sample never looks back past the start
/// of the series.
#[derive(Debug, Clone, Default)]
pub struct InertialIntegrator {
    state: KinematicState,
    steps: usize,
}

impl InertialIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one sample.
    ///
    /// * `dt` - seconds since the previous sample, zero for the first one
    /// * `acceleration` - linear acceleration in m/s^2
    /// * `moving` - motion flag of this sample
    pub fn step(
        &mut self,
        dt: f32,
        acceleration: &na::Vector3<f32>,
        moving: bool,
    ) -> AhrsResult<KinematicState> {
        helpers::check_time_delta(dt, true)?;
        helpers::check_vector_finite(acceleration, SensorType::Derived)?;

        self.state.velocity = if moving {
            self.state.velocity + acceleration * dt
        } else {
            na::Vector3::zeros()
        };
        self.state.position += self.state.velocity * dt;
        self.steps += 1;
        Ok(self.state)
    }

    /// Integrate a whole series of `(dt, acceleration, moving)` steps
    pub fn integrate<I>(&mut self, steps: I) -> AhrsResult<Vec<KinematicState>>
    where
        I: IntoIterator<Item = (f32, na::Vector3<f32>, bool)>,
    {
        steps
            .into_iter()
            .map(|(dt, acceleration, moving)| self.step(dt, &acceleration, moving))
            .collect()
    }

    pub fn state(&self) -> KinematicState {
        self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
