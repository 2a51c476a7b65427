use ahrs::simulation::Scenario;
use clap::ValueEnum;
use nalgebra as na;

/// Motions the SITL can synthesize
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// Level and still
    Stationary,
    /// Constant 90 deg/s yaw
    Spin,
    /// Tilted body rolling at 30 deg/s
    Roll,
    /// Level body pushed north and braked again
    Push,
}

/// Build the scenario for `kind`, lasting `seconds` at `rate` Hz
pub fn build(kind: ScenarioKind, seconds: f32, rate: f32) -> Scenario {
    match kind {
        ScenarioKind::Stationary => Scenario::stationary(rate, seconds),
        ScenarioKind::Spin => Scenario::rotation(na::Vector3::z(), 90.0, rate, seconds),
        ScenarioKind::Roll => Scenario::rotation(na::Vector3::x(), 30.0, rate, seconds)
            .with_initial_orientation(ahrs::utils::euler_to_quaternion(&na::Vector3::new(0.0, 10.0, 45.0))),
        ScenarioKind::Push => {
            // leave time for the filter to settle before moving
            let start = (seconds * 0.5).max(4.0).min(seconds);
            Scenario::push(na::Vector3::new(0.6, 0.0, 0.0), start, 1.0, rate, seconds)
        }
    }
}
