use std::path::Path;

use ahrs::AhrsConfig;
use anyhow::Context;
use nalgebra as na;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AhrsConfig> {
    let Some(path) = path else {
        return Ok(AhrsConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Roll, pitch, yaw in degrees, formatted for a log line
pub fn format_euler(euler: &na::Vector3<f32>) -> String {
    format!("roll {:7.2} pitch {:7.2} yaw {:7.2}", euler.x, euler.y, euler.z)
}

pub fn format_vector(v: &na::Vector3<f32>) -> String {
    format!("({:6.3}, {:6.3}, {:6.3})", v.x, v.y, v.z)
}
