use ahrs::simulation::{unwrap_degrees, Scenario};
use ahrs::utils::{angle_diff_degrees, euler_to_quaternion};
use ahrs::{
    AhrsConfig, AhrsError, FusionSettings, FusionVariant, MagCalibration, Pipeline, SampleErrorPolicy,
};
use nalgebra as na;

const RATE: f32 = 50.0;

fn pipeline(config: AhrsConfig) -> Pipeline {
    Pipeline::new(config).unwrap()
}

fn complementary_config() -> AhrsConfig {
    AhrsConfig {
        fusion: FusionSettings {
            variant: FusionVariant::complementary(),
            ..FusionSettings::default()
        },
        ..AhrsConfig::default()
    }
}

fn check_constant_yaw_rate(config: AhrsConfig) {
    let scenario = Scenario::rotation(na::Vector3::z(), 90.0, RATE, 10.0);
    let samples = scenario.generate();
    assert_eq!(samples.len(), 500);

    let output = pipeline(config).run(&samples).unwrap();
    assert_eq!(output.records.len(), 500);

    let yaw: Vec<f32> = output.records.iter().map(|r| r.euler_deg.z).collect();
    let yaw = unwrap_degrees(&yaw);
    for (record, yaw) in output.records.iter().zip(yaw) {
        let expected = 90.0 * record.timestamp;
        assert!((yaw - expected).abs() < 1.0, "t={} yaw {} expected {}", record.timestamp, yaw, expected);
        assert!(record.euler_deg.x.abs() < 0.5 && record.euler_deg.y.abs() < 0.5, "{:?}", record.euler_deg);
        assert!(!record.flags.acceleration_recovery);
        assert!(!record.flags.magnetic_recovery);
        assert!(!record.flags.angular_rate_recovery);
        assert!((record.orientation.norm() - 1.0).abs() < 1e-6);
    }
    assert_eq!(output.summary.acceleration_recoveries, 0);
    assert_eq!(output.summary.magnetic_recoveries, 0);
}

#[test]
fn test_constant_yaw_rate_rejection_filter() {
    check_constant_yaw_rate(AhrsConfig::default());
}

#[test]
fn test_constant_yaw_rate_complementary_filter() {
    check_constant_yaw_rate(complementary_config());
}

#[test]
fn test_stationary_convergence_from_wrong_start() {
    let truth = euler_to_quaternion(&na::Vector3::new(30.0, -20.0, 60.0));
    let samples = Scenario::stationary(RATE, 10.0).with_initial_orientation(truth).generate();
    let output = pipeline(AhrsConfig::default()).run(&samples).unwrap();

    let last = output.records.last().unwrap();
    assert!(last.orientation.angle_to(&truth).to_degrees() < 0.5, "{:?}", last.euler_deg);
    assert!(!last.flags.initialising);

    // held steady over the last two seconds
    for record in &output.records[400..] {
        assert!((record.euler_deg - last.euler_deg).norm() < 0.01);
        assert!(!record.moving);
        assert_eq!(record.velocity, na::Vector3::zeros());
    }
    assert!(output.records[0].flags.initialising);
}

#[test]
fn test_hard_iron_offset_is_calibrated_out() {
    let offset = na::Vector3::new(15.0, -10.0, 5.0);
    let truth = euler_to_quaternion(&na::Vector3::new(0.0, 0.0, 30.0));
    let samples = Scenario::stationary(RATE, 6.0)
        .with_initial_orientation(truth)
        .with_hard_iron_offset(offset)
        .generate();

    let config = AhrsConfig {
        calibration: MagCalibration::new(offset, na::Matrix3::identity(), na::Vector3::new(1.0, 1.0, 1.0)),
        ..AhrsConfig::default()
    };
    let output = pipeline(config).run(&samples).unwrap();
    let yaw = output.records.last().unwrap().euler_deg.z;
    assert!(angle_diff_degrees(yaw, 30.0).abs() < 0.5, "yaw {}", yaw);
}

#[test]
fn test_heading_is_gyro_only_without_magnetometer() {
    let samples: Vec<_> = Scenario::rotation(na::Vector3::z(), 45.0, RATE, 4.0)
        .generate()
        .into_iter()
        .map(|mut s| {
            s.mag = na::Vector3::zeros();
            s
        })
        .collect();
    let output = pipeline(AhrsConfig::default()).run(&samples).unwrap();
    for record in &output.records {
        assert!(record.internal.magnetometer_ignored);
        assert!(angle_diff_degrees(record.euler_deg.z, 45.0 * record.timestamp).abs() < 0.2);
    }
}

#[test]
fn test_push_is_detected_and_integrated() {
    // 0.6 g north for 0.5 s, then braking for 0.5 s
    let samples = Scenario::push(na::Vector3::new(0.6, 0.0, 0.0), 4.0, 1.0, RATE, 7.0).generate();
    let output = pipeline(AhrsConfig::default()).run(&samples).unwrap();
    let records = &output.records;

    let moving: Vec<usize> = records.iter().filter(|r| r.moving).map(|r| r.index).collect();
    assert_eq!(moving, (195..255).collect::<Vec<_>>());
    assert_eq!(output.summary.moving, 60);

    // disturbance is rejected, not a recovery
    assert!(records[210].internal.accelerometer_ignored);
    assert_eq!(output.summary.acceleration_recoveries, 0);

    let peak = records[224].velocity.x;
    assert!((peak - 0.6 * 9.81 * 0.5).abs() < 0.01, "peak velocity {}", peak);

    let last = records.last().unwrap();
    assert_eq!(last.velocity, na::Vector3::zeros());
    // 0.6 g over 0.5 s and back: a * T^2
    assert!((last.position.x - 0.6 * 9.81 * 0.25).abs() < 0.02, "position {:?}", last.position);
    assert!(last.position.y.abs() < 1e-3 && last.position.z.abs() < 1e-3);

    // nothing moves before the push
    assert!(records[..195].iter().all(|r| r.position == na::Vector3::zeros()));
}

#[test]
fn test_invalid_sample_aborts_with_context() {
    let mut samples = Scenario::stationary(RATE, 1.0).generate();
    samples[7].gyro.y = f32::NAN;

    let failure = pipeline(AhrsConfig::default()).run(&samples).unwrap_err();
    assert_eq!(failure.index, 7);
    assert!(matches!(failure.error, AhrsError::InvalidSample { .. }));
    assert_eq!(failure.last_record.as_ref().unwrap().index, 6);
    assert_eq!(failure.last_state.as_ref().unwrap().updates(), 7);
}

#[test]
fn test_invalid_samples_can_be_skipped() {
    let mut samples = Scenario::stationary(RATE, 1.0).generate();
    samples[3].accel.x = f32::INFINITY;
    samples[4].mag.z = f32::NAN;

    let config = AhrsConfig {
        on_invalid_sample: SampleErrorPolicy::Skip,
        ..AhrsConfig::default()
    };
    let output = pipeline(config).run(&samples).unwrap();
    assert_eq!(output.summary.skipped, 2);
    assert_eq!(output.summary.processed, 48);

    let after_gap = &output.records[3];
    assert_eq!(after_gap.index, 5);
    assert!((after_gap.dt - 0.06).abs() < 1e-5);
}

#[test]
fn test_non_increasing_timestamp_is_fatal() {
    let mut samples = Scenario::stationary(RATE, 1.0).generate();
    samples[12].timestamp = samples[11].timestamp;

    let config = AhrsConfig {
        on_invalid_sample: SampleErrorPolicy::Skip,
        ..AhrsConfig::default()
    };
    let failure = pipeline(config).run(&samples).unwrap_err();
    assert_eq!(failure.index, 12);
    assert!(matches!(failure.error, AhrsError::InvalidTimestamp { .. }));
    assert_eq!(failure.last_record.unwrap().index, 11);

    let mut samples = Scenario::stationary(RATE, 1.0).generate();
    samples[20].timestamp -= 1.0;
    let failure = pipeline(AhrsConfig::default()).run(&samples).unwrap_err();
    assert_eq!(failure.index, 20);
}

#[test]
fn test_config_round_trips_through_json_shape() {
    let json = r#"{
        "sample_rate": 100.0,
        "fusion": { "variant": { "kind": "complementary", "gain": 0.1 } },
        "on_invalid_sample": "skip"
    }"#;
    let config: AhrsConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.sample_rate, 100.0);
    assert_eq!(config.fusion.variant, FusionVariant::Complementary { gain: 0.1 });
    assert_eq!(config.fusion.initialisation_period_s, 3.0);
    assert_eq!(config.on_invalid_sample, SampleErrorPolicy::Skip);
    assert!(config.validate().is_ok());
}
