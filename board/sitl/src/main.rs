use std::path::PathBuf;

use ahrs::{FusionVariant, Pipeline, PipelineOutput};
use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use log::{debug, error, info};

mod scenario;
mod util;

use scenario::ScenarioKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VariantArg {
    Complementary,
    Rejection,
}

#[derive(Parser, Debug)]
#[command(name = "sitl")]
#[command(about = "Run the AHRS pipeline over a synthesized sensor series")]
struct Cli {
    /// JSON file holding an AhrsConfig
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "spin")]
    scenario: ScenarioKind,

    /// Length of the series in seconds
    #[arg(long, default_value = "10")]
    seconds: f32,

    /// Sample rate in Hz, overrides the configuration
    #[arg(long)]
    rate: Option<f32>,

    /// Fusion variant with its usual parameters, overrides the configuration
    #[arg(long, value_enum)]
    variant: Option<VariantArg>,
}

enum State {
    Initializing,
    Running(Pipeline),
    Reporting(PipelineOutput),
    Stopping,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut state = State::Initializing;
    loop {
        state = match state {
            State::Initializing => {
                let mut config = util::load_config(cli.config.as_deref())?;
                if let Some(rate) = cli.rate {
                    config.sample_rate = rate;
                }
                match cli.variant {
                    Some(VariantArg::Complementary) => config.fusion.variant = FusionVariant::complementary(),
                    Some(VariantArg::Rejection) => config.fusion.variant = FusionVariant::rejection(),
                    None => {}
                }
                config.validate()?;
                info!(
                    "{:?} scenario, {} s at {} Hz, {:?}",
                    cli.scenario, cli.seconds, config.sample_rate, config.fusion.variant
                );
                let pipeline = Pipeline::new(config)?;
                debug!("{} initialisation samples", pipeline.engine().initialisation_samples());
                State::Running(pipeline)
            }
            State::Running(pipeline) => {
                let rate = pipeline.config().sample_rate;
                let samples = scenario::build(cli.scenario, cli.seconds, rate).generate();
                let steps = ahrs::sensors::time_deltas(&samples);
                if steps.len() > 1 {
                    let mean = steps[1..].iter().sum::<f32>() / (steps.len() - 1) as f32;
                    debug!("{} samples, mean step {:.4} s", samples.len(), mean);
                }
                match pipeline.run(&samples) {
                    Ok(output) => State::Reporting(output),
                    Err(failure) => {
                        error!("{}", failure);
                        if let Some(record) = &failure.last_record {
                            error!(
                                "last valid estimate at t={:.3}s: {}",
                                record.timestamp,
                                util::format_euler(&record.euler_deg)
                            );
                        }
                        return Err(anyhow!(failure));
                    }
                }
            }
            State::Reporting(output) => {
                report(&output, cli.seconds);
                State::Stopping
            }
            State::Stopping => break,
        };
    }
    Ok(())
}

/// One line per second of the run, then the totals
fn report(output: &PipelineOutput, seconds: f32) {
    let per_second = (output.records.len() as f32 / seconds.max(f32::EPSILON)).round().max(1.0) as usize;
    for record in output.records.iter().step_by(per_second) {
        info!(
            "t={:6.2}s {} moving={} v={} p={} flags={:?}",
            record.timestamp,
            util::format_euler(&record.euler_deg),
            record.moving,
            util::format_vector(&record.velocity),
            util::format_vector(&record.position),
            record.flags
        );
    }
    if let Some(last) = output.records.last() {
        info!("final {} at t={:.2}s", util::format_euler(&last.euler_deg), last.timestamp);
    }
    info!("summary: {:?}", output.summary);
}
