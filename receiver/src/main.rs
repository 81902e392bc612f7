use anyhow::Context;
use clap::Parser;
use scattercore::acquisition::AntennaPort;
use status_bridge::bridge::{status_bind_address, StatusBridge};
use std::path::PathBuf;
use std::time::Duration;
use workflow::config::ReceiverConfig;
use workflow::runner::{Runner, StopOptions};

mod generator;
mod status_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Multi-antenna backscatter receiver")]
struct Args {
    /// Load the receiver config from YAML; the rate and front-end flags are
    /// ignored when set
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    num_antennas: usize,
    #[arg(long, default_value_t = 50e6)]
    sample_rate: f64,
    #[arg(long, default_value_t = 1e6)]
    symbol_rate: f64,
    #[arg(long, default_value_t = 62.5e3)]
    tag_rate: f64,
    #[arg(long, default_value_t = 2450e6)]
    center_freq: f64,
    #[arg(long, default_value_t = 25.0)]
    gain: f64,
    #[arg(long, default_value = "RX2")]
    antenna: AntennaPort,
    /// Pub/sub endpoint the reports travel over
    #[arg(long, default_value = scattercore::telemetry::DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Samples per channel per read
    #[arg(long)]
    block_len: Option<usize>,
    /// Request SCHED_FIFO at this priority for every worker
    #[arg(long)]
    realtime: Option<i32>,
    /// Stop after this many seconds
    #[arg(long)]
    run_for: Option<f64>,
    /// Ignore standard input; stop on signals only
    #[arg(long, default_value_t = false)]
    ignore_stdin: bool,
    /// Serve /status and /reports on 127.0.0.1:9000
    #[arg(long, default_value_t = false)]
    serve: bool,
}

impl Args {
    fn receiver_config(&self) -> anyhow::Result<ReceiverConfig> {
        let mut config = match self.config.as_ref() {
            Some(path) => ReceiverConfig::load(path)?,
            None => ReceiverConfig {
                num_antennas: self.num_antennas,
                sample_rate: self.sample_rate,
                symbol_rate: self.symbol_rate,
                tag_rate: self.tag_rate,
                center_freq: self.center_freq,
                gain: self.gain,
                antenna: self.antenna,
                endpoint: self.endpoint.clone(),
                ..ReceiverConfig::default()
            },
        };
        if let Some(block_len) = self.block_len {
            config.block_len = block_len;
        }
        if self.realtime.is_some() {
            config.realtime_priority = self.realtime;
        }
        Ok(config)
    }

    fn stop_options(&self) -> anyhow::Result<StopOptions> {
        let run_for = self
            .run_for
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("invalid --run-for")?;
        Ok(StopOptions {
            watch_stdin: !self.ignore_stdin,
            run_for,
        })
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.receiver_config()?;
    let options = args.stop_options()?;

    let bridge = StatusBridge::new();
    if args.serve {
        bridge.serve(status_bind_address())?;
    }
    if options.watch_stdin {
        bridge.publish_status("press Enter to stop");
    }

    let runner = Runner::new(config, bridge.clone());
    let report = runner.run(&options)?;

    bridge.publish_status(&format!(
        "stopped: {} blocks acquired, {} reports published, {} received ({} malformed)",
        report.graph.source.processed,
        report.graph.reports.processed,
        report.telemetry.processed,
        report.telemetry.errors
    ));
    Ok(())
}
