// Rapid block example
//
// Captures many short traces into device memory segments, fetches them in
// pages of whole traces and reports the trigger rate of every page.

use clap::Parser;
use picoscope_rs::{AcquisitionConfig, DeviceFamily, Measurement, ReadyWait, SimulatedDevice};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rapid_block")]
#[command(version = "1.0")]
#[command(about = "Capture many triggered traces and report the trigger rate")]
struct Args {
    /// Number of traces to capture
    #[arg(short = 'n', long, default_value_t = 1_000)]
    traces: u32,

    /// Samples per trace
    #[arg(short, long, default_value_t = 1_000)]
    length: u64,

    /// Host memory budget in bytes
    #[arg(short, long, default_value_t = 1024 * 1024)]
    budget: u64,

    /// Write every page as CSV to this file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let config = AcquisitionConfig {
        trace_length: args.length,
        trace_count: args.traces,
        wait: ReadyWait::default().with_poll_interval(Duration::from_millis(10)),
    };
    let mut measurement =
        Measurement::with_config(SimulatedDevice::new(DeviceFamily::Ps6000), config)?;
    measurement.enable_channels(&[true, true])?;
    measurement.set_timebase_ns(1);
    measurement.allocate_for_rapid_block(args.budget)?;

    let start_time = std::time::Instant::now();
    measurement.run()?;
    println!(
        "Captured {} traces of {} samples in {:.2?}",
        args.traces,
        args.length,
        start_time.elapsed()
    );

    let mut csv = args.csv.as_ref().map(File::create).transpose()?;
    loop {
        let report = measurement.fetch_next_rapid_block_report()?;
        if report.fetched == 0 {
            break;
        }
        println!(
            "Traces {:>6}..{:<6} rate {:>12.1} /s {}",
            measurement.page_first_trace(),
            measurement.page_first_trace() + report.fetched,
            measurement.rate_per_second(),
            if report.is_clean() { "" } else { "(with warnings)" }
        );
        if let Some(file) = csv.as_mut() {
            measurement.write_csv(file)?;
        }
    }

    Ok(())
}
