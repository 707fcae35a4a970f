// Block capture example
//
// Captures a single trace on the simulated device, fetches it page by page
// under a host memory budget and writes one channel to disk.

use clap::Parser;
use picoscope_rs::{
    AcquisitionConfig, DeviceFamily, Measurement, ReadyWait, SimulatedDevice, Trigger,
};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "block_capture")]
#[command(version = "1.0")]
#[command(about = "Capture one block and dump it to a file")]
struct Args {
    /// Device generation to simulate
    #[arg(short, long, default_value = "6000", value_parser = ["4000", "6000"])]
    family: String,

    /// Enabled channels as letters, e.g. "AC"
    #[arg(short, long, default_value = "A")]
    channels: String,

    /// Samples in the trace
    #[arg(short, long, default_value_t = 100_000)]
    length: u64,

    /// Requested sample interval in nanoseconds
    #[arg(short, long, default_value_t = 1)]
    timebase_ns: u64,

    /// Host memory budget in bytes
    #[arg(short, long, default_value_t = 64 * 1024)]
    budget: u64,

    /// Trigger position as a fraction of the trace; free running when omitted
    #[arg(long)]
    trigger_at: Option<f64>,

    /// Give up waiting for the device after this many milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// Write raw bytes instead of one value per line
    #[arg(long)]
    binary: bool,

    /// Output file for the first enabled channel
    #[arg(short, long, default_value = "trace.txt")]
    output: PathBuf,

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

    let family = match args.family.as_str() {
        "4000" => DeviceFamily::Ps4000,
        _ => DeviceFamily::Ps6000,
    };

    let config = AcquisitionConfig {
        trace_length: args.length,
        trace_count: 1,
        wait: ReadyWait::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_millis(args.timeout_ms)),
    };
    let mut measurement = Measurement::with_config(SimulatedDevice::new(family), config)?;

    for letter in args.channels.to_uppercase().chars() {
        let index = (letter as usize).wrapping_sub('A' as usize);
        measurement.enable_channel(index)?;
    }
    let Some(first) = measurement
        .channels()
        .iter()
        .find(|channel| channel.is_enabled())
        .map(|channel| channel.id())
    else {
        eprintln!("No channels selected");
        std::process::exit(1);
    };

    measurement.set_timebase_ns(args.timebase_ns);
    if let Some(fraction) = args.trigger_at {
        measurement.set_trigger(Trigger::on_channel(first).rising_edge(0.0).at_fraction(fraction))?;
    }
    measurement.allocate(args.budget)?;

    println!("PicoScope Block Capture");
    println!("=======================");
    println!("Device: {family} (simulated)");
    println!("Channels: {}", args.channels.to_uppercase());
    println!("Trace length: {} samples", args.length);

    measurement.run()?;
    println!(
        "Sample interval: {} ns",
        measurement
            .realized_interval_ns()
            .unwrap_or_else(|| measurement.timebase_ns())
    );

    let mut output = File::create(&args.output)?;
    let mut pages = 0;
    let mut warnings = 0;
    loop {
        let report = measurement.fetch_next_block_report()?;
        if report.fetched == 0 {
            break;
        }
        pages += 1;
        warnings += report.warnings.len();

        if args.binary {
            measurement.write_binary(&mut output, first.index())?;
        } else {
            measurement.write_text(&mut output, first.index())?;
        }
    }

    println!(
        "✓ Wrote channel {first} to {} in {pages} pages ({warnings} warnings)",
        args.output.display()
    );
    Ok(())
}
