// Current capture example
//
// Powers the device under test at a chosen voltage and streams current
// samples, printing min/mean/max in milliamps.

use battlab_one::BattLabConnector;
use clap::Parser;

#[derive(Parser)]
#[command(about = "Stream current samples from a BattLab One")]
struct Args {
    /// Voltage range command, e.g. set_voltage_3v7
    #[arg(long, default_value = "set_voltage_3v7")]
    voltage: String,

    /// Use the low-current range (fixed 99 sense divisor)
    #[arg(long)]
    low_range: bool,

    /// Number of samples to capture
    #[arg(long, default_value_t = 1000)]
    samples: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut session = BattLabConnector::connect()?;
    session.execute(&args.voltage)?;
    session.execute(if args.low_range {
        "set_current_low"
    } else {
        "set_current_high"
    })?;
    session.execute("set_psu_on")?;

    let mut sampling = session.start_sampling().map_err(|(_, e)| e)?;
    let mut readings = Vec::with_capacity(args.samples);
    for reading in sampling.samples().take(args.samples) {
        readings.push(reading?);
    }
    let mut session = sampling.stop()?;
    session.execute("set_psu_off")?;

    let min = readings.iter().copied().fold(f64::INFINITY, f64::min);
    let max = readings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = readings.iter().sum::<f64>() / readings.len() as f64;
    println!(
        "{} samples: min {min:.4} mA, mean {mean:.4} mA, max {max:.4} mA",
        readings.len()
    );

    Ok(())
}
