// Waveform capture example
//
// Captures one or more frames from a serial-attached TDS2000B and prints a
// per-channel summary computed with polars.

use clap::Parser;
use polars::prelude::*;
use std::time::Duration;
use tekscope_rs::trigger_config::{EdgeTrigger, TriggerSource};
use tekscope_rs::{
    AcquisitionConfig, AcquisitionEvent, CalibrationStrategy, CaptureMode, ChannelWaveform,
    FnSink, IdleTekScope, SerialConfig, SerialTransport,
};

#[derive(Parser)]
#[command(name = "capture")]
#[command(version = "1.0")]
#[command(about = "Capture waveforms from a TDS2000B oscilloscope")]
struct Args {
    /// Serial port the instrument is attached to
    port: String,

    #[arg(short, long, default_value_t = 9600, help = "Serial baud rate")]
    baud_rate: u32,

    #[arg(short, long, default_value_t = 1, help = "Frames to capture, 0 for continuous")]
    frames: u64,

    #[arg(short, long, default_value = "live", value_parser = ["live", "single", "display"], help = "Capture mode")]
    mode: String,

    #[arg(short, long, value_delimiter = ',', default_value = "1", help = "Channels to capture, e.g. 1,2")]
    channels: Vec<usize>,

    #[arg(long, help = "Trigger on a rising edge of CH1 at this level in volts")]
    trigger_level: Option<f64>,

    #[arg(long, help = "Calibrate from volts/div instead of the preamble")]
    vertical_scale: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
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

    let mode = match args.mode.as_str() {
        "single" => CaptureMode::SingleShot,
        "display" => CaptureMode::DisplaySnapshot,
        _ => CaptureMode::Live,
    };

    println!("TekScope Capture");
    println!("================");
    println!("Port: {} @ {} baud", args.port, args.baud_rate);
    println!("Mode: {}, frames: {}\n", mode.as_str(), args.frames);

    let transport = SerialTransport::open(
        &SerialConfig::new(&args.port)
            .baud_rate(args.baud_rate)
            .read_timeout(Duration::from_secs(5)),
    )?;
    let mut scope = IdleTekScope::new(transport);

    for index in 0..4 {
        scope.set_channel_enabled(index, args.channels.contains(&(index + 1)))?;
    }
    scope.apply_channel_selection()?;
    scope.read_vertical_config()?;
    let block_size = scope.read_record_length()?;

    if let Some(level) = args.trigger_level {
        let trigger = EdgeTrigger::start_capturing_when(TriggerSource::Ch1)
            .rising_edge()
            .at_level(level)
            .into_trigger()?;
        scope.apply_trigger(trigger)?;
    }

    let config = AcquisitionConfig::default()
        .mode(mode)
        .limit_frames(args.frames)
        .block_size(block_size)
        .calibration(if args.vertical_scale {
            CalibrationStrategy::VerticalScale
        } else {
            CalibrationStrategy::Preamble
        });

    let mut sink = FnSink(|event: AcquisitionEvent| match event {
        AcquisitionEvent::FrameBegin { frame } => println!("Frame {frame}"),
        AcquisitionEvent::Waveform(waveform) => {
            if let Err(e) = print_summary(&waveform) {
                eprintln!("   CH{}: {e}", waveform.channel + 1);
            }
        }
        AcquisitionEvent::FrameEnd { .. } => {}
        AcquisitionEvent::SequenceEnd => println!("\nCapture finished"),
    });

    let capture = scope
        .start_capture(config, &mut sink)
        .map_err(|(_, e)| e)?;
    capture.wait(&mut sink).map_err(|(_, e)| e)?;
    Ok(())
}

fn print_summary(waveform: &ChannelWaveform) -> Result<(), PolarsError> {
    let unit = waveform.unit.symbol();
    let stats = waveform
        .to_lazy_frame()?
        .select([
            col(unit).min().alias("min"),
            col(unit).max().alias("max"),
            col(unit).mean().alias("mean"),
        ])
        .collect()?;

    let value = |name: &str| -> Result<f64, PolarsError> {
        let column = stats.column(name)?.cast(&DataType::Float64)?;
        Ok(column.f64()?.get(0).unwrap_or(f64::NAN))
    };
    let digits = usize::try_from(waveform.digits.max(0)).unwrap_or(0) + 1;
    println!(
        "   CH{}: {} samples, {:.*} to {:.*} {unit} (mean {:.*})",
        waveform.channel + 1,
        waveform.len(),
        digits,
        value("min")?,
        digits,
        value("max")?,
        digits,
        value("mean")?,
    );
    Ok(())
}
