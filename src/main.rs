//! Playtester - ALSA playback exerciser
//!
//! Entry point: negotiates the device once, then loops rounds until Ctrl+C.

use anyhow::Result;
use playtester::audio::device::{DeviceSession, PcmDevice};
use playtester::audio::sim::SimulatedDevice;
use playtester::{ElapsedClock, PlaybackConfig, PlaybackDriver, SquareWave};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Command line options layered over the config file
#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    device: Option<String>,
    sample_rate: Option<u32>,
    periods: Option<u32>,
    period_frames: Option<usize>,
    rounds: Option<u64>,
    simulate: bool,
}

impl Options {
    fn apply(&self, config: &mut PlaybackConfig) {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(periods) = self.periods {
            config.periods = periods;
        }
        if let Some(frames) = self.period_frames {
            config.period_frames = frames;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playtester=info".parse()?),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    let mut config = match &options.config {
        Some(path) => PlaybackConfig::load(path),
        None => PlaybackConfig::default(),
    };
    options.apply(&mut config);

    let clock = ElapsedClock::start();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl+C handler");
    }

    if options.simulate {
        info!(device = %config.device, "Using simulated playback device");
        let session = DeviceSession::from_device(&config.device, SimulatedDevice::new());
        return play(session, &config, clock, &running, options.rounds);
    }

    open_and_play(&config, clock, &running, options.rounds)
}

#[cfg(feature = "alsa")]
fn open_and_play(
    config: &PlaybackConfig,
    clock: ElapsedClock,
    running: &AtomicBool,
    rounds: Option<u64>,
) -> Result<()> {
    match DeviceSession::open(&config.device) {
        Ok(session) => play(session, config, clock, running, rounds),
        Err(e) => {
            // No device is not a crash: report and exit cleanly.
            error!(error = %e, "Sound unavailable");
            Ok(())
        }
    }
}

#[cfg(not(feature = "alsa"))]
fn open_and_play(
    _config: &PlaybackConfig,
    _clock: ElapsedClock,
    _running: &AtomicBool,
    _rounds: Option<u64>,
) -> Result<()> {
    error!("Built without ALSA support; run with --simulate");
    Ok(())
}

fn play<D: PcmDevice>(
    mut session: DeviceSession<D>,
    config: &PlaybackConfig,
    clock: ElapsedClock,
    running: &AtomicBool,
    rounds: Option<u64>,
) -> Result<()> {
    if let Err(e) = session.negotiate(config.request()) {
        error!(error = %e, device = session.device_name(), "Hardware setup failed");
        return Ok(());
    }

    let mut driver = PlaybackDriver::new(session, SquareWave::default(), clock)?
        .with_plan(config.plan())
        .with_pause(config.pause());

    println!("Playback started. Press Ctrl+C to stop.");
    driver.run_until(running, rounds)?;

    let totals = driver.stats().totals();
    info!(
        rounds = totals.rounds,
        full_writes = totals.full_writes,
        short_writes = totals.short_writes,
        write_errors = totals.write_errors,
        recoveries = totals.recoveries,
        reprepares = totals.reprepares,
        abandoned = totals.abandoned,
        "Playback summary"
    );
    Ok(())
}

/// Parse command line arguments; `None` means the invocation is complete
fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--version" | "-v" => {
                println!("playtester {}", playtester::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--simulate" => options.simulate = true,
            "--device" | "-d" | "--rate" | "-r" | "--periods" | "-p" | "--period-frames"
            | "-f" | "--rounds" | "-n" | "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", arg);
                    return Ok(None);
                };
                if !set_option(&mut options, arg, value) {
                    eprintln!("Error: Invalid value for {}: {}", arg, value);
                    return Ok(None);
                }
                i += 1;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(None);
            }
            _ => {
                // Positional argument - treat as device name if not set
                if options.device.is_none() {
                    options.device = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    Ok(Some(options))
}

fn set_option(options: &mut Options, flag: &str, value: &str) -> bool {
    match flag {
        "--device" | "-d" => options.device = Some(value.to_string()),
        "--config" | "-c" => options.config = Some(PathBuf::from(value)),
        "--rate" | "-r" => options.sample_rate = value.parse().ok(),
        "--periods" | "-p" => options.periods = value.parse().ok(),
        "--period-frames" | "-f" => options.period_frames = value.parse().ok(),
        "--rounds" | "-n" => options.rounds = value.parse().ok(),
        _ => return false,
    }
    match flag {
        "--rate" | "-r" => options.sample_rate.is_some(),
        "--periods" | "-p" => options.periods.is_some(),
        "--period-frames" | "-f" => options.period_frames.is_some(),
        "--rounds" | "-n" => options.rounds.is_some(),
        _ => true,
    }
}

fn print_help() {
    println!("Usage: playtester [OPTIONS] [DEVICE]");
    println!();
    println!("Options:");
    println!("  -d, --device NAME         PCM device (default: \"default\")");
    println!("  -r, --rate HZ             Requested sample rate (default: 44100)");
    println!("  -p, --periods N           Requested period count (default: 2)");
    println!("  -f, --period-frames N     Requested period size (default: 1000)");
    println!("  -n, --rounds N            Stop after N rounds (default: run until Ctrl+C)");
    println!("  -c, --config PATH         JSON config file");
    println!("      --simulate            Use the simulated driver instead of ALSA");
    println!("  -v, --version             Show version");
    println!("  -h, --help                Show this help");
    println!();
    println!("Examples:");
    println!("  playtester -d hw:0,0 -f 1024");
    println!("  RUST_LOG=playtester=debug playtester --simulate -n 5");
}
