//! Playtester - ALSA playback exerciser
//!
//! Opens a playback device, negotiates a fixed U8 mono configuration, and
//! writes a square-wave period to it forever, exercising underrun recovery
//! and periodic drain/resume cycles.

pub mod audio;
pub mod clock;
pub mod config;
pub mod stats;

pub use audio::device::{DeviceError, DeviceSession, DriverError, HardwareConfig, HardwareRequest};
pub use audio::driver::{PlaybackDriver, RoundPlan, RoundReport};
pub use audio::signal::{SquareWave, WaveformBuffer};
pub use clock::ElapsedClock;
pub use config::PlaybackConfig;
pub use stats::store::PlaybackStats;

use std::time::Duration;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logical name of the playback device
pub const DEFAULT_DEVICE: &str = "default";

/// Requested sample rate (the driver may adjust it)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Requested number of periods
pub const DEFAULT_PERIODS: u32 = 2;

/// Largest period count tried when the requested count is not supported
pub const MAX_PERIODS: u32 = 1024;

/// Requested period size in frames
pub const DEFAULT_PERIOD_FRAMES: usize = 1000;

/// Mono output
pub const CHANNELS: u32 = 1;

/// Achieved period size must be at least this percentage of the request
pub const PERIOD_TOLERANCE_PERCENT: usize = 95;

/// Period buffer writes per round
pub const REPETITIONS_PER_ROUND: u32 = 3;

/// Pause after each drain
pub const ROUND_PAUSE: Duration = Duration::from_secs(1);

/// Square-wave sub-cycle length in samples (~1.1 kHz at 44.1 kHz)
pub const SQUARE_CYCLE: usize = 40;
