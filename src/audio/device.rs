//! Playback device session: open, hardware parameter negotiation and the
//! blocking write/recover/prepare/drain primitives
//!
//! The session owns exactly one [`PcmDevice`] for its whole lifetime. Backends
//! (ALSA, the simulated driver) only implement the raw driver calls; the
//! negotiation order and the period tolerance policy live here.

use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Result of a raw driver call
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Error reported by the underlying driver
///
/// `code` is the driver's errno-style code (e.g. `-EPIPE` for an underrun).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur while setting up or using a device session
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unable to open pcm device '{name}': {source}")]
    DeviceUnavailable { name: String, source: DriverError },

    #[error("Hardware parameter '{step}' rejected: {source}")]
    ParameterRejected {
        step: NegotiationStep,
        source: DriverError,
    },

    #[error("Period size too small: requested {requested} frames, got {achieved}")]
    PeriodTooSmall { requested: usize, achieved: usize },

    #[error("Session has not been negotiated")]
    NotConfigured,

    #[error("Buffer holds {available} frames, {requested} requested")]
    BufferTooShort { requested: usize, available: usize },
}

/// One step of the hardware parameter negotiation, in commit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Access,
    Format,
    Channels,
    Rate,
    Periods,
    PeriodSize,
    Commit,
    ReadBack,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Access => "access",
            Self::Format => "format",
            Self::Channels => "channels",
            Self::Rate => "rate",
            Self::Periods => "periods",
            Self::PeriodSize => "period size",
            Self::Commit => "commit",
            Self::ReadBack => "read back",
        };
        f.write_str(name)
    }
}

/// Buffer access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Interleaved blocking read/write
    RwInterleaved,
}

/// Sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit
    U8,
}

/// Pending hardware parameter space of an open device
///
/// The `request_*` calls may adjust the value up or down; the returned value
/// is what the driver will actually use.
pub trait HwParamSpace {
    fn select_access(&mut self, access: Access) -> DriverResult<()>;
    fn select_format(&mut self, format: SampleFormat) -> DriverResult<()>;
    fn select_channels(&mut self, channels: u32) -> DriverResult<()>;
    fn request_rate(&mut self, rate: u32) -> DriverResult<u32>;
    fn request_periods(&mut self, periods: u32) -> DriverResult<u32>;
    fn request_period_size(&mut self, frames: usize) -> DriverResult<usize>;
}

/// Raw playback driver connection
///
/// Every call blocks until the driver completes or errors.
pub trait PcmDevice {
    type Params<'a>: HwParamSpace
    where
        Self: 'a;

    /// Start a fresh, unrestricted parameter space
    fn hw_params(&self) -> DriverResult<Self::Params<'_>>;

    /// Install all parameters atomically
    fn commit(&self, params: &Self::Params<'_>) -> DriverResult<()>;

    /// Period size of the installed configuration
    fn current_period_size(&self) -> DriverResult<usize>;

    /// One interleaved write attempt
    fn write_interleaved(&self, samples: &[u8]) -> DriverResult<usize>;

    fn recover(&self, error: &DriverError) -> DriverResult<()>;

    fn prepare(&self) -> DriverResult<()>;

    fn drain(&self) -> DriverResult<()>;
}

/// Desired hardware configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareRequest {
    pub sample_rate: u32,
    pub periods: u32,
    pub period_frames: usize,
}

impl Default for HardwareRequest {
    fn default() -> Self {
        Self {
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            periods: crate::DEFAULT_PERIODS,
            period_frames: crate::DEFAULT_PERIOD_FRAMES,
        }
    }
}

/// Negotiated hardware configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareConfig {
    pub access: Access,
    pub format: SampleFormat,
    pub channels: u32,
    pub requested_rate: u32,
    pub rate: u32,
    pub requested_periods: u32,
    pub periods: u32,
    pub requested_period_frames: usize,
    /// Period size read back after commit; all buffer sizing uses this
    pub period_frames: usize,
}

/// Smallest period size accepted for a request
///
/// Uses integer arithmetic so the bound is exact: 1000 requested gives 950.
pub fn min_period_frames(requested: usize) -> usize {
    let scaled = requested as u128 * crate::PERIOD_TOLERANCE_PERCENT as u128;
    // Never exceeds `requested`, so the narrowing is lossless.
    scaled.div_ceil(100) as usize
}

/// Period counts to try for a near request, closest first
///
/// Ties go to the larger count. Only counts in `1..=max` are produced.
pub fn period_candidates(requested: u32, max: u32) -> Vec<u32> {
    let max = u64::from(max);
    // Past `max` the order is fixed: max, max - 1, ... 1.
    let requested = u64::from(requested).min(max + 1);
    let mut candidates = Vec::new();
    for distance in 0..=requested.max(max) {
        let above = requested + distance;
        if (1..=max).contains(&above) {
            candidates.push(above as u32);
        }
        if distance > 0 && requested > distance && requested - distance <= max {
            candidates.push((requested - distance) as u32);
        }
    }
    candidates
}

/// Nearest period count a driver accepts as an exact setting
///
/// `try_set` attempts one exact count and must leave the parameter space
/// unchanged on failure. Returns the first accepted candidate, or the
/// error from the first candidate tried when none is accepted.
pub fn nearest_periods<F>(requested: u32, max: u32, mut try_set: F) -> DriverResult<u32>
where
    F: FnMut(u32) -> DriverResult<()>,
{
    let mut first_error = None;
    for candidate in period_candidates(requested, max) {
        match try_set(candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| DriverError::new(-22, "No period count in range")))
}

fn check_period(requested: usize, achieved: usize) -> Result<(), DeviceError> {
    if achieved < min_period_frames(requested) {
        return Err(DeviceError::PeriodTooSmall {
            requested,
            achieved,
        });
    }
    Ok(())
}

fn rejected(step: NegotiationStep) -> impl FnOnce(DriverError) -> DeviceError {
    move |source| DeviceError::ParameterRejected { step, source }
}

/// Owned connection to one playback endpoint and its negotiated configuration
pub struct DeviceSession<D: PcmDevice> {
    name: String,
    device: D,
    config: Option<HardwareConfig>,
}

impl<D: PcmDevice> fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: PcmDevice> DeviceSession<D> {
    /// Open a device through a backend-specific opener
    ///
    /// # Errors
    /// [`DeviceError::DeviceUnavailable`] when the opener fails (busy, missing).
    pub fn open_with<F>(name: &str, opener: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(&str) -> DriverResult<D>,
    {
        let device = opener(name).map_err(|source| DeviceError::DeviceUnavailable {
            name: name.to_string(),
            source,
        })?;
        debug!(device = name, "Opened playback device");
        Ok(Self::from_device(name, device))
    }

    /// Wrap an already opened device
    pub fn from_device(name: &str, device: D) -> Self {
        Self {
            name: name.to_string(),
            device,
            config: None,
        }
    }

    /// Negotiate and commit the hardware parameters
    ///
    /// Steps run in a fixed order: access, format, channels, rate, periods,
    /// period size, commit, read back. The achieved values replace the
    /// requested ones for all later sizing.
    pub fn negotiate(&mut self, request: HardwareRequest) -> Result<&HardwareConfig, DeviceError> {
        self.config = None;

        let mut params = self
            .device
            .hw_params()
            .map_err(rejected(NegotiationStep::Access))?;

        params
            .select_access(Access::RwInterleaved)
            .map_err(rejected(NegotiationStep::Access))?;
        params
            .select_format(SampleFormat::U8)
            .map_err(rejected(NegotiationStep::Format))?;
        params
            .select_channels(crate::CHANNELS)
            .map_err(rejected(NegotiationStep::Channels))?;

        let rate = params
            .request_rate(request.sample_rate)
            .map_err(rejected(NegotiationStep::Rate))?;
        info!(requested = request.sample_rate, rate, "Sampling rate");

        let periods = params
            .request_periods(request.periods)
            .map_err(rejected(NegotiationStep::Periods))?;
        info!(requested = request.periods, periods, "Number of periods");

        let near_frames = params
            .request_period_size(request.period_frames)
            .map_err(rejected(NegotiationStep::PeriodSize))?;
        info!(
            requested = request.period_frames,
            frames = near_frames,
            "Period size"
        );
        check_period(request.period_frames, near_frames)?;

        self.device
            .commit(&params)
            .map_err(rejected(NegotiationStep::Commit))?;
        drop(params);

        let period_frames = self
            .device
            .current_period_size()
            .map_err(rejected(NegotiationStep::ReadBack))?;
        check_period(request.period_frames, period_frames)?;
        if period_frames != near_frames {
            debug!(
                near = near_frames,
                committed = period_frames,
                "Committed period size differs from negotiated value"
            );
        }

        Ok(&*self.config.insert(HardwareConfig {
            access: Access::RwInterleaved,
            format: SampleFormat::U8,
            channels: crate::CHANNELS,
            requested_rate: request.sample_rate,
            rate,
            requested_periods: request.periods,
            periods,
            requested_period_frames: request.period_frames,
            period_frames,
        }))
    }

    /// Single blocking interleaved write of `frames` frames from `buffer`
    ///
    /// Returns the outer error only for misuse; the inner result is the
    /// driver's answer (frames written, or an error to recover from).
    pub fn write(&self, buffer: &[u8], frames: usize) -> Result<DriverResult<usize>, DeviceError> {
        let config = self.config.as_ref().ok_or(DeviceError::NotConfigured)?;
        let samples = frames * config.channels as usize;
        if buffer.len() < samples {
            return Err(DeviceError::BufferTooShort {
                requested: frames,
                available: buffer.len() / config.channels as usize,
            });
        }
        Ok(self.device.write_interleaved(&buffer[..samples]))
    }

    /// Driver-level recovery from an underrun or suspend
    pub fn recover(&self, error: &DriverError) -> DriverResult<()> {
        self.device.recover(error)
    }

    /// Reset the stream to a ready-to-write state
    pub fn prepare(&self) -> DriverResult<()> {
        self.device.prepare()
    }

    /// Block until every submitted frame has been played
    pub fn drain(&self) -> DriverResult<()> {
        self.device.drain()
    }

    /// Negotiated configuration, if any
    pub fn config(&self) -> Option<&HardwareConfig> {
        self.config.as_ref()
    }

    /// Logical device name the session was opened with
    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Underlying driver connection
    pub fn device(&self) -> &D {
        &self.device
    }
}
