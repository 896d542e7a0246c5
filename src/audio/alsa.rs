//! ALSA PCM backend
//!
//! Thin mapping of [`PcmDevice`] onto `alsa::PCM` opened in blocking
//! playback mode.

use crate::audio::device::{
    nearest_periods, Access, DeviceError, DeviceSession, DriverError, DriverResult, HwParamSpace,
    PcmDevice, SampleFormat,
};
use alsa::pcm::{self, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};

impl From<alsa::Error> for DriverError {
    fn from(e: alsa::Error) -> Self {
        DriverError::new(-e.errno().abs(), e.to_string())
    }
}

/// Blocking ALSA playback handle
pub struct AlsaDevice {
    pcm: PCM,
}

impl AlsaDevice {
    /// Open a PCM by name (e.g. `"default"`, `"hw:0,0"`) for blocking playback
    pub fn open(name: &str) -> DriverResult<Self> {
        let pcm = PCM::new(name, Direction::Playback, false)?;
        Ok(Self { pcm })
    }
}

impl DeviceSession<AlsaDevice> {
    /// Open a named ALSA playback device
    pub fn open(name: &str) -> Result<Self, DeviceError> {
        Self::open_with(name, AlsaDevice::open)
    }
}

/// Pending ALSA hardware parameters
pub struct AlsaParams<'a>(HwParams<'a>);

impl HwParamSpace for AlsaParams<'_> {
    fn select_access(&mut self, access: Access) -> DriverResult<()> {
        let access = match access {
            Access::RwInterleaved => pcm::Access::RWInterleaved,
        };
        Ok(self.0.set_access(access)?)
    }

    fn select_format(&mut self, format: SampleFormat) -> DriverResult<()> {
        let format = match format {
            SampleFormat::U8 => pcm::Format::U8,
        };
        Ok(self.0.set_format(format)?)
    }

    fn select_channels(&mut self, channels: u32) -> DriverResult<()> {
        Ok(self.0.set_channels(channels)?)
    }

    fn request_rate(&mut self, rate: u32) -> DriverResult<u32> {
        Ok(self.0.set_rate_near(rate, ValueOr::Nearest)?)
    }

    fn request_periods(&mut self, periods: u32) -> DriverResult<u32> {
        // `set_periods` is an exact set; a refused count leaves the space
        // untouched, so walk outwards from the request instead.
        nearest_periods(periods, crate::MAX_PERIODS, |candidate| {
            Ok(self.0.set_periods(candidate, ValueOr::Nearest)?)
        })?;
        Ok(self.0.get_periods()?)
    }

    fn request_period_size(&mut self, frames: usize) -> DriverResult<usize> {
        let granted = self
            .0
            .set_period_size_near(frames as Frames, ValueOr::Nearest)?;
        Ok(granted.max(0) as usize)
    }
}

impl PcmDevice for AlsaDevice {
    type Params<'a> = AlsaParams<'a>;

    fn hw_params(&self) -> DriverResult<AlsaParams<'_>> {
        Ok(AlsaParams(HwParams::any(&self.pcm)?))
    }

    fn commit(&self, params: &AlsaParams<'_>) -> DriverResult<()> {
        Ok(self.pcm.hw_params(&params.0)?)
    }

    fn current_period_size(&self) -> DriverResult<usize> {
        let params = self.pcm.hw_params_current()?;
        Ok(params.get_period_size()?.max(0) as usize)
    }

    fn write_interleaved(&self, samples: &[u8]) -> DriverResult<usize> {
        let io = self.pcm.io_u8()?;
        Ok(io.writei(samples)?)
    }

    fn recover(&self, error: &DriverError) -> DriverResult<()> {
        Ok(self.pcm.recover(error.code, false)?)
    }

    fn prepare(&self) -> DriverResult<()> {
        Ok(self.pcm.prepare()?)
    }

    fn drain(&self) -> DriverResult<()> {
        Ok(self.pcm.drain()?)
    }
}
