//! Simulated playback driver
//!
//! Behaves like an ideal ALSA device unless scripted otherwise: grants every
//! requested parameter, accepts every full write, and recovers on demand.
//! Outcomes can be queued per call type, and every call is recorded so tests
//! can assert on the exact sequence the session issued.

use crate::audio::device::{
    nearest_periods, Access, DriverError, DriverResult, HwParamSpace, NegotiationStep, PcmDevice,
    SampleFormat,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::RangeInclusive;

const EPIPE: i32 = 32;
const EINVAL: i32 = 22;
const EBADFD: i32 = 77;

/// Underrun as reported by a write (`-EPIPE`)
pub fn underrun() -> DriverError {
    DriverError::new(-EPIPE, "Broken pipe")
}

/// A call observed by the simulated driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Negotiation step (commit included)
    Param(NegotiationStep),
    Prepare,
    Write { frames: usize },
    Recover { code: i32 },
    Drain,
}

/// Scripted answer to one write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteScript {
    /// Accept every frame
    Full,
    /// Accept at most this many frames
    Short(usize),
    /// Fail with the given error
    Fail(DriverError),
}

#[derive(Debug, Default)]
struct SimState {
    events: Vec<DeviceEvent>,
    writes: VecDeque<WriteScript>,
    recovers: VecDeque<DriverResult<()>>,
    prepares: VecDeque<DriverResult<()>>,
    drains: VecDeque<DriverResult<()>>,
    committed_period: Option<usize>,
    prepared: bool,
    frames_written: u64,
}

/// Scriptable in-process stand-in for a PCM device
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    rate: Option<u32>,
    periods: Option<u32>,
    period_range: Option<RangeInclusive<u32>>,
    period_frames: Option<usize>,
    committed_period_frames: Option<usize>,
    rejected: Vec<NegotiationStep>,
    state: RefCell<SimState>,
}

impl SimulatedDevice {
    /// Ideal device granting every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample rate the driver grants regardless of the request
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Period count the driver grants
    pub fn with_periods(mut self, periods: u32) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Period counts the driver accepts; others are refused as exact settings
    pub fn with_period_range(mut self, range: RangeInclusive<u32>) -> Self {
        self.period_range = Some(range);
        self
    }

    /// Period size the driver grants during negotiation
    pub fn with_period_frames(mut self, frames: usize) -> Self {
        self.period_frames = Some(frames);
        self
    }

    /// Period size reported after commit, when it differs from the granted one
    pub fn with_committed_period_frames(mut self, frames: usize) -> Self {
        self.committed_period_frames = Some(frames);
        self
    }

    /// Refuse a negotiation step
    pub fn reject_step(mut self, step: NegotiationStep) -> Self {
        self.rejected.push(step);
        self
    }

    /// Queue write outcomes; unscripted writes are full
    pub fn script_writes(self, scripts: impl IntoIterator<Item = WriteScript>) -> Self {
        self.state.borrow_mut().writes.extend(scripts);
        self
    }

    /// Queue recover outcomes; unscripted recovers succeed
    pub fn script_recovers(self, results: impl IntoIterator<Item = DriverResult<()>>) -> Self {
        self.state.borrow_mut().recovers.extend(results);
        self
    }

    /// Queue prepare outcomes; unscripted prepares succeed
    pub fn script_prepares(self, results: impl IntoIterator<Item = DriverResult<()>>) -> Self {
        self.state.borrow_mut().prepares.extend(results);
        self
    }

    /// Queue drain outcomes; unscripted drains succeed
    pub fn script_drains(self, results: impl IntoIterator<Item = DriverResult<()>>) -> Self {
        self.state.borrow_mut().drains.extend(results);
        self
    }

    /// Every call observed so far, in order
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.borrow().events.clone()
    }

    /// Total frames accepted by writes
    pub fn frames_written(&self) -> u64 {
        self.state.borrow().frames_written
    }

    /// Whether the stream is currently ready to accept writes
    pub fn is_prepared(&self) -> bool {
        self.state.borrow().prepared
    }

    fn step(&self, step: NegotiationStep) -> DriverResult<()> {
        self.state.borrow_mut().events.push(DeviceEvent::Param(step));
        if self.rejected.contains(&step) {
            return Err(DriverError::new(-EINVAL, "Invalid argument"));
        }
        Ok(())
    }
}

/// Pending parameters on a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimParams<'a> {
    device: &'a SimulatedDevice,
    period_frames: Option<usize>,
}

impl HwParamSpace for SimParams<'_> {
    fn select_access(&mut self, _access: Access) -> DriverResult<()> {
        self.device.step(NegotiationStep::Access)
    }

    fn select_format(&mut self, _format: SampleFormat) -> DriverResult<()> {
        self.device.step(NegotiationStep::Format)
    }

    fn select_channels(&mut self, _channels: u32) -> DriverResult<()> {
        self.device.step(NegotiationStep::Channels)
    }

    fn request_rate(&mut self, rate: u32) -> DriverResult<u32> {
        self.device.step(NegotiationStep::Rate)?;
        Ok(self.device.rate.unwrap_or(rate))
    }

    fn request_periods(&mut self, periods: u32) -> DriverResult<u32> {
        self.device.step(NegotiationStep::Periods)?;
        if let Some(granted) = self.device.periods {
            return Ok(granted);
        }
        match &self.device.period_range {
            Some(range) => nearest_periods(periods, crate::MAX_PERIODS, |candidate| {
                if range.contains(&candidate) {
                    Ok(())
                } else {
                    Err(DriverError::new(-EINVAL, "Invalid argument"))
                }
            }),
            None => Ok(periods),
        }
    }

    fn request_period_size(&mut self, frames: usize) -> DriverResult<usize> {
        self.device.step(NegotiationStep::PeriodSize)?;
        let granted = self.device.period_frames.unwrap_or(frames);
        self.period_frames = Some(granted);
        Ok(granted)
    }
}

impl PcmDevice for SimulatedDevice {
    type Params<'a> = SimParams<'a>;

    fn hw_params(&self) -> DriverResult<SimParams<'_>> {
        Ok(SimParams {
            device: self,
            period_frames: None,
        })
    }

    fn commit(&self, params: &SimParams<'_>) -> DriverResult<()> {
        self.step(NegotiationStep::Commit)?;
        let period = self
            .committed_period_frames
            .or(params.period_frames)
            .unwrap_or(crate::DEFAULT_PERIOD_FRAMES);
        let mut state = self.state.borrow_mut();
        state.committed_period = Some(period);
        state.prepared = true;
        Ok(())
    }

    fn current_period_size(&self) -> DriverResult<usize> {
        self.state
            .borrow()
            .committed_period
            .ok_or_else(|| DriverError::new(-EBADFD, "File descriptor in bad state"))
    }

    fn write_interleaved(&self, samples: &[u8]) -> DriverResult<usize> {
        let mut state = self.state.borrow_mut();
        state.events.push(DeviceEvent::Write {
            frames: samples.len(),
        });
        if !state.prepared {
            return Err(DriverError::new(-EBADFD, "File descriptor in bad state"));
        }
        let written = match state.writes.pop_front().unwrap_or(WriteScript::Full) {
            WriteScript::Full => samples.len(),
            WriteScript::Short(n) => n.min(samples.len()),
            WriteScript::Fail(err) => return Err(err),
        };
        state.frames_written += written as u64;
        Ok(written)
    }

    fn recover(&self, error: &DriverError) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(DeviceEvent::Recover { code: error.code });
        let result = state.recovers.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.prepared = true;
        }
        result
    }

    fn prepare(&self) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(DeviceEvent::Prepare);
        let result = state.prepares.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.prepared = true;
        }
        result
    }

    fn drain(&self) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(DeviceEvent::Drain);
        // A drained stream returns to the setup state and needs a prepare.
        state.prepared = false;
        state.drains.pop_front().unwrap_or(Ok(()))
    }
}
