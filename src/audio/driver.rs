//! Playback driver: the round state machine and the run-forever loop
//!
//! One round prepares the stream, writes the same period buffer a fixed
//! number of times, drains, then pauses. Write failures go through
//! recover -> re-prepare before a repetition is given up.
//!
//! ## State machine
//!
//! ```text
//! Preparing -> Writing(r) --full--> Writing(r+1) | Draining
//!                 |  \--short--> Draining
//!                 error
//!                 v
//!             Recovering(r) --ok--> Writing(r)
//!                 | err
//!                 v
//!             Repreparing(r) --ok--> Writing(r)
//!                 | err: abandon r
//!                 v
//!             Writing(r+1) | Draining
//! ```
//!
//! [`transition`] is pure; [`PlaybackDriver`] performs the device call for
//! the current state and feeds the outcome back.

use crate::audio::device::{DeviceError, DeviceSession, DriverError, DriverResult, PcmDevice};
use crate::audio::signal::{SquareWave, WaveformBuffer};
use crate::clock::ElapsedClock;
use crate::stats::store::PlaybackStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Granularity of the interruptible inter-round pause
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Fixed shape of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    /// Buffer writes per round
    pub repetitions: u32,
    /// Failed writes tolerated per repetition before it is abandoned (None = unbounded)
    pub max_retries: Option<u32>,
}

impl Default for RoundPlan {
    fn default() -> Self {
        Self {
            repetitions: crate::REPETITIONS_PER_ROUND,
            max_retries: None,
        }
    }
}

/// Position within a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    Preparing,
    /// `attempt` counts failed writes of this repetition so far
    Writing { repetition: u32, attempt: u32 },
    Recovering {
        repetition: u32,
        attempt: u32,
        error: DriverError,
    },
    /// Recovery failed; last resort before abandoning the repetition
    Repreparing {
        repetition: u32,
        attempt: u32,
        error: DriverError,
    },
    Draining,
}

/// Result of the device call made in a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Prepared(DriverResult<()>),
    Wrote(DriverResult<usize>),
    Recovered(DriverResult<()>),
    Reprepared(DriverResult<()>),
}

/// How a repetition ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepetitionVerdict {
    Full,
    /// Fewer frames than requested without an error; ends the round
    Short { written: usize },
    /// Recovery and re-prepare both failed, or the retry bound was hit
    Abandoned { error: DriverError },
}

/// Next state plus the verdict of any repetition that just finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: RoundState,
    pub verdict: Option<RepetitionVerdict>,
}

impl Transition {
    fn to(next: RoundState) -> Self {
        Self {
            next,
            verdict: None,
        }
    }

    fn finished(next: RoundState, verdict: RepetitionVerdict) -> Self {
        Self {
            next,
            verdict: Some(verdict),
        }
    }
}

fn after_repetition(repetition: u32, plan: &RoundPlan) -> RoundState {
    if repetition + 1 < plan.repetitions {
        RoundState::Writing {
            repetition: repetition + 1,
            attempt: 0,
        }
    } else {
        RoundState::Draining
    }
}

/// Pure round transition
///
/// `frames` is the frame count every write requests. A state paired with an
/// outcome it cannot produce ends the round.
pub fn transition(
    state: &RoundState,
    outcome: StepOutcome,
    frames: usize,
    plan: &RoundPlan,
) -> Transition {
    match (state, outcome) {
        (RoundState::Preparing, StepOutcome::Prepared(_)) => {
            if plan.repetitions == 0 {
                Transition::to(RoundState::Draining)
            } else {
                Transition::to(RoundState::Writing {
                    repetition: 0,
                    attempt: 0,
                })
            }
        }

        (RoundState::Writing { repetition, .. }, StepOutcome::Wrote(Ok(written)))
            if written >= frames =>
        {
            Transition::finished(after_repetition(*repetition, plan), RepetitionVerdict::Full)
        }

        (RoundState::Writing { .. }, StepOutcome::Wrote(Ok(written))) => {
            Transition::finished(RoundState::Draining, RepetitionVerdict::Short { written })
        }

        (
            RoundState::Writing {
                repetition,
                attempt,
            },
            StepOutcome::Wrote(Err(error)),
        ) => {
            if plan.max_retries.is_some_and(|max| *attempt >= max) {
                Transition::finished(
                    after_repetition(*repetition, plan),
                    RepetitionVerdict::Abandoned { error },
                )
            } else {
                Transition::to(RoundState::Recovering {
                    repetition: *repetition,
                    attempt: attempt + 1,
                    error,
                })
            }
        }

        (
            RoundState::Recovering {
                repetition,
                attempt,
                ..
            },
            StepOutcome::Recovered(result),
        ) => match result {
            Ok(()) => Transition::to(RoundState::Writing {
                repetition: *repetition,
                attempt: *attempt,
            }),
            Err(error) => Transition::to(RoundState::Repreparing {
                repetition: *repetition,
                attempt: *attempt,
                error,
            }),
        },

        (
            RoundState::Repreparing {
                repetition,
                attempt,
                ..
            },
            StepOutcome::Reprepared(result),
        ) => match result {
            Ok(()) => Transition::to(RoundState::Writing {
                repetition: *repetition,
                attempt: *attempt,
            }),
            Err(error) => Transition::finished(
                after_repetition(*repetition, plan),
                RepetitionVerdict::Abandoned { error },
            ),
        },

        _ => Transition::to(RoundState::Draining),
    }
}

/// Outcome counters of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Zero-based round index
    pub round: u64,
    pub full_writes: u32,
    pub short_writes: u32,
    /// Write attempts that returned a driver error
    pub write_errors: u32,
    /// Successful driver recoveries
    pub recoveries: u32,
    /// Successful fallback prepares after a failed recovery
    pub reprepares: u32,
    pub abandoned: u32,
    /// A short write skipped the remaining repetitions
    pub truncated: bool,
    /// Elapsed ms when the round started
    pub started_ms: u64,
    /// Elapsed ms after the drain returned
    pub drained_ms: u64,
}

impl RoundReport {
    /// Repetitions that reached a verdict
    pub fn completed_repetitions(&self) -> u32 {
        self.full_writes + self.short_writes + self.abandoned
    }

    /// Every repetition was written in full
    pub fn is_clean(&self) -> bool {
        self.short_writes == 0 && self.abandoned == 0 && !self.truncated
    }
}

/// Drives one negotiated session through playback rounds
pub struct PlaybackDriver<D: PcmDevice> {
    session: DeviceSession<D>,
    buffer: WaveformBuffer,
    plan: RoundPlan,
    pause: Duration,
    clock: ElapsedClock,
    stats: PlaybackStats,
    round: u64,
}

impl<D: PcmDevice> PlaybackDriver<D> {
    /// Create a driver for a negotiated session
    ///
    /// Renders `wave` into a buffer of exactly one achieved period.
    ///
    /// # Errors
    /// [`DeviceError::NotConfigured`] if the session was never negotiated.
    pub fn new(
        session: DeviceSession<D>,
        wave: SquareWave,
        clock: ElapsedClock,
    ) -> Result<Self, DeviceError> {
        let frames = session
            .config()
            .ok_or(DeviceError::NotConfigured)?
            .period_frames;
        let buffer = wave.render(frames);
        info!(
            frames,
            cycle = wave.cycle(),
            "Rendered square wave period buffer"
        );

        Ok(Self {
            session,
            buffer,
            plan: RoundPlan::default(),
            pause: crate::ROUND_PAUSE,
            clock,
            stats: PlaybackStats::new(),
            round: 0,
        })
    }

    pub fn with_plan(mut self, plan: RoundPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Pause between rounds
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    pub fn buffer(&self) -> &WaveformBuffer {
        &self.buffer
    }

    pub fn plan(&self) -> &RoundPlan {
        &self.plan
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Run rounds until `running` is cleared
    ///
    /// The flag is checked before every round and during the pause. Write
    /// failures never end the loop.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), DeviceError> {
        self.run_until(running, None)
    }

    /// Run rounds until `running` is cleared or `max_rounds` rounds have run
    pub fn run_until(
        &mut self,
        running: &AtomicBool,
        max_rounds: Option<u64>,
    ) -> Result<(), DeviceError> {
        let mut remaining = max_rounds;
        while running.load(Ordering::SeqCst) && remaining != Some(0) {
            self.run_round()?;
            remaining = remaining.map(|n| n - 1);
            if remaining != Some(0) {
                self.pause(running);
            }
        }
        info!(rounds = self.round, "Playback stopped");
        Ok(())
    }

    /// Run exactly `rounds` rounds, pausing after each
    pub fn run_rounds(&mut self, rounds: u64) -> Result<Vec<RoundReport>, DeviceError> {
        let running = AtomicBool::new(true);
        let mut reports = Vec::with_capacity(rounds as usize);
        for _ in 0..rounds {
            reports.push(self.run_round()?);
            self.pause(&running);
        }
        Ok(reports)
    }

    /// Run a single round: prepare, write repetitions, drain
    ///
    /// Does not pause afterwards.
    pub fn run_round(&mut self) -> Result<RoundReport, DeviceError> {
        let frames = self.buffer.frames();
        let mut report = RoundReport {
            round: self.round,
            started_ms: self.clock.elapsed_ms(),
            ..Default::default()
        };
        let mut state = RoundState::Preparing;

        while state != RoundState::Draining {
            let outcome = self.perform(&state, frames)?;
            tally(&mut report, &outcome);

            let Transition { next, verdict } = transition(&state, outcome, frames, &self.plan);
            if let (Some(verdict), Some(repetition)) = (verdict, repetition_of(&state)) {
                self.log_verdict(&verdict, repetition, frames);
                match verdict {
                    RepetitionVerdict::Full => report.full_writes += 1,
                    RepetitionVerdict::Short { .. } => {
                        report.short_writes += 1;
                        report.truncated = repetition + 1 < self.plan.repetitions;
                    }
                    RepetitionVerdict::Abandoned { .. } => report.abandoned += 1,
                }
            }
            state = next;
        }

        info!(elapsed_ms = self.clock.elapsed_ms(), "Before drain");
        if let Err(e) = self.session.drain() {
            warn!(error = %e, "Drain failed");
        }
        report.drained_ms = self.clock.elapsed_ms();
        info!(elapsed_ms = report.drained_ms, "After drain");

        self.round += 1;
        self.stats.record_round(report.clone());
        Ok(report)
    }

    fn perform(&self, state: &RoundState, frames: usize) -> Result<StepOutcome, DeviceError> {
        let outcome = match state {
            RoundState::Preparing => {
                let result = self.session.prepare();
                if let Err(e) = &result {
                    warn!(error = %e, "Prepare failed at round start");
                }
                StepOutcome::Prepared(result)
            }
            RoundState::Writing {
                repetition,
                attempt,
            } => {
                if *attempt == 0 {
                    info!(
                        elapsed_ms = self.clock.elapsed_ms(),
                        repetition, "Writing period"
                    );
                }
                let result = self.session.write(&self.buffer, frames)?;
                if let Err(e) = &result {
                    warn!(error = %e, repetition, attempt, "Write error");
                }
                StepOutcome::Wrote(result)
            }
            RoundState::Recovering { error, .. } => {
                let result = self.session.recover(error);
                if let Err(e) = &result {
                    warn!(error = %e, "Error after recover");
                }
                StepOutcome::Recovered(result)
            }
            RoundState::Repreparing { .. } => StepOutcome::Reprepared(self.session.prepare()),
            // The round loop never performs a call in Draining.
            RoundState::Draining => StepOutcome::Prepared(Ok(())),
        };
        Ok(outcome)
    }

    fn log_verdict(&self, verdict: &RepetitionVerdict, repetition: u32, frames: usize) {
        match verdict {
            RepetitionVerdict::Full => {}
            RepetitionVerdict::Short { written } => {
                warn!(
                    repetition,
                    written,
                    expected = frames,
                    "Short write, skipping rest of round"
                );
            }
            RepetitionVerdict::Abandoned { error } => {
                error!(error = %error, repetition, "Irrecoverable error, write abandoned");
            }
        }
    }

    fn pause(&self, running: &AtomicBool) {
        // No representable deadline: wait for the stop flag alone.
        let deadline = Instant::now().checked_add(self.pause);
        while running.load(Ordering::SeqCst) {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    PAUSE_SLICE.min(deadline - now)
                }
                None => PAUSE_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

fn repetition_of(state: &RoundState) -> Option<u32> {
    match state {
        RoundState::Writing { repetition, .. }
        | RoundState::Recovering { repetition, .. }
        | RoundState::Repreparing { repetition, .. } => Some(*repetition),
        RoundState::Preparing | RoundState::Draining => None,
    }
}

fn tally(report: &mut RoundReport, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Wrote(Err(_)) => report.write_errors += 1,
        StepOutcome::Recovered(Ok(())) => report.recoveries += 1,
        StepOutcome::Reprepared(Ok(())) => report.reprepares += 1,
        _ => {}
    }
}
