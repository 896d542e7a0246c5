//! Per-round playback history
//!
//! Stores completed round reports with automatic cleanup of old entries.

use crate::audio::driver::RoundReport;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of rounds to keep
const MAX_HISTORY_SIZE: usize = 3600; // 1 hour at ~1 round/sec

/// A completed round
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// Wall-clock time the round was recorded
    pub timestamp: DateTime<Utc>,
    pub report: RoundReport,
}

/// Running totals over every recorded round
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunningTotals {
    pub rounds: u64,
    pub full_writes: u64,
    pub short_writes: u64,
    /// Write attempts that returned a driver error
    pub write_errors: u64,
    pub recoveries: u64,
    pub reprepares: u64,
    pub abandoned: u64,
    /// Rounds cut short by a short write
    pub truncated_rounds: u64,
}

/// Statistics store for round history
#[derive(Debug)]
pub struct PlaybackStats {
    history: VecDeque<RoundRecord>,
    max_size: usize,
    totals: RunningTotals,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    /// Store keeping at most `max_size` rounds of history
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_size.min(MAX_HISTORY_SIZE)),
            max_size: max_size.max(1),
            totals: RunningTotals::default(),
        }
    }

    /// Record a completed round
    pub fn record_round(&mut self, report: RoundReport) {
        let totals = &mut self.totals;
        totals.rounds += 1;
        totals.full_writes += report.full_writes as u64;
        totals.short_writes += report.short_writes as u64;
        totals.write_errors += report.write_errors as u64;
        totals.recoveries += report.recoveries as u64;
        totals.reprepares += report.reprepares as u64;
        totals.abandoned += report.abandoned as u64;
        if report.truncated {
            totals.truncated_rounds += 1;
        }

        if self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(RoundRecord {
            timestamp: Utc::now(),
            report,
        });
    }

    pub fn history(&self) -> &VecDeque<RoundRecord> {
        &self.history
    }

    /// Most recent round, if any
    pub fn last_round(&self) -> Option<&RoundReport> {
        self.history.back().map(|r| &r.report)
    }

    pub fn totals(&self) -> &RunningTotals {
        &self.totals
    }

    /// Rounds where every repetition was written in full
    pub fn clean_rounds(&self) -> usize {
        self.history.iter().filter(|r| r.report.is_clean()).count()
    }

    /// Clear all history and reset totals
    pub fn clear(&mut self) {
        self.history.clear();
        self.totals = RunningTotals::default();
    }
}

impl Default for PlaybackStats {
    fn default() -> Self {
        Self::new()
    }
}
