//! Square-wave test signal generation
//!
//! Renders one hardware period of an unsigned 8-bit square wave. The buffer
//! is written unchanged on every repetition, so each period must start on a
//! fresh sub-cycle.

use std::ops::Deref;

/// Immutable unsigned 8-bit samples for exactly one period (1 channel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformBuffer {
    samples: Vec<u8>,
}

impl WaveformBuffer {
    /// Number of frames (one sample per frame)
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.samples
    }
}

impl Deref for WaveformBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.samples
    }
}

/// Threshold-based square wave
///
/// Sample `i` is `high` when `i % cycle > threshold`, otherwise `low`.
/// With a 40-sample cycle at 44.1 kHz this is roughly a 1.1 kHz tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareWave {
    /// Sub-cycle length in samples (sets the pitch)
    cycle: usize,
    /// Position within the sub-cycle after which the output is high
    threshold: usize,
    high: u8,
    low: u8,
}

impl SquareWave {
    /// Create a square wave with the given sub-cycle length
    ///
    /// The threshold is half the cycle and the levels span the full U8 range.
    ///
    /// # Panics
    /// Panics if `cycle` is less than 2
    ///
    /// # Example
    /// ```
    /// use playtester::audio::signal::SquareWave;
    ///
    /// let wave = SquareWave::new(40);
    /// let buffer = wave.render(1000);
    /// assert_eq!(buffer.frames(), 1000);
    /// ```
    pub fn new(cycle: usize) -> Self {
        assert!(cycle >= 2, "Cycle must be at least 2 samples");
        Self {
            cycle,
            threshold: cycle / 2,
            high: u8::MAX,
            low: u8::MIN,
        }
    }

    /// Sample value at frame `i`
    pub fn sample(&self, i: usize) -> u8 {
        if i % self.cycle > self.threshold {
            self.high
        } else {
            self.low
        }
    }

    /// Render `frames` samples starting at frame 0
    pub fn render(&self, frames: usize) -> WaveformBuffer {
        WaveformBuffer {
            samples: (0..frames).map(|i| self.sample(i)).collect(),
        }
    }

    /// Get the sub-cycle length
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Fundamental frequency at a given sample rate
    pub fn frequency(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.cycle as f64
    }
}

impl Default for SquareWave {
    fn default() -> Self {
        Self::new(crate::SQUARE_CYCLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_length() {
        let wave = SquareWave::default();
        assert_eq!(wave.render(1024).frames(), 1024);
        assert_eq!(wave.render(0).frames(), 0);
    }

    #[test]
    fn test_threshold_edges() {
        let wave = SquareWave::default();
        assert_eq!(wave.sample(0), 0);
        assert_eq!(wave.sample(20), 0);
        assert_eq!(wave.sample(21), 255);
        assert_eq!(wave.sample(39), 255);
        assert_eq!(wave.sample(40), 0);
        assert_eq!(wave.sample(61), 255);
    }

    #[test]
    fn test_duty_cycle() {
        let buffer = SquareWave::default().render(40);
        let high = buffer.iter().filter(|&&s| s == 255).count();
        let low = buffer.iter().filter(|&&s| s == 0).count();
        assert_eq!(high, 19);
        assert_eq!(low, 21);
    }

    #[test]
    fn test_only_two_levels() {
        for &sample in SquareWave::default().render(1000).as_slice() {
            assert!(sample == 0 || sample == 255);
        }
    }

    #[test]
    fn test_frequency() {
        let wave = SquareWave::default();
        assert!((wave.frequency(44100) - 1102.5).abs() < 1e-9);
    }

    #[test]
    #[should_panic]
    fn test_cycle_too_short() {
        SquareWave::new(1);
    }
}
