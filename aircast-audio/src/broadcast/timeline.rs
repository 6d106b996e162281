//! Shared encode timeline
//!
//! Paired encoder sessions stamp presentation timestamps from one
//! monotonic sample counter so their outputs stay aligned. Only the
//! clock-owning session advances it; the sibling reads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of samples encoded since the stream started.
#[derive(Debug, Default)]
pub struct Timeline {
    samples: AtomicU64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `frames` and return the new total. The timestamp of the
    /// packet being stamped is taken after advancing, so it marks the end
    /// of the audio the packet carries.
    pub fn advance(&self, frames: u64) -> u64 {
        self.samples.fetch_add(frames, Ordering::Relaxed) + frames
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Current position in seconds at the given sample rate.
    pub fn pts_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples() as f64 / sample_rate as f64
    }

    /// Rewind to zero for the next stream.
    pub fn reset(&self) {
        self.samples.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic_and_inclusive() {
        let t = Timeline::new();
        assert_eq!(t.advance(1024), 1024);
        assert_eq!(t.advance(1024), 2048);
        assert_eq!(t.samples(), 2048);
    }

    #[test]
    fn test_pts_at_rate() {
        let t = Timeline::new();
        t.advance(44100);
        assert!((t.pts_secs(44100) - 1.0).abs() < 1e-9);
        t.reset();
        assert_eq!(t.pts_secs(44100), 0.0);
    }
}
