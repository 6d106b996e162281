//! Downstream PCM delivery
//!
//! The decoder session hands canonical PCM to a [`PcmSink`] and dynamic
//! metadata to a [`MetadataSink`]. Delivery is non-blocking: a sink that
//! cannot take everything right now stages the remainder internally and
//! reports `Deferred`; the session then polls [`PcmSink::flush_pending`]
//! on later ticks before doing any new work.
//!
//! [`RingBufferSink`] adapts the lock-free SPSC ring buffer the mixer
//! consumes from.

use ringbuf::{traits::*, HeapProd};
use tracing::{trace, warn};

use crate::playback::chapters::TextEncoding;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// Everything reached the downstream buffer
    Accepted,
    /// Part of the delivery was staged; poll `flush_pending` before
    /// delivering more
    Deferred,
}

/// Downstream consumer of canonical interleaved PCM.
pub trait PcmSink {
    /// Deliver `frames` frames of interleaved PCM with the given gain.
    ///
    /// A `Deferred` outcome means the sink retained the undelivered
    /// remainder; no samples are dropped either way.
    fn deliver(&mut self, pcm: &[f32], frames: usize, channels: u16, gain: f32) -> DeliverOutcome;

    /// Retry staged samples. Returns true while delivery is still blocked.
    fn flush_pending(&mut self) -> bool;

    /// Current downstream playback delay in milliseconds (audio delivered
    /// but not yet audible).
    fn delay_ms(&self) -> u64;
}

/// Receiver for dynamic metadata changes (chapter boundaries).
pub trait MetadataSink {
    /// Announce new artist/title/album, to become visible after `delay_ms`.
    fn notify(&mut self, encoding: TextEncoding, artist: &str, title: &str, album: &str, delay_ms: u64);
}

/// Metadata sink that discards notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetadataSink;

impl MetadataSink for NullMetadataSink {
    fn notify(&mut self, _: TextEncoding, _: &str, _: &str, _: &str, _: u64) {}
}

/// PCM sink feeding the shared lock-free ring buffer.
///
/// The producer half lives here; the mixer owns the consumer half.
/// Backpressure falls out of ring occupancy: what does not fit is staged
/// and retried, and the session sees `Deferred` in the meantime.
pub struct RingBufferSink {
    producer: HeapProd<f32>,
    /// Samples staged while the ring was full
    pending: Vec<f32>,
    sample_rate: u32,
    /// Deferred-delivery occurrences, for diagnostics
    deferrals: u64,
}

impl RingBufferSink {
    /// Wrap the producer half of a ring buffer carrying interleaved f32.
    pub fn new(producer: HeapProd<f32>, sample_rate: u32) -> Self {
        Self {
            producer,
            pending: Vec::new(),
            sample_rate,
            deferrals: 0,
        }
    }

    /// Deferred-delivery count since creation.
    pub fn deferrals(&self) -> u64 {
        self.deferrals
    }

    fn try_drain(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let written = self.producer.push_slice(&self.pending);
        self.pending.drain(..written);
        !self.pending.is_empty()
    }
}

impl PcmSink for RingBufferSink {
    fn deliver(&mut self, pcm: &[f32], frames: usize, channels: u16, gain: f32) -> DeliverOutcome {
        debug_assert_eq!(pcm.len(), frames * channels as usize);

        // Preserve ordering: earlier staged samples go first
        if gain == 1.0 {
            self.pending.extend_from_slice(pcm);
        } else {
            self.pending.extend(pcm.iter().map(|s| s * gain));
        }

        if self.try_drain() {
            self.deferrals += 1;
            trace!(staged = self.pending.len(), "ring buffer full, delivery deferred");
            DeliverOutcome::Deferred
        } else {
            DeliverOutcome::Accepted
        }
    }

    fn flush_pending(&mut self) -> bool {
        self.try_drain()
    }

    fn delay_ms(&self) -> u64 {
        // Interleaved stereo occupancy -> milliseconds of buffered audio
        let frames = (self.producer.occupied_len() / 2) as u64;
        if self.sample_rate == 0 {
            warn!("ring buffer sink has zero sample rate");
            return 0;
        }
        frames * 1000 / self.sample_rate as u64
    }
}
