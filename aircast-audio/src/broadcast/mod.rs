//! Broadcast-side sessions
//!
//! The encoder session turns canonical PCM into a live containerized
//! stream (Ogg or WebM) with in-band metadata and gapless reconfiguration
//! splices. Like the playback side it is tick-driven and never blocks.

pub mod encoder_session;
pub mod packet;
pub mod timeline;

/// Upstream provider of canonical interleaved PCM for encoding.
///
/// `pull` either hands back exactly `frames` frames or nothing; the
/// encoder never feeds its codec a short frame mid-stream.
pub trait PcmSource {
    /// Take `frames` frames of interleaved PCM, or `None` when that much
    /// is not available yet.
    fn pull(&mut self, frames: usize) -> Option<Vec<f32>>;
}
