//! # Aircast Audio Core (aircast-audio)
//!
//! Decode-and-broadcast pipeline for a live audio streamer.
//!
//! **Purpose:** Decode compressed audio sources into canonical PCM
//! (interleaved f32, mono or stereo, at the consumer's rate) and encode
//! canonical PCM into live containerized streams with gapless
//! reconfiguration splices.
//!
//! **Architecture:** Tick-driven sessions over pluggable engines.
//! [`playback::decoder_session::DecoderSession`] runs packet -> decode ->
//! normalize -> resample -> deliver with non-blocking backpressure;
//! [`broadcast::encoder_session::EncoderSession`] runs the
//! Starting/Running/Stopping/Stopped container lifecycle. Decoding is
//! backed by symphonia, rate conversion by rubato, PCM hand-off by a
//! lock-free ring buffer.

pub mod audio;
pub mod broadcast;
pub mod engine;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
