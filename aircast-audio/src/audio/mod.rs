//! Canonical PCM processing
//!
//! Everything downstream of the decode engine speaks one representation:
//! interleaved 32-bit float samples, one or two channels. [`normalize`]
//! gets engine-native buffers into that form; [`resampler`] moves it
//! between sample rates.

pub mod normalize;
pub mod resampler;

pub use normalize::{normalize, RawFrame, SampleFormat};
pub use resampler::{RateConverter, ResampleQuality};
