//! Rate conversion using rubato
//!
//! Streaming adapter around a quality-configurable rubato resampler.
//! rubato processes fixed-size chunks, so the adapter keeps a per-channel
//! FIFO: pushes of arbitrary size accumulate until a full chunk is
//! available. `flush` signals end of input, pads the FIFO remainder out to
//! a final chunk, and trims the result so the stream total stays at
//! input frames x (target / source) within rounding.
//!
//! Created lazily by the owning session the first time the source rate is
//! observed to differ from the target rate; a conversion failure is fatal
//! to that session.

use crate::error::ConversionError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input frames fed to the resampler per process call
const CHUNK_FRAMES: usize = 1024;

/// Resampling quality, passed through from the caller's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleQuality {
    /// Linear interpolation, cheapest
    Fastest,
    /// Cubic interpolation
    #[default]
    Medium,
    /// Septic interpolation, highest quality
    Best,
}

impl ResampleQuality {
    fn degree(self) -> PolynomialDegree {
        match self {
            ResampleQuality::Fastest => PolynomialDegree::Linear,
            ResampleQuality::Medium => PolynomialDegree::Cubic,
            ResampleQuality::Best => PolynomialDegree::Septic,
        }
    }
}

/// Streaming sample-rate converter for canonical interleaved PCM.
pub struct RateConverter {
    inner: FastFixedIn<f32>,
    channels: usize,
    ratio: f64,
    /// Per-channel input FIFO awaiting a full chunk
    pending: Vec<Vec<f32>>,
    /// Real (unpadded) input frames accepted so far
    frames_in: u64,
    /// Converted frames emitted so far
    frames_out: u64,
}

impl RateConverter {
    /// Create a converter between two rates.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: u16,
        quality: ResampleQuality,
    ) -> Result<Self, ConversionError> {
        debug!(
            source_rate,
            target_rate,
            ?quality,
            channels,
            "configuring resampler"
        );
        let ratio = target_rate as f64 / source_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            quality.degree(),
            CHUNK_FRAMES,
            channels as usize,
        )
        .map_err(|e| ConversionError(format!("failed to create resampler: {e}")))?;

        Ok(Self {
            inner,
            channels: channels as usize,
            ratio,
            pending: vec![Vec::new(); channels as usize],
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Push interleaved canonical PCM, returning whatever converted output
    /// became available.
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, ConversionError> {
        self.stage(interleaved);

        let mut out_planar: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();
            let processed = self
                .inner
                .process(&chunk, None)
                .map_err(|e| ConversionError(format!("resampling failed: {e}")))?;
            self.frames_out += processed[0].len() as u64;
            append_planar(&mut out_planar, processed);
        }

        Ok(interleave(out_planar))
    }

    /// Signal end of input with zero new frames and drain the remainder.
    ///
    /// The FIFO tail is padded out to one final chunk and the converted
    /// result trimmed so the cumulative output count lands on
    /// `frames_in x ratio`.
    pub fn flush(&mut self) -> Result<Vec<f32>, ConversionError> {
        let remainder = self.pending[0].len();
        if remainder == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|ch| {
                let mut plane = std::mem::take(ch);
                plane.resize(CHUNK_FRAMES, 0.0);
                plane
            })
            .collect();
        let mut processed = self
            .inner
            .process(&chunk, None)
            .map_err(|e| ConversionError(format!("resampler flush failed: {e}")))?;

        let expected_total = (self.frames_in as f64 * self.ratio).round() as u64;
        let wanted = expected_total.saturating_sub(self.frames_out) as usize;
        for plane in processed.iter_mut() {
            plane.truncate(wanted);
        }
        self.frames_out += processed[0].len() as u64;

        let mut out_planar: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        append_planar(&mut out_planar, processed);
        Ok(interleave(out_planar))
    }

    /// Frames currently buffered and not yet converted.
    pub fn pending_frames(&self) -> usize {
        self.pending[0].len()
    }

    fn stage(&mut self, interleaved: &[f32]) {
        let frames = interleaved.len() / self.channels;
        self.frames_in += frames as u64;
        for ch in 0..self.channels {
            self.pending[ch].reserve(frames);
        }
        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.pending[ch].push(*sample);
            }
        }
    }
}

fn append_planar(out: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(produced) {
        dst.extend(src);
    }
}

/// Convert planar samples to interleaved format.
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }

    let num_channels = planar.len();
    let num_frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for channel in planar.iter() {
            interleaved.push(channel[frame_idx]);
        }
    }

    interleaved
}
