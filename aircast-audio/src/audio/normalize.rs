//! Sample format normalization
//!
//! Converts engine-native decoded sample buffers into canonical interleaved
//! f32 PCM. Eight formats are supported: interleaved and planar variants of
//! 16-bit integer, 32-bit integer, 32-bit float, and 64-bit float, with one
//! or two channels. More than two channels is a hard rejection, never a
//! silent downmix.
//!
//! Conversion rules:
//! - i16 divides by 32768
//! - i32 divides by 1073741824
//! - f64 truncates to f32
//! - f32 copies verbatim

use crate::error::FormatError;

/// Native sample format of a decoded frame, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit integer
    S16,
    /// Planar signed 16-bit integer
    S16Planar,
    /// Interleaved signed 32-bit integer
    S32,
    /// Planar signed 32-bit integer
    S32Planar,
    /// Interleaved 32-bit float
    F32,
    /// Planar 32-bit float
    F32Planar,
    /// Interleaved 64-bit float
    F64,
    /// Planar 64-bit float
    F64Planar,
}

impl SampleFormat {
    /// Width of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            SampleFormat::S32 | SampleFormat::S32Planar => 4,
            SampleFormat::F32 | SampleFormat::F32Planar => 4,
            SampleFormat::F64 | SampleFormat::F64Planar => 8,
        }
    }

    /// Whether channels arrive in separate planes
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::S16Planar
                | SampleFormat::S32Planar
                | SampleFormat::F32Planar
                | SampleFormat::F64Planar
        )
    }
}

/// One decoded frame in engine-native layout.
///
/// Interleaved formats carry a single plane holding all channels;
/// planar formats carry one plane per channel.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Native sample format
    pub format: SampleFormat,
    /// Channel count
    pub channels: u16,
    /// Sample data planes (native byte order)
    pub planes: Vec<Vec<u8>>,
}

impl RawFrame {
    /// Frame count implied by the first plane's byte length.
    pub fn frame_count(&self) -> usize {
        let width = self.format.bytes_per_sample();
        let plane_samples = self.planes.first().map_or(0, |p| p.len() / width);
        if self.format.is_planar() {
            plane_samples
        } else {
            plane_samples / self.channels.max(1) as usize
        }
    }
}

/// Normalize one raw frame, appending interleaved canonical PCM to `out`.
///
/// Returns the number of frames appended. The output always interleaves
/// exactly `frame.channels` channels.
pub fn normalize(frame: &RawFrame, out: &mut Vec<f32>) -> Result<usize, FormatError> {
    let channels = frame.channels;
    if channels < 1 || channels > 2 {
        return Err(FormatError::UnsupportedChannelCount(channels));
    }

    if frame.format.is_planar() {
        let expected = channels as usize;
        if frame.planes.len() < expected {
            return Err(FormatError::MissingPlane {
                expected,
                got: frame.planes.len(),
            });
        }
        let width = frame.format.bytes_per_sample();
        let frames = frame.planes[0].len() / width;
        for plane in &frame.planes[..expected] {
            if plane.len() / width < frames {
                return Err(FormatError::ShortPlane);
            }
        }
        let planes: Vec<&[u8]> = frame.planes[..expected].iter().map(|p| p.as_slice()).collect();
        match frame.format {
            SampleFormat::S16Planar => interleave_planes(&planes, frames, out, s16_to_f32),
            SampleFormat::S32Planar => interleave_planes(&planes, frames, out, s32_to_f32),
            SampleFormat::F32Planar => interleave_planes(&planes, frames, out, f32_verbatim),
            SampleFormat::F64Planar => interleave_planes(&planes, frames, out, f64_to_f32),
            _ => unreachable!("interleaved format on planar path"),
        }
        Ok(frames)
    } else {
        let plane = frame.planes.first().map_or(&[][..], |p| p.as_slice());
        let width = frame.format.bytes_per_sample();
        let frames = plane.len() / (width * channels as usize);
        let samples = frames * channels as usize;
        match frame.format {
            SampleFormat::S16 => convert_plane(plane, width, samples, out, s16_to_f32),
            SampleFormat::S32 => convert_plane(plane, width, samples, out, s32_to_f32),
            SampleFormat::F32 => convert_plane(plane, width, samples, out, f32_verbatim),
            SampleFormat::F64 => convert_plane(plane, width, samples, out, f64_to_f32),
            _ => unreachable!("planar format on interleaved path"),
        }
        Ok(frames)
    }
}

fn s16_to_f32(bytes: &[u8]) -> f32 {
    i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
}

fn s32_to_f32(bytes: &[u8]) -> f32 {
    i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 1073741824.0
}

fn f32_verbatim(bytes: &[u8]) -> f32 {
    f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn f64_to_f32(bytes: &[u8]) -> f32 {
    f64::from_ne_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]) as f32
}

/// Convert `samples` interleaved samples from one plane.
fn convert_plane(
    plane: &[u8],
    width: usize,
    samples: usize,
    out: &mut Vec<f32>,
    conv: fn(&[u8]) -> f32,
) {
    out.reserve(samples);
    for chunk in plane.chunks_exact(width).take(samples) {
        out.push(conv(chunk));
    }
}

/// De-interleave per-channel planes into interleaved output.
fn interleave_planes(planes: &[&[u8]], frames: usize, out: &mut Vec<f32>, conv: fn(&[u8]) -> f32) {
    let channels = planes.len();
    let width = if frames == 0 { 1 } else { planes[0].len() / frames };
    out.reserve(frames * channels);
    for i in 0..frames {
        for plane in planes {
            out.push(conv(&plane[i * width..(i + 1) * width]));
        }
    }
}
