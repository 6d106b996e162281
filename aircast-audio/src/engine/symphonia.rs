//! Symphonia-backed decode engine
//!
//! Implements [`DecodeEngine`] over symphonia's probe/format/decoder stack
//! (MP3, FLAC, AAC, Vorbis, WAV/PCM and friends).
//!
//! Decoded buffers are handed over planar. 16-bit and float buffers pass
//! through in their native format; everything else (8-bit, 24-bit and
//! full-scale 32-bit integer variants) is converted to f32 here, because
//! the normalizer's integer rules target engines whose 32-bit samples are
//! 2^30-scaled rather than symphonia's full-scale 2^31.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader, Packet as FormatPacket, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, trace};

use crate::audio::normalize::{RawFrame, SampleFormat};
use crate::engine::decode::{
    CodecInfo, DecodeEngine, DecodeStep, Packet, GLITCHY_SEEK_WARMUP_SECS,
};
use crate::error::{EngineError, OpenError};

/// Decode engine backed by symphonia's default probe and codec registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaEngine;

/// Demuxer state for one probed source.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
}

/// Decoder state for one selected track.
pub struct SymphoniaCodec {
    inner: Box<dyn Decoder>,
    track_id: u32,
}

impl DecodeEngine for SymphoniaEngine {
    type Source = SymphoniaSource;
    type Codec = SymphoniaCodec;

    fn open(&self, path: &Path) -> Result<SymphoniaSource, OpenError> {
        let file = File::open(path)
            .map_err(|e| OpenError::NotFound(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| OpenError::CodecOpenFailed(format!("failed to probe format: {e}")))?;

        debug!(path = %path.display(), "opened source");
        Ok(SymphoniaSource {
            format: probed.format,
        })
    }

    fn find_best_audio_stream(&self, source: &SymphoniaSource) -> Option<u32> {
        // Prefer the container's default track when it is decodable
        if let Some(track) = source.format.default_track() {
            if track.codec_params.codec != CODEC_TYPE_NULL {
                return Some(track.id);
            }
        }
        source
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|t| t.id)
    }

    fn open_codec(
        &self,
        source: &mut SymphoniaSource,
        stream: u32,
    ) -> Result<(SymphoniaCodec, CodecInfo), OpenError> {
        let track = source
            .format
            .tracks()
            .iter()
            .find(|t| t.id == stream)
            .ok_or(OpenError::NoAudioStream)?;
        let params = track.codec_params.clone();

        let inner = get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| OpenError::CodecOpenFailed(e.to_string()))?;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| OpenError::CodecOpenFailed("sample rate not found".into()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| OpenError::CodecOpenFailed("channel count not found".into()))?;

        // AAC frames depend on their predecessors, so a mid-stream entry
        // decodes garbage until the filter bank settles
        let seek_warmup_secs = if params.codec == CODEC_TYPE_AAC {
            Some(GLITCHY_SEEK_WARMUP_SECS)
        } else {
            None
        };

        let info = CodecInfo {
            sample_rate,
            channels,
            seek_warmup_secs,
        };
        debug!(stream, sample_rate, channels, "opened codec");
        Ok((SymphoniaCodec { inner, track_id: stream }, info))
    }

    fn read_packet(&self, source: &mut SymphoniaSource) -> Option<Packet> {
        match source.format.next_packet() {
            Ok(packet) => Some(Packet {
                stream: packet.track_id(),
                data: packet.buf().to_vec(),
            }),
            Err(e) => {
                // End of stream and unrecoverable read errors end the session
                trace!("end of packets: {e}");
                None
            }
        }
    }

    fn decode(&self, codec: &mut SymphoniaCodec, data: &[u8]) -> Result<DecodeStep, EngineError> {
        let packet = FormatPacket::new_from_slice(codec.track_id, 0, 0, data);
        let decoded = codec
            .inner
            .decode(&packet)
            .map_err(|e| EngineError(format!("decode failed: {e}")))?;

        Ok(DecodeStep {
            // symphonia consumes whole packets per decode call
            consumed: data.len(),
            frame: Some(raw_frame_from(&decoded)),
        })
    }

    fn seek(
        &self,
        source: &mut SymphoniaSource,
        codec: &mut SymphoniaCodec,
        seconds: f64,
    ) -> Result<(), EngineError> {
        source
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: seconds.into(),
                    track_id: None,
                },
            )
            .map_err(|e| EngineError(format!("seek failed: {e}")))?;
        // Decoder state is position-dependent and must restart clean
        codec.inner.reset();
        Ok(())
    }

    fn close_codec(&self, codec: SymphoniaCodec) {
        drop(codec);
    }
}

/// Convert a decoded symphonia buffer into an engine-native raw frame.
///
/// Sources with more than two channels are folded to their front pair;
/// surround mixing belongs to a dedicated downmix stage, not a decoder.
fn raw_frame_from(decoded: &AudioBufferRef) -> RawFrame {
    match decoded {
        AudioBufferRef::S16(buf) => planar_native(buf.spec().channels.count(), SampleFormat::S16Planar, |ch| {
            buf.chan(ch).iter().flat_map(|s| s.to_ne_bytes()).collect()
        }),
        AudioBufferRef::F32(buf) => planar_native(buf.spec().channels.count(), SampleFormat::F32Planar, |ch| {
            buf.chan(ch).iter().flat_map(|s| s.to_ne_bytes()).collect()
        }),
        AudioBufferRef::F64(buf) => planar_native(buf.spec().channels.count(), SampleFormat::F64Planar, |ch| {
            buf.chan(ch).iter().flat_map(|s| s.to_ne_bytes()).collect()
        }),
        AudioBufferRef::S32(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch).iter().map(|s| *s as f32 / i32::MAX as f32).collect()
        }),
        AudioBufferRef::S24(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch).iter().map(|s| s.inner() as f32 / 8388608.0).collect()
        }),
        AudioBufferRef::U24(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch)
                .iter()
                .map(|s| (s.inner() as i32 - 8388608) as f32 / 8388608.0)
                .collect()
        }),
        AudioBufferRef::U32(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch)
                .iter()
                .map(|s| (*s as i64 - 2147483648) as f32 / 2147483648.0)
                .collect()
        }),
        AudioBufferRef::U16(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch)
                .iter()
                .map(|s| (*s as i32 - 32768) as f32 / 32768.0)
                .collect()
        }),
        AudioBufferRef::U8(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch)
                .iter()
                .map(|s| (*s as i32 - 128) as f32 / 128.0)
                .collect()
        }),
        AudioBufferRef::S8(buf) => planar_f32(buf.spec().channels.count(), |ch| {
            buf.chan(ch).iter().map(|s| *s as f32 / i8::MAX as f32).collect()
        }),
    }
}

fn planar_native(
    channels: usize,
    format: SampleFormat,
    plane_bytes: impl Fn(usize) -> Vec<u8>,
) -> RawFrame {
    let kept = channels.min(2);
    RawFrame {
        format,
        channels: kept as u16,
        planes: (0..kept).map(plane_bytes).collect(),
    }
}

fn planar_f32(channels: usize, plane_samples: impl Fn(usize) -> Vec<f32>) -> RawFrame {
    let kept = channels.min(2);
    RawFrame {
        format: SampleFormat::F32Planar,
        channels: kept as u16,
        planes: (0..kept)
            .map(|ch| {
                plane_samples(ch)
                    .into_iter()
                    .flat_map(f32::to_ne_bytes)
                    .collect()
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalize::normalize;
    use std::borrow::Cow;
    use symphonia::core::audio::{AudioBuffer, Channels, SignalSpec};

    fn stereo_spec() -> SignalSpec {
        SignalSpec::new(44100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT)
    }

    fn pcm_of(frame: &RawFrame) -> Vec<f32> {
        let mut out = Vec::new();
        normalize(frame, &mut out).unwrap();
        out
    }

    #[test]
    fn test_u32_silence_normalizes_to_zero() {
        let mut buf = AudioBuffer::<u32>::new(2, stereo_spec());
        buf.render_reserved(Some(2));
        buf.chan_mut(0).fill(0x8000_0000);
        buf.chan_mut(1).fill(0x8000_0000);

        let frame = raw_frame_from(&AudioBufferRef::U32(Cow::Owned(buf)));
        for sample in pcm_of(&frame) {
            assert!(sample.abs() < 1e-6, "unsigned midpoint must be silence, got {sample}");
        }
    }

    #[test]
    fn test_u32_extremes_map_to_full_scale() {
        let mut buf = AudioBuffer::<u32>::new(1, stereo_spec());
        buf.render_reserved(Some(1));
        buf.chan_mut(0).fill(0);
        buf.chan_mut(1).fill(u32::MAX);

        let pcm = pcm_of(&raw_frame_from(&AudioBufferRef::U32(Cow::Owned(buf))));
        assert!((pcm[0] + 1.0).abs() < 1e-6, "minimum must be -1.0, got {}", pcm[0]);
        assert!((pcm[1] - 1.0).abs() < 1e-6, "maximum must be ~1.0, got {}", pcm[1]);
    }

    #[test]
    fn test_u16_and_u8_midpoints_are_silence() {
        let mut buf = AudioBuffer::<u16>::new(1, stereo_spec());
        buf.render_reserved(Some(1));
        buf.chan_mut(0).fill(32768);
        buf.chan_mut(1).fill(32768);
        for sample in pcm_of(&raw_frame_from(&AudioBufferRef::U16(Cow::Owned(buf)))) {
            assert_eq!(sample, 0.0);
        }

        let mut buf = AudioBuffer::<u8>::new(1, stereo_spec());
        buf.render_reserved(Some(1));
        buf.chan_mut(0).fill(128);
        buf.chan_mut(1).fill(128);
        for sample in pcm_of(&raw_frame_from(&AudioBufferRef::U8(Cow::Owned(buf)))) {
            assert_eq!(sample, 0.0);
        }
    }
}
