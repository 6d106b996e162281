//! Decode engine contract
//!
//! A [`DecodeEngine`] turns a compressed audio source into packets and
//! decoded raw frames. The decoder session drives it one packet and one
//! decode unit at a time; the engine never sees session policy (seek drop,
//! backpressure, chapters) and the session never sees bitstream details.
//!
//! Calls marked below as engine-global must run under
//! [`crate::engine::engine_lock`]; the session takes the lock, not
//! implementations.

use std::path::Path;

use crate::audio::normalize::RawFrame;
use crate::error::{EngineError, OpenError};

/// Warm-up discard engines should advertise for codecs that glitch when
/// entered mid-stream (frame-interdependent formats like WMA or AAC).
pub const GLITCHY_SEEK_WARMUP_SECS: f64 = 1.6;

/// One compressed packet read from the source.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Source stream the packet belongs to
    pub stream: u32,
    /// Compressed payload; empty data signals end of source
    pub data: Vec<u8>,
}

/// Static properties of an opened codec.
#[derive(Debug, Clone, Copy)]
pub struct CodecInfo {
    /// Native sample rate of the stream
    pub sample_rate: u32,
    /// Native channel count (the session downmixes to 1 or 2)
    pub channels: u16,
    /// Warm-up audio to discard after a seek, for codecs that produce
    /// transient glitches when entered mid-stream. `None` for clean
    /// codecs; glitchy ones advertise [`GLITCHY_SEEK_WARMUP_SECS`].
    pub seek_warmup_secs: Option<f64>,
}

/// Result of decoding one unit from a packet's remaining bytes.
#[derive(Debug)]
pub struct DecodeStep {
    /// Bytes of input consumed by this call
    pub consumed: usize,
    /// Decoded frame, if this unit produced one
    pub frame: Option<RawFrame>,
}

/// Compressed-audio decode engine.
///
/// `Source` owns demuxer state for one open file; `Codec` owns decoder
/// state for one selected stream. Both are released through the session's
/// teardown in reverse-acquisition order.
pub trait DecodeEngine {
    /// Demuxer handle for one open source
    type Source;
    /// Decoder handle for one open stream
    type Codec;

    /// Open and probe a source.
    fn open(&self, path: &Path) -> Result<Self::Source, OpenError>;

    /// Pick the best audio stream, if the source has one.
    fn find_best_audio_stream(&self, source: &Self::Source) -> Option<u32>;

    /// Open a codec for the selected stream. Engine-global.
    fn open_codec(
        &self,
        source: &mut Self::Source,
        stream: u32,
    ) -> Result<(Self::Codec, CodecInfo), OpenError>;

    /// Read the next packet in source order. `None` means end of source;
    /// read failures are treated the same way.
    fn read_packet(&self, source: &mut Self::Source) -> Option<Packet>;

    /// Decode one unit from the packet bytes. Engine-global.
    ///
    /// An `Err` aborts the current packet only; the session continues with
    /// the next one.
    fn decode(&self, codec: &mut Self::Codec, data: &[u8]) -> Result<DecodeStep, EngineError>;

    /// Seek the source to an absolute position in seconds and reset any
    /// decoder state that depends on stream position.
    fn seek(
        &self,
        source: &mut Self::Source,
        codec: &mut Self::Codec,
        seconds: f64,
    ) -> Result<(), EngineError>;

    /// Release a codec handle. Engine-global.
    fn close_codec(&self, codec: Self::Codec);
}
