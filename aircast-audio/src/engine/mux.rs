//! Mux engine contract
//!
//! A [`MuxEngine`] packages encoded audio into a streamable container.
//! The live encoder session drives it segment by segment: header, encoded
//! packets, trailer. Container byte layout is entirely the engine's
//! concern; the session only moves the produced bytes to its packet sink.

use crate::broadcast::packet::ContainerKind;
use crate::error::{EngineError, OpenError};

/// Parameters for the audio stream added to a container.
#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    /// Target bit rate in bits per second
    pub bit_rate: u32,
    /// Codec sample rate
    pub sample_rate: u32,
    /// Channel count, 1 or 2
    pub channels: u16,
}

/// Frame geometry the opened codec requires.
#[derive(Debug, Clone, Copy)]
pub struct CodecFrameInfo {
    /// Frames of PCM consumed per encode call
    pub frame_size: usize,
    /// Sample rate the codec actually runs at
    pub sample_rate: u32,
}

/// Container muxing and encoding engine.
///
/// One `Container` holds the mux context, the added audio stream, and its
/// codec for a single segment; a splice tears the whole thing down and
/// builds a fresh one.
pub trait MuxEngine {
    /// Mux context for one container segment
    type Container;

    /// Allocate a container of the given kind.
    fn new_container(&self, kind: ContainerKind) -> Result<Self::Container, OpenError>;

    /// Add the single audio stream.
    fn add_audio_stream(
        &self,
        container: &mut Self::Container,
        params: &EncoderParams,
    ) -> Result<(), OpenError>;

    /// Open the stream's codec. Engine-global; run under
    /// [`crate::engine::engine_lock`] by the caller.
    fn open_codec(&self, container: &mut Self::Container) -> Result<CodecFrameInfo, OpenError>;

    /// Write the container header, returning the header bytes.
    fn write_header(&self, container: &mut Self::Container) -> Result<Vec<u8>, EngineError>;

    /// Encode exactly one frame of interleaved canonical PCM. Engine-global.
    ///
    /// `None` means the codec buffered the input without producing a packet.
    fn encode(
        &self,
        container: &mut Self::Container,
        pcm: &[f32],
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// Mux one encoded packet, returning the container bytes it produced.
    fn write_packet(
        &self,
        container: &mut Self::Container,
        packet: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    /// Finalize the segment, returning the trailer bytes.
    fn write_trailer(&self, container: &mut Self::Container) -> Result<Vec<u8>, EngineError>;

    /// Release the codec and container. Engine-global.
    fn close_container(&self, container: Self::Container);
}
