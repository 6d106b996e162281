//! Stream packets
//!
//! Every packet leaving an encoder session carries a self-describing
//! header so consumers (network senders, recorders) can act on stream
//! structure without parsing container bytes.

use serde::{Deserialize, Serialize};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Ogg,
    Webm,
}

/// Structural role of one packet within the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// Container header bytes (start of a segment)
    pub is_header: bool,
    /// First header of a brand-new stream, not a splice
    pub is_initial: bool,
    /// Trailer bytes closing a segment
    pub is_final: bool,
    /// In-band metadata rather than audio
    pub is_metadata: bool,
    /// Produced by the suppressed sibling; not for the wire
    pub is_suppressed: bool,
}

/// Header stamped onto every emitted packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketHeader {
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub flags: PacketFlags,
    pub container: ContainerKind,
    /// Payload size in bytes
    pub data_size: usize,
    /// Segment serial; bumps once per header written
    pub serial: u32,
    /// Presentation timestamp in seconds from stream start
    pub timestamp: f64,
}

/// Consumer of stamped packets.
pub trait PacketSink {
    fn send(&mut self, header: &PacketHeader, data: &[u8]);
}

/// Sink for the suppressed sibling session; drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPacketSink;

impl PacketSink for NullPacketSink {
    fn send(&mut self, _header: &PacketHeader, _data: &[u8]) {}
}
