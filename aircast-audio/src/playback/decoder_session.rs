//! Decoder session
//!
//! Owns one open compressed-audio source and drives
//! read -> decode -> normalize -> (resample) -> deliver on each tick.
//!
//! The tick is the resumable unit of work: it never blocks, and every way
//! it can stop early (downstream backpressure, packet exhausted, decode
//! error) leaves the session state positioned so the next tick picks up
//! exactly where this one stopped. The pending-packet cursor in particular
//! survives a deferred delivery, so resumption re-enters the same packet
//! at the first unconsumed byte.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::normalize::normalize;
use crate::audio::resampler::{RateConverter, ResampleQuality};
use crate::engine::decode::{CodecInfo, DecodeEngine};
use crate::engine::engine_lock;
use crate::error::{Error, OpenError, Result};
use crate::playback::chapters::{Chapter, ChapterScanner};
use crate::playback::sink::{DeliverOutcome, MetadataSink, PcmSink};
use crate::playback::{Session, TickStatus};

/// Lead window applied when scanning for the chapter active at open, so a
/// chapter starting right at the seek point is still picked up.
const INITIAL_CHAPTER_LEAD_MS: u64 = 70;

/// Decoder session configuration supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Sample rate the downstream consumer runs at
    pub target_sample_rate: u32,
    /// Position to seek to before the first tick; 0.0 starts at the top
    pub seek_seconds: f64,
    /// Resampler quality, passed through unchanged
    pub resample_quality: ResampleQuality,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 44100,
            seek_seconds: 0.0,
            resample_quality: ResampleQuality::default(),
        }
    }
}

/// One in-flight packet and the cursor into its unconsumed bytes.
struct PendingPacket {
    data: Vec<u8>,
    offset: usize,
}

impl PendingPacket {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// Decode-and-normalize session for one compressed audio source.
pub struct DecoderSession<E: DecodeEngine, S: PcmSink, C: ChapterScanner, M: MetadataSink> {
    engine: E,
    source: Option<E::Source>,
    codec: Option<E::Codec>,
    stream: u32,
    info: CodecInfo,
    /// Delivered channel count, downmixed to 1 or 2
    channels: u16,
    target_rate: u32,
    pending: Option<PendingPacket>,
    /// Canonical-PCM scratch for the current frame
    scratch: Vec<f32>,
    /// Resampled output for the current frame
    converted: Vec<f32>,
    resampler: Option<RateConverter>,
    /// Seconds of audio still to discard after a seek into a glitchy codec
    drop_secs: f64,
    /// Mirrors downstream backpressure from the last delivery attempt
    deferred: bool,
    current_chapter: Option<Chapter>,
    scanner: C,
    metadata: M,
    sink: S,
    seek_ms: u64,
    delivered_frames: u64,
    closed: bool,
}

impl<E, S, C, M> DecoderSession<E, S, C, M>
where
    E: DecodeEngine,
    S: PcmSink,
    C: ChapterScanner,
    M: MetadataSink,
{
    /// Probe the source, select the best audio stream, open its codec, and
    /// seek to the configured start position.
    ///
    /// On failure every resource acquired up to that point is released;
    /// no partially constructed session escapes.
    pub fn open(
        engine: E,
        path: &Path,
        config: DecoderConfig,
        sink: S,
        mut scanner: C,
        mut metadata: M,
    ) -> std::result::Result<Self, OpenError> {
        let mut source = engine.open(path)?;

        let stream = match engine.find_best_audio_stream(&source) {
            Some(stream) => stream,
            None => {
                warn!(path = %path.display(), "cannot find an audio stream in the input");
                return Err(OpenError::NoAudioStream);
            }
        };

        let (mut codec, info) = {
            let _guard = engine_lock();
            engine.open_codec(&mut source, stream)?
        };

        // Downmix request: anything beyond stereo is delivered as 2
        let channels = if info.channels == 1 { 1 } else { 2 };

        let mut drop_secs = 0.0;
        if config.seek_seconds > 0.0 {
            // A failed seek starts playback from the top, like the original
            if let Err(e) = engine.seek(&mut source, &mut codec, config.seek_seconds) {
                warn!("seek failed, starting from the top: {e}");
            } else if let Some(warmup) = info.seek_warmup_secs {
                drop_secs = warmup;
                debug!("dropping {drop_secs:.2} seconds of audio after seek");
            }
        }

        let resampler = if info.sample_rate != config.target_sample_rate {
            match RateConverter::new(
                info.sample_rate,
                config.target_sample_rate,
                channels,
                config.resample_quality,
            ) {
                Ok(rc) => Some(rc),
                Err(e) => {
                    let _guard = engine_lock();
                    engine.close_codec(codec);
                    return Err(OpenError::AllocFailed(e.to_string()));
                }
            }
        } else {
            None
        };

        let seek_ms = (config.seek_seconds.max(0.0) * 1000.0) as u64;

        // Register the chapter already active at the start position
        let current_chapter = scanner.scan(seek_ms + INITIAL_CHAPTER_LEAD_MS);
        if let Some(chapter) = &current_chapter {
            metadata.notify(
                chapter.encoding,
                &chapter.artist,
                &chapter.title,
                &chapter.album,
                INITIAL_CHAPTER_LEAD_MS,
            );
        }

        debug!(stream, sample_rate = info.sample_rate, channels, "decoder session open");

        Ok(Self {
            engine,
            source: Some(source),
            codec: Some(codec),
            stream,
            info,
            channels,
            target_rate: config.target_sample_rate,
            pending: None,
            scratch: Vec::new(),
            converted: Vec::new(),
            resampler,
            drop_secs,
            deferred: false,
            current_chapter,
            scanner,
            metadata,
            sink,
            seek_ms,
            delivered_frames: 0,
            closed: false,
        })
    }

    /// Playback progress in milliseconds, seek offset included.
    pub fn progress_ms(&self) -> u64 {
        self.seek_ms + self.delivered_frames * 1000 / self.target_rate as u64
    }

    /// Total frames delivered downstream so far.
    pub fn delivered_frames(&self) -> u64 {
        self.delivered_frames
    }

    /// Native properties of the opened stream.
    pub fn codec_info(&self) -> &CodecInfo {
        &self.info
    }

    /// Chapter currently associated with the playback position.
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.current_chapter.as_ref()
    }

    /// Perform one bounded unit of decode work.
    ///
    /// Fatal errors tear the session down before propagating; `Ejecting`
    /// means the source is exhausted and the session should be closed.
    pub fn tick(&mut self) -> Result<TickStatus> {
        match self.tick_inner() {
            Ok(status) => Ok(status),
            Err(e) => {
                // Every fatal path funnels through the one teardown routine
                self.close();
                Err(e)
            }
        }
    }

    fn tick_inner(&mut self) -> Result<TickStatus> {
        if self.closed {
            return Ok(TickStatus::Ejecting);
        }

        // A deferred delivery from the previous tick gets first claim on
        // downstream space; no new decode work until it lands.
        if self.deferred {
            if self.sink.flush_pending() {
                return Ok(TickStatus::Continue);
            }
            self.deferred = false;
        }

        if self.pending.is_none() {
            let source = self
                .source
                .as_mut()
                .ok_or_else(|| Error::InvalidState("tick on torn-down session".into()))?;
            match self.engine.read_packet(source) {
                None => return self.finish_stream(),
                Some(packet) if packet.data.is_empty() => return self.finish_stream(),
                Some(packet) if packet.stream != self.stream => {
                    // Not our stream; drop the whole packet
                    return Ok(TickStatus::Continue);
                }
                Some(packet) => {
                    self.pending = Some(PendingPacket {
                        data: packet.data,
                        offset: 0,
                    });
                }
            }
        }

        let mut packet = match self.pending.take() {
            Some(packet) => packet,
            None => return Ok(TickStatus::Continue),
        };

        let mut consumed_fully = false;
        while packet.remaining() > 0 && !self.deferred {
            let codec = self
                .codec
                .as_mut()
                .ok_or_else(|| Error::InvalidState("tick without codec".into()))?;

            let step = {
                let _guard = engine_lock();
                self.engine.decode(codec, &packet.data[packet.offset..])
            };

            let step = match step {
                Ok(step) => step,
                Err(e) => {
                    // Recoverable at packet granularity: abandon this
                    // packet, keep the session alive
                    warn!("error during decode, skipping packet: {e}");
                    return Ok(TickStatus::Continue);
                }
            };

            // An engine over-reporting consumption must not push the
            // cursor past the packet
            packet.offset = (packet.offset + step.consumed).min(packet.data.len());

            let produced = match step.frame {
                Some(frame) => {
                    self.handle_frame_pcm(&frame)?;
                    true
                }
                None => false,
            };

            if step.consumed == 0 && !produced {
                // Engine made no progress; abandon the packet to avoid a
                // stalled tick loop
                warn!("decoder consumed nothing and produced nothing, dropping packet");
                return Ok(TickStatus::Continue);
            }
        }

        if packet.remaining() == 0 {
            consumed_fully = true;
        } else {
            // Deferred mid-packet: preserve the cursor for resumption
            self.pending = Some(packet);
        }

        if consumed_fully {
            self.scan_chapter_boundary();
        }

        Ok(TickStatus::Continue)
    }

    /// Normalize one decoded frame, resample if active, and apply the
    /// drop-budget/delivery policy.
    fn handle_frame_pcm(&mut self, frame: &crate::audio::normalize::RawFrame) -> Result<()> {
        self.scratch.clear();
        normalize(frame, &mut self.scratch)?;

        let frames = if let Some(rc) = self.resampler.as_mut() {
            self.converted = rc.push(&self.scratch)?;
            self.converted.len() / self.channels as usize
        } else {
            std::mem::swap(&mut self.converted, &mut self.scratch);
            self.converted.len() / self.channels as usize
        };

        if frames == 0 {
            return Ok(());
        }

        if self.drop_secs > 0.0 {
            // Post-seek warm-up: discard contiguous leading audio only
            self.drop_secs -= frames as f64 / self.target_rate as f64;
            return Ok(());
        }

        self.delivered_frames += frames as u64;
        match self.sink.deliver(&self.converted, frames, self.channels, 1.0) {
            DeliverOutcome::Accepted => {}
            DeliverOutcome::Deferred => self.deferred = true,
        }
        Ok(())
    }

    /// End of source: flush the resampler tail, deliver it, and eject.
    fn finish_stream(&mut self) -> Result<TickStatus> {
        if let Some(rc) = self.resampler.as_mut() {
            let out = rc.flush()?;
            let frames = out.len() / self.channels as usize;
            if frames > 0 {
                self.delivered_frames += frames as u64;
                // The sink stages anything that does not fit; nothing to
                // resume here since the stream is over
                let _ = self.sink.deliver(&out, frames, self.channels, 1.0);
            }
        }
        debug!("end of source reached");
        Ok(TickStatus::Ejecting)
    }

    /// At a packet boundary, ask the scanner whether the chapter changed at
    /// the position the listener will actually hear next.
    fn scan_chapter_boundary(&mut self) {
        let delay = self.sink.delay_ms();
        let position = self.progress_ms() + delay;
        if let Some(chapter) = self.scanner.scan(position) {
            if self.current_chapter.as_ref() != Some(&chapter) {
                self.metadata.notify(
                    chapter.encoding,
                    &chapter.artist,
                    &chapter.title,
                    &chapter.album,
                    delay,
                );
                self.current_chapter = Some(chapter);
            }
        }
    }

    /// Release everything in reverse-acquisition order. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending = None;
        self.resampler = None;
        self.scratch = Vec::new();
        self.converted = Vec::new();
        if let Some(codec) = self.codec.take() {
            let _guard = engine_lock();
            self.engine.close_codec(codec);
        }
        self.source = None;
        debug!("decoder session closed");
    }

    /// Access the sink, e.g. to drain staged samples after ejection.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<E, S, C, M> Session for DecoderSession<E, S, C, M>
where
    E: DecodeEngine,
    S: PcmSink,
    C: ChapterScanner,
    M: MetadataSink,
{
    fn tick(&mut self) -> Result<TickStatus> {
        DecoderSession::tick(self)
    }

    fn close(&mut self) {
        DecoderSession::close(self)
    }
}

impl<E, S, C, M> Drop for DecoderSession<E, S, C, M>
where
    E: DecodeEngine,
    S: PcmSink,
    C: ChapterScanner,
    M: MetadataSink,
{
    fn drop(&mut self) {
        self.close();
    }
}
