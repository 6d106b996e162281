//! Live encoder session
//!
//! A state machine (`Starting -> Running -> Stopping -> Stopped`) that
//! pulls canonical PCM, encodes it, and emits containerized packets with
//! self-describing headers. Reconfiguration never interrupts the stream:
//! a metadata change or an explicit flush splices the container (trailer
//! immediately followed by a fresh header, serial bumped) so downstream
//! players resynchronize without a dropout.
//!
//! Sessions run in sibling pairs sharing one [`Timeline`]: the data-role
//! session owns the sample clock and marks its output suppressed, the
//! metadata-role session emits the live packets. [`EncoderPair`] keeps the
//! two in lockstep from a single control snapshot per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::resampler::{RateConverter, ResampleQuality};
use crate::broadcast::packet::{ContainerKind, PacketFlags, PacketHeader, PacketSink};
use crate::broadcast::timeline::Timeline;
use crate::broadcast::PcmSource;
use crate::engine::engine_lock;
use crate::engine::mux::{CodecFrameInfo, EncoderParams, MuxEngine};
use crate::error::{Error, Result};
use crate::playback::{Session, TickStatus};

/// Lifecycle phase of one encoder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Container and codec being brought up
    Starting,
    /// Encoding audio
    Running,
    /// Tearing the container down
    Stopping,
    /// Fully released; waits for a run request
    Stopped,
}

/// Whether this session's packets are meant for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionPolicy {
    /// Data-role sibling: packets flagged suppressed
    Suppressed,
    /// Metadata-role sibling or standalone session: packets go out live
    Live,
}

/// Stream tags baked into headers and broadcast in-band on change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub artist: String,
    pub title: String,
    pub album: String,
    /// Free-form override line shown ahead of the structured fields
    pub custom: String,
}

impl StreamMetadata {
    /// In-band wire form: newline-separated fields, NUL terminated.
    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.custom.len() + self.artist.len() + self.title.len() + self.album.len() + 4,
        );
        out.extend_from_slice(self.custom.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.artist.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.title.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.album.as_bytes());
        out.push(0);
        out
    }
}

/// Static encode parameters for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub container: ContainerKind,
    pub bit_rate: u32,
    /// Rate the codec runs at
    pub sample_rate: u32,
    /// Rate the PCM source delivers at
    pub source_sample_rate: u32,
    pub channels: u16,
    pub resample_quality: ResampleQuality,
}

/// Control surface shared between the host and a session (or pair).
///
/// Requests are latched here and consumed by the next tick's snapshot, so
/// a pair applies each request to both siblings in the same tick.
#[derive(Debug, Default)]
pub struct EncoderControls {
    run: AtomicBool,
    flush: AtomicBool,
    metadata: Mutex<Option<StreamMetadata>>,
}

impl EncoderControls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Assert or deassert the run request.
    pub fn request_run(&self, run: bool) {
        self.run.store(run, Ordering::Release);
    }

    /// Ask for a container splice at the next opportunity.
    pub fn request_flush(&self) {
        self.flush.store(true, Ordering::Release);
    }

    /// Replace the stream tags; triggers a splice plus an in-band
    /// metadata packet on running sessions.
    pub fn set_metadata(&self, metadata: StreamMetadata) {
        if let Ok(mut slot) = self.metadata.lock() {
            *slot = Some(metadata);
        }
    }

    /// Consume the latched requests into one immutable snapshot.
    pub fn snapshot(&self) -> TickInputs {
        let metadata = match self.metadata.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        TickInputs {
            run: self.run.load(Ordering::Acquire),
            flush: self.flush.swap(false, Ordering::AcqRel),
            metadata,
        }
    }
}

/// One tick's worth of control state, identical for both siblings.
#[derive(Debug, Clone, Default)]
pub struct TickInputs {
    pub run: bool,
    pub flush: bool,
    pub metadata: Option<StreamMetadata>,
}

/// Tick-driven encoder for one containerized output.
pub struct EncoderSession<M: MuxEngine, P: PcmSource, K: PacketSink> {
    engine: M,
    source: P,
    sink: K,
    policy: EmissionPolicy,
    cfg: EncoderConfig,
    controls: Arc<EncoderControls>,
    timeline: Arc<Timeline>,
    /// Only the clock owner advances and resets the shared timeline
    clock_owner: bool,
    state: EncoderState,
    container: Option<M::Container>,
    frame_info: Option<CodecFrameInfo>,
    /// Segment serial; bumps every time a header is written
    serial: u32,
    /// Next header starts a brand-new stream rather than a splice
    initial_pending: bool,
    tags: StreamMetadata,
    resampler: Option<RateConverter>,
    /// Interleaved PCM at codec rate awaiting a full codec frame
    staged: Vec<f32>,
}

impl<M: MuxEngine, P: PcmSource, K: PacketSink> EncoderSession<M, P, K> {
    pub fn new(
        engine: M,
        cfg: EncoderConfig,
        source: P,
        sink: K,
        policy: EmissionPolicy,
        controls: Arc<EncoderControls>,
        timeline: Arc<Timeline>,
        clock_owner: bool,
    ) -> Self {
        Self {
            engine,
            source,
            sink,
            policy,
            cfg,
            controls,
            timeline,
            clock_owner,
            state: EncoderState::Stopped,
            container: None,
            frame_info: None,
            serial: 0,
            initial_pending: true,
            tags: StreamMetadata::default(),
            resampler: None,
            staged: Vec::new(),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Drive one tick from an explicit control snapshot. Pairs use this so
    /// both siblings see identical inputs.
    pub fn tick_with(&mut self, inputs: &TickInputs) -> Result<TickStatus> {
        // Tag updates land immediately; running sessions additionally
        // splice below so the new tags reach listeners
        let metadata_changed = if let Some(metadata) = &inputs.metadata {
            let changed = *metadata != self.tags;
            self.tags = metadata.clone();
            changed
        } else {
            false
        };

        match self.state {
            EncoderState::Stopped => {
                if inputs.run {
                    self.state = EncoderState::Starting;
                    Ok(TickStatus::Continue)
                } else {
                    Ok(TickStatus::Ejecting)
                }
            }
            EncoderState::Starting => match self.start_segment() {
                Ok(()) => {
                    self.state = EncoderState::Running;
                    Ok(TickStatus::Continue)
                }
                Err(e) => {
                    self.close();
                    Err(e)
                }
            },
            EncoderState::Running => {
                if !inputs.run {
                    self.finish_segment(true);
                    self.state = EncoderState::Stopping;
                    return Ok(TickStatus::Continue);
                }
                if inputs.flush || metadata_changed {
                    if let Err(e) = self.splice() {
                        warn!("splice failed, shutting the stream down: {e}");
                        self.state = EncoderState::Stopping;
                        return Ok(TickStatus::Continue);
                    }
                    if metadata_changed {
                        self.emit_metadata_packet();
                    }
                    return Ok(TickStatus::Continue);
                }
                match self.encode_step() {
                    // A starved source is not an error; try again next tick
                    Ok(_) => Ok(TickStatus::Continue),
                    Err(e) => {
                        warn!("encode failed, shutting the stream down: {e}");
                        self.finish_segment(true);
                        self.state = EncoderState::Stopping;
                        Ok(TickStatus::Continue)
                    }
                }
            }
            EncoderState::Stopping => {
                self.teardown();
                if inputs.run {
                    self.state = EncoderState::Starting;
                    Ok(TickStatus::Continue)
                } else {
                    self.state = EncoderState::Stopped;
                    Ok(TickStatus::Ejecting)
                }
            }
        }
    }

    /// Bring up a container, codec, and header for a new segment.
    fn start_segment(&mut self) -> Result<()> {
        let params = EncoderParams {
            bit_rate: self.cfg.bit_rate,
            sample_rate: self.cfg.sample_rate,
            channels: self.cfg.channels,
        };

        let (container, frame_info) = {
            let _guard = engine_lock();
            let mut container = self.engine.new_container(self.cfg.container)?;
            self.engine.add_audio_stream(&mut container, &params)?;
            let frame_info = self.engine.open_codec(&mut container)?;
            (container, frame_info)
        };
        self.container = Some(container);
        self.frame_info = Some(frame_info);

        if self.resampler.is_none() && self.cfg.source_sample_rate != self.cfg.sample_rate {
            self.resampler = Some(
                RateConverter::new(
                    self.cfg.source_sample_rate,
                    self.cfg.sample_rate,
                    self.cfg.channels,
                    self.cfg.resample_quality,
                )
                .map_err(Error::from)?,
            );
        }

        self.serial = self.serial.wrapping_add(1);

        let container = self
            .container
            .as_mut()
            .ok_or_else(|| Error::InvalidState("segment started without container".into()))?;
        let header = self.engine.write_header(container)?;

        let mut flags = self.base_flags();
        flags.is_header = true;
        flags.is_initial = self.initial_pending;
        self.initial_pending = false;
        self.emit(flags, &header);

        debug!(serial = self.serial, "segment started");
        Ok(())
    }

    /// Write the trailer for the current segment. `final_trailer` marks the
    /// true end of the stream rather than a splice.
    fn finish_segment(&mut self, final_trailer: bool) {
        // Push any resampler tail through the codec before closing
        if self.resampler.is_some() {
            if let Err(e) = self.drain_resampler_tail() {
                warn!("discarding resampler tail: {e}");
            }
        }
        let trailer = match self.container.as_mut() {
            Some(container) => match self.engine.write_trailer(container) {
                Ok(trailer) => trailer,
                Err(e) => {
                    warn!("trailer write failed: {e}");
                    return;
                }
            },
            None => return,
        };
        let mut flags = self.base_flags();
        flags.is_final = final_trailer;
        self.emit(flags, &trailer);
    }

    /// Trailer-then-header reconfiguration within a live stream.
    fn splice(&mut self) -> Result<()> {
        self.finish_segment(false);
        if let Some(container) = self.container.take() {
            let _guard = engine_lock();
            self.engine.close_container(container);
        }
        self.frame_info = None;
        self.start_segment()?;
        debug!(serial = self.serial, "stream spliced");
        Ok(())
    }

    /// Encode one codec frame's worth of PCM. Returns true when starved.
    fn encode_step(&mut self) -> Result<bool> {
        let frame_info = self
            .frame_info
            .ok_or_else(|| Error::InvalidState("encode without open codec".into()))?;
        let samples_per_frame = frame_info.frame_size * self.cfg.channels as usize;

        while self.staged.len() < samples_per_frame {
            match self.source.pull(frame_info.frame_size) {
                Some(pcm) if !pcm.is_empty() => self.stage_pcm(&pcm)?,
                _ => return Ok(true),
            }
        }

        let frame: Vec<f32> = self.staged.drain(..samples_per_frame).collect();

        // The clock advances with the audio fed in, whether or not the
        // codec emits a packet for it this call
        if self.clock_owner {
            self.timeline.advance(frame_info.frame_size as u64);
        }

        let container = self
            .container
            .as_mut()
            .ok_or_else(|| Error::InvalidState("encode without container".into()))?;
        if let Some(payload) = self.engine.encode(container, &frame)? {
            let muxed = self.engine.write_packet(container, &payload)?;
            let flags = self.base_flags();
            self.emit(flags, &muxed);
        }
        Ok(false)
    }

    fn stage_pcm(&mut self, pcm: &[f32]) -> Result<()> {
        if let Some(rc) = self.resampler.as_mut() {
            let converted = rc.push(pcm)?;
            self.staged.extend_from_slice(&converted);
        } else {
            self.staged.extend_from_slice(pcm);
        }
        Ok(())
    }

    /// Flush the resampler and encode whatever full frames come out.
    fn drain_resampler_tail(&mut self) -> Result<()> {
        let tail = match self.resampler.as_mut() {
            Some(rc) => rc.flush()?,
            None => return Ok(()),
        };
        self.staged.extend_from_slice(&tail);

        let frame_info = match self.frame_info {
            Some(info) => info,
            None => return Ok(()),
        };
        let samples_per_frame = frame_info.frame_size * self.cfg.channels as usize;
        while self.staged.len() >= samples_per_frame {
            let frame: Vec<f32> = self.staged.drain(..samples_per_frame).collect();
            if self.clock_owner {
                self.timeline.advance(frame_info.frame_size as u64);
            }
            let container = self
                .container
                .as_mut()
                .ok_or_else(|| Error::InvalidState("encode without container".into()))?;
            if let Some(payload) = self.engine.encode(container, &frame)? {
                let muxed = self.engine.write_packet(container, &payload)?;
                let flags = self.base_flags();
                self.emit(flags, &muxed);
            }
        }
        // A sub-frame remainder cannot be encoded and is discarded
        self.staged.clear();
        Ok(())
    }

    /// Broadcast the current tags in-band. Suppressed siblings skip this;
    /// the live sibling carries metadata for both.
    fn emit_metadata_packet(&mut self) {
        if self.policy != EmissionPolicy::Live {
            return;
        }
        let payload = self.tags.payload();
        let mut flags = self.base_flags();
        flags.is_metadata = true;
        self.emit(flags, &payload);
    }

    fn base_flags(&self) -> PacketFlags {
        PacketFlags {
            is_suppressed: self.policy == EmissionPolicy::Suppressed,
            ..PacketFlags::default()
        }
    }

    fn emit(&mut self, flags: PacketFlags, data: &[u8]) {
        let header = PacketHeader {
            bit_rate: self.cfg.bit_rate,
            sample_rate: self.cfg.sample_rate,
            channels: self.cfg.channels,
            flags,
            container: self.cfg.container,
            data_size: data.len(),
            serial: self.serial,
            timestamp: self.timeline.pts_secs(self.cfg.sample_rate),
        };
        self.sink.send(&header, data);
    }

    /// Release segment resources in reverse-acquisition order and rewind
    /// the shared clock for the next stream.
    fn teardown(&mut self) {
        self.staged.clear();
        self.resampler = None;
        if let Some(container) = self.container.take() {
            let _guard = engine_lock();
            self.engine.close_container(container);
        }
        self.frame_info = None;
        self.initial_pending = true;
        if self.clock_owner {
            self.timeline.reset();
        }
        debug!("encoder segment torn down");
    }
}

impl<M: MuxEngine, P: PcmSource, K: PacketSink> Session for EncoderSession<M, P, K> {
    fn tick(&mut self) -> Result<TickStatus> {
        let inputs = self.controls.snapshot();
        self.tick_with(&inputs)
    }

    fn close(&mut self) {
        // No trailer on a hard close; the stream is already gone
        self.teardown();
        self.state = EncoderState::Stopped;
    }
}

impl<M: MuxEngine, P: PcmSource, K: PacketSink> Drop for EncoderSession<M, P, K> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sibling sessions driven in lockstep from one control snapshot.
///
/// The data-role session owns the sample clock and emits suppressed
/// packets into `data_sink` (typically [`NullPacketSink`]); the
/// metadata-role session emits the live stream.
///
/// [`NullPacketSink`]: crate::broadcast::packet::NullPacketSink
pub struct EncoderPair<M: MuxEngine, P: PcmSource, D: PacketSink, K: PacketSink> {
    data: EncoderSession<M, P, D>,
    meta: EncoderSession<M, P, K>,
    controls: Arc<EncoderControls>,
}

impl<M, P, D, K> EncoderPair<M, P, D, K>
where
    M: MuxEngine + Clone,
    P: PcmSource,
    D: PacketSink,
    K: PacketSink,
{
    pub fn new(
        engine: M,
        cfg: EncoderConfig,
        data_source: P,
        meta_source: P,
        data_sink: D,
        meta_sink: K,
    ) -> Self {
        let controls = EncoderControls::new();
        let timeline = Arc::new(Timeline::new());
        let data = EncoderSession::new(
            engine.clone(),
            cfg.clone(),
            data_source,
            data_sink,
            EmissionPolicy::Suppressed,
            controls.clone(),
            timeline.clone(),
            true,
        );
        let meta = EncoderSession::new(
            engine,
            cfg,
            meta_source,
            meta_sink,
            EmissionPolicy::Live,
            controls.clone(),
            timeline,
            false,
        );
        Self { data, meta, controls }
    }

    pub fn controls(&self) -> &Arc<EncoderControls> {
        &self.controls
    }

    pub fn data_state(&self) -> EncoderState {
        self.data.state()
    }

    pub fn meta_state(&self) -> EncoderState {
        self.meta.state()
    }
}

impl<M, P, D, K> Session for EncoderPair<M, P, D, K>
where
    M: MuxEngine + Clone,
    P: PcmSource,
    D: PacketSink,
    K: PacketSink,
{
    fn tick(&mut self) -> Result<TickStatus> {
        // One snapshot for both siblings keeps splices and stops aligned
        let inputs = self.controls.snapshot();
        let data_status = self.data.tick_with(&inputs);
        let meta_status = self.meta.tick_with(&inputs);

        match (data_status, meta_status) {
            (Err(e), _) => {
                self.meta.close();
                Err(e)
            }
            (_, Err(e)) => {
                self.data.close();
                Err(e)
            }
            (Ok(TickStatus::Ejecting), Ok(other)) => {
                if other != TickStatus::Ejecting {
                    self.meta.close();
                }
                Ok(TickStatus::Ejecting)
            }
            (Ok(other), Ok(TickStatus::Ejecting)) => {
                if other != TickStatus::Ejecting {
                    self.data.close();
                }
                Ok(TickStatus::Ejecting)
            }
            (Ok(_), Ok(_)) => Ok(TickStatus::Continue),
        }
    }

    fn close(&mut self) {
        self.data.close();
        self.meta.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::packet::NullPacketSink;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const FRAME: usize = 4;

    #[derive(Clone, Default)]
    struct MockMux {
        fail_encode: bool,
    }

    #[derive(Default)]
    struct MockContainer {
        codec_open: bool,
    }

    impl MuxEngine for MockMux {
        type Container = MockContainer;

        fn new_container(&self, _kind: ContainerKind) -> std::result::Result<MockContainer, crate::error::OpenError> {
            Ok(MockContainer::default())
        }

        fn add_audio_stream(
            &self,
            _container: &mut MockContainer,
            _params: &EncoderParams,
        ) -> std::result::Result<(), crate::error::OpenError> {
            Ok(())
        }

        fn open_codec(
            &self,
            container: &mut MockContainer,
        ) -> std::result::Result<CodecFrameInfo, crate::error::OpenError> {
            container.codec_open = true;
            Ok(CodecFrameInfo {
                frame_size: FRAME,
                sample_rate: 48000,
            })
        }

        fn write_header(
            &self,
            _container: &mut MockContainer,
        ) -> std::result::Result<Vec<u8>, crate::error::EngineError> {
            Ok(b"HDR".to_vec())
        }

        fn encode(
            &self,
            _container: &mut MockContainer,
            pcm: &[f32],
        ) -> std::result::Result<Option<Vec<u8>>, crate::error::EngineError> {
            if self.fail_encode {
                return Err(crate::error::EngineError("mock encode failure".into()));
            }
            Ok(Some(vec![0xAB; pcm.len()]))
        }

        fn write_packet(
            &self,
            _container: &mut MockContainer,
            payload: &[u8],
        ) -> std::result::Result<Vec<u8>, crate::error::EngineError> {
            Ok(payload.to_vec())
        }

        fn write_trailer(
            &self,
            _container: &mut MockContainer,
        ) -> std::result::Result<Vec<u8>, crate::error::EngineError> {
            Ok(b"TRL".to_vec())
        }

        fn close_container(&self, _container: MockContainer) {}
    }

    struct QueueSource {
        samples: VecDeque<f32>,
    }

    impl QueueSource {
        fn seconds(secs: usize) -> Self {
            Self {
                samples: (0..48000 * 2 * secs).map(|i| i as f32).collect(),
            }
        }
    }

    impl PcmSource for QueueSource {
        fn pull(&mut self, frames: usize) -> Option<Vec<f32>> {
            let want = frames * 2;
            if self.samples.len() < want {
                return None;
            }
            Some(self.samples.drain(..want).collect())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        packets: Rc<RefCell<Vec<(PacketHeader, Vec<u8>)>>>,
    }

    impl PacketSink for RecordingSink {
        fn send(&mut self, header: &PacketHeader, data: &[u8]) {
            self.packets.borrow_mut().push((header.clone(), data.to_vec()));
        }
    }

    fn config() -> EncoderConfig {
        EncoderConfig {
            container: ContainerKind::Ogg,
            bit_rate: 128_000,
            sample_rate: 48000,
            source_sample_rate: 48000,
            channels: 2,
            resample_quality: ResampleQuality::Medium,
        }
    }

    fn live_session(
        engine: MockMux,
    ) -> (
        EncoderSession<MockMux, QueueSource, RecordingSink>,
        Arc<EncoderControls>,
        Rc<RefCell<Vec<(PacketHeader, Vec<u8>)>>>,
    ) {
        let controls = EncoderControls::new();
        let sink = RecordingSink::default();
        let packets = sink.packets.clone();
        let session = EncoderSession::new(
            engine,
            config(),
            QueueSource::seconds(1),
            sink,
            EmissionPolicy::Live,
            controls.clone(),
            Arc::new(Timeline::new()),
            true,
        );
        (session, controls, packets)
    }

    #[test]
    fn test_stopped_until_run_requested() {
        let (mut session, controls, packets) = live_session(MockMux::default());
        assert_eq!(session.tick().unwrap(), TickStatus::Ejecting);
        assert_eq!(session.state(), EncoderState::Stopped);
        assert!(packets.borrow().is_empty());

        controls.request_run(true);
        assert_eq!(session.tick().unwrap(), TickStatus::Continue);
        assert_eq!(session.state(), EncoderState::Starting);
    }

    #[test]
    fn test_start_emits_initial_header_then_audio() {
        let (mut session, controls, packets) = live_session(MockMux::default());
        controls.request_run(true);
        session.tick().unwrap(); // Stopped -> Starting
        session.tick().unwrap(); // header written, -> Running
        session.tick().unwrap(); // first audio frame

        let recorded = packets.borrow();
        assert_eq!(recorded[0].1, b"HDR");
        assert!(recorded[0].0.flags.is_header);
        assert!(recorded[0].0.flags.is_initial);
        assert!(!recorded[0].0.flags.is_suppressed);
        assert_eq!(recorded[0].0.serial, 1);

        let audio = &recorded[1].0;
        assert!(!audio.flags.is_header);
        assert!((audio.timestamp - FRAME as f64 / 48000.0).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_change_splices_with_serial_bump() {
        let (mut session, controls, packets) = live_session(MockMux::default());
        controls.request_run(true);
        session.tick().unwrap();
        session.tick().unwrap();
        session.tick().unwrap();
        let before = packets.borrow().len();

        controls.set_metadata(StreamMetadata {
            artist: "a".into(),
            title: "t".into(),
            album: "b".into(),
            custom: "c".into(),
        });
        session.tick().unwrap();

        let recorded = packets.borrow();
        let new = &recorded[before..];
        // Trailer, fresh header, then the in-band metadata packet
        assert!(new[0].0.flags.is_final == false && new[0].1 == b"TRL");
        assert!(new[1].0.flags.is_header && !new[1].0.flags.is_initial);
        assert_eq!(new[1].0.serial, 2);
        assert!(new[2].0.flags.is_metadata);
        assert_eq!(new[2].1, b"c\na\nt\nb\0");
    }

    #[test]
    fn test_flush_splices_without_metadata_packet() {
        let (mut session, controls, packets) = live_session(MockMux::default());
        controls.request_run(true);
        session.tick().unwrap();
        session.tick().unwrap();
        let before = packets.borrow().len();

        controls.request_flush();
        session.tick().unwrap();

        let recorded = packets.borrow();
        let new = &recorded[before..];
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].1, b"TRL");
        assert!(new[1].0.flags.is_header);
    }

    #[test]
    fn test_stop_emits_final_trailer_and_restart_resets_clock() {
        let (mut session, controls, packets) = live_session(MockMux::default());
        controls.request_run(true);
        session.tick().unwrap();
        session.tick().unwrap();
        session.tick().unwrap();

        controls.request_run(false);
        session.tick().unwrap(); // Running -> Stopping, final trailer out
        assert_eq!(session.state(), EncoderState::Stopping);
        assert_eq!(session.tick().unwrap(), TickStatus::Ejecting);
        assert_eq!(session.state(), EncoderState::Stopped);

        {
            let recorded = packets.borrow();
            let trailer = recorded.iter().rev().find(|(_, d)| d == b"TRL").unwrap();
            assert!(trailer.0.flags.is_final);
        }

        // Restart: serial keeps counting, clock and initial flag rewind
        controls.request_run(true);
        session.tick().unwrap();
        session.tick().unwrap();
        let recorded = packets.borrow();
        let header = recorded.last().unwrap();
        assert!(header.0.flags.is_header && header.0.flags.is_initial);
        assert_eq!(header.0.serial, 2);
        assert_eq!(header.0.timestamp, 0.0);
    }

    #[test]
    fn test_encode_failure_degrades_to_stopping() {
        let (mut session, controls, _packets) = live_session(MockMux { fail_encode: true });
        controls.request_run(true);
        session.tick().unwrap();
        session.tick().unwrap();
        assert_eq!(session.tick().unwrap(), TickStatus::Continue);
        assert_eq!(session.state(), EncoderState::Stopping);
    }

    #[test]
    fn test_pair_runs_in_lockstep_with_suppressed_data_side() {
        let meta_sink = RecordingSink::default();
        let meta_packets = meta_sink.packets.clone();
        let mut pair = EncoderPair::new(
            MockMux::default(),
            config(),
            QueueSource::seconds(1),
            QueueSource::seconds(1),
            NullPacketSink,
            meta_sink,
        );
        pair.controls().request_run(true);
        pair.tick().unwrap();
        pair.tick().unwrap();
        pair.tick().unwrap();
        assert_eq!(pair.data_state(), EncoderState::Running);
        assert_eq!(pair.meta_state(), EncoderState::Running);

        // Live side's packets are not suppressed
        assert!(meta_packets.borrow().iter().all(|(h, _)| !h.flags.is_suppressed));

        pair.controls().request_run(false);
        pair.tick().unwrap();
        assert_eq!(pair.tick().unwrap(), TickStatus::Ejecting);
        assert_eq!(pair.data_state(), EncoderState::Stopped);
        assert_eq!(pair.meta_state(), EncoderState::Stopped);
    }
}
