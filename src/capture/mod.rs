//! Packet capture: a format-polymorphic ingest loop that reads timestamped
//! packets from a source, buffers them into a ring, and drives sequence
//! lifecycle events.
//!
//! One [`Capture`] is serviced by one thread (its own via
//! [`Capture::spawn`], or the caller's by looping [`Capture::recv`]). Each
//! `recv` cycle reads a batch from the source, decodes with the configured
//! format, maps packets into a window of slot-sized ring spans at
//! deterministic offsets, and reports the sequence transition for the
//! cycle. Bad-sync packets and out-of-range sources are dropped silently
//! and counted.

pub mod formats;
pub mod source;

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::net::UdpSocket;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smallvec::SmallVec;

use crate::affinity;
use crate::memory::{self, Space};
use crate::ring::{Ring, RingWriter, WriteSequence, WriteSpan};
use crate::status::{CaptureStatus, Result, Status, Whence};
use formats::{PacketDesc, PacketFormat, SequenceTags};
use source::{PacketSource, SourceRead};

pub use source::bind_udp;

/// Max packets handled per receive cycle.
const PACKET_BATCH: usize = 128;

/// Drop-and-count bookkeeping for one capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStats {
    pub received: u64,
    pub good: u64,
    /// Bad sync/framing, or payload size disagreeing with the sequence.
    pub invalid: u64,
    /// Source id outside `[src0, src0 + nsrc)`.
    pub ignored: u64,
    /// Sequence number before the current sequence start.
    pub late: u64,
}

/// Passed to the sequence callback when a sequence starts.
#[derive(Debug, Clone)]
pub struct SequenceEvent {
    pub format: PacketFormat,
    pub seq: u64,
    pub time_tag: i64,
    pub src0: usize,
    pub nsrc: usize,
    pub payload_size: usize,
    pub tags: SequenceTags,
}

/// Invoked on every sequence start; the returned bytes become the ring
/// sequence header. An `Err` is surfaced as `CaptureStatus::Error` and
/// terminates the capture.
pub type SequenceCallback =
    Box<dyn FnMut(&SequenceEvent) -> std::result::Result<Vec<u8>, Status> + Send>;

/// Capture parameters shared by every source kind.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Number of sources feeding this capture.
    pub nsrc: usize,
    /// First source id; packets outside `[src0, src0 + nsrc)` are ignored.
    pub src0: usize,
    /// Largest payload a socket source may deliver.
    pub max_payload_size: usize,
    /// Time samples buffered in the ring (a multiple of `slot_ntime`).
    pub buffer_ntime: usize,
    /// Time samples per ring slot.
    pub slot_ntime: usize,
    /// Source read deadline per receive cycle.
    pub timeout: Duration,
    /// CPU core to pin the capture thread to; negative for none.
    pub core: i32,
}

impl CaptureConfig {
    pub fn new(nsrc: usize, buffer_ntime: usize, slot_ntime: usize) -> CaptureConfig {
        CaptureConfig {
            nsrc,
            src0: 0,
            max_payload_size: 9000,
            buffer_ntime,
            slot_ntime,
            timeout: Duration::from_millis(100),
            core: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingFirst,
    Streaming,
    Terminal,
}

/// Per-cycle transition flags, folded into one status at the end.
#[derive(Default)]
struct Cycle {
    started: bool,
    changed: bool,
    good: usize,
}

/// The open sequence plus its window of slot spans.
struct ActiveSequence {
    handle: WriteSequence,
    tags: SequenceTags,
    base_seq: u64,
    payload_size: usize,
    span_size: usize,
    nslot: u64,
    window: VecDeque<WriteSpan>,
    /// Slot index (relative to `base_seq`) of the window front.
    window_start: u64,
}

impl ActiveSequence {
    /// Reserve (zero-filled) spans so the window covers `slot`.
    fn ensure_slot(&mut self, slot: u64, ring_space: Space) -> Result<()> {
        while self.window_start + self.window.len() as u64 <= slot {
            let mut span = self.handle.reserve(self.span_size, false)?;
            unsafe { memory::memset(span.as_mut_ptr(), ring_space, 0, self.span_size)? };
            self.window.push_back(span);
        }
        Ok(())
    }

    /// Commit the oldest spans until `slot` fits inside the window.
    fn rotate_to(&mut self, slot: u64, ring_space: Space) -> Result<()> {
        while slot >= self.window_start + self.nslot {
            self.ensure_slot(self.window_start, ring_space)?;
            let Some(span) = self.window.pop_front() else {
                return Err(Status::InternalError);
            };
            let size = span.size();
            span.commit(size)?;
            self.window_start += 1;
        }
        Ok(())
    }

    /// Place one payload at its deterministic offset. `false` means the
    /// offset fell outside the span (counted as invalid by the caller).
    fn write_payload(
        &mut self,
        format: PacketFormat,
        desc: &PacketDesc,
        payload: &[u8],
        nsrc: usize,
        src0: usize,
        slot_ntime: u64,
        ring_space: Space,
    ) -> Result<bool> {
        let slot = (desc.seq - self.base_seq) / slot_ntime;
        self.rotate_to(slot, ring_space)?;
        self.ensure_slot(slot, ring_space)?;
        let span = &mut self.window[(slot - self.window_start) as usize];
        let span_base = self.base_seq + slot * slot_ntime;
        let offset = format.ring_offset(desc, span_base, nsrc, src0, self.payload_size);
        if offset + payload.len() > self.span_size {
            return Ok(false);
        }
        unsafe {
            memory::copy(
                span.as_mut_ptr().add(offset),
                ring_space,
                payload.as_ptr(),
                Space::System,
                payload.len(),
            )?;
        }
        Ok(true)
    }

    /// Commit everything still open and close the sequence.
    fn finish(mut self) -> Result<()> {
        while let Some(span) = self.window.pop_front() {
            let size = span.size();
            span.commit(size)?;
        }
        self.handle.end()
    }
}

/// A packet capture bound to one source, one format, and one ring.
pub struct Capture {
    format: PacketFormat,
    source: PacketSource,
    ring: Ring,
    writer: RingWriter,
    config: CaptureConfig,
    callback: SequenceCallback,
    buf: Vec<u8>,
    state: State,
    active: Option<ActiveSequence>,
    stats: CaptureStats,
    shutdown: Arc<AtomicBool>,
    core_bound: bool,
}

impl Capture {
    /// Capture from a bound UDP socket.
    pub fn udp(
        format: &str,
        socket: UdpSocket,
        ring: &Ring,
        config: CaptureConfig,
        callback: Option<SequenceCallback>,
    ) -> Result<Capture> {
        Capture::with_source(format, PacketSource::Udp(socket), ring, config, callback)
    }

    /// Capture from a raw socket in sniffer mode (IP + UDP headers are
    /// stripped per packet).
    pub fn sniffer(
        format: &str,
        socket: UdpSocket,
        ring: &Ring,
        config: CaptureConfig,
        callback: Option<SequenceCallback>,
    ) -> Result<Capture> {
        Capture::with_source(format, PacketSource::Sniffer(socket), ring, config, callback)
    }

    /// Capture from a disk file of fixed-size records. Only formats with a
    /// fixed frame size can be replayed from disk.
    pub fn disk(
        format: &str,
        file: File,
        ring: &Ring,
        config: CaptureConfig,
        callback: Option<SequenceCallback>,
    ) -> Result<Capture> {
        let parsed = PacketFormat::from_str(format)?;
        let payload = parsed.fixed_payload_size().ok_or(Status::Unsupported)?;
        let source = PacketSource::disk(file, parsed.header_size() + payload)?;
        Capture::with_source(format, source, ring, config, callback)
    }

    fn with_source(
        format: &str,
        source: PacketSource,
        ring: &Ring,
        config: CaptureConfig,
        callback: Option<SequenceCallback>,
    ) -> Result<Capture> {
        let format = PacketFormat::from_str(format)?;
        if config.nsrc == 0
            || config.slot_ntime == 0
            || config.buffer_ntime < config.slot_ntime
            || config.buffer_ntime % config.slot_ntime != 0
            || config.max_payload_size == 0
        {
            return Err(Status::InvalidArgument);
        }
        source
            .set_timeout(config.timeout)
            .map_err(|_| Status::InternalError)?;
        let buf = vec![0u8; source.frame_capacity(config.max_payload_size, format.header_size())];
        let writer = ring.begin_writing()?;
        Ok(Capture {
            format,
            source,
            ring: ring.clone(),
            writer,
            config,
            callback: callback.unwrap_or_else(|| Box::new(|_| Ok(Vec::new()))),
            buf,
            state: State::AwaitingFirst,
            active: None,
            stats: CaptureStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            core_bound: false,
        })
    }

    /// Flag that makes the next receive cycle terminate with
    /// `Interrupted`. Shareable across threads.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Run one cycle of the state machine. Blocks for at most the
    /// configured source timeout plus any ring backpressure.
    pub fn recv(&mut self) -> Result<CaptureStatus> {
        if self.state == State::Terminal {
            return Err(Status::InvalidState);
        }
        if !self.core_bound {
            self.core_bound = true;
            if self.config.core >= 0 {
                if let Err(e) = affinity::bind_core(self.config.core as usize) {
                    log::debug!("core {} binding failed: {}", self.config.core, e);
                }
            }
        }
        if self.shutdown.load(Ordering::Acquire) {
            return self.interrupt();
        }

        let mut cycle = Cycle::default();
        match self.source.recv_packet(&mut self.buf) {
            Ok(SourceRead::Packet(len)) => {
                if let Some(status) = self.process_checked(len, &mut cycle)? {
                    return Ok(status);
                }
            }
            Ok(SourceRead::Timeout) | Ok(SourceRead::EndOfFile) => {
                return Ok(CaptureStatus::NoData)
            }
            Err(e) => return self.fail_io(&e),
        }

        // Drain whatever else is already pending without blocking.
        let _ = self.source.set_nonblocking(true);
        let outcome = self.drain(&mut cycle);
        let _ = self.source.set_nonblocking(false);
        if let Some(status) = outcome? {
            return Ok(status);
        }

        Ok(if cycle.changed {
            CaptureStatus::Changed
        } else if cycle.started {
            CaptureStatus::Started
        } else if cycle.good > 0 {
            CaptureStatus::Continued
        } else {
            CaptureStatus::NoData
        })
    }

    fn drain(&mut self, cycle: &mut Cycle) -> Result<Option<CaptureStatus>> {
        for _ in 1..PACKET_BATCH {
            if self.shutdown.load(Ordering::Acquire) {
                return self.interrupt().map(Some);
            }
            match self.source.recv_packet(&mut self.buf) {
                Ok(SourceRead::Packet(len)) => {
                    if let Some(status) = self.process_checked(len, cycle)? {
                        return Ok(Some(status));
                    }
                }
                Ok(SourceRead::Timeout) | Ok(SourceRead::EndOfFile) => break,
                Err(e) => return self.fail_io(&e).map(Some),
            }
        }
        Ok(None)
    }

    /// Process one packet, translating terminal conditions into a final
    /// cycle status.
    fn process_checked(
        &mut self,
        len: usize,
        cycle: &mut Cycle,
    ) -> Result<Option<CaptureStatus>> {
        match self.process(len, cycle) {
            Ok(()) => Ok(None),
            // The ring shut down underneath us.
            Err(Status::EndOfData) => self.interrupt().map(Some),
            Err(status) => self.fail(status).map(Some),
        }
    }

    fn process(&mut self, len: usize, cycle: &mut Cycle) -> Result<()> {
        self.stats.received += 1;
        let Some(desc) = self.format.parse(&self.buf[..len]) else {
            self.stats.invalid += 1;
            return Ok(());
        };
        let nsrc = self.config.nsrc;
        let src0 = self.config.src0;
        let src = desc.src as usize;
        if src < src0 || src >= src0 + nsrc {
            self.stats.ignored += 1;
            return Ok(());
        }

        let needs_new = match &self.active {
            None => true,
            Some(active) => active.tags != desc.tags,
        };
        if needs_new {
            let had_sequence = self.active.is_some();
            if let Some(active) = self.active.take() {
                active.finish()?;
            }
            self.start_sequence(&desc)?;
            if had_sequence {
                cycle.changed = true;
            } else {
                cycle.started = true;
            }
            self.state = State::Streaming;
        }

        let slot_ntime = self.config.slot_ntime as u64;
        let ring_space = self.ring.space();
        let format = self.format;
        let Some(active) = self.active.as_mut() else {
            return Err(Status::InternalError);
        };
        if desc.seq < active.base_seq {
            self.stats.late += 1;
            return Ok(());
        }
        if desc.payload_len != active.payload_size {
            self.stats.invalid += 1;
            return Ok(());
        }
        let payload = &self.buf[desc.payload_offset..desc.payload_offset + desc.payload_len];
        let wrote =
            active.write_payload(format, &desc, payload, nsrc, src0, slot_ntime, ring_space)?;
        if wrote {
            self.stats.good += 1;
            cycle.good += 1;
        } else {
            self.stats.invalid += 1;
        }
        Ok(())
    }

    fn start_sequence(&mut self, desc: &PacketDesc) -> Result<()> {
        let payload_size = self
            .format
            .fixed_payload_size()
            .unwrap_or(desc.payload_len);
        let slot_ntime = self.config.slot_ntime as u64;
        let base_seq = desc.seq - (desc.seq % slot_ntime);
        let span_size = self.config.slot_ntime * self.config.nsrc * payload_size;
        let nslot = (self.config.buffer_ntime / self.config.slot_ntime) as u64;
        self.ring
            .resize(span_size, Some(span_size * nslot as usize), 1)?;

        let event = SequenceEvent {
            format: self.format,
            seq: desc.seq,
            time_tag: desc.time_tag,
            src0: self.config.src0,
            nsrc: self.config.nsrc,
            payload_size,
            tags: desc.tags,
        };
        let header = (self.callback)(&event)?;
        let name = format!("{}_{}", self.format, desc.time_tag);
        let handle = self
            .writer
            .begin_sequence(&name, desc.time_tag, &header, 1)?;
        log::debug!(
            "{} sequence at seq {} ({} bytes/payload, {} slots)",
            self.format,
            desc.seq,
            payload_size,
            nslot
        );
        self.active = Some(ActiveSequence {
            handle,
            tags: desc.tags,
            base_seq,
            payload_size,
            span_size,
            nslot,
            window: VecDeque::new(),
            window_start: 0,
        });
        Ok(())
    }

    fn finish_open(&mut self) -> Result<()> {
        match self.active.take() {
            Some(active) => active.finish(),
            None => Ok(()),
        }
    }

    fn interrupt(&mut self) -> Result<CaptureStatus> {
        let _ = self.finish_open();
        self.state = State::Terminal;
        Ok(CaptureStatus::Interrupted)
    }

    fn fail(&mut self, status: Status) -> Result<CaptureStatus> {
        log::debug!("capture failed: {}", status);
        let _ = self.finish_open();
        self.state = State::Terminal;
        Ok(CaptureStatus::Error)
    }

    fn fail_io(&mut self, error: &io::Error) -> Result<CaptureStatus> {
        log::debug!("source read failed: {}", error);
        let _ = self.finish_open();
        self.state = State::Terminal;
        Ok(CaptureStatus::Error)
    }

    /// Drain in-flight spans to the ring and close the open sequence.
    pub fn flush(&mut self) -> Result<CaptureStatus> {
        if self.state == State::Terminal {
            return Err(Status::InvalidState);
        }
        if self.active.is_some() {
            self.finish_open()?;
            self.state = State::AwaitingFirst;
            Ok(CaptureStatus::Ended)
        } else {
            Ok(CaptureStatus::NoData)
        }
    }

    /// Close any open sequence and make the capture terminal.
    pub fn end(&mut self) -> Result<CaptureStatus> {
        self.finish_open()?;
        self.state = State::Terminal;
        Ok(CaptureStatus::Ended)
    }

    /// Reposition a disk source. The open sequence is flushed and the
    /// machine re-arms on the first packet at the new offset.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        if !self.source.is_seekable() {
            return Err(Status::InvalidState);
        }
        self.finish_open()?;
        if self.state != State::Terminal {
            self.state = State::AwaitingFirst;
        }
        self.source.seek(offset, whence)
    }

    /// Current byte position of a disk source.
    pub fn tell(&mut self) -> Result<u64> {
        self.source.tell()
    }

    /// Run the capture on its own dedicated thread until it goes terminal.
    pub fn spawn(mut self) -> CaptureThread {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::spawn(move || {
            let mut statuses = SmallVec::<[CaptureStatus; 8]>::new();
            loop {
                match self.recv() {
                    Ok(status) => {
                        if statuses.last() != Some(&status) {
                            statuses.push(status);
                        }
                        if matches!(status, CaptureStatus::Interrupted | CaptureStatus::Error) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            (self, statuses)
        });
        CaptureThread { handle, shutdown }
    }
}

/// Handle to a capture running on its dedicated thread.
pub struct CaptureThread {
    handle: thread::JoinHandle<(Capture, SmallVec<[CaptureStatus; 8]>)>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureThread {
    /// Ask the capture loop to stop at its next cycle boundary.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Wait for the loop to exit; returns the capture and the de-duplicated
    /// status trace it went through.
    pub fn join(self) -> Result<(Capture, Vec<CaptureStatus>)> {
        match self.handle.join() {
            Ok((capture, statuses)) => Ok((capture, statuses.into_vec())),
            Err(_) => Err(Status::InternalError),
        }
    }
}
