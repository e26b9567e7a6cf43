//! Byte-oriented ring buffer with sequence and span structure.
//!
//! The ring owns one allocation in any memory space and hands out
//! *sequences* (logically independent data intervals with a header) built
//! from *spans* (contiguous byte ranges). Writers reserve a span, fill it,
//! and commit; readers acquire committed spans and release them. Logical
//! offsets are monotonic `u64` byte counts; the physical position is the
//! offset modulo the ring size, and a ghost region past the end keeps every
//! span contiguous across the wrap point.
//!
//! ## Synchronization protocol
//!
//! All bookkeeping lives under one mutex with two condvars:
//!
//! 1. Writer `reserve` blocks while the span would overrun the oldest
//!    guaranteed reader (block-on-full) and while a wrapped read span is
//!    using the ghost region.
//! 2. `commit` advances `head`, mirrors the wrapped tail into the ring
//!    front, and wakes readers.
//! 3. Reader `acquire` blocks until the range is committed or the sequence
//!    ends, mirrors the ring front into the ghost region when the span
//!    wraps, and pins its range while held (guarantee mode).
//! 4. `shutdown` wakes everyone; blocked and future calls report
//!    `EndOfData`, which the capture layer surfaces as `Interrupted`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::memory::{self, Space};
use crate::status::{Result, Status};

const SEQUENCE_OPEN: u64 = u64::MAX;

/// Sequence metadata record. `end` is the only field written after
/// creation, always under the ring lock.
struct SequenceRecord {
    name: String,
    time_tag: i64,
    header: Vec<u8>,
    nringlet: usize,
    begin: u64,
    end: AtomicU64,
}

impl SequenceRecord {
    fn end_offset(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.end_offset() == SEQUENCE_OPEN
    }
}

struct RingState {
    buf: *mut u8,
    space: Space,
    contiguous_span: usize,
    total_span: usize,
    nringlet: usize,
    /// Committed bytes (monotonic).
    head: u64,
    /// Reserved bytes (monotonic, >= head).
    reserve_head: u64,
    /// Offsets pinned by held guaranteed read spans (offset -> pin count).
    guarantees: BTreeMap<u64, usize>,
    open_wspans: usize,
    open_rspans: usize,
    wrapped_wspans: usize,
    wrapped_rspans: usize,
    writing: bool,
    writing_ended: bool,
    shutdown: bool,
    sequences: VecDeque<Arc<SequenceRecord>>,
}

// The raw buffer pointer is owned exclusively by the ring; all access is
// serialized by the mutex or confined to reserved/acquired span ranges.
unsafe impl Send for RingState {}

struct RingInner {
    name: String,
    space: Space,
    state: Mutex<RingState>,
    writable: Condvar,
    readable: Condvar,
}

impl RingInner {
    fn lock_state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RingInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if !state.buf.is_null() {
            unsafe {
                let _ = memory::free(state.buf, self.space);
            }
        }
    }
}

impl RingState {
    fn phys(&self, offset: u64) -> usize {
        (offset % self.total_span as u64) as usize
    }

    fn wraps(&self, offset: u64, size: usize) -> bool {
        self.phys(offset) + size > self.total_span
    }

    /// Stride between ringlet rows in the backing allocation.
    fn row_stride(&self) -> usize {
        self.total_span + self.contiguous_span
    }

    fn span_ptr(&self, offset: u64) -> *mut u8 {
        unsafe { self.buf.add(self.phys(offset)) }
    }

    /// Mirror a committed wrapped span's overhang from the ghost region to
    /// the ring front, for every ringlet row.
    fn ghost_to_front(&self, offset: u64, size: usize) -> Result<()> {
        let overhang = self.phys(offset) + size - self.total_span;
        for row in 0..self.nringlet {
            unsafe {
                let base = self.buf.add(row * self.row_stride());
                memory::copy(base, self.space, base.add(self.total_span), self.space, overhang)?;
            }
        }
        Ok(())
    }

    /// Mirror the ring front into the ghost region ahead of a wrapped read.
    fn front_to_ghost(&self, offset: u64, size: usize) -> Result<()> {
        let overhang = self.phys(offset) + size - self.total_span;
        for row in 0..self.nringlet {
            unsafe {
                let base = self.buf.add(row * self.row_stride());
                memory::copy(base.add(self.total_span), self.space, base, self.space, overhang)?;
            }
        }
        Ok(())
    }

    fn pin(&mut self, offset: u64) {
        *self.guarantees.entry(offset).or_insert(0) += 1;
    }

    fn unpin(&mut self, offset: u64) {
        if let Some(count) = self.guarantees.get_mut(&offset) {
            *count -= 1;
            if *count == 0 {
                self.guarantees.remove(&offset);
            }
        }
    }

    /// Oldest logical offset the writer must not overwrite.
    fn write_floor(&self) -> u64 {
        self.guarantees
            .keys()
            .next()
            .copied()
            .unwrap_or(self.head)
            .min(self.head)
    }
}

/// A bounded, time-indexed shared buffer; the only shared mutable state
/// between a capture and its downstream consumers.
#[derive(Clone)]
pub struct Ring {
    inner: Arc<RingInner>,
}

impl Ring {
    /// Create an empty ring in `space`. The buffer is allocated by the
    /// first [`Ring::resize`] call.
    pub fn new(space: Space, name: &str) -> Ring {
        Ring {
            inner: Arc::new(RingInner {
                name: name.to_string(),
                space,
                state: Mutex::new(RingState {
                    buf: std::ptr::null_mut(),
                    space,
                    contiguous_span: 0,
                    total_span: 0,
                    nringlet: 1,
                    head: 0,
                    reserve_head: 0,
                    guarantees: BTreeMap::new(),
                    open_wspans: 0,
                    open_rspans: 0,
                    wrapped_wspans: 0,
                    wrapped_rspans: 0,
                    writing: false,
                    writing_ended: false,
                    shutdown: false,
                    sequences: VecDeque::new(),
                }),
                writable: Condvar::new(),
                readable: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn space(&self) -> Space {
        self.inner.space
    }

    /// (Re)size the ring: `contiguous_span` is the largest reservable span
    /// ("gulp size"), `total_span` the retained window (default 4 gulps,
    /// rounded up to whole gulps). Grow-only; requires no outstanding
    /// spans. Retained committed data survives a grow.
    pub fn resize(
        &self,
        contiguous_span: usize,
        total_span: Option<usize>,
        nringlet: usize,
    ) -> Result<()> {
        if contiguous_span == 0 || nringlet == 0 {
            return Err(Status::InvalidArgument);
        }
        let mut total = total_span.unwrap_or(contiguous_span * 4);
        total = total.max(contiguous_span);
        total = total.div_ceil(contiguous_span) * contiguous_span;

        let mut state = self.inner.lock_state();
        if state.shutdown {
            return Err(Status::EndOfData);
        }
        if total <= state.total_span
            && contiguous_span <= state.contiguous_span
            && nringlet == state.nringlet
        {
            return Ok(());
        }
        if state.open_wspans > 0 || state.open_rspans > 0 {
            return Err(Status::InvalidState);
        }
        if nringlet != state.nringlet && state.head != 0 {
            return Err(Status::InvalidState);
        }

        let new_buf = memory::alloc((total + contiguous_span) * nringlet, self.inner.space)?;
        if !state.buf.is_null() {
            // Re-home the retained window, chunked at physical boundaries
            // of both layouts.
            let keep = state.head.min(state.total_span as u64);
            let mut offset = state.head - keep;
            while offset < state.head {
                let old_phys = state.phys(offset);
                let new_phys = (offset % total as u64) as usize;
                let run = (state.total_span - old_phys)
                    .min(total - new_phys)
                    .min((state.head - offset) as usize);
                for row in 0..state.nringlet {
                    unsafe {
                        let src = state.buf.add(row * state.row_stride() + old_phys);
                        let dst = new_buf.add(row * (total + contiguous_span) + new_phys);
                        memory::copy(dst, self.inner.space, src, self.inner.space, run)?;
                    }
                }
                offset += run as u64;
            }
            unsafe {
                memory::free(state.buf, self.inner.space)?;
            }
        }
        state.buf = new_buf;
        state.contiguous_span = contiguous_span;
        state.total_span = total;
        state.nringlet = nringlet;
        log::debug!(
            "ring '{}' resized: span={} total={} nringlet={}",
            self.inner.name,
            contiguous_span,
            total,
            nringlet
        );
        self.inner.writable.notify_all();
        Ok(())
    }

    /// Claim the writer role. Only one writer may exist at a time.
    pub fn begin_writing(&self) -> Result<RingWriter> {
        let mut state = self.inner.lock_state();
        if state.shutdown {
            return Err(Status::EndOfData);
        }
        if state.writing {
            return Err(Status::InvalidState);
        }
        state.writing = true;
        state.writing_ended = false;
        Ok(RingWriter {
            ring: Arc::clone(&self.inner),
        })
    }

    pub fn writing_ended(&self) -> bool {
        self.inner.lock_state().writing_ended
    }

    /// Wake every blocked producer and consumer; subsequent blocking calls
    /// report `EndOfData`. Committed data stays readable.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        state.shutdown = true;
        self.inner.writable.notify_all();
        self.inner.readable.notify_all();
    }

    fn open_where<F>(&self, guarantee: bool, pick: F) -> Result<ReadSequence>
    where
        F: Fn(&RingState) -> Option<Arc<SequenceRecord>>,
    {
        let mut state = self.inner.lock_state();
        loop {
            if let Some(seq) = pick(&state) {
                if guarantee {
                    state.pin(seq.begin);
                }
                return Ok(ReadSequence {
                    ring: Arc::clone(&self.inner),
                    seq,
                    guarantee,
                    open_pin: guarantee,
                });
            }
            if state.shutdown || state.writing_ended {
                return Err(Status::EndOfData);
            }
            state = self
                .inner
                .readable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Open the oldest sequence still known to the ring. Blocks until one
    /// exists unless writing has ended.
    pub fn open_earliest(&self, guarantee: bool) -> Result<ReadSequence> {
        self.open_where(guarantee, |state| state.sequences.front().cloned())
    }

    pub fn open_latest(&self, guarantee: bool) -> Result<ReadSequence> {
        self.open_where(guarantee, |state| state.sequences.back().cloned())
    }

    pub fn open_by_name(&self, name: &str, guarantee: bool) -> Result<ReadSequence> {
        self.open_where(guarantee, |state| {
            state
                .sequences
                .iter()
                .find(|seq| seq.name == name)
                .cloned()
        })
    }

    /// Open the first sequence whose time tag is at or after `time_tag`.
    pub fn open_at(&self, time_tag: i64, guarantee: bool) -> Result<ReadSequence> {
        self.open_where(guarantee, |state| {
            state
                .sequences
                .iter()
                .find(|seq| seq.time_tag >= time_tag)
                .cloned()
        })
    }
}

/// Exclusive writer role for a ring. Dropping it ends writing, which
/// unblocks readers waiting for more data.
pub struct RingWriter {
    ring: Arc<RingInner>,
}

impl RingWriter {
    /// Open a new sequence. Any sequence still open is closed first; all
    /// of its spans must already be committed.
    pub fn begin_sequence(
        &mut self,
        name: &str,
        time_tag: i64,
        header: &[u8],
        nringlet: usize,
    ) -> Result<WriteSequence> {
        let mut state = self.ring.lock_state();
        if state.shutdown {
            return Err(Status::EndOfData);
        }
        if state.open_wspans > 0 {
            return Err(Status::InvalidState);
        }
        if nringlet != state.nringlet {
            return Err(Status::InvalidArgument);
        }
        let head = state.head;
        if let Some(open) = state.sequences.back() {
            if open.is_open() {
                open.end.store(head, Ordering::Release);
            }
        }
        let seq = Arc::new(SequenceRecord {
            name: name.to_string(),
            time_tag,
            header: header.to_vec(),
            nringlet,
            begin: head,
            end: AtomicU64::new(SEQUENCE_OPEN),
        });
        state.sequences.push_back(Arc::clone(&seq));
        log::trace!("sequence '{}' begins at offset {}", name, head);
        self.ring.readable.notify_all();
        Ok(WriteSequence {
            ring: Arc::clone(&self.ring),
            seq,
        })
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        let mut state = self.ring.lock_state();
        state.writing = false;
        state.writing_ended = true;
        if let Some(open) = state.sequences.back() {
            if open.is_open() {
                open.end.store(state.head, Ordering::Release);
            }
        }
        self.ring.readable.notify_all();
    }
}

/// An open sequence being written. Ends on [`WriteSequence::end`] or drop.
pub struct WriteSequence {
    ring: Arc<RingInner>,
    seq: Arc<SequenceRecord>,
}

impl WriteSequence {
    pub fn name(&self) -> &str {
        &self.seq.name
    }

    pub fn time_tag(&self) -> i64 {
        self.seq.time_tag
    }

    /// Reserve `nbytes` of contiguous ring memory for writing. Blocks on
    /// backpressure until a guaranteed reader releases space or the ring
    /// shuts down (`EndOfData`); `nonblocking` reports `WouldBlock`
    /// instead of waiting.
    pub fn reserve(&mut self, nbytes: usize, nonblocking: bool) -> Result<WriteSpan> {
        let mut state = self.ring.lock_state();
        if nbytes == 0 || nbytes > state.contiguous_span {
            return Err(Status::InvalidArgument);
        }
        if !self.seq.is_open() {
            return Err(Status::InvalidState);
        }
        loop {
            if state.shutdown {
                return Err(Status::EndOfData);
            }
            let offset = state.reserve_head;
            let fits = offset + nbytes as u64 - state.write_floor() <= state.total_span as u64;
            let ghost_free = !state.wraps(offset, nbytes) || state.wrapped_rspans == 0;
            if fits && ghost_free {
                break;
            }
            if nonblocking {
                return Err(Status::WouldBlock);
            }
            state = self
                .ring
                .writable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        let offset = state.reserve_head;
        let wrapped = state.wraps(offset, nbytes);
        state.reserve_head += nbytes as u64;
        state.open_wspans += 1;
        if wrapped {
            state.wrapped_wspans += 1;
        }
        Ok(WriteSpan {
            ring: Arc::clone(&self.ring),
            ptr: state.span_ptr(offset),
            row_stride: state.row_stride(),
            nringlet: state.nringlet,
            offset,
            size: nbytes,
            commit_size: nbytes,
            wrapped,
            done: false,
        })
    }

    /// Close the sequence at the current committed head.
    pub fn end(self) -> Result<()> {
        // Drop does the work; a named method reads better at call sites.
        Ok(())
    }
}

impl Drop for WriteSequence {
    fn drop(&mut self) {
        let state = self.ring.lock_state();
        if self.seq.is_open() {
            self.seq.end.store(state.head, Ordering::Release);
        }
        drop(state);
        self.ring.readable.notify_all();
    }
}

/// A reserved, writable byte range. Committed on drop (full size) or via
/// [`WriteSpan::commit`]. Spans must be committed in reservation order.
pub struct WriteSpan {
    ring: Arc<RingInner>,
    ptr: *mut u8,
    row_stride: usize,
    nringlet: usize,
    offset: u64,
    size: usize,
    commit_size: usize,
    wrapped: bool,
    done: bool,
}

unsafe impl Send for WriteSpan {}

impl WriteSpan {
    /// Logical byte offset of this span within the ring.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Stride between ringlet rows, in bytes.
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn nringlet(&self) -> usize {
        self.nringlet
    }

    /// Writable view of the span (first ringlet row). Only meaningful for
    /// host-space rings.
    pub fn data(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    /// Shrink the committed size. Only the most recently reserved span may
    /// shrink, since that simply rolls the reservation back.
    pub fn commit(mut self, size: usize) -> Result<()> {
        if size > self.size {
            return Err(Status::InvalidArgument);
        }
        self.commit_size = size;
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let mut state = self.ring.lock_state();
        if self.offset != state.head {
            return Err(Status::InvalidState);
        }
        if self.commit_size < self.size {
            if self.offset + self.size as u64 != state.reserve_head {
                return Err(Status::InvalidState);
            }
            state.reserve_head = self.offset + self.commit_size as u64;
        }
        if self.commit_size > 0 && state.wraps(self.offset, self.commit_size) {
            state.ghost_to_front(self.offset, self.commit_size)?;
        }
        state.head = self.offset + self.commit_size as u64;
        state.open_wspans -= 1;
        if self.wrapped {
            state.wrapped_wspans -= 1;
        }
        drop(state);
        self.ring.readable.notify_all();
        self.ring.writable.notify_all();
        Ok(())
    }
}

impl Drop for WriteSpan {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// A sequence opened for reading.
pub struct ReadSequence {
    ring: Arc<RingInner>,
    seq: Arc<SequenceRecord>,
    guarantee: bool,
    /// Whether the open-time pin at `seq.begin` is still held.
    open_pin: bool,
}

impl ReadSequence {
    pub fn name(&self) -> &str {
        &self.seq.name
    }

    pub fn time_tag(&self) -> i64 {
        self.seq.time_tag
    }

    pub fn header(&self) -> &[u8] {
        &self.seq.header
    }

    pub fn nringlet(&self) -> usize {
        self.seq.nringlet
    }

    /// Bytes committed to this sequence so far.
    pub fn size(&self) -> u64 {
        let state = self.ring.lock_state();
        let limit = if self.seq.is_open() {
            state.head
        } else {
            self.seq.end_offset()
        };
        limit.saturating_sub(self.seq.begin)
    }

    /// Acquire `size` bytes at `offset` from the start of the sequence.
    /// Blocks until the range is committed or the sequence ends; a short
    /// span is returned at the end of a sequence, and `EndOfData` when
    /// nothing remains.
    pub fn acquire(&mut self, offset: u64, size: usize) -> Result<ReadSpan> {
        let mut state = self.ring.lock_state();
        if size == 0 || size > state.contiguous_span {
            return Err(Status::InvalidArgument);
        }
        let absolute = self.seq.begin + offset;
        loop {
            // Overwritten before we got here; only possible unguaranteed.
            if state.reserve_head.saturating_sub(absolute) > state.total_span as u64 {
                return Err(Status::EndOfData);
            }
            let seq_end = self.seq.end_offset();
            let limit = if seq_end == SEQUENCE_OPEN {
                state.head
            } else {
                seq_end
            };
            let avail = limit.saturating_sub(absolute) as usize;
            let want = size.min(avail);
            let complete = avail >= size || seq_end != SEQUENCE_OPEN || state.shutdown;
            if complete && want > 0 {
                let ghost_free = !state.wraps(absolute, want) || state.wrapped_wspans == 0;
                if ghost_free {
                    let wrapped = state.wraps(absolute, want);
                    if wrapped {
                        state.front_to_ghost(absolute, want)?;
                        state.wrapped_rspans += 1;
                    }
                    if self.guarantee {
                        state.pin(absolute);
                        if self.open_pin {
                            state.unpin(self.seq.begin);
                            self.open_pin = false;
                        }
                    }
                    state.open_rspans += 1;
                    let span = ReadSpan {
                        ring: Arc::clone(&self.ring),
                        ptr: state.span_ptr(absolute),
                        row_stride: state.row_stride(),
                        nringlet: state.nringlet,
                        offset: absolute,
                        size: want,
                        pinned: self.guarantee,
                        wrapped,
                    };
                    drop(state);
                    self.ring.writable.notify_all();
                    return Ok(span);
                }
            } else if complete {
                return Err(Status::EndOfData);
            }
            if state.shutdown {
                return Err(Status::EndOfData);
            }
            state = self
                .ring
                .readable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Step to the next sequence in the ring. `EndOfData` when the writer
    /// has finished and nothing follows.
    pub fn next(&mut self) -> Result<()> {
        let mut state = self.ring.lock_state();
        loop {
            let position = state
                .sequences
                .iter()
                .position(|other| Arc::ptr_eq(other, &self.seq));
            let following = position.and_then(|p| state.sequences.get(p + 1)).cloned();
            if let Some(next) = following {
                if self.guarantee {
                    state.pin(next.begin);
                    if self.open_pin {
                        state.unpin(self.seq.begin);
                    }
                    self.open_pin = true;
                }
                self.seq = next;
                return Ok(());
            }
            if state.shutdown || state.writing_ended {
                return Err(Status::EndOfData);
            }
            state = self
                .ring
                .readable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for ReadSequence {
    fn drop(&mut self) {
        if self.open_pin {
            let mut state = self.ring.lock_state();
            state.unpin(self.seq.begin);
            drop(state);
            self.ring.writable.notify_all();
        }
    }
}

/// An acquired, readable byte range. Released on drop.
pub struct ReadSpan {
    ring: Arc<RingInner>,
    ptr: *mut u8,
    row_stride: usize,
    nringlet: usize,
    offset: u64,
    size: usize,
    pinned: bool,
    wrapped: bool,
}

unsafe impl Send for ReadSpan {}

impl ReadSpan {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn nringlet(&self) -> usize {
        self.nringlet
    }

    /// Read-only view of the span (first ringlet row). Only meaningful for
    /// host-space rings.
    pub fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }
}

impl Drop for ReadSpan {
    fn drop(&mut self) {
        let mut state = self.ring.lock_state();
        if self.pinned {
            state.unpin(self.offset);
        }
        if self.wrapped {
            state.wrapped_rspans -= 1;
        }
        state.open_rspans -= 1;
        drop(state);
        self.ring.writable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn ring_with(span: usize, total: usize) -> Ring {
        let ring = Ring::new(Space::System, "test");
        ring.resize(span, Some(total), 1).unwrap();
        ring
    }

    fn fill(span: &mut WriteSpan, value: u8) {
        span.data().fill(value);
    }

    #[test]
    fn write_then_read_round_trip() {
        let ring = ring_with(64, 256);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("obs1", 1000, b"hdr", 1).unwrap();
        for value in 1..=3u8 {
            let mut span = seq.reserve(64, false).unwrap();
            fill(&mut span, value);
            span.commit(64).unwrap();
        }
        seq.end().unwrap();
        drop(writer);

        let mut read = ring.open_earliest(true).unwrap();
        assert_eq!(read.name(), "obs1");
        assert_eq!(read.time_tag(), 1000);
        assert_eq!(read.header(), b"hdr");
        assert_eq!(read.size(), 192);
        for (index, value) in (1..=3u8).enumerate() {
            let span = read.acquire(index as u64 * 64, 64).unwrap();
            assert!(span.data().iter().all(|&b| b == value));
        }
        assert_eq!(read.next(), Err(Status::EndOfData));
    }

    #[test]
    fn short_span_at_sequence_end() {
        let ring = ring_with(64, 256);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("s", 0, b"", 1).unwrap();
        let mut span = seq.reserve(40, false).unwrap();
        fill(&mut span, 7);
        span.commit(40).unwrap();
        seq.end().unwrap();
        drop(writer);

        let mut read = ring.open_earliest(false).unwrap();
        let span = read.acquire(0, 64).unwrap();
        assert_eq!(span.size(), 40);
        drop(span);
        assert!(matches!(read.acquire(40, 64), Err(Status::EndOfData)));
    }

    #[test]
    fn wrapped_spans_stay_contiguous() {
        // 128-byte window, 48-byte spans: the third span wraps through the
        // ghost region on both the write and the read side.
        let ring = ring_with(64, 128);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("wrap", 0, b"", 1).unwrap();
        let mut read = ring.open_earliest(true).unwrap();
        for (index, value) in (1..=5u8).enumerate() {
            let mut span = seq.reserve(48, false).unwrap();
            fill(&mut span, value);
            span.commit(48).unwrap();
            let got = read.acquire(index as u64 * 48, 48).unwrap();
            assert!(
                got.data().iter().all(|&b| b == value),
                "span {} corrupted",
                index
            );
        }
    }

    #[test]
    fn reserve_blocks_until_reader_releases() {
        let ring = ring_with(64, 64);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("bp", 0, b"", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 1);
        span.commit(64).unwrap();

        let mut read = ring.open_earliest(true).unwrap();
        let held = read.acquire(0, 64).unwrap();

        // Full window pinned: a second reserve must block.
        assert!(matches!(seq.reserve(64, true), Err(Status::WouldBlock)));

        let ring2 = ring.clone();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(held);
            drop(ring2);
        });
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 2);
        span.commit(64).unwrap();
        releaser.join().unwrap();
    }

    #[test]
    fn shutdown_interrupts_blocked_reserve() {
        let ring = ring_with(64, 64);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("sd", 0, b"", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 9);
        span.commit(64).unwrap();

        let mut read = ring.open_earliest(true).unwrap();
        let held = read.acquire(0, 64).unwrap();

        let ring2 = ring.clone();
        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            ring2.shutdown();
        });
        assert!(matches!(seq.reserve(64, false), Err(Status::EndOfData)));
        killer.join().unwrap();

        // Committed data stays readable after shutdown.
        assert!(held.data().iter().all(|&b| b == 9));
    }

    #[test]
    fn sequence_change_closes_previous() {
        let ring = ring_with(64, 256);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("first", 10, b"a", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 1);
        span.commit(64).unwrap();
        drop(seq);
        let mut seq = writer.begin_sequence("second", 20, b"b", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 2);
        span.commit(64).unwrap();
        drop(seq);
        drop(writer);

        let mut read = ring.open_earliest(false).unwrap();
        assert_eq!(read.name(), "first");
        assert_eq!(read.size(), 64);
        read.next().unwrap();
        assert_eq!(read.name(), "second");
        assert_eq!(read.header(), b"b");
        assert_eq!(read.size(), 64);

        let by_name = ring.open_by_name("second", false).unwrap();
        assert_eq!(by_name.time_tag(), 20);
        let at = ring.open_at(15, false).unwrap();
        assert_eq!(at.name(), "second");
    }

    #[test]
    fn only_last_span_may_shrink() {
        let ring = ring_with(64, 256);
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("sh", 0, b"", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 3);
        span.commit(32).unwrap();
        // The rollback frees the reservation: the next span lands at 32.
        let span = seq.reserve(64, false).unwrap();
        assert_eq!(span.offset(), 32);
    }

    #[test]
    fn resize_is_grow_only_and_validates() {
        let ring = Ring::new(Space::System, "rz");
        assert_eq!(ring.resize(0, None, 1), Err(Status::InvalidArgument));
        ring.resize(64, Some(100), 1).unwrap(); // rounds up to 128
        let mut writer = ring.begin_writing().unwrap();
        let mut seq = writer.begin_sequence("r", 0, b"", 1).unwrap();
        let mut span = seq.reserve(64, false).unwrap();
        fill(&mut span, 5);
        span.commit(64).unwrap();
        // Growing keeps retained bytes readable.
        ring.resize(64, Some(512), 1).unwrap();
        let mut read = ring.open_earliest(false).unwrap();
        let got = read.acquire(0, 64).unwrap();
        assert!(got.data().iter().all(|&b| b == 5));
    }

    #[test]
    fn second_writer_is_rejected() {
        let ring = ring_with(64, 64);
        let writer = ring.begin_writing().unwrap();
        assert_eq!(ring.begin_writing().err(), Some(Status::InvalidState));
        drop(writer);
        assert!(ring.begin_writing().is_ok());
    }
}
