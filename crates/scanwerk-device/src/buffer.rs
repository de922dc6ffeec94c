// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ring-structured buffer manager between the scan-line producer and the
// display consumer.
//
// The manager owns a logical ring of reusable slots, each covering a
// contiguous range of whole scan lines, under a hard byte budget.  The
// producer (executor worker thread) acquires write slots sized to its next
// device read; the consumer (polling thread) acquires read slots in strict
// acquisition order.  "No slot available" is not an error — it is the
// back-pressure signal that makes the producer back off when the consumer
// stalls.
//
// Invariants:
//   - `next_write == next_read` means the ring is either fully drained
//     (`has_data == false`) or fully occupied by unread data (`has_data`).
//   - a slot is never read and written concurrently;
//   - at most one read handle is outstanding at any instant;
//   - the summed capacity of all slots never exceeds the budget;
//   - readers only ever see whole lines.

use std::sync::Mutex;

use tracing::{debug, trace};

use scanwerk_core::error::{Result, ScanwerkError};

/// One reusable buffer in the ring.
///
/// The byte storage is moved out into the handle while the slot is lent and
/// moved back on finish, so no two parties can ever alias it.  `capacity`
/// tracks the accounted high-water size even while the `Vec` is out.
struct Slot {
    /// Stable identity — ring insertion shifts vector positions, so handles
    /// reference slots by id, never by index.
    id: u64,
    /// `None` while the slot is lent to a writer or reader.
    buf: Option<Vec<u8>>,
    /// Accounted byte size; grows monotonically, never shrinks.
    capacity: usize,
    first_line: u32,
    /// Exclusive upper line bound.
    last_line: u32,
    line_bytes: usize,
    in_progress: bool,
}

struct RingState {
    slots: Vec<Slot>,
    next_write: usize,
    next_read: usize,
    /// True while at least one unread (or in-flight write) slot exists.
    has_data: bool,
    total_bytes: usize,
    next_slot_id: u64,
    /// At most one outstanding read handle.
    reader_out: bool,
}

/// Fixed-budget pool of scan-line buffers shared by one producer and one
/// consumer.
pub struct BufferManager {
    budget: usize,
    state: Mutex<RingState>,
}

impl BufferManager {
    /// Create a manager with a hard cap on total buffered bytes.
    pub fn new(max_total_bytes: usize) -> Self {
        Self {
            budget: max_total_bytes,
            state: Mutex::new(RingState {
                slots: Vec::new(),
                next_write: 0,
                next_read: 0,
                has_data: false,
                total_bytes: 0,
                next_slot_id: 0,
                reader_out: false,
            }),
        }
    }

    /// Acquire a write slot covering `[first_line, last_line)` at
    /// `line_bytes` bytes per line.
    ///
    /// Prefers reusing the slot at the write cursor (growing it in place if
    /// needed) over inserting a new one — this bounds total allocation to
    /// the minimum needed to sustain the actual producer/consumer overlap.
    /// Returns `None` when the budget would be exceeded or the cursor slot
    /// is still busy and nothing can be appended: the caller backs off and
    /// retries.
    ///
    /// # Panics
    /// Panics if `last_line < first_line` or `line_bytes == 0` (programmer
    /// error in the read-loop arithmetic).
    pub fn acquire_write(
        &self,
        first_line: u32,
        last_line: u32,
        line_bytes: usize,
    ) -> Option<SlotWriter<'_>> {
        assert!(last_line >= first_line, "inverted line range");
        assert!(line_bytes > 0, "zero line size");
        let requested = (last_line - first_line) as usize * line_bytes;

        let mut s = self.state.lock().expect("ring state lock poisoned");
        let n = s.slots.len();
        let full = s.has_data && n > 0 && s.next_write == s.next_read;
        let cursor_reusable = n > 0 && !full && !s.slots[s.next_write].in_progress;

        let (id, buf) = if cursor_reusable {
            let w = s.next_write;
            let grow = requested.saturating_sub(s.slots[w].capacity);
            if grow > 0 {
                if s.total_bytes + grow > self.budget {
                    trace!(requested, "write slot refused: growth would exceed budget");
                    return None;
                }
                s.total_bytes += grow;
                s.slots[w].capacity = requested;
            }
            let slot = &mut s.slots[w];
            let mut buf = slot.buf.take().expect("reusable slot holds its buffer");
            buf.resize(requested, 0);
            slot.first_line = first_line;
            slot.last_line = last_line;
            slot.line_bytes = line_bytes;
            slot.in_progress = true;
            let id = slot.id;
            s.next_write = (w + 1) % n;
            (id, buf)
        } else {
            // Cursor busy (being read or written) or ring full of unread
            // data: append a fresh slot at the cursor, budget permitting.
            if s.total_bytes + requested > self.budget {
                trace!(requested, total = s.total_bytes, "write slot refused: budget reached");
                return None;
            }
            s.total_bytes += requested;
            let id = s.next_slot_id;
            s.next_slot_id += 1;

            let w = if n == 0 { 0 } else { s.next_write };
            s.slots.insert(
                w,
                Slot {
                    id,
                    buf: None,
                    capacity: requested,
                    first_line,
                    last_line,
                    line_bytes,
                    in_progress: true,
                },
            );
            // Inserting at the write cursor displaces everything at or after
            // it; the read cursor follows its slot so delivery order is
            // preserved (oldest unread stays oldest).
            if s.next_read > w || (s.next_read == w && full) {
                s.next_read += 1;
            }
            s.next_write = (w + 1) % s.slots.len();
            (id, vec![0u8; requested])
        };

        s.has_data = true;
        trace!(id, first_line, last_line, line_bytes, "write slot acquired");
        Some(SlotWriter {
            mgr: self,
            id,
            buf: Some(buf),
            first_line,
            last_line,
            line_bytes,
        })
    }

    /// Acquire the oldest unread slot for reading.
    ///
    /// Returns `None` when there is no unread data, when the oldest unread
    /// slot is still being written, or while a previous read handle is
    /// unfinished.
    pub fn acquire_read(&self) -> Option<SlotReader<'_>> {
        let mut s = self.state.lock().expect("ring state lock poisoned");
        if s.reader_out || !s.has_data {
            return None;
        }
        let r = s.next_read;
        if s.slots[r].in_progress {
            return None;
        }

        let slot = &mut s.slots[r];
        slot.in_progress = true;
        let buf = slot.buf.take().expect("unread slot holds its buffer");
        let (id, first_line, last_line, line_bytes) =
            (slot.id, slot.first_line, slot.last_line, slot.line_bytes);

        s.next_read = (r + 1) % s.slots.len();
        if s.next_read == s.next_write {
            s.has_data = false;
        }
        s.reader_out = true;
        trace!(id, first_line, last_line, "read slot acquired");
        Some(SlotReader {
            mgr: self,
            id,
            buf: Some(buf),
            first_line,
            last_line,
            line_bytes,
        })
    }

    /// Drop all in-progress and unread state before a new scan.
    ///
    /// Handles still outstanding from the previous scan become orphans;
    /// finishing one is ignored on the drop path.
    pub fn reset(&self) {
        let mut s = self.state.lock().expect("ring state lock poisoned");
        let dropped = s.slots.len();
        s.slots.clear();
        s.next_write = 0;
        s.next_read = 0;
        s.has_data = false;
        s.total_bytes = 0;
        s.reader_out = false;
        if dropped > 0 {
            debug!(dropped, "buffer ring reset");
        }
    }

    /// Current sum of accounted slot bytes.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().expect("ring state lock poisoned").total_bytes
    }

    /// Number of slots currently in the ring.
    pub fn slot_count(&self) -> usize {
        self.state.lock().expect("ring state lock poisoned").slots.len()
    }

    /// The configured byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    fn finish_write(&self, id: u64, mut buf: Vec<u8>, actual_bytes: usize) -> Result<()> {
        let mut s = self.state.lock().expect("ring state lock poisoned");
        let Some(pos) = s.slots.iter().position(|sl| sl.id == id) else {
            return Err(ScanwerkError::InvalidState(
                "finish of a write slot the manager no longer tracks".into(),
            ));
        };
        let slot = &mut s.slots[pos];
        if !slot.in_progress || slot.buf.is_some() {
            return Err(ScanwerkError::InvalidState(
                "finish of a write slot that is not lent out".into(),
            ));
        }

        // Only whole lines are ever exposed to the reader: a short read
        // truncates the slot down to complete lines.
        let whole_lines = (actual_bytes / slot.line_bytes) as u32;
        slot.last_line = slot.first_line + whole_lines;
        buf.truncate(whole_lines as usize * slot.line_bytes);
        slot.buf = Some(buf);
        slot.in_progress = false;
        trace!(id, whole_lines, "write slot finished");
        Ok(())
    }

    fn finish_read(&self, id: u64, buf: Vec<u8>) -> Result<()> {
        let mut s = self.state.lock().expect("ring state lock poisoned");
        s.reader_out = false;
        let Some(pos) = s.slots.iter().position(|sl| sl.id == id) else {
            return Err(ScanwerkError::InvalidState(
                "finish of a read slot the manager no longer tracks".into(),
            ));
        };
        let slot = &mut s.slots[pos];
        if !slot.in_progress || slot.buf.is_some() {
            return Err(ScanwerkError::InvalidState(
                "finish of a read slot that is not lent out".into(),
            ));
        }
        slot.buf = Some(buf);
        slot.in_progress = false;
        trace!(id, "read slot finished");
        Ok(())
    }
}

/// Exclusive handle to a slot being written.
///
/// Dropping an unfinished writer finishes it with zero bytes, so an early
/// return can never leak a permanently locked slot or expose partial data.
pub struct SlotWriter<'a> {
    mgr: &'a BufferManager,
    id: u64,
    buf: Option<Vec<u8>>,
    first_line: u32,
    last_line: u32,
    line_bytes: usize,
}

impl SlotWriter<'_> {
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// Exclusive upper bound of the line range.
    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    /// The buffer to read device bytes into, sized to the requested range.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("writer holds its buffer until finish")
    }

    /// Release the slot with the byte count actually produced.
    ///
    /// A count that is not a multiple of the line size is truncated down to
    /// whole lines.
    pub fn finish(mut self, actual_bytes: usize) -> Result<()> {
        let buf = self.buf.take().expect("writer holds its buffer until finish");
        self.mgr.finish_write(self.id, buf, actual_bytes)
    }
}

impl Drop for SlotWriter<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if self.mgr.finish_write(self.id, buf, 0).is_err() {
                // The ring was reset underneath us; nothing to release.
                debug!(id = self.id, "orphaned write slot discarded");
            }
        }
    }
}

/// Exclusive handle to a finished slot being read.
pub struct SlotReader<'a> {
    mgr: &'a BufferManager,
    id: u64,
    buf: Option<Vec<u8>>,
    first_line: u32,
    last_line: u32,
    line_bytes: usize,
}

impl SlotReader<'_> {
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// Exclusive upper bound of the line range.
    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    /// All whole-line bytes held by this slot.
    pub fn data(&self) -> &[u8] {
        self.buf.as_deref().expect("reader holds its buffer until finish")
    }

    /// Iterate `(line_index, line_bytes)` pairs in increasing line order.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.data()
            .chunks_exact(self.line_bytes)
            .enumerate()
            .map(|(i, chunk)| (self.first_line + i as u32, chunk))
    }

    /// Release the slot for reuse by the producer.
    pub fn finish(mut self) -> Result<()> {
        let buf = self.buf.take().expect("reader holds its buffer until finish");
        self.mgr.finish_read(self.id, buf)
    }
}

impl Drop for SlotReader<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if self.mgr.finish_read(self.id, buf).is_err() {
                debug!(id = self.id, "orphaned read slot discarded");
            }
        }
    }
}
