// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One scan acquisition, split across the two threads that drive it.
//
// The worker side runs a chain of self-rescheduling read steps: each step
// fills one buffer slot up to a line boundary (a few blocking device reads
// at most), then puts the next step back on the executor queue.  Keeping
// steps short keeps the queue responsive — a cancel or close submitted from
// the UI slots in between reads instead of waiting for the whole page.
//
// The consumer side (polling thread) drains completed slots line by line.
// `ScanState` is the only thing both sides share.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use scanwerk_core::config::ScanConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{FrameParameters, HardwareStatus, ReadOutcome};

use crate::backend::DeviceBackend;
use crate::buffer::BufferManager;
use crate::executor::TaskScheduler;

/// Context owned by the executor worker thread: the device handle plus a
/// scheduler so read steps can enqueue their own continuations.
pub struct DeviceContext<B: DeviceBackend> {
    pub(crate) backend: B,
    pub(crate) scheduler: TaskScheduler<DeviceContext<B>>,
}

impl<B: DeviceBackend> DeviceContext<B> {
    pub fn new(backend: B, scheduler: TaskScheduler<DeviceContext<B>>) -> Self {
        Self { backend, scheduler }
    }
}

/// Shared state of one scan, visible to both the worker and the polling
/// thread.
pub struct ScanState {
    buffers: Arc<BufferManager>,
    params: OnceLock<FrameParameters>,
    finished: AtomicBool,
    cancel_requested: AtomicBool,
    last_frame: AtomicBool,
    lines_read: AtomicU32,
    error: Mutex<Option<ScanwerkError>>,
}

impl ScanState {
    fn new(buffers: Arc<BufferManager>) -> Self {
        Self {
            buffers,
            params: OnceLock::new(),
            finished: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            last_frame: AtomicBool::new(false),
            lines_read: AtomicU32::new(0),
            error: Mutex::new(None),
        }
    }

    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    /// Frame parameters, once the worker has fetched them.
    pub fn params(&self) -> Option<FrameParameters> {
        self.params.get().cloned()
    }

    /// Whether the worker-side read loop has ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Ask the read loop to stop at the next step boundary.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Whole lines the device has produced so far.
    pub fn lines_read(&self) -> u32 {
        self.lines_read.load(Ordering::Acquire)
    }

    /// Whether the completed frame was the acquisition's last.
    pub fn last_frame(&self) -> bool {
        self.last_frame.load(Ordering::Acquire)
    }

    /// Take the stored scan error, if the scan failed.
    pub fn take_error(&self) -> Option<ScanwerkError> {
        self.error.lock().expect("scan error lock poisoned").take()
    }

    fn fail(&self, err: ScanwerkError) {
        warn!(error = %err, "scan failed");
        *self.error.lock().expect("scan error lock poisoned") = Some(err);
        self.finished.store(true, Ordering::Release);
    }

    fn finish_frame(&self, last_frame: bool) {
        self.last_frame.store(last_frame, Ordering::Release);
        if !last_frame {
            // Per-channel pass of a three-pass device: each frame completes
            // its own session; the caller starts the next pass explicitly.
            debug!("frame complete, more frames pending");
        }
        self.finished.store(true, Ordering::Release);
    }

    fn add_lines(&self, n: u32) {
        self.lines_read.fetch_add(n, Ordering::AcqRel);
    }
}

/// Handle for one scan acquisition.
///
/// Created per scan; the buffer manager is shared across scans and reset
/// when the worker begins.
pub struct ScanSession {
    state: Arc<ScanState>,
    config: ScanConfig,
}

impl ScanSession {
    pub fn new(buffers: Arc<BufferManager>, config: ScanConfig) -> Self {
        Self {
            state: Arc::new(ScanState::new(buffers)),
            config,
        }
    }

    pub fn state(&self) -> &Arc<ScanState> {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn request_cancel(&self) {
        self.state.request_cancel();
    }

    pub fn take_error(&self) -> Option<ScanwerkError> {
        self.state.take_error()
    }

    pub fn params(&self) -> Option<FrameParameters> {
        self.state.params()
    }

    /// Kick off the acquisition on the worker thread.
    ///
    /// Resets the shared buffer ring, starts the device, fetches the frame
    /// parameters, and schedules the first read step.  Failures land in the
    /// session state, never on this caller.
    pub fn begin<B: DeviceBackend>(&self, scheduler: &TaskScheduler<DeviceContext<B>>) {
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        scheduler.schedule(move |ctx| {
            state.buffers().reset();
            if state.cancel_requested() {
                state.fail(ScanwerkError::hardware(
                    HardwareStatus::Cancelled,
                    "scan cancelled before start",
                ));
                return;
            }
            match start_frame(ctx) {
                Ok(params) => {
                    debug!(
                        ?params.frame_type,
                        params.bytes_per_line,
                        lines = ?params.lines,
                        "scan started"
                    );
                    let _ = state.params.set(params);
                    let sched = ctx.scheduler.clone();
                    sched.schedule(move |ctx| read_step(ctx, state, config));
                }
                Err(err) => state.fail(err),
            }
        });
    }

    /// Drain every completed buffer slot, invoking `callback` once per whole
    /// line in delivery order.  Returns the number of lines delivered.
    ///
    /// Polling-thread side only.
    pub fn receive_read_lines(&self, mut callback: impl FnMut(u32, &[u8])) -> usize {
        let mut delivered = 0;
        while let Some(reader) = self.state.buffers().acquire_read() {
            for (line, bytes) in reader.lines() {
                callback(line, bytes);
                delivered += 1;
            }
            if reader.finish().is_err() {
                // Ring was reset by a newer scan; stop draining stale slots.
                break;
            }
        }
        delivered
    }
}

fn start_frame<B: DeviceBackend>(ctx: &mut DeviceContext<B>) -> Result<FrameParameters> {
    ctx.backend.start()?;
    ctx.backend.parameters()
}

/// One worker-side read step.  Reschedules itself until end of frame,
/// error, or cancellation.
fn read_step<B: DeviceBackend>(
    ctx: &mut DeviceContext<B>,
    state: Arc<ScanState>,
    config: ScanConfig,
) {
    if state.cancel_requested() {
        cancel_frame(ctx, &state);
        return;
    }
    let Some(params) = state.params.get() else {
        state.fail(ScanwerkError::InvalidState(
            "read step without frame parameters".into(),
        ));
        return;
    };
    let bpl = params.bytes_per_line;
    let next_line = state.lines_read();

    // Read in chunks of whole lines; when the page length is known, never
    // request past the end (a final 1-line request lets the device report
    // end of stream).
    let mut lines = config.lines_per_read(bpl);
    if let Some(total) = params.lines {
        lines = lines.min(total.saturating_sub(next_line)).max(1);
    }

    // Back off while the consumer holds the ring full; the slot request is
    // re-checked against cancellation on every retry.
    let mut writer = loop {
        if state.cancel_requested() {
            cancel_frame(ctx, &state);
            return;
        }
        match state
            .buffers()
            .acquire_write(next_line, next_line + lines, bpl)
        {
            Some(w) => break w,
            None => std::thread::sleep(config.slot_retry_backoff()),
        }
    };

    // Drivers return arbitrary byte counts; keep reading until the slot
    // holds whole lines so no partial line is lost to truncation.
    let mut offset = 0;
    let end_of_frame = loop {
        if state.cancel_requested() {
            drop(writer);
            cancel_frame(ctx, &state);
            return;
        }
        match ctx.backend.read(&mut writer.buf_mut()[offset..]) {
            Ok(ReadOutcome::Data(n)) => {
                offset += n;
                if offset % bpl == 0 {
                    break false;
                }
            }
            Ok(ReadOutcome::EndOfStream) => break true,
            Err(err) => {
                drop(writer);
                state.fail(err);
                return;
            }
        }
    };

    let whole_lines = (offset / bpl) as u32;
    if let Err(err) = writer.finish(offset) {
        state.fail(err);
        return;
    }
    state.add_lines(whole_lines);

    if end_of_frame {
        debug!(lines = state.lines_read(), "frame complete");
        state.finish_frame(params.last_frame);
    } else {
        let sched = ctx.scheduler.clone();
        sched.schedule(move |ctx| read_step(ctx, state, config));
    }
}

fn cancel_frame<B: DeviceBackend>(ctx: &mut DeviceContext<B>, state: &ScanState) {
    if let Err(err) = ctx.backend.cancel() {
        warn!(error = %err, "device cancel failed");
    }
    state.fail(ScanwerkError::hardware(
        HardwareStatus::Cancelled,
        "scan cancelled",
    ));
}
