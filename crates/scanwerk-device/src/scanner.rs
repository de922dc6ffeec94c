// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Polling bridge between the UI thread and the device worker.
//
// Every public method returns immediately: device calls are submitted to
// the serial executor and their completions are observed by `perform_step`,
// which the UI drives from a timer.  Completions surface as `ScannerEvent`s
// drained via `take_events` — the bridge never calls back into the UI.
//
// The timer itself is started and stopped by the UI in response to
// `StartPolling` / `StopPolling`, emitted exactly on the edges where the
// set of outstanding work becomes non-empty / empty.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, warn};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    DeviceInfo, FrameParameters, HardwareStatus, OptionDescriptor, OptionValue,
};

use crate::backend::DeviceBackend;
use crate::buffer::BufferManager;
use crate::executor::{PendingResult, SerialTaskExecutor};
use crate::raster::ScanImage;
use crate::session::{DeviceContext, ScanSession};

/// Notifications drained by the UI after each polling step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScannerEvent {
    DevicesRefreshed(Vec<DeviceInfo>),
    DeviceOpened { name: String },
    DeviceClosed,
    /// The full descriptor set changed and must replace any cached copy.
    OptionsChanged(Vec<OptionDescriptor>),
    /// Fresh current values, one `(option name, value)` pair per option.
    OptionValuesChanged(Vec<(String, OptionValue)>),
    /// The scan ended.  `error` is `None` on success and on user
    /// cancellation.
    ScanFinished { error: Option<String> },
    /// New scan lines were assembled into the raster.
    ImageUpdated,
    /// A submitted device call failed.
    OperationFailed { context: String, error: String },
    /// Outstanding work appeared: the UI should start its polling timer.
    StartPolling,
    /// All outstanding work completed: the timer can stop.
    StopPolling,
}

/// An operation whose completion is being polled: returns true once the
/// result was taken and its continuation ran.
type PendingOp<B> = Box<dyn FnMut(&mut Scanner<B>) -> bool>;

type IdleCallback<B> = Box<dyn FnOnce(&mut Scanner<B>)>;

/// UI-facing scanner orchestrator.
pub struct Scanner<B: DeviceBackend> {
    executor: SerialTaskExecutor<DeviceContext<B>>,
    pending: Vec<PendingOp<B>>,
    idle: VecDeque<IdleCallback<B>>,
    events: VecDeque<ScannerEvent>,
    /// True between the StartPolling and StopPolling edges.
    polling: bool,

    buffers: Arc<BufferManager>,
    config: EngineConfig,
    session: Option<ScanSession>,
    image: Option<ScanImage>,

    devices: Vec<DeviceInfo>,
    open_device: Option<String>,
    descriptors: Vec<OptionDescriptor>,
    frame_params: Option<FrameParameters>,
}

impl<B: DeviceBackend> Scanner<B> {
    /// Spawn the device worker around `backend` and return the bridge.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self> {
        let executor = SerialTaskExecutor::new("scanwerk-device", move |sched| {
            DeviceContext::new(backend, sched)
        })?;
        let buffers = Arc::new(BufferManager::new(config.buffer.max_total_bytes));
        Ok(Self {
            executor,
            pending: Vec::new(),
            idle: VecDeque::new(),
            events: VecDeque::new(),
            polling: false,
            buffers,
            config,
            session: None,
            image: None,
            devices: Vec::new(),
            open_device: None,
            descriptors: Vec::new(),
            frame_params: None,
        })
    }

    // ---- queries ----

    /// Devices from the most recent refresh.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn open_device_name(&self) -> Option<&str> {
        self.open_device.as_deref()
    }

    /// Cached descriptors of the open device.
    pub fn option_descriptors(&self) -> &[OptionDescriptor] {
        &self.descriptors
    }

    /// Frame parameters most recently reported by the device.
    pub fn frame_parameters(&self) -> Option<&FrameParameters> {
        self.frame_params.as_ref()
    }

    /// The raster assembled by the current or most recent scan.
    pub fn scan_image(&self) -> Option<&ScanImage> {
        self.image.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    /// Drain all queued events, oldest first.
    pub fn take_events(&mut self) -> Vec<ScannerEvent> {
        self.events.drain(..).collect()
    }

    // ---- device operations ----

    /// Re-enumerate available devices; completes as `DevicesRefreshed`.
    pub fn refresh_devices(&mut self) -> Result<()> {
        let pending = self.executor.submit(|ctx| ctx.backend.list_devices())?;
        self.track(pending, |scanner, result| match result {
            Ok(devices) => {
                scanner.devices = devices.clone();
                scanner.push_event(ScannerEvent::DevicesRefreshed(devices));
            }
            Err(err) => scanner.push_failure("refresh devices", &err),
        });
        Ok(())
    }

    /// Open the named device and fetch its option descriptors.
    ///
    /// Completes as `DeviceOpened` + `OptionsChanged`, followed by an
    /// `OptionValuesChanged` once the current values arrive.
    pub fn open_device(&mut self, name: &str) -> Result<()> {
        if self.open_device.is_some() {
            return Err(ScanwerkError::InvalidState(
                "a device is already open".into(),
            ));
        }
        let to_open = name.to_owned();
        let pending = self.executor.submit(move |ctx| {
            ctx.backend.open(&to_open)?;
            ctx.backend.option_descriptors()
        })?;
        let name = name.to_owned();
        self.track(pending, move |scanner, result| match result {
            Ok(descriptors) => {
                info!(device = %name, "device opened");
                scanner.open_device = Some(name.clone());
                scanner.descriptors = descriptors.clone();
                scanner.push_event(ScannerEvent::DeviceOpened { name });
                scanner.push_event(ScannerEvent::OptionsChanged(descriptors));
                scanner.refresh_option_values();
            }
            Err(err) => scanner.push_failure("open device", &err),
        });
        Ok(())
    }

    /// Close the open device; an active scan is cancelled first.
    pub fn close_device(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            session.request_cancel();
        }
        let pending = self.executor.submit(|ctx| ctx.backend.close())?;
        self.track(pending, |scanner, result| {
            scanner.open_device = None;
            scanner.descriptors.clear();
            scanner.frame_params = None;
            if let Err(err) = result {
                warn!(error = %err, "device close failed");
            }
            scanner.push_event(ScannerEvent::DeviceClosed);
        });
        Ok(())
    }

    /// Set a device option by name.
    ///
    /// The driver's info flags steer the follow-up: `reload_options`
    /// re-fetches the whole descriptor set, `reload_params` the frame
    /// parameters; either way fresh values surface as
    /// `OptionValuesChanged`.
    pub fn set_option_value(&mut self, name: &str, value: OptionValue) -> Result<()> {
        let desc = self
            .descriptors
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ScanwerkError::InvalidState(format!("unknown option: {name}")))?;
        if !desc.settable {
            return Err(ScanwerkError::InvalidState(format!(
                "option is not settable: {name}"
            )));
        }
        let index = desc.index;
        let pending = self
            .executor
            .submit(move |ctx| ctx.backend.set_option_value(index, value))?;
        self.track(pending, move |scanner, result| match result {
            Ok(info) => {
                debug!(option = index, ?info, "option set");
                if info.reload_options {
                    scanner.reload_descriptors();
                } else {
                    scanner.refresh_option_values();
                }
                if info.reload_params {
                    scanner.reload_frame_parameters();
                }
            }
            Err(err) => scanner.push_failure("set option", &err),
        });
        Ok(())
    }

    /// Begin a scan on the open device.
    pub fn start_scan(&mut self) -> Result<()> {
        if self.open_device.is_none() {
            return Err(ScanwerkError::InvalidState("no device open".into()));
        }
        if self.session.is_some() {
            return Err(ScanwerkError::InvalidState(
                "a scan is already in progress".into(),
            ));
        }
        let session = ScanSession::new(Arc::clone(&self.buffers), self.config.scan.clone());
        session.begin(&self.executor.scheduler());
        self.session = Some(session);
        self.image = None;
        self.note_polling_needed();
        Ok(())
    }

    /// Ask the running scan to stop.  A no-op when nothing is scanning.
    ///
    /// Completion still arrives as `ScanFinished` (with no error text).
    pub fn cancel_scan(&mut self) {
        if let Some(session) = &self.session {
            session.request_cancel();
        }
    }

    /// Run `f` once no operation, scan, or earlier idle callback remains.
    pub fn call_when_idle(&mut self, f: impl FnOnce(&mut Self) + 'static) {
        self.idle.push_back(Box::new(f));
        self.note_polling_needed();
    }

    // ---- polling ----

    /// One polling step, driven by the UI timer.
    ///
    /// Safe to call at any time, including with nothing outstanding.  Polls
    /// every pending operation (continuations may append more, which are
    /// merged and polled next step), drains scan lines into the raster,
    /// finishes a completed scan, runs idle callbacks, and emits the
    /// `StopPolling` edge when the last piece of work is gone.
    pub fn perform_step(&mut self) {
        let mut ops = mem::take(&mut self.pending);
        ops.retain_mut(|op| !op(self));
        // Continuations appended into self.pending while ops was out.
        let appended = mem::take(&mut self.pending);
        self.pending = ops;
        self.pending.extend(appended);

        self.pump_scan();

        while self.pending.is_empty() && self.session.is_none() {
            let Some(f) = self.idle.pop_front() else { break };
            f(self);
        }

        if self.polling && self.pending.is_empty() && self.session.is_none() && self.idle.is_empty()
        {
            self.polling = false;
            self.events.push_back(ScannerEvent::StopPolling);
        }
    }

    // ---- internals ----

    /// Register a submitted operation and its completion continuation.
    fn track<R: Send + 'static>(
        &mut self,
        pending: PendingResult<R>,
        on_done: impl FnOnce(&mut Self, Result<R>) + 'static,
    ) {
        let mut on_done = Some(on_done);
        self.pending.push(Box::new(move |scanner| {
            match pending.try_take() {
                Some(result) => {
                    if let Some(f) = on_done.take() {
                        f(scanner, result);
                    }
                    true
                }
                None => false,
            }
        }));
        self.note_polling_needed();
    }

    fn note_polling_needed(&mut self) {
        if !self.polling {
            self.polling = true;
            self.events.push_back(ScannerEvent::StartPolling);
        }
    }

    fn push_event(&mut self, event: ScannerEvent) {
        self.events.push_back(event);
    }

    fn push_failure(&mut self, context: &str, err: &ScanwerkError) {
        warn!(context, error = %err, "device operation failed");
        self.events.push_back(ScannerEvent::OperationFailed {
            context: context.to_owned(),
            error: err.to_string(),
        });
    }

    fn refresh_option_values(&mut self) {
        let specs: Vec<(usize, String)> = self
            .descriptors
            .iter()
            .map(|d| (d.index, d.name.clone()))
            .collect();
        let submitted = self.executor.submit(move |ctx| {
            let mut values = Vec::with_capacity(specs.len());
            for (index, name) in specs {
                values.push((name, ctx.backend.option_value(index)?));
            }
            Ok(values)
        });
        match submitted {
            Ok(pending) => self.track(pending, |scanner, result| match result {
                Ok(values) => scanner.push_event(ScannerEvent::OptionValuesChanged(values)),
                Err(err) => scanner.push_failure("read option values", &err),
            }),
            Err(err) => warn!(error = %err, "option value refresh not submitted"),
        }
    }

    fn reload_descriptors(&mut self) {
        let submitted = self.executor.submit(|ctx| ctx.backend.option_descriptors());
        match submitted {
            Ok(pending) => self.track(pending, |scanner, result| match result {
                Ok(descriptors) => {
                    scanner.descriptors = descriptors.clone();
                    scanner.push_event(ScannerEvent::OptionsChanged(descriptors));
                    scanner.refresh_option_values();
                }
                Err(err) => scanner.push_failure("reload options", &err),
            }),
            Err(err) => warn!(error = %err, "descriptor reload not submitted"),
        }
    }

    fn reload_frame_parameters(&mut self) {
        let submitted = self.executor.submit(|ctx| ctx.backend.parameters());
        match submitted {
            Ok(pending) => self.track(pending, |scanner, result| match result {
                Ok(params) => {
                    debug!(?params.frame_type, lines = ?params.lines, "frame parameters reloaded");
                    scanner.frame_params = Some(params);
                }
                Err(err) => scanner.push_failure("reload parameters", &err),
            }),
            Err(err) => warn!(error = %err, "parameter reload not submitted"),
        }
    }

    /// Move completed scan lines into the raster and handle scan
    /// completion, including the close/reopen recovery cycle after a
    /// recoverable device error.
    fn pump_scan(&mut self) {
        if self.session.is_none() {
            return;
        }
        if self.image.is_none() {
            if let Some(params) = self.session.as_ref().and_then(|s| s.params()) {
                self.frame_params = Some(params.clone());
                self.image = Some(ScanImage::new(params));
            }
        }

        let mut delivered = 0;
        if let (Some(session), Some(image)) = (&self.session, &mut self.image) {
            delivered = session.receive_read_lines(|line, bytes| image.put_line(line, bytes));
            if session.is_finished() {
                // Final drain: the worker may have filled slots between the
                // drain above and setting the finished flag.
                delivered += session.receive_read_lines(|line, bytes| image.put_line(line, bytes));
            }
        }
        if delivered > 0 {
            self.events.push_back(ScannerEvent::ImageUpdated);
        }

        let finished = self.session.as_ref().is_some_and(|s| s.is_finished());
        if !finished {
            return;
        }
        let session = self.session.take().expect("session checked above");
        match session.take_error() {
            None => self.push_event(ScannerEvent::ScanFinished { error: None }),
            Some(err) => {
                let cancelled = matches!(
                    err,
                    ScanwerkError::Hardware {
                        status: HardwareStatus::Cancelled,
                        ..
                    }
                );
                let recover = err.is_recoverable_scan_error();
                self.push_event(ScannerEvent::ScanFinished {
                    error: if cancelled { None } else { Some(err.to_string()) },
                });
                if recover {
                    self.recover_device();
                }
            }
        }
    }

    /// Force-close and reopen the device after a recoverable scan error,
    /// resetting driver state.  The UI sees the ordinary closed/opened
    /// event pair.
    fn recover_device(&mut self) {
        let Some(name) = self.open_device.clone() else {
            return;
        };
        info!(device = %name, "recovering device after scan error");
        let reopen = name.clone();
        let submitted = self.executor.submit(move |ctx| {
            // The driver may be wedged; a failed close must not stop the
            // reopen attempt.
            if let Err(err) = ctx.backend.close() {
                debug!(error = %err, "close during recovery failed");
            }
            ctx.backend.open(&reopen)
        });
        match submitted {
            Ok(pending) => self.track(pending, move |scanner, result| match result {
                Ok(()) => {
                    scanner.push_event(ScannerEvent::DeviceClosed);
                    scanner.push_event(ScannerEvent::DeviceOpened { name });
                }
                Err(err) => {
                    scanner.open_device = None;
                    scanner.descriptors.clear();
                    scanner.push_event(ScannerEvent::DeviceClosed);
                    scanner.push_failure("reopen device", &err);
                }
            }),
            Err(err) => warn!(error = %err, "device recovery not submitted"),
        }
    }
}

impl<B: DeviceBackend> Drop for Scanner<B> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.request_cancel();
        }
        // Fire-and-forget close; the executor's own drop drains the queue
        // behind it.
        self.executor.scheduler().schedule(|ctx| {
            if let Err(err) = ctx.backend.close() {
                debug!(error = %err, "close during shutdown failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use scanwerk_core::types::{FrameType, OptionConstraint, SetOptionInfo};
    use std::time::Duration;

    fn gray_params(lines: Option<u32>) -> FrameParameters {
        FrameParameters {
            frame_type: FrameType::Gray,
            last_frame: true,
            bytes_per_line: 8,
            pixels_per_line: 8,
            lines,
            depth: 8,
        }
    }

    fn resolution_option() -> (Vec<OptionDescriptor>, Vec<OptionValue>) {
        (
            vec![OptionDescriptor {
                index: 0,
                name: "resolution".into(),
                title: "Scan resolution".into(),
                description: "Resolution in dots per inch".into(),
                constraint: OptionConstraint::NumberList(vec![75.0, 150.0, 300.0]),
                settable: true,
            }],
            vec![OptionValue::Int(150)],
        )
    }

    fn new_scanner(backend: MockBackend) -> Scanner<MockBackend> {
        Scanner::new(backend, EngineConfig::default()).expect("spawn scanner")
    }

    /// Step the bridge until `StopPolling`, collecting every event.
    fn pump(scanner: &mut Scanner<MockBackend>) -> Vec<ScannerEvent> {
        let mut events = scanner.take_events();
        for _ in 0..5000 {
            scanner.perform_step();
            let batch = scanner.take_events();
            let done = batch.contains(&ScannerEvent::StopPolling);
            events.extend(batch);
            if done {
                return events;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("polling never stopped; events so far: {events:?}");
    }

    #[test]
    fn refresh_emits_start_devices_stop() {
        let mut scanner = new_scanner(MockBackend::new());
        scanner.refresh_devices().expect("refresh");

        let events = pump(&mut scanner);
        assert_eq!(events.first(), Some(&ScannerEvent::StartPolling));
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::DevicesRefreshed(devices) if devices.len() == 1)));
        assert_eq!(events.last(), Some(&ScannerEvent::StopPolling));
        assert_eq!(scanner.devices().len(), 1);

        // Idempotent with nothing outstanding: no spurious events.
        scanner.perform_step();
        assert!(scanner.take_events().is_empty());
    }

    #[test]
    fn start_polling_is_emitted_once_per_edge() {
        let mut scanner = new_scanner(MockBackend::new());
        scanner.refresh_devices().expect("refresh");
        scanner.refresh_devices().expect("refresh again");

        let events = pump(&mut scanner);
        let starts = events
            .iter()
            .filter(|e| matches!(e, ScannerEvent::StartPolling))
            .count();
        let stops = events
            .iter()
            .filter(|e| matches!(e, ScannerEvent::StopPolling))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(stops, 1);
    }

    #[test]
    fn open_device_reports_options_and_values() {
        let backend = MockBackend::new();
        let (descriptors, values) = resolution_option();
        backend.set_options(descriptors, values);

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        let events = pump(&mut scanner);

        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::DeviceOpened { name } if name == "mock:0")));
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::OptionsChanged(d) if d.len() == 1)));
        assert!(events.iter().any(|e| matches!(
            e,
            ScannerEvent::OptionValuesChanged(v)
                if v == &[("resolution".to_string(), OptionValue::Int(150))]
        )));
        assert_eq!(scanner.open_device_name(), Some("mock:0"));

        // A second open while one device is active is refused.
        assert!(scanner.open_device("mock:0").is_err());
    }

    #[test]
    fn open_failure_surfaces_as_operation_failed() {
        let backend = MockBackend::new();
        backend.fail_next_open(HardwareStatus::AccessDenied, "device locked");

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("submit open");
        let events = pump(&mut scanner);

        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::OperationFailed { context, .. } if context == "open device")));
        assert_eq!(scanner.open_device_name(), None);
    }

    #[test]
    fn set_option_honors_reload_options_flag() {
        let backend = MockBackend::new();
        let (descriptors, values) = resolution_option();
        backend.set_options(descriptors, values);
        backend.set_option_info(SetOptionInfo {
            inexact: false,
            reload_options: true,
            reload_params: false,
        });

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);

        scanner
            .set_option_value("resolution", OptionValue::Int(300))
            .expect("set");
        let events = pump(&mut scanner);

        // reload_options forces a descriptor re-fetch, then fresh values.
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::OptionsChanged(_))));
        assert!(events.iter().any(|e| matches!(
            e,
            ScannerEvent::OptionValuesChanged(v)
                if v == &[("resolution".to_string(), OptionValue::Int(300))]
        )));
    }

    #[test]
    fn unknown_option_is_rejected_up_front() {
        let mut scanner = new_scanner(MockBackend::new());
        assert!(matches!(
            scanner.set_option_value("brightness", OptionValue::Int(1)),
            Err(ScanwerkError::InvalidState(_))
        ));
    }

    #[test]
    fn scan_requires_an_open_device() {
        let mut scanner = new_scanner(MockBackend::new());
        assert!(matches!(
            scanner.start_scan(),
            Err(ScanwerkError::InvalidState(_))
        ));
    }

    #[test]
    fn scan_finishes_and_fills_the_raster() {
        let backend = MockBackend::new();
        let payload: Vec<u8> = (0..64u8).collect();
        backend.set_payload(gray_params(Some(8)), payload.clone(), 8);

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);

        scanner.start_scan().expect("start scan");
        let events = pump(&mut scanner);

        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::ImageUpdated)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::ScanFinished { error: None })));

        let image = scanner.scan_image().expect("raster");
        assert_eq!(image.lines_filled(), 8);
        let rendered = image.to_dynamic_image().expect("render").into_luma8();
        assert_eq!(rendered.dimensions(), (8, 8));
        assert_eq!(rendered.get_pixel(0, 0).0, [0]);
        assert_eq!(rendered.get_pixel(7, 7).0, [63]);
    }

    #[test]
    fn recoverable_scan_error_reopens_the_device() {
        let backend = MockBackend::new();
        backend.set_payload(gray_params(Some(8)), vec![0u8; 64], 8);
        backend.fail_next_read(HardwareStatus::Jammed, "paper jam");
        let script = backend.clone();

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);

        scanner.start_scan().expect("start scan");
        let events = pump(&mut scanner);

        assert!(events.iter().any(|e| matches!(
            e,
            ScannerEvent::ScanFinished { error: Some(text) } if text.contains("jam")
        )));
        // Recovery cycle: close + reopen of the same device.
        assert!(events.iter().any(|e| matches!(e, ScannerEvent::DeviceClosed)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::DeviceOpened { name } if name == "mock:0")));
        assert_eq!(script.open_count(), 2);
        assert_eq!(script.close_count(), 1);
        assert_eq!(scanner.open_device_name(), Some("mock:0"));
    }

    #[test]
    fn cancelled_scan_finishes_without_error_text() {
        let backend = MockBackend::new();
        // Large page so the scan is still running when cancel arrives.
        backend.set_payload(gray_params(Some(10_000)), vec![0u8; 80_000], 8);
        let script = backend.clone();

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);

        scanner.start_scan().expect("start scan");
        scanner.perform_step();
        scanner.cancel_scan();
        let events = pump(&mut scanner);

        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::ScanFinished { error: None })));
        // Cancellation is not an error and must not trigger recovery.
        assert_eq!(script.open_count(), 1);
    }

    #[test]
    fn idle_callback_runs_after_outstanding_work() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut scanner = new_scanner(MockBackend::new());
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);

        scanner.refresh_devices().expect("refresh");
        scanner.call_when_idle(move |_| flag.set(true));
        assert!(!ran.get());

        pump(&mut scanner);
        assert!(ran.get());
    }

    #[test]
    fn idle_callback_can_start_new_work() {
        let mut scanner = new_scanner(MockBackend::new());
        scanner.call_when_idle(|s| {
            s.refresh_devices().expect("refresh from idle");
        });

        let events = pump(&mut scanner);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScannerEvent::DevicesRefreshed(_))));
        assert_eq!(events.last(), Some(&ScannerEvent::StopPolling));
    }

    #[test]
    fn close_device_clears_cached_state() {
        let backend = MockBackend::new();
        let (descriptors, values) = resolution_option();
        backend.set_options(descriptors, values);

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);

        scanner.close_device().expect("close");
        let events = pump(&mut scanner);

        assert!(events.iter().any(|e| matches!(e, ScannerEvent::DeviceClosed)));
        assert_eq!(scanner.open_device_name(), None);
        assert!(scanner.option_descriptors().is_empty());
    }

    #[test]
    fn drop_closes_the_device() {
        let backend = MockBackend::new();
        let script = backend.clone();

        let mut scanner = new_scanner(backend);
        scanner.open_device("mock:0").expect("open");
        pump(&mut scanner);
        drop(scanner);

        assert_eq!(script.close_count(), 1);
    }
}
