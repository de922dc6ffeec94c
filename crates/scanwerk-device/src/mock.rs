// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted in-memory backend for tests.
//
// The backend value itself moves into the executor worker thread, so all
// state lives behind a shared handle: tests keep a clone and script or
// inspect the device from outside while the engine drives it from the
// worker.

use std::sync::{Arc, Mutex};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    DeviceInfo, FrameParameters, FrameType, HardwareStatus, OptionDescriptor, OptionValue,
    ReadOutcome, SetOptionInfo,
};

use crate::backend::DeviceBackend;

struct MockState {
    devices: Vec<DeviceInfo>,
    descriptors: Vec<OptionDescriptor>,
    values: Vec<OptionValue>,
    set_info: SetOptionInfo,
    params: FrameParameters,
    payload: Vec<u8>,
    /// Largest byte count a single `read` call will produce.
    chunk: usize,
    cursor: usize,
    open: Option<String>,
    started: bool,
    cancelled: bool,
    fail_open: Option<(HardwareStatus, String)>,
    fail_start: Option<(HardwareStatus, String)>,
    /// Injected error returned by the next `read` call.
    fail_read: Option<(HardwareStatus, String)>,
    open_count: usize,
    close_count: usize,
    cancel_count: usize,
}

/// Scripted scanner backend.
///
/// Clones share state, so a test can keep one handle for scripting and
/// assertions while another is owned by the executor worker.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices: vec![DeviceInfo {
                    name: "mock:0".into(),
                    vendor: "Scanwerk".into(),
                    model: "Mock 100".into(),
                    kind: "flatbed scanner".into(),
                }],
                descriptors: Vec::new(),
                values: Vec::new(),
                set_info: SetOptionInfo::default(),
                params: FrameParameters {
                    frame_type: FrameType::Gray,
                    last_frame: true,
                    bytes_per_line: 8,
                    pixels_per_line: 8,
                    lines: Some(4),
                    depth: 8,
                },
                payload: vec![0u8; 32],
                chunk: 16,
                cursor: 0,
                open: None,
                started: false,
                cancelled: false,
                fail_open: None,
                fail_start: None,
                fail_read: None,
                open_count: 0,
                close_count: 0,
                cancel_count: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock poisoned")
    }

    // ---- scripting ----

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        self.lock().devices = devices;
    }

    /// Script the frame the next scan will deliver.
    pub fn set_payload(&self, params: FrameParameters, payload: Vec<u8>, chunk: usize) {
        let mut s = self.lock();
        s.params = params;
        s.payload = payload;
        s.chunk = chunk;
        s.cursor = 0;
    }

    pub fn set_options(&self, descriptors: Vec<OptionDescriptor>, values: Vec<OptionValue>) {
        let mut s = self.lock();
        s.descriptors = descriptors;
        s.values = values;
    }

    /// Info flags every subsequent `set_option_value` call reports.
    pub fn set_option_info(&self, info: SetOptionInfo) {
        self.lock().set_info = info;
    }

    pub fn fail_next_open(&self, status: HardwareStatus, detail: &str) {
        self.lock().fail_open = Some((status, detail.to_owned()));
    }

    pub fn fail_next_start(&self, status: HardwareStatus, detail: &str) {
        self.lock().fail_start = Some((status, detail.to_owned()));
    }

    pub fn fail_next_read(&self, status: HardwareStatus, detail: &str) {
        self.lock().fail_read = Some((status, detail.to_owned()));
    }

    // ---- inspection ----

    pub fn open_device(&self) -> Option<String> {
        self.lock().open.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancel_count
    }

    pub fn option_values(&self) -> Vec<OptionValue> {
        self.lock().values.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn require_open(s: &MockState) -> Result<()> {
    if s.open.is_none() {
        return Err(ScanwerkError::InvalidState("no device open".into()));
    }
    Ok(())
}

impl DeviceBackend for MockBackend {
    fn list_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(self.lock().devices.clone())
    }

    fn open(&mut self, name: &str) -> Result<()> {
        let mut s = self.lock();
        if let Some((status, detail)) = s.fail_open.take() {
            return Err(ScanwerkError::hardware(status, detail));
        }
        if !s.devices.iter().any(|d| d.name == name) {
            return Err(ScanwerkError::Device(format!("no such device: {name}")));
        }
        s.open = Some(name.to_owned());
        s.open_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut s = self.lock();
        if s.open.take().is_some() {
            s.close_count += 1;
        }
        s.started = false;
        s.cursor = 0;
        Ok(())
    }

    fn option_descriptors(&mut self) -> Result<Vec<OptionDescriptor>> {
        let s = self.lock();
        require_open(&s)?;
        Ok(s.descriptors.clone())
    }

    fn option_value(&mut self, index: usize) -> Result<OptionValue> {
        let s = self.lock();
        require_open(&s)?;
        s.values
            .get(index)
            .cloned()
            .ok_or_else(|| ScanwerkError::Device(format!("no option at index {index}")))
    }

    fn set_option_value(&mut self, index: usize, value: OptionValue) -> Result<SetOptionInfo> {
        let mut s = self.lock();
        require_open(&s)?;
        if index >= s.values.len() {
            return Err(ScanwerkError::Device(format!("no option at index {index}")));
        }
        s.values[index] = value;
        Ok(s.set_info)
    }

    fn parameters(&mut self) -> Result<FrameParameters> {
        let s = self.lock();
        require_open(&s)?;
        Ok(s.params.clone())
    }

    fn start(&mut self) -> Result<()> {
        let mut s = self.lock();
        require_open(&s)?;
        if let Some((status, detail)) = s.fail_start.take() {
            return Err(ScanwerkError::hardware(status, detail));
        }
        s.started = true;
        s.cancelled = false;
        s.cursor = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let mut s = self.lock();
        require_open(&s)?;
        if !s.started {
            return Err(ScanwerkError::InvalidState("read without start".into()));
        }
        if s.cancelled {
            return Err(ScanwerkError::hardware(
                HardwareStatus::Cancelled,
                "acquisition cancelled",
            ));
        }
        if let Some((status, detail)) = s.fail_read.take() {
            return Err(ScanwerkError::hardware(status, detail));
        }
        let remaining = s.payload.len() - s.cursor;
        if remaining == 0 {
            s.started = false;
            return Ok(ReadOutcome::EndOfStream);
        }
        let n = remaining.min(s.chunk).min(buf.len());
        let cursor = s.cursor;
        buf[..n].copy_from_slice(&s.payload[cursor..cursor + n]);
        s.cursor += n;
        Ok(ReadOutcome::Data(n))
    }

    fn cancel(&mut self) -> Result<()> {
        let mut s = self.lock();
        s.cancelled = true;
        s.cancel_count += 1;
        Ok(())
    }
}
