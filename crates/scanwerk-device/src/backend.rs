// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device-driver abstraction.
//
// Scanner drivers expose a polling-unfriendly, blocking C-style API: open a
// device, negotiate options, start an acquisition, then read raw scan lines
// until end-of-data.  `DeviceBackend` captures exactly that surface so the
// rest of the engine can be tested against the scripted `mock` backend.

use scanwerk_core::error::Result;
use scanwerk_core::types::{
    DeviceInfo, FrameParameters, OptionDescriptor, OptionValue, ReadOutcome, SetOptionInfo,
};

/// Blocking scanner-driver interface.
///
/// A backend value is moved into the serial executor's worker thread at
/// construction and is only ever touched from there — this is the single
/// serialised call path most scanner drivers require.  The one exception is
/// [`cancel`](Self::cancel), which drivers guarantee to be callable from any
/// thread to unblock an in-flight [`read`](Self::read); the engine still
/// routes it through the worker queue and relies on the session's cancel
/// flag between reads instead.
pub trait DeviceBackend: Send + 'static {
    /// Enumerate the devices this driver can open.
    fn list_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Open the named device.  Only one device may be open at a time.
    fn open(&mut self, name: &str) -> Result<()>;

    /// Close the open device.  A no-op when nothing is open.
    fn close(&mut self) -> Result<()>;

    /// Fetch all option descriptors of the open device.
    fn option_descriptors(&mut self) -> Result<Vec<OptionDescriptor>>;

    /// Read the current value of the option at `index`.
    fn option_value(&mut self, index: usize) -> Result<OptionValue>;

    /// Set the option at `index`, returning the driver's info flags.
    fn set_option_value(&mut self, index: usize, value: OptionValue) -> Result<SetOptionInfo>;

    /// Fetch the parameters of the next (or current) frame.
    fn parameters(&mut self) -> Result<FrameParameters>;

    /// Begin acquiring a frame.
    fn start(&mut self) -> Result<()>;

    /// Blocking read of raw frame bytes into `buf`.
    ///
    /// Returns [`ReadOutcome::Data`] with the byte count actually produced
    /// (which may be less than `buf.len()`), or
    /// [`ReadOutcome::EndOfStream`] once the frame is complete.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Request cancellation of the current acquisition.
    fn cancel(&mut self) -> Result<()>;
}
