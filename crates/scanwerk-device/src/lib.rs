// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk device core — asynchronous scanner I/O and buffering.
//
// Two threads matter here: the executor worker thread, which runs every
// device-facing closure strictly serialised (scanner drivers are rarely
// thread-safe), and the UI/polling thread, which drives `Scanner::perform_step`
// from an external timer and consumes buffered scan lines.  The `BufferManager`
// ring sits between them with a hard byte budget; the producer backs off when
// the consumer stalls instead of growing without bound.

pub mod backend;
pub mod buffer;
pub mod executor;
pub mod mock;
pub mod raster;
pub mod scanner;
pub mod session;

pub use backend::DeviceBackend;
pub use buffer::{BufferManager, SlotReader, SlotWriter};
pub use executor::{PendingResult, SerialTaskExecutor, TaskScheduler};
pub use raster::ScanImage;
pub use scanner::{Scanner, ScannerEvent};
pub use session::{DeviceContext, ScanSession, ScanState};
