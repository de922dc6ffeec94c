// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Post-processing for scanned pages: text recognition and the background
// job queue that feeds pages through it without stalling the scan UI.

pub mod jobs;
#[cfg(feature = "ocr")]
pub mod ocr;

pub use jobs::{JobStatus, OcrJob, OcrJobQueue, Recognizer};
