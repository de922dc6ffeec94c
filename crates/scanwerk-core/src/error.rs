// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

use crate::types::HardwareStatus;

/// Top-level error type for all Scanwerk operations.
///
/// Note that "no buffer slot available" is deliberately NOT an error — slot
/// exhaustion is an expected back-pressure condition modelled as `None` and
/// retried by the producer.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Device errors --
    #[error("device reported {status}: {detail}")]
    Hardware {
        status: HardwareStatus,
        detail: String,
    },

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    // -- Post-processing --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanwerkError {
    /// Shorthand for a hardware-status error with the driver's status text.
    pub fn hardware(status: HardwareStatus, detail: impl Into<String>) -> Self {
        Self::Hardware {
            status,
            detail: detail.into(),
        }
    }

    /// Whether a scan that failed with this error should be recovered by
    /// force-closing and reopening the device.
    ///
    /// Hardware hiccups (busy, jam, cover open, I/O glitch) leave the driver
    /// in an unknown state — a close/reopen cycle resets it.  Programmer
    /// errors and post-processing failures do not touch the device and are
    /// reported as-is.
    pub fn is_recoverable_scan_error(&self) -> bool {
        match self {
            Self::Hardware { status, .. } => !matches!(status, HardwareStatus::Cancelled),
            Self::Device(_) | Self::Io(_) => true,
            Self::InvalidState(_)
            | Self::Image(_)
            | Self::Ocr(_)
            | Self::Serialization(_) => false,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
