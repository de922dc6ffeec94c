// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Memory budget for the scan-line ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Hard cap on the total bytes held by all buffer slots.  Once reached,
    /// write-slot requests are refused until the consumer catches up.
    pub max_total_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            // 16 MiB holds several hundred lines of 600 dpi colour A4 —
            // enough to ride out UI stalls without hoarding memory.
            max_total_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Tuning knobs for the device read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Minimum scan lines requested per device read.
    pub min_read_lines: u32,
    /// Upper bound on the byte size of a single device read.
    pub max_read_bytes: usize,
    /// Sleep between write-slot retries when the ring is saturated.
    pub slot_retry_backoff_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_read_lines: 8,
            max_read_bytes: 256 * 1024,
            slot_retry_backoff_ms: 20,
        }
    }
}

impl ScanConfig {
    /// Back-off sleep as a `Duration`.
    pub fn slot_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.slot_retry_backoff_ms)
    }

    /// Scan lines to request for one read, given the frame's line size.
    ///
    /// Targets `max_read_bytes` per read but never fewer than
    /// `min_read_lines` lines, so narrow frames still make progress.
    pub fn lines_per_read(&self, bytes_per_line: usize) -> u32 {
        if bytes_per_line == 0 {
            return self.min_read_lines;
        }
        let by_budget = (self.max_read_bytes / bytes_per_line) as u32;
        by_budget.max(self.min_read_lines)
    }
}

/// Persistent engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub scan: ScanConfig,
    /// Device name to preselect on startup, if any.
    pub default_device: Option<String>,
}

impl EngineConfig {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save settings to a JSON file, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
