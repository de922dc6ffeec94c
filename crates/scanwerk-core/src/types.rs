// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scanner engine.

use serde::{Deserialize, Serialize};

/// A scanner known to the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Driver-unique device name, used to open the device.
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Free-form device kind string, e.g. "flatbed scanner".
    pub kind: String,
}

/// Status codes reported by the device driver.
///
/// Mirrors the usual scanner-driver status vocabulary.  `Good` and `Eof`
/// never surface as errors: `Good` means success and `Eof` is mapped to
/// [`ReadOutcome::EndOfStream`] by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareStatus {
    Good,
    DeviceBusy,
    Invalid,
    Jammed,
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
    Cancelled,
    Eof,
}

impl std::fmt::Display for HardwareStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Good => "success",
            Self::DeviceBusy => "device busy",
            Self::Invalid => "invalid argument",
            Self::Jammed => "document feeder jammed",
            Self::NoDocs => "document feeder out of documents",
            Self::CoverOpen => "scanner cover open",
            Self::IoError => "device I/O error",
            Self::NoMem => "out of memory",
            Self::AccessDenied => "access denied",
            Self::Cancelled => "operation cancelled",
            Self::Eof => "end of data",
        };
        f.write_str(text)
    }
}

/// Colour model of a scanned frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Single-channel grayscale (or 1-bit lineart, depending on depth).
    Gray,
    /// Interleaved red-green-blue samples.
    Rgb,
    /// Single-channel pass of a three-pass device.
    Red,
    Green,
    Blue,
}

impl FrameType {
    /// Samples per pixel for this frame type.
    pub fn channels(&self) -> u32 {
        match self {
            Self::Rgb => 3,
            _ => 1,
        }
    }
}

/// Per-frame acquisition metadata fetched from the device before reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameParameters {
    pub frame_type: FrameType,
    /// Whether this is the final frame of the acquisition (always true for
    /// single-pass devices).
    pub last_frame: bool,
    /// Bytes in one complete scan line, including any padding.
    pub bytes_per_line: usize,
    pub pixels_per_line: u32,
    /// Total lines in the frame; `None` when the device cannot predict the
    /// page length (e.g. sheet-fed scanners).
    pub lines: Option<u32>,
    /// Bits per sample: 1, 8, or 16.
    pub depth: u8,
}

impl FrameParameters {
    /// Total frame size in bytes, when the line count is known.
    pub fn total_bytes(&self) -> Option<usize> {
        self.lines.map(|l| l as usize * self.bytes_per_line)
    }
}

/// Outcome of a single blocking device read.
///
/// End-of-data is an expected, non-error outcome of every scan and is
/// therefore modelled as a variant rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written into the caller's buffer.
    Data(usize),
    /// The frame is complete; no bytes were written.
    EndOfStream,
}

/// A scanner option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    /// Fixed-point driver values, surfaced as f64.
    Fixed(f64),
    Text(String),
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Legal values for an option, as advertised by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionConstraint {
    /// Any value of the option's type.
    None,
    /// Inclusive numeric range with an optional quantisation step.
    Range {
        min: f64,
        max: f64,
        step: Option<f64>,
    },
    /// Explicit list of permitted numbers.
    NumberList(Vec<f64>),
    /// Explicit list of permitted strings.
    StringList(Vec<String>),
}

/// Description of one device option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    /// Driver option index, used for get/set calls.
    pub index: usize,
    /// Machine-readable name, e.g. "resolution".
    pub name: String,
    /// Human-readable title for UI labels.
    pub title: String,
    pub description: String,
    pub constraint: OptionConstraint,
    /// Whether the option can be set by software at all.
    pub settable: bool,
}

/// Info flags returned by a successful `set_option_value`.
///
/// The driver may clamp the requested value (`inexact`) or invalidate other
/// cached state: `reload_options` means every descriptor must be re-fetched,
/// `reload_params` that the frame parameters have changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptionInfo {
    pub inexact: bool,
    pub reload_options: bool,
    pub reload_params: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_params(lines: Option<u32>) -> FrameParameters {
        FrameParameters {
            frame_type: FrameType::Gray,
            last_frame: true,
            bytes_per_line: 100,
            pixels_per_line: 100,
            lines,
            depth: 8,
        }
    }

    #[test]
    fn total_bytes_known_lines() {
        assert_eq!(gray_params(Some(50)).total_bytes(), Some(5000));
    }

    #[test]
    fn total_bytes_unknown_lines() {
        assert_eq!(gray_params(None).total_bytes(), None);
    }

    #[test]
    fn rgb_has_three_channels() {
        assert_eq!(FrameType::Rgb.channels(), 3);
        assert_eq!(FrameType::Gray.channels(), 1);
        assert_eq!(FrameType::Red.channels(), 1);
    }

    #[test]
    fn option_value_display() {
        assert_eq!(OptionValue::Int(300).to_string(), "300");
        assert_eq!(OptionValue::Text("Color".into()).to_string(), "Color");
        assert_eq!(OptionValue::Bool(true).to_string(), "true");
    }
}
