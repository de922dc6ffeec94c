// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Incremental raster assembly on the consumer side of the scan pipeline.
//
// Scan lines arrive in order but in arbitrary-sized batches; `ScanImage`
// places each line at its offset and can render the partial page at any
// point, so a preview can update while the scanner is still feeding paper.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use tracing::debug;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{FrameParameters, FrameType};

/// Raster under assembly for one scanned frame.
///
/// Storage is pre-sized from the frame parameters when the device predicts
/// its page length and grown in chunks when it does not (hand-fed and
/// feeder devices often report an unknown length).
pub struct ScanImage {
    params: FrameParameters,
    data: Vec<u8>,
    /// Lines of storage currently allocated.
    lines_alloc: u32,
    /// One past the highest line index written so far.
    lines_filled: u32,
}

/// Growth step for unknown-length pages, in lines.
const GROW_LINES: u32 = 256;

impl ScanImage {
    pub fn new(params: FrameParameters) -> Self {
        let lines_alloc = params.lines.unwrap_or(GROW_LINES);
        let data = vec![0u8; lines_alloc as usize * params.bytes_per_line];
        Self {
            params,
            data,
            lines_alloc,
            lines_filled: 0,
        }
    }

    pub fn params(&self) -> &FrameParameters {
        &self.params
    }

    /// One past the highest line written so far.
    pub fn lines_filled(&self) -> u32 {
        self.lines_filled
    }

    /// Place one whole scan line at its line index.
    ///
    /// `bytes` must be exactly one line (`bytes_per_line` long); anything
    /// else is a wiring error between buffer and raster.
    pub fn put_line(&mut self, line: u32, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.params.bytes_per_line);
        if line >= self.lines_alloc {
            // Device under-reported (or never reported) the page length.
            let new_alloc = (line + 1).max(self.lines_alloc + GROW_LINES);
            debug!(from = self.lines_alloc, to = new_alloc, "raster grown");
            self.data
                .resize(new_alloc as usize * self.params.bytes_per_line, 0);
            self.lines_alloc = new_alloc;
        }
        let off = line as usize * self.params.bytes_per_line;
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
        self.lines_filled = self.lines_filled.max(line + 1);
    }

    /// Render the lines assembled so far as a displayable image.
    ///
    /// Supports the single-frame formats: gray at 1, 8 and 16 bits and
    /// interleaved RGB at 8 and 16 bits.  Per-channel frames from
    /// three-pass devices are not renderable on their own.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let width = self.params.pixels_per_line;
        let height = self.lines_filled;
        if width == 0 || height == 0 {
            return Err(ScanwerkError::Image("no raster data assembled yet".into()));
        }
        let bpl = self.params.bytes_per_line;
        let filled = &self.data[..height as usize * bpl];

        match (self.params.frame_type, self.params.depth) {
            (FrameType::Gray, 1) => {
                // Bit-packed lineart, most significant bit first; a set bit
                // is a black pixel.
                let mut pixels = Vec::with_capacity((width * height) as usize);
                for row in filled.chunks_exact(bpl) {
                    for x in 0..width as usize {
                        let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                        pixels.push(if bit == 1 { 0u8 } else { 255u8 });
                    }
                }
                let img = GrayImage::from_raw(width, height, pixels)
                    .ok_or_else(|| ScanwerkError::Image("lineart raster size mismatch".into()))?;
                Ok(DynamicImage::ImageLuma8(img))
            }
            (FrameType::Gray, 8) => {
                let mut pixels = Vec::with_capacity((width * height) as usize);
                for row in filled.chunks_exact(bpl) {
                    pixels.extend_from_slice(&row[..width as usize]);
                }
                let img = GrayImage::from_raw(width, height, pixels)
                    .ok_or_else(|| ScanwerkError::Image("gray raster size mismatch".into()))?;
                Ok(DynamicImage::ImageLuma8(img))
            }
            (FrameType::Gray, 16) => {
                let pixels = gather_u16(filled, bpl, width as usize, 1);
                let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                    ImageBuffer::from_raw(width, height, pixels).ok_or_else(|| {
                        ScanwerkError::Image("16-bit gray raster size mismatch".into())
                    })?;
                Ok(DynamicImage::ImageLuma16(img))
            }
            (FrameType::Rgb, 8) => {
                let mut pixels = Vec::with_capacity((width * height * 3) as usize);
                for row in filled.chunks_exact(bpl) {
                    pixels.extend_from_slice(&row[..width as usize * 3]);
                }
                let img = RgbImage::from_raw(width, height, pixels)
                    .ok_or_else(|| ScanwerkError::Image("rgb raster size mismatch".into()))?;
                Ok(DynamicImage::ImageRgb8(img))
            }
            (FrameType::Rgb, 16) => {
                let pixels = gather_u16(filled, bpl, width as usize, 3);
                let img: ImageBuffer<Rgb<u16>, Vec<u16>> =
                    ImageBuffer::from_raw(width, height, pixels).ok_or_else(|| {
                        ScanwerkError::Image("16-bit rgb raster size mismatch".into())
                    })?;
                Ok(DynamicImage::ImageRgb16(img))
            }
            (frame_type, depth) => Err(ScanwerkError::Image(format!(
                "cannot render {frame_type:?} frame at depth {depth}"
            ))),
        }
    }
}

/// Collect native-endian 16-bit samples row by row, dropping line padding.
fn gather_u16(data: &[u8], bpl: usize, width: usize, channels: usize) -> Vec<u16> {
    let per_row = width * channels;
    let mut out = Vec::with_capacity(data.len() / bpl * per_row);
    for row in data.chunks_exact(bpl) {
        out.extend(
            row[..per_row * 2]
                .chunks_exact(2)
                .map(|b| u16::from_ne_bytes([b[0], b[1]])),
        );
    }
    out
}
