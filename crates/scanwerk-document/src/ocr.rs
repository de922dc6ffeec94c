// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition for scanned pages, built on the pure-Rust `ocrs` engine
// with neural-network models executed by `rten`.
//
// Only compiled with the `ocr` feature.  The engine needs two model files:
// a text-detection model that locates text regions and a text-recognition
// model that decodes them.  Both are cached under `$XDG_CACHE_HOME/ocrs`
// by the `ocrs-cli` tool; point `OcrModelConfig` elsewhere to override.
//
// Note: `ocrs` and `rten` are unusably slow in debug builds — always
// compile with optimisations when recognition matters.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine as OcrsEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, instrument};

use scanwerk_core::error::{Result, ScanwerkError};

use crate::jobs::Recognizer;

const DETECTION_MODEL: &str = "text-detection.rten";
const RECOGNITION_MODEL: &str = "text-recognition.rten";

fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Locations of the two model files the recognizer needs.
#[derive(Debug, Clone)]
pub struct OcrModelConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrModelConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrModelConfig {
    /// Point at a directory holding both model files under their well-known
    /// names.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL),
            recognition_model_path: dir.join(RECOGNITION_MODEL),
        }
    }

    /// Check both model files exist before attempting the expensive load.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(ScanwerkError::Ocr(format!(
                    "OCR model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Whether both model files are present at the default cache location.
pub fn models_available() -> bool {
    OcrModelConfig::default().validate().is_ok()
}

/// Page text recognizer.
///
/// Model loading is the expensive step; construct once and reuse across
/// pages.  The engine is the natural `Recognizer` for an
/// [`OcrJobQueue`](crate::jobs::OcrJobQueue).
pub struct OcrEngine {
    engine: OcrsEngine,
}

impl OcrEngine {
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrModelConfig) -> Result<Self> {
        config.validate()?;

        info!("loading OCR models");
        let detection = Model::load_file(&config.detection_model_path).map_err(|err| {
            ScanwerkError::Ocr(format!(
                "failed to load detection model {}: {err}",
                config.detection_model_path.display()
            ))
        })?;
        let recognition = Model::load_file(&config.recognition_model_path).map_err(|err| {
            ScanwerkError::Ocr(format!(
                "failed to load recognition model {}: {err}",
                config.recognition_model_path.display()
            ))
        })?;

        let engine = OcrsEngine::new(OcrEngineParams {
            detection_model: Some(detection),
            recognition_model: Some(recognition),
            ..Default::default()
        })
        .map_err(|err| ScanwerkError::Ocr(format!("failed to initialise OCR engine: {err}")))?;

        info!("OCR engine ready");
        Ok(Self { engine })
    }

    /// Load models from the default cache directory.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OcrModelConfig::default())
    }

    /// Extract all text from one scanned page, newline-separated.
    #[instrument(skip_all, fields(width = page.width(), height = page.height()))]
    pub fn recognize_page(&self, page: &DynamicImage) -> Result<String> {
        let rgb = page.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            ScanwerkError::Ocr(format!("bad page image ({width}x{height}): {err}"))
        })?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| ScanwerkError::Ocr(format!("OCR preprocessing failed: {err}")))?;
        let text = self
            .engine
            .get_text(&input)
            .map_err(|err| ScanwerkError::Ocr(format!("OCR recognition failed: {err}")))?;

        debug!(
            lines = text.lines().count(),
            chars = text.len(),
            "page recognized"
        );
        Ok(text)
    }
}

impl Recognizer for OcrEngine {
    fn recognize(&self, page: &DynamicImage) -> Result<String> {
        self.recognize_page(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_well_known_filenames() {
        let config = OcrModelConfig::default();
        assert!(config
            .detection_model_path
            .to_string_lossy()
            .ends_with(DETECTION_MODEL));
        assert!(config
            .recognition_model_path
            .to_string_lossy()
            .ends_with(RECOGNITION_MODEL));
    }

    #[test]
    fn from_dir_joins_both_model_names() {
        let config = OcrModelConfig::from_dir("/tmp/models");
        assert_eq!(
            config.detection_model_path,
            PathBuf::from("/tmp/models/text-detection.rten")
        );
        assert_eq!(
            config.recognition_model_path,
            PathBuf::from("/tmp/models/text-recognition.rten")
        );
    }

    #[test]
    fn validate_rejects_missing_models() {
        let config = OcrModelConfig::from_dir("/nonexistent/ocr-models");
        assert!(matches!(config.validate(), Err(ScanwerkError::Ocr(_))));
    }
}
