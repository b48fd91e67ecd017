//! stresssense-core — Emotion classification and the append-only emotion log.
//!
//! Uses an FER-style emotion model (with optional SCRFD face detection) via
//! ONNX Runtime, and records every successful classification to a CSV log.

pub mod classifier;
pub mod detector;
pub mod log;
pub mod logger;
pub mod report;
pub mod types;

pub use classifier::{ClassifierError, EmotionClassifier, OnnxEmotionClassifier};
pub use detector::FaceDetector;
pub use log::{CsvEmotionLog, EmotionLog, LogError, MemoryEmotionLog};
pub use logger::{AnalyzeError, EmotionLogger};
pub use types::{BoundingBox, DetectionPolicy, Emotion, EmotionAnalysis, LogRecord, Source};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/stresssense/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("stresssense/models")
}
