use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then an optional TOML file, then
/// `STRESSSENSE_*` environment variables. CLI flags are applied last by the caller.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// CSV emotion log (default: ./emotion_log.csv).
    pub log_file: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path for the webcam (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may negotiate another.
    pub camera_width: u32,
    /// Requested capture height.
    pub camera_height: u32,
    /// Rows shown by `report`.
    pub report_rows: usize,
    /// Frames discarded when the webcam starts (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Load the face detector if its model is present.
    pub detector_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("emotion_log.csv"),
            model_dir: stresssense_core::default_model_dir(),
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            report_rows: stresssense_core::report::DEFAULT_REPORT_ROWS,
            warmup_frames: 4,
            detector_enabled: true,
        }
    }
}

impl Config {
    /// Load from `file` (or `STRESSSENSE_CONFIG`), then apply environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("STRESSSENSE_CONFIG").ok().map(PathBuf::from));

        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `STRESSSENSE_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STRESSSENSE_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("STRESSSENSE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STRESSSENSE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&lookup, "STRESSSENSE_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&lookup, "STRESSSENSE_CAMERA_HEIGHT", &mut self.camera_height);
        override_parsed(&lookup, "STRESSSENSE_REPORT_ROWS", &mut self.report_rows);
        override_parsed(&lookup, "STRESSSENSE_WARMUP_FRAMES", &mut self.warmup_frames);
        if let Some(v) = lookup("STRESSSENSE_DETECTOR_ENABLED") {
            self.detector_enabled = v != "0";
        }
    }

    /// Path to the FER emotion model.
    pub fn emotion_model_path(&self) -> String {
        self.model_dir
            .join("emotion.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}
