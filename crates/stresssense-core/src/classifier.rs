//! Facial emotion classifier via ONNX Runtime.
//!
//! Runs a FER-style 7-class model on a 48×48 grayscale face crop. When a
//! [`FaceDetector`] is attached, the highest-confidence face is cropped first;
//! otherwise (or under [`DetectionPolicy::Relaxed`] with no face found) the
//! whole frame is classified.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, DetectionPolicy, Emotion, EmotionAnalysis};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FER_INPUT_SIZE: u32 = 48;
const FER_NUM_CLASSES: usize = 7;
/// Fractional margin added around a detected face before cropping.
const FACE_CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} — place the emotion model in the model directory")]
    ModelNotFound(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("face could not be detected")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can name the dominant emotion in an image.
pub trait EmotionClassifier: Send {
    fn analyze(
        &mut self,
        image: &RgbImage,
        policy: DetectionPolicy,
    ) -> Result<EmotionAnalysis, ClassifierError>;
}

/// ONNX-backed emotion classifier with optional face detection.
pub struct OnnxEmotionClassifier {
    session: Session,
    detector: Option<FaceDetector>,
}

impl OnnxEmotionClassifier {
    /// Load the emotion model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion model"
        );

        Ok(Self {
            session,
            detector: None,
        })
    }

    /// Attach a face detector used to crop the face before classification.
    pub fn with_detector(mut self, detector: FaceDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    fn locate_face(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, ClassifierError> {
        let Some(detector) = self.detector.as_mut() else {
            return Ok(None);
        };
        let faces = detector.detect(image)?;
        Ok(faces.into_iter().next())
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("emotion logits: {e}")))?;

        if logits.len() != FER_NUM_CLASSES {
            return Err(ClassifierError::InferenceFailed(format!(
                "expected {FER_NUM_CLASSES} emotion scores, got {}",
                logits.len()
            )));
        }

        Ok(logits.to_vec())
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn analyze(
        &mut self,
        image: &RgbImage,
        policy: DetectionPolicy,
    ) -> Result<EmotionAnalysis, ClassifierError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::InvalidImage(format!(
                "empty image ({}x{})",
                image.width(),
                image.height()
            )));
        }

        let face = match self.locate_face(image) {
            Ok(face) => face,
            Err(e) if policy == DetectionPolicy::Relaxed => {
                tracing::debug!(error = %e, "face detection failed; classifying full frame");
                None
            }
            Err(e) => return Err(e),
        };

        if face.is_none() && policy == DetectionPolicy::Enforce {
            return Err(ClassifierError::NoFaceDetected);
        }

        let gray = crop_face_gray(image, face.as_ref());
        let input = preprocess(&gray);
        let logits = self.run(input)?;
        let scores = softmax(&logits);

        let dominant = dominant_index(&scores)
            .and_then(Emotion::from_index)
            .ok_or_else(|| ClassifierError::InferenceFailed("no emotion scores".into()))?;

        tracing::debug!(
            %dominant,
            face = face.is_some(),
            "classified emotion"
        );

        Ok(EmotionAnalysis {
            dominant,
            scores: Emotion::ALL
                .iter()
                .copied()
                .zip(scores.iter().map(|p| p * 100.0))
                .collect(),
            face,
        })
    }
}

/// Crop the face (with margin) or take the whole frame, as grayscale.
fn crop_face_gray(image: &RgbImage, face: Option<&BoundingBox>) -> GrayImage {
    let gray = imageops::grayscale(image);
    let Some(face) = face else {
        return gray;
    };

    let (w, h) = (image.width() as f32, image.height() as f32);
    let mx = face.width * FACE_CROP_MARGIN;
    let my = face.height * FACE_CROP_MARGIN;
    let x0 = (face.x - mx).clamp(0.0, w - 1.0);
    let y0 = (face.y - my).clamp(0.0, h - 1.0);
    let x1 = (face.x + face.width + mx).clamp(x0 + 1.0, w);
    let y1 = (face.y + face.height + my).clamp(y0 + 1.0, h);

    imageops::crop_imm(
        &gray,
        x0 as u32,
        y0 as u32,
        (x1 - x0).round().max(1.0) as u32,
        (y1 - y0).round().max(1.0) as u32,
    )
    .to_image()
}

/// Resize to 48×48 and normalize into a `[1, 1, 48, 48]` tensor in [0, 1].
fn preprocess(gray: &GrayImage) -> Array4<f32> {
    let size = FER_INPUT_SIZE as usize;
    let resized = imageops::resize(gray, FER_INPUT_SIZE, FER_INPUT_SIZE, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32 / 255.0;
    }
    tensor
}

/// Numerically stable softmax.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        exps
    }
}

/// Index of the highest score; first wins on ties.
fn dominant_index(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 4.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_dominant_index_picks_max() {
        assert_eq!(dominant_index(&[0.1, 0.2, 0.05, 0.6, 0.05]), Some(3));
    }

    #[test]
    fn test_dominant_index_tie_prefers_first() {
        assert_eq!(dominant_index(&[0.4, 0.4, 0.2]), Some(0));
    }

    #[test]
    fn test_dominant_index_empty() {
        assert_eq!(dominant_index(&[]), None);
    }

    #[test]
    fn test_preprocess_output_shape() {
        let gray = GrayImage::from_pixel(120, 90, image::Luma([200]));
        let tensor = preprocess(&gray);
        assert_eq!(tensor.shape(), &[1, 1, 48, 48]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let gray = GrayImage::from_pixel(48, 48, image::Luma([255]));
        let tensor = preprocess(&gray);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_crop_full_frame_without_face() {
        let image = RgbImage::from_pixel(64, 32, Rgb([10, 20, 30]));
        let gray = crop_face_gray(&image, None);
        assert_eq!(gray.dimensions(), (64, 32));
    }

    #[test]
    fn test_crop_face_adds_margin_and_clamps() {
        let image = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        let face = BoundingBox {
            x: 20.0,
            y: 30.0,
            width: 40.0,
            height: 50.0,
            confidence: 0.9,
        };
        let gray = crop_face_gray(&image, Some(&face));
        assert_eq!(gray.dimensions(), (48, 60));

        let edge = BoundingBox {
            x: 90.0,
            y: -5.0,
            width: 30.0,
            height: 30.0,
            confidence: 0.9,
        };
        let gray = crop_face_gray(&image, Some(&edge));
        assert!(gray.width() <= 100 && gray.height() <= 100);
        assert!(gray.width() > 0 && gray.height() > 0);
    }
}
