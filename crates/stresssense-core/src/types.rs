use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used in the log file (second precision, local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed emotion categories produced by the classifier, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Map a model output index to its category.
    pub fn from_index(index: usize) -> Option<Emotion> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown emotion: {s}"))
    }
}

/// Which capture path produced a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "Image Upload")]
    ImageUpload,
    #[serde(rename = "Webcam")]
    Webcam,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ImageUpload => "Image Upload",
            Source::Webcam => "Webcam",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the emotion log. Field order is the column order on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub source: Source,
    pub emotion: Emotion,
}

impl LogRecord {
    /// Build a record stamped with the current local time, truncated to seconds.
    pub fn now(source: Source, emotion: Emotion) -> Self {
        let now = Local::now().naive_local();
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        Self {
            timestamp,
            source,
            emotion,
        }
    }
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Bounding box for a detected face, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// How strictly the classifier requires a located face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionPolicy {
    /// Fail with `NoFaceDetected` when no face is found.
    Enforce,
    /// Classify the whole frame when no face is found.
    #[default]
    Relaxed,
}

/// Classifier output for one image.
#[derive(Debug, Clone, Serialize)]
pub struct EmotionAnalysis {
    pub dominant: Emotion,
    /// Per-category confidence as a percentage (sums to ~100).
    pub scores: Vec<(Emotion, f32)>,
    /// Face region the classification ran on; `None` means the full frame.
    pub face: Option<BoundingBox>,
}

impl EmotionAnalysis {
    pub fn score(&self, emotion: Emotion) -> f32 {
        self.scores
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, s)| *s)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_index_order() {
        assert_eq!(Emotion::from_index(0), Some(Emotion::Angry));
        assert_eq!(Emotion::from_index(3), Some(Emotion::Happy));
        assert_eq!(Emotion::from_index(6), Some(Emotion::Neutral));
        assert_eq!(Emotion::from_index(7), None);
    }

    #[test]
    fn test_emotion_parse_roundtrip() {
        for e in Emotion::ALL {
            assert_eq!(e.as_str().parse::<Emotion>().unwrap(), e);
        }
        assert!("contempt".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_source_serializes_to_tag() {
        assert_eq!(serde_json::to_string(&Source::ImageUpload).unwrap(), "\"Image Upload\"");
        assert_eq!(serde_json::to_string(&Source::Webcam).unwrap(), "\"Webcam\"");
    }

    #[test]
    fn test_record_now_has_second_precision() {
        let record = LogRecord::now(Source::Webcam, Emotion::Sad);
        assert_eq!(record.timestamp.nanosecond(), 0);
    }

    #[test]
    fn test_record_json_shape() {
        let record = LogRecord {
            timestamp: NaiveDateTime::parse_from_str("2024-05-01 12:30:00", TIMESTAMP_FORMAT).unwrap(),
            source: Source::ImageUpload,
            emotion: Emotion::Happy,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01 12:30:00");
        assert_eq!(json["source"], "Image Upload");
        assert_eq!(json["emotion"], "happy");
    }

    #[test]
    fn test_analysis_score_lookup() {
        let analysis = EmotionAnalysis {
            dominant: Emotion::Happy,
            scores: vec![(Emotion::Happy, 80.0), (Emotion::Sad, 20.0)],
            face: None,
        };
        assert_eq!(analysis.score(Emotion::Happy), 80.0);
        assert_eq!(analysis.score(Emotion::Fear), 0.0);
    }
}
