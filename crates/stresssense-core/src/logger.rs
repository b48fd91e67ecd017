//! Emotion logger: classify a frame, then append one record per success.

use crate::classifier::{ClassifierError, EmotionClassifier};
use crate::log::{EmotionLog, LogError};
use crate::types::{DetectionPolicy, Emotion, LogRecord, Source};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("classification failed: {0}")]
    Classification(#[from] ClassifierError),
    #[error("could not record emotion: {0}")]
    Log(#[from] LogError),
}

/// Couples a classifier with the log it records into.
pub struct EmotionLogger<C, L> {
    classifier: C,
    log: L,
}

impl<C: EmotionClassifier, L: EmotionLog> EmotionLogger<C, L> {
    pub fn new(classifier: C, log: L) -> Self {
        Self { classifier, log }
    }

    /// Classify `image` and record the dominant emotion under `source`.
    ///
    /// Detection is relaxed: an image with no locatable face still gets a
    /// best-effort label. If classification fails nothing is appended and the
    /// error is returned as-is; there is no retry.
    pub fn log_emotion(&mut self, image: &RgbImage, source: Source) -> Result<Emotion, AnalyzeError> {
        let analysis = self.classifier.analyze(image, DetectionPolicy::Relaxed)?;
        let record = LogRecord::now(source, analysis.dominant);
        self.log.append(&record)?;

        tracing::info!(
            %source,
            emotion = %analysis.dominant,
            confidence = analysis.score(analysis.dominant),
            face = analysis.face.is_some(),
            "emotion logged"
        );

        Ok(analysis.dominant)
    }

    /// Live-stream variant of [`log_emotion`](Self::log_emotion) with source `Webcam`.
    ///
    /// Failures are logged and swallowed so a bad frame never interrupts the
    /// stream; `None` means the frame goes out unannotated.
    pub fn log_live_frame(&mut self, image: &RgbImage) -> Option<Emotion> {
        match self.log_emotion(image, Source::Webcam) {
            Ok(emotion) => Some(emotion),
            Err(AnalyzeError::Classification(e)) => {
                tracing::debug!(error = %e, "live frame not classified");
                None
            }
            Err(e @ AnalyzeError::Log(_)) => {
                tracing::warn!(error = %e, "live frame classified but not recorded");
                None
            }
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{CsvEmotionLog, MemoryEmotionLog};
    use crate::types::EmotionAnalysis;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays a fixed sequence of outcomes, one per call.
    struct ScriptedClassifier {
        outcomes: VecDeque<Result<Emotion, &'static str>>,
        policies: Vec<DetectionPolicy>,
    }

    impl ScriptedClassifier {
        fn new(outcomes: impl IntoIterator<Item = Result<Emotion, &'static str>>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                policies: Vec::new(),
            }
        }
    }

    impl EmotionClassifier for ScriptedClassifier {
        fn analyze(
            &mut self,
            _image: &RgbImage,
            policy: DetectionPolicy,
        ) -> Result<EmotionAnalysis, ClassifierError> {
            self.policies.push(policy);
            match self.outcomes.pop_front() {
                Some(Ok(dominant)) => Ok(EmotionAnalysis {
                    dominant,
                    scores: vec![(dominant, 91.0)],
                    face: None,
                }),
                Some(Err(msg)) => Err(ClassifierError::InvalidImage(msg.to_string())),
                None => Err(ClassifierError::InferenceFailed("script exhausted".into())),
            }
        }
    }

    struct FailingLog;

    impl EmotionLog for FailingLog {
        fn append(&self, _record: &LogRecord) -> Result<(), LogError> {
            Err(LogError::Io {
                path: "emotion_log.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    fn frame() -> RgbImage {
        RgbImage::new(4, 4)
    }

    #[test]
    fn test_success_appends_exactly_one_row() {
        let log = Arc::new(MemoryEmotionLog::new());
        let mut logger = EmotionLogger::new(ScriptedClassifier::new([Ok(Emotion::Happy)]), log.clone());

        let emotion = logger.log_emotion(&frame(), Source::ImageUpload).unwrap();

        assert_eq!(emotion, Emotion::Happy);
        assert_eq!(log.len(), 1);
        let record = &log.records()[0];
        assert_eq!(record.source, Source::ImageUpload);
        assert_eq!(record.emotion, Emotion::Happy);
    }

    #[test]
    fn test_failure_appends_nothing() {
        let log = Arc::new(MemoryEmotionLog::new());
        let mut logger =
            EmotionLogger::new(ScriptedClassifier::new([Err("corrupt image")]), log.clone());

        let err = logger.log_emotion(&frame(), Source::ImageUpload).unwrap_err();

        assert!(matches!(err, AnalyzeError::Classification(ClassifierError::InvalidImage(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_classifier_called_with_relaxed_detection() {
        let mut logger = EmotionLogger::new(
            ScriptedClassifier::new([Ok(Emotion::Neutral)]),
            MemoryEmotionLog::new(),
        );
        logger.log_emotion(&frame(), Source::Webcam).unwrap();
        assert_eq!(logger.classifier().policies, vec![DetectionPolicy::Relaxed]);
    }

    #[test]
    fn test_source_tag_preserved() {
        let log = Arc::new(MemoryEmotionLog::new());
        let mut logger = EmotionLogger::new(
            ScriptedClassifier::new([Ok(Emotion::Sad), Ok(Emotion::Fear)]),
            log.clone(),
        );

        logger.log_emotion(&frame(), Source::Webcam).unwrap();
        logger.log_emotion(&frame(), Source::ImageUpload).unwrap();

        let sources: Vec<_> = log.records().iter().map(|r| r.source).collect();
        assert_eq!(sources, vec![Source::Webcam, Source::ImageUpload]);
    }

    #[test]
    fn test_repeated_calls_produce_ordered_rows() {
        let script = [
            Ok(Emotion::Happy),
            Ok(Emotion::Happy),
            Ok(Emotion::Angry),
            Ok(Emotion::Surprise),
            Ok(Emotion::Happy),
        ];
        let log = Arc::new(MemoryEmotionLog::new());
        let mut logger = EmotionLogger::new(ScriptedClassifier::new(script), log.clone());

        for _ in 0..script.len() {
            logger.log_emotion(&frame(), Source::Webcam).unwrap();
        }

        let records = log.records();
        assert_eq!(records.len(), 5);
        let emotions: Vec<_> = records.iter().map(|r| r.emotion).collect();
        assert_eq!(
            emotions,
            vec![Emotion::Happy, Emotion::Happy, Emotion::Angry, Emotion::Surprise, Emotion::Happy]
        );
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_log_failure_is_reported() {
        let mut logger = EmotionLogger::new(ScriptedClassifier::new([Ok(Emotion::Happy)]), FailingLog);
        let err = logger.log_emotion(&frame(), Source::ImageUpload).unwrap_err();
        assert!(matches!(err, AnalyzeError::Log(_)));
    }

    #[test]
    fn test_live_frame_swallows_failures() {
        let log = Arc::new(MemoryEmotionLog::new());
        let mut logger = EmotionLogger::new(
            ScriptedClassifier::new([Ok(Emotion::Happy), Err("blurry"), Ok(Emotion::Sad)]),
            log.clone(),
        );

        assert_eq!(logger.log_live_frame(&frame()), Some(Emotion::Happy));
        assert_eq!(logger.log_live_frame(&frame()), None);
        assert_eq!(logger.log_live_frame(&frame()), Some(Emotion::Sad));

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == Source::Webcam));
    }

    #[test]
    fn test_live_frame_swallows_log_failure() {
        let mut logger = EmotionLogger::new(ScriptedClassifier::new([Ok(Emotion::Happy)]), FailingLog);
        assert_eq!(logger.log_live_frame(&frame()), None);
    }

    #[test]
    fn test_upload_twice_writes_two_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emotion_log.csv");
        let log = CsvEmotionLog::open(&path).unwrap();
        let mut logger = EmotionLogger::new(
            ScriptedClassifier::new([Ok(Emotion::Happy), Ok(Emotion::Sad)]),
            log,
        );

        logger.log_emotion(&frame(), Source::ImageUpload).unwrap();
        logger.log_emotion(&frame(), Source::ImageUpload).unwrap();

        let records = crate::report::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, Source::ImageUpload);
        assert_eq!(records[0].emotion, Emotion::Happy);
        assert_eq!(records[1].source, Source::ImageUpload);
        assert_eq!(records[1].emotion, Emotion::Sad);
    }

    #[test]
    fn test_csv_failure_leaves_row_count_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emotion_log.csv");
        let mut logger = EmotionLogger::new(
            ScriptedClassifier::new([Ok(Emotion::Happy), Err("bad decode")]),
            CsvEmotionLog::open(&path).unwrap(),
        );

        logger.log_emotion(&frame(), Source::ImageUpload).unwrap();
        let before = std::fs::read_to_string(&path).unwrap().lines().count();
        assert!(logger.log_emotion(&frame(), Source::ImageUpload).is_err());
        let after = std::fs::read_to_string(&path).unwrap().lines().count();

        assert_eq!(before, 2);
        assert_eq!(after, before);
    }
}
