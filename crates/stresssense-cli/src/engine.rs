use image::RgbImage;
use stresssense_core::{AnalyzeError, Emotion, EmotionClassifier, EmotionLog, EmotionLogger, Source};
use stresssense_hw::{Camera, CameraError, FrameSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("no camera opened")]
    NoCamera,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One processed webcam frame.
#[derive(Debug, Clone, Copy)]
pub struct LiveEvent {
    pub sequence: u32,
    /// `None` when the frame could not be classified.
    pub emotion: Option<Emotion>,
    /// Low-light frame; classified like any other.
    pub dark: bool,
}

/// Totals for a finished webcam session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub frames: usize,
    pub classified: usize,
    pub unannotated: usize,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Analyze {
        image: RgbImage,
        source: Source,
        reply: oneshot::Sender<Result<Emotion, AnalyzeError>>,
    },
    Watch {
        max_frames: Option<usize>,
        events: mpsc::Sender<LiveEvent>,
        reply: oneshot::Sender<Result<WatchSummary, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Classify one image and record it under `source`.
    pub async fn analyze(&self, image: RgbImage, source: Source) -> Result<Emotion, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                image,
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Stream webcam frames through the logger until `max_frames` have been
    /// read or `events` is dropped. Per-frame failures never end the stream.
    pub async fn watch(
        &self,
        max_frames: Option<usize>,
        events: mpsc::Sender<LiveEvent>,
    ) -> Result<WatchSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Watch {
                max_frames,
                events,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the logger (and so the log writer) and the camera, and
/// serves one request at a time: every append goes through this one writer.
pub fn spawn_engine<C, L>(
    mut logger: EmotionLogger<C, L>,
    camera: Option<Camera>,
    warmup_frames: usize,
) -> std::io::Result<EngineHandle>
where
    C: EmotionClassifier + 'static,
    L: EmotionLog + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("stresssense-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze {
                        image,
                        source,
                        reply,
                    } => {
                        let _ = reply.send(logger.log_emotion(&image, source));
                    }
                    EngineRequest::Watch {
                        max_frames,
                        events,
                        reply,
                    } => {
                        let result = match camera.as_ref() {
                            Some(camera) => match camera.stream() {
                                Ok(mut stream) => run_watch(
                                    &mut stream,
                                    &mut logger,
                                    max_frames,
                                    warmup_frames,
                                    &events,
                                ),
                                Err(e) => Err(e.into()),
                            },
                            None => Err(EngineError::NoCamera),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Classify every frame from `source` until `max_frames` have been read or
/// the event receiver goes away.
fn run_watch<S, C, L>(
    source: &mut S,
    logger: &mut EmotionLogger<C, L>,
    max_frames: Option<usize>,
    warmup_frames: usize,
    events: &mpsc::Sender<LiveEvent>,
) -> Result<WatchSummary, EngineError>
where
    S: FrameSource,
    C: EmotionClassifier,
    L: EmotionLog,
{
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.next_frame();
        }
    }

    let mut summary = WatchSummary::default();
    while max_frames.map_or(true, |max| summary.frames < max) {
        if events.is_closed() {
            tracing::info!("webcam viewer closed; stopping stream");
            break;
        }

        let frame = source.next_frame()?;
        summary.frames += 1;

        let emotion = logger.log_live_frame(&frame.image);
        match emotion {
            Some(_) => summary.classified += 1,
            None => summary.unannotated += 1,
        }

        let event = LiveEvent {
            sequence: frame.sequence,
            emotion,
            dark: frame.is_dark,
        };
        if events.blocking_send(event).is_err() {
            break;
        }
    }

    tracing::info!(
        frames = summary.frames,
        classified = summary.classified,
        unannotated = summary.unannotated,
        "webcam session finished"
    );
    Ok(summary)
}
