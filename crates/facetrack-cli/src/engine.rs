use facetrack_core::{BuildReport, FaceDetector, FaceMatch, FramePipeline, GalleryBuilder, PipelineError};
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Process {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<FaceMatch>, EngineError>>,
    },
    Reload {
        root: PathBuf,
        builder: GalleryBuilder,
        reply: oneshot::Sender<Result<BuildReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Recognise every face in one frame.
    pub async fn process(&self, image: RgbImage) -> Result<Vec<FaceMatch>, EngineError> {
        self.request(|reply| EngineRequest::Process { image, reply }).await
    }

    /// Rebuild the gallery from `root` on the engine thread and publish it.
    pub async fn reload(&self, root: PathBuf, builder: GalleryBuilder) -> Result<BuildReport, EngineError> {
        self.request(|reply| EngineRequest::Reload { root, builder, reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the pipeline and with it the detector session; requests
/// are served one at a time. The thread exits when every handle is dropped.
pub fn spawn_engine<D>(mut pipeline: FramePipeline<D>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facetrack-engine".into())
        .spawn(move || {
            tracing::info!(threshold = pipeline.threshold(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Process { image, reply } => {
                        let result = pipeline.process(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Reload { root, builder, reply } => {
                        let result = pipeline.reload(&root, &builder).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
