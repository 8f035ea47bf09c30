use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::message::EngineJob;
use crate::error::AppError;

/// Handle to a single vision engine instance. The engine holds at most one
/// job; callers must not send another until the previous one was answered.
#[async_trait]
pub trait VisionChannel: Send + Sync {
    /// Resolves once the engine is able to accept work.
    async fn wait_until_ready(&self);

    /// Hands a job to the engine. The answer arrives later as a notification.
    fn send(&self, job: &EngineJob) -> Result<(), AppError>;
}

/// A live channel and the raw notification lines it produces.
pub struct ChannelConnection {
    pub channel: Box<dyn VisionChannel>,
    pub notifications: mpsc::Receiver<String>,
}

/// Creates fresh engine instances, on startup and on every reset.
pub trait ChannelFactory: Send + Sync {
    fn connect(&self) -> Result<ChannelConnection, AppError>;
}
