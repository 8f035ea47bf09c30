use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::engine::channel::{ChannelFactory, VisionChannel};
use crate::engine::message::EngineJob;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Initializing,
    Ready,
    Failed,
}

/// What the UI should offer for a given readiness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerStatus {
    WarmingUp,
    Available,
    RetryRequired,
}

impl From<ReadinessState> for AnalyzerStatus {
    fn from(state: ReadinessState) -> Self {
        match state {
            ReadinessState::Initializing => AnalyzerStatus::WarmingUp,
            ReadinessState::Ready => AnalyzerStatus::Available,
            ReadinessState::Failed => AnalyzerStatus::RetryRequired,
        }
    }
}

/// Exclusive owner of the engine channel and its readiness state.
pub struct ChannelSupervisor {
    factory: Arc<dyn ChannelFactory>,
    channel: Option<Box<dyn VisionChannel>>,
    notifications: Option<mpsc::Receiver<String>>,
    state_tx: watch::Sender<ReadinessState>,
    generation: u64,
}

impl ChannelSupervisor {
    pub fn start(
        factory: Arc<dyn ChannelFactory>,
        state_tx: watch::Sender<ReadinessState>,
    ) -> Self {
        let mut supervisor = Self {
            factory,
            channel: None,
            notifications: None,
            state_tx,
            generation: 0,
        };
        supervisor.connect();
        supervisor
    }

    pub fn state(&self) -> ReadinessState {
        *self.state_tx.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Discards the current channel and starts a fresh one.
    pub fn reset(&mut self) -> ReadinessState {
        info!(
            "Resetting vision engine channel (generation {})",
            self.generation
        );
        self.disconnect();
        self.connect();
        self.state()
    }

    /// First readiness signal of the current channel. Returns false for
    /// duplicates and for a channel that already failed.
    pub fn mark_ready(&mut self) -> bool {
        match self.state() {
            ReadinessState::Initializing => {
                info!("Vision engine ready (generation {})", self.generation);
                self.set_state(ReadinessState::Ready);
                true
            }
            ReadinessState::Ready => {
                debug!("Duplicate ready signal ignored");
                false
            }
            ReadinessState::Failed => {
                warn!("Ready signal from a failed engine ignored, reset required");
                false
            }
        }
    }

    /// The engine reported an error before it was ever ready.
    pub fn mark_failed(&mut self, reason: &str) {
        error!(
            "Vision engine failed to initialize (generation {}): {}",
            self.generation, reason
        );
        self.set_state(ReadinessState::Failed);
    }

    /// The notification stream ended, so the engine is gone.
    pub fn on_stream_closed(&mut self) {
        error!(
            "Vision engine channel closed (generation {})",
            self.generation
        );
        self.disconnect();
        self.set_state(ReadinessState::Failed);
    }

    /// Next raw notification. Pends forever while there is no channel.
    pub async fn next_notification(&mut self) -> Option<String> {
        match self.notifications.as_mut() {
            Some(notifications) => notifications.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Waits for the engine to accept work, then hands the job over.
    pub async fn dispatch(&self, job: &EngineJob) -> Result<(), AppError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| AppError::EngineSend("no engine channel".to_string()))?;
        channel.wait_until_ready().await;
        channel.send(job)
    }

    pub fn shutdown(&mut self) {
        self.disconnect();
    }

    fn connect(&mut self) {
        self.generation += 1;
        match self.factory.connect() {
            Ok(connection) => {
                debug!(
                    "Vision engine channel created (generation {})",
                    self.generation
                );
                self.channel = Some(connection.channel);
                self.notifications = Some(connection.notifications);
                self.set_state(ReadinessState::Initializing);
            }
            Err(e) => {
                self.mark_failed(&e.to_string());
            }
        }
    }

    fn disconnect(&mut self) {
        self.channel = None;
        self.notifications = None;
    }

    fn set_state(&self, state: ReadinessState) {
        self.state_tx.send_replace(state);
    }
}
