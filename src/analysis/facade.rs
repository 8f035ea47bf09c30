use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::analysis::notice::Notice;
use crate::analysis::payload::{ImagePayload, ImageSource};
use crate::analysis::request::{AnalysisKind, AnalysisOutcome, AnalysisRequest, RequestOrigin};
use crate::analysis::service::AnalyzerCommand;
use crate::analysis::supervisor::{AnalyzerStatus, ReadinessState};
use crate::common::Point;
use crate::error::AppError;

/// What calling flows (capture, live preview, recalculation) depend on. Each
/// call says which flow it comes from.
#[async_trait]
pub trait LeafAnalyzer: Send + Sync {
    /// Leaf area in cm², `NaN` when this frame could not be measured.
    async fn analyze_area(
        &self,
        image: ImageSource,
        origin: RequestOrigin,
    ) -> Result<f64, AppError>;

    /// Leaf outline in image pixels, empty when this frame could not be measured.
    async fn find_contour(
        &self,
        image: ImageSource,
        origin: RequestOrigin,
    ) -> Result<Vec<Point>, AppError>;
}

/// A request accepted by the analyzer, waiting for its outcome.
pub struct PendingAnalysis {
    outcome_rx: oneshot::Receiver<AnalysisOutcome>,
}

impl PendingAnalysis {
    pub async fn outcome(self) -> Result<AnalysisOutcome, AppError> {
        self.outcome_rx.await.map_err(|_| AppError::Disposed)
    }
}

#[derive(Clone)]
pub struct AnalyzerHandle {
    command_tx: mpsc::Sender<AnalyzerCommand>,
    state_rx: watch::Receiver<ReadinessState>,
    notices_tx: broadcast::Sender<Notice>,
    cancel_token: CancellationToken,
}

impl AnalyzerHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<AnalyzerCommand>,
        state_rx: watch::Receiver<ReadinessState>,
        notices_tx: broadcast::Sender<Notice>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            command_tx,
            state_rx,
            notices_tx,
            cancel_token,
        }
    }

    /// Reads the image once and measures it.
    pub async fn measure(
        &self,
        image: ImageSource,
        kind: AnalysisKind,
        origin: RequestOrigin,
    ) -> Result<AnalysisOutcome, AppError> {
        let payload = ImagePayload::from_source(image).await?;
        self.enqueue(payload, kind, origin).await?.outcome().await
    }

    /// Hands a prepared payload to the analyzer. Returns once the request is
    /// queued, or already failed when the queue was full.
    pub async fn enqueue(
        &self,
        payload: ImagePayload,
        kind: AnalysisKind,
        origin: RequestOrigin,
    ) -> Result<PendingAnalysis, AppError> {
        let (responder, outcome_rx) = oneshot::channel();
        let request = AnalysisRequest::new(payload, kind, origin, responder);
        debug!("Submitting {} request {}", origin, request.id);
        self.command_tx
            .send(AnalyzerCommand::Submit { request })
            .await
            .map_err(|_| AppError::Disposed)?;
        Ok(PendingAnalysis { outcome_rx })
    }

    pub fn state(&self) -> ReadinessState {
        *self.state_rx.borrow()
    }

    pub fn status(&self) -> AnalyzerStatus {
        self.state().into()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    /// Waits until the engine is either ready or failed.
    pub async fn wait_until_ready(&self) -> Result<(), AppError> {
        let mut state_rx = self.state_rx.clone();
        let state = *state_rx
            .wait_for(|state| *state != ReadinessState::Initializing)
            .await
            .map_err(|_| AppError::Disposed)?;
        match state {
            ReadinessState::Failed => Err(AppError::EngineUnavailable),
            _ => Ok(()),
        }
    }

    /// Replaces the engine with a fresh instance. Pending requests are kept.
    pub async fn reset(&self) -> Result<ReadinessState, AppError> {
        let (responder, state_rx) = oneshot::channel();
        self.command(AnalyzerCommand::Reset { responder }, state_rx)
            .await
    }

    /// Drops every pending request; their callers get [`AppError::Disposed`].
    pub async fn clear(&self) -> Result<usize, AppError> {
        let (responder, dropped_rx) = oneshot::channel();
        self.command(AnalyzerCommand::Clear { responder }, dropped_rx)
            .await
    }

    pub async fn queue_depth(&self) -> Result<usize, AppError> {
        let (responder, depth_rx) = oneshot::channel();
        self.command(AnalyzerCommand::QueueDepth { responder }, depth_rx)
            .await
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    async fn command<T>(
        &self,
        command: AnalyzerCommand,
        response_rx: oneshot::Receiver<T>,
    ) -> Result<T, AppError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AppError::Disposed)?;
        response_rx.await.map_err(|_| AppError::Disposed)
    }
}

#[async_trait]
impl LeafAnalyzer for AnalyzerHandle {
    async fn analyze_area(
        &self,
        image: ImageSource,
        origin: RequestOrigin,
    ) -> Result<f64, AppError> {
        let outcome = self.measure(image, AnalysisKind::Area, origin).await?;
        Ok(outcome.area_cm2)
    }

    async fn find_contour(
        &self,
        image: ImageSource,
        origin: RequestOrigin,
    ) -> Result<Vec<Point>, AppError> {
        let outcome = self.measure(image, AnalysisKind::Contour, origin).await?;
        Ok(outcome.contour)
    }
}
