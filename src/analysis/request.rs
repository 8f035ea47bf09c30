use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::analysis::payload::ImagePayload;
use crate::common::Point;

/// Which part of the measurement the caller is after. Both are always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Area,
    Contour,
}

/// The flow that asked for the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    LivePreview,
    Capture,
    Recalculation,
    GalleryImport,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestOrigin::LivePreview => "live-preview",
            RequestOrigin::Capture => "capture",
            RequestOrigin::Recalculation => "recalculation",
            RequestOrigin::GalleryImport => "gallery-import",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub area_cm2: f64,
    pub contour: Vec<Point>,
    pub contour_count: u32,
    pub marker_found: bool,
}

impl AnalysisOutcome {
    /// Sentinel delivered for every terminal per-request failure.
    pub fn failed() -> Self {
        Self {
            area_cm2: f64::NAN,
            contour: Vec::new(),
            contour_count: 0,
            marker_found: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.area_cm2.is_nan()
    }
}

pub struct AnalysisRequest {
    pub id: Uuid,
    pub payload: Arc<ImagePayload>,
    pub kind: AnalysisKind,
    pub origin: RequestOrigin,
    pub attempts: u32,
    responder: oneshot::Sender<AnalysisOutcome>,
}

impl AnalysisRequest {
    pub fn new(
        payload: ImagePayload,
        kind: AnalysisKind,
        origin: RequestOrigin,
        responder: oneshot::Sender<AnalysisOutcome>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: Arc::new(payload),
            kind,
            origin,
            attempts: 0,
            responder,
        }
    }

    /// Delivers the outcome. Consumes the request, so it can only happen once.
    pub fn resolve(self, outcome: AnalysisOutcome) {
        if self.responder.send(outcome).is_err() {
            debug!("Caller for request {} is no longer waiting", self.id);
        }
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("attempts", &self.attempts)
            .field("width", &self.payload.width)
            .field("height", &self.payload.height)
            .finish()
    }
}
