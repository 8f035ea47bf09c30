use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::payload::ImagePayload;
use crate::common::Point;
use crate::error::AppError;

const MARKER_NOT_FOUND: &str = "marker not found";

/// Notification emitted by the vision engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineEvent {
    Ready,
    Result(RawAnalysis),
    Error { message: String },
}

/// Engine measurement before calibration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    /// Leaf area in pixels².
    pub area: f64,
    #[serde(alias = "pixelsPerCalibrationCell")]
    pub px_per_cell: f64,
    #[serde(default)]
    pub contour: Vec<Point>,
    #[serde(default)]
    pub contour_count: u32,
    #[serde(default = "marker_found_default")]
    pub marker_found: bool,
}

fn marker_found_default() -> bool {
    true
}

impl EngineEvent {
    /// Parses one notification line. A bare `ready` is accepted as well as the
    /// JSON form.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed == "ready" {
            return Ok(EngineEvent::Ready);
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

/// Whether an engine error means the calibration marker is missing from the frame.
pub fn is_marker_not_found(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case(MARKER_NOT_FOUND)
}

/// One unit of work handed to the engine.
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub payload: Arc<ImagePayload>,
    pub px_per_cell: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    image: &'a str,
    width: u32,
    height: u32,
    px_per_cell: u32,
}

impl EngineJob {
    pub fn new(payload: Arc<ImagePayload>, px_per_cell: u32) -> Self {
        Self {
            payload,
            px_per_cell,
        }
    }

    pub fn to_line(&self) -> Result<String, AppError> {
        let line = JobLine {
            kind: "process",
            image: &self.payload.base64,
            width: self.payload.width,
            height: self.payload.height,
            px_per_cell: self.px_per_cell,
        };
        Ok(serde_json::to_string(&line)?)
    }
}
