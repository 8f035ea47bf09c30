use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    /// The calibration marker was not visible in the frame.
    MarkerNotFound,
    /// A frame could not be processed after every retry.
    ProcessingFailed,
    /// The engine never came up, a reset is needed.
    EngineUnavailable,
}

impl NoticeKind {
    pub fn message(self) -> &'static str {
        match self {
            NoticeKind::MarkerNotFound => "Calibration marker not found in the frame",
            NoticeKind::ProcessingFailed => "Failed to process the frame",
            NoticeKind::EngineUnavailable => "Failed to load the vision engine",
        }
    }
}

/// A user-facing message about a failed measurement.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}

/// Suppresses a notice kind that was already raised within the window.
pub struct NoticeThrottle {
    window: Duration,
    last_raised: IndexMap<NoticeKind, Instant>,
}

impl NoticeThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_raised: IndexMap::new(),
        }
    }

    pub fn admit(&mut self, kind: NoticeKind, now: Instant) -> bool {
        if let Some(last) = self.last_raised.get(&kind) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_raised.insert(kind, now);
        true
    }
}

pub struct NoticeBoard {
    notices_tx: broadcast::Sender<Notice>,
    throttle: NoticeThrottle,
}

impl NoticeBoard {
    pub fn new(notices_tx: broadcast::Sender<Notice>, window: Duration) -> Self {
        Self {
            notices_tx,
            throttle: NoticeThrottle::new(window),
        }
    }

    pub fn raise(&mut self, kind: NoticeKind) {
        if !self.throttle.admit(kind, Instant::now()) {
            debug!("Suppressing repeated notice {:?}", kind);
            return;
        }
        warn!("{}", kind.message());
        // Nobody listening is fine, the notice is already logged.
        let _ = self.notices_tx.send(Notice {
            kind,
            raised_at: Utc::now(),
        });
    }
}
