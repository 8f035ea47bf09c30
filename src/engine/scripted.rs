use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::channel::{ChannelConnection, ChannelFactory, VisionChannel};
use crate::engine::message::EngineJob;
use crate::error::AppError;

/// In-memory engine driven by the test: jobs sent to it are observable and
/// notifications are injected by hand.
pub struct ScriptedEngine {
    pub jobs: mpsc::UnboundedReceiver<EngineJob>,
    pub events: mpsc::Sender<String>,
}

impl ScriptedEngine {
    pub async fn ready(&self) {
        self.emit(r#"{"type":"ready"}"#).await;
    }

    pub async fn result(&self, area: f64, px_per_cell: f64) {
        self.emit(&format!(
            r#"{{"type":"result","area":{area},"pxPerCell":{px_per_cell},"contour":[{{"x":0,"y":0}},{{"x":3,"y":0}},{{"x":0,"y":4}}],"contourCount":3,"markerFound":true}}"#
        ))
        .await;
    }

    pub async fn error(&self, message: &str) {
        self.emit(&serde_json::json!({ "type": "error", "message": message }).to_string())
            .await;
    }

    pub async fn emit(&self, line: &str) {
        self.events
            .send(line.to_string())
            .await
            .expect("analyzer dropped the notification stream");
    }

    pub async fn next_job(&mut self) -> EngineJob {
        self.jobs.recv().await.expect("channel dropped")
    }

    pub fn no_pending_job(&mut self) -> bool {
        self.jobs.try_recv().is_err()
    }
}

struct ScriptedChannel {
    jobs: mpsc::UnboundedSender<EngineJob>,
}

#[async_trait]
impl VisionChannel for ScriptedChannel {
    async fn wait_until_ready(&self) {}

    fn send(&self, job: &EngineJob) -> Result<(), AppError> {
        self.jobs
            .send(job.clone())
            .map_err(|e| AppError::EngineSend(e.to_string()))
    }
}

/// Hands every new connection's [`ScriptedEngine`] to the test.
pub struct ScriptedFactory {
    engines: mpsc::UnboundedSender<ScriptedEngine>,
    refuse: AtomicBool,
}

impl ScriptedFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScriptedEngine>) {
        let (engines, engines_rx) = mpsc::unbounded_channel();
        (
            Self {
                engines,
                refuse: AtomicBool::new(false),
            },
            engines_rx,
        )
    }

    /// Makes subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl ChannelFactory for ScriptedFactory {
    fn connect(&self) -> Result<ChannelConnection, AppError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(AppError::EngineSpawn(
                "scripted".to_string(),
                std::io::Error::other("refused"),
            ));
        }
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(16);
        let _ = self.engines.send(ScriptedEngine {
            jobs: jobs_rx,
            events: events_tx,
        });
        Ok(ChannelConnection {
            channel: Box::new(ScriptedChannel { jobs: jobs_tx }),
            notifications: events_rx,
        })
    }
}
