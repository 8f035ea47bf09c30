use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::coordinator::RequestCoordinator;
use crate::analysis::facade::AnalyzerHandle;
use crate::analysis::notice::{NoticeBoard, NoticeKind};
use crate::analysis::request::AnalysisRequest;
use crate::analysis::supervisor::{ChannelSupervisor, ReadinessState};
use crate::config::Configuration;
use crate::engine::channel::ChannelFactory;
use crate::engine::message::{EngineEvent, EngineJob};

pub enum AnalyzerCommand {
    Submit {
        request: AnalysisRequest,
    },
    Reset {
        responder: oneshot::Sender<ReadinessState>,
    },
    Clear {
        responder: oneshot::Sender<usize>,
    },
    QueueDepth {
        responder: oneshot::Sender<usize>,
    },
}

/// Single task owning the request queue and the engine channel. Every
/// mutation of either happens here, one message at a time.
pub struct AnalyzerService {
    coordinator: RequestCoordinator,
    supervisor: ChannelSupervisor,
    notices: NoticeBoard,
    command_rx: mpsc::Receiver<AnalyzerCommand>,
    cancel_token: CancellationToken,
}

impl AnalyzerService {
    pub fn spawn(
        configuration: &Configuration,
        factory: Arc<dyn ChannelFactory>,
    ) -> AnalyzerHandle {
        let (command_tx, command_rx) = mpsc::channel(configuration.command_buffer_size);
        let (state_tx, state_rx) = watch::channel(ReadinessState::Initializing);
        let (notices_tx, _) = broadcast::channel(configuration.notice_buffer_size);
        let cancel_token = CancellationToken::new();

        let mut notices = NoticeBoard::new(notices_tx.clone(), configuration.notice_window());
        let supervisor = ChannelSupervisor::start(factory, state_tx);
        if supervisor.state() == ReadinessState::Failed {
            notices.raise(NoticeKind::EngineUnavailable);
        }
        let service = AnalyzerService {
            coordinator: RequestCoordinator::from_configuration(configuration),
            supervisor,
            notices,
            command_rx,
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(service.run());

        AnalyzerHandle::new(command_tx, state_rx, notices_tx, cancel_token)
    }

    async fn run(mut self) {
        info!("Analyzer service started");
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Analyzer service received shutdown");
                    break;
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All analyzer handles dropped");
                            break;
                        }
                    }
                }
                notification = self.supervisor.next_notification() => {
                    self.handle_notification(notification).await;
                }
            }
        }
        let dropped = self.coordinator.clear();
        self.supervisor.shutdown();
        info!(
            "Analyzer service stopped, {} pending requests dropped",
            dropped
        );
    }

    async fn handle_command(&mut self, command: AnalyzerCommand) {
        match command {
            AnalyzerCommand::Submit { request } => {
                let job = self.coordinator.submit(request);
                self.dispatch(job).await;
            }
            AnalyzerCommand::Reset { responder } => {
                self.coordinator.on_channel_lost();
                let state = self.supervisor.reset();
                if state == ReadinessState::Failed {
                    self.notices.raise(NoticeKind::EngineUnavailable);
                }
                let _ = responder.send(state);
            }
            AnalyzerCommand::Clear { responder } => {
                let dropped = self.coordinator.clear();
                info!("Cleared {} pending analysis requests", dropped);
                let _ = responder.send(dropped);
            }
            AnalyzerCommand::QueueDepth { responder } => {
                let _ = responder.send(self.coordinator.len());
            }
        }
    }

    async fn handle_notification(&mut self, notification: Option<String>) {
        let Some(line) = notification else {
            self.coordinator.on_channel_lost();
            self.supervisor.on_stream_closed();
            self.notices.raise(NoticeKind::EngineUnavailable);
            return;
        };
        let event = match EngineEvent::parse(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed engine notification: {}", e);
                return;
            }
        };
        match event {
            EngineEvent::Ready => {
                if self.supervisor.mark_ready() {
                    let job = self.coordinator.on_channel_ready();
                    self.dispatch(job).await;
                }
            }
            EngineEvent::Result(raw) => {
                let job = self.coordinator.on_engine_result(raw);
                self.dispatch(job).await;
            }
            EngineEvent::Error { message } => match self.supervisor.state() {
                ReadinessState::Initializing => {
                    self.supervisor.mark_failed(&message);
                    self.notices.raise(NoticeKind::EngineUnavailable);
                }
                ReadinessState::Ready => {
                    error!("Vision engine error: {}", message);
                    let step = self.coordinator.on_engine_error(&message);
                    if let Some(kind) = step.notice {
                        self.notices.raise(kind);
                    }
                    self.dispatch(step.dispatch).await;
                }
                ReadinessState::Failed => {
                    debug!("Ignoring error from failed engine: {}", message);
                }
            },
        }
    }

    /// Sends the next job. A job the channel refuses counts as an engine error
    /// for its request.
    async fn dispatch(&mut self, mut next: Option<EngineJob>) {
        while let Some(job) = next.take() {
            if let Err(e) = self.supervisor.dispatch(&job).await {
                error!("Failed to dispatch analysis job: {}", e);
                let step = self.coordinator.on_engine_error(&e.to_string());
                if let Some(kind) = step.notice {
                    self.notices.raise(kind);
                }
                next = step.dispatch;
            }
        }
    }
}
