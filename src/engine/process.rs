use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::engine::channel::{ChannelConnection, ChannelFactory, VisionChannel};
use crate::engine::message::{EngineEvent, EngineJob};
use crate::error::AppError;

const JOB_BUFFER_SIZE: usize = 4;

/// Vision engine running as a child process, speaking JSON lines over
/// stdin/stdout.
pub struct ProcessChannel {
    job_tx: mpsc::Sender<String>,
    ready_rx: watch::Receiver<bool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    waiter_task: JoinHandle<()>,
}

impl ProcessChannel {
    pub fn spawn(
        command: &str,
        args: &[String],
        event_buffer_size: usize,
    ) -> Result<ChannelConnection, AppError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::EngineSpawn(command.to_string(), e))?;
        let stdin = child.stdin.take().ok_or_else(|| {
            AppError::EngineSpawn(
                command.to_string(),
                std::io::Error::other("stdin not piped"),
            )
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::EngineSpawn(
                command.to_string(),
                std::io::Error::other("stdout not piped"),
            )
        })?;
        info!("Started vision engine '{}' (pid {:?})", command, child.id());

        let (ready_tx, ready_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(event_buffer_size);
        let (job_tx, job_rx) = mpsc::channel(JOB_BUFFER_SIZE);

        let channel = ProcessChannel {
            job_tx,
            ready_rx,
            reader_task: tokio::spawn(read_notifications(stdout, ready_tx, event_tx)),
            writer_task: tokio::spawn(write_jobs(stdin, job_rx)),
            waiter_task: tokio::spawn(wait_for_exit(child)),
        };
        Ok(ChannelConnection {
            channel: Box::new(channel),
            notifications: event_rx,
        })
    }
}

#[async_trait]
impl VisionChannel for ProcessChannel {
    async fn wait_until_ready(&self) {
        let mut ready_rx = self.ready_rx.clone();
        if ready_rx.wait_for(|ready| *ready).await.is_err() {
            warn!("Engine exited before signalling readiness");
        }
    }

    fn send(&self, job: &EngineJob) -> Result<(), AppError> {
        let line = job.to_line()?;
        self.job_tx
            .try_send(line)
            .map_err(|e| AppError::EngineSend(e.to_string()))
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        // Dropping the child kills the engine process.
        self.waiter_task.abort();
    }
}

async fn read_notifications(
    stdout: ChildStdout,
    ready_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if matches!(EngineEvent::parse(&line), Ok(EngineEvent::Ready)) {
                    ready_tx.send_replace(true);
                }
                if event_tx.send(line).await.is_err() {
                    debug!("Notification receiver dropped, stopping engine reader");
                    break;
                }
            }
            Ok(None) => {
                warn!("Vision engine closed its output");
                break;
            }
            Err(e) => {
                error!("Failed to read engine output: {}", e);
                break;
            }
        }
    }
}

async fn write_jobs(mut stdin: ChildStdin, mut job_rx: mpsc::Receiver<String>) {
    while let Some(line) = job_rx.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            error!("Failed to write job to vision engine: {}", e);
            break;
        }
    }
}

async fn wait_for_exit(mut child: Child) {
    match child.wait().await {
        Ok(status) => info!("Vision engine exited with {}", status),
        Err(e) => error!("Failed to wait for vision engine: {}", e),
    }
}

/// Spawns a fresh engine process per connection.
pub struct ProcessChannelFactory {
    command: String,
    args: Vec<String>,
    event_buffer_size: usize,
}

impl ProcessChannelFactory {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            command: configuration.engine_command.clone(),
            args: configuration.engine_args.clone(),
            event_buffer_size: configuration.event_buffer_size,
        }
    }
}

impl ChannelFactory for ProcessChannelFactory {
    fn connect(&self) -> Result<ChannelConnection, AppError> {
        ProcessChannel::spawn(&self.command, &self.args, self.event_buffer_size)
    }
}
