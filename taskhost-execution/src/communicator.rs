//! Stdio bridge to a worker process
//!
//! Two tasks run per process: a reader that parses the worker's stdout and a
//! writer that drains an outbound queue into its stdin. The reader resolves
//! the [`ResultFuture`] exactly once; if the stream ends without a `result`
//! line the result resolves as failed.

use std::time::Duration;

use taskhost_ipc::{InboundMessage, LineReader, LineWriter, OutboundMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::result::{result_channel, ProcessResult, ResultFuture, ResultSetter};
use crate::watchdog::{Heartbeat, Watchdog};

/// How long the reader keeps consuming stdout after the process died.
///
/// Covers lines still buffered in the pipe, and bounds the wait when a
/// grandchild inherited stdout and keeps it open.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Protocol endpoint for one worker process
pub struct Communicator {
    task: String,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    result: ResultFuture,
    shutdown: CancellationToken,
}

impl Communicator {
    /// Start the reader and writer tasks
    pub fn start<R, W>(task: impl Into<String>, stdout: R, stdin: W, heartbeat: Heartbeat) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let task = task.into();
        let (setter, result) = result_channel();
        let (outbound, queue) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(read_loop(
            task.clone(),
            LineReader::new(stdout),
            heartbeat,
            setter,
            shutdown.clone(),
        ));
        tokio::spawn(write_loop(
            task.clone(),
            LineWriter::new(stdin),
            queue,
            shutdown.clone(),
        ));

        Self {
            task,
            outbound,
            result,
            shutdown,
        }
    }

    /// Close both directions once the watchdog confirms the process is dead
    pub fn register_shutdown(&self, watchdog: &Watchdog) {
        let shutdown = self.shutdown.clone();
        watchdog.add_shutdown_callback(move || shutdown.cancel());
    }

    /// Queue `text` as a `message` line.
    ///
    /// Never blocks. `false` means the stream is closed and the process will
    /// not receive anything further.
    pub fn send_message(&self, text: &str) -> bool {
        if self.shutdown.is_cancelled() {
            debug!(task = %self.task, "Rejecting message, stream is closed");
            return false;
        }

        self.outbound
            .send(OutboundMessage::Message(text.to_string()))
            .is_ok()
    }

    pub fn result(&self) -> ResultFuture {
        self.result.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.outbound.is_closed()
    }

    /// Close the stream without waiting for the watchdog
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn read_loop<R>(
    task: String,
    mut reader: LineReader<R>,
    heartbeat: Heartbeat,
    setter: ResultSetter,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut drain_until: Option<Instant> = None;

    loop {
        let next = match drain_until {
            None => tokio::select! {
                biased;
                next = reader.next_message() => next,
                _ = shutdown.cancelled() => {
                    drain_until = Some(Instant::now() + DRAIN_GRACE);
                    continue;
                }
            },
            Some(deadline) => match tokio::time::timeout_at(deadline, reader.next_message()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(task = %task, "Stdout still open after process exit, giving up");
                    break;
                }
            },
        };

        match next {
            Ok(Some(message)) => handle_message(&task, message, &heartbeat, &setter),
            Ok(None) => {
                trace!(task = %task, "Stdout closed");
                break;
            }
            Err(e) if !e.is_fatal() => {
                warn!(task = %task, "Dropping malformed line: {}", e);
            }
            Err(e) => {
                warn!(task = %task, "Failed to read from process: {}", e);
                break;
            }
        }
    }

    if setter.fail_if_unset() {
        warn!(task = %task, "Process output ended without a result");
    }
}

fn handle_message(
    task: &str,
    message: InboundMessage,
    heartbeat: &Heartbeat,
    setter: &ResultSetter,
) {
    trace!(task = %task, keyword = message.keyword(), "Received line");
    match message {
        InboundMessage::Heartbeat => heartbeat.beat(),
        InboundMessage::Result(output) => {
            debug!(task = %task, bytes = output.len(), "Received result");
            setter.set(ProcessResult::success(output));
        }
    }
}

async fn write_loop<W>(
    task: String,
    mut writer: LineWriter<W>,
    mut queue: mpsc::UnboundedReceiver<OutboundMessage>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            written = writer.send(&message) => written,
        };

        if let Err(e) = written {
            warn!(task = %task, "Failed to write to process: {}", e);
            queue.close();
            return;
        }
        trace!(task = %task, "Sent message");
    }

    queue.close();
    if let Err(e) = writer.close().await {
        trace!(task = %task, "Failed to close process input: {}", e);
    }
    debug!(task = %task, "Writer stopped");
}
