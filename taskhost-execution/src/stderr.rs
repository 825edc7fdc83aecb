//! Relay of worker stderr into the log

use taskhost_ipc::LineReader;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Logs every stderr line of a worker at INFO until the stream closes
pub struct StderrForwarder;

impl StderrForwarder {
    /// Start forwarding; the task resolves to the number of lines relayed
    pub fn spawn<R>(task: impl Into<String>, stderr: R) -> JoinHandle<usize>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = task.into();
        tokio::spawn(async move {
            let mut reader = LineReader::new(stderr);
            let mut forwarded = 0;

            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        forwarded += 1;
                        info!(task = %task, "Process printed to stderr: {}", String::from_utf8_lossy(&line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(task = %task, "Failed reading from stderr: {}", e);
                        break;
                    }
                }
            }

            debug!(task = %task, lines = forwarded, "Stderr forwarding stopped");
            forwarded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_forwards_until_close() {
        let (stderr, mut worker) = tokio::io::duplex(256);
        let handle = StderrForwarder::spawn("test", stderr);

        worker.write_all(b"warming up\n\xffbroken utf8\nno newline").await.unwrap();
        drop(worker);

        assert_eq!(handle.await.unwrap(), 3);
    }
}
