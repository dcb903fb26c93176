/// Progress event emission
///
/// A bounded mpsc channel carries progress frames from the scheduler to
/// whoever consumes the run (SSE handler or the buffered-response drain).
/// `emit` awaits channel capacity, so a slow consumer applies backpressure
/// to the scheduler and frames are always delivered in emission order.

use crate::runtime::history::ExecutionStore;
use crate::workflow::types::{LogLevel, LogType, ProgressEvent};
use chrono::Utc;
use tokio::sync::mpsc;
use thiserror::Error;

/// The consumer of the progress stream went away
///
/// Treated as fatal by the scheduler: with nobody listening there is no
/// point finishing the crawl.
#[derive(Debug, Error)]
#[error("progress stream receiver dropped")]
pub struct TransportClosed;

/// Sending half of the progress stream
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    /// Create a bounded progress channel
    pub fn channel(capacity: usize) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ProgressSink { tx }, rx)
    }

    /// Deliver one frame, waiting for channel capacity if needed
    pub async fn emit(&self, event: ProgressEvent) -> Result<(), TransportClosed> {
        self.tx.send(event).await.map_err(|_| TransportClosed)
    }
}

/// Per-node logging handle passed into operations
///
/// Each line becomes a `log` progress frame and, best-effort, a row in the
/// execution log. Only the stream delivery can fail; persistence problems
/// are logged and swallowed.
#[derive(Clone)]
pub struct NodeLogger {
    sink: ProgressSink,
    history: ExecutionStore,
    execution_id: String,
    node_id: String,
    node_name: String,
}

impl NodeLogger {
    pub fn new(
        sink: ProgressSink,
        history: ExecutionStore,
        execution_id: String,
        node_id: String,
        node_name: String,
    ) -> Self {
        Self {
            sink,
            history,
            execution_id,
            node_id,
            node_name,
        }
    }

    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), TransportClosed> {
        let message = message.into();

        self.sink
            .emit(ProgressEvent::Log {
                node_id: self.node_id.clone(),
                node_name: self.node_name.clone(),
                message: message.clone(),
                level,
                timestamp: Utc::now(),
            })
            .await?;

        if let Err(e) = self
            .history
            .append_log(
                &self.execution_id,
                &self.node_id,
                &self.node_name,
                LogType::Log,
                Some(&message),
                Some(level),
            )
            .await
        {
            tracing::warn!("⚠️ Failed to persist execution log: {}", e);
        }

        Ok(())
    }

    pub async fn info(&self, message: impl Into<String>) -> Result<(), TransportClosed> {
        self.log(LogLevel::Info, message).await
    }

    pub async fn success(&self, message: impl Into<String>) -> Result<(), TransportClosed> {
        self.log(LogLevel::Success, message).await
    }

    pub async fn warning(&self, message: impl Into<String>) -> Result<(), TransportClosed> {
        self.log(LogLevel::Warning, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_delivers_frames_in_order() {
        let (sink, mut rx) = ProgressSink::channel(8);
        sink.emit(ProgressEvent::Error {
            error: "first".into(),
        })
        .await
        .unwrap();
        sink.emit(ProgressEvent::Error {
            error: "second".into(),
        })
        .await
        .unwrap();
        drop(sink);

        let mut errors = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::Error { error } = event {
                errors.push(error);
            }
        }
        assert_eq!(errors, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn dropped_receiver_yields_transport_closed() {
        let (sink, rx) = ProgressSink::channel(1);
        drop(rx);
        let err = sink
            .emit(ProgressEvent::Error {
                error: "nobody listening".into(),
            })
            .await;
        assert!(err.is_err());
    }
}
