//! Event delivery to the display layer

use ferry_core::event::PipelineEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Sending half of the pipeline event stream
///
/// Sends wait while the consumer's channel is full. A dropped consumer is
/// not an error: events are discarded and the run continues.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Creates a sink and the receiver the display layer reads from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// A sink that drops every event
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub async fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                trace!("Event receiver dropped");
            }
        }
    }
}
