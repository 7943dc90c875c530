//! Hand-off point between intake handlers and the publishing pipeline.
//!
//! Handlers never parse or buffer events beyond the request body; they wrap
//! it in a [`Batch`] and give it to a [`Reporter`]. Reporting must not block:
//! a full pipeline is surfaced to the agent as back-pressure.

use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Which intake endpoint received a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeKind {
    Backend,
    Rum,
}

impl IntakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeKind::Backend => "backend",
            IntakeKind::Rum => "rum",
        }
    }
}

/// One request body worth of undecoded events.
#[derive(Debug, Clone)]
pub struct Batch {
    pub kind: IntakeKind,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub received_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("publish queue is full")]
    Full,
    #[error("publisher is closed")]
    Closed,
}

/// Accepts batches for publishing.
pub trait Reporter: Send + Sync + 'static {
    /// Queue a batch. Must return without waiting on the pipeline.
    fn report(&self, batch: Batch) -> Result<(), PublishError>;
}

impl<F> Reporter for F
where
    F: Fn(Batch) -> Result<(), PublishError> + Send + Sync + 'static,
{
    fn report(&self, batch: Batch) -> Result<(), PublishError> {
        self(batch)
    }
}

/// Reporter backed by a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<Batch>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Batch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, batch: Batch) -> Result<(), PublishError> {
        self.tx.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(body: &'static str) -> Batch {
        Batch {
            kind: IntakeKind::Backend,
            content_type: None,
            body: Bytes::from_static(body.as_bytes()),
            received_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn channel_reporter_applies_backpressure() {
        let (reporter, mut rx) = ChannelReporter::new(1);
        assert_eq!(reporter.report(batch("a")), Ok(()));
        assert_eq!(reporter.report(batch("b")), Err(PublishError::Full));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.body, "a");
    }

    #[test]
    fn closed_channel_is_reported() {
        let (reporter, rx) = ChannelReporter::new(4);
        drop(rx);
        assert_eq!(reporter.report(batch("a")), Err(PublishError::Closed));
    }
}
