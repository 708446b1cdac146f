//! Publisher side of the status-change channel.
//!
//! Used by the orchestrator or by external triggers (e.g. a crawl
//! completion making a download's target URL known) whenever a DOI's
//! authoritative state changes outside the synchronous request path.

use async_nats::jetstream;
use tracing::{debug, info};

use crate::channel::{change_subject, stream_config, ChangeDoiMessage, STREAM_NAME};
use crate::types::{MinterError, Result};

/// Publishes DOI status-change events to the durable stream
#[derive(Clone)]
pub struct StatusPublisher {
    jetstream: jetstream::Context,
}

impl StatusPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Create the change stream if it does not exist yet
    pub async fn ensure_stream(&self) -> Result<()> {
        self.jetstream
            .get_or_create_stream(stream_config())
            .await
            .map_err(|e| MinterError::Nats(format!("failed to create stream: {e}")))?;

        info!(stream = STREAM_NAME, "status-change stream ready");
        Ok(())
    }

    /// Publish one change event, waiting for the stream's ack
    pub async fn publish(&self, message: &ChangeDoiMessage) -> Result<()> {
        let subject = change_subject(&message.doi);
        let payload = serde_json::to_vec(message)
            .map_err(|e| MinterError::Internal(format!("failed to serialize change: {e}")))?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| MinterError::Nats(format!("publish to {subject} failed: {e}")))?
            .await
            .map_err(|e| MinterError::Nats(format!("no stream ack for {subject}: {e}")))?;

        debug!(doi = %message.doi, status = ?message.status, "change published");
        Ok(())
    }
}
