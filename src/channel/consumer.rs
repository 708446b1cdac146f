//! DOI update consumer - the single logical consumer draining the
//! status-change channel and applying transitions to the store.
//!
//! Must always be only one active consumer: concurrent application of
//! messages for the same DOI can interleave a delete before its create.
//! The durable JetStream consumer enforces this across restarts with
//! `max_ack_pending = 1` (one in-flight message), not an in-process flag.
//!
//! Messages are acknowledged only after the store write succeeds, so
//! delivery is at-least-once and `apply_change` must be idempotent. A
//! message whose DOI has no local record yet is redelivered with delay
//! (the create may simply be in flight); once the retry budget is spent,
//! or the payload is malformed, the message moves to the dead-letter
//! subject and the loop continues - one poisoned message never halts
//! reconciliation.

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::channel::{
    dead_letter_subject, stream_config, ChangeDoiMessage, CHANGE_SUBJECT_PREFIX, CONSUMER_NAME,
};
use crate::doi::DoiStatus;
use crate::store::DoiStore;
use crate::types::{MinterError, Result};

/// Tuning for the update consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Redelivery budget before a message is dead-lettered
    pub max_deliver: i64,
    /// Delay before a failed message is redelivered
    pub retry_delay: Duration,
    /// How long one fetch waits for messages
    pub batch_expires: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_deliver: 5,
            retry_delay: Duration::from_secs(10),
            batch_expires: Duration::from_secs(5),
        }
    }
}

/// Singleton consumer applying status-change messages to the store
pub struct UpdateConsumer {
    config: ConsumerConfig,
    store: Arc<dyn DoiStore>,
    jetstream: jetstream::Context,
    running: Arc<RwLock<bool>>,
}

impl UpdateConsumer {
    pub fn new(client: async_nats::Client, store: Arc<dyn DoiStore>, config: ConsumerConfig) -> Self {
        Self {
            config,
            store,
            jetstream: jetstream::new(client),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the reconciliation loop until stopped
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let stream = self.ensure_stream().await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(consumer = CONSUMER_NAME, "update consumer draining channel");

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("applied {} change messages", count);
                    }
                }
                Err(e) => {
                    error!("error processing batch: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("update consumer stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn ensure_stream(&self) -> Result<Stream> {
        self.jetstream
            .get_or_create_stream(stream_config())
            .await
            .map_err(|e| MinterError::Nats(format!("failed to create stream: {e}")))
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                jetstream::consumer::pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: format!("{CHANGE_SUBJECT_PREFIX}.>"),
                    // one in-flight message: the singleton discipline
                    max_ack_pending: 1,
                    max_deliver: self.config.max_deliver,
                    ack_wait: Duration::from_secs(30),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MinterError::Nats(format!("failed to create consumer: {e}")))
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(16)
            .expires(self.config.batch_expires)
            .messages()
            .await
            .map_err(|e| MinterError::Nats(format!("failed to fetch messages: {e}")))?;

        let mut count = 0;
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    count += 1;
                    self.process_message(msg).await;
                }
                Err(e) => {
                    warn!("error receiving message: {e}");
                }
            }
        }
        Ok(count)
    }

    async fn process_message(&self, msg: jetstream::Message) {
        let change: ChangeDoiMessage = match serde_json::from_slice(&msg.payload) {
            Ok(change) => change,
            Err(e) => {
                error!(subject = %msg.subject, "malformed change message: {e}");
                self.dead_letter(&msg, &format!("malformed payload: {e}"))
                    .await;
                return;
            }
        };

        debug!(doi = %change.doi, status = ?change.status, "applying change");

        match apply_change(self.store.as_ref(), &change) {
            Ok(()) => {
                if let Err(e) = msg.ack().await {
                    warn!(doi = %change.doi, "failed to ack applied message: {e}");
                }
            }
            Err(e) if e.is_retryable() => {
                let delivered = msg.info().map(|i| i.delivered).unwrap_or(i64::MAX);
                if delivered >= self.config.max_deliver {
                    warn!(
                        doi = %change.doi,
                        delivered,
                        "retry budget exhausted, dead-lettering: {e}"
                    );
                    self.dead_letter(&msg, &e.to_string()).await;
                } else {
                    warn!(doi = %change.doi, delivered, "transient failure, redelivering: {e}");
                    if let Err(nak_err) = msg
                        .ack_with(AckKind::Nak(Some(self.config.retry_delay)))
                        .await
                    {
                        warn!(doi = %change.doi, "failed to nak message: {nak_err}");
                    }
                }
            }
            Err(e) => {
                error!(doi = %change.doi, "change cannot be applied: {e}");
                self.dead_letter(&msg, &e.to_string()).await;
            }
        }
    }

    /// Move a message to the dead-letter subject and ack the original.
    /// The original payload is preserved verbatim for manual inspection.
    async fn dead_letter(&self, msg: &jetstream::Message, reason: &str) {
        let token = msg
            .subject
            .strip_prefix(&format!("{CHANGE_SUBJECT_PREFIX}."))
            .unwrap_or("unknown");
        let subject = dead_letter_subject(token);

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Minter-Error", reason);

        match self
            .jetstream
            .publish_with_headers(subject.clone(), headers, msg.payload.clone())
            .await
        {
            Ok(ack) => {
                if let Err(e) = ack.await {
                    error!(subject = %subject, "dead-letter publish not acked: {e}");
                    return; // leave unacked, the message will redeliver
                }
            }
            Err(e) => {
                error!(subject = %subject, "dead-letter publish failed: {e}");
                return;
            }
        }

        if let Err(e) = msg.ack().await {
            warn!(subject = %subject, "failed to ack dead-lettered message: {e}");
        }
    }
}

/// Apply one status-change message to the store, idempotently.
///
/// A missing local record is a retryable `NotFound` - the create may be
/// in flight. Re-applying a message a record already reflects is a no-op
/// success. A DELETED record never leaves DELETED.
pub fn apply_change(store: &dyn DoiStore, change: &ChangeDoiMessage) -> Result<()> {
    let record = store
        .get(&change.doi)?
        .ok_or_else(|| MinterError::NotFound(format!("no local record for DOI {}", change.doi)))?;

    // idempotent re-delivery: already applied
    let effective_target = if change.status == DoiStatus::Registered {
        change.target.as_deref()
    } else {
        None
    };
    if record.status == change.status
        && record.target.as_deref() == effective_target
        && (change.metadata.is_none() || record.metadata_xml == change.metadata)
    {
        return Ok(());
    }

    if record.status == DoiStatus::Deleted && change.status != DoiStatus::Deleted {
        return Err(MinterError::Exists(format!(
            "DOI {} is deleted and cannot change status",
            change.doi
        )));
    }

    match change.status {
        DoiStatus::Deleted => store.delete(&change.doi),
        status => store.update(
            &change.doi,
            status,
            change.target.as_deref(),
            change.metadata.as_deref(),
        ),
    }
}
