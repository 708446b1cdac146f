//! Status-change channel - durable, ordered, at-least-once delivery of
//! DOI status changes over NATS JetStream.
//!
//! Each DOI gets its own subject token, so per-DOI ordering is preserved
//! by the transport; cross-DOI ordering is neither guaranteed nor needed.
//! A paired dead-letter subject on the same stream holds messages that
//! repeatedly failed processing, for manual inspection - they are never
//! silently dropped.

pub mod consumer;
pub mod publisher;

pub use consumer::{apply_change, ConsumerConfig, UpdateConsumer};
pub use publisher::StatusPublisher;

use async_nats::jetstream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::doi::{Doi, DoiStatus};

/// JetStream stream holding both live and dead-lettered change messages
pub const STREAM_NAME: &str = "DOI_CHANGES";
pub const CHANGE_SUBJECT_PREFIX: &str = "doi.change";
pub const DEAD_LETTER_SUBJECT_PREFIX: &str = "doi.dead";
pub const CONSUMER_NAME: &str = "doi_updater";

/// Config for the change stream, shared by publisher and consumer so
/// `get_or_create_stream` never races two divergent definitions.
/// File storage: messages must survive broker restarts until applied.
pub fn stream_config() -> jetstream::stream::Config {
    jetstream::stream::Config {
        name: STREAM_NAME.to_string(),
        subjects: vec![
            format!("{CHANGE_SUBJECT_PREFIX}.>"),
            format!("{DEAD_LETTER_SUBJECT_PREFIX}.>"),
        ],
        storage: jetstream::stream::StorageType::File,
        max_age: Duration::ZERO,
        ..Default::default()
    }
}

/// A DOI status-change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDoiMessage {
    #[serde(rename = "doiStatus")]
    pub status: DoiStatus,
    pub doi: Doi,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<String>,
}

/// NATS subject token for a DOI: `/` and `.` are subject separators in
/// NATS, so both map to `-`
pub fn subject_token(doi: &Doi) -> String {
    doi.to_string().replace(['/', '.'], "-")
}

pub fn change_subject(doi: &Doi) -> String {
    format!("{}.{}", CHANGE_SUBJECT_PREFIX, subject_token(doi))
}

pub fn dead_letter_subject(doi_token: &str) -> String {
    format!("{}.{}", DEAD_LETTER_SUBJECT_PREFIX, doi_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_field_names() {
        let msg = ChangeDoiMessage {
            status: DoiStatus::Registered,
            doi: Doi::new("10.5072", "dl.abc123").unwrap(),
            target: Some("https://www.gbif.org/occurrence/download/0001".to_string()),
            metadata: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["doiStatus"], "REGISTERED");
        assert_eq!(json["doi"], "10.5072/dl.abc123");
        assert_eq!(
            json["target"],
            "https://www.gbif.org/occurrence/download/0001"
        );
        assert!(json.get("metadata").is_none());

        let back: ChangeDoiMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_stream_config_covers_both_subject_spaces() {
        let config = stream_config();
        assert_eq!(config.name, STREAM_NAME);
        assert_eq!(
            config.subjects,
            vec!["doi.change.>".to_string(), "doi.dead.>".to_string()]
        );
    }

    #[test]
    fn test_subject_token_has_no_separators() {
        let doi = Doi::new("10.5072", "dl.abc").unwrap();
        let token = subject_token(&doi);
        assert_eq!(token, "10-5072-dl-abc");
        assert_eq!(change_subject(&doi), "doi.change.10-5072-dl-abc");
        assert_eq!(
            dead_letter_subject(&token),
            "doi.dead.10-5072-dl-abc"
        );
    }
}
