//! DataCite REST API client.
//!
//! Talks JSON:API to the `/dois` endpoints with basic auth. Metadata XML
//! travels base64-encoded inside the JSON payload. Every request carries
//! the configured timeout and the connection pool is bounded so a slow
//! provider cannot grow resource usage without limit.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::datacite::{DoiData, RegistrationClient};
use crate::doi::{Doi, DoiStatus};
use crate::types::{MinterError, Result};

/// Connection settings for the DataCite REST API
#[derive(Debug, Clone)]
pub struct DataCiteConfig {
    /// API base URL (e.g. `https://api.test.datacite.org`)
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout (default 20s)
    pub timeout: Duration,
    /// Maximum pooled connections to the provider (default 10)
    pub max_connections: usize,
}

impl Default for DataCiteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.test.datacite.org".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(20),
            max_connections: 10,
        }
    }
}

/// JSON:API request/response bodies for the `/dois` endpoints
#[derive(Debug, Serialize, Deserialize)]
struct DoiPayload {
    data: DoiPayloadData,
}

#[derive(Debug, Serialize, Deserialize)]
struct DoiPayloadData {
    #[serde(rename = "type")]
    kind: String,
    attributes: DoiAttributes,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DoiAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    doi: Option<String>,
    /// Lifecycle event: `register`, `publish` or `hide`; absent = draft
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    /// Base64-encoded metadata XML
    #[serde(skip_serializing_if = "Option::is_none")]
    xml: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

/// DataCite REST implementation of the registration contract
pub struct DataCiteRestClient {
    config: DataCiteConfig,
    http: reqwest::Client,
}

impl DataCiteRestClient {
    pub fn new(config: DataCiteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent("minter/0.1")
            .build()
            .map_err(|e| MinterError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    fn doi_url(&self, doi: &Doi) -> String {
        format!("{}/dois/{}", self.config.api_url.trim_end_matches('/'), doi)
    }

    fn dois_url(&self) -> String {
        format!("{}/dois", self.config.api_url.trim_end_matches('/'))
    }

    fn payload(doi: &Doi, event: Option<&str>, url: Option<&str>, xml: Option<&str>) -> DoiPayload {
        DoiPayload {
            data: DoiPayloadData {
                kind: "dois".to_string(),
                attributes: DoiAttributes {
                    doi: Some(doi.to_string()),
                    event: event.map(str::to_string),
                    url: url.map(str::to_string),
                    xml: xml.map(|x| BASE64.encode(x)),
                    state: None,
                },
            },
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, doi: &Doi) -> Result<reqwest::Response> {
        let response = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| map_send_error(doi, e))?;

        map_status(doi, response)
    }
}

#[async_trait]
impl RegistrationClient for DataCiteRestClient {
    async fn reserve(&self, doi: &Doi, metadata_xml: &str) -> Result<()> {
        debug!(doi = %doi, "reserving draft DOI");
        let body = Self::payload(doi, None, None, Some(metadata_xml));
        self.send(self.http.post(self.dois_url()).json(&body), doi)
            .await?;
        Ok(())
    }

    async fn register(&self, doi: &Doi, target: &str, metadata_xml: &str) -> Result<()> {
        debug!(doi = %doi, target = %target, "registering DOI");
        let body = Self::payload(doi, Some("publish"), Some(target), Some(metadata_xml));
        self.send(self.http.put(self.doi_url(doi)).json(&body), doi)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        doi: &Doi,
        target: Option<&str>,
        metadata_xml: Option<&str>,
    ) -> Result<()> {
        debug!(doi = %doi, "updating DOI at provider");
        let body = Self::payload(doi, None, target, metadata_xml);
        self.send(self.http.put(self.doi_url(doi)).json(&body), doi)
            .await?;
        Ok(())
    }

    async fn delete(&self, doi: &Doi) -> Result<()> {
        // Drafts can be hard-deleted; registered DOIs only deactivated
        let response = self
            .http
            .delete(self.doi_url(doi))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| map_send_error(doi, e))?;

        if response.status() == StatusCode::METHOD_NOT_ALLOWED
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
        {
            warn!(doi = %doi, "DOI is registered, hiding instead of deleting");
            let body = Self::payload(doi, Some("hide"), None, None);
            self.send(self.http.put(self.doi_url(doi)).json(&body), doi)
                .await?;
            return Ok(());
        }

        map_status(doi, response)?;
        Ok(())
    }

    async fn resolve(&self, doi: &Doi) -> Result<Option<DoiData>> {
        let response = self
            .http
            .get(self.doi_url(doi))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| map_send_error(doi, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = map_status(doi, response)?;
        let payload: DoiPayload = response.json().await.map_err(|e| {
            MinterError::registration(format!("invalid response for {doi}: {e}"), false)
        })?;

        let attributes = payload.data.attributes;
        Ok(Some(DoiData {
            status: map_state(attributes.state.as_deref()),
            target: attributes.url,
        }))
    }
}

/// DataCite `state` values: draft, registered, findable
fn map_state(state: Option<&str>) -> DoiStatus {
    match state {
        Some("registered") | Some("findable") => DoiStatus::Registered,
        _ => DoiStatus::Reserved,
    }
}

fn map_send_error(doi: &Doi, e: reqwest::Error) -> MinterError {
    // Timeouts and connection failures are worth retrying; anything else
    // in the request path is a bug on our side
    let retryable = e.is_timeout() || e.is_connect() || e.is_request();
    MinterError::registration(format!("request for {doi} failed: {e}"), retryable)
}

fn map_status(doi: &Doi, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    match status {
        s if s.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(MinterError::NotFound(format!(
            "provider has no DOI {doi}"
        ))),
        StatusCode::CONFLICT => Err(MinterError::Exists(format!(
            "provider already has DOI {doi}"
        ))),
        s if s.is_server_error() => Err(MinterError::registration(
            format!("provider error {s} for {doi}"),
            true,
        )),
        s => Err(MinterError::registration(
            format!("provider rejected {doi} with {s}"),
            false,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state(Some("draft")), DoiStatus::Reserved);
        assert_eq!(map_state(Some("registered")), DoiStatus::Registered);
        assert_eq!(map_state(Some("findable")), DoiStatus::Registered);
        assert_eq!(map_state(None), DoiStatus::Reserved);
    }

    #[test]
    fn test_payload_encodes_xml_as_base64() {
        let doi = Doi::new("10.5072", "abc").unwrap();
        let payload = DataCiteRestClient::payload(
            &doi,
            Some("publish"),
            Some("https://example.org/x"),
            Some("<resource/>"),
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["data"]["type"], "dois");
        assert_eq!(json["data"]["attributes"]["doi"], "10.5072/abc");
        assert_eq!(json["data"]["attributes"]["event"], "publish");
        assert_eq!(
            json["data"]["attributes"]["xml"],
            BASE64.encode("<resource/>")
        );
    }

    #[test]
    fn test_draft_payload_omits_event() {
        let doi = Doi::new("10.5072", "abc").unwrap();
        let payload = DataCiteRestClient::payload(&doi, None, None, Some("<resource/>"));
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["data"]["attributes"].get("event").is_none());
        assert!(json["data"]["attributes"].get("url").is_none());
    }

    #[test]
    fn test_doi_url_building() {
        let client = DataCiteRestClient::new(DataCiteConfig {
            api_url: "https://api.test.datacite.org/".to_string(),
            ..Default::default()
        })
        .unwrap();
        let doi = Doi::new("10.5072", "dl.abc").unwrap();
        assert_eq!(
            client.doi_url(&doi),
            "https://api.test.datacite.org/dois/10.5072/dl.abc"
        );
    }
}
