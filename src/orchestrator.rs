//! DOI registration orchestrator.
//!
//! Combines the generator, the persistence store and the registration
//! client into the synchronous-facing lifecycle operations. The store is
//! written before and after every external call so a provider failure
//! always leaves the local record in a valid, recoverable state:
//! a failed register leaves RESERVED, a failed remote delete still
//! tombstones locally (the local registry's authority over "is this DOI
//! usable" is independent of the provider's deactivation semantics).
//!
//! No operation here retries automatically - synchronous callers decide;
//! corrective updates arrive through the status-change channel instead.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::datacite::{validate_metadata, RegistrationClient};
use crate::doi::{Doi, DoiStatus, DoiType};
use crate::generator::DoiGenerator;
use crate::store::{DoiRecord, DoiStore};
use crate::types::{MinterError, Result};

/// Request to register or update a DOI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoiRegistration {
    /// Pre-reserved DOI; a new one is generated when absent
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub doi: Option<Doi>,
    /// Owning entity key: dataset UUID, download key, empty for data packages
    pub key: String,
    pub metadata: String,
    #[serde(rename = "type")]
    pub doi_type: DoiType,
    pub user: String,
}

/// Synchronous-facing DOI lifecycle service
pub struct DoiService {
    store: Arc<dyn DoiStore>,
    client: Arc<dyn RegistrationClient>,
    generator: DoiGenerator,
    portal_base_url: String,
}

impl DoiService {
    pub fn new(
        store: Arc<dyn DoiStore>,
        client: Arc<dyn RegistrationClient>,
        generator: DoiGenerator,
        portal_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            client,
            generator,
            portal_base_url: portal_base_url.into(),
        }
    }

    /// Mint a new DOI and persist it with status NEW. No external call.
    pub fn generate(&self, doi_type: DoiType) -> Result<Doi> {
        let doi = self.generator.generate(doi_type)?;
        self.store.create(&doi, doi_type)?;
        info!(doi = %doi, doi_type = ?doi_type, "DOI generated");
        Ok(doi)
    }

    /// Fetch the local record for a DOI
    pub fn get(&self, prefix: &str, suffix: &str) -> Result<Option<DoiRecord>> {
        let doi = Doi::new(prefix, suffix)?;
        self.store.get(&doi)
    }

    /// Register a DOI with the registration authority.
    ///
    /// Validates metadata before anything touches the network, reserves
    /// locally, then registers remotely. A provider failure surfaces to
    /// the caller with the record still RESERVED; retrying the same call
    /// is safe.
    pub async fn register(&self, registration: DoiRegistration) -> Result<Doi> {
        validate_metadata(&registration.metadata)?;

        let (doi, current) = match registration.doi.clone() {
            Some(doi) => {
                let status = self.ensure_registrable(&doi, &registration)?;
                (doi, status)
            }
            None => (self.generate(registration.doi_type)?, None),
        };

        let target = self.target_url(&doi, registration.doi_type, &registration.key);

        // An already-registered DOI refreshing its metadata stays
        // REGISTERED; transitions never move backward
        if current != Some(DoiStatus::Registered) {
            self.store.update(
                &doi,
                DoiStatus::Reserved,
                None,
                Some(&registration.metadata),
            )?;
        }

        self.client
            .register(&doi, &target, &registration.metadata)
            .await?;

        self.store.update(
            &doi,
            DoiStatus::Registered,
            Some(&target),
            Some(&registration.metadata),
        )?;

        info!(doi = %doi, target = %target, user = %registration.user, "DOI registered");
        Ok(doi)
    }

    /// Update metadata/target of an existing RESERVED or REGISTERED DOI
    pub async fn update(&self, registration: DoiRegistration) -> Result<Doi> {
        validate_metadata(&registration.metadata)?;

        let doi = registration.doi.clone().ok_or_else(|| {
            MinterError::NotFound("update requires an existing DOI".to_string())
        })?;

        let record = self
            .store
            .get(&doi)?
            .ok_or_else(|| MinterError::NotFound(format!("no record for DOI {doi}")))?;

        if !matches!(record.status, DoiStatus::Reserved | DoiStatus::Registered) {
            return Err(MinterError::Exists(format!(
                "DOI {doi} in status {} cannot be updated",
                record.status.as_str()
            )));
        }

        let target = self.target_url(&doi, registration.doi_type, &registration.key);
        self.client
            .update(&doi, Some(&target), Some(&registration.metadata))
            .await?;

        // A reserved DOI stays reserved; only registered ones carry a target
        let (status, persisted_target) = match record.status {
            DoiStatus::Registered => (DoiStatus::Registered, Some(target.as_str())),
            _ => (DoiStatus::Reserved, None),
        };
        self.store
            .update(&doi, status, persisted_target, Some(&registration.metadata))?;

        info!(doi = %doi, user = %registration.user, "DOI updated");
        Ok(doi)
    }

    /// Retire a DOI: best-effort remote deactivation, unconditional local
    /// tombstone. Idempotent on an already-deleted DOI.
    pub async fn delete(&self, prefix: &str, suffix: &str) -> Result<()> {
        let doi = Doi::new(prefix, suffix)?;
        let record = self
            .store
            .get(&doi)?
            .ok_or_else(|| MinterError::NotFound(format!("no record for DOI {doi}")))?;

        if record.status == DoiStatus::Deleted {
            return Ok(());
        }

        if let Err(e) = self.client.delete(&doi).await {
            warn!(doi = %doi, "remote deactivation failed, tombstoning locally anyway: {e}");
        }

        self.store.delete(&doi)?;
        info!(doi = %doi, "DOI deleted");
        Ok(())
    }

    /// Reject registration against a DOI whose record conflicts; returns
    /// the current status of an already-known DOI
    fn ensure_registrable(
        &self,
        doi: &Doi,
        registration: &DoiRegistration,
    ) -> Result<Option<DoiStatus>> {
        match self.store.get(doi)? {
            None => {
                // A caller-supplied DOI we have never seen must still
                // belong to this environment's prefix
                if doi.prefix() != self.generator.prefix() {
                    return Err(MinterError::InvalidDoi(format!(
                        "DOI {doi} does not match the configured prefix {}",
                        self.generator.prefix()
                    )));
                }
                self.store.create(doi, registration.doi_type)?;
                Ok(None)
            }
            Some(record) => {
                let target = self.target_url(doi, registration.doi_type, &registration.key);
                match record.status {
                    DoiStatus::Deleted => Err(MinterError::Exists(format!(
                        "DOI {doi} is deleted and cannot be re-registered"
                    ))),
                    DoiStatus::Registered if record.target.as_deref() != Some(target.as_str()) => {
                        Err(MinterError::Exists(format!(
                            "DOI {doi} is already registered with a different target"
                        )))
                    }
                    status => Ok(Some(status)),
                }
            }
        }
    }

    /// Landing page for a DOI, derived from its owning entity
    fn target_url(&self, doi: &Doi, doi_type: DoiType, entity_key: &str) -> String {
        let base = self.portal_base_url.trim_end_matches('/');
        match doi_type {
            DoiType::Dataset => format!("{base}/dataset/{entity_key}"),
            DoiType::Download => format!("{base}/occurrence/download/{entity_key}"),
            // Data packages have no owning entity key; the DOI itself routes
            DoiType::DataPackage => format!("{base}/data-package/{doi}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacite::DoiData;
    use crate::doi::TEST_PREFIX;
    use crate::store::SqliteDoiStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    const VALID_XML: &str = r#"<resource xmlns="http://datacite.org/schema/kernel-4">
  <identifier identifierType="DOI">10.5072/example</identifier>
  <creators><creator><creatorName>Test</creatorName></creator></creators>
  <titles><title>Test Dataset</title></titles>
  <publisher>GBIF</publisher>
  <publicationYear>2024</publicationYear>
</resource>"#;

    /// Registration client stub: counts calls, optionally fails
    #[derive(Default)]
    struct MockClient {
        register_calls: AtomicU32,
        update_calls: AtomicU32,
        delete_calls: AtomicU32,
        fail_register: bool,
        fail_delete: bool,
    }

    #[async_trait]
    impl RegistrationClient for MockClient {
        async fn reserve(&self, _doi: &Doi, _metadata_xml: &str) -> Result<()> {
            Ok(())
        }

        async fn register(&self, _doi: &Doi, _target: &str, _metadata_xml: &str) -> Result<()> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_register {
                return Err(MinterError::registration("provider error 503", true));
            }
            Ok(())
        }

        async fn update(
            &self,
            _doi: &Doi,
            _target: Option<&str>,
            _metadata_xml: Option<&str>,
        ) -> Result<()> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, _doi: &Doi) -> Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete {
                return Err(MinterError::registration("provider unreachable", true));
            }
            Ok(())
        }

        async fn resolve(&self, _doi: &Doi) -> Result<Option<DoiData>> {
            Ok(None)
        }
    }

    fn service_with(client: MockClient) -> (DoiService, Arc<SqliteDoiStore>, Arc<MockClient>) {
        let store = Arc::new(SqliteDoiStore::open_in_memory().unwrap());
        let client = Arc::new(client);
        let generator = DoiGenerator::new(TEST_PREFIX, store.clone());
        let service = DoiService::new(
            store.clone(),
            client.clone(),
            generator,
            "https://www.gbif-dev.org",
        );
        (service, store, client)
    }

    fn registration(doi_type: DoiType, key: &str) -> DoiRegistration {
        DoiRegistration {
            doi: None,
            key: key.to_string(),
            metadata: VALID_XML.to_string(),
            doi_type,
            user: "crawler".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_happy_path() {
        let (service, store, client) = service_with(MockClient::default());

        let doi = service
            .register(registration(
                DoiType::Dataset,
                "9ce4b5ab-0001-4ea7-a113-57f5e4b5c2ee",
            ))
            .await
            .unwrap();

        assert_eq!(doi.prefix(), TEST_PREFIX);
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 1);

        let record = store.get(&doi).unwrap().unwrap();
        assert_eq!(record.status, DoiStatus::Registered);
        assert_eq!(
            record.target.as_deref(),
            Some("https://www.gbif-dev.org/dataset/9ce4b5ab-0001-4ea7-a113-57f5e4b5c2ee")
        );
        assert!(record.metadata_xml.is_some());
    }

    #[tokio::test]
    async fn test_invalid_metadata_rejected_before_network() {
        let (service, store, client) = service_with(MockClient::default());

        let mut reg = registration(DoiType::Dataset, "key");
        reg.metadata = "<not-xml".to_string();

        let err = service.register(reg).await.unwrap_err();
        assert!(matches!(err, MinterError::InvalidMetadata(_)));
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 0);

        // no record was created either
        let all = store
            .list(&Default::default(), &Default::default())
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_reserved() {
        let (service, store, _client) = service_with(MockClient {
            fail_register: true,
            ..Default::default()
        });

        let err = service
            .register(registration(DoiType::Download, "0001234-240101"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let reserved = store
            .list(
                &crate::store::ListFilter {
                    status: Some(DoiStatus::Reserved),
                    ..Default::default()
                },
                &Default::default(),
            )
            .unwrap();
        assert_eq!(reserved.len(), 1);
        assert!(reserved[0].target.is_none());
    }

    #[tokio::test]
    async fn test_register_retry_after_provider_failure_is_safe() {
        let (service, store, _) = service_with(MockClient {
            fail_register: true,
            ..Default::default()
        });

        let err = service
            .register(registration(DoiType::Dataset, "abc"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let reserved = store
            .list(&Default::default(), &Default::default())
            .unwrap();
        let doi = reserved[0].doi.clone();

        // retry the same registration against a healthy provider
        let retry_service = DoiService::new(
            store.clone(),
            Arc::new(MockClient::default()),
            DoiGenerator::new(TEST_PREFIX, store.clone()),
            "https://www.gbif-dev.org",
        );
        let mut reg = registration(DoiType::Dataset, "abc");
        reg.doi = Some(doi.clone());
        let registered = retry_service.register(reg).await.unwrap();
        assert_eq!(registered, doi);
        assert_eq!(
            store.get(&doi).unwrap().unwrap().status,
            DoiStatus::Registered
        );
    }

    #[tokio::test]
    async fn test_register_conflict_on_different_target() {
        let (service, _, _) = service_with(MockClient::default());

        let doi = service
            .register(registration(DoiType::Dataset, "first-key"))
            .await
            .unwrap();

        let mut reg = registration(DoiType::Dataset, "other-key");
        reg.doi = Some(doi);
        let err = service.register(reg).await.unwrap_err();
        assert!(matches!(err, MinterError::Exists(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_foreign_prefix() {
        let (service, store, client) = service_with(MockClient::default());

        let mut reg = registration(DoiType::Dataset, "key");
        reg.doi = Some(Doi::new("10.21373", "sneaky").unwrap());

        let err = service.register(reg).await.unwrap_err();
        assert!(matches!(err, MinterError::InvalidDoi(_)));
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 0);

        // nothing was adopted into the store
        let all = store
            .list(&Default::default(), &Default::default())
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_refreshes_without_leaving_registered() {
        let (service, store, client) = service_with(MockClient::default());

        let doi = service
            .register(registration(DoiType::Dataset, "key-1"))
            .await
            .unwrap();
        let first = store.get(&doi).unwrap().unwrap();

        // same key again: a metadata refresh, not a new registration
        let mut reg = registration(DoiType::Dataset, "key-1");
        reg.doi = Some(doi.clone());
        assert_ok!(service.register(reg).await);

        assert_eq!(client.register_calls.load(Ordering::SeqCst), 2);
        let second = store.get(&doi).unwrap().unwrap();
        assert_eq!(second.status, DoiStatus::Registered);
        assert_eq!(second.target, first.target);
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let (service, _, _) = service_with(MockClient::default());

        let mut reg = registration(DoiType::Dataset, "key");
        reg.doi = Some(Doi::new(TEST_PREFIX, "missing").unwrap());
        let err = service.update(reg).await.unwrap_err();
        assert!(matches!(err, MinterError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_registered_doi() {
        let (service, store, client) = service_with(MockClient::default());

        let doi = service
            .register(registration(DoiType::Dataset, "key-1"))
            .await
            .unwrap();

        let mut reg = registration(DoiType::Dataset, "key-1");
        reg.doi = Some(doi.clone());
        service.update(reg).await.unwrap();

        assert_eq!(client.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(&doi).unwrap().unwrap().status,
            DoiStatus::Registered
        );
    }

    #[tokio::test]
    async fn test_delete_tombstones_even_when_provider_fails() {
        let (service, store, client) = service_with(MockClient {
            fail_delete: true,
            ..Default::default()
        });

        let doi = service
            .register(registration(DoiType::Dataset, "key"))
            .await
            .unwrap();

        assert_ok!(service.delete(doi.prefix(), doi.suffix()).await);
        assert_eq!(client.delete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(&doi).unwrap().unwrap().status,
            DoiStatus::Deleted
        );

        // idempotent: second delete does not call the provider again
        assert_ok!(service.delete(doi.prefix(), doi.suffix()).await);
        assert_eq!(client.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_twenty_generations_are_distinct_new_records() {
        let (service, store, _) = service_with(MockClient::default());

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let doi = service.generate(DoiType::Dataset).unwrap();
            assert_eq!(doi.prefix(), TEST_PREFIX);
            assert!(seen.insert(doi.clone()), "duplicate DOI {doi}");

            let record = store.get(&doi).unwrap().unwrap();
            assert_eq!(record.status, DoiStatus::New);
        }
        assert_eq!(seen.len(), 20);
    }
}
