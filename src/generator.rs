//! DOI identifier generator.
//!
//! Builds candidate suffixes from a random token plus the type-specific
//! marker, checks the persistence store for collisions, and retries a
//! bounded number of times. The suffix space is large but legacy
//! human-chosen DOIs may already occupy part of it, so collisions are
//! possible and exhaustion is a real (configuration-smelling) failure.

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error};

use crate::doi::{Doi, DoiType};
use crate::store::DoiStore;
use crate::types::{MinterError, Result};

const MAX_ATTEMPTS: u32 = 25;
const TOKEN_LEN: usize = 6;
const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Produces collision-free DOIs under a single environment prefix.
///
/// The prefix is fixed at construction; test and production prefixes can
/// never mix within one generator instance.
pub struct DoiGenerator {
    prefix: String,
    store: Arc<dyn DoiStore>,
}

impl DoiGenerator {
    pub fn new(prefix: impl Into<String>, store: Arc<dyn DoiStore>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a DOI for which no record exists yet. Does not persist.
    pub fn generate(&self, doi_type: DoiType) -> Result<Doi> {
        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = self.random_doi(doi_type)?;
            if self.store.get(&candidate)?.is_none() {
                debug!(doi = %candidate, attempt, "generated DOI");
                return Ok(candidate);
            }
            debug!(doi = %candidate, attempt, "suffix collision, regenerating");
        }

        error!(
            prefix = %self.prefix,
            attempts = MAX_ATTEMPTS,
            "DOI suffix space exhausted - check prefix configuration"
        );
        Err(MinterError::GenerationExhausted(MAX_ATTEMPTS))
    }

    fn random_doi(&self, doi_type: DoiType) -> Result<Doi> {
        let mut rng = rand::thread_rng();
        let token: String = (0..TOKEN_LEN)
            .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
            .collect();

        Doi::new(
            self.prefix.clone(),
            format!("{}{}", doi_type.suffix_marker(), token),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doi::{DoiStatus, TEST_PREFIX};
    use crate::store::{DoiRecord, ListFilter, Page, SqliteDoiStore};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store stub whose first `collisions` existence checks report a hit
    struct CollidingStore {
        collisions: u32,
        calls: AtomicU32,
    }

    impl CollidingStore {
        fn new(collisions: u32) -> Self {
            Self {
                collisions,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl DoiStore for CollidingStore {
        fn get(&self, doi: &Doi) -> Result<Option<DoiRecord>> {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst);
            if seen < self.collisions {
                Ok(Some(DoiRecord {
                    doi: doi.clone(),
                    doi_type: DoiType::Dataset,
                    status: DoiStatus::New,
                    target: None,
                    metadata_xml: None,
                    created: Utc::now(),
                    modified: Utc::now(),
                }))
            } else {
                Ok(None)
            }
        }

        fn create(&self, _doi: &Doi, _doi_type: DoiType) -> Result<()> {
            Ok(())
        }

        fn update(
            &self,
            _doi: &Doi,
            _status: DoiStatus,
            _target: Option<&str>,
            _metadata_xml: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }

        fn delete(&self, _doi: &Doi) -> Result<()> {
            Ok(())
        }

        fn list(&self, _filter: &ListFilter, _page: &Page) -> Result<Vec<DoiRecord>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_suffix_conventions() {
        let store = Arc::new(SqliteDoiStore::open_in_memory().unwrap());
        let generator = DoiGenerator::new(TEST_PREFIX, store);

        let download = generator.generate(DoiType::Download).unwrap();
        assert!(download.suffix().starts_with("dl."));

        let package = generator.generate(DoiType::DataPackage).unwrap();
        assert!(package.suffix().starts_with("dp."));

        let dataset = generator.generate(DoiType::Dataset).unwrap();
        assert!(!dataset.suffix().starts_with("dl."));
        assert!(!dataset.suffix().starts_with("dp."));
    }

    #[test]
    fn test_generated_prefix_matches_environment() {
        let store = Arc::new(SqliteDoiStore::open_in_memory().unwrap());
        let generator = DoiGenerator::new(TEST_PREFIX, store);

        let doi = generator.generate(DoiType::Dataset).unwrap();
        assert_eq!(doi.prefix(), TEST_PREFIX);
    }

    #[test]
    fn test_retries_past_collisions() {
        let store = Arc::new(CollidingStore::new(10));
        let generator = DoiGenerator::new(TEST_PREFIX, store);

        assert!(generator.generate(DoiType::Dataset).is_ok());
    }

    #[test]
    fn test_exhaustion_after_bounded_attempts() {
        let store = Arc::new(CollidingStore::new(u32::MAX));
        let generator = DoiGenerator::new(TEST_PREFIX, store);

        let err = generator.generate(DoiType::Dataset).unwrap_err();
        assert!(matches!(
            err,
            MinterError::GenerationExhausted(MAX_ATTEMPTS)
        ));
    }
}
