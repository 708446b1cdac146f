//! DataCite integration - the external DOI registration authority.
//!
//! The authority is an unreliable remote dependency: every call can time
//! out or partially succeed. This module exposes the client contract the
//! orchestrator talks to, metadata validation that runs before any
//! network call, and the REST implementation.

pub mod metadata;
pub mod rest;

pub use metadata::validate_metadata;
pub use rest::{DataCiteConfig, DataCiteRestClient};

use async_trait::async_trait;

use crate::doi::{Doi, DoiStatus};
use crate::types::Result;

/// Authoritative state of a DOI as reported by the registration authority
#[derive(Debug, Clone, PartialEq)]
pub struct DoiData {
    pub status: DoiStatus,
    pub target: Option<String>,
}

/// Contract with the DataCite-like registration service.
///
/// Failures surface as typed errors: `Exists` (conflict), `NotFound`, and
/// `Registration { retryable }` for network/provider failures.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Reserve a DOI (draft state) with its metadata, no landing page yet
    async fn reserve(&self, doi: &Doi, metadata_xml: &str) -> Result<()>;

    /// Register (or re-register) a DOI with a landing page, making it resolvable
    async fn register(&self, doi: &Doi, target: &str, metadata_xml: &str) -> Result<()>;

    /// Update metadata and/or landing page of an existing DOI
    async fn update(&self, doi: &Doi, target: Option<&str>, metadata_xml: Option<&str>)
        -> Result<()>;

    /// Deactivate a DOI. DataCite only hard-deletes drafts; registered
    /// DOIs are hidden instead.
    async fn delete(&self, doi: &Doi) -> Result<()>;

    /// Look up the authority's view of a DOI. `Ok(None)` when unknown.
    async fn resolve(&self, doi: &Doi) -> Result<Option<DoiData>>;
}
