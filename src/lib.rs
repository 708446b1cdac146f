//! Minter - DOI lifecycle engine
//!
//! Mints, reserves, registers, updates and retires Digital Object
//! Identifiers for datasets, occurrence downloads and data packages, and
//! reconciles the local view of each DOI with the state held by the
//! external registration authority (DataCite).
//!
//! ## Components
//!
//! - **Generator**: collision-free suffix generation, scoped by type and
//!   environment prefix
//! - **Store**: SQLite source of truth for what the registry believes
//! - **DataCite**: metadata validation and the REST registration client
//! - **Orchestrator**: the synchronous generate/register/update/delete
//!   operations
//! - **Channel**: durable NATS JetStream status-change queue with a
//!   dead-letter path, drained by a singleton update consumer

pub mod channel;
pub mod config;
pub mod datacite;
pub mod doi;
pub mod generator;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use config::Args;
pub use doi::{Doi, DoiStatus, DoiType};
pub use orchestrator::{DoiRegistration, DoiService};
pub use types::{MinterError, Result};
