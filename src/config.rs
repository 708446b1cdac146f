//! Configuration for minter
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

use crate::doi::TEST_PREFIX;

/// Minter - DOI lifecycle engine
#[derive(Parser, Debug, Clone)]
#[command(name = "minter")]
#[command(about = "DOI lifecycle engine - mints, registers and reconciles DOIs")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Production mode: mint under the real registrant prefix and require
    /// DataCite credentials. Off by default - the test prefix is used.
    #[arg(long, env = "PRODUCTION_MODE", default_value = "false")]
    pub production_mode: bool,

    /// Registrant prefix used in production mode
    #[arg(long, env = "DOI_PREFIX", default_value = "10.21373")]
    pub doi_prefix: String,

    /// Portal base URL that DOI targets point at
    #[arg(long, env = "PORTAL_BASE_URL", default_value = "https://www.gbif.org")]
    pub portal_base_url: String,

    /// Path of the local DOI database
    #[arg(long, env = "DB_PATH", default_value = "minter.db")]
    pub db_path: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// DataCite configuration
    #[command(flatten)]
    pub datacite: DataCiteArgs,

    /// Redelivery budget before a change message is dead-lettered
    #[arg(long, env = "MAX_DELIVER", default_value = "5")]
    pub max_deliver: i64,

    /// Delay in seconds before a failed change message is redelivered
    #[arg(long, env = "RETRY_DELAY_SECS", default_value = "10")]
    pub retry_delay_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

/// DataCite REST API configuration
#[derive(Parser, Debug, Clone)]
pub struct DataCiteArgs {
    /// DataCite API base URL
    #[arg(
        long,
        env = "DATACITE_API_URL",
        default_value = "https://api.test.datacite.org"
    )]
    pub datacite_api_url: String,

    /// DataCite repository account (required in production mode)
    #[arg(long, env = "DATACITE_USER")]
    pub datacite_user: Option<String>,

    /// DataCite repository password (required in production mode)
    #[arg(long, env = "DATACITE_PASSWORD")]
    pub datacite_password: Option<String>,

    /// Timeout for DataCite calls in milliseconds
    #[arg(long, env = "DATACITE_TIMEOUT_MS", default_value = "20000")]
    pub datacite_timeout_ms: u64,

    /// Maximum pooled connections to DataCite
    #[arg(long, env = "DATACITE_MAX_CONNECTIONS", default_value = "10")]
    pub datacite_max_connections: usize,
}

impl Args {
    /// Prefix DOIs are minted under: the configured registrant prefix in
    /// production, the DataCite test prefix everywhere else. Callers can
    /// never silently mix the two within one environment.
    pub fn effective_prefix(&self) -> &str {
        if self.production_mode {
            &self.doi_prefix
        } else {
            TEST_PREFIX
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn datacite_timeout(&self) -> Duration {
        Duration::from_millis(self.datacite.datacite_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.doi_prefix.starts_with("10.") {
            return Err(format!(
                "DOI_PREFIX `{}` must start with `10.`",
                self.doi_prefix
            ));
        }

        if self.production_mode
            && (self.datacite.datacite_user.is_none() || self.datacite.datacite_password.is_none())
        {
            return Err(
                "DATACITE_USER and DATACITE_PASSWORD are required in production mode".to_string(),
            );
        }

        if self.max_deliver < 1 {
            return Err("MAX_DELIVER must be at least 1".to_string());
        }

        Ok(())
    }
}
