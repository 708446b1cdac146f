//! DOI value types.
//!
//! A DOI is a `prefix/suffix` pair. The prefix identifies the registrant
//! (always starting with the `10.` directory indicator), the suffix is
//! assigned by the generator or supplied by the caller. DOIs are
//! case-insensitive per the standard, so suffixes are normalized to
//! lowercase on construction and equality covers both halves.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::types::MinterError;

/// DataCite test prefix, used whenever the engine is not in production mode
pub const TEST_PREFIX: &str = "10.5072";

/// A Digital Object Identifier. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Doi {
    prefix: String,
    suffix: String,
}

impl Doi {
    /// Create a DOI from its two halves, validating basic syntax
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Result<Self, MinterError> {
        let prefix = prefix.into();
        let suffix = suffix.into().to_lowercase();

        if !prefix.starts_with("10.") || prefix.len() <= 3 {
            return Err(MinterError::InvalidDoi(format!(
                "prefix `{prefix}` must start with the `10.` directory indicator"
            )));
        }
        if suffix.is_empty() {
            return Err(MinterError::InvalidDoi("empty suffix".to_string()));
        }
        if suffix.contains('/') || suffix.contains(char::is_whitespace) {
            return Err(MinterError::InvalidDoi(format!(
                "suffix `{suffix}` contains illegal characters"
            )));
        }

        Ok(Self { prefix, suffix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.suffix)
    }
}

impl FromStr for Doi {
    type Err = MinterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, suffix) = s
            .split_once('/')
            .ok_or_else(|| MinterError::InvalidDoi(format!("`{s}` is missing the `/` separator")))?;
        Doi::new(prefix, suffix)
    }
}

impl Serialize for Doi {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Doi {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The kind of entity a DOI identifies. Determines the suffix convention
/// and which owning-entity key is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoiType {
    Dataset,
    Download,
    DataPackage,
}

impl DoiType {
    /// Marker prepended to generated suffixes. Dataset suffixes are bare.
    pub fn suffix_marker(&self) -> &'static str {
        match self {
            DoiType::Dataset => "",
            DoiType::Download => "dl.",
            DoiType::DataPackage => "dp.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DoiType::Dataset => "DATASET",
            DoiType::Download => "DOWNLOAD",
            DoiType::DataPackage => "DATA_PACKAGE",
        }
    }
}

impl FromStr for DoiType {
    type Err = MinterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DATASET" => Ok(DoiType::Dataset),
            "DOWNLOAD" => Ok(DoiType::Download),
            "DATA_PACKAGE" => Ok(DoiType::DataPackage),
            other => Err(MinterError::Internal(format!("unknown DOI type `{other}`"))),
        }
    }
}

/// Lifecycle state of a DOI as understood by the local registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoiStatus {
    New,
    Reserved,
    Registered,
    Deleted,
}

impl DoiStatus {
    /// DELETED is terminal: no transition leaves it
    pub fn is_terminal(&self) -> bool {
        matches!(self, DoiStatus::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DoiStatus::New => "NEW",
            DoiStatus::Reserved => "RESERVED",
            DoiStatus::Registered => "REGISTERED",
            DoiStatus::Deleted => "DELETED",
        }
    }
}

impl FromStr for DoiStatus {
    type Err = MinterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(DoiStatus::New),
            "RESERVED" => Ok(DoiStatus::Reserved),
            "REGISTERED" => Ok(DoiStatus::Registered),
            "DELETED" => Ok(DoiStatus::Deleted),
            other => Err(MinterError::Internal(format!(
                "unknown DOI status `{other}`"
            ))),
        }
    }
}
