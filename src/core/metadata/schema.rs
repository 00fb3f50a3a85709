// src/core/metadata/schema.rs

use crate::core::errors::ClusterAdminError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Oldest catalog layout this tool can operate on.
pub const SCHEMA_FLOOR: SchemaVersion = SchemaVersion::new(2, 0, 0);
/// The catalog layout this tool writes.
pub const SCHEMA_CURRENT: SchemaVersion = SchemaVersion::new(2, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Refuses catalogs older than the floor or newer than the runtime layout.
    pub fn check_compatible(&self) -> Result<(), ClusterAdminError> {
        if *self < SCHEMA_FLOOR {
            return Err(ClusterAdminError::SchemaTooOld {
                found: self.to_string(),
                floor: SCHEMA_FLOOR.to_string(),
            });
        }
        if *self > SCHEMA_CURRENT {
            return Err(ClusterAdminError::SchemaTooNew {
                found: self.to_string(),
                current: SCHEMA_CURRENT.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            parts
                .next()
                .unwrap_or("0")
                .parse()
                .map_err(|_| format!("invalid {name} component in schema version '{s}'"))
        };
        let version = SchemaVersion::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(format!("schema version '{s}' has too many components"));
        }
        Ok(version)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.to_string()
    }
}
