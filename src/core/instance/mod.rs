// src/core/instance/mod.rs

//! The interface the recovery core consumes from each database member.
//!
//! A [`Connector`] opens short-lived [`InstanceSession`]s. The core never holds
//! a process-wide session: every operation connects, does its work and closes.
//! The bundled implementation speaks RESP frames to a per-member admin agent
//! (see [`client`]); tests plug in an in-process simulation.

use crate::core::errors::ClusterAdminError;
use crate::core::metadata::{CatalogChange, CatalogSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

pub mod address;
pub mod client;
pub mod report;
pub mod stream;

pub use address::Address;
pub use client::{RespConnector, RespSession};
pub use report::{GroupRole, InstanceReport, MemberState, ViewMember};

pub type Result<T> = std::result::Result<T, ClusterAdminError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    #[default]
    Disabled,
    /// Encrypt, trusting `ssl_ca` when given and the bundled web roots otherwise.
    Required,
    /// Encrypt and verify the agent certificate against `ssl_ca` only.
    VerifyCa,
}

/// Login material for the cluster administration account.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: TlsMode,
    /// PEM bundle used as the trust root instead of the bundled web roots.
    #[serde(default)]
    pub ssl_ca: Option<PathBuf>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            tls: TlsMode::Disabled,
            ssl_ca: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("ssl_ca", &self.ssl_ca)
            .finish()
    }
}

/// Global variables the core is allowed to change on a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum SystemVariable {
    #[strum(serialize = "group_replication_bootstrap_group")]
    BootstrapGroup,
    #[strum(serialize = "group_replication_group_seeds")]
    GroupSeeds,
    #[strum(serialize = "group_replication_force_members")]
    ForceMembers,
    #[strum(serialize = "super_read_only")]
    SuperReadOnly,
}

/// Opens sessions to members.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connection failures surface as `Io`/`Timeout`; rejected credentials as
    /// `NotAuthorized`, which callers must not mistake for unreachability.
    async fn connect(
        &self,
        address: &Address,
        credentials: &Credentials,
    ) -> Result<Box<dyn InstanceSession>>;
}

/// A session to one member. Named locks taken through a session are released
/// by the member when the session ends.
#[async_trait]
pub trait InstanceSession: Send {
    fn address(&self) -> &Address;

    async fn report(&mut self) -> Result<InstanceReport>;

    /// Returns `None` when the catalog schema does not exist on this member.
    async fn read_catalog(&mut self) -> Result<Option<CatalogSnapshot>>;

    /// Only the primary accepts catalog writes.
    async fn apply_catalog_change(&mut self, change: &CatalogChange) -> Result<()>;

    /// Tries to take the named lock for `holder`, waiting at most `wait`.
    /// Returns `false` when another holder keeps it.
    async fn try_lock(&mut self, name: &str, holder: Uuid, wait: Duration) -> Result<bool>;

    async fn release_lock(&mut self, name: &str, holder: Uuid) -> Result<()>;

    async fn set_global(&mut self, variable: SystemVariable, value: &str) -> Result<()>;

    async fn start_group_replication(&mut self) -> Result<()>;

    async fn stop_group_replication(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
