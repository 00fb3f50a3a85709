// src/core/metadata/model.rs

//! The persisted shape of the membership catalog and the changes that can be
//! applied to it.

use super::schema::SchemaVersion;
use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, MemberState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Primary,
    Secondary,
    ReadReplica,
}

impl MemberRole {
    /// Read replicas are not group members and never become primary.
    pub fn is_group_member(self) -> bool {
        !matches!(self, MemberRole::ReadReplica)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TopologyMode {
    #[default]
    SinglePrimary,
    MultiPrimary,
}

/// How group members secure their recovery and group communication channels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberSslMode {
    #[default]
    Disabled,
    Required,
    VerifyCa,
    VerifyIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub server_uuid: Uuid,
    pub address: Address,
    pub role: MemberRole,
    #[serde(default)]
    pub recovery_account: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub last_known_state: Option<MemberState>,
}

impl MemberDescriptor {
    pub fn new(server_uuid: Uuid, address: Address, role: MemberRole) -> Self {
        Self {
            server_uuid,
            address,
            role,
            recovery_account: None,
            label: None,
            last_known_state: None,
        }
    }

    /// Label used in logs and reports; falls back to the address.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub cluster_id: Uuid,
    pub name: String,
    /// Name of the replication group every member must report.
    pub group_name: Uuid,
    #[serde(default)]
    pub topology_mode: TopologyMode,
    #[serde(default)]
    pub tls_mode: MemberSslMode,
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    #[serde(default)]
    pub view_generation: u64,
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
}

impl ClusterDescriptor {
    pub fn member_by_uuid(&self, server_uuid: &Uuid) -> Option<&MemberDescriptor> {
        self.members.iter().find(|m| &m.server_uuid == server_uuid)
    }

    pub fn member_by_address(&self, address: &Address) -> Option<&MemberDescriptor> {
        self.members.iter().find(|m| &m.address == address)
    }

    pub fn find_member(&self, reference: &MemberRef) -> Option<&MemberDescriptor> {
        match reference {
            MemberRef::Uuid(uuid) => self.member_by_uuid(uuid),
            MemberRef::Address(address) => self.member_by_address(address),
        }
    }

    pub fn primary(&self) -> Option<&MemberDescriptor> {
        self.members.iter().find(|m| m.role == MemberRole::Primary)
    }

    /// Members taking part in group replication (read replicas excluded).
    pub fn group_members(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members.iter().filter(|m| m.role.is_group_member())
    }

    /// Smallest number of online group members that forms a quorum.
    pub fn majority(&self) -> usize {
        self.group_members().count() / 2 + 1
    }

    fn member_mut(&mut self, server_uuid: &Uuid) -> Result<&mut MemberDescriptor, ClusterAdminError> {
        let name = self.name.clone();
        self.members
            .iter_mut()
            .find(|m| &m.server_uuid == server_uuid)
            .ok_or_else(|| ClusterAdminError::NotAClusterMember(server_uuid.to_string(), name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDescriptor {
    pub name: String,
    pub address: Address,
    pub cluster_id: Uuid,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_check_in: Option<DateTime<Utc>>,
}

/// The whole catalog as stored on one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub clusters: Vec<ClusterDescriptor>,
    #[serde(default)]
    pub routers: Vec<RouterDescriptor>,
}

/// A single catalog write. Agents apply these verbatim through
/// [`CatalogSnapshot::apply`], so the semantics live in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CatalogChange {
    AddMember {
        cluster_id: Uuid,
        member: MemberDescriptor,
    },
    RemoveMember {
        cluster_id: Uuid,
        server_uuid: Uuid,
    },
    UpdateMemberState {
        cluster_id: Uuid,
        server_uuid: Uuid,
        state: MemberState,
    },
    SetPrimary {
        cluster_id: Uuid,
        server_uuid: Uuid,
    },
    BumpViewGeneration {
        cluster_id: Uuid,
    },
    AddRouter {
        router: RouterDescriptor,
    },
    RemoveRouter {
        cluster_id: Uuid,
        name: String,
    },
}

impl CatalogChange {
    pub fn cluster_id(&self) -> Uuid {
        match self {
            CatalogChange::AddMember { cluster_id, .. }
            | CatalogChange::RemoveMember { cluster_id, .. }
            | CatalogChange::UpdateMemberState { cluster_id, .. }
            | CatalogChange::SetPrimary { cluster_id, .. }
            | CatalogChange::BumpViewGeneration { cluster_id }
            | CatalogChange::RemoveRouter { cluster_id, .. } => *cluster_id,
            CatalogChange::AddRouter { router } => router.cluster_id,
        }
    }
}

impl CatalogSnapshot {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            clusters: Vec::new(),
            routers: Vec::new(),
        }
    }

    pub fn cluster_by_name(&self, name: &str) -> Option<&ClusterDescriptor> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn cluster_by_id(&self, cluster_id: &Uuid) -> Option<&ClusterDescriptor> {
        self.clusters.iter().find(|c| &c.cluster_id == cluster_id)
    }

    pub fn routers_of<'a>(
        &'a self,
        cluster_id: &Uuid,
    ) -> impl Iterator<Item = &'a RouterDescriptor> + use<'a> {
        let cluster_id = *cluster_id;
        self.routers.iter().filter(move |r| r.cluster_id == cluster_id)
    }

    fn cluster_mut(&mut self, cluster_id: &Uuid) -> Result<&mut ClusterDescriptor, ClusterAdminError> {
        self.clusters
            .iter_mut()
            .find(|c| &c.cluster_id == cluster_id)
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(cluster_id.to_string()))
    }

    /// Applies one change. On error the snapshot is left untouched.
    pub fn apply(&mut self, change: &CatalogChange) -> Result<(), ClusterAdminError> {
        match change {
            CatalogChange::AddMember { cluster_id, member } => {
                let cluster = self.cluster_mut(cluster_id)?;
                if let Some(existing) = cluster.member_by_address(&member.address)
                    && existing.server_uuid != member.server_uuid
                {
                    return Err(ClusterAdminError::InvalidState(format!(
                        "address {} is already used by member {}",
                        member.address, existing.server_uuid
                    )));
                }
                if cluster.member_by_uuid(&member.server_uuid).is_some() {
                    return Err(ClusterAdminError::InvalidState(format!(
                        "member {} is already part of cluster '{}'",
                        member.server_uuid, cluster.name
                    )));
                }
                cluster.members.push(member.clone());
            }
            CatalogChange::RemoveMember {
                cluster_id,
                server_uuid,
            } => {
                let cluster = self.cluster_mut(cluster_id)?;
                let before = cluster.members.len();
                cluster.members.retain(|m| &m.server_uuid != server_uuid);
                if cluster.members.len() == before {
                    return Err(ClusterAdminError::NotAClusterMember(
                        server_uuid.to_string(),
                        cluster.name.clone(),
                    ));
                }
            }
            CatalogChange::UpdateMemberState {
                cluster_id,
                server_uuid,
                state,
            } => {
                self.cluster_mut(cluster_id)?
                    .member_mut(server_uuid)?
                    .last_known_state = Some(*state);
            }
            CatalogChange::SetPrimary {
                cluster_id,
                server_uuid,
            } => {
                let cluster = self.cluster_mut(cluster_id)?;
                let target = cluster.member_mut(server_uuid)?;
                if !target.role.is_group_member() {
                    return Err(ClusterAdminError::InvalidState(format!(
                        "read replica {} cannot become primary",
                        target.address
                    )));
                }
                if cluster.topology_mode == TopologyMode::SinglePrimary {
                    for member in cluster.members.iter_mut().filter(|m| m.role.is_group_member()) {
                        member.role = if &member.server_uuid == server_uuid {
                            MemberRole::Primary
                        } else {
                            MemberRole::Secondary
                        };
                    }
                }
            }
            CatalogChange::BumpViewGeneration { cluster_id } => {
                self.cluster_mut(cluster_id)?.view_generation += 1;
            }
            CatalogChange::AddRouter { router } => {
                self.cluster_mut(&router.cluster_id)?;
                self.routers
                    .retain(|r| !(r.cluster_id == router.cluster_id && r.name == router.name));
                self.routers.push(router.clone());
            }
            CatalogChange::RemoveRouter { cluster_id, name } => {
                let before = self.routers.len();
                self.routers
                    .retain(|r| !(&r.cluster_id == cluster_id && &r.name == name));
                if self.routers.len() == before {
                    return Err(ClusterAdminError::InvalidState(format!(
                        "router '{name}' is not registered for cluster {cluster_id}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Operator reference to a member: its server UUID or its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MemberRef {
    Uuid(Uuid),
    Address(Address),
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Uuid(u) => write!(f, "{u}"),
            MemberRef::Address(a) => write!(f, "{a}"),
        }
    }
}

impl FromStr for MemberRef {
    type Err = ClusterAdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(uuid) = Uuid::parse_str(s.trim()) {
            return Ok(MemberRef::Uuid(uuid));
        }
        s.parse::<Address>()
            .map(MemberRef::Address)
            .map_err(|e| ClusterAdminError::InvalidOptions(e.to_string()))
    }
}

impl TryFrom<String> for MemberRef {
    type Error = ClusterAdminError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemberRef> for String {
    fn from(value: MemberRef) -> Self {
        value.to_string()
    }
}

impl From<Address> for MemberRef {
    fn from(address: Address) -> Self {
        MemberRef::Address(address)
    }
}

impl From<Uuid> for MemberRef {
    fn from(uuid: Uuid) -> Self {
        MemberRef::Uuid(uuid)
    }
}
