// src/core/metadata/catalog.rs

//! Loading the catalog from reachable members and writing to it under the
//! cluster lock.

use super::model::{
    CatalogChange, CatalogSnapshot, ClusterDescriptor, MemberDescriptor, MemberRef,
    RouterDescriptor,
};
use super::schema::SchemaVersion;
use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, MemberState};
use crate::core::recovery::{RecoveryContext, close_session};
use crate::core::recovery::lock::Lease;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, ClusterAdminError>;

/// What one seed answered when asked for its catalog copy.
enum SeedRead {
    Catalog(Address, CatalogSnapshot),
    NoSchema { live_group: bool },
    Failed,
}

/// A view of one cluster inside a catalog snapshot read from some member.
#[derive(Debug, Clone)]
pub struct MembershipCatalog {
    snapshot: CatalogSnapshot,
    cluster_id: Uuid,
    // Catalog changes never add or remove clusters, so this stays valid.
    cluster_index: usize,
    source: Address,
}

impl MembershipCatalog {
    /// Reads the catalog from every seed and keeps the freshest copy of the
    /// named cluster, i.e. the one with the highest view generation.
    pub async fn load(ctx: &RecoveryContext, cluster_name: &str, seeds: &[Address]) -> Result<Self> {
        if seeds.is_empty() {
            return Err(ClusterAdminError::InvalidOptions(
                "at least one seed address is required to read the catalog".to_string(),
            ));
        }

        let reads = join_all(seeds.iter().map(|seed| read_seed(ctx, seed))).await;

        let mut reachable = 0usize;
        let mut live_group = false;
        let mut any_catalog = false;
        let mut best: Option<(Address, CatalogSnapshot, u64)> = None;

        for read in reads {
            match read? {
                SeedRead::Failed => {}
                SeedRead::NoSchema { live_group: live } => {
                    reachable += 1;
                    live_group |= live;
                }
                SeedRead::Catalog(source, snapshot) => {
                    reachable += 1;
                    any_catalog = true;
                    let Some(generation) = snapshot
                        .cluster_by_name(cluster_name)
                        .map(|c| c.view_generation)
                    else {
                        continue;
                    };
                    let fresher = best
                        .as_ref()
                        .is_none_or(|(_, _, best_gen)| generation > *best_gen);
                    if fresher {
                        best = Some((source, snapshot, generation));
                    }
                }
            }
        }

        match best {
            Some((source, snapshot, generation)) => {
                debug!(
                    "Using catalog of cluster '{}' from {} (view generation {})",
                    cluster_name, source, generation
                );
                Self::from_snapshot(snapshot, cluster_name, source)
            }
            None if any_catalog => Err(ClusterAdminError::ClusterNotFound(cluster_name.to_string())),
            None if live_group => Err(ClusterAdminError::NotManaged(format!(
                "a replication group is running but no membership catalog describes cluster '{cluster_name}'"
            ))),
            None if reachable > 0 => Err(ClusterAdminError::NotManaged(format!(
                "no membership catalog found on the reachable seeds for cluster '{cluster_name}'"
            ))),
            None => Err(ClusterAdminError::Unavailable(format!(
                "none of the seeds {} could be reached",
                join_addresses(seeds)
            ))),
        }
    }

    /// Wraps an already-read snapshot, enforcing schema gating.
    pub fn from_snapshot(snapshot: CatalogSnapshot, cluster_name: &str, source: Address) -> Result<Self> {
        snapshot.schema_version.check_compatible()?;
        let cluster_index = snapshot
            .clusters
            .iter()
            .position(|c| c.name == cluster_name)
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(cluster_name.to_string()))?;
        Ok(Self {
            cluster_id: snapshot.clusters[cluster_index].cluster_id,
            cluster_index,
            snapshot,
            source,
        })
    }

    /// Re-reads the catalog, using the current members as seeds.
    pub async fn reload(&self, ctx: &RecoveryContext) -> Result<Self> {
        let mut seeds: Vec<Address> = self.members().iter().map(|m| m.address.clone()).collect();
        if !seeds.contains(&self.source) {
            seeds.push(self.source.clone());
        }
        Self::load(ctx, &self.cluster().name, &seeds).await
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.snapshot.schema_version
    }

    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    /// The member this copy was read from.
    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn cluster_id(&self) -> Uuid {
        self.cluster_id
    }

    pub fn cluster(&self) -> &ClusterDescriptor {
        &self.snapshot.clusters[self.cluster_index]
    }

    pub fn members(&self) -> &[MemberDescriptor] {
        &self.cluster().members
    }

    pub fn list_members(&self, cluster_id: &Uuid) -> Result<&[MemberDescriptor]> {
        self.snapshot
            .cluster_by_id(cluster_id)
            .map(|c| c.members.as_slice())
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(cluster_id.to_string()))
    }

    pub fn list_routers(&self, cluster_id: &Uuid) -> Vec<&RouterDescriptor> {
        self.snapshot.routers_of(cluster_id).collect()
    }

    pub fn get_primary(&self, cluster_id: &Uuid) -> Result<Option<&MemberDescriptor>> {
        self.snapshot
            .cluster_by_id(cluster_id)
            .map(|c| c.primary())
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(cluster_id.to_string()))
    }

    pub fn find_member(&self, reference: &MemberRef) -> Option<&MemberDescriptor> {
        self.cluster().find_member(reference)
    }

    /// Like [`find_member`](Self::find_member) but fails with `NotAClusterMember`.
    pub fn require_member(&self, reference: &MemberRef) -> Result<&MemberDescriptor> {
        self.find_member(reference).ok_or_else(|| {
            ClusterAdminError::NotAClusterMember(reference.to_string(), self.cluster().name.clone())
        })
    }

    /// Writes `change` through the lease holder's session on the primary and
    /// mirrors it into this copy.
    pub async fn apply(&mut self, ctx: &RecoveryContext, lease: &mut Lease, change: CatalogChange) -> Result<()> {
        if change.cluster_id() != self.cluster_id || lease.cluster_id() != self.cluster_id {
            return Err(ClusterAdminError::InvalidState(format!(
                "catalog change for cluster {} attempted under a lease for cluster {}",
                change.cluster_id(),
                lease.cluster_id()
            )));
        }
        // Validate locally first so a bad change never reaches the primary.
        let mut next = self.snapshot.clone();
        next.apply(&change)?;

        let session = lease.session()?;
        ctx.guard("writing the membership catalog", session.apply_catalog_change(&change))
            .await?;
        self.snapshot = next;
        debug!("Applied catalog change {:?}", change);
        Ok(())
    }

    pub async fn add_member(&mut self, ctx: &RecoveryContext, lease: &mut Lease, member: MemberDescriptor) -> Result<()> {
        let address = member.address.clone();
        let change = CatalogChange::AddMember {
            cluster_id: self.cluster_id,
            member,
        };
        self.apply(ctx, lease, change).await?;
        info!("Added {} to the catalog of cluster '{}'", address, self.cluster().name);
        Ok(())
    }

    /// Removes a member by UUID or address and returns its descriptor.
    pub async fn remove_member(
        &mut self,
        ctx: &RecoveryContext,
        lease: &mut Lease,
        reference: &MemberRef,
    ) -> Result<MemberDescriptor> {
        let member = self.require_member(reference)?.clone();
        let change = CatalogChange::RemoveMember {
            cluster_id: self.cluster_id,
            server_uuid: member.server_uuid,
        };
        self.apply(ctx, lease, change).await?;
        info!(
            "Removed {} from the catalog of cluster '{}'",
            member.address,
            self.cluster().name
        );
        Ok(member)
    }

    pub async fn record_state(
        &mut self,
        ctx: &RecoveryContext,
        lease: &mut Lease,
        server_uuid: Uuid,
        state: MemberState,
    ) -> Result<()> {
        let change = CatalogChange::UpdateMemberState {
            cluster_id: self.cluster_id,
            server_uuid,
            state,
        };
        self.apply(ctx, lease, change).await
    }

    /// Records a new primary and starts a new view generation.
    pub async fn record_new_view(&mut self, ctx: &RecoveryContext, lease: &mut Lease, primary: Uuid) -> Result<()> {
        let cluster_id = self.cluster_id;
        self.apply(
            ctx,
            lease,
            CatalogChange::SetPrimary {
                cluster_id,
                server_uuid: primary,
            },
        )
        .await?;
        self.bump_generation(ctx, lease).await
    }

    pub async fn bump_generation(&mut self, ctx: &RecoveryContext, lease: &mut Lease) -> Result<()> {
        let cluster_id = self.cluster_id;
        self.apply(ctx, lease, CatalogChange::BumpViewGeneration { cluster_id })
            .await
    }

    pub async fn add_router(&mut self, ctx: &RecoveryContext, lease: &mut Lease, router: RouterDescriptor) -> Result<()> {
        self.apply(ctx, lease, CatalogChange::AddRouter { router }).await
    }

    pub async fn remove_router(&mut self, ctx: &RecoveryContext, lease: &mut Lease, name: &str) -> Result<()> {
        let change = CatalogChange::RemoveRouter {
            cluster_id: self.cluster_id,
            name: name.to_string(),
        };
        self.apply(ctx, lease, change).await
    }
}

async fn read_seed(ctx: &RecoveryContext, seed: &Address) -> Result<SeedRead> {
    let mut session = match ctx.connect(seed).await {
        Ok(session) => session,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            debug!("Seed {} is not reachable: {}", seed, e);
            return Ok(SeedRead::Failed);
        }
    };

    let read = match ctx.guard("reading the membership catalog", session.read_catalog()).await {
        Ok(Some(snapshot)) => SeedRead::Catalog(seed.clone(), snapshot),
        Ok(None) => {
            let live_group = match ctx.guard("reading the group report", session.report()).await {
                Ok(report) => report.is_active(),
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => false,
            };
            SeedRead::NoSchema { live_group }
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!("Could not read the catalog from {}: {}", seed, e);
            SeedRead::Failed
        }
    };
    close_session(session).await;
    Ok(read)
}

pub(crate) fn join_addresses<'a>(addresses: impl IntoIterator<Item = &'a Address>) -> String {
    addresses
        .into_iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
