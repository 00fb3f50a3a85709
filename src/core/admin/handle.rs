// src/core/admin/handle.rs

//! Operations on one known cluster.

use super::options::RemoveOptions;
use super::status::ClusterStatus;
use crate::core::errors::ClusterAdminError;
use crate::core::metadata::{MemberDescriptor, MemberRef, MembershipCatalog};
use crate::core::recovery::apply::{GroupAnchor, StepStatus, leave_group, rejoin_member};
use crate::core::recovery::classify::primary_with_quorum;
use crate::core::recovery::force_quorum::{ForceQuorumReport, force_quorum};
use crate::core::recovery::reconcile::probe_for;
use crate::core::recovery::{
    Classification, ClusterLockManager, Lease, ProbeResult, RecoveryContext, classify,
    probe_members,
};
use crate::core::instance::MemberState;
use std::fmt;
use tracing::{Instrument, debug, info, info_span, warn};

type Result<T> = std::result::Result<T, ClusterAdminError>;

/// A cluster as the caller sees it: its catalog plus the context used to
/// reach its members. Every operation takes the handle explicitly.
pub struct ClusterHandle {
    ctx: RecoveryContext,
    catalog: MembershipCatalog,
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cluster = self.catalog.cluster();
        f.debug_struct("ClusterHandle")
            .field("name", &cluster.name)
            .field("cluster_id", &cluster.cluster_id)
            .field("view_generation", &cluster.view_generation)
            .field("source", &self.catalog.source())
            .finish_non_exhaustive()
    }
}

impl ClusterHandle {
    pub(crate) fn new(ctx: RecoveryContext, catalog: MembershipCatalog) -> Self {
        Self { ctx, catalog }
    }

    pub fn name(&self) -> &str {
        &self.catalog.cluster().name
    }

    pub fn catalog(&self) -> &MembershipCatalog {
        &self.catalog
    }

    /// Re-reads the catalog from the members.
    pub async fn refresh(&mut self) -> Result<()> {
        self.catalog = self.catalog.reload(&self.ctx).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ClusterStatus> {
        let (probes, classification) = self.observe().await?;
        Ok(ClusterStatus::build(&self.catalog, &probes, classification))
    }

    /// Restores quorum through `member`, which must be ONLINE in its own view.
    pub async fn force_quorum_using_partition_of(
        &mut self,
        member: &MemberRef,
    ) -> Result<ForceQuorumReport> {
        let span = info_span!("force_quorum", cluster = %self.name(), member = %member);
        async {
            self.refresh().await?;
            force_quorum(&self.ctx, &mut self.catalog, member).await
        }
        .instrument(span)
        .await
    }

    /// Brings a reachable member that is not in the group back into it.
    pub async fn rejoin_instance(&mut self, member: &MemberRef) -> Result<()> {
        let span = info_span!("rejoin_instance", cluster = %self.name(), member = %member);
        async {
            self.refresh().await?;
            let target = self.catalog.require_member(member)?.clone();
            let (probes, classification) = self.observe().await?;
            let primary = require_group(&self.catalog, &probes, classification)?;

            let probe = probe_for(&probes, &target)
                .filter(|p| p.is_reachable())
                .ok_or_else(|| ClusterAdminError::InstanceUnreachable(target.address.to_string()))?;
            if probe.is_online() {
                return Err(ClusterAdminError::InvalidState(format!(
                    "{} is already an active member of the group",
                    target.address
                )));
            }

            let mut lease = ClusterLockManager::new(&self.ctx)
                .acquire(self.catalog.cluster_id(), &primary.address)
                .await?;
            let result = self.rejoin_locked(&mut lease, &target, &primary).await;
            if let Err(e) = lease.release().await {
                debug!("Lock release reported {}, the session close ends it", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Takes a member out of the group and the catalog.
    pub async fn remove_instance(&mut self, member: &MemberRef, options: RemoveOptions) -> Result<()> {
        let span = info_span!("remove_instance", cluster = %self.name(), member = %member);
        async {
            self.refresh().await?;
            let target = self.catalog.require_member(member)?.clone();
            if self.catalog.members().len() == 1 {
                return Err(ClusterAdminError::InvalidState(format!(
                    "{} is the last member of cluster '{}' and cannot be removed",
                    target.address,
                    self.name()
                )));
            }

            let (probes, classification) = self.observe().await?;
            let primary = require_group(&self.catalog, &probes, classification)?;
            if primary.server_uuid == target.server_uuid {
                return Err(ClusterAdminError::InvalidState(format!(
                    "{} is the current primary; elect another primary before removing it",
                    target.address
                )));
            }

            let reachable = probe_for(&probes, &target).is_some_and(|p| p.is_reachable());
            if !reachable && !options.force {
                return Err(ClusterAdminError::InstanceUnreachable(format!(
                    "{} cannot be reached; use 'force' to remove it from the catalog anyway",
                    target.address
                )));
            }

            let mut lease = ClusterLockManager::new(&self.ctx)
                .acquire(self.catalog.cluster_id(), &primary.address)
                .await?;
            let result = self.remove_locked(&mut lease, &target, reachable, options).await;
            if let Err(e) = lease.release().await {
                debug!("Lock release reported {}, the session close ends it", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn rejoin_locked(
        &mut self,
        lease: &mut Lease,
        target: &MemberDescriptor,
        primary: &GroupAnchor,
    ) -> Result<()> {
        let status = rejoin_member(&self.ctx, &target.address, primary).await?;
        if status == StepStatus::Applied {
            self.catalog
                .record_state(&self.ctx, lease, target.server_uuid, MemberState::Online)
                .await?;
        }
        Ok(())
    }

    async fn remove_locked(
        &mut self,
        lease: &mut Lease,
        target: &MemberDescriptor,
        reachable: bool,
        options: RemoveOptions,
    ) -> Result<()> {
        if reachable && let Err(e) = leave_group(&self.ctx, &target.address).await {
            if !options.force {
                return Err(e);
            }
            warn!(
                "Could not stop group replication on {}: {}; removing it from the catalog anyway",
                target.address, e
            );
        }
        self.catalog
            .remove_member(&self.ctx, lease, &MemberRef::Uuid(target.server_uuid))
            .await?;
        self.catalog.bump_generation(&self.ctx, lease).await?;
        info!("Removed {} from cluster '{}'", target.address, self.name());
        Ok(())
    }

    /// Probes every member and classifies the result.
    async fn observe(&self) -> Result<(Vec<ProbeResult>, Classification)> {
        let cluster = self.catalog.cluster();
        let probes = probe_members(&self.ctx, &cluster.members, cluster.group_name).await?;
        let classification = classify(cluster, &probes);
        Ok((probes, classification))
    }
}

/// The group must be running with quorum; returns its primary.
fn require_group(
    catalog: &MembershipCatalog,
    probes: &[ProbeResult],
    classification: Classification,
) -> Result<GroupAnchor> {
    let name = &catalog.cluster().name;
    match classification {
        Classification::Healthy | Classification::PartitionedWithQuorum => {}
        Classification::PartitionedWithoutQuorum => {
            return Err(ClusterAdminError::InvalidState(format!(
                "cluster '{name}' has lost quorum; restore it with force-quorum first"
            )));
        }
        Classification::FullOutage | Classification::NoGroup => {
            return Err(ClusterAdminError::InvalidState(format!(
                "cluster '{name}' has no active group; reboot it first"
            )));
        }
        Classification::Unavailable => {
            return Err(ClusterAdminError::Unavailable(format!(
                "no member of cluster '{name}' could be reached"
            )));
        }
        Classification::UnmanagedGroup => {
            return Err(ClusterAdminError::NotManaged(format!(
                "members of cluster '{name}' run a group the catalog does not describe"
            )));
        }
    }

    let (probe, report) = primary_with_quorum(probes)
        .and_then(|p| p.report.as_ref().map(|r| (p, r)))
        .ok_or_else(|| {
            ClusterAdminError::InvalidState(format!("cluster '{name}' has no reachable primary"))
        })?;
    Ok(GroupAnchor {
        server_uuid: report.server_uuid,
        address: probe.address.clone(),
        gtid_executed: report.gtid_executed.clone(),
    })
}
