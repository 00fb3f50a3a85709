// src/core/recovery/force_quorum.rs

//! Restoring quorum through a surviving member.
//!
//! The group membership on the nominated member is rewritten to contain only
//! that member, which makes it writable again. Members that can still be
//! reached are then rejoined through the regular plan machinery.

use super::apply::{GroupAnchor, PlanReport, apply_plan, wait_for_online};
use super::classify::{Classification, classify};
use super::lock::{ClusterLockManager, Lease};
use super::probe::{ProbeResult, probe_members};
use super::reboot::lock_targets;
use super::reconcile::{ActionPlan, MemberLists, PlanAnchor, build_plan, probe_for};
use super::{RecoveryContext, Result};
use crate::core::errors::ClusterAdminError;
use crate::core::instance::{MemberState, SystemVariable};
use crate::core::metadata::{MemberDescriptor, MemberRef, MembershipCatalog};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ForceQuorumReport {
    pub cluster: String,
    pub member: MemberDescriptor,
    pub plan: ActionPlan,
    pub outcome: PlanReport,
}

pub async fn force_quorum(
    ctx: &RecoveryContext,
    catalog: &mut MembershipCatalog,
    target: &MemberRef,
) -> Result<ForceQuorumReport> {
    let cluster = catalog.cluster().clone();
    let member = catalog
        .find_member(target)
        .filter(|m| m.role.is_group_member())
        .cloned()
        .ok_or_else(|| {
            ClusterAdminError::NotAnActiveMember(format!(
                "{target} is not a group member of cluster '{}'",
                cluster.name
            ))
        })?;

    // --- Probe and validate the nominated member ---
    let probes = probe_members(ctx, &cluster.members, cluster.group_name).await?;
    let report = probe_for(&probes, &member)
        .filter(|p| p.is_online())
        .and_then(|p| p.report.clone())
        .ok_or_else(|| {
            ClusterAdminError::NotAnActiveMember(format!(
                "{} is not reachable or not ONLINE in its local group view",
                member.address
            ))
        })?;

    let classification = classify(&cluster, &probes);
    info!("Cluster '{}' is classified as {}", cluster.name, classification);
    if classification != Classification::PartitionedWithoutQuorum {
        return Err(ClusterAdminError::QuorumNotLost(format!(
            "cluster '{}' is {}; forcing quorum is only allowed when it has been lost",
            cluster.name, classification
        )));
    }

    // --- Lock every reachable member, handing out the survivor's session ---
    let targets = lock_targets(&cluster, &probes);
    let mut lease = ClusterLockManager::new(ctx)
        .acquire_all(cluster.cluster_id, &member.address, &targets)
        .await?;

    let result = force_locked(ctx, &mut lease, catalog, &member, &probes, &report).await;
    if let Err(e) = lease.release().await {
        debug!("Lock release reported {}, the session close ends it", e);
    }
    let (plan, outcome) = result?;
    let outcome = outcome.into_result()?;

    Ok(ForceQuorumReport {
        cluster: cluster.name,
        member,
        plan,
        outcome,
    })
}

async fn force_locked(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    member: &MemberDescriptor,
    probes: &[ProbeResult],
    report: &crate::core::instance::InstanceReport,
) -> Result<(ActionPlan, PlanReport)> {
    let own_address = member.address.to_string();
    warn!(
        "Forcing the group membership of cluster '{}' to {} only",
        catalog.cluster().name,
        own_address
    );

    let session = lease.session()?;
    ctx.guard(
        "forcing group membership",
        session.set_global(SystemVariable::ForceMembers, &own_address),
    )
    .await?;
    let cleared = ctx
        .guard(
            "clearing forced group membership",
            session.set_global(SystemVariable::ForceMembers, ""),
        )
        .await;
    if let Err(e) = cleared {
        warn!("Could not clear the forced membership on {}: {}", own_address, e);
    }

    let after = wait_for_online(ctx, session).await?;
    if !after.view_has_quorum() {
        return Err(ClusterAdminError::InvalidState(format!(
            "{own_address} still has no quorum after forcing its membership"
        )));
    }
    info!("Quorum restored through {}", own_address);

    catalog
        .record_new_view(ctx, lease, member.server_uuid)
        .await?;
    catalog
        .record_state(ctx, lease, member.server_uuid, MemberState::Online)
        .await?;

    // --- Rejoin whatever else answers ---
    let plan = build_plan(
        catalog.cluster(),
        probes,
        PlanAnchor::Primary(member.server_uuid),
        &MemberLists::default(),
    );
    let anchor = GroupAnchor {
        server_uuid: member.server_uuid,
        address: member.address.clone(),
        gtid_executed: report.gtid_executed.clone(),
    };
    let outcome = apply_plan(ctx, lease, catalog, &plan, &anchor).await?;
    Ok((plan, outcome))
}
