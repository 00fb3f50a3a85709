// src/core/recovery/reboot.rs

//! The reboot orchestrator: brings a cluster back after every member has
//! left the group.
//!
//! Stages run in a fixed order and every failure is terminal:
//!
//! ```text
//! Start -> Probe -> Classify -> SelectSeed -> Plan -> AcquireLock
//!       -> ApplyPlan -> ReleaseLock -> Done
//! ```
//!
//! The lock is taken on every reachable group member before the seed is
//! bootstrapped, so the lock set does not depend on which seed was chosen.
//! Once taken it is released on every path.

use super::apply::{GroupAnchor, PlanReport, apply_plan};
use super::classify::{Classification, classify};
use super::lock::{ClusterLockManager, Lease};
use super::probe::{ProbeResult, probe, probe_members};
use super::reconcile::{
    ActionPlan, MemberLists, PlanAction, PlanAnchor, build_plan, check_rejoin_reachable, probe_for,
    resolve_lists,
};
use super::seed::{SeedChoice, select_seed};
use super::{RecoveryContext, Result};
use crate::core::admin::RebootOptions;
use crate::core::errors::ClusterAdminError;
use crate::core::instance::Address;
use crate::core::metadata::{ClusterDescriptor, MembershipCatalog};
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum RebootStage {
    Start,
    Probe,
    Classify,
    SelectSeed,
    Plan,
    AcquireLock,
    ApplyPlan,
    ReleaseLock,
    Done,
}

/// Everything decided before the first change is made.
#[derive(Debug, Clone, Serialize)]
pub struct RebootPlan {
    pub cluster: String,
    pub classification: Classification,
    pub seed: SeedChoice,
    pub plan: ActionPlan,
    pub probes: Vec<ProbeResult>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebootReport {
    pub plan: RebootPlan,
    pub outcome: PlanReport,
    pub dry_run: bool,
}

pub struct RebootOrchestrator<'a> {
    ctx: &'a RecoveryContext,
    catalog: MembershipCatalog,
    options: &'a RebootOptions,
    stage: RebootStage,
}

impl<'a> RebootOrchestrator<'a> {
    pub fn new(
        ctx: &'a RecoveryContext,
        catalog: MembershipCatalog,
        options: &'a RebootOptions,
    ) -> Self {
        Self {
            ctx,
            catalog,
            options,
            stage: RebootStage::Start,
        }
    }

    pub fn stage(&self) -> RebootStage {
        self.stage
    }

    fn advance(&mut self, next: RebootStage) {
        debug!(
            "Reboot of '{}': {} -> {}",
            self.catalog.cluster().name,
            self.stage,
            next
        );
        self.stage = next;
    }

    /// Runs every stage up to and including planning. Nothing is changed on
    /// any member.
    pub async fn plan(&mut self) -> Result<RebootPlan> {
        let cluster = self.catalog.cluster().clone();
        let lists = self.validate_input(&cluster)?;

        // --- Probe every catalog member ---
        self.advance(RebootStage::Probe);
        let probes = probe_members(self.ctx, &cluster.members, cluster.group_name).await?;

        // --- Classify the outage ---
        self.advance(RebootStage::Classify);
        let classification = classify(&cluster, &probes);
        info!("Cluster '{}' is classified as {}", cluster.name, classification);
        refuse_unless_rebootable(&cluster, classification)?;
        check_rejoin_reachable(&cluster, &probes, &lists)?;
        self.confirm_unreachable(&cluster, &probes, &lists)?;

        // --- Select the seed ---
        self.advance(RebootStage::SelectSeed);
        let candidates: Vec<ProbeResult> = cluster
            .group_members()
            .filter(|m| !lists.remove.contains(&m.server_uuid))
            .filter_map(|m| probe_for(&probes, m).cloned())
            .collect();
        let seed = select_seed(&candidates, self.options.primary.as_ref(), self.options.force)?;
        info!(
            "Selected {} as seed ({}, gtid_executed '{}')",
            seed.address, seed.reason, seed.gtid_executed
        );

        // --- Build the action plan ---
        self.advance(RebootStage::Plan);
        let plan = build_plan(
            &cluster,
            &probes,
            PlanAnchor::Bootstrap(seed.server_uuid),
            &lists,
        );
        let warnings: Vec<String> = plan.warnings().collect();
        for warning in &warnings {
            warn!("{}", warning);
        }

        Ok(RebootPlan {
            cluster: cluster.name.clone(),
            classification,
            seed,
            plan,
            probes,
            warnings,
        })
    }

    /// Runs the whole reboot and hands back the updated catalog.
    pub async fn run(mut self) -> Result<(MembershipCatalog, RebootReport)> {
        let plan = self.plan().await?;
        if self.options.dry_run {
            info!("Dry run: {} step(s) planned, nothing applied", plan.plan.len());
            self.advance(RebootStage::Done);
            let report = RebootReport {
                plan,
                outcome: PlanReport::default(),
                dry_run: true,
            };
            return Ok((self.catalog, report));
        }

        // --- Take the cluster lock on every reachable member ---
        self.advance(RebootStage::AcquireLock);
        let targets = lock_targets(self.catalog.cluster(), &plan.probes);
        let mut lease = ClusterLockManager::new(self.ctx)
            .acquire_all(self.catalog.cluster_id(), &plan.seed.address, &targets)
            .await?;

        let applied = self.apply_locked(&mut lease, &plan).await;

        self.advance(RebootStage::ReleaseLock);
        if let Err(e) = lease.release().await {
            debug!("Lock release reported {}, the session close ends it", e);
        }
        let outcome = applied?;

        self.advance(RebootStage::Done);
        let outcome = outcome.into_result()?;
        info!(
            "Cluster '{}' rebooted from {} with {} member(s) rejoined",
            plan.cluster,
            plan.seed.address,
            plan.plan.count(PlanAction::RejoinMember)
        );
        Ok((
            self.catalog,
            RebootReport {
                plan,
                outcome,
                dry_run: false,
            },
        ))
    }

    async fn apply_locked(&mut self, lease: &mut Lease, plan: &RebootPlan) -> Result<PlanReport> {
        // Another invocation may have bootstrapped a member while this one planned.
        for address in lease.members() {
            if probe(self.ctx, address).await?.is_online() {
                return Err(ClusterAdminError::UseForceQuorumOrNothing(format!(
                    "{} is already running a group; cluster '{}' was rebooted concurrently",
                    address, plan.cluster
                )));
            }
        }

        self.advance(RebootStage::ApplyPlan);
        let anchor = GroupAnchor {
            server_uuid: plan.seed.server_uuid,
            address: plan.seed.address.clone(),
            gtid_executed: plan.seed.gtid_executed.clone(),
        };
        apply_plan(self.ctx, lease, &mut self.catalog, &plan.plan, &anchor).await
    }

    fn validate_input(&self, cluster: &ClusterDescriptor) -> Result<MemberLists> {
        let lists = resolve_lists(
            cluster,
            &self.options.rejoin_members,
            &self.options.remove_members,
        )?;
        if let Some(primary) = &self.options.primary {
            let member = cluster.member_by_address(primary).ok_or_else(|| {
                ClusterAdminError::NotAClusterMember(primary.to_string(), cluster.name.clone())
            })?;
            if lists.remove.contains(&member.server_uuid) {
                return Err(ClusterAdminError::RejectConflictingLists(format!(
                    "{primary} (requested primary)"
                )));
            }
        }
        Ok(lists)
    }

    /// Unreachable members need explicit consent: `force`, an explicit rejoin
    /// list, or listing them for removal.
    fn confirm_unreachable(
        &self,
        cluster: &ClusterDescriptor,
        probes: &[ProbeResult],
        lists: &MemberLists,
    ) -> Result<()> {
        let unconfirmed: Vec<String> = cluster
            .members
            .iter()
            .filter(|m| !lists.remove.contains(&m.server_uuid))
            .filter(|m| !probe_for(probes, m).is_some_and(|p| p.is_reachable()))
            .map(|m| m.address.to_string())
            .collect();
        if unconfirmed.is_empty() {
            return Ok(());
        }
        if self.options.force || lists.rejoin.is_some() {
            warn!(
                "Rebooting cluster '{}' without unreachable member(s) {}",
                cluster.name,
                unconfirmed.join(", ")
            );
            return Ok(());
        }
        Err(ClusterAdminError::UnreachableMembers(unconfirmed.join(", ")))
    }
}

/// Reachable group members, keyed for lock ordering.
pub(crate) fn lock_targets(
    cluster: &ClusterDescriptor,
    probes: &[ProbeResult],
) -> Vec<(Uuid, Address)> {
    cluster
        .group_members()
        .filter(|m| probe_for(probes, m).is_some_and(|p| p.is_reachable()))
        .map(|m| (m.server_uuid, m.address.clone()))
        .collect()
}

fn refuse_unless_rebootable(
    cluster: &ClusterDescriptor,
    classification: Classification,
) -> Result<()> {
    match classification {
        Classification::FullOutage | Classification::NoGroup => Ok(()),
        Classification::Unavailable => Err(ClusterAdminError::Unavailable(format!(
            "no member of cluster '{}' could be reached",
            cluster.name
        ))),
        Classification::UnmanagedGroup => Err(ClusterAdminError::NotManaged(format!(
            "members of cluster '{}' run a replication group the catalog does not describe",
            cluster.name
        ))),
        Classification::Healthy | Classification::PartitionedWithQuorum => {
            Err(ClusterAdminError::UseForceQuorumOrNothing(format!(
                "cluster '{}' is {} and still has an active group; rejoin or remove members individually",
                cluster.name, classification
            )))
        }
        Classification::PartitionedWithoutQuorum => {
            Err(ClusterAdminError::UseForceQuorumOrNothing(format!(
                "cluster '{}' has online members but has lost quorum; restore it with force-quorum through one of them",
                cluster.name
            )))
        }
    }
}
