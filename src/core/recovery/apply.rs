// src/core/recovery/apply.rs

//! Executing plan steps against members.
//!
//! Each step is applied on its own. Fatal errors abort the plan, and so does
//! any failure to bootstrap the group, since every later step needs it. Other
//! failures are recorded on the step and the remaining steps still run.

use super::lock::Lease;
use super::reconcile::{ActionPlan, PlanAction, PlanStep};
use super::{RecoveryContext, Result, close_session};
use crate::core::errors::ClusterAdminError;
use crate::core::gtid::GtidSet;
use crate::core::instance::{Address, InstanceReport, InstanceSession, MemberState, SystemVariable};
use crate::core::metadata::{MemberRef, MembershipCatalog};
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Display)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    /// Nothing to do, e.g. a no-op or a member that had already rejoined.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: PlanStep,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlanReport {
    pub outcomes: Vec<StepOutcome>,
}

impl PlanReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Failed(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// `PartialPlan` when any step failed.
    pub fn into_result(self) -> Result<PlanReport> {
        let failed = self.failed_count();
        if failed == 0 {
            return Ok(self);
        }
        let summary = self
            .failures()
            .map(|o| match &o.status {
                StepStatus::Failed(reason) => {
                    format!("{} {}: {}", o.step.action, o.step.address, reason)
                }
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(ClusterAdminError::PartialPlan {
            failed,
            total: self.outcomes.len(),
            summary,
        })
    }
}

/// Where rejoining members find the group.
#[derive(Debug, Clone)]
pub struct GroupAnchor {
    pub server_uuid: Uuid,
    pub address: Address,
    pub gtid_executed: GtidSet,
}

/// Runs every step in order. The lease must be held on `anchor`.
pub async fn apply_plan(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    plan: &ActionPlan,
    anchor: &GroupAnchor,
) -> Result<PlanReport> {
    let mut report = PlanReport::default();
    let total = plan.len();

    for (index, step) in plan.steps().iter().enumerate() {
        ctx.check_cancelled()?;
        debug!(
            "Step {}/{}: {} {}",
            index + 1,
            total,
            step.action,
            step.address
        );
        let result = match step.action {
            PlanAction::BootstrapGroup => bootstrap_step(ctx, lease, catalog, step).await,
            PlanAction::RemoveMember => remove_step(ctx, lease, catalog, step).await,
            PlanAction::RejoinMember => rejoin_step(ctx, lease, catalog, step, anchor).await,
            PlanAction::NoOp => noop_step(ctx, lease, catalog, step).await,
        };

        let status = match result {
            Ok(status) => status,
            Err(e) if e.is_fatal() || step.action == PlanAction::BootstrapGroup => {
                warn!("Step {} {} failed fatally: {}", step.action, step.address, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Step {} {} failed: {}", step.action, step.address, e);
                StepStatus::Failed(e.to_string())
            }
        };
        report.outcomes.push(StepOutcome {
            step: step.clone(),
            status,
        });
    }
    Ok(report)
}

async fn bootstrap_step(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    step: &PlanStep,
) -> Result<StepStatus> {
    if lease.primary() != &step.address {
        return Err(ClusterAdminError::Internal(format!(
            "bootstrap of {} attempted under a lease held on {}",
            step.address,
            lease.primary()
        )));
    }
    bootstrap_group(ctx, lease.session()?).await?;
    // The seed runs the group now; a failed catalog write aborts the plan but leaves it running.
    catalog.record_new_view(ctx, lease, step.server_uuid).await?;
    catalog
        .record_state(ctx, lease, step.server_uuid, MemberState::Online)
        .await?;
    Ok(StepStatus::Applied)
}

/// Starts a brand-new group on the session's member. The bootstrap flag is
/// always switched back off, even when starting the group fails.
pub async fn bootstrap_group(ctx: &RecoveryContext, session: &mut dyn InstanceSession) -> Result<()> {
    let address = session.address().clone();
    info!("Bootstrapping a new group on {}", address);

    ctx.guard(
        "enabling group bootstrap",
        session.set_global(SystemVariable::BootstrapGroup, "ON"),
    )
    .await?;
    let started = ctx
        .guard(
            "starting group replication",
            session.start_group_replication(),
        )
        .await;
    let reset = ctx
        .guard(
            "disabling group bootstrap",
            session.set_global(SystemVariable::BootstrapGroup, "OFF"),
        )
        .await;
    started?;
    reset?;

    let report = wait_for_online(ctx, session).await?;
    info!(
        "{} is ONLINE as the first member of the new group (gtid_executed '{}')",
        address, report.gtid_executed
    );
    Ok(())
}

async fn remove_step(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    step: &PlanStep,
) -> Result<StepStatus> {
    if step.reachability.is_reachable() {
        leave_group(ctx, &step.address).await?;
    }
    catalog
        .remove_member(ctx, lease, &MemberRef::Uuid(step.server_uuid))
        .await?;
    Ok(StepStatus::Applied)
}

/// Stops group replication on a member, if it is running.
pub async fn leave_group(ctx: &RecoveryContext, address: &Address) -> Result<()> {
    let mut session = ctx.connect(address).await?;
    let result = async {
        let report = ctx.guard("reading the group report", session.report()).await?;
        if report.member_state != MemberState::Offline {
            ctx.guard(
                "stopping group replication",
                session.stop_group_replication(),
            )
            .await?;
            info!("Stopped group replication on {}", address);
        }
        Ok::<(), ClusterAdminError>(())
    }
    .await;
    close_session(session).await;
    result
}

async fn rejoin_step(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    step: &PlanStep,
    anchor: &GroupAnchor,
) -> Result<StepStatus> {
    let status = rejoin_member(ctx, &step.address, anchor).await?;
    catalog
        .record_state(ctx, lease, step.server_uuid, MemberState::Online)
        .await?;
    Ok(status)
}

/// Brings one member into the group running on `anchor`.
///
/// Refuses members holding transactions the anchor lacks. A member already
/// online in the anchor's group is left as is.
pub async fn rejoin_member(
    ctx: &RecoveryContext,
    address: &Address,
    anchor: &GroupAnchor,
) -> Result<StepStatus> {
    let mut session = ctx.connect(address).await?;
    let result = rejoin_with_session(ctx, session.as_mut(), anchor).await;
    close_session(session).await;
    result
}

async fn rejoin_with_session(
    ctx: &RecoveryContext,
    session: &mut dyn InstanceSession,
    anchor: &GroupAnchor,
) -> Result<StepStatus> {
    let address = session.address().clone();
    let report = ctx.guard("reading the group report", session.report()).await?;

    if report.member_state == MemberState::Online
        && report.view_member(&anchor.server_uuid).is_some()
    {
        info!("{} is already ONLINE in the group of {}", address, anchor.address);
        return Ok(StepStatus::Skipped);
    }

    let errant = report.gtid_executed.difference(&anchor.gtid_executed);
    if !errant.is_empty() {
        return Err(ClusterAdminError::InvalidState(format!(
            "{address} has transactions the group does not have ('{errant}') and cannot rejoin"
        )));
    }

    // A member stuck in ERROR or in a stale view has to leave before it can join.
    if report.member_state != MemberState::Offline {
        ctx.guard(
            "stopping group replication",
            session.stop_group_replication(),
        )
        .await?;
    }

    info!("Rejoining {} to the group of {}", address, anchor.address);
    ctx.guard(
        "setting the group seeds",
        session.set_global(SystemVariable::GroupSeeds, &anchor.address.to_string()),
    )
    .await?;
    ctx.guard(
        "starting group replication",
        session.start_group_replication(),
    )
    .await?;
    wait_for_online(ctx, session).await?;
    info!("{} rejoined the group", address);
    Ok(StepStatus::Applied)
}

async fn noop_step(
    ctx: &RecoveryContext,
    lease: &mut Lease,
    catalog: &mut MembershipCatalog,
    step: &PlanStep,
) -> Result<StepStatus> {
    let Some(note) = &step.note else {
        return Ok(StepStatus::Skipped);
    };
    warn!("Leaving {} as is: {}", step.address, note);
    if !step.reachability.is_reachable() {
        catalog
            .record_state(ctx, lease, step.server_uuid, MemberState::Unreachable)
            .await?;
    }
    Ok(StepStatus::Skipped)
}

/// Polls the member until it reports ONLINE, up to the configured limit.
pub async fn wait_for_online(
    ctx: &RecoveryContext,
    session: &mut dyn InstanceSession,
) -> Result<InstanceReport> {
    let settings = ctx.settings().clone();
    let address = session.address().clone();
    let what = format!("waiting for {address} to become ONLINE");

    ctx.bounded(settings.member_online_timeout, &what, async {
        loop {
            let report = ctx.guard("reading the group report", session.report()).await?;
            match report.member_state {
                MemberState::Online => return Ok(report),
                MemberState::Error => {
                    return Err(ClusterAdminError::instance(
                        &address,
                        "group replication entered the ERROR state",
                    ));
                }
                state => debug!("{} is {}, waiting", address, state),
            }
            ctx.sleep(settings.poll_interval).await?;
        }
    })
    .await
}
