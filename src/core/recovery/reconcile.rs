// src/core/recovery/reconcile.rs

//! Reconciliation: turning the catalog's expected membership, the probe
//! snapshot and the operator's lists into an ordered action plan.

use super::Result;
use super::probe::{ProbeResult, Reachability};
use crate::core::errors::ClusterAdminError;
use crate::core::instance::Address;
use crate::core::metadata::{ClusterDescriptor, MemberDescriptor, MemberRef};
use serde::Serialize;
use std::collections::BTreeSet;
use strum_macros::Display;
use uuid::Uuid;

/// Steps run in this order: bootstrap, removals, rejoins, no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
pub enum PlanAction {
    BootstrapGroup,
    RemoveMember,
    RejoinMember,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub action: PlanAction,
    pub server_uuid: Uuid,
    pub address: Address,
    pub reachability: Reachability,
    /// Why a member is left alone; surfaced as a warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One step per catalog member, already in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ActionPlan {
    steps: Vec<PlanStep>,
}

impl ActionPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_for(&self, server_uuid: &Uuid) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.server_uuid == server_uuid)
    }

    pub fn count(&self, action: PlanAction) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = String> + '_ {
        self.steps
            .iter()
            .filter_map(|s| s.note.as_ref().map(|n| format!("{}: {}", s.address, n)))
    }
}

/// Operator lists resolved to server UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberLists {
    /// `None` means every reachable member is rejoined.
    pub rejoin: Option<BTreeSet<Uuid>>,
    pub remove: BTreeSet<Uuid>,
}

/// Resolves the operator's lists against the catalog. Runs before anything
/// touches the network.
pub fn resolve_lists(
    cluster: &ClusterDescriptor,
    rejoin: &[MemberRef],
    remove: &[MemberRef],
) -> Result<MemberLists> {
    let rejoin_members = rejoin
        .iter()
        .map(|r| resolve(cluster, r))
        .collect::<Result<Vec<_>>>()?;
    let remove_members = remove
        .iter()
        .map(|r| resolve(cluster, r))
        .collect::<Result<Vec<_>>>()?;

    let remove_set: BTreeSet<Uuid> = remove_members.iter().map(|m| m.server_uuid).collect();
    let conflicting: Vec<String> = rejoin_members
        .iter()
        .filter(|m| remove_set.contains(&m.server_uuid))
        .map(|m| m.address.to_string())
        .collect();
    if !conflicting.is_empty() {
        return Err(ClusterAdminError::RejectConflictingLists(
            conflicting.join(", "),
        ));
    }

    let rejoin_set = (!rejoin_members.is_empty())
        .then(|| rejoin_members.iter().map(|m| m.server_uuid).collect());
    Ok(MemberLists {
        rejoin: rejoin_set,
        remove: remove_set,
    })
}

fn resolve<'a>(cluster: &'a ClusterDescriptor, reference: &MemberRef) -> Result<&'a MemberDescriptor> {
    cluster.find_member(reference).ok_or_else(|| {
        ClusterAdminError::NotAClusterMember(reference.to_string(), cluster.name.clone())
    })
}

/// Every explicitly listed rejoin target must have answered the probe.
pub fn check_rejoin_reachable(
    cluster: &ClusterDescriptor,
    probes: &[ProbeResult],
    lists: &MemberLists,
) -> Result<()> {
    let Some(rejoin) = &lists.rejoin else {
        return Ok(());
    };
    let unreachable: Vec<String> = cluster
        .members
        .iter()
        .filter(|m| rejoin.contains(&m.server_uuid))
        .filter(|m| !probe_for(probes, m).is_some_and(|p| p.is_reachable()))
        .map(|m| m.address.to_string())
        .collect();
    if unreachable.is_empty() {
        Ok(())
    } else {
        Err(ClusterAdminError::RejectUnreachableRejoin(
            unreachable.join(", "),
        ))
    }
}

/// The member the rest of the group is rebuilt around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAnchor {
    /// A new group is bootstrapped on this member.
    Bootstrap(Uuid),
    /// This member already runs the group and only the others are handled.
    Primary(Uuid),
}

impl PlanAnchor {
    pub fn server_uuid(self) -> Uuid {
        match self {
            PlanAnchor::Bootstrap(uuid) | PlanAnchor::Primary(uuid) => uuid,
        }
    }
}

/// Builds the plan. Produces exactly one step per catalog member.
pub fn build_plan(
    cluster: &ClusterDescriptor,
    probes: &[ProbeResult],
    anchor: PlanAnchor,
    lists: &MemberLists,
) -> ActionPlan {
    let mut steps: Vec<PlanStep> = cluster
        .members
        .iter()
        .map(|member| {
            let reachability = probe_for(probes, member)
                .map_or(Reachability::Unreachable, |p| p.reachability);
            let (action, note) = decide(member, reachability, anchor, lists);
            PlanStep {
                action,
                server_uuid: member.server_uuid,
                address: member.address.clone(),
                reachability,
                note,
            }
        })
        .collect();
    // Stable, so catalog order is kept within each action.
    steps.sort_by_key(|s| s.action);
    ActionPlan { steps }
}

fn decide(
    member: &MemberDescriptor,
    reachability: Reachability,
    anchor: PlanAnchor,
    lists: &MemberLists,
) -> (PlanAction, Option<String>) {
    if member.server_uuid == anchor.server_uuid() {
        return match anchor {
            PlanAnchor::Bootstrap(_) => (PlanAction::BootstrapGroup, None),
            PlanAnchor::Primary(_) => (PlanAction::NoOp, None),
        };
    }
    if lists.remove.contains(&member.server_uuid) {
        return (PlanAction::RemoveMember, None);
    }
    if !reachability.is_reachable() {
        return (
            PlanAction::NoOp,
            Some("unreachable; it stays in the catalog but not in the group".to_string()),
        );
    }
    if !member.role.is_group_member() {
        return (
            PlanAction::NoOp,
            Some("read replica; it reconnects to the new primary by itself".to_string()),
        );
    }
    match &lists.rejoin {
        Some(rejoin) if !rejoin.contains(&member.server_uuid) => (
            PlanAction::NoOp,
            Some("not listed for rejoin; left out of the group".to_string()),
        ),
        _ => (PlanAction::RejoinMember, None),
    }
}

pub(crate) fn probe_for<'a>(
    probes: &'a [ProbeResult],
    member: &MemberDescriptor,
) -> Option<&'a ProbeResult> {
    probes.iter().find(|p| p.address == member.address)
}
