// src/core/recovery/probe.rs

//! Node probe: one short-lived session per member that reports whether it is
//! reachable, whether it is in an active group, and its GTID state.

use super::{RecoveryContext, Result, close_session};
use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, InstanceReport};
use crate::core::metadata::MemberDescriptor;
use futures::future::join_all;
use serde::Serialize;
use strum_macros::Display;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum Reachability {
    ReachableOnline,
    ReachableOffline,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(self) -> bool {
        !matches!(self, Reachability::Unreachable)
    }
}

/// The outcome of probing one member at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub address: Address,
    pub reachability: Reachability,
    /// Present whenever the member answered, even if it was then judged to
    /// belong to another group.
    pub report: Option<InstanceReport>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn unreachable(address: Address, error: impl Into<String>) -> Self {
        Self {
            address,
            reachability: Reachability::Unreachable,
            report: None,
            error: Some(error.into()),
        }
    }

    pub fn from_report(report: InstanceReport) -> Self {
        let reachability = if report.is_active() {
            Reachability::ReachableOnline
        } else {
            Reachability::ReachableOffline
        };
        Self {
            address: report.address.clone(),
            reachability,
            report: Some(report),
            error: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability.is_reachable()
    }

    pub fn is_online(&self) -> bool {
        self.reachability == Reachability::ReachableOnline
    }

    pub fn server_uuid(&self) -> Option<Uuid> {
        self.report.as_ref().map(|r| r.server_uuid)
    }

    /// The report, but only when the member counts as reachable.
    pub fn reachable_report(&self) -> Option<&InstanceReport> {
        self.report.as_ref().filter(|_| self.is_reachable())
    }

    /// Downgrades to `Unreachable` when the member is not the server the
    /// catalog expects or reports a foreign group.
    fn check_identity(mut self, expected_uuid: Uuid, group_name: Uuid) -> Self {
        let Some(report) = &self.report else {
            return self;
        };
        let reason = if report.server_uuid != expected_uuid {
            Some(format!(
                "{} now reports server_uuid {} instead of {}",
                self.address, report.server_uuid, expected_uuid
            ))
        } else {
            match report.group_name {
                Some(name) if name != group_name => Some(format!(
                    "{} belongs to replication group {} instead of {}",
                    self.address, name, group_name
                )),
                _ => None,
            }
        };
        if let Some(reason) = reason {
            debug!("Treating {} as unreachable: {}", self.address, reason);
            self.reachability = Reachability::Unreachable;
            self.error = Some(reason);
        }
        self
    }
}

/// Probes one address. Connection failures become `Unreachable`; rejected
/// credentials and cancellation are returned as errors.
pub async fn probe(ctx: &RecoveryContext, address: &Address) -> Result<ProbeResult> {
    let mut session = match ctx.connect(address).await {
        Ok(session) => session,
        Err(e) if is_hard_failure(&e) => return Err(e),
        Err(e) => {
            debug!("Probe of {} failed to connect: {}", address, e);
            return Ok(ProbeResult::unreachable(address.clone(), e.to_string()));
        }
    };

    let result = match ctx.guard("reading the group report", session.report()).await {
        Ok(mut report) => {
            // The address we dialled is authoritative for this probe.
            report.address = address.clone();
            debug!(
                "Probe of {}: state {}, gtid_executed '{}', {} member(s) in view",
                address,
                report.member_state,
                report.gtid_executed,
                report.view.len()
            );
            Ok(ProbeResult::from_report(report))
        }
        Err(e) if is_hard_failure(&e) => Err(e),
        Err(e) => Ok(ProbeResult::unreachable(address.clone(), e.to_string())),
    };

    close_session(session).await;
    result
}

/// Probes every catalog member concurrently. Results keep catalog order.
pub async fn probe_members(
    ctx: &RecoveryContext,
    members: &[MemberDescriptor],
    group_name: Uuid,
) -> Result<Vec<ProbeResult>> {
    let probes = members.iter().map(|member| async move {
        probe(ctx, &member.address)
            .await
            .map(|result| result.check_identity(member.server_uuid, group_name))
    });
    join_all(probes).await.into_iter().collect()
}

fn is_hard_failure(e: &ClusterAdminError) -> bool {
    matches!(
        e,
        ClusterAdminError::NotAuthorized { .. } | ClusterAdminError::Cancelled
    )
}
