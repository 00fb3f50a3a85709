// src/core/recovery/classify.rs

//! Outage classification over one probe snapshot.

use super::probe::ProbeResult;
use crate::core::metadata::ClusterDescriptor;
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum Classification {
    /// A majority of members is online around a primary.
    Healthy,
    /// A minority is online but its group view still holds quorum.
    PartitionedWithQuorum,
    /// Members are online but no view holds quorum.
    PartitionedWithoutQuorum,
    /// No member is online and at least one is unreachable.
    FullOutage,
    /// Members answer, but only as part of a group this catalog does not know.
    UnmanagedGroup,
    /// Every member is reachable and none is in a group.
    NoGroup,
    /// Nothing answered at all.
    Unavailable,
}

impl Classification {
    /// Whether a reboot from complete outage may proceed.
    pub fn allows_reboot(self) -> bool {
        matches!(self, Classification::FullOutage | Classification::NoGroup)
    }

    /// Whether some member still runs an active group.
    pub fn has_live_group(self) -> bool {
        matches!(
            self,
            Classification::Healthy
                | Classification::PartitionedWithQuorum
                | Classification::PartitionedWithoutQuorum
        )
    }
}

/// Classifies the cluster from probe results.
///
/// Only group members count towards quorum; read replicas are ignored. Pure:
/// the same inputs always give the same answer.
pub fn classify(cluster: &ClusterDescriptor, probes: &[ProbeResult]) -> Classification {
    let group: Vec<&ProbeResult> = probes
        .iter()
        .filter(|p| {
            cluster
                .member_by_address(&p.address)
                .is_none_or(|m| m.role.is_group_member())
        })
        .collect();

    let reachable = group.iter().filter(|p| p.is_reachable()).count();
    if reachable == 0 {
        // Members that only answered as part of another active group.
        let foreign_live = group
            .iter()
            .any(|p| p.report.as_ref().is_some_and(|r| r.is_active()));
        return if foreign_live {
            Classification::UnmanagedGroup
        } else {
            Classification::Unavailable
        };
    }

    let online: Vec<&&ProbeResult> = group.iter().filter(|p| p.is_online()).collect();
    if online.is_empty() {
        return if reachable == group.len() {
            Classification::NoGroup
        } else {
            Classification::FullOutage
        };
    }

    let reports = online.iter().filter_map(|p| p.report.as_ref());
    let (mut primary_present, mut view_quorum) = (false, false);
    for report in reports {
        primary_present |= report.view_primary().is_some();
        view_quorum |= report.view_has_quorum();
    }

    let majority = group.len() / 2 + 1;
    if online.len() >= majority && primary_present && view_quorum {
        Classification::Healthy
    } else if primary_present && view_quorum {
        Classification::PartitionedWithQuorum
    } else {
        Classification::PartitionedWithoutQuorum
    }
}

/// The reachable primary of a view that still holds quorum, if any.
pub fn primary_with_quorum(probes: &[ProbeResult]) -> Option<&ProbeResult> {
    probes
        .iter()
        .filter_map(|p| p.reachable_report().filter(|r| r.view_has_quorum()))
        .filter_map(|r| r.view_primary())
        .find_map(|primary| {
            probes.iter().find(|p| {
                p.is_online() && p.server_uuid() == Some(primary.server_uuid)
            })
        })
}
