// src/core/admin/status.rs

use crate::core::instance::{Address, MemberState};
use crate::core::metadata::{
    MemberRole, MembershipCatalog, SchemaVersion, TopologyMode,
};
use crate::core::recovery::classify::primary_with_quorum;
use crate::core::recovery::{Classification, ProbeResult, Reachability};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

/// A point-in-time report on a cluster, combining the catalog with one probe
/// of every member. Members and routers keep catalog order.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub cluster: String,
    pub cluster_id: Uuid,
    pub classification: Classification,
    pub topology_mode: TopologyMode,
    pub schema_version: SchemaVersion,
    pub view_generation: u64,
    pub primary: Option<Address>,
    pub members: IndexMap<String, MemberStatus>,
    pub routers: IndexMap<String, RouterStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub server_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub role: MemberRole,
    pub reachability: Reachability,
    /// State the member reports about itself.
    pub state: Option<MemberState>,
    /// State last recorded in the catalog.
    pub catalog_state: Option<MemberState>,
    pub gtid_executed: Option<String>,
    pub super_read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub address: Address,
    pub version: Option<String>,
    pub last_check_in: Option<DateTime<Utc>>,
}

impl ClusterStatus {
    pub fn build(
        catalog: &MembershipCatalog,
        probes: &[ProbeResult],
        classification: Classification,
    ) -> Self {
        let cluster = catalog.cluster();

        let members = cluster
            .members
            .iter()
            .map(|member| {
                let probe = probes.iter().find(|p| p.address == member.address);
                let report = probe.and_then(|p| p.reachable_report());
                let status = MemberStatus {
                    server_uuid: member.server_uuid,
                    label: member.label.clone(),
                    role: member.role,
                    reachability: probe.map_or(Reachability::Unreachable, |p| p.reachability),
                    state: report.map(|r| r.member_state),
                    catalog_state: member.last_known_state,
                    gtid_executed: report.map(|r| r.gtid_executed.to_string()),
                    super_read_only: report.map(|r| r.super_read_only),
                    error: probe.and_then(|p| p.error.clone()),
                };
                (member.address.to_string(), status)
            })
            .collect();

        let routers = catalog
            .list_routers(&cluster.cluster_id)
            .into_iter()
            .map(|r| {
                let status = RouterStatus {
                    address: r.address.clone(),
                    version: r.version.clone(),
                    last_check_in: r.last_check_in,
                };
                (r.name.clone(), status)
            })
            .collect();

        Self {
            cluster: cluster.name.clone(),
            cluster_id: cluster.cluster_id,
            classification,
            topology_mode: cluster.topology_mode,
            schema_version: catalog.schema_version(),
            view_generation: cluster.view_generation,
            primary: primary_with_quorum(probes).map(|p| p.address.clone()),
            members,
            routers,
        }
    }
}
