// src/core/instance/report.rs

//! What a member says about itself in a single round trip.

use super::address::Address;
use crate::core::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Replication-group state of a member, as seen by itself or by a peer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
}

impl MemberState {
    /// Online and recovering members are part of an active group.
    pub fn is_active(self) -> bool {
        matches!(self, MemberState::Online | MemberState::Recovering)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum GroupRole {
    Primary,
    Secondary,
}

/// One entry of a member's local group view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMember {
    pub server_uuid: Uuid,
    pub address: Address,
    pub state: MemberState,
    pub role: GroupRole,
}

/// The state a member reports in one round trip, so that the GTID set and the
/// group view describe the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub server_uuid: Uuid,
    pub address: Address,
    pub gtid_executed: GtidSet,
    /// `None` when the member has never been configured for a group.
    pub group_name: Option<Uuid>,
    pub member_state: MemberState,
    pub single_primary: bool,
    pub super_read_only: bool,
    #[serde(default)]
    pub view: Vec<ViewMember>,
}

impl InstanceReport {
    pub fn is_active(&self) -> bool {
        self.member_state.is_active()
    }

    /// Whether the member's own view still holds a majority of reachable members.
    pub fn view_has_quorum(&self) -> bool {
        if !self.is_active() || self.view.is_empty() {
            return false;
        }
        let reachable = self.view.iter().filter(|m| m.state.is_active()).count();
        reachable > self.view.len() / 2
    }

    /// The online primary in this member's view, if any.
    pub fn view_primary(&self) -> Option<&ViewMember> {
        if !self.is_active() {
            return None;
        }
        self.view
            .iter()
            .find(|m| m.role == GroupRole::Primary && m.state == MemberState::Online)
    }

    pub fn view_member(&self, server_uuid: &Uuid) -> Option<&ViewMember> {
        self.view.iter().find(|m| &m.server_uuid == server_uuid)
    }
}
