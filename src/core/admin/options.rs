// src/core/admin/options.rs

//! Typed options for the operator entry points. Unknown keys are rejected.

use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, Credentials};
use crate::core::metadata::MemberRef;
use crate::core::recovery::RecoverySettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebootOptions {
    /// Members to rejoin. Empty means every reachable member.
    pub rejoin_members: Vec<MemberRef>,
    /// Members to drop from the catalog while rebooting.
    pub remove_members: Vec<MemberRef>,
    /// Bootstrap from this member instead of the automatically chosen seed.
    pub primary: Option<Address>,
    /// Proceed despite unreachable members, and accept a `primary` that does
    /// not hold every transaction.
    pub force: bool,
    /// Compute and return the plan without changing anything.
    pub dry_run: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub member_online_timeout: Option<Duration>,
    /// Overrides the configured administration account for this call.
    pub cluster_admin: Option<Credentials>,
}

impl RebootOptions {
    pub fn from_json(json: &str) -> Result<Self, ClusterAdminError> {
        serde_json::from_str(json).map_err(|e| ClusterAdminError::InvalidOptions(e.to_string()))
    }

    pub fn rejoin(mut self, member: impl Into<MemberRef>) -> Self {
        self.rejoin_members.push(member.into());
        self
    }

    pub fn remove(mut self, member: impl Into<MemberRef>) -> Self {
        self.remove_members.push(member.into());
        self
    }

    pub fn with_primary(mut self, primary: Address) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies the per-call timeout overrides to `base`.
    pub fn settings(&self, base: &RecoverySettings) -> Result<RecoverySettings, ClusterAdminError> {
        let mut settings = base.clone();
        if let Some(timeout) = self.connect_timeout {
            settings.connect_timeout = non_zero("connect_timeout", timeout)?;
        }
        if let Some(timeout) = self.member_online_timeout {
            settings.member_online_timeout = non_zero("member_online_timeout", timeout)?;
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoveOptions {
    /// Remove the member from the catalog even if it cannot be reached.
    pub force: bool,
}

impl RemoveOptions {
    pub fn from_json(json: &str) -> Result<Self, ClusterAdminError> {
        serde_json::from_str(json).map_err(|e| ClusterAdminError::InvalidOptions(e.to_string()))
    }
}

fn non_zero(name: &str, value: Duration) -> Result<Duration, ClusterAdminError> {
    if value.is_zero() {
        Err(ClusterAdminError::InvalidOptions(format!(
            "{name} must be greater than zero"
        )))
    } else {
        Ok(value)
    }
}
