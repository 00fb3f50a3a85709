// src/core/recovery/seed.rs

//! Seed selection: the member a new group is bootstrapped from must already
//! hold every transaction any reachable member has applied.

use super::Result;
use super::probe::ProbeResult;
use crate::core::errors::ClusterAdminError;
use crate::core::gtid::GtidSet;
use crate::core::instance::{Address, InstanceReport};
use serde::Serialize;
use strum_macros::Display;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum SeedReason {
    /// The only member still acting as primary of an active view.
    SurvivingPrimary,
    /// Its GTID set contains every other reachable member's.
    MostAdvanced,
    /// Named by the operator.
    OperatorChoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedChoice {
    pub address: Address,
    pub server_uuid: Uuid,
    pub gtid_executed: GtidSet,
    pub reason: SeedReason,
}

impl SeedChoice {
    fn from_report(report: &InstanceReport, address: &Address, reason: SeedReason) -> Self {
        Self {
            address: address.clone(),
            server_uuid: report.server_uuid,
            gtid_executed: report.gtid_executed.clone(),
            reason,
        }
    }
}

/// Picks the seed among reachable members.
///
/// With `preferred`, that member is used if it dominates every other
/// reachable member; with `force` it is used regardless.
pub fn select_seed(
    probes: &[ProbeResult],
    preferred: Option<&Address>,
    force: bool,
) -> Result<SeedChoice> {
    let candidates: Vec<(&Address, &InstanceReport)> = probes
        .iter()
        .filter_map(|p| p.reachable_report().map(|r| (&p.address, r)))
        .collect();

    if candidates.is_empty() {
        return Err(ClusterAdminError::Unavailable(
            "no reachable member can act as seed".to_string(),
        ));
    }

    if let Some(preferred) = preferred {
        let (address, report) = candidates
            .iter()
            .find(|(a, _)| *a == preferred)
            .copied()
            .ok_or_else(|| {
                ClusterAdminError::InvalidOptions(format!(
                    "primary {preferred} is not a reachable member of the cluster"
                ))
            })?;
        let missing = missing_transactions(report, &candidates);
        if !missing.is_empty() {
            if !force {
                return Err(ClusterAdminError::DivergentHistories(format!(
                    "{address} lacks transactions present on other members: {missing}"
                )));
            }
            warn!(
                "Forcing {} as seed although it lacks transactions present on other members: {}",
                address, missing
            );
        }
        return Ok(SeedChoice::from_report(
            report,
            address,
            SeedReason::OperatorChoice,
        ));
    }

    // --- A sole surviving primary wins outright ---
    let surviving: Vec<&(&Address, &InstanceReport)> = candidates
        .iter()
        .filter(|(_, r)| {
            r.view_primary()
                .is_some_and(|primary| primary.server_uuid == r.server_uuid)
        })
        .collect();
    if let [(address, report)] = surviving.as_slice() {
        return Ok(SeedChoice::from_report(
            report,
            address,
            SeedReason::SurvivingPrimary,
        ));
    }

    // --- Otherwise the dominating GTID set, lowest server_uuid first ---
    let best = candidates
        .iter()
        .filter(|(_, r)| missing_transactions(r, &candidates).is_empty())
        .min_by_key(|(_, r)| r.server_uuid);

    match best {
        Some((address, report)) => Ok(SeedChoice::from_report(
            report,
            address,
            SeedReason::MostAdvanced,
        )),
        None => {
            let union = candidates
                .iter()
                .fold(GtidSet::new(), |acc, (_, r)| acc.union(&r.gtid_executed));
            let detail = candidates
                .iter()
                .map(|(address, r)| {
                    format!(
                        "{} is missing '{}'",
                        address,
                        union.difference(&r.gtid_executed)
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            Err(ClusterAdminError::DivergentHistories(format!(
                "no member has applied every transaction: {detail}"
            )))
        }
    }
}

/// Transactions other candidates have that `report` lacks.
fn missing_transactions(
    report: &InstanceReport,
    candidates: &[(&Address, &InstanceReport)],
) -> GtidSet {
    candidates
        .iter()
        .fold(GtidSet::new(), |acc, (_, other)| acc.union(&other.gtid_executed))
        .difference(&report.gtid_executed)
}
