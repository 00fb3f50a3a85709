// src/core/errors.rs

//! Defines the error type shared by every recovery operation.

use std::sync::Arc;
use thiserror::Error;

/// Every failure a cluster administration operation can surface.
///
/// The variants are error *kinds*: the orchestrator branches on them, and the
/// binary maps them to exit codes. Per-member probe failures never show up here
/// directly; they are folded into probe results until classification decides.
#[derive(Error, Debug)]
pub enum ClusterAdminError {
    /// No catalog member (or configured seed) could be reached.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("NotAuthorized: access denied for '{user}' at {address}")]
    NotAuthorized { user: String, address: String },

    /// A live group was found but there is no membership catalog describing it.
    #[error("NotManaged: {0}")]
    NotManaged(String),

    #[error("SchemaTooOld: catalog schema {found} is older than the supported floor {floor}")]
    SchemaTooOld { found: String, floor: String },

    #[error("SchemaTooNew: catalog schema {found} is newer than this tool understands ({current})")]
    SchemaTooNew { found: String, current: String },

    #[error("DivergentHistories: {0}")]
    DivergentHistories(String),

    #[error("ClusterBusy: Failed to acquire Cluster lock through primary member {primary}")]
    ClusterBusy { primary: String },

    #[error("RejectConflictingLists: {0} listed for both rejoin and removal")]
    RejectConflictingLists(String),

    #[error("RejectUnreachableRejoin: {0} cannot be rejoined because it is unreachable")]
    RejectUnreachableRejoin(String),

    /// Some plan steps failed after the plan started applying.
    #[error("PartialPlan: {failed} of {total} step(s) failed: {summary}")]
    PartialPlan {
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("NotAnActiveMember: {0}")]
    NotAnActiveMember(String),

    #[error("UseForceQuorumOrNothing: {0}")]
    UseForceQuorumOrNothing(String),

    #[error("QuorumNotLost: {0}")]
    QuorumNotLost(String),

    #[error("NotAClusterMember: {0} does not belong to cluster '{1}'")]
    NotAClusterMember(String, String),

    #[error(
        "UnreachableMembers: {0} could not be reached; use 'force' to reboot without them or list them in 'remove_members'"
    )]
    UnreachableMembers(String),

    #[error("InstanceUnreachable: {0}")]
    InstanceUnreachable(String),

    #[error("ClusterNotFound: no cluster named '{0}' in the membership catalog")]
    ClusterNotFound(String),

    #[error("InvalidState: {0}")]
    InvalidState(String),

    #[error("InvalidOptions: {0}")]
    InvalidOptions(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout while {0}")]
    Timeout(String),

    /// An instance rejected a request.
    #[error("Instance error from {address}: {message}")]
    Instance { address: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterAdminError {
    /// Fatal errors abort an invocation; anything else inside plan application
    /// is recorded and the remaining steps continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ClusterAdminError::Instance { .. }
                | ClusterAdminError::Timeout(_)
                | ClusterAdminError::Io(_)
                | ClusterAdminError::Protocol(_)
                | ClusterAdminError::InstanceUnreachable(_)
                | ClusterAdminError::InvalidState(_)
        )
    }

    /// Errors worth retrying as-is after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterAdminError::ClusterBusy { .. }
                | ClusterAdminError::Timeout(_)
                | ClusterAdminError::Io(_)
        )
    }

    /// Errors caused by what the operator asked for rather than cluster state.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ClusterAdminError::RejectConflictingLists(_)
                | ClusterAdminError::RejectUnreachableRejoin(_)
                | ClusterAdminError::NotAClusterMember(..)
                | ClusterAdminError::ClusterNotFound(_)
                | ClusterAdminError::InvalidOptions(_)
                | ClusterAdminError::UnreachableMembers(_)
        )
    }

    /// The process exit status reported by the binary for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_input_error() {
            2
        } else if self.is_transient() {
            3
        } else {
            match self {
                ClusterAdminError::PartialPlan { .. } => 4,
                ClusterAdminError::Cancelled => 130,
                _ => 1,
            }
        }
    }

    pub(crate) fn instance(address: impl ToString, message: impl Into<String>) -> Self {
        ClusterAdminError::Instance {
            address: address.to_string(),
            message: message.into(),
        }
    }
}

// `std::io::Error` is not cloneable, so it sits behind an Arc.
impl Clone for ClusterAdminError {
    fn clone(&self) -> Self {
        use ClusterAdminError::*;
        match self {
            Unavailable(s) => Unavailable(s.clone()),
            NotAuthorized { user, address } => NotAuthorized {
                user: user.clone(),
                address: address.clone(),
            },
            NotManaged(s) => NotManaged(s.clone()),
            SchemaTooOld { found, floor } => SchemaTooOld {
                found: found.clone(),
                floor: floor.clone(),
            },
            SchemaTooNew { found, current } => SchemaTooNew {
                found: found.clone(),
                current: current.clone(),
            },
            DivergentHistories(s) => DivergentHistories(s.clone()),
            ClusterBusy { primary } => ClusterBusy {
                primary: primary.clone(),
            },
            RejectConflictingLists(s) => RejectConflictingLists(s.clone()),
            RejectUnreachableRejoin(s) => RejectUnreachableRejoin(s.clone()),
            PartialPlan {
                failed,
                total,
                summary,
            } => PartialPlan {
                failed: *failed,
                total: *total,
                summary: summary.clone(),
            },
            NotAnActiveMember(s) => NotAnActiveMember(s.clone()),
            UseForceQuorumOrNothing(s) => UseForceQuorumOrNothing(s.clone()),
            QuorumNotLost(s) => QuorumNotLost(s.clone()),
            NotAClusterMember(a, c) => NotAClusterMember(a.clone(), c.clone()),
            UnreachableMembers(s) => UnreachableMembers(s.clone()),
            InstanceUnreachable(s) => InstanceUnreachable(s.clone()),
            ClusterNotFound(s) => ClusterNotFound(s.clone()),
            InvalidState(s) => InvalidState(s.clone()),
            InvalidOptions(s) => InvalidOptions(s.clone()),
            Cancelled => Cancelled,
            Timeout(s) => Timeout(s.clone()),
            Instance { address, message } => Instance {
                address: address.clone(),
                message: message.clone(),
            },
            Protocol(s) => Protocol(s.clone()),
            Io(e) => Io(Arc::clone(e)),
            Internal(s) => Internal(s.clone()),
        }
    }
}

impl PartialEq for ClusterAdminError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClusterAdminError::Io(e1), ClusterAdminError::Io(e2)) => {
                e1.to_string() == e2.to_string()
            }
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl From<std::io::Error> for ClusterAdminError {
    fn from(e: std::io::Error) -> Self {
        ClusterAdminError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClusterAdminError {
    fn from(e: serde_json::Error) -> Self {
        ClusterAdminError::Protocol(format!("invalid JSON payload: {e}"))
    }
}

impl From<uuid::Error> for ClusterAdminError {
    fn from(e: uuid::Error) -> Self {
        ClusterAdminError::Protocol(format!("invalid UUID: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for ClusterAdminError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClusterAdminError::Timeout("waiting for an instance".to_string())
    }
}
