// src/core/recovery/mod.rs

//! The recovery core: probing members, classifying the outage, choosing a
//! seed, locking the cluster, planning and applying the reconciliation.
//!
//! Every network round trip goes through [`RecoveryContext`], which bounds it
//! with the configured timeout and races it against cancellation.

use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, Connector, Credentials, InstanceSession};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod apply;
pub mod classify;
pub mod force_quorum;
pub mod lock;
pub mod probe;
pub mod reboot;
pub mod reconcile;
pub mod seed;

pub use classify::{Classification, classify};
pub use lock::{ClusterLockManager, Lease};
pub use probe::{ProbeResult, Reachability, probe, probe_members};
pub use reconcile::{ActionPlan, PlanAction, PlanStep};
pub use seed::select_seed;

pub type Result<T> = std::result::Result<T, ClusterAdminError>;

/// Timeouts and retry budgets for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoverySettings {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    /// How long the lock owner on the primary waits for a held lock.
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,
    /// Extra acquisition attempts after the first `ClusterBusy`.
    pub busy_retries: u32,
    #[serde(with = "humantime_serde")]
    pub busy_retry_delay: Duration,
    /// Upper bound on waiting for a rejoining member to come online.
    #[serde(with = "humantime_serde")]
    pub member_online_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
            lock_wait: Duration::ZERO,
            busy_retries: 1,
            busy_retry_delay: Duration::from_secs(2),
            member_online_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Everything a recovery operation needs to reach members.
#[derive(Clone)]
pub struct RecoveryContext {
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    settings: RecoverySettings,
    cancel: CancellationToken,
}

impl RecoveryContext {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            connector,
            credentials,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A copy with different settings that shares the connector and the
    /// cancellation token.
    pub fn with_settings(&self, settings: RecoverySettings) -> Self {
        Self {
            settings,
            ..self.clone()
        }
    }

    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            credentials,
            ..self.clone()
        }
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ClusterAdminError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Opens a session, bounded by the connect timeout.
    pub async fn connect(&self, address: &Address) -> Result<Box<dyn InstanceSession>> {
        let what = format!("connecting to {address}");
        self.bounded(
            self.settings.connect_timeout,
            &what,
            self.connector.connect(address, &self.credentials),
        )
        .await
    }

    /// Runs one request to a member, bounded by the query timeout.
    pub async fn guard<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.bounded(self.settings.query_timeout, what, fut).await
    }

    /// Sleeps unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClusterAdminError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Runs `fut` with an explicit time limit, racing cancellation.
    pub async fn bounded<T, F>(&self, limit: Duration, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClusterAdminError::Cancelled),
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ClusterAdminError::Timeout(what.to_string())),
            },
        }
    }
}

/// Closes a session, logging instead of failing.
pub(crate) async fn close_session(mut session: Box<dyn InstanceSession>) {
    if let Err(e) = session.close().await {
        tracing::debug!("Closing session to {} failed: {}", session.address(), e);
    }
}
