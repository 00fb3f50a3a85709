// src/core/recovery/lock.rs

//! The cluster lock: a named advisory lock held through sessions on group
//! members. A [`Lease`] is the only way to obtain the session on the member
//! it was taken for, so anything that takes `&mut Lease` runs under the lock.
//!
//! Recovery operations lock every reachable group member in ascending
//! `server_uuid` order. Two invocations that can see a common member then
//! contend on it, whichever member each of them was told to anchor on.

use super::{RecoveryContext, Result, close_session};
use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, InstanceSession};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOCK_PREFIX: &str = "groupwarden.cluster.";

pub struct ClusterLockManager<'a> {
    ctx: &'a RecoveryContext,
}

impl<'a> ClusterLockManager<'a> {
    pub fn new(ctx: &'a RecoveryContext) -> Self {
        Self { ctx }
    }

    pub fn lock_name(cluster_id: &Uuid) -> String {
        format!("{LOCK_PREFIX}{cluster_id}")
    }

    /// Takes the cluster lock through `primary` alone, retrying a busy lock
    /// up to the configured budget before failing with `ClusterBusy`.
    pub async fn acquire(&self, cluster_id: Uuid, primary: &Address) -> Result<Lease> {
        let name = Self::lock_name(&cluster_id);
        let holder = Uuid::new_v4();
        let session = self.lock_on(&name, holder, primary).await?;
        Ok(Lease {
            ctx: self.ctx.clone(),
            cluster_id,
            name,
            holder,
            primary: primary.clone(),
            session: Some(session),
            guards: Vec::new(),
        })
    }

    /// Takes the cluster lock on every member in `members`, in ascending
    /// `server_uuid` order, and on `primary`. The first busy member fails the
    /// whole acquisition with `ClusterBusy`, after the locks already taken are
    /// released again.
    pub async fn acquire_all(
        &self,
        cluster_id: Uuid,
        primary: &Address,
        members: &[(Uuid, Address)],
    ) -> Result<Lease> {
        let name = Self::lock_name(&cluster_id);
        let holder = Uuid::new_v4();

        let mut order: Vec<&(Uuid, Address)> = members.iter().collect();
        order.sort_by_key(|(server_uuid, _)| *server_uuid);
        order.dedup_by(|a, b| a.1 == b.1);

        let mut lease = Lease {
            ctx: self.ctx.clone(),
            cluster_id,
            name,
            holder,
            primary: primary.clone(),
            session: None,
            guards: Vec::new(),
        };
        for (_, address) in order {
            let session = match self.lock_on(&lease.name, holder, address).await {
                Ok(session) => session,
                Err(e) => {
                    if let Err(released) = lease.release().await {
                        debug!("Unwinding partial cluster lock reported {}", released);
                    }
                    return Err(e);
                }
            };
            if address == primary {
                lease.session = Some(session);
            } else {
                lease.guards.push((address.clone(), session));
            }
        }
        if lease.session.is_none() {
            match self.lock_on(&lease.name, holder, primary).await {
                Ok(session) => lease.session = Some(session),
                Err(e) => {
                    if let Err(released) = lease.release().await {
                        debug!("Unwinding partial cluster lock reported {}", released);
                    }
                    return Err(e);
                }
            }
        }
        Ok(lease)
    }

    /// Releases a lease. Same as [`Lease::release`].
    pub async fn release(&self, lease: Lease) -> Result<()> {
        lease.release().await
    }

    async fn lock_on(
        &self,
        name: &str,
        holder: Uuid,
        address: &Address,
    ) -> Result<Box<dyn InstanceSession>> {
        let settings = self.ctx.settings();
        let mut session = self.ctx.connect(address).await?;

        let mut attempt = 0u32;
        loop {
            let limit = settings.lock_wait + settings.query_timeout;
            let outcome = self
                .ctx
                .bounded(
                    limit,
                    "acquiring the cluster lock",
                    session.try_lock(name, holder, settings.lock_wait),
                )
                .await;

            match outcome {
                Ok(true) => {
                    info!("Acquired cluster lock '{}' through {}", name, address);
                    return Ok(session);
                }
                Ok(false) if attempt < settings.busy_retries => {
                    attempt += 1;
                    let delay = with_jitter(settings.busy_retry_delay);
                    debug!(
                        "Cluster lock '{}' is busy on {}, retrying in {:?} (attempt {}/{})",
                        name, address, delay, attempt, settings.busy_retries
                    );
                    if let Err(e) = self.ctx.sleep(delay).await {
                        close_session(session).await;
                        return Err(e);
                    }
                }
                Ok(false) => {
                    close_session(session).await;
                    return Err(ClusterAdminError::ClusterBusy {
                        primary: address.to_string(),
                    });
                }
                Err(e) => {
                    close_session(session).await;
                    return Err(e);
                }
            }
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 4) as u64;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

async fn unlock(
    mut session: Box<dyn InstanceSession>,
    name: &str,
    holder: Uuid,
    limit: Duration,
) -> Result<()> {
    let released = tokio::time::timeout(limit, session.release_lock(name, holder))
        .await
        .unwrap_or_else(|_| {
            Err(ClusterAdminError::Timeout(
                "releasing the cluster lock".to_string(),
            ))
        });
    close_session(session).await;
    released
}

/// Proof that the cluster lock is held. Dropping a lease without calling
/// [`release`](Lease::release) releases the lock from a background task.
pub struct Lease {
    ctx: RecoveryContext,
    cluster_id: Uuid,
    name: String,
    holder: Uuid,
    primary: Address,
    session: Option<Box<dyn InstanceSession>>,
    /// Lock-holding sessions on the other members.
    guards: Vec<(Address, Box<dyn InstanceSession>)>,
}

impl Lease {
    pub fn cluster_id(&self) -> Uuid {
        self.cluster_id
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The member the lease hands out a session for.
    pub fn primary(&self) -> &Address {
        &self.primary
    }

    /// Every member the lock is held on, `primary` included.
    pub fn members(&self) -> Vec<&Address> {
        self.session
            .as_ref()
            .map(|_| &self.primary)
            .into_iter()
            .chain(self.guards.iter().map(|(address, _)| address))
            .collect()
    }

    /// The lock-holding session on the primary.
    pub fn session(&mut self) -> Result<&mut dyn InstanceSession> {
        match self.session.as_mut() {
            Some(session) => Ok(session.as_mut()),
            None => Err(ClusterAdminError::Internal(
                "cluster lease used after release".to_string(),
            )),
        }
    }

    pub async fn release(mut self) -> Result<()> {
        // Release even when the invocation was cancelled.
        let limit = self.ctx.settings().query_timeout;
        let mut held: Vec<(Address, Box<dyn InstanceSession>)> =
            std::mem::take(&mut self.guards);
        if let Some(session) = self.session.take() {
            held.push((self.primary.clone(), session));
        }

        let mut first_error = None;
        for (address, session) in held.into_iter().rev() {
            match unlock(session, &self.name, self.holder, limit).await {
                Ok(()) => info!("Released cluster lock '{}' on {}", self.name, address),
                Err(e) => {
                    // Closing the session ends the lock on the member anyway.
                    warn!(
                        "Releasing cluster lock '{}' on {} failed: {}",
                        self.name, address, e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut held: Vec<Box<dyn InstanceSession>> =
            self.guards.drain(..).map(|(_, session)| session).collect();
        held.extend(self.session.take());
        if held.is_empty() {
            return;
        }
        let name = std::mem::take(&mut self.name);
        let holder = self.holder;
        let limit = self.ctx.settings().query_timeout;
        warn!("Cluster lease '{}' dropped while held, releasing in background", name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for session in held {
                        if let Err(e) = unlock(session, &name, holder, limit).await {
                            debug!("Background release of '{}' failed: {}", name, e);
                        }
                    }
                });
            }
            // Without a runtime the sessions are dropped, which ends the lock too.
            Err(_) => drop(held),
        }
    }
}
