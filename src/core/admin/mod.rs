// src/core/admin/mod.rs

//! Operator entry points.
//!
//! [`ClusterAdmin`] owns the connector, credentials and seed addresses. It
//! hands out [`ClusterHandle`]s for clusters whose catalog it can read, and
//! runs the reboot procedure, which by definition starts without a live
//! group to talk to.

pub mod handle;
pub mod options;
pub mod status;

pub use handle::ClusterHandle;
pub use options::{RebootOptions, RemoveOptions};
pub use status::{ClusterStatus, MemberStatus, RouterStatus};

use crate::core::errors::ClusterAdminError;
use crate::core::instance::{Address, Connector, Credentials};
use crate::core::metadata::MembershipCatalog;
use crate::core::recovery::reboot::{RebootOrchestrator, RebootPlan, RebootReport};
use crate::core::recovery::{RecoveryContext, RecoverySettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

type Result<T> = std::result::Result<T, ClusterAdminError>;

pub struct ClusterAdmin {
    ctx: RecoveryContext,
    seeds: Vec<Address>,
}

impl ClusterAdmin {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        settings: RecoverySettings,
        seeds: Vec<Address>,
    ) -> Self {
        Self {
            ctx: RecoveryContext::new(connector, credentials, settings),
            seeds,
        }
    }

    /// Every operation started after this races against `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx = self.ctx.with_cancellation(token);
        self
    }

    pub fn context(&self) -> &RecoveryContext {
        &self.ctx
    }

    pub fn seeds(&self) -> &[Address] {
        &self.seeds
    }

    pub async fn get_cluster(&self, name: &str) -> Result<ClusterHandle> {
        let catalog = MembershipCatalog::load(&self.ctx, name, &self.seeds)
            .instrument(info_span!("get_cluster", cluster = %name))
            .await?;
        Ok(ClusterHandle::new(self.ctx.clone(), catalog))
    }

    /// Computes what a reboot would do, without changing anything.
    pub async fn plan_reboot(&self, name: &str, options: &RebootOptions) -> Result<RebootPlan> {
        let ctx = self.context_for(options)?;
        async {
            let catalog = self.load_for_reboot(&ctx, name, options).await?;
            RebootOrchestrator::new(&ctx, catalog, options).plan().await
        }
        .instrument(info_span!("plan_reboot", cluster = %name))
        .await
    }

    pub async fn reboot_cluster_from_complete_outage(
        &self,
        name: &str,
        options: RebootOptions,
    ) -> Result<ClusterHandle> {
        self.reboot_with_report(name, options)
            .await
            .map(|(handle, _)| handle)
    }

    /// Like [`reboot_cluster_from_complete_outage`](Self::reboot_cluster_from_complete_outage),
    /// also returning what was planned and applied.
    pub async fn reboot_with_report(
        &self,
        name: &str,
        options: RebootOptions,
    ) -> Result<(ClusterHandle, RebootReport)> {
        let ctx = self.context_for(&options)?;
        async {
            let catalog = self.load_for_reboot(&ctx, name, &options).await?;
            let (catalog, report) = RebootOrchestrator::new(&ctx, catalog, &options)
                .run()
                .await?;
            Ok((ClusterHandle::new(ctx.clone(), catalog), report))
        }
        .instrument(info_span!("reboot", cluster = %name))
        .await
    }

    fn context_for(&self, options: &RebootOptions) -> Result<RecoveryContext> {
        let settings = options.settings(self.ctx.settings())?;
        let ctx = self.ctx.with_settings(settings);
        Ok(match &options.cluster_admin {
            Some(credentials) => ctx.with_credentials(credentials.clone()),
            None => ctx,
        })
    }

    async fn load_for_reboot(
        &self,
        ctx: &RecoveryContext,
        name: &str,
        options: &RebootOptions,
    ) -> Result<MembershipCatalog> {
        let mut seeds = self.seeds.clone();
        if let Some(primary) = &options.primary
            && !seeds.contains(primary)
        {
            seeds.push(primary.clone());
        }
        MembershipCatalog::load(ctx, name, &seeds).await
    }
}
