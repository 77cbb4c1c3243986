//! Identity migration saga.
//!
//! Changing a cluster's name or credential replaces both its control plane
//! membership and its registry record. The new membership is staged under a
//! transitional name so that two live memberships never share a name, then
//! promoted once the registry reflects the new identity:
//!
//! 1. join the transitional name with the new credential and probe it
//! 2. detach the old name
//! 3. delete the old record
//! 4. add the new record
//! 5. rename the transitional membership to the new name
//!
//! Each step except the last has a compensation that the [`Saga`] runner
//! applies in reverse when a later step fails.

use async_trait::async_trait;
use hubfleet_core::ClusterName;
use hubfleet_membership::{ControlPlaneGateway, Credential};
use hubfleet_store::{Cluster, Store};

use crate::backends::Backends;
use crate::error::{ControlError, Result};
use crate::saga::{Saga, SagaStep};

/// Shared state of one identity migration.
pub struct IdentityMigration<S: Store, G: ControlPlaneGateway> {
    backends: Backends<S, G>,
    /// The record being replaced.
    pub old: Cluster,
    /// The replacement record, completed by the join step.
    pub new: Cluster,
    /// Membership name used until the final rename.
    pub transitional: ClusterName,
    credential: Credential,
}

impl<S: Store, G: ControlPlaneGateway> IdentityMigration<S, G> {
    /// Prepare a migration from `old` to `new` joined with `credential`.
    ///
    /// A fresh transitional name is derived for every migration.
    #[must_use]
    pub fn new(backends: Backends<S, G>, old: Cluster, new: Cluster, credential: Credential) -> Self {
        let transitional = new.name.transitional();
        Self {
            backends,
            old,
            new,
            transitional,
            credential,
        }
    }
}

/// Build the five-step identity migration saga.
#[must_use]
pub fn identity_saga<S, G>() -> Saga<IdentityMigration<S, G>>
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    Saga::new("identity_migration")
        .step(JoinTransitional)
        .step(DetachOld)
        .step(DeleteOldRecord)
        .step(AddNewRecord)
        .step(RenameTransitional)
}

struct JoinTransitional;

#[async_trait]
impl<S, G> SagaStep<IdentityMigration<S, G>> for JoinTransitional
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    fn name(&self) -> &'static str {
        "join_transitional"
    }

    async fn execute(&self, ctx: &mut IdentityMigration<S, G>) -> Result<()> {
        let endpoint = ctx
            .backends
            .join(&ctx.transitional, &ctx.credential)
            .await?;
        ctx.new.api_server_url = endpoint;

        let probe_as = ctx.transitional.clone();
        ctx.backends.refresh_health(&mut ctx.new, &probe_as).await;
        Ok(())
    }

    async fn compensate(&self, ctx: &IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.detach(&ctx.transitional).await
    }
}

struct DetachOld;

#[async_trait]
impl<S, G> SagaStep<IdentityMigration<S, G>> for DetachOld
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    fn name(&self) -> &'static str {
        "detach_old"
    }

    async fn execute(&self, ctx: &mut IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.detach(&ctx.old.name).await
    }

    async fn compensate(&self, ctx: &IdentityMigration<S, G>) -> Result<()> {
        let kube_config = ctx
            .old
            .kube_config
            .as_deref()
            .ok_or(ControlError::KubeConfigMissing)?;
        ctx.backends
            .join(&ctx.old.name, &Credential::from_kubeconfig(kube_config))
            .await
            .map(|_| ())
    }
}

struct DeleteOldRecord;

#[async_trait]
impl<S, G> SagaStep<IdentityMigration<S, G>> for DeleteOldRecord
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    fn name(&self) -> &'static str {
        "delete_old_record"
    }

    async fn execute(&self, ctx: &mut IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.delete(&ctx.old.name)
    }

    async fn compensate(&self, ctx: &IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.add(&ctx.old)
    }
}

struct AddNewRecord;

#[async_trait]
impl<S, G> SagaStep<IdentityMigration<S, G>> for AddNewRecord
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    fn name(&self) -> &'static str {
        "add_new_record"
    }

    async fn execute(&self, ctx: &mut IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.add(&ctx.new)
    }

    async fn compensate(&self, ctx: &IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.delete(&ctx.new.name)
    }
}

struct RenameTransitional;

#[async_trait]
impl<S, G> SagaStep<IdentityMigration<S, G>> for RenameTransitional
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    fn name(&self) -> &'static str {
        "rename_transitional"
    }

    async fn execute(&self, ctx: &mut IdentityMigration<S, G>) -> Result<()> {
        ctx.backends.rename(&ctx.transitional, &ctx.new.name).await
    }

    // Last step: nothing after it can fail.
    async fn compensate(&self, _ctx: &IdentityMigration<S, G>) -> Result<()> {
        Ok(())
    }
}
