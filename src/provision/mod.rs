//! Provisioning reconciler: reuse orphans first, create only when allowed.
//!
//! One call to [`Provisioner::provision`] runs the fixed sequence below, each
//! gateway call awaited before the next:
//!
//! 1. resolve the signing key (fail fast without it);
//! 2. read the instance snapshot and classify orphans;
//! 3. return `None` when nothing is reusable and creation is not permitted;
//! 4. start every stopped orphan (best-effort);
//! 5. register the first orphan when the orphans cover the demand;
//! 6. otherwise create a single instance, if none exists under the filter;
//! 7. register the first instance of a fresh listing.
//!
//! At most one instance is created and at most one node is registered per
//! call, whatever the demand.

mod error;

use tracing::{debug, error, info, warn};

use crate::cloud_init::bootstrap_payload_for;
use crate::gateway::{CloudGateway, CreateInstanceRequest, InstanceFilter, USER_DATA_METADATA_KEY};
use crate::instance::CloudInstance;
use crate::keys::{KeyProvider, SigningKey};
use crate::orphan::{bound_count, classify, read_snapshot};
use crate::registry::{LiveWorkerLookup, WorkerNode, WorkerRegistrar};
use crate::template::Template;

pub use error::ProvisionError;

/// Individual provisioning flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionOption {
    /// New instances may be created when no orphan is available.
    AllowCreate,
    /// New instances must be created when no orphan is available.
    ForceCreate,
}

/// Set of [`ProvisionOption`] flags. The empty set means reuse-only.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProvisionOptions {
    allow_create: bool,
    force_create: bool,
}

impl ProvisionOptions {
    /// The empty set: only idle capacity may be reused.
    #[must_use]
    pub const fn reuse_only() -> Self {
        Self {
            allow_create: false,
            force_create: false,
        }
    }

    /// Returns the set with `option` added.
    #[must_use]
    pub const fn with(mut self, option: ProvisionOption) -> Self {
        match option {
            ProvisionOption::AllowCreate => self.allow_create = true,
            ProvisionOption::ForceCreate => self.force_create = true,
        }
        self
    }

    /// Returns `true` when `option` is in the set.
    #[must_use]
    pub const fn contains(self, option: ProvisionOption) -> bool {
        match option {
            ProvisionOption::AllowCreate => self.allow_create,
            ProvisionOption::ForceCreate => self.force_create,
        }
    }

    /// Returns `true` when either creation flag is set.
    #[must_use]
    pub const fn permits_create(self) -> bool {
        self.allow_create || self.force_create
    }
}

impl FromIterator<ProvisionOption> for ProvisionOptions {
    fn from_iter<I: IntoIterator<Item = ProvisionOption>>(iter: I) -> Self {
        iter.into_iter().fold(Self::reuse_only(), Self::with)
    }
}

/// Cloud account settings a template provisions into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudContext {
    /// Account name; every created instance carries it as display name.
    pub name: String,
    /// Folder that owns the instances.
    pub folder_id: String,
    /// Zone new instances are created in.
    pub zone_id: String,
    /// Base create-instance request text.
    pub base_template: String,
}

impl CloudContext {
    /// Filter selecting the account's instances.
    #[must_use]
    pub fn filter(&self) -> InstanceFilter {
        InstanceFilter::new(&self.folder_id, &self.name)
    }
}

/// Reconciles demand for one template against the cloud.
#[derive(Debug)]
pub struct Provisioner<G, K, R> {
    gateway: G,
    keys: K,
    registry: R,
    template: Template,
    cloud: CloudContext,
}

impl<G, K, R> Provisioner<G, K, R>
where
    G: CloudGateway,
    K: KeyProvider,
    R: LiveWorkerLookup + WorkerRegistrar,
{
    /// Creates a reconciler for `template` in the `cloud` account.
    #[must_use]
    pub const fn new(gateway: G, keys: K, registry: R, template: Template, cloud: CloudContext) -> Self {
        Self {
            gateway,
            keys,
            registry,
            template,
            cloud,
        }
    }

    /// Template being reconciled.
    #[must_use]
    pub const fn template(&self) -> &Template {
        &self.template
    }

    /// Cloud account settings.
    #[must_use]
    pub const fn cloud(&self) -> &CloudContext {
        &self.cloud
    }

    /// Reconciles a demand for `number` workers.
    ///
    /// Returns `Ok(None)` when nothing is reusable and `options` forbid
    /// creation (a zero demand counts as nothing reusable), or when the
    /// template's instance cap is already reached.
    /// Otherwise returns the registered nodes, which never number more than
    /// one. The reconciler does not wait for instances to reach `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Credential`] when no signing key resolves,
    /// [`ProvisionError::Provisioning`] when the create operation reports an
    /// error, and [`ProvisionError::Gateway`], [`ProvisionError::NoInstance`]
    /// or [`ProvisionError::Registration`] when the final registration
    /// cannot complete.
    pub async fn provision(
        &self,
        number: usize,
        options: ProvisionOptions,
    ) -> Result<Option<Vec<WorkerNode>>, ProvisionError> {
        let key = self.keys.resolve_signing_key().ok_or_else(|| {
            warn!(template = %self.template, "no signing key resolved");
            ProvisionError::Credential
        })?;
        if number == 0 {
            debug!(template = %self.template, "zero workers requested");
            return Ok(options.permits_create().then(Vec::new));
        }

        let filter = self.cloud.filter();
        let snapshot = read_snapshot(&self.gateway, &filter).await;
        let live = self.registry.live_workers();
        let bound = bound_count(&snapshot, &live);
        if !self.template.instance_cap().admits(bound) {
            info!(
                template = %self.template,
                bound,
                cap = %self.template.instance_cap().as_config_str(),
                "instance cap reached"
            );
            return Ok(None);
        }

        let orphans = classify(&snapshot, &live, number);
        if orphans.is_empty() && !options.permits_create() {
            info!(
                template = %self.template,
                "no existing instance found and creation is not permitted"
            );
            return Ok(None);
        }

        self.wake(&orphans).await;

        if let Some(first) = orphans.first()
            && orphans.len() == number
        {
            return self.register(first).map(Some);
        }

        let need_create = number.saturating_sub(orphans.len());
        if need_create > 0 && self.filter_is_empty(&filter).await {
            self.create_instance(&key).await?;
        }

        let instances = self.gateway.list_instances(&filter).await?;
        let first = instances.first().ok_or_else(|| ProvisionError::NoInstance {
            filter: filter.expression(),
        })?;
        self.register(first).map(Some)
    }

    async fn wake(&self, orphans: &[CloudInstance]) {
        for instance in orphans.iter().filter(|i| i.status.is_stopped()) {
            match self.gateway.start_instance(&instance.id).await {
                Ok(result) => {
                    if let Some(message) = result.error_message() {
                        warn!(instance_id = %instance.id, error = %message, "start operation reported an error");
                    } else {
                        info!(instance_id = %instance.id, "waking stopped instance");
                    }
                }
                Err(err) => {
                    warn!(instance_id = %instance.id, error = %err, "failed to wake instance");
                }
            }
        }
    }

    /// Returns `true` only when a fresh listing succeeds and is empty; an
    /// unknown state never leads to creation.
    async fn filter_is_empty(&self, filter: &InstanceFilter) -> bool {
        match self.gateway.list_instances(filter).await {
            Ok(instances) => instances.is_empty(),
            Err(err) => {
                warn!(
                    template = %self.template,
                    error = %err,
                    "failed to re-list instances; skipping creation"
                );
                false
            }
        }
    }

    async fn create_instance(&self, key: &SigningKey) -> Result<(), ProvisionError> {
        let request = CreateInstanceRequest::from_base_template(&self.cloud.base_template)?
            .name(&self.cloud.name)
            .zone_id(&self.cloud.zone_id)
            .folder_id(&self.cloud.folder_id)
            .metadata(
                USER_DATA_METADATA_KEY,
                bootstrap_payload_for(&self.template, key),
            );
        info!(
            template = %self.template,
            zone = %self.cloud.zone_id,
            "creating instance"
        );
        let result = self.gateway.create_instance(&request).await?;
        if let Some(message) = result.error_message() {
            error!(template = %self.template, error = %message, "instance creation failed");
            return Err(ProvisionError::Provisioning {
                message: message.to_owned(),
            });
        }
        Ok(())
    }

    fn register(&self, instance: &CloudInstance) -> Result<Vec<WorkerNode>, ProvisionError> {
        let node = self
            .registry
            .register(instance, &self.template, &self.cloud.name)
            .map_err(|err| {
                error!(
                    template = %self.template,
                    instance_id = %instance.id,
                    error = %err,
                    "host rejected a validated node"
                );
                ProvisionError::from(err)
            })?;
        info!(
            template = %self.template,
            instance_id = %instance.id,
            status = %instance.status,
            "returning instance"
        );
        Ok(vec![node])
    }
}
