//! Worker nodes and the host registry collaborators.
//!
//! The host automation system owns the node registry. The core reads it
//! through [`LiveWorkerLookup`], adds nodes through [`WorkerRegistrar`], and
//! takes failed nodes out of service through [`NodeControl`].
//! [`InMemoryRegistry`] implements all three for the CLI and for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use thiserror::Error;

use crate::instance::CloudInstance;
use crate::template::{NodeMode, Tag, Template};

/// Worker node registered for a cloud instance.
///
/// Template fields are copied at registration time so later template edits
/// never change agents that are already running.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerNode {
    /// Node name (the instance display name).
    pub name: String,
    /// Backing cloud instance.
    pub instance_id: String,
    /// Cloud account the instance belongs to.
    pub cloud_name: String,
    /// Template description.
    pub description: String,
    /// Scheduling mode.
    pub mode: NodeMode,
    /// Label expression.
    pub label_string: String,
    /// Script run before the agent starts.
    pub init_script: Option<String>,
    /// Login used for the agent connection.
    pub remote_admin: String,
    /// Whether reclamation stops instead of deleting.
    pub stop_on_terminate: bool,
    /// Idle reclamation delay.
    pub idle_termination_minutes: Option<u32>,
    /// Provider tags.
    pub tags: Vec<Tag>,
    /// Instant from which the launch timeout is measured.
    pub launch_timeout: SystemTime,
}

impl WorkerNode {
    /// Builds a node for `instance` from a snapshot of `template`.
    #[must_use]
    pub fn from_instance(instance: &CloudInstance, template: &Template, cloud_name: &str) -> Self {
        Self {
            name: instance.name.clone(),
            instance_id: instance.id.clone(),
            cloud_name: cloud_name.to_owned(),
            description: template.description().to_owned(),
            mode: template.mode(),
            label_string: template.label_string().to_owned(),
            init_script: template.init_script().map(str::to_owned),
            remote_admin: template.effective_remote_admin().to_owned(),
            stop_on_terminate: template.stop_on_terminate(),
            idle_termination_minutes: template.idle_termination_minutes(),
            tags: template.tags().to_vec(),
            launch_timeout: SystemTime::now(),
        }
    }
}

/// Errors raised when the host rejects a registration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistrationError {
    /// The node configuration is rejected as a whole.
    #[error("node rejected by host: {reason}")]
    Rejected {
        /// Explanation from the host.
        reason: String,
    },
}

/// Errors raised by host node-control calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// No node is registered for the instance.
    #[error("no node registered for instance {instance_id}")]
    NodeNotFound {
        /// Backing instance identifier.
        instance_id: String,
    },
}

/// Read-only view of live worker nodes.
pub trait LiveWorkerLookup: Send + Sync {
    /// Returns every worker node currently known to the host.
    fn live_workers(&self) -> Vec<WorkerNode>;
}

/// Turns cloud instances into worker nodes known to the host scheduler.
pub trait WorkerRegistrar: Send + Sync {
    /// Registers a node for `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the host rejects the node.
    fn register(
        &self,
        instance: &CloudInstance,
        template: &Template,
        cloud_name: &str,
    ) -> Result<WorkerNode, RegistrationError>;
}

/// Host operations used to take a failed node out of service.
pub trait NodeControl: Send + Sync {
    /// Returns `true` while a node for the instance is registered.
    fn node_exists(&self, instance_id: &str) -> bool;

    /// Stops or resumes scheduling new work on the node.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is gone.
    fn set_accepting_tasks(&self, instance_id: &str, accepting: bool) -> Result<(), RegistryError>;

    /// Marks the node temporarily offline with a human-readable cause.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is gone.
    fn set_temporarily_offline(&self, instance_id: &str, cause: &str)
    -> Result<(), RegistryError>;

    /// Removes the node from the host.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is gone.
    fn remove_node(&self, instance_id: &str) -> Result<(), RegistryError>;
}

/// Scheduling state the host keeps for each node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    /// Whether the scheduler may assign new work.
    pub accepting_tasks: bool,
    /// Cause recorded when the node was taken offline.
    pub offline_cause: Option<String>,
}

#[derive(Clone, Debug)]
struct Entry {
    node: WorkerNode,
    status: NodeStatus,
}

/// Process-local host registry keyed by backing instance id.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistry {
    nodes: Arc<Mutex<BTreeMap<String, Entry>>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a node directly, bypassing registration.
    pub fn insert(&self, node: WorkerNode) {
        self.lock().insert(
            node.instance_id.clone(),
            Entry {
                node,
                status: NodeStatus {
                    accepting_tasks: true,
                    offline_cause: None,
                },
            },
        );
    }

    /// Returns the scheduling state of the node backed by `instance_id`.
    #[must_use]
    pub fn status(&self, instance_id: &str) -> Option<NodeStatus> {
        self.lock()
            .get(instance_id)
            .map(|entry| entry.status.clone())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(
        &self,
        instance_id: &str,
        apply: impl FnOnce(&mut NodeStatus),
    ) -> Result<(), RegistryError> {
        let mut nodes = self.lock();
        let entry = nodes
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::NodeNotFound {
                instance_id: instance_id.to_owned(),
            })?;
        apply(&mut entry.status);
        Ok(())
    }
}

impl LiveWorkerLookup for InMemoryRegistry {
    fn live_workers(&self) -> Vec<WorkerNode> {
        self.lock().values().map(|entry| entry.node.clone()).collect()
    }
}

impl WorkerRegistrar for InMemoryRegistry {
    fn register(
        &self,
        instance: &CloudInstance,
        template: &Template,
        cloud_name: &str,
    ) -> Result<WorkerNode, RegistrationError> {
        if instance.id.trim().is_empty() {
            return Err(RegistrationError::Rejected {
                reason: String::from("instance id must not be empty"),
            });
        }
        let node = WorkerNode::from_instance(instance, template, cloud_name);
        self.insert(node.clone());
        Ok(node)
    }
}

impl NodeControl for InMemoryRegistry {
    fn node_exists(&self, instance_id: &str) -> bool {
        self.lock().contains_key(instance_id)
    }

    fn set_accepting_tasks(&self, instance_id: &str, accepting: bool) -> Result<(), RegistryError> {
        self.update(instance_id, |status| status.accepting_tasks = accepting)
    }

    fn set_temporarily_offline(
        &self,
        instance_id: &str,
        cause: &str,
    ) -> Result<(), RegistryError> {
        self.update(instance_id, |status| {
            status.offline_cause = Some(cause.to_owned());
        })
    }

    fn remove_node(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.lock()
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NodeNotFound {
                instance_id: instance_id.to_owned(),
            })
    }
}
