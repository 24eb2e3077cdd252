//! Core library for the `ycfleet` build-agent provisioner.
//!
//! The crate keeps a pool of Yandex Cloud instances working as build agents.
//! Given a demand for workers it reconciles what the cloud already holds
//! (idle instances to reuse, stopped ones to wake) against a per-template
//! capacity ceiling, creates a fresh instance only when nothing can be reused,
//! and supervises the agent launch so that an instance which never connects is
//! torn down instead of being left running.

pub mod cloud_init;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod instance;
pub mod keys;
pub mod logging;
pub mod orphan;
pub mod provision;
pub mod registry;
pub mod ssh;
pub mod supervisor;
pub mod template;
pub mod test_support;
pub mod yandex;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{CloudConfig, ConfigError, LaunchConfig, TemplateSettings};
pub use dispatch::{DispatchError, TemplateHandle, TemplateWorker};
pub use gateway::{
    CloudGateway, CreateInstanceRequest, GatewayError, InstanceFilter, OperationResult,
};
pub use instance::{CloudInstance, InstanceStatus, NetworkInterface};
pub use keys::{FileKeyProvider, KeyError, KeyProvider, SigningKey};
pub use provision::{
    CloudContext, ProvisionError, ProvisionOption, ProvisionOptions, Provisioner,
};
pub use registry::{
    InMemoryRegistry, LiveWorkerLookup, NodeControl, RegistrationError, RegistryError,
    WorkerNode, WorkerRegistrar,
};
pub use ssh::SshLauncher;
pub use supervisor::{
    LaunchFailure, LaunchOutcome, LaunchState, LaunchSupervisor, Launchable,
};
pub use template::{InstanceCap, NodeMode, Template, TemplateError};
pub use yandex::YandexGateway;
