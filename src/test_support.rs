//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::gateway::{
    CloudGateway, CreateInstanceRequest, GatewayError, GatewayFuture, InstanceFilter,
    OperationResult,
};
use crate::instance::{CloudInstance, InstanceStatus};
use crate::keys::{KeyProvider, SigningKey};
use crate::registry::{
    InMemoryRegistry, LiveWorkerLookup, NodeControl, RegistrationError, RegistryError, WorkerNode,
    WorkerRegistrar,
};
use crate::supervisor::{Connected, LaunchFailure, LaunchFuture, Launchable};
use crate::template::Template;

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Gateway call recorded by [`FakeGateway`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GatewayCall {
    /// `list_instances` with the rendered filter expression.
    List(String),
    /// `get_instance` for an id.
    Get(String),
    /// `start_instance` for an id.
    Start(String),
    /// `create_instance` with the requested display name.
    Create(Option<String>),
    /// `terminate_instance` for an id.
    Terminate(String),
}

#[derive(Debug, Default)]
struct GatewayState {
    instances: Vec<CloudInstance>,
    listings: VecDeque<Result<Vec<CloudInstance>, GatewayError>>,
    create_error: Option<String>,
    start_error: Option<GatewayError>,
    terminate_error: Option<GatewayError>,
    requests: Vec<CreateInstanceRequest>,
    calls: Vec<GatewayCall>,
    next_id: usize,
}

/// In-memory cloud that records every call.
///
/// Listings return the current instance set unless a scripted result was
/// queued with [`FakeGateway::push_listing`]. Successful creates add a
/// `PROVISIONING` instance; successful terminations remove it.
#[derive(Clone, Debug, Default)]
pub struct FakeGateway {
    state: Arc<StdMutex<GatewayState>>,
}

impl FakeGateway {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cloud holding `instances`.
    #[must_use]
    pub fn with_instances(instances: Vec<CloudInstance>) -> Self {
        let gateway = Self::new();
        lock(&gateway.state).instances = instances;
        gateway
    }

    /// Queues the result of the next `list_instances` call.
    pub fn push_listing(&self, result: Result<Vec<CloudInstance>, GatewayError>) {
        lock(&self.state).listings.push_back(result);
    }

    /// Makes every create operation report `message`.
    pub fn fail_creates_with(&self, message: impl Into<String>) {
        lock(&self.state).create_error = Some(message.into());
    }

    /// Makes every start call fail with `error`.
    pub fn fail_starts_with(&self, error: GatewayError) {
        lock(&self.state).start_error = Some(error);
    }

    /// Makes every terminate call fail with `error`.
    pub fn fail_terminations_with(&self, error: GatewayError) {
        lock(&self.state).terminate_error = Some(error);
    }

    /// Current instance set.
    #[must_use]
    pub fn instances(&self) -> Vec<CloudInstance> {
        lock(&self.state).instances.clone()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.state).calls.clone()
    }

    /// Create requests received so far.
    #[must_use]
    pub fn create_requests(&self) -> Vec<CreateInstanceRequest> {
        lock(&self.state).requests.clone()
    }

    /// Ids passed to `start_instance`.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Start(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids passed to `terminate_instance`.
    #[must_use]
    pub fn terminated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Number of `create_instance` calls.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Create(_)))
            .count()
    }
}

impl CloudGateway for FakeGateway {
    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> GatewayFuture<'a, Vec<CloudInstance>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(GatewayCall::List(filter.expression()));
            let scripted = state.listings.pop_front();
            scripted.unwrap_or_else(|| Ok(state.instances.clone()))
        })
    }

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Option<CloudInstance>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(GatewayCall::Get(instance_id.to_owned()));
            Ok(state
                .instances
                .iter()
                .find(|instance| instance.id == instance_id)
                .cloned())
        })
    }

    fn start_instance<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(GatewayCall::Start(instance_id.to_owned()));
            if let Some(err) = state.start_error.clone() {
                return Err(err);
            }
            if let Some(instance) = state
                .instances
                .iter_mut()
                .find(|instance| instance.id == instance_id)
            {
                instance.status = InstanceStatus::Running;
            }
            Ok(OperationResult::accepted(Some(format!("start-{instance_id}"))))
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state
                .calls
                .push(GatewayCall::Create(request.display_name().map(str::to_owned)));
            state.requests.push(request.clone());
            if let Some(message) = state.create_error.clone() {
                return Ok(OperationResult::failed(message));
            }
            state.next_id += 1;
            let id = format!("created-{}", state.next_id);
            let name = request.display_name().unwrap_or_default().to_owned();
            state
                .instances
                .push(CloudInstance::new(id.clone(), name, "PROVISIONING"));
            Ok(OperationResult::accepted(Some(format!("create-{id}"))))
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state
                .calls
                .push(GatewayCall::Terminate(instance_id.to_owned()));
            if let Some(err) = state.terminate_error.clone() {
                return Err(err);
            }
            state.instances.retain(|instance| instance.id != instance_id);
            Ok(OperationResult::accepted(Some(format!(
                "delete-{instance_id}"
            ))))
        })
    }
}

/// Key provider returning a fixed key, or none.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticKeyProvider {
    key: Option<SigningKey>,
}

impl StaticKeyProvider {
    /// Provider resolving a key with `fingerprint` and no private key file.
    #[must_use]
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            key: Some(SigningKey::new(fingerprint, None)),
        }
    }

    /// Provider that never resolves a key.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }
}

impl KeyProvider for StaticKeyProvider {
    fn resolve_signing_key(&self) -> Option<SigningKey> {
        self.key.clone()
    }
}

/// Registry whose registrar rejects every node.
#[derive(Clone, Debug)]
pub struct RejectingRegistry {
    reason: String,
}

impl RejectingRegistry {
    /// Creates a registry rejecting nodes with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl LiveWorkerLookup for RejectingRegistry {
    fn live_workers(&self) -> Vec<WorkerNode> {
        Vec::new()
    }
}

impl WorkerRegistrar for RejectingRegistry {
    fn register(
        &self,
        _instance: &CloudInstance,
        _template: &Template,
        _cloud_name: &str,
    ) -> Result<WorkerNode, RegistrationError> {
        Err(RegistrationError::Rejected {
            reason: self.reason.clone(),
        })
    }
}

/// Node-control call recorded by [`RecordingNodes`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeCall {
    /// `set_accepting_tasks`.
    AcceptingTasks(String, bool),
    /// `set_temporarily_offline` with the cause.
    Offline(String, String),
    /// `remove_node`.
    Remove(String),
}

/// [`InMemoryRegistry`] wrapper that records node-control calls.
#[derive(Clone, Debug, Default)]
pub struct RecordingNodes {
    registry: InMemoryRegistry,
    calls: Arc<StdMutex<Vec<NodeCall>>>,
}

impl RecordingNodes {
    /// Wraps `registry`.
    #[must_use]
    pub fn new(registry: InMemoryRegistry) -> Self {
        Self {
            registry,
            calls: Arc::default(),
        }
    }

    /// Wrapped registry.
    #[must_use]
    pub const fn registry(&self) -> &InMemoryRegistry {
        &self.registry
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<NodeCall> {
        lock(&self.calls).clone()
    }
}

impl NodeControl for RecordingNodes {
    fn node_exists(&self, instance_id: &str) -> bool {
        self.registry.node_exists(instance_id)
    }

    fn set_accepting_tasks(&self, instance_id: &str, accepting: bool) -> Result<(), RegistryError> {
        lock(&self.calls).push(NodeCall::AcceptingTasks(instance_id.to_owned(), accepting));
        self.registry.set_accepting_tasks(instance_id, accepting)
    }

    fn set_temporarily_offline(
        &self,
        instance_id: &str,
        cause: &str,
    ) -> Result<(), RegistryError> {
        lock(&self.calls).push(NodeCall::Offline(instance_id.to_owned(), cause.to_owned()));
        self.registry.set_temporarily_offline(instance_id, cause)
    }

    fn remove_node(&self, instance_id: &str) -> Result<(), RegistryError> {
        lock(&self.calls).push(NodeCall::Remove(instance_id.to_owned()));
        self.registry.remove_node(instance_id)
    }
}

/// Outcome a [`ScriptedLauncher`] produces for one attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchScript {
    /// The agent connects.
    Connect,
    /// The attempt fails with the given failure.
    Fail(LaunchFailure),
    /// The attempt never completes.
    Hang,
}

/// Launcher replaying scripted outcomes in FIFO order. Attempts beyond the
/// script connect.
#[derive(Clone, Debug, Default)]
pub struct ScriptedLauncher {
    script: Arc<StdMutex<VecDeque<LaunchScript>>>,
    attempts: Arc<StdMutex<Vec<String>>>,
}

impl ScriptedLauncher {
    /// Creates a launcher replaying `script`.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = LaunchScript>) -> Self {
        Self {
            script: Arc::new(StdMutex::new(script.into_iter().collect())),
            attempts: Arc::default(),
        }
    }

    /// Instance ids attempted so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }
}

impl Launchable for ScriptedLauncher {
    fn attempt_connect<'a>(&'a self, node: &'a WorkerNode) -> LaunchFuture<'a> {
        Box::pin(async move {
            lock(&self.attempts).push(node.instance_id.clone());
            let step = lock(&self.script)
                .pop_front()
                .unwrap_or(LaunchScript::Connect);
            match step {
                LaunchScript::Connect => Ok(Connected {
                    instance_id: node.instance_id.clone(),
                    address: None,
                }),
                LaunchScript::Fail(failure) => Err(failure),
                LaunchScript::Hang => std::future::pending().await,
            }
        })
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<CommandOutput>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes environment variables while holding the global mutex.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
