//! BDD step definitions for provisioning reconciliation.

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use ycfleet::provision::{ProvisionError, ProvisionOption, ProvisionOptions};
use ycfleet::test_support::{FakeGateway, GatewayCall, StaticKeyProvider};
use ycfleet::{CloudInstance, LiveWorkerLookup, TemplateError, WorkerNode};

use super::test_helpers::{CLOUD_NAME, ProvisioningWorld};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an empty cloud")]
fn empty_cloud(provisioning_world: &ProvisioningWorld) {
    *provisioning_world.gateway.borrow_mut() = FakeGateway::new();
}

#[given("a cloud with {count} idle running instances")]
fn idle_running_instances(provisioning_world: &ProvisioningWorld, count: usize) {
    let instances = (1..=count)
        .map(|n| CloudInstance::new(format!("i-{n}"), CLOUD_NAME, "RUNNING"))
        .collect();
    *provisioning_world.gateway.borrow_mut() = FakeGateway::with_instances(instances);
}

#[given("a cloud with a stopped instance")]
fn stopped_instance(provisioning_world: &ProvisioningWorld) {
    *provisioning_world.gateway.borrow_mut() =
        FakeGateway::with_instances(vec![CloudInstance::new("i-stopped", CLOUD_NAME, "STOPPED")]);
}

#[given("the template is capped at {cap} instance")]
fn capped_template(provisioning_world: &ProvisioningWorld, cap: u32) {
    *provisioning_world.instance_cap.borrow_mut() = cap.to_string();
}

#[given("a cloud with an instance bound to a live worker")]
fn bound_instance(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    let instance = CloudInstance::new("i-busy", CLOUD_NAME, "RUNNING");
    let template = provisioning_world.template()?;
    provisioning_world
        .registry
        .insert(WorkerNode::from_instance(&instance, &template, CLOUD_NAME));
    *provisioning_world.gateway.borrow_mut() = FakeGateway::with_instances(vec![instance]);
    Ok(())
}

#[given("no signing key is configured")]
fn no_signing_key(provisioning_world: &ProvisioningWorld) {
    *provisioning_world.keys.borrow_mut() = StaticKeyProvider::absent();
}

fn request(
    provisioning_world: &ProvisioningWorld,
    count: usize,
    options: ProvisionOptions,
) -> Result<(), StepError> {
    let runtime = Runtime::new()?;
    let provisioner = provisioning_world.provisioner()?;
    let result = runtime.block_on(async move { provisioner.provision(count, options).await });
    *provisioning_world.outcome.borrow_mut() = Some(result);
    Ok(())
}

#[when("{count} workers are requested without creation")]
fn request_without_creation(
    provisioning_world: &ProvisioningWorld,
    count: usize,
) -> Result<(), StepError> {
    request(provisioning_world, count, ProvisionOptions::reuse_only())
}

#[when("{count} workers are requested with creation allowed")]
fn request_with_creation(
    provisioning_world: &ProvisioningWorld,
    count: usize,
) -> Result<(), StepError> {
    request(
        provisioning_world,
        count,
        ProvisionOptions::reuse_only().with(ProvisionOption::AllowCreate),
    )
}

fn returned_nodes(provisioning_world: &ProvisioningWorld) -> Result<Vec<WorkerNode>, StepError> {
    match provisioning_world.outcome.borrow().clone() {
        Some(Ok(Some(nodes))) => Ok(nodes),
        other => Err(StepError::Assertion(format!(
            "expected registered workers, got {other:?}"
        ))),
    }
}

#[then("{count} worker is registered")]
fn workers_registered(provisioning_world: &ProvisioningWorld, count: usize) -> Result<(), StepError> {
    let nodes = returned_nodes(provisioning_world)?;
    if nodes.len() != count {
        return Err(StepError::Assertion(format!(
            "expected {count} workers, got {}",
            nodes.len()
        )));
    }
    let live = provisioning_world.registry.live_workers();
    if nodes.iter().all(|node| live.contains(node)) {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "returned workers should be known to the host",
        )))
    }
}

#[then("no worker is returned")]
fn no_worker_returned(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    match provisioning_world.outcome.borrow().as_ref() {
        Some(Ok(None)) => Ok(()),
        other => Err(StepError::Assertion(format!("expected no worker, got {other:?}"))),
    }
}

#[then("no instance is created")]
fn no_instance_created(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    let created = provisioning_world.gateway().create_count();
    if created == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected no creates, saw {created}")))
    }
}

#[then("exactly one instance is created")]
fn one_instance_created(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    let created = provisioning_world.gateway().create_count();
    if created == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected one create, saw {created}")))
    }
}

#[then("the stopped instance is started")]
fn stopped_instance_started(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    let started = provisioning_world.gateway().started();
    if started == vec![String::from("i-stopped")] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected starts: {started:?}")))
    }
}

#[then("the cloud was only listed")]
fn cloud_only_listed(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    let calls = provisioning_world.gateway().calls();
    if calls.iter().all(|call| matches!(call, GatewayCall::List(_))) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected calls: {calls:?}")))
    }
}

#[then("provisioning fails for lack of credentials")]
fn fails_for_credentials(provisioning_world: &ProvisioningWorld) -> Result<(), StepError> {
    match provisioning_world.outcome.borrow().as_ref() {
        Some(Err(ProvisionError::Credential)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a credential error, got {other:?}"
        ))),
    }
}
