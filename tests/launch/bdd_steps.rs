//! BDD step definitions for launch supervision.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use ycfleet::supervisor::OFFLINE_CAUSE;
use ycfleet::test_support::{LaunchScript, ScriptedLauncher};
use ycfleet::{
    GatewayError, LaunchFailure, LaunchOutcome, LaunchSupervisor, NodeControl, WorkerNode,
};

use super::test_helpers::{INSTANCE_ID, LaunchWorld};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a registered worker on a running instance")]
fn registered_worker(launch_world: &LaunchWorld) {
    let node = WorkerNode::from_instance(
        &LaunchWorld::instance(),
        &LaunchWorld::template(),
        "ci-agents",
    );
    launch_world.nodes.registry().insert(node.clone());
    *launch_world.node.borrow_mut() = Some(node);
}

#[given("the agent connects")]
fn agent_connects(launch_world: &LaunchWorld) {
    *launch_world.launcher.borrow_mut() = ScriptedLauncher::new([LaunchScript::Connect]);
}

#[given("the agent exits with status {code}")]
fn agent_exits(launch_world: &LaunchWorld, code: i32) {
    *launch_world.launcher.borrow_mut() =
        ScriptedLauncher::new([LaunchScript::Fail(LaunchFailure::Bootstrap {
            step: String::from("agent"),
            code: Some(code),
            stderr: String::from("agent exited"),
        })]);
}

#[given("the agent never answers")]
fn agent_hangs(launch_world: &LaunchWorld) {
    *launch_world.launcher.borrow_mut() = ScriptedLauncher::new([LaunchScript::Hang]);
    launch_world.launch_timeout.set(Duration::from_millis(50));
}

#[given("the cloud refuses to terminate instances")]
fn terminate_refused(launch_world: &LaunchWorld) {
    launch_world
        .gateway
        .fail_terminations_with(GatewayError::Provider {
            status: 403,
            message: String::from("permission denied"),
        });
}

#[when("the supervisor launches the worker")]
fn launch_worker(launch_world: &LaunchWorld) -> Result<(), StepError> {
    let node = launch_world
        .node
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no worker registered")))?;
    let launcher = launch_world.launcher.borrow().clone();
    let supervisor = LaunchSupervisor::new(
        launch_world.gateway.clone(),
        launch_world.nodes.clone(),
        launch_world.launch_timeout.get(),
    );
    let runtime = Runtime::new()?;
    let outcome = runtime.block_on(async move { supervisor.launch(&node, &launcher).await });
    *launch_world.outcome.borrow_mut() = Some(outcome);
    Ok(())
}

fn outcome(launch_world: &LaunchWorld) -> Result<LaunchOutcome, StepError> {
    launch_world
        .outcome
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("the worker was never launched")))
}

#[then("the worker ends {state}")]
fn worker_ends(launch_world: &LaunchWorld, state: String) -> Result<(), StepError> {
    let actual = outcome(launch_world)?.state();
    if actual.as_str() == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected {state}, got {actual}")))
    }
}

#[then("no instance is terminated")]
fn nothing_terminated(launch_world: &LaunchWorld) -> Result<(), StepError> {
    let terminated = launch_world.gateway.terminated();
    if terminated.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected terminations: {terminated:?}")))
    }
}

#[then("the instance is terminated")]
fn instance_terminated(launch_world: &LaunchWorld) -> Result<(), StepError> {
    let terminated = launch_world.gateway.terminated();
    if terminated == vec![String::from(INSTANCE_ID)] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected terminations: {terminated:?}")))
    }
}

#[then("the worker is removed from the host")]
fn worker_removed(launch_world: &LaunchWorld) -> Result<(), StepError> {
    if launch_world.nodes.registry().node_exists(INSTANCE_ID) {
        Err(StepError::Assertion(String::from("worker should be removed")))
    } else {
        Ok(())
    }
}

#[then("the failure reports a timeout")]
fn failure_is_timeout(launch_world: &LaunchWorld) -> Result<(), StepError> {
    match outcome(launch_world)? {
        LaunchOutcome::Terminated {
            failure: LaunchFailure::Timeout { .. },
        } => Ok(()),
        other => Err(StepError::Assertion(format!("expected a timeout, got {other:?}"))),
    }
}

#[then("the worker stays offline with cause \"{cause}\"")]
fn worker_offline(launch_world: &LaunchWorld, cause: String) -> Result<(), StepError> {
    let status = launch_world
        .nodes
        .registry()
        .status(INSTANCE_ID)
        .ok_or_else(|| StepError::Assertion(String::from("worker should remain registered")))?;
    if status.accepting_tasks {
        return Err(StepError::Assertion(String::from(
            "worker should not accept tasks",
        )));
    }
    if cause != OFFLINE_CAUSE || status.offline_cause.as_deref() != Some(cause.as_str()) {
        return Err(StepError::Assertion(format!(
            "unexpected offline cause: {:?}",
            status.offline_cause
        )));
    }
    Ok(())
}
