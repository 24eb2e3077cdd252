//! BDD scenarios for launch supervision.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LaunchWorld, launch_world};

#[scenario(path = "tests/features/launch.feature", name = "Agent connects")]
fn scenario_agent_connects(launch_world: LaunchWorld) {
    drop(launch_world);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Failed bootstrap terminates the instance"
)]
fn scenario_failed_bootstrap(launch_world: LaunchWorld) {
    drop(launch_world);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "A silent agent times out"
)]
fn scenario_silent_agent(launch_world: LaunchWorld) {
    drop(launch_world);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Terminate failure keeps the worker offline"
)]
fn scenario_terminate_failure(launch_world: LaunchWorld) {
    drop(launch_world);
}
