//! BDD scenarios for provisioning reconciliation.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningWorld, provisioning_world};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reuse idle instances without creating"
)]
fn scenario_reuse_idle(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Wake a stopped instance before reusing it"
)]
fn scenario_wake_stopped(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Observe only when nothing is idle"
)]
fn scenario_observe_only(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Create a single instance for an empty cloud"
)]
fn scenario_create_single(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Respect a reached instance cap"
)]
fn scenario_cap_reached(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Refuse to provision without a signing key"
)]
fn scenario_missing_key(provisioning_world: ProvisioningWorld) {
    drop(provisioning_world);
}
