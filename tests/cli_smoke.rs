//! Smoke tests for the `ycfleet` CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

const CLOUD_VARS: [&str; 9] = [
    "YC_NAME",
    "YC_FOLDER_ID",
    "YC_ZONE",
    "YC_IAM_TOKEN",
    "YC_API_ENDPOINT",
    "YC_INIT_VM_TEMPLATE",
    "YC_INIT_VM_TEMPLATE_FILE",
    "YC_SSH_PUBLIC_KEY_FILE",
    "YCFLEET_CONFIG_PATH",
];

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("ycfleet");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(contains("provision").and(contains("orphans")));
}

#[test]
fn orphans_help_describes_the_account_filter_listing() {
    let mut cmd = cargo_bin_cmd!("ycfleet");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(contains("List instances under the account filter"))
        .stdout(contains("not backing a live worker").not());
}

#[test]
fn no_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("ycfleet");

    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn conflicting_create_flags_are_rejected() {
    let mut cmd = cargo_bin_cmd!("ycfleet");
    cmd.args(["provision", "--allow-create", "--force-create"]);

    cmd.assert().failure().stderr(contains("cannot be used with"));
}

#[test]
fn provision_without_configuration_reports_configuration_error() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("create temp home: {err}"));
    let mut cmd = cargo_bin_cmd!("ycfleet");
    for var in CLOUD_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .current_dir(home.path())
        .args(["provision", "--count", "1"]);

    cmd.assert()
        .code(1)
        .stderr(contains("configuration error"));
}
