//! Binary entry point for the `ycfleet` CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use ycfleet::dispatch::DEFAULT_MAILBOX;
use ycfleet::logging;
use ycfleet::orphan::classify;
use ycfleet::{
    CloudConfig, CloudGateway, CloudInstance, ConfigError, DispatchError, GatewayError,
    InMemoryRegistry, KeyProvider, LaunchConfig, LaunchOutcome, LaunchSupervisor,
    LiveWorkerLookup, ProvisionOption, ProvisionOptions, Provisioner, SshLauncher,
    TemplateSettings, TemplateWorker, WorkerNode, YandexGateway,
};

use cli::{Cli, OrphansCommand, ProvisionCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cloud error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("provisioning failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, io::stdout()).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli, out: impl Write) -> Result<i32, CliError> {
    match cli {
        Cli::Provision(command) => run_provision(&command, out).await,
        Cli::Orphans(command) => run_orphans(&command, out).await,
    }
}

async fn run_provision(args: &ProvisionCommand, mut out: impl Write) -> Result<i32, CliError> {
    let cloud = CloudConfig::load_without_cli_args()?;
    let context = cloud.cloud_context()?;
    let template = TemplateSettings::load_without_cli_args()?
        .to_template()
        .map_err(ConfigError::from)?;
    let launch = LaunchConfig::load_without_cli_args()?;
    let gateway = YandexGateway::from_config(&cloud)?;
    let keys = cloud.key_provider();
    let identity = keys
        .resolve_signing_key()
        .and_then(|key| key.private_key_path().cloned());
    let launcher = SshLauncher::with_process_runner(gateway.clone(), launch.clone())?
        .with_identity_file(identity);

    let registry = InMemoryRegistry::new();
    let provisioner = Provisioner::new(
        gateway.clone(),
        keys,
        registry.clone(),
        template,
        context,
    );
    let (handle, worker) = TemplateWorker::spawn(provisioner, DEFAULT_MAILBOX);
    let result = handle
        .provision(args.count, provision_options(args))
        .await;
    drop(handle);
    worker.await.ok();

    let Some(nodes) = result? else {
        writeln!(out, "no instance available")?;
        return Ok(0);
    };

    let supervisor = LaunchSupervisor::new(gateway, registry, launch.launch_timeout());
    let mut outcomes = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let outcome = supervisor.launch(node, &launcher).await;
        outcomes.push((node.clone(), outcome));
    }
    write_outcomes(&mut out, &outcomes)?;
    Ok(exit_code_for(&outcomes))
}

async fn run_orphans(args: &OrphansCommand, mut out: impl Write) -> Result<i32, CliError> {
    let cloud = CloudConfig::load_without_cli_args()?;
    let context = cloud.cloud_context()?;
    let gateway = YandexGateway::from_config(&cloud)?;
    let snapshot = gateway.list_instances(&context.filter()).await?;
    // A fresh process knows no live workers, so every listed instance is idle.
    let live = InMemoryRegistry::new().live_workers();
    let orphans = classify(&snapshot, &live, args.limit.unwrap_or(usize::MAX));
    info!(cloud = %context.name, count = orphans.len(), "orphan instances listed");
    write_orphans(&mut out, &orphans)?;
    Ok(0)
}

fn provision_options(args: &ProvisionCommand) -> ProvisionOptions {
    let mut options = ProvisionOptions::reuse_only();
    if args.allow_create {
        options = options.with(ProvisionOption::AllowCreate);
    }
    if args.force_create {
        options = options.with(ProvisionOption::ForceCreate);
    }
    options
}

const fn outcome_label(outcome: &LaunchOutcome) -> &'static str {
    match outcome {
        LaunchOutcome::Connected(_) => "connected",
        LaunchOutcome::Terminated { .. } => "terminated",
        LaunchOutcome::CleanupFailed { .. } => "cleanup-failed",
    }
}

fn write_outcomes(
    out: &mut impl Write,
    outcomes: &[(WorkerNode, LaunchOutcome)],
) -> io::Result<()> {
    for (node, outcome) in outcomes {
        writeln!(out, "{} {}", node.instance_id, outcome_label(outcome))?;
    }
    Ok(())
}

fn exit_code_for(outcomes: &[(WorkerNode, LaunchOutcome)]) -> i32 {
    i32::from(!outcomes.iter().all(|(_, outcome)| outcome.is_connected()))
}

fn write_orphans(out: &mut impl Write, orphans: &[CloudInstance]) -> io::Result<()> {
    for instance in orphans {
        writeln!(out, "{}\t{}\t{}", instance.id, instance.name, instance.status)?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use ycfleet::supervisor::Connected;
    use ycfleet::{LaunchFailure, Template};

    use super::*;

    fn node(id: &str) -> WorkerNode {
        let template = Template::builder().build().expect("template should build");
        WorkerNode::from_instance(&CloudInstance::new(id, "ci-agents", "RUNNING"), &template, "ci")
    }

    fn connected(id: &str) -> LaunchOutcome {
        LaunchOutcome::Connected(Connected {
            instance_id: id.to_owned(),
            address: None,
        })
    }

    fn terminated() -> LaunchOutcome {
        LaunchOutcome::Terminated {
            failure: LaunchFailure::Transport(String::from("refused")),
        }
    }

    #[rstest]
    #[case(false, false, false)]
    #[case(true, false, true)]
    #[case(false, true, true)]
    fn flags_map_to_options(
        #[case] allow_create: bool,
        #[case] force_create: bool,
        #[case] permits_create: bool,
    ) {
        let options = provision_options(&ProvisionCommand {
            count: 1,
            allow_create,
            force_create,
        });

        assert_eq!(options.permits_create(), permits_create);
        assert_eq!(options.contains(ProvisionOption::ForceCreate), force_create);
    }

    #[test]
    fn allow_and_force_are_mutually_exclusive() {
        let parsed = Cli::try_parse_from([
            "ycfleet",
            "provision",
            "--allow-create",
            "--force-create",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn count_defaults_to_one() {
        let parsed = Cli::try_parse_from(["ycfleet", "provision"]).expect("parses");
        assert!(matches!(parsed, Cli::Provision(ProvisionCommand { count: 1, .. })));
    }

    #[test]
    fn outcomes_render_one_line_per_node() {
        let outcomes = vec![
            (node("i-1"), connected("i-1")),
            (node("i-2"), terminated()),
            (
                node("i-3"),
                LaunchOutcome::CleanupFailed {
                    failure: LaunchFailure::Transport(String::from("refused")),
                    cleanup: String::from("quota"),
                },
            ),
        ];
        let mut buf = Vec::new();

        write_outcomes(&mut buf, &outcomes).expect("write");

        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "i-1 connected\ni-2 terminated\ni-3 cleanup-failed\n"
        );
    }

    #[test]
    fn exit_code_is_zero_only_when_every_node_connected() {
        assert_eq!(exit_code_for(&[(node("i-1"), connected("i-1"))]), 0);
        assert_eq!(
            exit_code_for(&[(node("i-1"), connected("i-1")), (node("i-2"), terminated())]),
            1
        );
    }

    #[test]
    fn orphans_render_id_name_and_status() {
        let mut buf = Vec::new();

        write_orphans(&mut buf, &[CloudInstance::new("i-9", "ci-agents", "STOPPED")])
            .expect("write");

        assert_eq!(String::from_utf8(buf).expect("utf8"), "i-9\tci-agents\tSTOPPED\n");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Dispatch(DispatchError::Stopped));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.starts_with("provisioning failed:"), "rendered: {rendered}");
    }
}
