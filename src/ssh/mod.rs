//! SSH launch strategy: resolve the instance address, wait for the SSH port,
//! then run the init script and the agent command as the node's remote
//! administrator.

use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::config::{ConfigError, LaunchConfig};
use crate::gateway::CloudGateway;
use crate::keys::expand_tilde;
use crate::registry::WorkerNode;
use crate::supervisor::{Connected, LaunchFailure, LaunchFuture, Launchable};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects agents by running commands over the system `ssh` client.
#[derive(Debug)]
pub struct SshLauncher<G, R> {
    gateway: G,
    runner: Arc<R>,
    config: LaunchConfig,
    identity_file: Option<Utf8PathBuf>,
}

impl<G: CloudGateway> SshLauncher<G, ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn with_process_runner(gateway: G, config: LaunchConfig) -> Result<Self, ConfigError> {
        Self::new(gateway, ProcessCommandRunner, config)
    }
}

impl<G, R> SshLauncher<G, R>
where
    G: CloudGateway,
    R: CommandRunner + 'static,
{
    /// Creates a launcher using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn new(gateway: G, runner: R, config: LaunchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gateway,
            runner: Arc::new(runner),
            config,
            identity_file: None,
        })
    }

    /// Uses `path` as the SSH identity. Supports `~/`.
    #[must_use]
    pub fn with_identity_file(mut self, path: Option<Utf8PathBuf>) -> Self {
        self.identity_file = path.map(|file| Utf8PathBuf::from(expand_tilde(file.as_str())));
        self
    }

    async fn resolve_address(&self, node: &WorkerNode) -> Result<IpAddr, LaunchFailure> {
        let no_address = || LaunchFailure::NoAddress {
            instance_id: node.instance_id.clone(),
        };
        let instance = self
            .gateway
            .get_instance(&node.instance_id)
            .await
            .map_err(|err| LaunchFailure::Transport(err.to_string()))?
            .ok_or_else(no_address)?;
        instance.primary_v4_address().ok_or_else(no_address)
    }

    /// Polls until the SSH port accepts connections. The supervisor bounds
    /// the wait with the launch deadline.
    async fn wait_for_ssh_ready(&self, address: IpAddr) {
        let addr = (address, self.config.ssh_port);
        loop {
            let connect = timeout(SSH_CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
            if matches!(connect, Ok(Ok(_))) {
                return;
            }
            debug!(%address, port = self.config.ssh_port, "ssh port not ready");
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn run_step(
        &self,
        step: &str,
        node: &WorkerNode,
        address: IpAddr,
        remote_command: &str,
    ) -> Result<(), LaunchFailure> {
        let args = self.build_ssh_args(&node.remote_admin, address, remote_command);
        let program = self.config.ssh_bin.clone();
        let runner = Arc::clone(&self.runner);
        debug!(instance_id = %node.instance_id, step, "running bootstrap step");
        let output: CommandOutput =
            tokio::task::spawn_blocking(move || runner.run(&program, &args))
                .await
                .map_err(|err| LaunchFailure::Transport(err.to_string()))?
                .map_err(|err| LaunchFailure::Transport(err.to_string()))?;
        if output.is_success() {
            return Ok(());
        }
        Err(LaunchFailure::Bootstrap {
            step: step.to_owned(),
            code: output.code,
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn build_ssh_args(&self, user: &str, address: IpAddr, remote_command: &str) -> Vec<OsString> {
        let mut args = self.common_ssh_options();
        args.push(OsString::from(format!("{user}@{address}")));
        args.push(OsString::from(remote_command));
        args
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.ssh_port.to_string()),
        ];

        if let Some(ref identity_file) = self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(identity_file.as_str()));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }
}

/// Wraps a multi-line script so the remote login shell runs it with `sh`.
fn init_script_command(script: &str) -> String {
    format!("sh -c {}", shell_escape::unix::escape(script.into()))
}

impl<G, R> Launchable for SshLauncher<G, R>
where
    G: CloudGateway,
    R: CommandRunner + 'static,
{
    fn attempt_connect<'a>(&'a self, node: &'a WorkerNode) -> LaunchFuture<'a> {
        Box::pin(async move {
            let address = self.resolve_address(node).await?;
            self.wait_for_ssh_ready(address).await;
            if let Some(script) = node.init_script.as_deref() {
                self.run_step("init script", node, address, &init_script_command(script))
                    .await?;
            }
            self.run_step("agent", node, address, &self.config.agent_command)
                .await?;
            info!(instance_id = %node.instance_id, %address, "agent started over ssh");
            Ok(Connected {
                instance_id: node.instance_id.clone(),
                address: Some(address),
            })
        })
    }
}
