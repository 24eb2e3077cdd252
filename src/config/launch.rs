//! SSH launch settings.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::{ConfigError, FieldMetadata, require_field};

/// Settings for connecting agents over SSH, loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "YCFLEET_LAUNCH",
    discovery(
        app_name = "ycfleet",
        env_var = "YCFLEET_CONFIG_PATH",
        config_file_name = "ycfleet.toml",
        dotfile_name = ".ycfleet.toml",
        project_file_name = "ycfleet.toml"
    )
)]
pub struct LaunchConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// SSH port on the instance.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; disabled by default because
    /// agent instances are recycled.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Command that starts the agent on the instance.
    #[ortho_config(default = String::new())]
    pub agent_command: String,
    /// Seconds a launch may take before the node is torn down.
    #[ortho_config(default = 600)]
    pub launch_timeout_secs: u64,
    /// Seconds between SSH port probes.
    #[ortho_config(default = 5)]
    pub ssh_poll_interval_secs: u64,
}

impl LaunchConfig {
    /// Loads launch configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ycfleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates launch configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// or zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.ssh_bin,
            &FieldMetadata::new("ssh binary", "YCFLEET_LAUNCH_SSH_BIN", "ssh_bin", "launch"),
        )?;
        require_field(
            &self.agent_command,
            &FieldMetadata::new(
                "agent command",
                "YCFLEET_LAUNCH_AGENT_COMMAND",
                "agent_command",
                "launch",
            ),
        )?;
        if self.launch_timeout_secs == 0 {
            return Err(ConfigError::MissingField(String::from(
                "launch timeout must be positive: set YCFLEET_LAUNCH_LAUNCH_TIMEOUT_SECS \
                 or add launch_timeout_secs to [launch] in ycfleet.toml",
            )));
        }
        Ok(())
    }

    /// Launch deadline as a [`Duration`].
    #[must_use]
    pub const fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Interval between SSH port probes, never below one second.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.ssh_poll_interval_secs.max(1))
    }
}
