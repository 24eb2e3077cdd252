//! Raw agent template inputs.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::ConfigError;
use crate::template::{Template, TemplateError};

/// Agent template inputs layered via `OrthoConfig`.
///
/// Values stay as text so that [`TemplateSettings::to_template`] can report
/// every parse failure through the validating constructor.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "YC_TEMPLATE",
    discovery(
        app_name = "ycfleet",
        env_var = "YCFLEET_CONFIG_PATH",
        config_file_name = "ycfleet.toml",
        dotfile_name = ".ycfleet.toml",
        project_file_name = "ycfleet.toml"
    )
)]
pub struct TemplateSettings {
    /// Human-readable description.
    #[ortho_config(default = String::new())]
    pub description: String,
    /// `NORMAL` or `EXCLUSIVE`.
    #[ortho_config(default = "NORMAL".to_owned())]
    pub mode: String,
    /// Whitespace-separated label atoms.
    #[ortho_config(default = String::new())]
    pub labels: String,
    /// Script run on the instance before the agent starts.
    pub init_script: Option<String>,
    /// Login for the agent connection; blank means `root`.
    #[ortho_config(default = String::new())]
    pub remote_admin: String,
    /// Idle reclamation delay in minutes; blank disables it.
    #[ortho_config(default = String::new())]
    pub idle_termination_minutes: String,
    /// Stop instead of delete when an idle instance is reclaimed.
    #[ortho_config(default = false)]
    pub stop_on_terminate: bool,
    /// Comma-separated `name=value` tags.
    pub tags: Option<String>,
    /// Maximum bound instances; blank or `0` means unbounded.
    #[ortho_config(default = String::new())]
    pub instance_cap: String,
}

impl TemplateSettings {
    /// Loads template settings without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ycfleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the immutable [`Template`].
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when any value fails to parse.
    pub fn to_template(&self) -> Result<Template, TemplateError> {
        let tags = self
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Template::builder()
            .description(&self.description)
            .mode(&self.mode)
            .labels(&self.labels)
            .init_script(self.init_script.clone())
            .remote_admin(&self.remote_admin)
            .idle_termination_minutes(&self.idle_termination_minutes)
            .stop_on_terminate(self.stop_on_terminate)
            .tags(tags)
            .instance_cap(&self.instance_cap)
            .build()
    }
}
