//! Configuration loading via `ortho-config`.
//!
//! Three layered structs share the `ycfleet.toml` discovery rules: the cloud
//! account ([`CloudConfig`]), the agent template ([`TemplateSettings`]), and
//! the launch strategy ([`LaunchConfig`]).

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::keys::{FileKeyProvider, expand_tilde};
use crate::provision::CloudContext;
use crate::template::TemplateError;

mod launch;
mod template;

pub use launch::LaunchConfig;
pub use template::TemplateSettings;

/// Zone used when none is configured.
pub const DEFAULT_ZONE: &str = "ru-central1-b";

/// Compute API root used when none is configured.
pub const DEFAULT_API_ENDPOINT: &str = "https://compute.api.cloud.yandex.net";

/// Cloud account settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "YC",
    discovery(
        app_name = "ycfleet",
        env_var = "YCFLEET_CONFIG_PATH",
        config_file_name = "ycfleet.toml",
        dotfile_name = ".ycfleet.toml",
        project_file_name = "ycfleet.toml"
    )
)]
pub struct CloudConfig {
    /// Account name. Every instance created for the account carries it as its
    /// display name, and listings filter on it.
    pub name: String,
    /// Folder that owns the instances.
    pub folder_id: String,
    /// Zone new instances are created in.
    #[ortho_config(default = DEFAULT_ZONE.to_owned())]
    pub zone: String,
    /// IAM token used as the bearer credential.
    pub iam_token: String,
    /// Compute API root URL.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Inline base create-instance request (JSON).
    pub init_vm_template: Option<String>,
    /// File holding the base create-instance request. Supports `~/`.
    pub init_vm_template_file: Option<String>,
    /// OpenSSH public key embedded in new instances. The base64 blob must end
    /// in `=` padding (for example RSA-4096); unpadded keys such as ed25519
    /// or RSA-2048 are rejected and provisioning fails with a credential
    /// error.
    #[ortho_config(default = "~/.ssh/id_rsa.pub".to_owned())]
    pub ssh_public_key_file: String,
    /// Private key used to log in to instances. When unset, `ssh` falls back
    /// to its default identities.
    pub ssh_private_key_file: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in ycfleet.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl CloudConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ycfleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::ConflictingTemplateSources`] when the base template
    /// is given both inline and by file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.name,
            &FieldMetadata::new("cloud name", "YC_NAME", "name", "cloud"),
        )?;
        require_field(
            &self.folder_id,
            &FieldMetadata::new("folder ID", "YC_FOLDER_ID", "folder_id", "cloud"),
        )?;
        require_field(
            &self.zone,
            &FieldMetadata::new("availability zone", "YC_ZONE", "zone", "cloud"),
        )?;
        require_field(
            &self.iam_token,
            &FieldMetadata::new("IAM token", "YC_IAM_TOKEN", "iam_token", "cloud"),
        )?;
        require_field(
            &self.api_endpoint,
            &FieldMetadata::new(
                "compute API endpoint",
                "YC_API_ENDPOINT",
                "api_endpoint",
                "cloud",
            ),
        )?;
        require_field(
            &self.ssh_public_key_file,
            &FieldMetadata::new(
                "SSH public key file",
                "YC_SSH_PUBLIC_KEY_FILE",
                "ssh_public_key_file",
                "cloud",
            ),
        )?;
        if self.init_vm_template.is_some() && self.init_vm_template_file.is_some() {
            return Err(ConfigError::ConflictingTemplateSources);
        }
        Ok(())
    }

    /// Resolves the base create-instance request text. Returns an empty
    /// string when neither source is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingTemplateSources`] when both sources
    /// are set, or [`ConfigError::TemplateFileRead`] when the file cannot be
    /// read.
    pub fn base_template(&self) -> Result<String, ConfigError> {
        match (
            self.init_vm_template.as_deref(),
            self.init_vm_template_file.as_deref(),
        ) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingTemplateSources),
            (Some(inline), None) => Ok(inline.to_owned()),
            (None, Some(file)) if file.trim().is_empty() => Ok(String::new()),
            (None, Some(file)) => {
                let expanded = expand_tilde(file);
                read_to_string_ambient(&expanded).map_err(|message| {
                    ConfigError::TemplateFileRead {
                        path: expanded.clone(),
                        message,
                    }
                })
            }
            (None, None) => Ok(String::new()),
        }
    }

    /// Builds the account settings a provisioner works against.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation or base template resolution
    /// fails.
    pub fn cloud_context(&self) -> Result<CloudContext, ConfigError> {
        self.validate()?;
        Ok(CloudContext {
            name: self.name.trim().to_owned(),
            folder_id: self.folder_id.trim().to_owned(),
            zone_id: self.zone.trim().to_owned(),
            base_template: self.base_template()?,
        })
    }

    /// Key provider reading the configured key files.
    #[must_use]
    pub fn key_provider(&self) -> FileKeyProvider {
        FileKeyProvider::new(
            self.ssh_public_key_file.clone(),
            self.ssh_private_key_file.clone(),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// The base template is configured both inline and by file.
    #[error("init_vm_template and init_vm_template_file are mutually exclusive")]
    ConflictingTemplateSources,
    /// The base template file could not be read.
    #[error("failed to read base template `{path}`: {message}")]
    TemplateFileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The agent template settings are invalid.
    #[error("invalid agent template: {0}")]
    Template(#[from] TemplateError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Reads a file through a capability handle on its parent directory.
pub(crate) fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
