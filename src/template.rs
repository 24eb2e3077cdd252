//! Immutable instance-template configuration.
//!
//! A [`Template`] is only ever produced by [`TemplateBuilder::build`], which
//! parses the label expression, normalises the instance cap, and validates
//! every field up front. Consumers never observe a half-resolved template.

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use thiserror::Error;

/// Login used when the template does not name a remote administrator.
pub const DEFAULT_REMOTE_ADMIN: &str = "root";

const LABEL_OPERATORS: &[char] = &['&', '|', '!', '(', ')', '<', '>', '"', '\''];

/// Errors raised while validating template inputs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    /// A label atom contains an operator or quote character.
    #[error("invalid label atom '{atom}'")]
    InvalidLabel {
        /// Offending atom.
        atom: String,
    },
    /// The instance cap is not a non-negative integer.
    #[error("invalid instance cap '{value}': expected a non-negative integer or blank")]
    InvalidInstanceCap {
        /// Raw value supplied by the user.
        value: String,
    },
    /// The idle termination delay is not a non-negative integer.
    #[error("invalid idle termination minutes '{value}'")]
    InvalidIdleTermination {
        /// Raw value supplied by the user.
        value: String,
    },
    /// The scheduling mode is unknown.
    #[error("invalid node mode '{value}': expected NORMAL or EXCLUSIVE")]
    InvalidMode {
        /// Raw value supplied by the user.
        value: String,
    },
    /// A tag is not of the form `name=value`.
    #[error("invalid tag '{value}': expected name=value")]
    InvalidTag {
        /// Raw value supplied by the user.
        value: String,
    },
}

/// Scheduling mode copied onto worker nodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NodeMode {
    /// Use the node as much as possible.
    #[default]
    Normal,
    /// Only run jobs whose label expression matches the node.
    Exclusive,
}

impl NodeMode {
    /// Returns the configuration spelling of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Exclusive => "EXCLUSIVE",
        }
    }
}

impl FromStr for NodeMode {
    type Err = TemplateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "NORMAL" => Ok(Self::Normal),
            "EXCLUSIVE" => Ok(Self::Exclusive),
            _ => Err(TemplateError::InvalidMode {
                value: value.to_owned(),
            }),
        }
    }
}

/// Maximum number of concurrently bound instances for one template.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InstanceCap {
    /// No numeric cap is enforced.
    #[default]
    Unbounded,
    /// At most this many instances may be bound at once.
    Bounded(NonZeroU32),
}

impl InstanceCap {
    /// Returns `true` when another worker fits beside `bound` existing ones.
    #[must_use]
    pub fn admits(self, bound: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded(cap) => usize::try_from(cap.get()).map_or(true, |cap| bound < cap),
        }
    }

    /// Renders the cap the way it is written in configuration; unbounded is
    /// blank.
    #[must_use]
    pub fn as_config_str(self) -> String {
        match self {
            Self::Unbounded => String::new(),
            Self::Bounded(cap) => cap.to_string(),
        }
    }
}

impl From<u32> for InstanceCap {
    fn from(value: u32) -> Self {
        NonZeroU32::new(value).map_or(Self::Unbounded, Self::Bounded)
    }
}

impl FromStr for InstanceCap {
    type Err = TemplateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Self::Unbounded);
        }
        trimmed
            .parse::<u32>()
            .map(Self::from)
            .map_err(|_| TemplateError::InvalidInstanceCap {
                value: value.to_owned(),
            })
    }
}

/// Provider tag attached to a template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl FromStr for Tag {
    type Err = TemplateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || TemplateError::InvalidTag {
            value: value.to_owned(),
        };
        let (name, tag_value) = value.split_once('=').ok_or_else(invalid)?;
        let trimmed_name = name.trim();
        if trimmed_name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            name: trimmed_name.to_owned(),
            value: tag_value.trim().to_owned(),
        })
    }
}

/// Validated, immutable template configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    description: String,
    mode: NodeMode,
    label_string: String,
    labels: BTreeSet<String>,
    init_script: Option<String>,
    remote_admin: String,
    idle_termination_minutes: Option<u32>,
    stop_on_terminate: bool,
    tags: Vec<Tag>,
    instance_cap: InstanceCap,
}

impl Template {
    /// Starts a builder for a [`Template`].
    #[must_use]
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Scheduling mode.
    #[must_use]
    pub const fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Label expression as written by the user.
    #[must_use]
    pub fn label_string(&self) -> &str {
        &self.label_string
    }

    /// Parsed label atoms.
    #[must_use]
    pub const fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    /// Script run on the instance before the agent starts.
    #[must_use]
    pub fn init_script(&self) -> Option<&str> {
        self.init_script.as_deref()
    }

    /// Remote administrator as configured (possibly blank).
    #[must_use]
    pub fn remote_admin(&self) -> &str {
        &self.remote_admin
    }

    /// Remote administrator used for bootstrap and login, defaulting to
    /// [`DEFAULT_REMOTE_ADMIN`].
    #[must_use]
    pub fn effective_remote_admin(&self) -> &str {
        if self.remote_admin.is_empty() {
            DEFAULT_REMOTE_ADMIN
        } else {
            &self.remote_admin
        }
    }

    /// Minutes of idleness after which agents should be reclaimed.
    #[must_use]
    pub const fn idle_termination_minutes(&self) -> Option<u32> {
        self.idle_termination_minutes
    }

    /// Whether reclaimed agents are stopped rather than deleted.
    #[must_use]
    pub const fn stop_on_terminate(&self) -> bool {
        self.stop_on_terminate
    }

    /// Provider tags.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Effective instance cap.
    #[must_use]
    pub const fn instance_cap(&self) -> InstanceCap {
        self.instance_cap
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "template '{}' (labels: '{}')",
            self.description, self.label_string
        )
    }
}

/// Builder for [`Template`] that validates everything in [`Self::build`].
#[derive(Clone, Debug, Default)]
pub struct TemplateBuilder {
    description: String,
    mode: String,
    label_string: String,
    init_script: Option<String>,
    remote_admin: String,
    idle_termination_minutes: String,
    stop_on_terminate: bool,
    tags: Vec<String>,
    instance_cap: String,
}

impl TemplateBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }

    /// Sets the scheduling mode (`NORMAL` or `EXCLUSIVE`).
    #[must_use]
    pub fn mode(mut self, value: impl Into<String>) -> Self {
        self.mode = value.into();
        self
    }

    /// Sets the label expression.
    #[must_use]
    pub fn labels(mut self, value: impl Into<String>) -> Self {
        self.label_string = value.into();
        self
    }

    /// Sets the init script.
    #[must_use]
    pub fn init_script(mut self, value: Option<String>) -> Self {
        self.init_script = value;
        self
    }

    /// Sets the remote administrator login.
    #[must_use]
    pub fn remote_admin(mut self, value: impl Into<String>) -> Self {
        self.remote_admin = value.into();
        self
    }

    /// Sets the idle termination delay in minutes (blank for none).
    #[must_use]
    pub fn idle_termination_minutes(mut self, value: impl Into<String>) -> Self {
        self.idle_termination_minutes = value.into();
        self
    }

    /// Sets the stop-versus-delete reclamation policy.
    #[must_use]
    pub const fn stop_on_terminate(mut self, value: bool) -> Self {
        self.stop_on_terminate = value;
        self
    }

    /// Sets the tags, each as `name=value`.
    #[must_use]
    pub fn tags(mut self, values: Vec<String>) -> Self {
        self.tags = values;
        self
    }

    /// Sets the instance cap text (blank or `0` for unbounded).
    #[must_use]
    pub fn instance_cap(mut self, value: impl Into<String>) -> Self {
        self.instance_cap = value.into();
        self
    }

    /// Validates the inputs and builds the [`Template`].
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when any field fails to parse.
    pub fn build(self) -> Result<Template, TemplateError> {
        let label_string = self.label_string.trim().to_owned();
        let labels = parse_labels(&label_string)?;
        let idle = self.idle_termination_minutes.trim();
        let idle_termination_minutes = if idle.is_empty() {
            None
        } else {
            Some(
                idle.parse::<u32>()
                    .map_err(|_| TemplateError::InvalidIdleTermination {
                        value: self.idle_termination_minutes.clone(),
                    })?,
            )
        };
        let tags = self
            .tags
            .iter()
            .map(|raw| raw.parse::<Tag>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Template {
            description: self.description.trim().to_owned(),
            mode: self.mode.parse()?,
            label_string,
            labels,
            init_script: self
                .init_script
                .filter(|script| !script.trim().is_empty()),
            remote_admin: self.remote_admin.trim().to_owned(),
            idle_termination_minutes,
            stop_on_terminate: self.stop_on_terminate,
            tags,
            instance_cap: self.instance_cap.parse()?,
        })
    }
}

fn parse_labels(expression: &str) -> Result<BTreeSet<String>, TemplateError> {
    expression
        .split_whitespace()
        .map(|atom| {
            if atom.contains(LABEL_OPERATORS) {
                Err(TemplateError::InvalidLabel {
                    atom: atom.to_owned(),
                })
            } else {
                Ok(atom.to_owned())
            }
        })
        .collect()
}
