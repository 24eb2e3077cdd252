//! Transient snapshots of cloud instances as reported by the provider.
//!
//! The cloud owns these resources; the crate only ever holds a possibly stale
//! copy obtained from the most recent listing.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Lifecycle status reported for a cloud instance.
///
/// Only `RUNNING` and `STOPPED` carry meaning for reconciliation; every other
/// provider state is preserved verbatim and treated opaquely.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum InstanceStatus {
    /// The instance is booted and billable.
    Running,
    /// The instance is powered off and may be started again.
    Stopped,
    /// Any other provider state (for example `PROVISIONING` or `STOPPING`).
    Other(String),
}

impl InstanceStatus {
    /// Returns the provider spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Returns `true` when the instance is powered off.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl From<&str> for InstanceStatus {
    fn from(value: &str) -> Self {
        match value.trim() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network interface attached to an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkInterface {
    /// Primary internal IPv4 address, when the provider has assigned one.
    pub primary_v4_address: Option<String>,
}

impl NetworkInterface {
    /// Creates an interface with the given primary IPv4 address.
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            primary_v4_address: Some(address.into()),
        }
    }
}

/// Snapshot of a single cloud instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudInstance {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle status at the time of the listing.
    pub status: InstanceStatus,
    /// Network interfaces in provider order.
    pub network_interfaces: Vec<NetworkInterface>,
}

impl CloudInstance {
    /// Creates a snapshot without network interfaces.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        status: impl Into<InstanceStatus>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: status.into(),
            network_interfaces: Vec::new(),
        }
    }

    /// Appends a network interface.
    #[must_use]
    pub fn with_interface(mut self, interface: NetworkInterface) -> Self {
        self.network_interfaces.push(interface);
        self
    }

    /// Primary IPv4 address of the first network interface.
    ///
    /// Returns `None` when the instance has no interfaces or the first one
    /// carries no parseable address.
    #[must_use]
    pub fn primary_v4_address(&self) -> Option<IpAddr> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.primary_v4_address.as_deref())
            .and_then(|raw| IpAddr::from_str(raw.trim()).ok())
    }
}
