//! Wire types for the Yandex Compute REST API.

use serde::Deserialize;

use crate::gateway::OperationResult;
use crate::instance::{CloudInstance, NetworkInterface};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListInstancesResponse {
    #[serde(default)]
    pub(super) instances: Vec<InstanceWire>,
    #[serde(default)]
    pub(super) next_page_token: Option<String>,
}

impl ListInstancesResponse {
    /// Token for the next page, when the listing continues.
    pub(super) fn next_page(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceWire {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterfaceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceWire {
    #[serde(default)]
    primary_v4_address: Option<AddressWire>,
}

#[derive(Debug, Deserialize)]
struct AddressWire {
    #[serde(default)]
    address: Option<String>,
}

impl From<InstanceWire> for CloudInstance {
    fn from(wire: InstanceWire) -> Self {
        wire.network_interfaces.into_iter().fold(
            Self::new(wire.id, wire.name, wire.status),
            |instance, nic| {
                instance.with_interface(NetworkInterface {
                    primary_v4_address: nic.primary_v4_address.and_then(|addr| addr.address),
                })
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OperationWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<StatusWire>,
}

#[derive(Debug, Deserialize)]
struct StatusWire {
    #[serde(default)]
    message: Option<String>,
}

impl From<OperationWire> for OperationResult {
    fn from(wire: OperationWire) -> Self {
        Self {
            id: wire.id,
            error: wire.error.and_then(|status| status.message),
        }
    }
}
