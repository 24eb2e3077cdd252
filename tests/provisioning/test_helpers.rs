//! Shared fixtures for provisioning scenarios.

use std::cell::RefCell;

use rstest::fixture;
use ycfleet::provision::{CloudContext, ProvisionError, Provisioner};
use ycfleet::test_support::{FakeGateway, StaticKeyProvider};
use ycfleet::{InMemoryRegistry, Template, TemplateError, WorkerNode};

pub const CLOUD_NAME: &str = "ci-agents";
const FINGERPRINT: &str = "ssh-rsa AAAAB3NzaC1yc2E";

pub type ProvisionResult = Result<Option<Vec<WorkerNode>>, ProvisionError>;

/// Cloud, host, and the last reconciliation result for one scenario.
#[derive(Debug)]
pub struct ProvisioningWorld {
    pub gateway: RefCell<FakeGateway>,
    pub registry: InMemoryRegistry,
    pub keys: RefCell<StaticKeyProvider>,
    pub instance_cap: RefCell<String>,
    pub outcome: RefCell<Option<ProvisionResult>>,
}

impl ProvisioningWorld {
    pub fn gateway(&self) -> FakeGateway {
        self.gateway.borrow().clone()
    }

    pub fn template(&self) -> Result<Template, TemplateError> {
        Template::builder()
            .description("linux builders")
            .labels("linux")
            .remote_admin("builder")
            .instance_cap(self.instance_cap.borrow().clone())
            .build()
    }

    pub fn provisioner(
        &self,
    ) -> Result<Provisioner<FakeGateway, StaticKeyProvider, InMemoryRegistry>, TemplateError> {
        Ok(Provisioner::new(
            self.gateway(),
            self.keys.borrow().clone(),
            self.registry.clone(),
            self.template()?,
            cloud(),
        ))
    }
}

pub fn cloud() -> CloudContext {
    CloudContext {
        name: String::from(CLOUD_NAME),
        folder_id: String::from("b1gfolder"),
        zone_id: String::from("ru-central1-b"),
        base_template: String::from(r#"{"platformId":"standard-v3"}"#),
    }
}

#[fixture]
pub fn provisioning_world() -> ProvisioningWorld {
    ProvisioningWorld {
        gateway: RefCell::new(FakeGateway::new()),
        registry: InMemoryRegistry::new(),
        keys: RefCell::new(StaticKeyProvider::with_fingerprint(FINGERPRINT)),
        instance_cap: RefCell::new(String::new()),
        outcome: RefCell::new(None),
    }
}
