//! Shared fixtures for launch supervision scenarios.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use rstest::fixture;
use ycfleet::test_support::{FakeGateway, RecordingNodes, ScriptedLauncher};
use ycfleet::{CloudInstance, InMemoryRegistry, LaunchOutcome, Template, WorkerNode};

pub const INSTANCE_ID: &str = "i-1";

#[derive(Debug)]
pub struct LaunchWorld {
    pub gateway: FakeGateway,
    pub nodes: RecordingNodes,
    pub launcher: RefCell<ScriptedLauncher>,
    pub launch_timeout: Cell<Duration>,
    pub node: RefCell<Option<WorkerNode>>,
    pub outcome: RefCell<Option<LaunchOutcome>>,
}

impl LaunchWorld {
    pub fn instance() -> CloudInstance {
        CloudInstance::new(INSTANCE_ID, "ci-agents", "RUNNING")
    }

    pub fn template() -> Template {
        Template::builder()
            .remote_admin("builder")
            .build()
            .unwrap_or_else(|err| panic!("template fixture should build: {err}"))
    }
}

#[fixture]
pub fn launch_world() -> LaunchWorld {
    LaunchWorld {
        gateway: FakeGateway::with_instances(vec![LaunchWorld::instance()]),
        nodes: RecordingNodes::new(InMemoryRegistry::new()),
        launcher: RefCell::new(ScriptedLauncher::default()),
        launch_timeout: Cell::new(Duration::from_secs(600)),
        node: RefCell::new(None),
        outcome: RefCell::new(None),
    }
}
