//! Launch supervision for freshly registered worker nodes.
//!
//! Each node moves through `PENDING_LAUNCH` to either `CONNECTED` or, on any
//! failure, `FAILED_CLEANUP` and then `TERMINATED`. Cleanup takes the node
//! out of service and always issues a terminate against the backing
//! instance, even when the host calls before it fail. Launches are never
//! retried here.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::gateway::CloudGateway;
use crate::registry::{NodeControl, WorkerNode};

/// Cause recorded on a node taken offline after a failed launch.
pub const OFFLINE_CAUSE: &str = "Agent failed to connect";

/// Evidence of a successful connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Connected {
    /// Backing instance of the connected node.
    pub instance_id: String,
    /// Address the agent was reached at, when the transport has one.
    pub address: Option<IpAddr>,
}

/// Reasons a connection attempt failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LaunchFailure {
    /// The transport could not be started or broke down.
    #[error("transport error: {0}")]
    Transport(String),
    /// The attempt did not finish before the launch deadline.
    #[error("launch timed out after {}s", after.as_secs())]
    Timeout {
        /// Deadline that applied to the attempt, measured from launch.
        after: Duration,
    },
    /// A bootstrap step exited unsuccessfully.
    #[error("{step} exited with status {}: {stderr}", code.map_or_else(|| String::from("unknown"), |c| c.to_string()))]
    Bootstrap {
        /// Step that failed.
        step: String,
        /// Exit code, when the process reported one.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// No address is known for the backing instance.
    #[error("instance {instance_id} has no reachable address")]
    NoAddress {
        /// Backing instance identifier.
        instance_id: String,
    },
}

/// Future returned by [`Launchable::attempt_connect`].
pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<Connected, LaunchFailure>> + Send + 'a>>;

/// Connection strategy for a worker node. The supervisor does not know which
/// transport an implementation uses.
pub trait Launchable: Send + Sync {
    /// Attempts to bring `node` into service once.
    fn attempt_connect<'a>(&'a self, node: &'a WorkerNode) -> LaunchFuture<'a>;
}

/// Supervisor states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LaunchState {
    /// The connection strategy is running.
    PendingLaunch,
    /// The agent connected.
    Connected,
    /// Cleanup started but terminate was not issued successfully.
    FailedCleanup,
    /// The backing instance has been told to terminate.
    Terminated,
}

impl LaunchState {
    /// Upper-case state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingLaunch => "PENDING_LAUNCH",
            Self::Connected => "CONNECTED",
            Self::FailedCleanup => "FAILED_CLEANUP",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one supervised launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchOutcome {
    /// The agent connected.
    Connected(Connected),
    /// The launch failed and terminate was issued.
    Terminated {
        /// Why the launch failed.
        failure: LaunchFailure,
    },
    /// The launch failed and the terminate call itself failed; the instance
    /// may still be billed.
    CleanupFailed {
        /// Why the launch failed.
        failure: LaunchFailure,
        /// Why the terminate call failed.
        cleanup: String,
    },
}

impl LaunchOutcome {
    /// State the node ended in.
    #[must_use]
    pub const fn state(&self) -> LaunchState {
        match self {
            Self::Connected(_) => LaunchState::Connected,
            Self::Terminated { .. } => LaunchState::Terminated,
            Self::CleanupFailed { .. } => LaunchState::FailedCleanup,
        }
    }

    /// Returns `true` when the agent connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Drives connection attempts and owns cleanup on failure.
#[derive(Clone, Debug)]
pub struct LaunchSupervisor<G, N> {
    gateway: G,
    nodes: N,
    launch_timeout: Duration,
}

impl<G, N> LaunchSupervisor<G, N>
where
    G: CloudGateway,
    N: NodeControl,
{
    /// Creates a supervisor. `launch_timeout` is measured from each node's
    /// launch timestamp.
    #[must_use]
    pub const fn new(gateway: G, nodes: N, launch_timeout: Duration) -> Self {
        Self {
            gateway,
            nodes,
            launch_timeout,
        }
    }

    /// Runs one connection attempt for `node` and cleans up on failure.
    ///
    /// Failures never propagate as errors; they are converted into
    /// [`LaunchOutcome::Terminated`] or [`LaunchOutcome::CleanupFailed`].
    pub async fn launch<L>(&self, node: &WorkerNode, launcher: &L) -> LaunchOutcome
    where
        L: Launchable + ?Sized,
    {
        let budget = self.remaining_budget(node);
        debug!(
            instance_id = %node.instance_id,
            state = %LaunchState::PendingLaunch,
            budget_secs = budget.as_secs(),
            "launching agent"
        );
        let failure = match timeout(budget, launcher.attempt_connect(node)).await {
            Ok(Ok(connected)) => {
                info!(
                    instance_id = %node.instance_id,
                    state = %LaunchState::Connected,
                    "agent connected"
                );
                return LaunchOutcome::Connected(connected);
            }
            Ok(Err(failure)) => failure,
            Err(_) => LaunchFailure::Timeout { after: budget },
        };
        self.clean_up(node, failure).await
    }

    fn remaining_budget(&self, node: &WorkerNode) -> Duration {
        let elapsed = SystemTime::now()
            .duration_since(node.launch_timeout)
            .unwrap_or_default();
        self.launch_timeout.saturating_sub(elapsed)
    }

    async fn clean_up(&self, node: &WorkerNode, failure: LaunchFailure) -> LaunchOutcome {
        let instance_id = node.instance_id.as_str();
        warn!(
            instance_id,
            state = %LaunchState::FailedCleanup,
            error = %failure,
            "agent failed to connect; cleaning up"
        );

        if let Err(err) = self.nodes.set_accepting_tasks(instance_id, false) {
            warn!(instance_id, error = %err, "failed to stop accepting tasks");
        }
        if self.nodes.node_exists(instance_id)
            && let Err(err) = self.nodes.set_temporarily_offline(instance_id, OFFLINE_CAUSE)
        {
            warn!(instance_id, error = %err, "failed to mark node offline");
        }

        let terminate_error = match self.gateway.terminate_instance(instance_id).await {
            Ok(result) => result.error_message().map(str::to_owned),
            Err(err) => Some(err.to_string()),
        };
        if let Some(cleanup) = terminate_error {
            error!(
                instance_id,
                state = %LaunchState::FailedCleanup,
                error = %cleanup,
                "terminate failed; instance may still be billed"
            );
            return LaunchOutcome::CleanupFailed { failure, cleanup };
        }

        if let Err(err) = self.nodes.remove_node(instance_id) {
            debug!(instance_id, error = %err, "node already removed");
        }
        info!(
            instance_id,
            state = %LaunchState::Terminated,
            "terminate issued"
        );
        LaunchOutcome::Terminated { failure }
    }
}
