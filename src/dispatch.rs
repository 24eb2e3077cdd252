//! Per-template reconciliation task.
//!
//! Each template gets one task that owns its [`Provisioner`] and handles
//! requests from a bounded mailbox one at a time, so two reconciliations of
//! the same template never overlap. Callers talk to the task through a
//! cloneable [`TemplateHandle`].

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::gateway::CloudGateway;
use crate::keys::KeyProvider;
use crate::provision::{ProvisionError, ProvisionOptions, Provisioner};
use crate::registry::{LiveWorkerLookup, WorkerNode, WorkerRegistrar};

/// Mailbox capacity used when callers have no preference.
pub const DEFAULT_MAILBOX: usize = 16;

/// Errors returned through a [`TemplateHandle`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DispatchError {
    /// The template task is no longer running.
    #[error("template worker stopped")]
    Stopped,
    /// The reconciliation itself failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

type Reply = Result<Option<Vec<WorkerNode>>, ProvisionError>;

#[derive(Debug)]
struct ProvisionRequest {
    id: Uuid,
    number: usize,
    options: ProvisionOptions,
    reply: oneshot::Sender<Reply>,
}

/// Sender side of a template task.
#[derive(Clone, Debug)]
pub struct TemplateHandle {
    tx: mpsc::Sender<ProvisionRequest>,
    template: String,
}

impl TemplateHandle {
    /// Template display name, for logs.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Queues a reconciliation and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Stopped`] when the task has gone away, or
    /// [`DispatchError::Provision`] when the reconciliation failed.
    pub async fn provision(
        &self,
        number: usize,
        options: ProvisionOptions,
    ) -> Result<Option<Vec<WorkerNode>>, DispatchError> {
        let (reply, response) = oneshot::channel();
        let request = ProvisionRequest {
            id: Uuid::new_v4(),
            number,
            options,
            reply,
        };
        debug!(template = %self.template, request_id = %request.id, number, "queueing reconciliation");
        self.tx
            .send(request)
            .await
            .map_err(|_| DispatchError::Stopped)?;
        let result = response.await.map_err(|_| DispatchError::Stopped)?;
        Ok(result?)
    }
}

/// Spawns template tasks.
#[derive(Debug)]
pub struct TemplateWorker;

impl TemplateWorker {
    /// Starts the task for `provisioner` with a mailbox of `mailbox`
    /// requests. The task ends once every handle is dropped.
    pub fn spawn<G, K, R>(
        provisioner: Provisioner<G, K, R>,
        mailbox: usize,
    ) -> (TemplateHandle, JoinHandle<()>)
    where
        G: CloudGateway + 'static,
        K: KeyProvider + 'static,
        R: LiveWorkerLookup + WorkerRegistrar + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ProvisionRequest>(mailbox.max(1));
        let template = provisioner.template().to_string();
        let task_template = template.clone();
        let task = tokio::spawn(async move {
            info!(template = %task_template, "template worker started");
            while let Some(request) = rx.recv().await {
                let result = provisioner
                    .provision(request.number, request.options)
                    .await;
                debug!(
                    template = %task_template,
                    request_id = %request.id,
                    ok = result.is_ok(),
                    "reconciliation finished"
                );
                if request.reply.send(result).is_err() {
                    debug!(request_id = %request.id, "caller no longer waiting");
                }
            }
            info!(template = %task_template, "template worker stopped");
        });
        (TemplateHandle { tx, template }, task)
    }
}
