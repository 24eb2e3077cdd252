//! Orphan classification over an instance snapshot.
//!
//! An instance is an orphan when it is stopped, or when no live worker node
//! references it. Stopped instances are always considered released, even if a
//! node still points at them.

use tracing::{debug, warn};

use crate::gateway::{CloudGateway, InstanceFilter};
use crate::instance::CloudInstance;
use crate::registry::WorkerNode;

/// Returns up to `number` orphans in snapshot order.
///
/// The first matches win; no preference is given to newer or older
/// instances.
#[must_use]
pub fn classify(
    snapshot: &[CloudInstance],
    live_nodes: &[WorkerNode],
    number: usize,
) -> Vec<CloudInstance> {
    snapshot
        .iter()
        .filter(|instance| is_orphan(instance, live_nodes))
        .take(number)
        .cloned()
        .collect()
}

/// Counts snapshot instances exclusively held by a live worker.
#[must_use]
pub fn bound_count(snapshot: &[CloudInstance], live_nodes: &[WorkerNode]) -> usize {
    snapshot
        .iter()
        .filter(|instance| !is_orphan(instance, live_nodes))
        .count()
}

fn is_orphan(instance: &CloudInstance, live_nodes: &[WorkerNode]) -> bool {
    instance.status.is_stopped()
        || !live_nodes
            .iter()
            .any(|node| node.instance_id == instance.id)
}

/// Reads the template's current instances.
///
/// Listing failures are logged and yield an empty snapshot; reuse is
/// best-effort.
pub async fn read_snapshot<G>(gateway: &G, filter: &InstanceFilter) -> Vec<CloudInstance>
where
    G: CloudGateway + ?Sized,
{
    match gateway.list_instances(filter).await {
        Ok(instances) => {
            debug!(
                filter = %filter.expression(),
                count = instances.len(),
                "instance snapshot read"
            );
            instances
        }
        Err(err) => {
            warn!(
                filter = %filter.expression(),
                error = %err,
                "failed to list instances; treating snapshot as empty"
            );
            Vec::new()
        }
    }
}
