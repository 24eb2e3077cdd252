//! Error types for the provisioning reconciler.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::registry::RegistrationError;

/// Errors that abort a reconciliation call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// No signing key could be resolved; no instance was touched.
    #[error("no signing key available to bootstrap instances")]
    Credential,
    /// The create operation came back with an error message.
    #[error("instance creation failed: {message}")]
    Provisioning {
        /// Provider message, verbatim.
        message: String,
    },
    /// A gateway call the reconciliation depends on failed.
    #[error("cloud gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// The host rejected a node for a validated template.
    #[error("worker registration failed: {0}")]
    Registration(#[from] RegistrationError),
    /// No instance matched the template filter after reconciliation.
    #[error("no instance found for filter {filter}")]
    NoInstance {
        /// Filter expression used for the listing.
        filter: String,
    },
}
