//! Error types for load balancer reconciliation

use thiserror::Error;

use crate::cloud::CloudError;
use crate::store::StoreError;

/// Main error type for load balancer operations
///
/// Callers see this single kind regardless of which reconciliation step
/// failed; the underlying collaborator error is attached for diagnostics.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A cloud API invocation failed during creation, discovery, or a
    /// member update
    #[error("load balancer operation failed while {step}: {source}")]
    Cloud {
        /// Description of the step that failed
        step: String,
        /// The underlying collaborator error
        #[source]
        source: CloudError,
    },

    /// A resource stayed in a pending provisioning state past the poll bound
    #[error("{resource} stuck in pending state")]
    StuckPending {
        /// Description of the stuck resource
        resource: String,
    },

    /// Discovery found more than one resource with the target name
    ///
    /// Duplicate names indicate corrupted or concurrently-modified cloud
    /// state that must not be guessed at.
    #[error("multiple {kind} named {name} found")]
    AmbiguousResource {
        /// Resource kind being discovered
        kind: String,
        /// The duplicated name
        name: String,
    },

    /// No pre-existing security group was found while group management is
    /// disabled
    ///
    /// This is a configuration error requiring operator action, not a
    /// transient condition.
    #[error("unable to find default security group")]
    MissingSecurityGroup,

    /// No known subnet contains the given backend address
    #[error("no subnet found for member address {address}")]
    NoMatchingSubnet {
        /// The backend address that matched no subnet CIDR
        address: String,
    },

    /// State store error
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Wrap a collaborator failure with a description of the failed step
    pub fn cloud(step: impl Into<String>, source: CloudError) -> Self {
        Self::Cloud {
            step: step.into(),
            source,
        }
    }

    /// Create a stuck-pending error for the given resource
    pub fn stuck_pending(resource: impl Into<String>) -> Self {
        Self::StuckPending {
            resource: resource.into(),
        }
    }

    /// Create an ambiguous-discovery error
    pub fn ambiguous(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AmbiguousResource {
            kind: kind.into(),
            name: name.into(),
        }
    }
}
