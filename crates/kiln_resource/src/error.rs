//! Error types for resource resolution.

use kiln_common::{ContentHash, Guid};

/// Errors returned when a resource cannot be resolved.
///
/// Failures are remembered by the handle, so the type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// No factory is registered for the requested resource type.
    #[error("no factory registered for resource type '{resource_type}'")]
    NoFactory {
        /// Name of the resource type.
        resource_type: &'static str,
    },

    /// The GUID is already bound with a different resource type.
    #[error("resource {guid} is bound as '{actual}', not '{expected}'")]
    TypeMismatch {
        /// The resource GUID.
        guid: Guid,
        /// The type the caller asked for.
        expected: &'static str,
        /// The type the handle was bound with.
        actual: &'static str,
    },

    /// The handle was resolved again from inside its own resolution.
    #[error("resource {guid} depends on itself")]
    ResolveCycle {
        /// The resource GUID.
        guid: Guid,
    },

    /// The factory failed to create the resource.
    #[error("failed to create resource {guid}: {reason}")]
    Factory {
        /// The resource GUID.
        guid: Guid,
        /// Description of the failure.
        reason: String,
    },

    /// The pipeline database has no build record for the asset.
    #[error("asset {guid} has not been built")]
    NotBuilt {
        /// The asset GUID.
        guid: Guid,
    },

    /// The recorded artifact is not in the cache.
    #[error("artifact {guid}@{hash} is not cached")]
    ArtifactMissing {
        /// The asset GUID.
        guid: Guid,
        /// The recorded fingerprint.
        hash: ContentHash,
    },

    /// Reading the pipeline database or the artifact failed.
    #[error("failed to read artifact {guid}: {reason}")]
    Storage {
        /// The asset GUID.
        guid: Guid,
        /// Description of the failure.
        reason: String,
    },
}

impl ResourceError {
    /// Convenience constructor for factory failures.
    pub fn factory(guid: Guid, reason: impl Into<String>) -> Self {
        Self::Factory {
            guid,
            reason: reason.into(),
        }
    }
}
