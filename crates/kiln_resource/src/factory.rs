//! Resource factories.

use std::sync::Arc;

use kiln_common::Guid;

use crate::error::ResourceError;
use crate::manager::ResourceManager;
use crate::resource::{ResourceObject, ResourceType};

/// Creates live resources from their GUID.
///
/// A factory may bind and resolve further proxies through `manager` while
/// creating a resource.
pub trait ResourceFactory: Send + Sync {
    /// Resource types this factory creates.
    fn resource_types(&self) -> Vec<ResourceType>;

    /// Whether a created object may be shared by every proxy of the GUID.
    ///
    /// Objects of non-cacheable factories are created anew on every
    /// resolution and never stored in the handle.
    fn is_cacheable(&self) -> bool {
        true
    }

    /// Creates the resource `guid` of type `resource_type`.
    ///
    /// `current` is the object the handle held before it was invalidated,
    /// if any.
    fn create(
        &self,
        manager: &Arc<ResourceManager>,
        resource_type: ResourceType,
        guid: Guid,
        current: Option<&ResourceObject>,
    ) -> Result<ResourceObject, ResourceError>;
}
