//! Resource types.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A live object produced by a [`ResourceFactory`](crate::ResourceFactory).
pub trait Resource: Any + Send + Sync {
    /// Name used in logs and error messages.
    const TYPE_NAME: &'static str;
}

/// Type-erased resource as stored in a handle.
pub type ResourceObject = Arc<dyn Any + Send + Sync>;

/// Runtime identity of a [`Resource`] type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    /// Returns the resource type of `T`.
    pub fn of<T: Resource>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::TYPE_NAME,
        }
    }

    /// Returns the type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns whether this is the type of `T`.
    pub fn is<T: Resource>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceType({})", self.name)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
