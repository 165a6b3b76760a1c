//! Runtime access to built resources.
//!
//! A [`Proxy<T>`] is a typed, cheaply cloned reference to the resource with a
//! given GUID. All proxies for one GUID share a single [`ResourceHandle`]
//! owned by the [`ResourceManager`], which resolves it lazily through the
//! [`ResourceFactory`] registered for `T`. Handles move back to unresolved
//! when the source asset changes; objects already handed out stay alive.

#![warn(missing_docs)]

pub mod artifacts;
pub mod error;
pub mod factory;
pub mod handle;
pub mod manager;
pub mod proxy;
pub mod resource;

pub use artifacts::BuiltArtifacts;
pub use error::ResourceError;
pub use factory::ResourceFactory;
pub use handle::{ResourceHandle, ResourceState};
pub use manager::{DatabaseEvent, ResourceManager};
pub use proxy::Proxy;
pub use resource::{Resource, ResourceObject, ResourceType};
