//! Typed views over resource handles.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use kiln_common::Guid;

use crate::error::ResourceError;
use crate::handle::{ResourceHandle, ResourceState};
use crate::manager::ResourceManager;
use crate::resource::{Resource, ResourceObject, ResourceType};

/// Lazy, shared reference to the resource `T` with a given GUID.
///
/// Cloning a proxy is cheap; every clone and every proxy bound to the same
/// GUID share one [`ResourceHandle`].
pub struct Proxy<T: Resource> {
    manager: Arc<ResourceManager>,
    handle: Arc<ResourceHandle>,
    _pd: PhantomData<fn() -> T>,
}

impl<T: Resource> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            handle: self.handle.clone(),
            _pd: PhantomData,
        }
    }
}

impl<T: Resource> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl<T: Resource> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("type", &T::TYPE_NAME)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<T: Resource> Proxy<T> {
    pub(crate) fn new(manager: Arc<ResourceManager>, handle: Arc<ResourceHandle>) -> Self {
        Self {
            manager,
            handle,
            _pd: PhantomData,
        }
    }

    /// Returns the resource GUID.
    pub fn guid(&self) -> Guid {
        self.handle.guid()
    }

    /// Returns the state of the shared handle.
    pub fn state(&self) -> ResourceState {
        self.handle.state()
    }

    /// Returns the shared handle.
    pub fn handle(&self) -> &Arc<ResourceHandle> {
        &self.handle
    }

    /// Resolves the resource, blocking until it is available or failed.
    pub fn get(&self) -> Result<Arc<T>, ResourceError> {
        self.check_type()?;
        let object = self.manager.resolve(&self.handle)?;
        self.downcast(object)
    }

    /// Returns the resource if it is already resolved.
    pub fn resolved(&self) -> Option<Arc<T>> {
        self.handle
            .object()
            .and_then(|object| object.downcast::<T>().ok())
    }

    /// Resolves the resource on the rayon pool.
    ///
    /// The receiver yields exactly one result, the same [`Self::get`] would
    /// have returned.
    pub fn resolve_async(&self) -> Receiver<Result<Arc<T>, ResourceError>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let proxy = self.clone();
        rayon::spawn(move || {
            let _ = tx.send(proxy.get());
        });
        rx
    }

    fn check_type(&self) -> Result<(), ResourceError> {
        let bound = self.handle.resource_type();
        if bound == ResourceType::of::<T>() {
            Ok(())
        } else {
            Err(self.mismatch(bound))
        }
    }

    fn downcast(&self, object: ResourceObject) -> Result<Arc<T>, ResourceError> {
        object
            .downcast::<T>()
            .map_err(|_| self.mismatch(self.handle.resource_type()))
    }

    fn mismatch(&self, actual: ResourceType) -> ResourceError {
        ResourceError::TypeMismatch {
            guid: self.guid(),
            expected: T::TYPE_NAME,
            actual: actual.name(),
        }
    }
}
