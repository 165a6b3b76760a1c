//! Shared per-GUID resolution state.

use std::fmt;
use std::thread::{self, ThreadId};

use kiln_common::Guid;
use parking_lot::{Condvar, Mutex};

use crate::error::ResourceError;
use crate::resource::{ResourceObject, ResourceType};

/// Observable state of a [`ResourceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Not resolved yet, or invalidated since.
    Unresolved,
    /// A thread is running the factory.
    Resolving,
    /// The object is available.
    Resolved,
    /// The last resolution failed.
    Failed,
}

enum Slot {
    Unresolved {
        previous: Option<ResourceObject>,
    },
    Resolving {
        thread: ThreadId,
        invalidated: bool,
    },
    Resolved(ResourceObject),
    Failed {
        error: ResourceError,
        generation: u64,
    },
}

/// What a caller of [`ResourceHandle::begin`] has to do next.
pub(crate) enum Begin {
    Ready(ResourceObject),
    Failed(ResourceError),
    /// The caller now owns the resolution and must call
    /// [`ResourceHandle::complete`].
    Resolve(Option<ResourceObject>),
}

/// The single resolution state shared by every proxy of one GUID.
pub struct ResourceHandle {
    guid: Guid,
    resource_type: ResourceType,
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl ResourceHandle {
    pub(crate) fn new(guid: Guid, resource_type: ResourceType) -> Self {
        Self {
            guid,
            resource_type,
            slot: Mutex::new(Slot::Unresolved { previous: None }),
            changed: Condvar::new(),
        }
    }

    /// Returns the resource GUID.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Returns the type the handle was bound with.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the current state.
    pub fn state(&self) -> ResourceState {
        match &*self.slot.lock() {
            Slot::Unresolved { .. } => ResourceState::Unresolved,
            Slot::Resolving { .. } => ResourceState::Resolving,
            Slot::Resolved(_) => ResourceState::Resolved,
            Slot::Failed { .. } => ResourceState::Failed,
        }
    }

    /// Returns the resolved object without resolving.
    pub(crate) fn object(&self) -> Option<ResourceObject> {
        match &*self.slot.lock() {
            Slot::Resolved(object) => Some(object.clone()),
            _ => None,
        }
    }

    /// Starts a resolution, or waits for the one in progress on another
    /// thread.
    ///
    /// A failure recorded under the current factory `generation` is
    /// returned as is; an older one is retried.
    pub(crate) fn begin(&self, generation: u64) -> Begin {
        let me = thread::current().id();
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Resolved(object) => return Begin::Ready(object.clone()),
                Slot::Failed {
                    error,
                    generation: recorded,
                } if *recorded == generation => return Begin::Failed(error.clone()),
                Slot::Resolving { thread, .. } if *thread == me => {
                    return Begin::Failed(ResourceError::ResolveCycle { guid: self.guid })
                }
                Slot::Resolving { .. } => {}
                Slot::Unresolved { .. } | Slot::Failed { .. } => break,
            }
            self.changed.wait(&mut slot);
        }

        let resolving = Slot::Resolving {
            thread: me,
            invalidated: false,
        };
        match std::mem::replace(&mut *slot, resolving) {
            Slot::Unresolved { previous } => Begin::Resolve(previous),
            _ => Begin::Resolve(None),
        }
    }

    /// Publishes the result of a resolution started with [`Self::begin`].
    ///
    /// Results of non-cacheable factories are not stored. A handle
    /// invalidated while resolving ends up unresolved either way.
    pub(crate) fn complete(
        &self,
        previous: Option<ResourceObject>,
        result: &Result<ResourceObject, ResourceError>,
        cacheable: bool,
        generation: u64,
    ) {
        let mut slot = self.slot.lock();
        let invalidated = matches!(
            *slot,
            Slot::Resolving {
                invalidated: true,
                ..
            }
        );
        *slot = match result {
            Ok(object) if cacheable && invalidated => Slot::Unresolved {
                previous: Some(object.clone()),
            },
            Ok(object) if cacheable => Slot::Resolved(object.clone()),
            Ok(_) => Slot::Unresolved { previous },
            Err(_) if invalidated => Slot::Unresolved { previous },
            Err(error) => Slot::Failed {
                error: error.clone(),
                generation,
            },
        };
        drop(slot);
        self.changed.notify_all();
    }

    /// Moves a resolved or failed handle back to unresolved.
    ///
    /// Returns `false` when there was nothing to invalidate.
    pub(crate) fn invalidate(&self) -> bool {
        let mut slot = self.slot.lock();
        let next = match &mut *slot {
            Slot::Resolved(object) => Slot::Unresolved {
                previous: Some(object.clone()),
            },
            Slot::Failed { .. } => Slot::Unresolved { previous: None },
            Slot::Resolving { invalidated, .. } => {
                *invalidated = true;
                return true;
            }
            Slot::Unresolved { .. } => return false,
        };
        *slot = next;
        true
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("guid", &self.guid)
            .field("resource_type", &self.resource_type)
            .field("state", &self.state())
            .finish()
    }
}
