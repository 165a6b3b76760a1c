//! The resource manager: factory registry and handle table.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use kiln_common::Guid;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::ResourceError;
use crate::factory::ResourceFactory;
use crate::handle::{Begin, ResourceHandle};
use crate::proxy::Proxy;
use crate::resource::{Resource, ResourceObject, ResourceType};

/// Notification that the source asset `guid` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseEvent {
    /// The changed asset.
    pub guid: Guid,
}

/// Owns the handle of every bound GUID and the factories that resolve them.
pub struct ResourceManager {
    handles: Mutex<HashMap<Guid, Arc<ResourceHandle>>>,
    factories: RwLock<HashMap<ResourceType, Arc<dyn ResourceFactory>>>,
    /// Bumped on every factory registration; failures recorded under an
    /// older generation are retried.
    generation: AtomicU64,
    events_tx: Sender<DatabaseEvent>,
    events_rx: Receiver<DatabaseEvent>,
}

impl ResourceManager {
    /// Creates an empty manager.
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            handles: Mutex::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events_tx,
            events_rx,
        })
    }

    /// Registers `factory` for every type it reports, replacing earlier
    /// registrations of those types.
    pub fn register_factory(&self, factory: Arc<dyn ResourceFactory>) {
        let types = factory.resource_types();
        {
            let mut factories = self.factories.write();
            for resource_type in &types {
                factories.insert(*resource_type, factory.clone());
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(types = ?types, "registered resource factory");
    }

    /// Returns a proxy for `guid`, creating its handle on first use.
    ///
    /// The handle keeps the type it was first bound with; binding the same
    /// GUID as another type yields a proxy whose resolution fails with
    /// [`ResourceError::TypeMismatch`].
    pub fn bind<T: Resource>(self: &Arc<Self>, guid: Guid) -> Proxy<T> {
        let handle = self
            .handles
            .lock()
            .entry(guid)
            .or_insert_with(|| Arc::new(ResourceHandle::new(guid, ResourceType::of::<T>())))
            .clone();
        Proxy::new(self.clone(), handle)
    }

    /// Returns the handle bound for `guid`, if any.
    pub fn handle(&self, guid: Guid) -> Option<Arc<ResourceHandle>> {
        self.handles.lock().get(&guid).cloned()
    }

    /// Number of handles in the table.
    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Moves the handle of `guid` back to unresolved so the next access
    /// creates the resource again.
    ///
    /// Objects already handed out are not affected. Returns whether a
    /// handle changed state.
    pub fn invalidate(&self, guid: Guid) -> bool {
        let Some(handle) = self.handle(guid) else {
            return false;
        };
        let invalidated = handle.invalidate();
        if invalidated {
            debug!(guid = %guid, "invalidated resource");
        }
        invalidated
    }

    /// Invalidates `guid` and resolves it again right away.
    ///
    /// Does nothing for a GUID that was never bound.
    pub fn reload(self: &Arc<Self>, guid: Guid) -> Result<(), ResourceError> {
        let Some(handle) = self.handle(guid) else {
            return Ok(());
        };
        handle.invalidate();
        self.resolve(&handle).map(|_| ())
    }

    /// Returns a sender for database change events.
    pub fn event_sender(&self) -> Sender<DatabaseEvent> {
        self.events_tx.clone()
    }

    /// Applies every pending [`DatabaseEvent`]. Returns the number of
    /// handles invalidated.
    pub fn process_events(&self) -> usize {
        let mut invalidated = 0;
        for event in self.events_rx.try_iter() {
            if self.invalidate(event.guid) {
                invalidated += 1;
            }
        }
        invalidated
    }

    /// Drops handles no proxy refers to anymore. Returns how many were
    /// evicted.
    pub fn unload_unused(&self) -> usize {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|_, handle| Arc::strong_count(handle) > 1);
        let evicted = before - handles.len();
        if evicted > 0 {
            debug!(evicted, remaining = handles.len(), "unloaded unused resources");
        }
        evicted
    }

    /// Resolves `handle`, blocking while another thread resolves it.
    pub(crate) fn resolve(
        self: &Arc<Self>,
        handle: &ResourceHandle,
    ) -> Result<ResourceObject, ResourceError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let previous = match handle.begin(generation) {
            Begin::Ready(object) => return Ok(object),
            Begin::Failed(error) => return Err(error),
            Begin::Resolve(previous) => previous,
        };

        let guid = handle.guid();
        let resource_type = handle.resource_type();
        let factory = self.factories.read().get(&resource_type).cloned();
        let (result, cacheable) = match factory {
            Some(factory) => {
                debug!(guid = %guid, resource_type = %resource_type, "creating resource");
                let result = catch_unwind(AssertUnwindSafe(|| {
                    factory.create(self, resource_type, guid, previous.as_ref())
                }))
                .unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(ResourceError::factory(
                        guid,
                        format!("factory panicked: {message}"),
                    ))
                });
                (result, factory.is_cacheable())
            }
            None => (
                Err(ResourceError::NoFactory {
                    resource_type: resource_type.name(),
                }),
                true,
            ),
        };

        if let Err(error) = &result {
            warn!(
                guid = %guid,
                resource_type = %resource_type,
                error = %error,
                "resource resolution failed"
            );
        }
        handle.complete(previous, &result, cacheable, generation);
        result
    }
}
