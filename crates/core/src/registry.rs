use log::{debug, warn};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

/// Closed set of service slots known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Render,
    Io,
    Resource,
}

impl ServiceKind {
    pub(crate) const COUNT: usize = 3;

    fn index(self) -> usize {
        match self {
            ServiceKind::Render => 0,
            ServiceKind::Io => 1,
            ServiceKind::Resource => 2,
        }
    }
}

/// A long-lived subsystem that can be published in the registry.
///
/// Services are registered behind `Arc`, usually wrapping their mutable
/// state in a `Mutex`; the registry itself only hands out shared references.
pub trait Service: Send + Sync + 'static {
    fn service_name(&self) -> &'static str;

    /// Upcast used by the typed getter. Implementations return `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Mutex-wrapped registry cell for services whose API needs `&mut self`.
///
/// The registry only hands out shared references; a service that mutates
/// state on every call registers itself inside a cell and callers lock it
/// for the duration of one operation.
pub struct ServiceCell<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T: Send + 'static> ServiceCell<T> {
    pub fn new(name: &'static str, value: T) -> Arc<Self> {
        Arc::new(ServiceCell {
            name,
            inner: Mutex::new(value),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap()
    }
}

impl<T: Send + 'static> Service for ServiceCell<T> {
    fn service_name(&self) -> &'static str {
        self.name
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service registry has not been created")]
    NotCreated,
    #[error("service slot {0:?} is already occupied")]
    SlotOccupied(ServiceKind),
}

struct State {
    slots: [Option<Arc<dyn Service>>; ServiceKind::COUNT],
    // Kinds in the order they were set, for reverse-order teardown.
    set_order: Vec<ServiceKind>,
}

/// Process-wide slot table for named subsystems.
///
/// The single permitted global of the engine. Slots are set exactly once per
/// lifecycle; `destroy` releases services in reverse order of registration
/// so dependents go down before their dependencies.
pub struct ServiceRegistry;

static STATE: RwLock<Option<State>> = RwLock::new(None);

impl ServiceRegistry {
    /// Creates the registry. Idempotent.
    pub fn create() {
        let mut state = STATE.write().unwrap();
        if state.is_none() {
            debug!("Service registry created");
            *state = Some(State {
                slots: [None, None, None],
                set_order: Vec::new(),
            });
        }
    }

    /// Tears the registry down, releasing owned services in reverse order
    /// of registration. Safe to call without a prior `create`.
    pub fn destroy() {
        let mut state = STATE.write().unwrap();
        let Some(mut inner) = state.take() else {
            return;
        };

        while let Some(kind) = inner.set_order.pop() {
            if let Some(service) = inner.slots[kind.index()].take() {
                debug!("Releasing service {}", service.service_name());
            }
        }
    }

    pub fn is_created() -> bool {
        STATE.read().unwrap().is_some()
    }

    /// Publishes a service. Each slot may be set once per lifecycle.
    pub fn set_service(kind: ServiceKind, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let mut state = STATE.write().unwrap();
        let inner = state.as_mut().ok_or(RegistryError::NotCreated)?;

        let slot = &mut inner.slots[kind.index()];
        if slot.is_some() {
            warn!("Service slot {:?} is already occupied", kind);
            return Err(RegistryError::SlotOccupied(kind));
        }

        debug!("Service {} set for {:?}", service.service_name(), kind);
        *slot = Some(service);
        inner.set_order.push(kind);
        Ok(())
    }

    /// Typed lookup. Returns `None` for a non-set slot, an unknown type or a
    /// registry that was never created; never panics.
    pub fn get_service<T: Send + Sync + 'static>(kind: ServiceKind) -> Option<Arc<T>> {
        let state = STATE.read().unwrap();
        let inner = state.as_ref()?;
        let service = inner.slots[kind.index()].as_ref()?;
        Arc::clone(service).as_any().downcast::<T>().ok()
    }
}
