//! Lifecycle observer registry.
//!
//! Callers register observers by value on a pool or session; the core
//! calls them synchronously at lifecycle points. Observers must be cheap
//! and must not call back into the session that emitted the event.

use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A lifecycle notification.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ConnectionCreated {
        backend: &'static str,
    },
    ConnectionDestroyed {
        backend: &'static str,
    },
    ConnectionRecycled {
        backend: &'static str,
    },
    StatementExecuted {
        fingerprint: String,
        rows_affected: u64,
        elapsed: Duration,
    },
    TransactionBegun,
    TransactionCommitted,
    TransactionRolledBack,
    PoolShutdown,
}

/// Receives lifecycle events.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F: Fn(&LifecycleEvent) + Send + Sync> LifecycleObserver for F {
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// A shareable set of observers.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Vec<Arc<dyn LifecycleObserver>>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: impl LifecycleObserver + 'static) {
        self.observers
            .write()
            .expect("observer lock")
            .push(Arc::new(observer));
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let observers = self.observers.read().expect("observer lock");
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.observers.read().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("ObserverRegistry")
            .field("observers", &count)
            .finish()
    }
}
