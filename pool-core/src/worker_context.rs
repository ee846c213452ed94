use crate::types::{ConnectionId, WorkerConnection};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type ContextFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Per-connection mining state, created lazily on first access.
///
/// Check-then-create happens under one lock, so the factory runs at most
/// once per connection id no matter how many tasks race on first access.
/// Entries live until `remove` is called from the disconnect path.
pub struct WorkerContextRegistry<C> {
    factory: ContextFactory<C>,
    contexts: Mutex<HashMap<ConnectionId, Arc<C>>>,
}

impl<C> WorkerContextRegistry<C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Return the connection's context, creating it on first access
    pub fn get_or_create(&self, connection: &WorkerConnection) -> Arc<C> {
        let mut contexts = self.contexts.lock();
        contexts
            .entry(connection.id)
            .or_insert_with(|| {
                debug!(
                    connection = %connection.id,
                    remote = %connection.remote_endpoint,
                    "Creating worker context"
                );
                Arc::new((self.factory)())
            })
            .clone()
    }

    /// Drop the context of a closed connection
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.contexts.lock().remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Worker context released");
        }
        removed
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.contexts.lock().contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Context {
        difficulty: Mutex<f64>,
    }

    fn counting_registry() -> (Arc<WorkerContextRegistry<Context>>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let registry = WorkerContextRegistry::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Context::default()
        });
        (Arc::new(registry), created)
    }

    fn connection() -> WorkerConnection {
        WorkerConnection::new("127.0.0.1:3333".parse().unwrap())
    }

    #[test]
    fn test_same_connection_same_context() {
        let (registry, created) = counting_registry();
        let conn = connection();

        let first = registry.get_or_create(&conn);
        *first.difficulty.lock() = 512.0;
        let second = registry.get_or_create(&conn);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.difficulty.lock(), 512.0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_connections_distinct_contexts() {
        let (registry, created) = counting_registry();

        let a = registry.get_or_create(&connection());
        let b = registry.get_or_create(&connection());

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let (registry, created) = counting_registry();
        let conn = connection();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let conn = conn.clone();
                std::thread::spawn(move || registry.get_or_create(&conn))
            })
            .collect();

        let contexts: Vec<Arc<Context>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
    }

    #[test]
    fn test_remove_allows_fresh_context() {
        let (registry, created) = counting_registry();
        let conn = connection();

        let before = registry.get_or_create(&conn);
        assert!(registry.contains(&conn.id));
        assert!(registry.remove(&conn.id));
        assert!(!registry.remove(&conn.id));
        assert!(registry.is_empty());

        let after = registry.get_or_create(&conn);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
