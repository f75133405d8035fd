//! Keyed single-flight handle cache.
//!
//! Each key owns a [`OnceCell`]; the map itself is only locked long enough to
//! find or insert that cell, so initialisation for one key never blocks
//! lookups for another.  Concurrent callers racing on the same fresh key all
//! await the same initialiser and observe the same `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

type Cell<T> = Arc<OnceCell<Arc<T>>>;

pub struct HandleCache<T> {
    cells: Mutex<HashMap<String, Cell<T>>>,
}

impl<T> HandleCache<T> {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the handle cached under `key`, running `init` to create it if
    /// there is none yet.
    ///
    /// At most one `init` runs per key at a time.  If it fails, nothing is
    /// cached and the next caller runs its own initialiser.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &str, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut cells = self.lock();
            cells.entry(key.to_string()).or_default().clone()
        };

        match cell
            .get_or_try_init(move || async move { init().await.map(Arc::new) })
            .await
        {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                // Drop the empty cell so `len` only counts live handles.
                let mut cells = self.lock();
                if let Some(current) = cells.get(key) {
                    if Arc::ptr_eq(current, &cell) && !current.initialized() {
                        cells.remove(key);
                    }
                }
                Err(e)
            }
        }
    }

    /// Cached handle for `key`, if one has finished initialising.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of initialised handles.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget the handle for `key`.  Holders of the returned `Arc` keep it
    /// alive; the next lookup initialises a fresh one.
    pub fn evict(&self, key: &str) -> Option<Arc<T>> {
        self.lock()
            .remove(key)
            .and_then(|cell| cell.get().cloned())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Cell<T>>> {
        // The map holds no invariants a panicking holder could break.
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for HandleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
