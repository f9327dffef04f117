//! Identifier-to-instance directory.
//!
//! Entries are keyed by name and optionally carry a numeric order. Lookups
//! first try the identifier as an order, then fall back to the name. The
//! registry is filled once at startup and never shrinks.

use crate::camera::Camera;
use crate::config::is_numeric_id;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Something that can be looked up by name or order
pub trait Registered {
    fn name(&self) -> &str;
    fn order(&self) -> Option<u32>;
}

impl Registered for Camera {
    fn name(&self) -> &str {
        Camera::name(self)
    }

    fn order(&self) -> Option<u32> {
        Camera::order(self)
    }
}

pub struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Registered> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert keyed by name. A duplicate name replaces the previous entry.
    pub fn add(&self, item: T) -> Arc<T> {
        let item = Arc::new(item);
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.name().to_string(), item.clone());
        if previous.is_some() {
            log::warn!("Registry entry '{}' replaced", item.name());
        }
        item
    }

    /// Resolve `id` as an order first, then as a name
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        let entries = self.read();
        if is_numeric_id(id) {
            if let Ok(order) = id.parse::<u32>() {
                if let Some(found) = entries.values().find(|e| e.order() == Some(order)) {
                    return Some(found.clone());
                }
            }
        }
        entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All entries, ordered entries first by order, then the rest by name
    pub fn list(&self) -> Vec<Arc<T>> {
        let mut items: Vec<_> = self.read().values().cloned().collect();
        items.sort_by(|a, b| match (a.order(), b.order()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name().cmp(b.name()),
        });
        items
    }
}

pub type CameraRegistry = Registry<Camera>;

impl Registry<Camera> {
    /// Start every camera; failures are logged and skipped
    pub fn start_all(&self) {
        for camera in self.list() {
            if let Err(e) = camera.start() {
                log::error!("{}", e);
            }
        }
    }

    /// Stop every camera. Used once at shutdown.
    ///
    /// Blocks while any source is mid-acquisition; from async code use
    /// [`CameraRegistry::shutdown`].
    pub fn close_all(&self) {
        for camera in self.list() {
            camera.stop();
        }
    }

    /// `close_all` on the blocking pool, so a stuck acquisition never holds
    /// an async worker
    pub async fn shutdown(self: &Arc<Self>) {
        let registry = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || registry.close_all()).await {
            log::error!("Camera shutdown task failed: {}", e);
        }
    }

    /// Wait for every camera's pipelines to exit
    pub async fn join_all(&self) {
        for camera in self.list() {
            camera.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        name: &'static str,
        order: Option<u32>,
    }

    impl Registered for Entry {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> Option<u32> {
            self.order
        }
    }

    fn registry() -> Registry<Entry> {
        let registry = Registry::new();
        registry.add(Entry {
            name: "gate",
            order: Some(2),
        });
        registry.add(Entry {
            name: "yard",
            order: None,
        });
        registry.add(Entry {
            name: "door",
            order: Some(1),
        });
        registry
    }

    #[test]
    fn test_get_by_name_and_order_is_same_instance() {
        let registry = registry();
        let by_name = registry.get("gate").unwrap();
        let by_order = registry.get("2").unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_order));
    }

    #[test]
    fn test_unknown_ids() {
        let registry = registry();
        assert!(registry.get("7").is_none());
        assert!(registry.get("garage").is_none());
        assert!(registry.get("").is_none());
        // Not a plain unsigned integer, so it is only tried as a name
        assert!(registry.get("+1").is_none());
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let registry = registry();
        registry.add(Entry {
            name: "gate",
            order: Some(9),
        });
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("gate").unwrap().order, Some(9));
        assert!(registry.get("2").is_none());
    }

    #[test]
    fn test_list_sorted() {
        let names: Vec<_> = registry().list().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["door", "gate", "yard"]);
    }
}
