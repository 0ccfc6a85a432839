//! Typed attachments.
//!
//! Attachments let callers and interceptors hang arbitrary typed values off
//! an invocation or a proxy without the core knowing the types involved.
//! A key is allocated once per process (usually in a static) and carries the
//! value type; the map stores values type-erased and recovers the type on
//! access through the key.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::proxy::Affinity;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// A unique, typed key for one attachment slot.
///
/// Two keys never alias, even when created for the same value type.
#[derive(Debug)]
pub struct AttachmentKey<T> {
    id: u64,
    _type: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    /// Allocate a fresh key.
    pub fn new() -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            _type: PhantomData,
        }
    }
}

impl<T> Default for AttachmentKey<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

/// Routing hint deposited during the result pass and applied to the owning
/// proxy after a successful invocation.
pub static WEAK_AFFINITY: Lazy<AttachmentKey<Affinity>> = Lazy::new(AttachmentKey::new);

/// A mutable, thread-safe map of typed attachments.
///
/// Shared by invocation contexts and proxy handlers. The internal lock is
/// never held across user code.
#[derive(Default)]
pub struct Attachments {
    map: Mutex<HashMap<u64, Arc<dyn Any + Send + Sync>>>,
}

impl Attachments {
    /// Create an empty attachment map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value attached under `key`, if any.
    pub fn get<T: Any + Send + Sync>(&self, key: AttachmentKey<T>) -> Option<Arc<T>> {
        let map = self.map.lock();
        map.get(&key.id).cloned()?.downcast().ok()
    }

    /// Attach `value` under `key`, returning the previous value if any.
    pub fn set<T: Any + Send + Sync>(&self, key: AttachmentKey<T>, value: T) -> Option<Arc<T>> {
        let prev = self.map.lock().insert(key.id, Arc::new(value));
        prev?.downcast().ok()
    }

    /// Remove the value attached under `key`, returning it if present.
    pub fn remove<T: Any + Send + Sync>(&self, key: AttachmentKey<T>) -> Option<Arc<T>> {
        let prev = self.map.lock().remove(&key.id);
        prev?.downcast().ok()
    }

    /// Whether a value is attached under `key`.
    pub fn contains<T>(&self, key: AttachmentKey<T>) -> bool {
        self.map.lock().contains_key(&key.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_round_trip() {
        let attachments = Attachments::new();
        let key: AttachmentKey<String> = AttachmentKey::new();

        assert!(attachments.get(key).is_none());
        assert!(attachments.set(key, "hello".to_string()).is_none());
        assert_eq!(*attachments.get(key).unwrap(), "hello");

        let prev = attachments.set(key, "world".to_string()).unwrap();
        assert_eq!(*prev, "hello");

        let removed = attachments.remove(key).unwrap();
        assert_eq!(*removed, "world");
        assert!(!attachments.contains(key));
    }

    #[test]
    fn keys_of_same_type_do_not_alias() {
        let attachments = Attachments::new();
        let a: AttachmentKey<u32> = AttachmentKey::new();
        let b: AttachmentKey<u32> = AttachmentKey::new();

        attachments.set(a, 1u32);
        assert!(attachments.get(b).is_none());
        attachments.set(b, 2u32);
        assert_eq!(*attachments.get(a).unwrap(), 1);
        assert_eq!(*attachments.get(b).unwrap(), 2);
    }

    #[test]
    fn weak_affinity_key_is_usable() {
        let attachments = Attachments::new();
        attachments.set(*WEAK_AFFINITY, Affinity::Node("node-1".into()));
        assert_eq!(
            *attachments.get(*WEAK_AFFINITY).unwrap(),
            Affinity::Node("node-1".into())
        );
    }
}
