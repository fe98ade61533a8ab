use log::debug;
use std::hash::Hash;

/// Lifecycle hooks for values owned by a [`ResourceCache`].
pub trait Resource {
    /// Called right before the cache destroys the value, either because it
    /// was replaced by `set` or because the cache is cleared.
    fn on_release(&mut self) {}
}

/// Named lookup table owning its values, with a pluggable factory for
/// on-demand creation. Not thread-safe; a cache is owned by exactly one
/// service.
pub struct ResourceCache<K, V> {
    map: foldhash::HashMap<K, V>,
    factory: Box<dyn Fn(&K) -> V + Send>,
}

impl<K, V> ResourceCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Resource,
{
    pub fn new(factory: impl Fn(&K) -> V + Send + 'static) -> Self {
        ResourceCache {
            map: foldhash::HashMap::default(),
            factory: Box::new(factory),
        }
    }

    /// Runs the factory for `key` and stores the result, releasing any prior
    /// value under the same key. Returns the freshly created value.
    pub fn create(&mut self, key: K) -> &V {
        let value = (self.factory)(&key);
        self.set(key.clone(), value);
        &self.map[&key]
    }

    /// Non-owning lookup.
    pub fn find(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// Stores `value` under `key`, destroying whatever was there before.
    pub fn set(&mut self, key: K, value: V) {
        if let Some(mut old) = self.map.insert(key, value) {
            old.on_release();
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Releases and drops every value.
    pub fn clear(&mut self) {
        debug!("Releasing {} cached resources", self.map.len());
        for (_, value) in self.map.iter_mut() {
            value.on_release();
        }
        self.map.clear();
    }
}
