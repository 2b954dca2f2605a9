//! Reuse allocators: a fixed-capacity free list and a key-keyed singleton
//! cache, used throughout the sampler and interceptor to avoid allocator
//! churn in the hot loop.

use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::rc::Rc;

/// A bounded stack of recycled instances. `allocate` reuses a recycled
/// instance when one is available and resets it via `reset`; otherwise it
/// calls `make`. `deallocate` releases resources held by the instance via
/// `release` and returns it to the pool only while under capacity.
pub struct FreeListPool<T> {
    free: Vec<T>,
    max_free: usize,
}

impl<T> FreeListPool<T> {
    pub fn new(max_free: usize) -> Self {
        FreeListPool {
            free: Vec::new(),
            max_free,
        }
    }

    pub fn allocate<A>(&mut self, args: A, reset: impl FnOnce(&mut T, &A), make: impl FnOnce(A) -> T) -> T {
        if let Some(mut instance) = self.free.pop() {
            reset(&mut instance, &args);
            instance
        } else {
            make(args)
        }
    }

    pub fn deallocate(&mut self, mut instance: T, release: impl FnOnce(&mut T)) {
        release(&mut instance);
        if self.free.len() < self.max_free {
            self.free.push(instance);
        }
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn len_free(&self) -> usize {
        self.free.len()
    }
}

/// A key-keyed singleton cache: the first caller for a given key pays the
/// cost of `make`; every later caller for the same key gets a clone of the
/// same `Rc`, so callers compare for identity if they need reference
/// equality (used for path interning and for the executable-symbol-table
/// cache).
pub struct SingletonCache<K, V> {
    entries: FxHashMap<K, Rc<V>>,
}

impl<K: Eq + Hash + Clone, V> SingletonCache<K, V> {
    pub fn new() -> Self {
        SingletonCache {
            entries: FxHashMap::default(),
        }
    }

    pub fn get_or_insert(&mut self, key: K, make: impl FnOnce() -> V) -> Rc<V> {
        if let Some(existing) = self.entries.get(&key) {
            return Rc::clone(existing);
        }
        let value = Rc::new(make());
        self.entries.insert(key, Rc::clone(&value));
        value
    }

    pub fn get(&self, key: &K) -> Option<Rc<V>> {
        self.entries.get(key).map(Rc::clone)
    }

    pub fn remove(&mut self, key: &K) -> Option<Rc<V>> {
        self.entries.remove(key)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V> Default for SingletonCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// String interning specialised for filesystem paths (and JIT-map/kernel
/// pseudo-paths): identical strings across many memory maps and many
/// processes share one `Rc<str>` allocation.
#[derive(Default)]
pub struct PathInterner {
    paths: FxHashMap<String, Rc<str>>,
}

impl PathInterner {
    pub fn new() -> Self {
        PathInterner {
            paths: FxHashMap::default(),
        }
    }

    pub fn intern(&mut self, path: &str) -> Rc<str> {
        if let Some(existing) = self.paths.get(path) {
            return Rc::clone(existing);
        }
        let rc: Rc<str> = Rc::from(path);
        self.paths.insert(path.to_string(), Rc::clone(&rc));
        rc
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_reuses_under_capacity() {
        let mut pool: FreeListPool<Vec<u8>> = FreeListPool::new(2);
        let a = pool.allocate((), |_, _| {}, |_| Vec::with_capacity(16));
        pool.deallocate(a, |v| v.clear());
        assert_eq!(pool.len_free(), 1);
        let b = pool.allocate((), |_, _| {}, |_| Vec::with_capacity(16));
        assert_eq!(pool.len_free(), 0);
        pool.deallocate(b, |v| v.clear());
    }

    #[test]
    fn free_list_drops_beyond_capacity() {
        let mut pool: FreeListPool<u32> = FreeListPool::new(1);
        pool.deallocate(1, |_| {});
        pool.deallocate(2, |_| {});
        assert_eq!(pool.len_free(), 1);
    }

    #[test]
    fn singleton_cache_shares_instance() {
        let mut cache: SingletonCache<String, String> = SingletonCache::new();
        let a = cache.get_or_insert("k".to_string(), || "v".to_string());
        let b = cache.get_or_insert("k".to_string(), || "other".to_string());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(*a, "v");
    }

    #[test]
    fn path_interner_shares_instance() {
        let mut interner = PathInterner::new();
        let a = interner.intern("/usr/sbin/gpm");
        let b = interner.intern("/usr/sbin/gpm");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn singleton_cache_retain_evicts() {
        let mut cache: SingletonCache<i32, i32> = SingletonCache::new();
        cache.get_or_insert(1, || 10);
        cache.get_or_insert(2, || 20);
        cache.retain(|k| *k == 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
    }
}
