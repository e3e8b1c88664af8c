//! Generic object recycler for short-lived combat entities.
//!
//! Objects live in slots owned by the pool and are addressed through
//! generation-checked [`PoolHandle`]s, so a stale handle (one whose object has
//! already been released) can never release or read the object's next user.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Released objects waiting for reuse
    pub pooled: usize,
    pub active: usize,
    pub total: usize,
    /// Number of times the factory has run
    pub created: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

type Factory<T> = Box<dyn FnMut() -> T + Send>;
type Reset<T> = Box<dyn FnMut(&mut T) + Send>;
type Destroy<T> = Box<dyn FnMut(T) + Send>;

pub struct ObjectPool<T> {
    factory: Factory<T>,
    reset: Reset<T>,
    destroy: Option<Destroy<T>>,
    max_size: usize,
    slots: Vec<Slot<T>>,
    /// Slots holding a released, reusable object
    free: Vec<usize>,
    /// Slots whose object was discarded
    vacant: Vec<usize>,
    active: BTreeSet<PoolHandle>,
    created: usize,
}

impl<T> ObjectPool<T> {
    pub fn new(
        factory: impl FnMut() -> T + Send + 'static,
        reset: impl FnMut(&mut T) + Send + 'static,
        max_size: usize,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            reset: Box::new(reset),
            destroy: None,
            max_size,
            slots: Vec::new(),
            free: Vec::new(),
            vacant: Vec::new(),
            active: BTreeSet::new(),
            created: 0,
        }
    }

    /// Cleanup hook run on objects the pool discards instead of retaining.
    pub fn with_destroy(mut self, destroy: impl FnMut(T) + Send + 'static) -> Self {
        self.destroy = Some(Box::new(destroy));
        self
    }

    /// Hand out a released object, or build a new one when none is pooled.
    pub fn acquire(&mut self) -> PoolHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let value = (self.factory)();
                self.created += 1;
                match self.vacant.pop() {
                    Some(index) => {
                        self.slots[index].value = Some(value);
                        index
                    }
                    None => {
                        self.slots.push(Slot {
                            generation: 0,
                            value: Some(value),
                        });
                        self.slots.len() - 1
                    }
                }
            }
        };

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let handle = PoolHandle {
            index: index as u32,
            generation: slot.generation,
        };
        self.active.insert(handle);
        handle
    }

    /// Return an object to the pool. Returns false (and does nothing) when the
    /// handle is not currently active, which makes double release harmless.
    pub fn release(&mut self, handle: PoolHandle) -> bool {
        if !self.active.remove(&handle) {
            return false;
        }

        let index = handle.index as usize;
        if let Some(value) = self.slots[index].value.as_mut() {
            (self.reset)(value);
        }

        if self.free.len() < self.max_size {
            self.free.push(index);
        } else {
            self.discard(index);
        }
        true
    }

    /// Release every active object, then discard everything pooled.
    pub fn drain(&mut self) {
        let active: Vec<PoolHandle> = self.active.iter().copied().collect();
        for handle in active {
            self.release(handle);
        }
        while let Some(index) = self.free.pop() {
            self.discard(index);
        }
    }

    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        if !self.active.contains(&handle) {
            return None;
        }
        self.slots[handle.index as usize].value.as_ref()
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        if !self.active.contains(&handle) {
            return None;
        }
        self.slots[handle.index as usize].value.as_mut()
    }

    pub fn is_active(&self, handle: PoolHandle) -> bool {
        self.active.contains(&handle)
    }

    /// Snapshot of active handles, ordered by slot.
    pub fn active_handles(&self) -> Vec<PoolHandle> {
        self.active.iter().copied().collect()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.active
            .iter()
            .filter_map(|h| self.slots[h.index as usize].value.as_ref().map(|v| (*h, v)))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pooled: self.free.len(),
            active: self.active.len(),
            total: self.free.len() + self.active.len(),
            created: self.created,
        }
    }

    fn discard(&mut self, index: usize) {
        if let Some(value) = self.slots[index].value.take() {
            if let Some(destroy) = self.destroy.as_mut() {
                destroy(value);
            }
        }
        self.vacant.push(index);
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("max_size", &self.max_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Spark {
        x: f64,
        lit: bool,
    }

    fn spark_pool(max_size: usize) -> ObjectPool<Spark> {
        ObjectPool::new(Spark::default, |s: &mut Spark| *s = Spark::default(), max_size)
    }

    #[test]
    fn acquire_release_cycle_reuses_single_object() {
        let mut pool = spark_pool(5);
        for _ in 0..4 {
            let h = pool.acquire();
            assert!(pool.release(h));
        }
        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().pooled, 1);
    }

    #[test]
    fn exceeding_max_size_builds_new_objects() {
        let mut pool = spark_pool(2);
        let handles: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.stats().created, 5);
        assert_eq!(pool.stats().active, 5);

        for h in handles {
            pool.release(h);
        }
        // Only max_size objects are retained
        assert_eq!(pool.stats().pooled, 2);
        assert_eq!(pool.stats().total, 2);
    }

    #[test]
    fn double_release_is_noop() {
        let mut pool = spark_pool(4);
        let h = pool.acquire();
        assert!(pool.release(h));
        assert!(!pool.release(h));
        assert_eq!(pool.stats().pooled, 1);
    }

    #[test]
    fn stale_handle_cannot_touch_next_user() {
        let mut pool = spark_pool(4);
        let first = pool.acquire();
        pool.release(first);
        let second = pool.acquire();
        assert_ne!(first, second);
        assert!(pool.get(first).is_none());
        assert!(!pool.release(first));
        assert!(pool.is_active(second));
    }

    #[test]
    fn release_runs_reset() {
        let mut pool = spark_pool(4);
        let h = pool.acquire();
        {
            let spark = pool.get_mut(h).unwrap();
            spark.x = 42.0;
            spark.lit = true;
        }
        pool.release(h);
        let h2 = pool.acquire();
        let spark = pool.get(h2).unwrap();
        assert_eq!(spark.x, 0.0);
        assert!(!spark.lit);
    }

    #[test]
    fn discarded_objects_run_destroy_hook() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let mut pool = spark_pool(1).with_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_releases_active_and_empties_free_list() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let mut pool = spark_pool(10).with_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        pool.release(handles[0]);
        pool.drain();

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pooled, 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
        assert!(handles.iter().all(|h| !pool.is_active(*h)));

        // Vacant slots are reused by later construction
        pool.acquire();
        assert_eq!(pool.stats().created, 4);
    }
}
