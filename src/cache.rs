//! Bounded LRU caches for tile reads.
//!
//! Matching reads every tile up to four times (once per neighbor side)
//! and the preview pass reads them again, so decoded tiles are kept in
//! two strict least-recently-used caches: grayscale keyed by
//! `(path, downscale)` and color keyed by `path`. Both share one
//! capacity bound. The LRU itself is an intrusive doubly-linked list
//! threaded through a slab, with a hash map from key to slot; `get` and
//! `insert` are O(1) and eviction happens on the insert that would
//! exceed capacity.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{GrayImage, RgbImage};

use crate::error::StitchResult;
use crate::imgio;
use crate::scale;

const NIL: usize = usize::MAX;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Strict LRU map over a slab of linked slots.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU capacity must be nonzero");
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up a key, marking it most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        Some(&self.slots[idx].value)
    }

    /// Insert a value, evicting the least recently used entry when the
    /// cache is full. An existing key is overwritten and refreshed.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            self.slots[idx].value = value;
            self.unlink(idx);
            self.push_front(idx);
            return;
        }
        if self.map.len() == self.capacity {
            let lru = self.tail;
            debug_assert_ne!(lru, NIL);
            self.unlink(lru);
            let old_key = self.slots[lru].key.clone();
            self.map.remove(&old_key);
            self.free.push(lru);
        }
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Slot {
                    key: key.clone(),
                    value,
                    prev: NIL,
                    next: NIL,
                };
                idx
            }
            None => {
                self.slots.push(Slot {
                    key: key.clone(),
                    value,
                    prev: NIL,
                    next: NIL,
                });
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}

/// The two tile caches used by the matching and preview stages.
pub struct TileCache {
    gray: LruCache<(PathBuf, u32), Arc<GrayImage>>,
    color: LruCache<PathBuf, Arc<RgbImage>>,
    resizer: fast_image_resize::Resizer,
}

impl TileCache {
    pub fn new(cache_max_items: usize) -> Self {
        Self {
            gray: LruCache::new(cache_max_items),
            color: LruCache::new(cache_max_items),
            resizer: fast_image_resize::Resizer::new(),
        }
    }

    /// Grayscale read with an optional integer downscale divisor
    /// (1 = full resolution).
    pub fn read_gray(&mut self, path: &Path, downscale: u32) -> StitchResult<Arc<GrayImage>> {
        let key = (path.to_path_buf(), downscale);
        if let Some(img) = self.gray.get(&key) {
            return Ok(Arc::clone(img));
        }
        let decoded = imgio::read_image(path)?.to_luma8();
        let img = if downscale > 1 {
            let w = (decoded.width() / downscale).max(1);
            let h = (decoded.height() / downscale).max(1);
            scale::downscale_gray(&mut self.resizer, &decoded, w, h)?
        } else {
            decoded
        };
        let img = Arc::new(img);
        self.gray.insert(key, Arc::clone(&img));
        Ok(img)
    }

    /// Full-resolution color read.
    pub fn read_color(&mut self, path: &Path) -> StitchResult<Arc<RgbImage>> {
        let key = path.to_path_buf();
        if let Some(img) = self.color.get(&key) {
            return Ok(Arc::clone(img));
        }
        let img = Arc::new(imgio::read_image(path)?.to_rgb8());
        self.color.insert(key, Arc::clone(&img));
        Ok(img)
    }

    /// Borrow the shared resizer (the preview pass reuses it).
    pub fn resizer(&mut self) -> &mut fast_image_resize::Resizer {
        &mut self.resizer
    }
}
