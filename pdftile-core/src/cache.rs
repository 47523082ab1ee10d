//! Bounded tile storage.
//!
//! High-resolution parts and whole-page thumbnails live in two separate
//! stores so neither can push the other out. Both evict the entry with the
//! smallest `cache_order` first, skipping any key the latest plan still
//! needs.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::tile::{Tile, TileKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted { evicted: usize },
    Replaced,
    /// An entry with an equal or newer cache order already exists.
    Unchanged,
    /// Printing tiles are never cached.
    Printing,
    /// Every resident entry is protected; the tile was dropped.
    Full,
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Inserted { .. } | PutOutcome::Replaced)
    }
}

struct TileStore {
    capacity: usize,
    entries: HashMap<TileKey, Tile>,
}

impl TileStore {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn put(&mut self, tile: Tile, protected: &HashSet<TileKey>) -> PutOutcome {
        if let Some(existing) = self.entries.get_mut(&tile.key) {
            if existing.cache_order >= tile.cache_order {
                return PutOutcome::Unchanged;
            }
            *existing = tile;
            return PutOutcome::Replaced;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            if self.evict_oldest(protected).is_none() {
                debug!(page = tile.key.page, "tile store full of protected entries");
                return PutOutcome::Full;
            }
            evicted += 1;
        }
        self.entries.insert(tile.key, tile);
        PutOutcome::Inserted { evicted }
    }

    fn evict_oldest(&mut self, protected: &HashSet<TileKey>) -> Option<Tile> {
        let key = self
            .entries
            .values()
            .filter(|tile| !protected.contains(&tile.key))
            .min_by_key(|tile| tile.cache_order)
            .map(|tile| tile.key)?;
        self.entries.remove(&key)
    }

    fn shrink(&mut self, protected: &HashSet<TileKey>) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity && self.evict_oldest(protected).is_some() {
            evicted += 1;
        }
        evicted
    }
}

pub struct TileCache {
    parts: TileStore,
    thumbnails: TileStore,
    protected: HashSet<TileKey>,
}

impl TileCache {
    pub fn new(capacity: usize, thumbnail_capacity: usize) -> Self {
        Self {
            parts: TileStore::new(capacity),
            thumbnails: TileStore::new(thumbnail_capacity),
            protected: HashSet::new(),
        }
    }

    fn store(&self, key: &TileKey) -> &TileStore {
        if key.thumbnail {
            &self.thumbnails
        } else {
            &self.parts
        }
    }

    fn store_mut(&mut self, key: &TileKey) -> (&mut TileStore, &HashSet<TileKey>) {
        if key.thumbnail {
            (&mut self.thumbnails, &self.protected)
        } else {
            (&mut self.parts, &self.protected)
        }
    }

    pub fn get(&self, key: &TileKey) -> Option<&Tile> {
        self.store(key).entries.get(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.store(key).entries.contains_key(key)
    }

    pub fn put(&mut self, tile: Tile) -> PutOutcome {
        if tile.for_printing {
            return PutOutcome::Printing;
        }
        let key = tile.key;
        let (store, protected) = self.store_mut(&key);
        store.put(tile, protected)
    }

    /// Refreshes the recency of a resident tile. Returns whether it was found.
    pub fn touch(&mut self, key: &TileKey, cache_order: u64) -> bool {
        let (store, _) = self.store_mut(key);
        match store.entries.get_mut(key) {
            Some(tile) => {
                tile.cache_order = tile.cache_order.max(cache_order);
                true
            }
            None => false,
        }
    }

    /// Makes `active` the protected set and evicts unprotected entries,
    /// oldest first, until both stores fit their capacity.
    pub fn evict_except<I>(&mut self, active: I) -> usize
    where
        I: IntoIterator<Item = TileKey>,
    {
        self.protected = active.into_iter().collect();
        self.parts.shrink(&self.protected) + self.thumbnails.shrink(&self.protected)
    }

    pub fn is_protected(&self, key: &TileKey) -> bool {
        self.protected.contains(key)
    }

    pub fn len(&self) -> usize {
        self.parts.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.entries.is_empty() && self.thumbnails.entries.is_empty()
    }

    pub fn thumbnail_len(&self) -> usize {
        self.thumbnails.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.parts.capacity
    }

    pub fn thumbnail_capacity(&self) -> usize {
        self.thumbnails.capacity
    }

    pub fn parts(&self) -> impl Iterator<Item = &Tile> {
        self.parts.entries.values()
    }

    pub fn thumbnails(&self) -> impl Iterator<Item = &Tile> {
        self.thumbnails.entries.values()
    }

    /// Drops every tile, releasing the pixel buffers.
    pub fn clear(&mut self) {
        self.parts.entries.clear();
        self.thumbnails.entries.clear();
        self.protected.clear();
    }
}
