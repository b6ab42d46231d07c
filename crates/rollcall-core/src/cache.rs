//! Process-wide cache of the full gallery snapshot.
//!
//! Holds at most one [`Gallery`]. A miss rebuilds from the enrollment store;
//! rebuilds are serialized so concurrent misses trigger one store read.
//! [`GalleryCache::invalidate`] bumps a generation counter, and a rebuild
//! that started before an invalidation is returned to its caller but never
//! installed.

use crate::matcher::Gallery;
use crate::store::{EnrollmentStore, StoreError};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Slot {
    generation: u64,
    gallery: Option<Arc<Gallery>>,
}

pub struct GalleryCache {
    store: Arc<dyn EnrollmentStore>,
    slot: RwLock<Slot>,
    rebuild: Mutex<()>,
}

impl GalleryCache {
    pub fn new(store: Arc<dyn EnrollmentStore>) -> Self {
        Self {
            store,
            slot: RwLock::new(Slot {
                generation: 0,
                gallery: None,
            }),
            rebuild: Mutex::new(()),
        }
    }

    /// Return the cached gallery, rebuilding it from the store on a miss.
    ///
    /// A failed rebuild leaves the slot as it was.
    pub fn get(&self) -> Result<Arc<Gallery>, StoreError> {
        if let Some(gallery) = &self.read_slot().gallery {
            return Ok(Arc::clone(gallery));
        }

        let _rebuilding = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have filled the slot while we waited.
        let generation = {
            let slot = self.read_slot();
            if let Some(gallery) = &slot.gallery {
                return Ok(Arc::clone(gallery));
            }
            slot.generation
        };

        let gallery = Arc::new(load_gallery(self.store.as_ref(), None)?);

        let mut slot = self.write_slot();
        if slot.generation == generation {
            slot.gallery = Some(Arc::clone(&gallery));
            tracing::debug!(entries = gallery.len(), generation, "gallery cached");
        } else {
            tracing::debug!(
                entries = gallery.len(),
                "gallery invalidated during rebuild; not caching"
            );
        }

        Ok(gallery)
    }

    /// Drop the cached gallery. The next [`get`](Self::get) reads the store.
    pub fn invalidate(&self) {
        let mut slot = self.write_slot();
        slot.gallery = None;
        slot.generation = slot.generation.wrapping_add(1);
        tracing::debug!(generation = slot.generation, "gallery cache invalidated");
    }

    pub fn is_cached(&self) -> bool {
        self.read_slot().gallery.is_some()
    }

    // The slot is only ever replaced wholesale, so a poisoned lock still
    // guards a consistent value.
    fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read entries from the store and build a gallery, bypassing any cache.
pub fn load_gallery(
    store: &dyn EnrollmentStore,
    subset: Option<&[String]>,
) -> Result<Gallery, StoreError> {
    let entries = store.load_all(subset)?;
    Gallery::from_entries(entries).map_err(StoreError::InvalidGallery)
}
