use std::collections::HashMap;

use parking_lot::RwLock;

/// Resolves sound ids to decoded buffers. Decoding and caching happen elsewhere.
pub trait AssetLookup<Buf> {
    fn get(&self, id: &str) -> Option<Buf>;
}

impl<Buf: Clone> AssetLookup<Buf> for HashMap<String, Buf> {
    fn get(&self, id: &str) -> Option<Buf> {
        HashMap::get(self, id).cloned()
    }
}

/// A shared registry of already-decoded buffers.
pub struct SoundBank<Buf> {
    buffers: RwLock<HashMap<String, Buf>>,
}

impl<Buf: Clone> SoundBank<Buf> {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a buffer, returning the one it replaced.
    pub fn insert(&self, id: impl Into<String>, buffer: Buf) -> Option<Buf> {
        self.buffers.write().insert(id.into(), buffer)
    }

    pub fn remove(&self, id: &str) -> Option<Buf> {
        self.buffers.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.buffers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}

impl<Buf: Clone> AssetLookup<Buf> for SoundBank<Buf> {
    fn get(&self, id: &str) -> Option<Buf> {
        self.buffers.read().get(id).cloned()
    }
}
