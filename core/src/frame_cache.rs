//! Bounded in-memory cache of decoded reference frames.
//!
//! Reference frames are loaded from PNG once and reused across many
//! condition checks; re-decoding on every check would dominate runtime for
//! routines with large frame sets. Eviction is plain least-recently-used.

use std::collections::HashMap;
use std::path::Path;

use crate::image_match::Bitmap;

const DEFAULT_CAPACITY: usize = 64;

/// An LRU cache keyed by frame id. `get` and `get_or_load` both count as a
/// use for recency purposes.
pub struct FrameCache {
    capacity: usize,
    entries: HashMap<String, Bitmap>,
    /// Most-recently-used id is at the back.
    recency: Vec<String>,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: Vec::new(),
        }
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == id) {
            self.recency.remove(pos);
        }
        self.recency.push(id.to_string());
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.capacity {
            if self.recency.is_empty() {
                break;
            }
            let victim = self.recency.remove(0);
            self.entries.remove(&victim);
        }
    }

    pub fn get(&mut self, id: &str) -> Option<&Bitmap> {
        if self.entries.contains_key(id) {
            self.touch(id);
            self.entries.get(id)
        } else {
            None
        }
    }

    pub fn insert(&mut self, id: String, frame: Bitmap) {
        self.entries.insert(id.clone(), frame);
        self.touch(&id);
        self.evict_if_needed();
    }

    /// Returns the cached frame for `id`, decoding and inserting it from
    /// `dir/<id>.png` if absent.
    pub fn get_or_load(&mut self, dir: &Path, id: &str) -> anyhow::Result<&Bitmap> {
        if !self.entries.contains_key(id) {
            let path = dir.join(format!("{id}.png"));
            let bytes = std::fs::read(&path)
                .map_err(|e| anyhow::anyhow!("reading reference frame {}: {e}", path.display()))?;
            let bitmap = Bitmap::decode_png(&bytes)?;
            self.insert(id.to_string(), bitmap);
        } else {
            self.touch(id);
        }
        Ok(self.entries.get(id).expect("just inserted or already present"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
