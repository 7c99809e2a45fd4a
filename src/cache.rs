//! Selective table-read memoization (spec §4.6).

use std::collections::{HashMap, HashSet};

/// Caches read-only, time-invariant table payloads by id. Defaults to the
/// meter's identity tables (0, 1), matching the reference's
/// `__cacheable_tbls__` default.
pub struct TableCache {
    enabled: bool,
    whitelist: HashSet<u16>,
    entries: HashMap<u16, Vec<u8>>,
}

impl Default for TableCache {
    fn default() -> Self {
        TableCache {
            enabled: true,
            whitelist: [0, 1].into_iter().collect(),
            entries: HashMap::new(),
        }
    }
}

impl TableCache {
    pub fn new(whitelist: impl IntoIterator<Item = u16>) -> Self {
        TableCache {
            enabled: true,
            whitelist: whitelist.into_iter().collect(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, table_id: u16) -> Option<&[u8]> {
        self.entries.get(&table_id).map(Vec::as_slice)
    }

    pub fn is_cacheable(&self, table_id: u16) -> bool {
        self.enabled && self.whitelist.contains(&table_id)
    }

    pub fn store(&mut self, table_id: u16, payload: Vec<u8>) {
        if self.is_cacheable(table_id) {
            self.entries.insert(table_id, payload);
        }
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    /// Toggles the cache; disabling also flushes, per spec §4.6.
    pub fn set_policy(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.flush();
        }
    }
}
