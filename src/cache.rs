use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::time::Instant;
use zstd::stream::{decode_all, encode_all};

use crate::error::CacheError;
use crate::{ComponentId, Fingerprint, PropertyMap, SessionId};

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Debug)]
struct CacheEntry {
    id: ComponentId,
    snapshot: Vec<u8>,
    last_touched: Instant,
    /// Session whose liveness reports may collect this entry.
    owner: Option<SessionId>,
}

/// Protected component state keyed by fingerprint, held as zstd JSON.
///
/// Each operation is atomic on its own; a `get`/`put` pair spanning a request
/// is not, so concurrent requests for one fingerprint are last-writer-wins.
#[derive(Debug)]
pub struct ComponentCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    compression_level: i32,
}

impl Default for ComponentCache {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl ComponentCache {
    pub fn new(compression_level: i32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            compression_level,
        }
    }

    /// Protected properties stored under `fingerprint`, or `None` on a miss.
    ///
    /// A snapshot that no longer decodes counts as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<PropertyMap> {
        let snapshot = {
            let mut entries = self.entries.write();
            let entry = entries.get_mut(fingerprint)?;
            entry.last_touched = Instant::now();
            entry.snapshot.clone()
        };

        match decode_snapshot(&snapshot) {
            Ok(props) => Some(props),
            Err(err) => {
                tracing::warn!(%fingerprint, error = %err, "discarding unreadable cache snapshot");
                None
            }
        }
    }

    /// Store protected properties for the component `id` under `fingerprint`.
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        id: &ComponentId,
        props: &PropertyMap,
    ) -> Result<(), CacheError> {
        let snapshot = self.encode(props)?;
        self.insert(fingerprint, id, snapshot);
        Ok(())
    }

    /// Compressed snapshot of `props`, ready for [`ComponentCache::insert`].
    pub fn encode(&self, props: &PropertyMap) -> Result<Vec<u8>, CacheError> {
        encode_snapshot(props, self.compression_level)
    }

    /// Store an already encoded snapshot. An existing entry keeps its owner.
    pub fn insert(&self, fingerprint: Fingerprint, id: &ComponentId, snapshot: Vec<u8>) {
        let mut entries = self.entries.write();
        let owner = entries.get(&fingerprint).and_then(|e| e.owner.clone());
        let entry = CacheEntry {
            id: id.clone(),
            snapshot,
            last_touched: Instant::now(),
            owner,
        };
        entries.insert(fingerprint, entry);
    }

    /// Remove every entry whose component id is not in `live`.
    ///
    /// Returns the number of entries removed. Entries of live ids are never
    /// touched, however long ago they were last used.
    pub fn garbage_collect(&self, live: &HashSet<ComponentId>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| live.contains(&entry.id));
        let collected = before - entries.len();
        if collected > 0 {
            tracing::debug!(collected, remaining = entries.len(), "garbage collected components");
        }
        collected
    }

    /// Apply one session's liveness report.
    ///
    /// Unowned entries of ids in `live` are claimed by `session`. Entries the
    /// session owns are collected when their id is missing from `live`.
    /// Entries owned by other sessions, or by nobody, are left alone.
    pub fn collect_session(&self, session: &SessionId, live: &HashSet<ComponentId>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            if live.contains(&entry.id) {
                entry.owner.get_or_insert_with(|| session.clone());
                true
            } else {
                entry.owner.as_ref() != Some(session)
            }
        });
        let collected = before - entries.len();
        if collected > 0 {
            tracing::debug!(%session, collected, remaining = entries.len(), "garbage collected session components");
        }
        collected
    }

    /// Remove entries of components the client reported torn down.
    pub fn forget<'a>(&self, torn_down: impl IntoIterator<Item = &'a ComponentId>) -> usize {
        let torn_down: HashSet<&ComponentId> = torn_down.into_iter().collect();
        if torn_down.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !torn_down.contains(&entry.id));
        before - entries.len()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.read().contains_key(fingerprint)
    }

    pub fn owner(&self, fingerprint: &Fingerprint) -> Option<SessionId> {
        self.entries.read().get(fingerprint).and_then(|e| e.owner.clone())
    }

    /// When the entry was last read or written.
    pub fn last_touched(&self, fingerprint: &Fingerprint) -> Option<Instant> {
        self.entries.read().get(fingerprint).map(|e| e.last_touched)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn encode_snapshot(props: &PropertyMap, level: i32) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(props)?;
    Ok(encode_all(Cursor::new(json), level)?)
}

fn decode_snapshot(snapshot: &[u8]) -> Result<PropertyMap, CacheError> {
    let json = decode_all(Cursor::new(snapshot))?;
    Ok(serde_json::from_slice(&json)?)
}
