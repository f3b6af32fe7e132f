use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use common::Resolution;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::LibraryError;

/// Ordered key-value store. Iteration follows insertion order; `put_latest`
/// is the explicit move-to-end operation used to track recency.
pub trait KeyValueStore {
    type Value;

    fn get(&self, key: &str) -> Option<&Self::Value>;

    /// Inserts or replaces in place. A replaced key keeps its position.
    fn put(&mut self, key: &str, value: Self::Value);

    /// Removes any existing entry for `key` and appends it at the end.
    fn put_latest(&mut self, key: &str, value: Self::Value);

    fn delete(&mut self, key: &str) -> Option<Self::Value>;

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a str, &'a Self::Value)> + 'a>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists pending mutations. Returns whether anything was written.
    fn flush(&mut self) -> Result<bool, LibraryError>;
}

/// On-disk shape of a JSON state file.
pub trait StoreLayout {
    type Value: Clone + PartialEq + std::fmt::Debug;

    const NAME: &'static str;

    fn decode(bytes: &[u8]) -> Result<IndexMap<String, Self::Value>, LibraryError>;

    fn encode(entries: &IndexMap<String, Self::Value>) -> Result<Vec<u8>, LibraryError>;
}

/// Download history: a JSON array of item ids.
#[derive(Debug)]
pub struct HistoryLayout;

impl StoreLayout for HistoryLayout {
    type Value = ();

    const NAME: &'static str = "history";

    fn decode(bytes: &[u8]) -> Result<IndexMap<String, ()>, LibraryError> {
        let ids: Vec<String> = serde_json::from_slice(bytes)?;
        let mut entries = IndexMap::with_capacity(ids.len());
        for id in ids {
            // a repeated id lives at its last position
            entries.shift_remove(&id);
            entries.insert(id, ());
        }
        Ok(entries)
    }

    fn encode(entries: &IndexMap<String, ()>) -> Result<Vec<u8>, LibraryError> {
        let ids: Vec<&str> = entries.keys().map(String::as_str).collect();
        Ok(serde_json::to_vec_pretty(&ids)?)
    }
}

/// Id map: a JSON object from item id to filename or failure marker.
#[derive(Debug)]
pub struct IdMapLayout;

impl StoreLayout for IdMapLayout {
    type Value = Resolution;

    const NAME: &'static str = "id map";

    fn decode(bytes: &[u8]) -> Result<IndexMap<String, Resolution>, LibraryError> {
        let raw: IndexMap<String, serde_json::Value> = serde_json::from_slice(bytes)?;
        let mut entries = IndexMap::with_capacity(raw.len());
        for (id, value) in raw {
            match value {
                serde_json::Value::String(stored) => {
                    entries.insert(id, Resolution::from_stored(&stored));
                }
                other => {
                    return Err(LibraryError::Layout(format!(
                        "id map value for {:?} is not a string: {}",
                        id, other
                    )))
                }
            }
        }
        Ok(entries)
    }

    fn encode(entries: &IndexMap<String, Resolution>) -> Result<Vec<u8>, LibraryError> {
        let stored: IndexMap<&str, String> = entries
            .iter()
            .map(|(id, resolution)| (id.as_str(), resolution.to_stored()))
            .collect();
        Ok(serde_json::to_vec_pretty(&stored)?)
    }
}

/// A [`KeyValueStore`] kept in memory and written back to a JSON file as a
/// whole. A missing or blank file is an empty store.
#[derive(Debug)]
pub struct JsonFileStore<L: StoreLayout> {
    path: PathBuf,
    entries: IndexMap<String, L::Value>,
    dirty: bool,
    _layout: PhantomData<L>,
}

impl<L: StoreLayout> JsonFileStore<L> {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let entries = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                IndexMap::new()
            } else {
                L::decode(&bytes)?
            }
        } else {
            IndexMap::new()
        };
        debug!("Loaded {} {} entries from {:?}", entries.len(), L::NAME, path);
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
            _layout: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<L: StoreLayout> KeyValueStore for JsonFileStore<L> {
    type Value = L::Value;

    fn get(&self, key: &str) -> Option<&L::Value> {
        self.entries.get(key)
    }

    fn put(&mut self, key: &str, value: L::Value) {
        if self.entries.get(key) == Some(&value) {
            return;
        }
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn put_latest(&mut self, key: &str, value: L::Value) {
        if let Some((last_key, last_value)) = self.entries.last() {
            if last_key == key && *last_value == value {
                return;
            }
        }
        self.entries.shift_remove(key);
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn delete(&mut self, key: &str) -> Option<L::Value> {
        let removed = self.entries.shift_remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a str, &'a L::Value)> + 'a> {
        Box::new(self.entries.iter().map(|(k, v)| (k.as_str(), v)))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&mut self) -> Result<bool, LibraryError> {
        if !self.dirty {
            return Ok(false);
        }
        let bytes = L::encode(&self.entries)?;
        write_atomic(&self.path, &bytes)?;
        self.dirty = false;
        Ok(true)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// The two durable maps that remember dispatch and resolution decisions
/// across runs.
#[derive(Debug)]
pub struct IdentityStore {
    history: JsonFileStore<HistoryLayout>,
    id_map: JsonFileStore<IdMapLayout>,
}

impl IdentityStore {
    pub fn open(history_path: &Path, id_map_path: &Path) -> Result<Self, LibraryError> {
        let history = JsonFileStore::open(history_path)?;
        let id_map = JsonFileStore::open(id_map_path)?;
        info!(
            "Identity store loaded: {} dispatched, {} resolved",
            history.len(),
            id_map.len()
        );
        Ok(Self { history, id_map })
    }

    pub fn is_dispatched(&self, id: &str) -> bool {
        self.history.contains(id)
    }

    /// Records a submission. Re-dispatching an id moves it to the end.
    pub fn record_dispatch(&mut self, id: &str) {
        self.history.put_latest(id, ());
    }

    pub fn resolution(&self, id: &str) -> Option<&Resolution> {
        self.id_map.get(id)
    }

    /// Sets the resolution of `id`, moving it to the recency end of both maps.
    pub fn resolve(&mut self, id: &str, resolution: Resolution) {
        self.id_map.put_latest(id, resolution);
        self.history.put_latest(id, ());
    }

    /// Folds completed downloads reported by the remote queue. Entries whose
    /// filename is already recorded are left where they are, so folding the
    /// same list twice changes nothing. Returns the number of ids updated.
    pub fn fold_remote_done<'a, I>(&mut self, done: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut updated = 0usize;
        for (id, filename) in done {
            if id.is_empty() || filename.is_empty() {
                continue;
            }
            let resolution = Resolution::File(filename.to_string());
            if self.id_map.get(id) != Some(&resolution) {
                self.id_map.put_latest(id, resolution);
                updated += 1;
            }
            if !self.history.contains(id) {
                self.history.put(id, ());
            }
        }
        updated
    }

    pub fn history(&self) -> &JsonFileStore<HistoryLayout> {
        &self.history
    }

    pub fn id_map(&self) -> &JsonFileStore<IdMapLayout> {
        &self.id_map
    }

    pub fn failed_count(&self) -> usize {
        self.id_map
            .iter()
            .filter(|(_, resolution)| resolution.is_failed())
            .count()
    }

    pub fn is_dirty(&self) -> bool {
        self.history.is_dirty() || self.id_map.is_dirty()
    }

    /// Writes whichever maps changed since the last flush.
    pub fn flush(&mut self) -> Result<bool, LibraryError> {
        let wrote_history = self.history.flush()?;
        let wrote_id_map = self.id_map.flush()?;
        Ok(wrote_history || wrote_id_map)
    }
}
