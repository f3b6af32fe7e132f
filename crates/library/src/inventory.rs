use std::collections::{HashMap, HashSet};
use std::path::Path;

use common::normalize;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Normalized-name index of one local folder, rebuilt on every run.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    by_name: HashMap<String, String>,
    filenames: HashSet<String>,
}

impl Inventory {
    pub fn insert(&mut self, filename: &str) {
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = normalize(&stem);
        if let Some(previous) = self.by_name.insert(key, filename.to_string()) {
            debug!("{:?} and {:?} normalize to the same name", previous, filename);
        }
        self.filenames.insert(filename.to_string());
    }

    pub fn get(&self, normalized: &str) -> Option<&str> {
        self.by_name.get(normalized).map(String::as_str)
    }

    pub fn contains_key(&self, normalized: &str) -> bool {
        self.by_name.contains_key(normalized)
    }

    /// True when `filename` is one of the entry names seen by the scan.
    pub fn contains_filename(&self, filename: &str) -> bool {
        self.filenames.contains(filename)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Inventory {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut inventory = Inventory::default();
        for name in iter {
            inventory.insert(name.as_ref());
        }
        inventory
    }
}

/// Builds the inventory of the files directly inside `folder`. A missing
/// folder yields an empty inventory.
pub fn scan_folder(folder: &Path) -> Inventory {
    let mut inventory = Inventory::default();
    if !folder.exists() {
        return inventory;
    }
    for entry in WalkDir::new(folder)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry in {}: {}", folder.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        inventory.insert(&name);
    }
    inventory
}
