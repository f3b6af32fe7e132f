use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACTIVITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("activity");

pub const KIND_RUN: &str = "run";
pub const KIND_DISPATCH: &str = "dispatch";
pub const KIND_DONE: &str = "done";
pub const KIND_ERROR: &str = "error";
pub const KIND_LOST: &str = "lost";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub message: String,
    pub created_at: u64,
    pub kind: String,
}

/// Operator-facing notification log.
#[derive(Clone)]
pub struct ActivityStore {
    db: Arc<Database>,
}

impl ActivityStore {
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
        }
        let db = if path.exists() {
            Database::open(path).map_err(|e| e.to_string())?
        } else {
            Database::create(path).map_err(|e| e.to_string())?
        };
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    pub fn init_tables(&self) -> Result<(), String> {
        let write_txn = self.db.begin_write().map_err(|e| e.to_string())?;
        let _ = write_txn
            .open_table(ACTIVITY_TABLE)
            .map_err(|e| e.to_string())?;
        write_txn.commit().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn add_event(&self, kind: &str, message: impl Into<String>) -> Result<(), String> {
        let created_at = now_secs();
        let id = format!("{}-{}", created_at, Uuid::new_v4());
        let entry = ActivityEntry {
            id: id.clone(),
            message: message.into(),
            created_at,
            kind: kind.to_string(),
        };
        let bytes = bincode::serialize(&entry).map_err(|e| e.to_string())?;
        let write_txn = self.db.begin_write().map_err(|e| e.to_string())?;
        {
            let mut table = write_txn
                .open_table(ACTIVITY_TABLE)
                .map_err(|e| e.to_string())?;
            table
                .insert(id.as_str(), bytes.as_slice())
                .map_err(|e| e.to_string())?;
        }
        write_txn.commit().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Events newest first, with the total count.
    pub fn list_events(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ActivityEntry>, usize), String> {
        let read_txn = self.db.begin_read().map_err(|e| e.to_string())?;
        let table = match read_txn.open_table(ACTIVITY_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok((Vec::new(), 0)),
            Err(err) => return Err(err.to_string()),
        };

        let mut all = Vec::new();
        for entry in table.iter().map_err(|err| err.to_string())? {
            let entry = entry.map_err(|err| err.to_string())?;
            let item: ActivityEntry =
                bincode::deserialize(entry.1.value()).map_err(|err| err.to_string())?;
            all.push(item);
        }
        // ids start with the timestamp, so the id breaks ties within a second
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Ok((items, total))
    }

    pub fn clear_events(&self) -> Result<(), String> {
        let write_txn = self.db.begin_write().map_err(|e| e.to_string())?;
        match write_txn.delete_table(ACTIVITY_TABLE) {
            Ok(_) | Err(TableError::TableDoesNotExist(_)) => {}
            Err(err) => return Err(err.to_string()),
        }
        write_txn
            .open_table(ACTIVITY_TABLE)
            .map_err(|e| e.to_string())?;
        write_txn.commit().map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{ActivityStore, KIND_DONE, KIND_LOST};

    #[test]
    fn records_lists_and_clears_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActivityStore::open(&dir.path().join("activity.redb")).unwrap();
        store.add_event(KIND_DONE, "Downloaded A.m4a").unwrap();
        store.add_event(KIND_LOST, "Lost B").unwrap();

        let (items, total) = store.list_events(10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|item| item.kind == KIND_LOST));

        let (page, total) = store.list_events(1, 1).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);

        store.clear_events().unwrap();
        let (items, total) = store.list_events(10, 0).unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }
}
