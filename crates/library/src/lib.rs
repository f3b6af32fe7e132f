mod inventory;
mod reconcile;
mod store;

pub use inventory::{scan_folder, Inventory};
pub use reconcile::{classify, filter_dispatch, Classification, MatchReason};
pub use store::{
    HistoryLayout, IdMapLayout, IdentityStore, JsonFileStore, KeyValueStore, StoreLayout,
};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Layout(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Layout(value) => write!(f, "state file layout error: {}", value),
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Io(err) => Some(err),
            LibraryError::Json(err) => Some(err),
            LibraryError::Layout(_) => None,
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}
