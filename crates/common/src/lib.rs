use serde::{Deserialize, Serialize};

mod normalize;

pub use normalize::{match_tokens, normalize, strip_bracketed_aside};

pub const FAILURE_PREFIX: &str = "ERROR: ";

/// One entry of a remote playlist as reported by the metadata source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Final local outcome recorded for a dispatched item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    File(String),
    Failed(String),
}

impl Resolution {
    /// Parses the stored form used in the id map file. Anything carrying the
    /// failure prefix is a failure marker, everything else a filename.
    pub fn from_stored(value: &str) -> Self {
        match value.strip_prefix(FAILURE_PREFIX) {
            Some(message) => Resolution::Failed(message.to_string()),
            None => Resolution::File(value.to_string()),
        }
    }

    pub fn to_stored(&self) -> String {
        match self {
            Resolution::File(name) => name.clone(),
            Resolution::Failed(message) => format!("{}{}", FAILURE_PREFIX, message),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Resolution::File(name) => Some(name.as_str()),
            Resolution::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Resolution::Failed(_))
    }
}

/// Last path component of a path reported by a remote system. Both separators
/// are accepted since the remote host may not share our platform.
pub fn file_name_of(path: &str) -> String {
    path.rsplit(|c| c == '/' || c == '\\')
        .find(|part| !part.is_empty())
        .unwrap_or("")
        .to_string()
}
