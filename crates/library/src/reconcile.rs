use common::{match_tokens, normalize, RemoteItem, Resolution};
use tracing::debug;

use crate::inventory::Inventory;
use crate::store::IdentityStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchReason {
    /// The id map names a file that is still on disk.
    ConfirmedFile,
    /// Previously dispatched and not disproved by a missing file.
    Dispatched,
    ExactTitle,
    ContainedTitle,
    TokenSubset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Present(MatchReason),
    NeedsDispatch,
}

impl Classification {
    pub fn is_present(&self) -> bool {
        matches!(self, Classification::Present(_))
    }
}

/// Decides whether `item` already exists locally. Signals are checked from the
/// most reliable to the fuzziest and the first match wins.
///
/// A recorded filename that is missing from the inventory disproves presence:
/// the history check is skipped for that item and only the title heuristics
/// can still keep it from being dispatched again.
pub fn classify(
    item: &RemoteItem,
    inventory: &Inventory,
    identity: &IdentityStore,
) -> Classification {
    let mut file_missing = false;
    if let Some(Resolution::File(filename)) = identity.resolution(&item.id) {
        if inventory.contains_filename(filename) {
            return Classification::Present(MatchReason::ConfirmedFile);
        }
        debug!("{} was recorded as {:?} but the file is gone", item.id, filename);
        file_missing = true;
    }

    if !file_missing && identity.is_dispatched(&item.id) {
        return Classification::Present(MatchReason::Dispatched);
    }

    let title = normalize(&item.title);
    if title.is_empty() {
        return Classification::NeedsDispatch;
    }
    if inventory.contains_key(&title) {
        return Classification::Present(MatchReason::ExactTitle);
    }
    if inventory.keys().any(|key| key.contains(title.as_str())) {
        return Classification::Present(MatchReason::ContainedTitle);
    }

    let tokens = match_tokens(&item.title);
    if !tokens.is_empty() && inventory.keys().any(|key| is_token_subset(&tokens, key)) {
        return Classification::Present(MatchReason::TokenSubset);
    }

    Classification::NeedsDispatch
}

fn is_token_subset(tokens: &[String], key: &str) -> bool {
    tokens.iter().all(|token| key.split(' ').any(|word| word == token))
}

/// Items of `items` that must be submitted, in playlist order. The same id is
/// returned at most once even if the playlist repeats it.
pub fn filter_dispatch<'a>(
    items: &'a [RemoteItem],
    inventory: &Inventory,
    identity: &IdentityStore,
) -> Vec<&'a RemoteItem> {
    let mut out: Vec<&RemoteItem> = Vec::new();
    for item in items {
        match classify(item, inventory, identity) {
            Classification::Present(reason) => {
                debug!("Skipping {:?} ({:?})", item.title, reason);
            }
            Classification::NeedsDispatch => {
                if !out.iter().any(|queued| queued.id == item.id) {
                    out.push(item);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use common::{RemoteItem, Resolution};

    use super::{classify, filter_dispatch, Classification, MatchReason};
    use crate::{IdentityStore, Inventory};

    fn item(id: &str, title: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            title: title.to_string(),
            url: id.to_string(),
        }
    }

    fn empty_store(dir: &tempfile::TempDir) -> IdentityStore {
        IdentityStore::open(
            &dir.path().join("history.json"),
            &dir.path().join("id_map.json"),
        )
        .unwrap()
    }

    #[test]
    fn confirmed_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.resolve("v1", Resolution::File("Renamed.m4a".to_string()));
        let inventory: Inventory = ["Renamed.m4a"].into_iter().collect();
        assert_eq!(
            classify(&item("v1", "Completely Different"), &inventory, &store),
            Classification::Present(MatchReason::ConfirmedFile)
        );
    }

    #[test]
    fn history_blocks_when_nothing_disproves_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.record_dispatch("v1");
        let inventory = Inventory::default();
        assert_eq!(
            classify(&item("v1", "Song"), &inventory, &store),
            Classification::Present(MatchReason::Dispatched)
        );
    }

    #[test]
    fn failure_marker_keeps_history_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.resolve("v1", Resolution::Failed("unavailable".to_string()));
        assert_eq!(
            classify(&item("v1", "Song"), &Inventory::default(), &store),
            Classification::Present(MatchReason::Dispatched)
        );
    }

    #[test]
    fn deleted_file_is_dispatched_again_despite_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.resolve("v1", Resolution::File("X.m4a".to_string()));
        assert!(store.is_dispatched("v1"));
        let inventory: Inventory = ["Unrelated.m4a"].into_iter().collect();
        assert_eq!(
            classify(&item("v1", "Song"), &inventory, &store),
            Classification::NeedsDispatch
        );
    }

    #[test]
    fn deleted_file_can_still_match_by_title() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.resolve("v1", Resolution::File("X.m4a".to_string()));
        let inventory: Inventory = ["Song.opus"].into_iter().collect();
        assert_eq!(
            classify(&item("v1", "Song"), &inventory, &store),
            Classification::Present(MatchReason::ExactTitle)
        );
    }

    #[test]
    fn title_rules_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let inventory: Inventory = [
            "Ｒｏｃｋ (Live).m4a",
            "Artist - Long Title Extended Mix.m4a",
            "song title full version.m4a",
        ]
        .into_iter()
        .collect();

        assert_eq!(
            classify(&item("a", "rock live"), &inventory, &store),
            Classification::Present(MatchReason::ExactTitle)
        );
        assert_eq!(
            classify(&item("b", "Long Title"), &inventory, &store),
            Classification::Present(MatchReason::ContainedTitle)
        );
        assert_eq!(
            classify(&item("c", "Song Title (Remix) [Official]"), &inventory, &store),
            Classification::Present(MatchReason::TokenSubset)
        );
        assert_eq!(
            classify(&item("d", "Brand New"), &inventory, &store),
            Classification::NeedsDispatch
        );
    }

    #[test]
    fn token_subset_direction_matters() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let inventory: Inventory = ["song.m4a"].into_iter().collect();
        assert_eq!(
            classify(&item("c", "Song Title (Remix) [Official]"), &inventory, &store),
            Classification::NeedsDispatch
        );
    }

    #[test]
    fn tokens_match_whole_words_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let inventory: Inventory = ["titles of songs.m4a"].into_iter().collect();
        assert_eq!(
            classify(&item("c", "Song (Live) Title"), &inventory, &store),
            Classification::NeedsDispatch
        );
    }

    #[test]
    fn symbol_only_title_is_never_matched_loosely() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let inventory: Inventory = ["anything.m4a"].into_iter().collect();
        assert_eq!(
            classify(&item("z", "???"), &inventory, &store),
            Classification::NeedsDispatch
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.record_dispatch("b");
        let inventory: Inventory = ["One.m4a", "Two (Live).m4a"].into_iter().collect();
        let items = [item("a", "one"), item("b", "x"), item("c", "Two"), item("d", "three")];
        for entry in &items {
            let first = classify(entry, &inventory, &store);
            for _ in 0..5 {
                assert_eq!(classify(entry, &inventory, &store), first);
            }
        }
    }

    #[test]
    fn filter_dispatch_keeps_order_and_drops_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir);
        let inventory: Inventory = ["Have It.m4a"].into_iter().collect();
        let items = vec![
            item("1", "New One"),
            item("2", "Have It"),
            item("3", "New Two"),
            item("1", "New One"),
        ];
        let ids: Vec<&str> = filter_dispatch(&items, &inventory, &store)
            .into_iter()
            .map(|item| item.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
