//! Tree invariant assertions.

use std::collections::HashSet;
use treesync_core::tree::{cycle_through, find_name_clashes, is_orphaned, TreeView};
use treesync_core::{BaseTransaction, Directory, EntryKernel, Id};

/// Panics if the committed tree breaks any structural invariant.
///
/// Checks every live entry: its parent is a live folder, it is not its own
/// ancestor, and no live sibling shares its name or position.
pub fn assert_tree_invariants(dir: &Directory) {
    let rtx = dir.read();
    let kernel = rtx.kernel();
    for entry in kernel.iter() {
        if entry.id.is_root() || !entry.is_live() {
            continue;
        }
        let node = kernel.node(&entry.id).expect("entry vanished");
        assert!(
            !is_orphaned(kernel, &node),
            "live entry {} sits under unusable parent {}",
            entry.id,
            entry.parent_id
        );
        assert!(
            cycle_through(kernel, &entry.id).is_none(),
            "entry {} is its own ancestor",
            entry.id
        );
        let clashes = find_name_clashes(kernel, &entry.parent_id, &entry.name, &entry.id);
        assert!(
            clashes.is_empty(),
            "entry {} shares name {:?} with {:?}",
            entry.id,
            entry.name,
            clashes
        );
        if let Some(position) = entry.position {
            let taken: Vec<&Id> = rtx
                .children(&entry.parent_id)
                .into_iter()
                .filter(|e| e.id != entry.id && e.position == Some(position))
                .map(|e| &e.id)
                .collect();
            assert!(
                taken.is_empty(),
                "entry {} shares position {position} with {taken:?}",
                entry.id
            );
        }
    }
}

/// Returns every entry sorted by id, for comparing store states.
pub fn tree_fingerprint(dir: &Directory) -> Vec<EntryKernel> {
    let rtx = dir.read();
    let mut entries: Vec<EntryKernel> = rtx.kernel().iter().cloned().collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

/// Returns the names of the live children of `parent`.
pub fn live_child_names(dir: &Directory, parent: &Id) -> Vec<String> {
    let rtx = dir.read();
    let mut names: Vec<String> = rtx
        .children(parent)
        .into_iter()
        .map(|e| e.name.clone())
        .collect();
    names.sort();
    names
}

/// Returns the ids of live entries, root excluded.
pub fn live_ids(dir: &Directory) -> HashSet<Id> {
    dir.read()
        .kernel()
        .iter()
        .filter(|e| e.is_live() && !e.id.is_root())
        .map(|e| e.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{create_synced_entry, TestDirectory};

    #[test]
    fn clean_tree_passes() {
        let dir = TestDirectory::memory();
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        create_synced_entry(&dir, "2", docs.clone(), "a.txt", 1, false);
        assert_tree_invariants(&dir);
        assert_eq!(live_child_names(&dir, &docs), vec!["a.txt".to_string()]);
        assert_eq!(live_ids(&dir).len(), 2);
    }

    #[test]
    #[should_panic(expected = "shares name")]
    fn clash_is_reported() {
        let dir = TestDirectory::memory();
        create_synced_entry(&dir, "1", Id::root(), "same", 1, false);
        create_synced_entry(&dir, "2", Id::root(), "same", 1, false);
        assert_tree_invariants(&dir);
    }
}
