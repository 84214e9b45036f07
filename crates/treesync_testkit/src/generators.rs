//! Property-based test generators using proptest.
//!
//! Server batches come in two flavours: consistent ones (what a correct
//! server would send, possibly reordered) and hostile ones (unknown
//! parents, cycles, clashing names, deletions of non-empty folders).

use proptest::prelude::*;
use treesync_protocol::{SyncEntity, ROOT_ID};

/// Small pool of names so that generated siblings clash often.
pub fn clashing_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a.txt".to_string()),
        Just("b.txt".to_string()),
        Just("Docs".to_string()),
        Just("notes".to_string()),
    ]
}

/// A consistent tree of up to `max_nodes` entities, parents listed first.
///
/// Node `k{i}` picks its parent among earlier folders (or the root); names
/// are unique per parent.
pub fn consistent_tree_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<SyncEntity>> {
    prop::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..=max_nodes).prop_map(
        |specs| {
            let mut folders: Vec<String> = vec![ROOT_ID.to_string()];
            let mut entities = Vec::with_capacity(specs.len());
            for (i, (is_folder, parent_pick)) in specs.into_iter().enumerate() {
                let parent = folders[parent_pick.index(folders.len())].clone();
                let id = format!("k{i}");
                let name = format!("item-{i}");
                let version = i as i64 + 1;
                if is_folder {
                    entities.push(SyncEntity::folder(id.clone(), parent, name, version));
                    folders.push(id);
                } else {
                    entities.push(SyncEntity::file(id, parent, name, version));
                }
            }
            entities
        },
    )
}

/// A consistent tree delivered in arbitrary order.
pub fn shuffled_tree_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<SyncEntity>> {
    consistent_tree_strategy(max_nodes).prop_shuffle()
}

/// An arbitrary batch over a small id space.
///
/// Parents may be unknown, point into cycles or at files; names clash;
/// some entities are tombstones.
pub fn hostile_batch_strategy(max_entities: usize) -> impl Strategy<Value = Vec<SyncEntity>> {
    let id = || (0u8..8).prop_map(|n| format!("h{n}"));
    let parent = prop_oneof![
        2 => Just(ROOT_ID.to_string()),
        5 => (0u8..10).prop_map(|n| format!("h{n}")),
    ];
    let entity = (
        id(),
        parent,
        clashing_name_strategy(),
        1i64..20,
        any::<bool>(),
        prop::bool::weighted(0.15),
        prop::option::weighted(0.3, 0i64..3),
    )
        .prop_map(|(id, parent, name, version, folder, deleted, position)| {
            let mut entity = if deleted {
                SyncEntity::tombstone(id, parent, version)
            } else if folder {
                SyncEntity::folder(id, parent, name, version)
            } else {
                SyncEntity::file(id, parent, name, version)
            };
            entity.position_in_parent = position;
            entity
        });
    prop::collection::vec(entity, 1..=max_entities)
}
