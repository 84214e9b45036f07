//! Structural checks over a tree of entries.
//!
//! The checks are written against the [`TreeView`] trait rather than the
//! store itself, so the same code can evaluate the committed tree or a
//! proposed tree (the store overlaid with pending updates).

use crate::entry::EntryKernel;
use crate::id::Id;
use std::collections::HashSet;
use std::fmt;

/// The structural fields of one entry as seen through a [`TreeView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Entry id.
    pub id: Id,
    /// Parent id.
    pub parent_id: Id,
    /// Name.
    pub name: String,
    /// Directory flag.
    pub is_dir: bool,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Sibling position.
    pub position: Option<i64>,
}

impl TreeNode {
    /// Returns true if the node is not a tombstone.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }
}

impl From<&EntryKernel> for TreeNode {
    fn from(entry: &EntryKernel) -> Self {
        Self {
            id: entry.id.clone(),
            parent_id: entry.parent_id.clone(),
            name: entry.name.clone(),
            is_dir: entry.is_dir,
            is_deleted: entry.is_deleted,
            position: entry.position,
        }
    }
}

/// Read access to a tree of entries.
pub trait TreeView {
    /// Returns the node for `id`, if known.
    fn node(&self, id: &Id) -> Option<TreeNode>;

    /// Returns the ids of every child of `parent`, live or deleted.
    ///
    /// The root is never reported as its own child.
    fn child_ids(&self, parent: &Id) -> Vec<Id>;
}

/// A broken tree invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    /// Two live siblings share a name.
    NameClash {
        /// Parent directory.
        parent: Id,
        /// Clashing name.
        name: String,
        /// Every live sibling with that name.
        members: Vec<Id>,
    },
    /// Two live siblings claim the same position.
    PositionClash {
        /// Parent directory.
        parent: Id,
        /// Contested position.
        position: i64,
        /// Every live sibling in that slot.
        members: Vec<Id>,
    },
    /// Following parent links from an entry returns to it.
    Cycle {
        /// Entries on the cycle.
        members: Vec<Id>,
    },
    /// A live entry sits under a missing, deleted or non-directory parent.
    Orphan {
        /// The orphaned entry.
        id: Id,
        /// Its parent.
        parent: Id,
    },
}

impl fmt::Display for TreeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeViolation::NameClash { parent, name, members } => {
                write!(f, "name clash on {name:?} under {parent}: {members:?}")
            }
            TreeViolation::PositionClash {
                parent,
                position,
                members,
            } => write!(f, "position {position} under {parent} claimed by {members:?}"),
            TreeViolation::Cycle { members } => write!(f, "cycle through {members:?}"),
            TreeViolation::Orphan { id, parent } => {
                write!(f, "live entry {id} under unusable parent {parent}")
            }
        }
    }
}

/// Returns the live children of `parent`.
pub fn live_children<V: TreeView + ?Sized>(view: &V, parent: &Id) -> Vec<TreeNode> {
    view.child_ids(parent)
        .iter()
        .filter_map(|id| view.node(id))
        .filter(TreeNode::is_live)
        .collect()
}

/// Returns true if `parent` has at least one live child.
pub fn has_live_children<V: TreeView + ?Sized>(view: &V, parent: &Id) -> bool {
    view.child_ids(parent)
        .iter()
        .filter_map(|id| view.node(id))
        .any(|node| node.is_live())
}

/// Returns the live descendants of `id`, deepest first.
///
/// Stops descending into anything already visited, so a cyclic tree
/// terminates.
pub fn live_descendants<V: TreeView + ?Sized>(view: &V, id: &Id) -> Vec<TreeNode> {
    let mut visited = HashSet::new();
    visited.insert(id.clone());
    let mut order = Vec::new();
    collect_descendants(view, id, &mut visited, &mut order);
    order
}

fn collect_descendants<V: TreeView + ?Sized>(
    view: &V,
    parent: &Id,
    visited: &mut HashSet<Id>,
    order: &mut Vec<TreeNode>,
) {
    for child in live_children(view, parent) {
        if visited.insert(child.id.clone()) {
            collect_descendants(view, &child.id, visited, order);
            order.push(child);
        }
    }
}

/// Returns the live siblings under `parent` named `name`, other than `exclude`.
pub fn find_name_clashes<V: TreeView + ?Sized>(
    view: &V,
    parent: &Id,
    name: &str,
    exclude: &Id,
) -> Vec<Id> {
    live_children(view, parent)
        .into_iter()
        .filter(|node| node.name == name && &node.id != exclude)
        .map(|node| node.id)
        .collect()
}

/// Returns the live siblings under `parent` at `position`, other than `exclude`.
pub fn find_position_clashes<V: TreeView + ?Sized>(
    view: &V,
    parent: &Id,
    position: i64,
    exclude: &Id,
) -> Vec<Id> {
    live_children(view, parent)
        .into_iter()
        .filter(|node| node.position == Some(position) && &node.id != exclude)
        .map(|node| node.id)
        .collect()
}

/// Checks whether re-parenting `id` under `new_parent` would close a cycle.
///
/// Returns the entries that would form the cycle (starting with `id`), or
/// `None` if the move is safe.
pub fn would_create_cycle<V: TreeView + ?Sized>(
    view: &V,
    id: &Id,
    new_parent: &Id,
) -> Option<Vec<Id>> {
    if id == new_parent {
        return Some(vec![id.clone()]);
    }

    let mut path = vec![id.clone()];
    let mut visited = HashSet::new();
    let mut current = new_parent.clone();

    loop {
        if current.is_root() {
            return None;
        }
        if &current == id {
            return Some(path);
        }
        if !visited.insert(current.clone()) {
            // An existing cycle that does not pass through `id`.
            return None;
        }
        path.push(current.clone());
        match view.node(&current) {
            Some(node) => current = node.parent_id,
            None => return None,
        }
    }
}

/// Returns the cycle passing through `id`, if following parent links from
/// `id` leads back to it.
pub fn cycle_through<V: TreeView + ?Sized>(view: &V, id: &Id) -> Option<Vec<Id>> {
    let node = view.node(id)?;
    if id.is_root() {
        return None;
    }
    would_create_cycle(view, id, &node.parent_id)
}

/// Returns true if `node` is live but its parent is missing, deleted or not
/// a directory.
pub fn is_orphaned<V: TreeView + ?Sized>(view: &V, node: &TreeNode) -> bool {
    if !node.is_live() || node.id.is_root() || node.parent_id.is_root() {
        return false;
    }
    match view.node(&node.parent_id) {
        Some(parent) => parent.is_deleted || !parent.is_dir,
        None => true,
    }
}

/// Verifies the invariants around each of `ids`.
///
/// Returns the first violation found. Tombstones and unknown ids are
/// skipped; a deleted entry still counts as a parent when checking that it
/// has no live children.
pub fn verify_entries<'a, V, I>(view: &V, ids: I) -> Result<(), TreeViolation>
where
    V: TreeView + ?Sized,
    I: IntoIterator<Item = &'a Id>,
{
    for id in ids {
        let Some(node) = view.node(id) else {
            continue;
        };

        if !node.is_live() || !node.is_dir {
            if let Some(child) = live_children(view, id).into_iter().next() {
                return Err(TreeViolation::Orphan {
                    id: child.id,
                    parent: id.clone(),
                });
            }
        }

        if !node.is_live() || node.id.is_root() {
            continue;
        }

        if is_orphaned(view, &node) {
            return Err(TreeViolation::Orphan {
                id: node.id.clone(),
                parent: node.parent_id.clone(),
            });
        }

        if let Some(members) = cycle_through(view, id) {
            return Err(TreeViolation::Cycle { members });
        }

        let clashes = find_name_clashes(view, &node.parent_id, &node.name, id);
        if !clashes.is_empty() {
            let mut members = clashes;
            members.push(id.clone());
            members.sort();
            return Err(TreeViolation::NameClash {
                parent: node.parent_id.clone(),
                name: node.name.clone(),
                members,
            });
        }

        if let Some(position) = node.position {
            let clashes = find_position_clashes(view, &node.parent_id, position, id);
            if !clashes.is_empty() {
                let mut members = clashes;
                members.push(id.clone());
                members.sort();
                return Err(TreeViolation::PositionClash {
                    parent: node.parent_id.clone(),
                    position,
                    members,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapView(BTreeMap<Id, TreeNode>);

    impl MapView {
        fn add(&mut self, id: &str, parent: Id, name: &str, is_dir: bool) -> Id {
            let id = Id::server(id);
            self.0.insert(
                id.clone(),
                TreeNode {
                    id: id.clone(),
                    parent_id: parent,
                    name: name.into(),
                    is_dir,
                    is_deleted: false,
                    position: None,
                },
            );
            id
        }
    }

    impl TreeView for MapView {
        fn node(&self, id: &Id) -> Option<TreeNode> {
            self.0.get(id).cloned()
        }

        fn child_ids(&self, parent: &Id) -> Vec<Id> {
            self.0
                .values()
                .filter(|n| &n.parent_id == parent && !n.id.is_root())
                .map(|n| n.id.clone())
                .collect()
        }
    }

    #[test]
    fn detects_name_clash() {
        let mut view = MapView::default();
        let a = view.add("a", Id::root(), "foo", false);
        let b = view.add("b", Id::root(), "foo", false);
        view.add("c", Id::root(), "bar", false);

        assert_eq!(find_name_clashes(&view, &Id::root(), "foo", &a), vec![b.clone()]);
        assert!(matches!(
            verify_entries(&view, [&a]),
            Err(TreeViolation::NameClash { members, .. }) if members == vec![a.clone(), b]
        ));
    }

    #[test]
    fn deleted_siblings_do_not_clash() {
        let mut view = MapView::default();
        let a = view.add("a", Id::root(), "foo", false);
        let b = view.add("b", Id::root(), "foo", false);
        view.0.get_mut(&b).unwrap().is_deleted = true;

        assert!(find_name_clashes(&view, &Id::root(), "foo", &a).is_empty());
        assert!(verify_entries(&view, [&a, &b]).is_ok());
    }

    #[test]
    fn move_under_own_descendant_is_a_cycle() {
        let mut view = MapView::default();
        let c = view.add("c", Id::root(), "c", true);
        let b = view.add("b", c.clone(), "b", true);
        let a = view.add("a", b.clone(), "a", true);

        let cycle = would_create_cycle(&view, &c, &a).unwrap();
        assert_eq!(cycle, vec![c.clone(), a.clone(), b.clone()]);
        assert!(would_create_cycle(&view, &a, &c).is_none());
        assert!(would_create_cycle(&view, &a, &a).is_some());
    }

    #[test]
    fn cycle_through_existing_loop() {
        let mut view = MapView::default();
        let a = view.add("a", Id::server("b"), "a", true);
        let b = view.add("b", a.clone(), "b", true);

        let members = cycle_through(&view, &a).unwrap();
        assert!(members.contains(&a));
        assert!(members.contains(&b));

        // An entry hanging off the loop is not itself on a cycle.
        let d = view.add("d", a.clone(), "d", false);
        assert!(cycle_through(&view, &d).is_none());
    }

    #[test]
    fn orphan_detection() {
        let mut view = MapView::default();
        let dir = view.add("dir", Id::root(), "dir", true);
        let child = view.add("child", dir.clone(), "child", false);
        view.0.get_mut(&dir).unwrap().is_deleted = true;

        let node = view.node(&child).unwrap();
        assert!(is_orphaned(&view, &node));
        assert!(matches!(
            verify_entries(&view, [&dir]),
            Err(TreeViolation::Orphan { .. })
        ));
    }

    #[test]
    fn descendants_deepest_first() {
        let mut view = MapView::default();
        let top = view.add("top", Id::root(), "top", true);
        let mid = view.add("mid", top.clone(), "mid", true);
        let leaf = view.add("leaf", mid.clone(), "leaf", false);

        let ids: Vec<Id> = live_descendants(&view, &top).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![leaf, mid]);
    }

    #[test]
    fn position_clash() {
        let mut view = MapView::default();
        let a = view.add("a", Id::root(), "a", false);
        let b = view.add("b", Id::root(), "b", false);
        view.0.get_mut(&a).unwrap().position = Some(1);
        view.0.get_mut(&b).unwrap().position = Some(1);

        assert_eq!(find_position_clashes(&view, &Id::root(), 1, &a), vec![b]);
        assert!(matches!(
            verify_entries(&view, [&a]),
            Err(TreeViolation::PositionClash { position: 1, .. })
        ));
    }
}
