//! Read transactions.

use super::BaseTransaction;
use crate::kernel::Kernel;
use parking_lot::RwLockReadGuard;

/// A consistent read-only view of the directory.
///
/// Holds the shared kernel lock; write transactions wait until it is dropped.
pub struct ReadTransaction<'a> {
    id: u64,
    kernel: RwLockReadGuard<'a, Kernel>,
}

impl<'a> ReadTransaction<'a> {
    pub(crate) fn new(id: u64, kernel: RwLockReadGuard<'a, Kernel>) -> Self {
        Self { id, kernel }
    }
}

impl BaseTransaction for ReadTransaction<'_> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKernel;
    use crate::id::Id;
    use crate::Directory;

    #[test]
    fn readers_share_the_lock() {
        let dir = Directory::open_in_memory("test");
        let first = dir.read();
        let second = dir.read();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.kernel().len(), second.kernel().len());
    }

    #[test]
    fn children_are_ordered_by_position() {
        let dir = Directory::open_in_memory("test");
        let mut wtx = dir.write();
        let mut b = EntryKernel::new_local(Id::root(), "b", false);
        b.position = Some(1);
        let mut a = EntryKernel::new_local(Id::root(), "a", false);
        a.position = Some(2);
        wtx.create_entry(a).unwrap();
        wtx.create_entry(b).unwrap();
        wtx.commit().unwrap();

        let rtx = dir.read();
        let names: Vec<&str> = rtx
            .children(&Id::root())
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(rtx.unsynced_ids().len(), 2);
    }
}
