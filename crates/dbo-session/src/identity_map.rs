//! Identity map: at most one resident object per id and class.
//!
//! The map holds weak references, so an object that no application handle,
//! dirty list or transaction refers to anymore is dropped and its entry
//! pruned. Loading the same id again while the object is still alive returns
//! the resident instance.

use crate::persist::Dbo;
use crate::ptr::MetaDbo;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub(crate) struct IdentityMap<C: Dbo> {
    entries: RefCell<HashMap<C::Id, Weak<MetaDbo<C>>>>,
}

impl<C: Dbo> IdentityMap<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, id: &C::Id) -> Option<Rc<MetaDbo<C>>> {
        self.entries.borrow().get(id).and_then(Weak::upgrade)
    }

    pub(crate) fn insert(&self, id: C::Id, meta: &Rc<MetaDbo<C>>) {
        if let Ok(mut entries) = self.entries.try_borrow_mut() {
            entries.insert(id, Rc::downgrade(meta));
        }
    }

    /// Remove the entry for `id` if it refers to `meta` or to a dropped object.
    pub(crate) fn remove(&self, id: &C::Id, meta: &MetaDbo<C>) {
        let Ok(mut entries) = self.entries.try_borrow_mut() else {
            return;
        };
        let matches = entries
            .get(id)
            .is_some_and(|entry| std::ptr::eq(entry.as_ptr(), meta) || entry.strong_count() == 0);
        if matches {
            entries.remove(id);
        }
    }

    /// Every object still alive.
    pub(crate) fn live(&self) -> Vec<Rc<MetaDbo<C>>> {
        self.entries
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.entries
            .try_borrow()
            .map(|entries| entries.values().filter(|e| e.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Author;

    #[test]
    fn entries_follow_object_lifetime() {
        let map = IdentityMap::<Author>::new();
        let meta = MetaDbo::new_transient(Author::default());
        map.insert(7, &meta);
        assert!(Rc::ptr_eq(&map.get(&7).unwrap(), &meta));
        assert_eq!(map.live_count(), 1);

        drop(meta);
        assert!(map.get(&7).is_none());
        assert_eq!(map.live_count(), 0);
        assert!(map.live().is_empty());
    }

    #[test]
    fn remove_ignores_other_instances() {
        let map = IdentityMap::<Author>::new();
        let first = MetaDbo::new_transient(Author::default());
        let second = MetaDbo::new_transient(Author::default());
        map.insert(1, &first);
        map.remove(&1, &second);
        assert!(map.get(&1).is_some());
        map.remove(&1, &first);
        assert!(map.get(&1).is_none());
    }
}
