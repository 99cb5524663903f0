//! The List Array: per-class merge structure for method, property and protocol lists.
//!
//! A class accumulates metadata from several sources: the base list of its read-only record
//! plus one list per attached category. A [`ListArray`] holds nothing, exactly one list, or
//! a vector of lists, and presents them as one flattened sequence.
//!
//! # Ordering
//!
//! [`ListArray::attach_lists`] always inserts the new lists before the ones already present.
//! Iteration visits lists head to tail, so the most recently attached group is seen first and
//! the class's own base list last. A linear lookup resolving to the first match therefore
//! gives later categories precedence over earlier ones and over the class itself.
//!
//! # Representation
//!
//! Once the array form ([`ListArray::Many`]) is reached it is never left again, even if a
//! later operation would fit a simpler form.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use objcore::metadata::list_array::ListArray;
//! use objcore::metadata::records::{ProtocolList, ProtocolRecord};
//! use objcore::Symbol;
//!
//! let list = |name: &str| Arc::new(ProtocolList::new(&[ProtocolRecord { name: Symbol::intern(name) }]));
//!
//! let mut protocols = ListArray::from_base(Some(list("Base")));
//! protocols.attach_lists(vec![list("First")]);
//! protocols.attach_lists(vec![list("Second")]);
//!
//! let names: Vec<_> = protocols.iter().map(|p| p.name.as_str()).collect();
//! assert_eq!(names, ["Second", "First", "Base"]);
//! ```

use std::{fmt, sync::Arc};

use crate::metadata::{
    records::{MethodRecord, Record, RecordList},
    selector::{Imp, Selector},
};

/// Zero, one or many record lists of one kind.
pub enum ListArray<T: Record> {
    /// No list attached
    Empty,
    /// Exactly one list
    Single(Arc<RecordList<T>>),
    /// Several lists, most recently attached first
    Many(Vec<Arc<RecordList<T>>>),
}

impl<T: Record> Default for ListArray<T> {
    fn default() -> Self {
        ListArray::Empty
    }
}

impl<T: Record> ListArray<T> {
    /// Seed a List Array with the optional base list of a read-only record.
    #[must_use]
    pub fn from_base(base: Option<Arc<RecordList<T>>>) -> Self {
        match base {
            Some(list) => ListArray::Single(list),
            None => ListArray::Empty,
        }
    }

    /// Insert `lists` in front of every list already present, keeping their relative order.
    ///
    /// Attaching nothing is a no-op. Attaching one list to an empty array stores it as the
    /// single list; every other combination produces (or extends) the array form.
    pub fn attach_lists(&mut self, lists: Vec<Arc<RecordList<T>>>) {
        if lists.is_empty() {
            return;
        }

        match std::mem::take(self) {
            ListArray::Many(mut existing) => {
                existing.splice(0..0, lists);
                *self = ListArray::Many(existing);
            }
            ListArray::Empty if lists.len() == 1 => {
                if let Some(list) = lists.into_iter().next() {
                    *self = ListArray::Single(list);
                }
            }
            ListArray::Empty => {
                *self = ListArray::Many(lists);
            }
            ListArray::Single(old) => {
                let mut merged = lists;
                merged.push(old);
                *self = ListArray::Many(merged);
            }
        }
    }

    /// The contained lists in storage order.
    #[must_use]
    pub fn lists(&self) -> &[Arc<RecordList<T>>] {
        match self {
            ListArray::Empty => &[],
            ListArray::Single(list) => std::slice::from_ref(list),
            ListArray::Many(lists) => lists,
        }
    }

    /// The attached lists, excluding the class's own base list.
    ///
    /// # Arguments
    ///
    /// * `has_base` - Whether the owning class was seeded with a base list, which is then
    ///   the last one in storage order
    #[must_use]
    pub fn category_lists(&self, has_base: bool) -> &[Arc<RecordList<T>>] {
        let lists = self.lists();
        if has_base && !lists.is_empty() {
            &lists[..lists.len() - 1]
        } else {
            lists
        }
    }

    /// Iterate every element of every list, most recently attached list first.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.lists().iter().flat_map(|list| list.iter())
    }

    /// Total number of elements across all lists
    #[must_use]
    pub fn count(&self) -> usize {
        self.lists().iter().map(|list| list.len()).sum()
    }

    /// Number of contained lists
    #[must_use]
    pub fn count_lists(&self) -> usize {
        self.lists().len()
    }

    /// Returns `true` if no list is attached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, ListArray::Empty)
    }

    /// Returns `true` once the array form was reached
    #[must_use]
    pub fn is_many(&self) -> bool {
        matches!(self, ListArray::Many(_))
    }

    /// Replace the list at `index` (storage order), returning the previous one.
    pub fn replace_list(
        &mut self,
        index: usize,
        list: Arc<RecordList<T>>,
    ) -> Option<Arc<RecordList<T>>> {
        let slot = match self {
            ListArray::Empty => return None,
            ListArray::Single(single) if index == 0 => single,
            ListArray::Single(_) => return None,
            ListArray::Many(lists) => lists.get_mut(index)?,
        };

        Some(std::mem::replace(slot, list))
    }

    /// Deep copy: the representation and every list are duplicated.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let copy = |list: &Arc<RecordList<T>>| Arc::new(list.duplicate());
        match self {
            ListArray::Empty => ListArray::Empty,
            ListArray::Single(list) => ListArray::Single(copy(list)),
            ListArray::Many(lists) => ListArray::Many(lists.iter().map(copy).collect()),
        }
    }
}

impl ListArray<MethodRecord> {
    /// Find the first method named `sel` in iteration order.
    #[must_use]
    pub fn find(&self, sel: Selector) -> Option<MethodRecord> {
        self.lists().iter().find_map(|list| list.find(sel))
    }

    /// Replace every list not yet fixed up with a sorted private copy.
    ///
    /// Lookups resolve to the same methods afterwards: the sort is stable, so the first of
    /// several equal selectors in one list stays first.
    ///
    /// # Returns
    ///
    /// The number of lists replaced.
    pub fn fix_up_lists(&mut self) -> usize {
        let pending: Vec<usize> = self
            .lists()
            .iter()
            .enumerate()
            .filter(|(_, list)| !list.is_fixed_up())
            .map(|(index, _)| index)
            .collect();

        for &index in &pending {
            let mut private = self.lists()[index].duplicate();
            private.fix_up();
            self.replace_list(index, Arc::new(private));
        }
        pending.len()
    }

    /// Replace the implementation of the first method named `sel`.
    ///
    /// The list holding the method is privatized first; other holders of the previous list
    /// keep seeing the old implementation.
    ///
    /// # Returns
    ///
    /// The previous implementation, or `None` if no list defines `sel`.
    pub fn set_imp(&mut self, sel: Selector, imp: Imp) -> Option<Imp> {
        let (list_index, position, previous) =
            self.lists().iter().enumerate().find_map(|(list_index, list)| {
                let position = list.position(sel)?;
                let method = list.get(position)?;
                Some((list_index, position, method.imp))
            })?;

        let mut private = self.lists()[list_index].duplicate();
        private.set_imp(position, imp).ok()?;
        self.replace_list(list_index, Arc::new(private));

        Some(previous)
    }
}

impl<T: Record + fmt::Debug> fmt::Debug for ListArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ListArray::Empty => "Empty",
            ListArray::Single(_) => "Single",
            ListArray::Many(_) => "Many",
        };
        f.debug_struct("ListArray")
            .field("kind", &kind)
            .field("lists", &self.count_lists())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        records::MethodList,
        selector::{Imp, Symbol},
    };

    fn methods(prefix: &str, count: usize) -> Arc<MethodList> {
        let records: Vec<_> = (0..count)
            .map(|i| {
                MethodRecord::new(
                    Selector::intern(&format!("{}:{}", prefix, i)),
                    Symbol::intern("v16@0:8"),
                    Imp::new(0x1000 + i).unwrap(),
                )
            })
            .collect();
        Arc::new(MethodList::new(&records))
    }

    fn names(array: &ListArray<MethodRecord>) -> Vec<String> {
        array.iter().map(|m| m.name.name().to_string()).collect()
    }

    #[test]
    fn attach_order_last_first() {
        let mut array = ListArray::from_base(Some(methods("la:order:L0", 2)));
        array.attach_lists(vec![methods("la:order:L1", 1)]);
        array.attach_lists(vec![methods("la:order:L2", 2)]);

        assert_eq!(
            names(&array),
            [
                "la:order:L2:0",
                "la:order:L2:1",
                "la:order:L1:0",
                "la:order:L0:0",
                "la:order:L0:1"
            ]
        );
    }

    #[test]
    fn attach_group_keeps_relative_order() {
        let mut array = ListArray::from_base(Some(methods("la:group:base", 1)));
        array.attach_lists(vec![methods("la:group:a", 1), methods("la:group:b", 1)]);

        assert_eq!(
            names(&array),
            ["la:group:a:0", "la:group:b:0", "la:group:base:0"]
        );
    }

    #[test]
    fn transitions() {
        let mut array: ListArray<MethodRecord> = ListArray::default();
        assert!(array.is_empty());

        array.attach_lists(Vec::new());
        assert!(array.is_empty());

        array.attach_lists(vec![methods("la:tr:a", 1)]);
        assert!(matches!(array, ListArray::Single(_)));

        array.attach_lists(vec![methods("la:tr:b", 1)]);
        assert!(array.is_many());
        assert_eq!(array.count_lists(), 2);

        // Never reverts, not even through a deep copy
        assert!(array.duplicate().is_many());

        let mut two = ListArray::default();
        two.attach_lists(vec![methods("la:tr:c", 1), methods("la:tr:d", 1)]);
        assert!(two.is_many());
    }

    #[test]
    fn count_invariant() {
        let sizes = [3usize, 0, 5, 1, 2];
        let mut array = ListArray::from_base(Some(methods("la:count:base", 4)));
        for (i, size) in sizes.iter().enumerate() {
            array.attach_lists(vec![methods(&format!("la:count:{}", i), *size)]);
        }

        assert_eq!(array.count(), 4 + sizes.iter().sum::<usize>());
        assert_eq!(array.count_lists(), 1 + sizes.len());
        assert_eq!(array.iter().count(), array.count());
    }

    #[test]
    fn category_lists_exclude_base() {
        let mut array = ListArray::from_base(Some(methods("la:cat:base", 1)));
        assert!(array.category_lists(true).is_empty());

        array.attach_lists(vec![methods("la:cat:one", 1)]);
        assert_eq!(array.category_lists(true).len(), 1);
        assert_eq!(array.category_lists(false).len(), 2);

        let mut no_base: ListArray<MethodRecord> = ListArray::from_base(None);
        no_base.attach_lists(vec![methods("la:cat:two", 1)]);
        assert_eq!(no_base.category_lists(false).len(), 1);
    }

    #[test]
    fn duplicate_is_deep() {
        let base = methods("la:dup", 1);
        let array = ListArray::from_base(Some(base.clone()));
        let mut copy = array.duplicate();

        let sel = Selector::intern("la:dup:0");
        let previous = copy.set_imp(sel, Imp::new(0x42).unwrap());
        assert_eq!(previous, Some(Imp::new(0x1000).unwrap()));

        assert_eq!(array.find(sel).unwrap().imp.value(), 0x1000);
        assert_eq!(base.get(0).unwrap().imp.value(), 0x1000);
        assert_eq!(copy.find(sel).unwrap().imp.value(), 0x42);
    }

    #[test]
    fn set_imp_privatizes_shared_list() {
        let shared = methods("la:shared", 2);
        let mut array = ListArray::from_base(Some(shared.clone()));
        let sel = Selector::intern("la:shared:1");

        assert!(array.set_imp(sel, Imp::new(0x77).unwrap()).is_some());
        assert!(!Arc::ptr_eq(&array.lists()[0], &shared));
        assert_eq!(shared.get(1).unwrap().imp.value(), 0x1001);
        assert_eq!(array.find(sel).unwrap().imp.value(), 0x77);

        assert!(array
            .set_imp(Selector::intern("la:shared:missing"), Imp::new(1).unwrap())
            .is_none());
    }

    #[test]
    fn fix_up_lists_keeps_resolution() {
        let types = Symbol::intern("v16@0:8");
        let sel = Selector::intern("la:fixup:dup");
        let shared = Arc::new(MethodList::new(&[
            MethodRecord::new(Selector::intern("la:fixup:z"), types, Imp::new(9).unwrap()),
            MethodRecord::new(sel, types, Imp::new(1).unwrap()),
            MethodRecord::new(sel, types, Imp::new(2).unwrap()),
        ]));

        let mut array = ListArray::from_base(Some(shared.clone()));
        array.attach_lists(vec![methods("la:fixup:cat", 4)]);
        assert_eq!(array.fix_up_lists(), 2);
        assert_eq!(array.fix_up_lists(), 0);

        assert!(array.lists().iter().all(|list| list.is_fixed_up()));
        assert_eq!(array.find(sel).unwrap().imp.value(), 1);
        assert_eq!(array.count(), 7);

        // The shared list was copied, not sorted in place
        assert!(!shared.is_fixed_up());
        assert_eq!(shared.get(0).unwrap().imp.value(), 9);

        assert_eq!(array.set_imp(sel, Imp::new(3).unwrap()).map(|i| i.value()), Some(1));
        assert_eq!(array.find(sel).unwrap().imp.value(), 3);
    }

    #[test]
    fn find_prefers_latest() {
        let sel = Selector::intern("la:shadow");
        let list = |imp: usize| {
            Arc::new(MethodList::new(&[MethodRecord::new(
                sel,
                Symbol::intern("v16@0:8"),
                Imp::new(imp).unwrap(),
            )]))
        };

        let mut array = ListArray::from_base(Some(list(1)));
        assert_eq!(array.find(sel).unwrap().imp.value(), 1);
        array.attach_lists(vec![list(2)]);
        assert_eq!(array.find(sel).unwrap().imp.value(), 2);
        array.attach_lists(vec![list(3)]);
        assert_eq!(array.find(sel).unwrap().imp.value(), 3);
    }
}
