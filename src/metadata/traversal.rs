//! Bounded walks over the realized-class tree.
//!
//! Realized classes form a tree through intrusive links kept in each read-write record: a
//! class points at its first realized subclass and at its next sibling (the next realized
//! subclass of the same superclass). Corruption of those links can create cycles, so every
//! walk takes a node budget and reports [`Error::CorruptClassTree`] once it is exhausted.
//!
//! # Key Components
//!
//! - [`ClassTree`] - Link accessors of a class tree
//! - [`SubclassWalk`] - Pre-order iterator over a class and all its realized subclasses
//! - [`walk_subclasses`] - Visit a subtree, failing on budget exhaustion
//! - [`superclass_chain`] - Iterator from a class up to its root class

use crate::{metadata::class::ClassId, Error, Result};

/// Read access to the links of a class tree.
///
/// Implementations must keep the links stable while a walk is running, e.g. by holding the
/// lock that guards link updates.
pub trait ClassTree {
    /// First realized subclass of `class`
    fn first_subclass(&self, class: ClassId) -> Option<ClassId>;

    /// Next realized subclass of the superclass of `class`
    fn next_sibling(&self, class: ClassId) -> Option<ClassId>;

    /// Superclass of `class`
    fn superclass(&self, class: ClassId) -> Option<ClassId>;

    /// Name of `class` for diagnostics
    fn class_name(&self, class: ClassId) -> String;
}

/// Pre-order iterator over a subtree of a [`ClassTree`].
///
/// Yields the root first, then each subclass before its own subclasses. After the budget is
/// exhausted the iterator yields one [`Error::CorruptClassTree`] and then ends.
pub struct SubclassWalk<'t, T: ClassTree + ?Sized> {
    tree: &'t T,
    root: ClassId,
    next: Option<ClassId>,
    budget: usize,
    visits: usize,
    climbs: usize,
    corrupt: bool,
}

impl<'t, T: ClassTree + ?Sized> SubclassWalk<'t, T> {
    fn new(tree: &'t T, root: ClassId, budget: usize) -> Self {
        SubclassWalk {
            tree,
            root,
            next: Some(root),
            budget,
            visits: 0,
            climbs: 0,
            corrupt: false,
        }
    }

    fn advance(&mut self, current: ClassId) -> Option<ClassId> {
        if let Some(child) = self.tree.first_subclass(current) {
            return Some(child);
        }

        let mut class = current;
        loop {
            if class == self.root {
                return None;
            }
            if let Some(sibling) = self.tree.next_sibling(class) {
                return Some(sibling);
            }

            self.climbs += 1;
            if self.climbs > self.budget {
                self.corrupt = true;
                return None;
            }

            // A subclass always has a superclass; a missing one ends the walk
            class = self.tree.superclass(class)?;
        }
    }

    fn corruption(&mut self) -> Error {
        self.corrupt = false;
        self.next = None;
        Error::CorruptClassTree {
            class: self.tree.class_name(self.root),
            budget: self.budget,
        }
    }
}

impl<T: ClassTree + ?Sized> Iterator for SubclassWalk<'_, T> {
    type Item = Result<ClassId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.corrupt {
            return Some(Err(self.corruption()));
        }

        let current = self.next.take()?;
        if self.visits >= self.budget {
            return Some(Err(self.corruption()));
        }

        self.visits += 1;
        self.next = self.advance(current);
        Some(Ok(current))
    }
}

/// Iterate `root` and every realized subclass of it, visiting at most `budget` classes.
///
/// # Examples
///
/// ```rust
/// use objcore::metadata::class::ClassRo;
/// use objcore::metadata::traversal::subclasses;
/// use objcore::ClassRegistry;
///
/// let registry = ClassRegistry::default();
/// let root = registry.add_class(ClassRo::new("WalkRoot"), None)?;
/// let child = registry.add_class(ClassRo::new("WalkChild"), Some(root))?;
/// registry.realize(root)?;
/// registry.realize(child)?;
///
/// let visited = subclasses(&registry, root, 100).collect::<objcore::Result<Vec<_>>>()?;
/// assert_eq!(visited, vec![root, child]);
/// # Ok::<(), objcore::Error>(())
/// ```
pub fn subclasses<T: ClassTree + ?Sized>(
    tree: &T,
    root: ClassId,
    budget: usize,
) -> SubclassWalk<'_, T> {
    SubclassWalk::new(tree, root, budget)
}

/// Call `visit` for `root` and every realized subclass of it.
///
/// # Arguments
///
/// * `tree` - The class tree
/// * `root` - The class to start at
/// * `budget` - Maximum number of classes a sane subtree can hold
/// * `visit` - Called once per class, parents before their subclasses
///
/// # Returns
///
/// The number of classes visited.
///
/// # Errors
///
/// Returns [`Error::CorruptClassTree`] if the walk does not finish within `budget` classes.
/// Classes visited before the budget ran out have already been passed to `visit`.
pub fn walk_subclasses<T, F>(tree: &T, root: ClassId, budget: usize, mut visit: F) -> Result<usize>
where
    T: ClassTree + ?Sized,
    F: FnMut(ClassId),
{
    let mut count = 0;
    for class in subclasses(tree, root, budget) {
        visit(class?);
        count += 1;
    }
    Ok(count)
}

/// Iterator from a class up through its superclasses, bounded by a budget.
pub struct SuperclassChain<'t, T: ClassTree + ?Sized> {
    tree: &'t T,
    start: ClassId,
    next: Option<ClassId>,
    budget: usize,
    remaining: usize,
}

impl<T: ClassTree + ?Sized> Iterator for SuperclassChain<'_, T> {
    type Item = Result<ClassId>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if self.remaining == 0 {
            return Some(Err(Error::CorruptClassTree {
                class: self.tree.class_name(self.start),
                budget: self.budget,
            }));
        }

        self.remaining -= 1;
        self.next = self.tree.superclass(current);
        Some(Ok(current))
    }
}

/// Iterate `class` and its superclasses, root class last.
#[must_use]
pub fn superclass_chain<T: ClassTree + ?Sized>(
    tree: &T,
    class: ClassId,
    budget: usize,
) -> SuperclassChain<'_, T> {
    SuperclassChain {
        tree,
        start: class,
        next: Some(class),
        budget,
        remaining: budget,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct TestTree {
        first: HashMap<u32, u32>,
        sibling: HashMap<u32, u32>,
        parent: HashMap<u32, u32>,
    }

    impl TestTree {
        /// Link `child` as the newest subclass of `parent`
        fn link(&mut self, parent: u32, child: u32) {
            if let Some(old) = self.first.insert(parent, child) {
                self.sibling.insert(child, old);
            }
            self.parent.insert(child, parent);
        }
    }

    impl ClassTree for TestTree {
        fn first_subclass(&self, class: ClassId) -> Option<ClassId> {
            self.first.get(&class.value()).copied().and_then(ClassId::from_raw)
        }

        fn next_sibling(&self, class: ClassId) -> Option<ClassId> {
            self.sibling.get(&class.value()).copied().and_then(ClassId::from_raw)
        }

        fn superclass(&self, class: ClassId) -> Option<ClassId> {
            self.parent.get(&class.value()).copied().and_then(ClassId::from_raw)
        }

        fn class_name(&self, class: ClassId) -> String {
            format!("C{}", class.value())
        }
    }

    fn ids(values: &[u32]) -> Vec<ClassId> {
        values.iter().map(|v| ClassId::new(*v)).collect()
    }

    //      1
    //    /   \
    //   2     3
    //  / \     \
    // 4   5     6
    fn sample() -> TestTree {
        let mut tree = TestTree::default();
        tree.link(1, 3);
        tree.link(1, 2);
        tree.link(2, 5);
        tree.link(2, 4);
        tree.link(3, 6);
        tree
    }

    #[test]
    fn preorder_walk() {
        let tree = sample();
        let visited: Vec<ClassId> = subclasses(&tree, ClassId::new(1), 100)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(visited, ids(&[1, 2, 4, 5, 3, 6]));
    }

    #[test]
    fn subtree_walk_stays_inside() {
        let tree = sample();
        let mut visited = Vec::new();
        let count = walk_subclasses(&tree, ClassId::new(2), 100, |c| visited.push(c)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(visited, ids(&[2, 4, 5]));

        let leaf: Vec<_> = subclasses(&tree, ClassId::new(6), 100).collect();
        assert_eq!(leaf.len(), 1);
    }

    #[test]
    fn exact_budget_is_enough() {
        let tree = sample();
        assert_eq!(walk_subclasses(&tree, ClassId::new(1), 6, |_| {}).unwrap(), 6);
        assert!(walk_subclasses(&tree, ClassId::new(1), 5, |_| {}).is_err());
    }

    #[test]
    fn sibling_cycle_is_corruption() {
        let mut tree = sample();
        // 5 -> 4 -> 5 -> ...
        tree.sibling.insert(5, 4);

        let mut visits = 0;
        let result = walk_subclasses(&tree, ClassId::new(1), 50, |_| visits += 1);
        match result {
            Err(Error::CorruptClassTree { class, budget }) => {
                assert_eq!(class, "C1");
                assert_eq!(budget, 50);
            }
            other => panic!("expected corruption, got {:?}", other),
        }
        assert_eq!(visits, 50);
    }

    #[test]
    fn corruption_reported_once() {
        let mut tree = TestTree::default();
        tree.link(1, 2);
        tree.first.insert(2, 1);

        let results: Vec<_> = subclasses(&tree, ClassId::new(1), 10).collect();
        assert_eq!(results.len(), 11);
        assert!(results[..10].iter().all(Result::is_ok));
        assert!(results[10].is_err());
    }

    #[test]
    fn superclass_chain_order() {
        let tree = sample();
        let chain: Vec<ClassId> = superclass_chain(&tree, ClassId::new(5), 10)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chain, ids(&[5, 2, 1]));

        let mut cyclic = TestTree::default();
        cyclic.parent.insert(1, 2);
        cyclic.parent.insert(2, 1);
        assert!(superclass_chain(&cyclic, ClassId::new(1), 10).any(|c| c.is_err()));
    }
}
