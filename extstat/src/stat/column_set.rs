use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};

/// Attribute number of a user column. Never zero.
pub type AttrNum = u16;

/// Unordered set of user attribute numbers.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ColumnSet(BTreeSet<AttrNum>);

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, returns `false` if it was already present.
    pub fn insert(&mut self, attnum: AttrNum) -> bool {
        debug_assert!(attnum > 0, "system and whole-row attributes can't be stored");
        self.0.insert(attnum)
    }

    pub fn contains(&self, attnum: AttrNum) -> bool {
        self.0.contains(&attnum)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Columns in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = AttrNum> + '_ {
        self.0.iter().copied()
    }

    pub fn union(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.union(&other.0).copied().collect())
    }

    pub fn union_with(&mut self, other: &ColumnSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn intersection(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn is_subset(&self, other: &ColumnSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<AttrNum> for ColumnSet {
    fn from_iter<T: IntoIterator<Item = AttrNum>>(iter: T) -> Self {
        let mut set = ColumnSet::new();
        for attnum in iter {
            set.insert(attnum);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ColumnSet {
    type Item = AttrNum;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, AttrNum>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

impl Debug for ColumnSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}
