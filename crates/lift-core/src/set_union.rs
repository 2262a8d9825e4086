//! Set-union lattice - members can be inserted, never removed.
//!
//! Backs the `insert` operation kind: concurrent inserts merge by union,
//! and re-inserting a member is a no-op.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetUnion<T: Ord + Clone> {
    members: BTreeSet<T>,
}

impl<T: Ord + Clone> SetUnion<T> {
    pub fn new() -> Self {
        Self {
            members: BTreeSet::new(),
        }
    }

    /// A set holding exactly one member.
    pub fn singleton(member: T) -> Self {
        let mut set = Self::new();
        set.insert(member);
        set
    }

    /// Insert a member, returning true if it was not already present.
    pub fn insert(&mut self, member: T) -> bool {
        self.members.insert(member)
    }

    pub fn contains(&self, member: &T) -> bool {
        self.members.contains(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<T: Ord + Clone> Default for SetUnion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> FromIterator<T> for SetUnion<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl<T: Ord + Clone> Lattice for SetUnion<T> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            members: self.members.union(&other.members).cloned().collect(),
        }
    }
}
