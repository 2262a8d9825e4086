//! Join-semilattices.
//!
//! Liftable state only ever grows by `join`, which is commutative,
//! associative and idempotent. Replaying the same updates in any order, any
//! number of times, therefore lands every replica on the same value.

/// State that merges by least upper bound.
pub trait Lattice: Clone + PartialEq {
    /// Identity for [`Lattice::join`].
    fn bottom() -> Self;

    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    /// In-place join.
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// True when joining `other` would not change `self`.
    fn subsumes(&self, other: &Self) -> bool {
        &self.join(other) == self
    }
}

/// Join every element of an iterator, starting from bottom.
pub fn join_all<'a, L, I>(items: I) -> L
where
    L: Lattice + 'a,
    I: IntoIterator<Item = &'a L>,
{
    items
        .into_iter()
        .fold(L::bottom(), |acc, item| acc.join(item))
}
