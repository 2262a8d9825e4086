//! Max register - a totally ordered value whose join keeps the larger side.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// Holds the largest value observed so far.
///
/// `None` is the bottom element, so a register that never saw a write
/// joins as the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Max<T: Ord + Copy> {
    value: Option<T>,
}

impl<T: Ord + Copy> Max<T> {
    pub fn new(value: T) -> Self {
        Self { value: Some(value) }
    }

    pub fn get(&self) -> Option<T> {
        self.value
    }

    /// Raise the register to `value` if it is larger. Returns true if it changed.
    pub fn observe(&mut self, value: T) -> bool {
        match self.value {
            Some(current) if current >= value => false,
            _ => {
                self.value = Some(value);
                true
            }
        }
    }
}

impl<T: Ord + Copy> Lattice for Max<T> {
    fn bottom() -> Self {
        Self { value: None }
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            value: self.value.max(other.value),
        }
    }
}
