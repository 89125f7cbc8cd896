//! Fixed-width component-set signatures.
//!
//! A [`Signature`] is a 64-bit bitset with one bit per registered component
//! type index. It is the routing key for column stores: an entity lives in
//! the store whose signature exactly equals the signature of its component
//! set, and a query matches every store whose signature is a superset of the
//! query's own.

use crate::component::ComponentTypeId;
use std::fmt;

/// Bitset over component type indices. Capacity matches the per-world
/// component type limit of 64.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature(u64);

impl Signature {
    /// The signature containing no component types.
    pub const EMPTY: Self = Self(0);

    /// Set the bit for `id`.
    #[inline]
    pub fn insert(&mut self, id: ComponentTypeId) {
        self.0 |= 1u64 << id.index();
    }

    /// Builder-style [`insert`](Self::insert).
    #[inline]
    pub fn with(mut self, id: ComponentTypeId) -> Self {
        self.insert(id);
        self
    }

    /// Whether the bit for `id` is set.
    #[inline]
    pub fn contains(self, id: ComponentTypeId) -> bool {
        self.0 & (1u64 << id.index()) != 0
    }

    /// Whether every type in `self` is also present in `other`.
    #[inline]
    pub fn is_subset_of(self, other: Signature) -> bool {
        self.0 & other.0 == self.0
    }

    /// Number of component types in the set.
    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the contained type ids in ascending index order.
    pub fn iter(self) -> impl Iterator<Item = ComponentTypeId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let index = bits.trailing_zeros();
            bits &= bits - 1; // clear lowest set bit
            Some(ComponentTypeId::from_index(index))
        })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature{{")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id.index())?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
