//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is an opaque 64-bit handle. The value 0 is reserved as the
//! invalid sentinel; live ids start at 1 and are handed out strictly
//! increasing. Ids are never reused, so a despawned entity's handle can never
//! accidentally name a later entity.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque entity handle.
///
/// The raw value 0 never names a live entity and can be used as a sentinel in
/// caller-side data (script handles, serialized scene references).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// The reserved invalid sentinel.
    pub const INVALID: Self = Self(0);

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether this handle could name a live entity (nonzero).
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityIds -- the monotonic allocator
// ---------------------------------------------------------------------------

/// Hands out strictly increasing [`EntityId`]s, starting at 1.
///
/// There is no recycling: every id is issued at most once per world.
/// Exhausting the 64-bit id space is a fatal contract violation.
#[derive(Debug)]
pub(crate) struct EntityIds {
    next: u64,
}

impl EntityIds {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id.
    ///
    /// # Panics
    ///
    /// Panics if the id counter has wrapped to 0 (the id space is exhausted).
    #[track_caller]
    pub(crate) fn allocate(&mut self) -> EntityId {
        assert!(self.next != 0, "entity id space exhausted (2^64 - 1 ids issued)");
        let id = EntityId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
