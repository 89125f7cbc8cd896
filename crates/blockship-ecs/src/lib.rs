//! blockship-ecs -- signature-routed entity-component storage.
//!
//! Entities are grouped by the exact set of component types they carry. Each
//! distinct set ("signature") owns one [`ColumnStore`](store::ColumnStore): a
//! single contiguous buffer holding an entity-id column plus one dense column
//! per component type. Queries visit every store whose signature is a
//! superset of the requested types, so iteration touches only entities that
//! actually carry the requested data, laid out contiguously.
//!
//! Structural mutation (spawn, remove, delete) is fenced off from in-flight
//! queries by a reentrancy counter: any number of read traversals may be
//! outstanding, but mutating storage while one is alive is a fatal
//! programmer error, because growth and swap-removal invalidate the rows the
//! traversal is walking.
//!
//! # Quick Start
//!
//! ```
//! use blockship_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let ship = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 0.0 }));
//! let buoy = world.spawn((Position { x: 5.0, y: 5.0 },));
//!
//! // Only the ship carries both components.
//! for (id, (_pos, _vel)) in world.query::<(&Position, &Velocity)>() {
//!     assert_eq!(id, ship);
//! }
//! assert_eq!(world.query_count::<(&Position,)>(), 2);
//!
//! assert!(world.remove::<(Position, Velocity)>(ship));
//! assert!(world.get::<(&Position,)>(ship).is_none());
//! assert_eq!(world.get::<(&Position,)>(buoy).unwrap().0, &Position { x: 5.0, y: 5.0 });
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod component;
pub mod entity;
#[allow(unsafe_code)]
pub mod query;
pub mod signature;
#[allow(unsafe_code)]
pub mod store;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::EntityId;
    pub use crate::query::{Query, QueryItem, QueryIter, QueryIterMut};
    pub use crate::signature::Signature;
    pub use crate::store::ColumnStore;
    pub use crate::world::{ComponentSet, World};
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
