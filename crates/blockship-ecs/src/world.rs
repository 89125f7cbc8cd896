//! The [`World`] owns the component registry, every column store, the entity
//! id counter, and the reentrancy counter that keeps structural mutation and
//! in-flight queries apart.
//!
//! Entities are routed by signature: spawning computes the exact signature of
//! the given component set and appends a row to the matching store, creating
//! it on first use. A store persists for the life of the world even when
//! emptied. Every other operation resolves its target stores by subset test
//! against the store signatures.

use crate::component::{ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityId, EntityIds};
use crate::query::Query;
use crate::signature::Signature;
use crate::store::ColumnStore;

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::mem;

// ---------------------------------------------------------------------------
// QueryGuard
// ---------------------------------------------------------------------------

/// Scoped hold on the world's "queries in progress" counter.
///
/// Constructed at the start of every read traversal and decremented when
/// dropped, so the counter cannot leak on any exit path. The counter counts
/// rather than flags: nested reads stack.
pub(crate) struct QueryGuard<'w> {
    counter: &'w Cell<u32>,
}

impl<'w> QueryGuard<'w> {
    fn new(counter: &'w Cell<u32>) -> Self {
        counter.set(counter.get() + 1);
        Self { counter }
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get() - 1);
    }
}

// ---------------------------------------------------------------------------
// ComponentSet -- tuples of component values
// ---------------------------------------------------------------------------

/// A tuple of component values that spawns as one entity, or names a set of
/// component types for [`World::remove`] and the delete operations.
///
/// Implemented for tuples of arity 1 through 4. Each member type must be
/// distinct within the tuple.
pub trait ComponentSet {
    /// Tuple arity, for duplicate detection.
    const ARITY: usize;

    /// Register every member type and return the combined signature.
    fn register(registry: &mut ComponentRegistry) -> Signature;

    /// Combined signature without registering. `None` when any member type
    /// was never registered (nothing can match it).
    fn lookup(registry: &ComponentRegistry) -> Option<Signature>;

    /// Move `self` into a fresh row of `store`, which must be the store for
    /// exactly this set's signature.
    fn spawn_into(self, store: &mut ColumnStore, id: EntityId, registry: &ComponentRegistry);
}

macro_rules! component_set_tuple {
    ($arity:literal; $($name:ident : $ty:ident),+) => {
        impl<$($ty: Clone + Send + Sync + 'static),+> ComponentSet for ($($ty,)+) {
            const ARITY: usize = $arity;

            fn register(registry: &mut ComponentRegistry) -> Signature {
                let mut signature = Signature::EMPTY;
                $(signature.insert(registry.index_of::<$ty>());)+
                signature
            }

            fn lookup(registry: &ComponentRegistry) -> Option<Signature> {
                let mut signature = Signature::EMPTY;
                $(signature.insert(registry.lookup::<$ty>()?);)+
                Some(signature)
            }

            fn spawn_into(self, store: &mut ColumnStore, id: EntityId, registry: &ComponentRegistry) {
                let ($($name,)+) = self;
                let components = [
                    $((
                        registry.lookup::<$ty>().expect("spawned type must be registered"),
                        &$name as *const $ty as *const u8,
                    ),)+
                ];
                #[allow(unsafe_code)]
                unsafe {
                    store.push(id, &components);
                }
                $(mem::forget($name);)+
            }
        }
    };
}

component_set_tuple!(1; a: A);
component_set_tuple!(2; a: A, b: B);
component_set_tuple!(3; a: A, b: B, c: C);
component_set_tuple!(4; a: A, b: B, c: C, d: D);

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The entity-component store.
pub struct World {
    registry: ComponentRegistry,
    /// All stores, in creation order. Stores are never destroyed.
    stores: Vec<ColumnStore>,
    /// Signature -> index into `stores`.
    store_index: HashMap<Signature, usize>,
    entity_ids: EntityIds,
    /// Nonzero while any query traversal is alive.
    queries_in_progress: Cell<u32>,
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            stores: Vec::new(),
            store_index: HashMap::new(),
            entity_ids: EntityIds::new(),
            queries_in_progress: Cell::new(0),
        }
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Total number of live entities across all stores.
    pub fn entity_count(&self) -> usize {
        self.stores.iter().map(ColumnStore::len).sum()
    }

    /// Number of distinct signatures that have ever been spawned.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    // -- reentrancy ---------------------------------------------------------

    /// Enter the Iterating state; the returned guard leaves it on drop.
    pub(crate) fn begin_query(&self) -> QueryGuard<'_> {
        QueryGuard::new(&self.queries_in_progress)
    }

    /// Structural operations require the Idle state. A violation means a
    /// caller is mutating storage an in-flight query is walking; continuing
    /// would corrupt the traversal, so this is fatal.
    #[track_caller]
    fn assert_idle(&self, operation: &str) {
        let in_progress = self.queries_in_progress.get();
        assert!(
            in_progress == 0,
            "{operation} called while {in_progress} queries are in progress"
        );
    }

    // -- store routing ------------------------------------------------------

    pub(crate) fn store(&self, index: usize) -> &ColumnStore {
        &self.stores[index]
    }

    /// Indices of every store whose signature is a superset of `required`,
    /// in store-creation order.
    pub(crate) fn matching_stores(&self, required: Signature) -> Vec<usize> {
        self.stores
            .iter()
            .enumerate()
            .filter(|(_, store)| required.is_subset_of(store.signature()))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn lookup_type<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.registry.lookup::<T>()
    }

    /// Find or lazily create the store for an exact signature.
    fn store_for(&mut self, signature: Signature) -> usize {
        if let Some(&index) = self.store_index.get(&signature) {
            return index;
        }
        let infos: Vec<_> = signature.iter().map(|id| self.registry.info(id)).collect();
        let store = ColumnStore::new(signature, &infos);
        let index = self.stores.len();
        tracing::debug!(?signature, columns = infos.len(), "created column store");
        self.stores.push(store);
        self.store_index.insert(signature, index);
        index
    }

    // -- structural operations ----------------------------------------------

    /// Spawn an entity carrying exactly the given components.
    ///
    /// The returned id is nonzero and strictly greater than every id issued
    /// before it.
    ///
    /// # Panics
    ///
    /// Panics if a query is in progress, if the id space is exhausted, if the
    /// set contains the same component type twice, or on registering a 65th
    /// component type.
    #[track_caller]
    pub fn spawn<S: ComponentSet>(&mut self, components: S) -> EntityId {
        self.assert_idle("spawn");
        let signature = S::register(&mut self.registry);
        assert!(
            signature.len() == S::ARITY,
            "spawn set contains the same component type more than once"
        );
        let id = self.entity_ids.allocate();
        let index = self.store_for(signature);
        components.spawn_into(&mut self.stores[index], id, &self.registry);
        id
    }

    /// Remove the entity `id`, looking in every store whose signature is a
    /// superset of `S`'s types. Stores are probed in creation order until one
    /// reports success. Returns whether any store removed the id.
    ///
    /// # Panics
    ///
    /// Panics if a query is in progress.
    #[track_caller]
    pub fn remove<S: ComponentSet>(&mut self, id: EntityId) -> bool {
        self.assert_idle("remove");
        let Some(required) = S::lookup(&self.registry) else {
            return false;
        };
        for store in &mut self.stores {
            if !required.is_subset_of(store.signature()) {
                continue;
            }
            if store.remove_entity(id) {
                return true;
            }
        }
        false
    }

    /// A reference view of `id`'s components, from the first superset-matching
    /// store that contains the id. `None` when no such store does.
    ///
    /// The view borrows the world, so it cannot outlive any later structural
    /// mutation (growth and swap-removal invalidate rows).
    pub fn get<Q: Query>(&self, id: EntityId) -> Option<Q::Item<'_>> {
        assert!(
            !Q::HAS_MUTABLE,
            "World::get cannot yield mutable items (&mut T); use World::get_mut"
        );
        let (index, row) = self.locate::<Q>(id)?;
        Some(Q::fetch_row(self, index, row))
    }

    /// Like [`get`](Self::get), with mutable access. Takes `&mut self`, which
    /// makes `&mut T` items sound.
    pub fn get_mut<Q: Query>(&mut self, id: EntityId) -> Option<Q::Item<'_>> {
        Q::validate_access(self);
        let (index, row) = self.locate::<Q>(id)?;
        Some(Q::fetch_row(self, index, row))
    }

    /// Linear scan of every superset-matching store for `id`'s row.
    fn locate<Q: Query>(&self, id: EntityId) -> Option<(usize, usize)> {
        let required = Q::signature(self)?;
        for (index, store) in self.stores.iter().enumerate() {
            if !required.is_subset_of(store.signature()) {
                continue;
            }
            if let Some(row) = store.entities().iter().position(|&e| e == id) {
                return Some((index, row));
            }
        }
        None
    }

    /// Empty every store whose signature is a superset of `S`'s types. The
    /// stores themselves (and their buffers) persist.
    ///
    /// # Panics
    ///
    /// Panics if a query is in progress.
    #[track_caller]
    pub fn delete_matching<S: ComponentSet>(&mut self) {
        self.assert_idle("delete_matching");
        let Some(required) = S::lookup(&self.registry) else {
            return;
        };
        for store in &mut self.stores {
            if required.is_subset_of(store.signature()) {
                store.clear();
            }
        }
    }

    /// Empty only the store whose signature equals `S`'s exactly. Returns
    /// whether such a store existed.
    ///
    /// # Panics
    ///
    /// Panics if a query is in progress.
    #[track_caller]
    pub fn delete_exact<S: ComponentSet>(&mut self) -> bool {
        self.assert_idle("delete_exact");
        let Some(signature) = S::lookup(&self.registry) else {
            return false;
        };
        match self.store_index.get(&signature) {
            Some(&index) => {
                self.stores[index].clear();
                true
            }
            None => false,
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("store_count", &self.stores.len())
            .field("component_types", &self.registry.len())
            .field("queries_in_progress", &self.queries_in_progress.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    #[test]
    fn spawn_returns_increasing_nonzero_ids() {
        let mut world = World::new();
        let mut previous = EntityId::INVALID;
        for i in 0..100 {
            let id = world.spawn((Pos {
                x: i as f32,
                y: 0.0,
            },));
            assert!(id.is_valid());
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn spawn_then_get_returns_the_values() {
        let mut world = World::new();
        let e = world.spawn((Pos { x: 1.0, y: 2.0 }, Vel { dx: 3.0, dy: 4.0 }));
        let (pos, vel) = world.get::<(&Pos, &Vel)>(e).unwrap();
        assert_eq!(pos, &Pos { x: 1.0, y: 2.0 });
        assert_eq!(vel, &Vel { dx: 3.0, dy: 4.0 });
    }

    #[test]
    fn get_with_subset_of_signature() {
        let mut world = World::new();
        let e = world.spawn((Pos { x: 1.0, y: 2.0 }, Vel { dx: 3.0, dy: 4.0 }));
        // The entity's store has {Pos, Vel}; requesting only Pos still finds it.
        let (pos,) = world.get::<(&Pos,)>(e).unwrap();
        assert_eq!(pos, &Pos { x: 1.0, y: 2.0 });
    }

    #[test]
    fn remove_then_get_is_none() {
        let mut world = World::new();
        let e = world.spawn((Pos { x: 1.0, y: 2.0 }, Vel { dx: 0.0, dy: 0.0 }));
        assert!(world.remove::<(Pos, Vel)>(e));
        assert!(world.get::<(&Pos, &Vel)>(e).is_none());
        assert!(!world.remove::<(Pos, Vel)>(e));
    }

    #[test]
    fn remove_with_subset_finds_the_store() {
        let mut world = World::new();
        let e = world.spawn((Pos { x: 0.0, y: 0.0 }, Vel { dx: 0.0, dy: 0.0 }));
        // {Pos} is a subset of the entity's {Pos, Vel} store.
        assert!(world.remove::<(Pos,)>(e));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn remove_of_unknown_type_is_false() {
        let mut world = World::new();
        let e = world.spawn((Pos { x: 0.0, y: 0.0 },));
        assert!(!world.remove::<(Vel,)>(e));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn removing_middle_entity_keeps_survivors_intact() {
        let mut world = World::new();
        let a = world.spawn((Pos { x: 1.0, y: 1.0 },));
        let b = world.spawn((Pos { x: 2.0, y: 2.0 },));
        let c = world.spawn((Pos { x: 3.0, y: 3.0 },));

        assert!(world.remove::<(Pos,)>(b));
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.get::<(&Pos,)>(a).unwrap().0, &Pos { x: 1.0, y: 1.0 });
        assert_eq!(world.get::<(&Pos,)>(c).unwrap().0, &Pos { x: 3.0, y: 3.0 });
        assert!(world.get::<(&Pos,)>(b).is_none());
    }

    #[test]
    fn get_mut_writes_through() {
        let mut world = World::new();
        let e = world.spawn((Health(10),));
        {
            let (health,) = world.get_mut::<(&mut Health,)>(e).unwrap();
            health.0 = 3;
        }
        assert_eq!(world.get::<(&Health,)>(e).unwrap().0, &Health(3));
    }

    #[test]
    fn stores_are_created_lazily_and_persist() {
        let mut world = World::new();
        assert_eq!(world.store_count(), 0);
        let e = world.spawn((Pos { x: 0.0, y: 0.0 },));
        assert_eq!(world.store_count(), 1);
        world.spawn((Pos { x: 0.0, y: 0.0 }, Vel { dx: 0.0, dy: 0.0 }));
        assert_eq!(world.store_count(), 2);

        // Emptying a store does not destroy it.
        assert!(world.remove::<(Pos,)>(e));
        assert!(world.delete_exact::<(Pos,)>());
        assert_eq!(world.store_count(), 2);
    }

    #[test]
    fn delete_exact_clears_only_the_exact_signature() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0, y: 0.0 },));
        world.spawn((Pos { x: 1.0, y: 1.0 }, Vel { dx: 0.0, dy: 0.0 }));

        assert!(world.delete_exact::<(Pos,)>());
        // Only the {Pos} store was emptied; the {Pos, Vel} store is intact.
        assert_eq!(world.query_count::<(&Pos,)>(), 1);
        assert_eq!(world.query_count::<(&Pos, &Vel)>(), 1);
    }

    #[test]
    fn delete_exact_on_absent_signature_is_false() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0, y: 0.0 }, Vel { dx: 0.0, dy: 0.0 }));
        // No store holds exactly {Pos}.
        assert!(!world.delete_exact::<(Pos,)>());
        assert!(!world.delete_exact::<(Health,)>());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn delete_matching_clears_every_superset_store() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0, y: 0.0 },));
        world.spawn((Pos { x: 0.0, y: 0.0 }, Vel { dx: 0.0, dy: 0.0 }));
        world.spawn((Health(1),));

        world.delete_matching::<(Pos,)>();
        assert_eq!(world.query_count::<(&Pos,)>(), 0);
        // The disjoint {Health} store is untouched.
        assert_eq!(world.query_count::<(&Health,)>(), 1);
    }

    #[test]
    fn growth_preserves_entities_and_values() {
        let mut world = World::new();
        let count = 100u64;
        let ids: Vec<EntityId> = (0..count)
            .map(|i| {
                world.spawn((
                    Pos {
                        x: i as f32,
                        y: -(i as f32),
                    },
                    Health(i as u32),
                ))
            })
            .collect();

        for (i, &id) in ids.iter().enumerate() {
            let (pos, health) = world.get::<(&Pos, &Health)>(id).unwrap();
            assert_eq!(pos.x, i as f32);
            assert_eq!(pos.y, -(i as f32));
            assert_eq!(health.0, i as u32);
        }
    }

    #[test]
    fn ids_continue_after_removal() {
        let mut world = World::new();
        let a = world.spawn((Pos { x: 0.0, y: 0.0 },));
        assert!(world.remove::<(Pos,)>(a));
        let b = world.spawn((Pos { x: 0.0, y: 0.0 },));
        // Ids are never reused.
        assert!(b > a);
    }

    #[test]
    #[should_panic(expected = "same component type more than once")]
    fn duplicate_spawn_types_are_fatal() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0, y: 0.0 }, Pos { x: 1.0, y: 1.0 }));
    }
}
