//! Query traversal over every store matching a component subset.
//!
//! A query names a tuple of component references: `(&Pos,)`, `(&Pos, &Vel)`,
//! `(&mut Pos, &Vel)`, and so on. It visits every entity whose signature is a
//! *superset* of the requested types, yielding `(EntityId, references)` per
//! row, in store-creation order then row order. Neither order is part of the
//! contract.
//!
//! ## Soundness
//!
//! Read-only queries (`&T`) go through [`World::query`], which takes `&self`.
//! Mutable queries (`&mut T`) go through [`World::query_mut`], which takes
//! `&mut self` and therefore guarantees exclusive access before any `&mut T`
//! is produced.
//!
//! Every iterator additionally holds the world's reentrancy guard for its
//! whole lifetime: constructing one moves the world out of the Idle state and
//! dropping it (on any exit path) moves it back. Structural operations check
//! that state at runtime, which is what catches misuse coming in through raw
//! handles the borrow checker never sees (the script host's world pointer).

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::signature::Signature;
use crate::world::{QueryGuard, World};

use std::marker::PhantomData;

// ---------------------------------------------------------------------------
// QueryItem -- one element of a query tuple
// ---------------------------------------------------------------------------

/// One element of a query fetch: `&T` (read) or `&mut T` (write).
pub trait QueryItem {
    /// The reference type yielded per row.
    type Item<'w>;
    /// The owned counterpart, materialized by `query_into_vec`.
    type Owned;
    /// Whether this item borrows mutably.
    const MUTABLE: bool;

    /// The component type id this item requires, if registered.
    fn type_id(world: &World) -> Option<ComponentTypeId>;

    /// Fetch one item from a store row.
    ///
    /// For `&T` items this is safe with `&World`. For `&mut T` items the
    /// caller must hold `&mut World` (see [`World::query_mut`]).
    fn fetch(world: &World, store: usize, row: usize) -> Self::Item<'_>;

    /// Clone the referenced value out of the store.
    fn cloned(item: &Self::Item<'_>) -> Self::Owned;
}

impl<T: Clone + Send + Sync + 'static> QueryItem for &T {
    type Item<'w> = &'w T;
    type Owned = T;
    const MUTABLE: bool = false;

    fn type_id(world: &World) -> Option<ComponentTypeId> {
        world.lookup_type::<T>()
    }

    fn fetch(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        let type_id = Self::type_id(world).expect("query item type not registered");
        let ptr = world
            .store(store)
            .component_ptr(type_id, row)
            .expect("store does not hold the queried component");
        #[allow(unsafe_code)]
        unsafe {
            &*ptr.cast::<T>()
        }
    }

    fn cloned(item: &Self::Item<'_>) -> T {
        (*item).clone()
    }
}

// Safety: the cast below produces a `&mut T` from shared world access. It is
// only reachable through `World::query_mut` / `World::get_mut`, which take
// `&mut self`, so no other reference into the world can exist.
impl<T: Clone + Send + Sync + 'static> QueryItem for &mut T {
    type Item<'w> = &'w mut T;
    type Owned = T;
    const MUTABLE: bool = true;

    fn type_id(world: &World) -> Option<ComponentTypeId> {
        world.lookup_type::<T>()
    }

    fn fetch(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        let type_id = Self::type_id(world).expect("query item type not registered");
        let ptr = world
            .store(store)
            .component_ptr(type_id, row)
            .expect("store does not hold the queried component");
        #[allow(unsafe_code)]
        unsafe {
            &mut *ptr.cast::<T>()
        }
    }

    fn cloned(item: &Self::Item<'_>) -> T {
        (**item).clone()
    }
}

// ---------------------------------------------------------------------------
// Query -- a tuple of QueryItems
// ---------------------------------------------------------------------------

/// A tuple of query items: `(&A,)`, `(&A, &B)`, `(&mut A, &B)`, ...
pub trait Query {
    /// The per-row reference tuple.
    type Item<'w>;
    /// The per-row owned tuple, for `query_into_vec`.
    type Owned;
    /// Whether any item borrows mutably.
    const HAS_MUTABLE: bool;

    /// Combined signature of the required types. `None` when any type was
    /// never registered, in which case nothing can match.
    fn signature(world: &World) -> Option<Signature>;

    /// Panic if the same component type is named mutably more than once, or
    /// both mutably and immutably. Aliased `&mut T` must never be produced.
    fn validate_access(world: &World);

    /// Fetch one row.
    fn fetch_row(world: &World, store: usize, row: usize) -> Self::Item<'_>;

    /// Clone one row out of the store.
    fn owned_row(world: &World, store: usize, row: usize) -> Self::Owned;
}

/// Shared access-conflict check for the larger tuple arities.
fn validate_no_access_conflicts(items: &[(bool, Option<ComponentTypeId>)]) {
    let mut writes: Vec<ComponentTypeId> = Vec::new();
    let mut reads: Vec<ComponentTypeId> = Vec::new();
    for &(mutable, type_id) in items {
        let Some(id) = type_id else { continue };
        if mutable {
            if writes.contains(&id) {
                panic!("query names the same component type mutably more than once");
            }
            if reads.contains(&id) {
                panic!("query mixes mutable and immutable access to the same component type");
            }
            writes.push(id);
        } else {
            if writes.contains(&id) {
                panic!("query mixes mutable and immutable access to the same component type");
            }
            reads.push(id);
        }
    }
}

impl<A: QueryItem> Query for (A,) {
    type Item<'w> = (A::Item<'w>,);
    type Owned = (A::Owned,);
    const HAS_MUTABLE: bool = A::MUTABLE;

    fn signature(world: &World) -> Option<Signature> {
        Some(Signature::EMPTY.with(A::type_id(world)?))
    }

    fn validate_access(_world: &World) {
        // Single item, nothing to conflict with.
    }

    fn fetch_row(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        (A::fetch(world, store, row),)
    }

    fn owned_row(world: &World, store: usize, row: usize) -> Self::Owned {
        (A::cloned(&A::fetch(world, store, row)),)
    }
}

impl<A: QueryItem, B: QueryItem> Query for (A, B) {
    type Item<'w> = (A::Item<'w>, B::Item<'w>);
    type Owned = (A::Owned, B::Owned);
    const HAS_MUTABLE: bool = A::MUTABLE || B::MUTABLE;

    fn signature(world: &World) -> Option<Signature> {
        Some(
            Signature::EMPTY
                .with(A::type_id(world)?)
                .with(B::type_id(world)?),
        )
    }

    fn validate_access(world: &World) {
        validate_no_access_conflicts(&[
            (A::MUTABLE, A::type_id(world)),
            (B::MUTABLE, B::type_id(world)),
        ]);
    }

    fn fetch_row(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        (A::fetch(world, store, row), B::fetch(world, store, row))
    }

    fn owned_row(world: &World, store: usize, row: usize) -> Self::Owned {
        (
            A::cloned(&A::fetch(world, store, row)),
            B::cloned(&B::fetch(world, store, row)),
        )
    }
}

impl<A: QueryItem, B: QueryItem, C: QueryItem> Query for (A, B, C) {
    type Item<'w> = (A::Item<'w>, B::Item<'w>, C::Item<'w>);
    type Owned = (A::Owned, B::Owned, C::Owned);
    const HAS_MUTABLE: bool = A::MUTABLE || B::MUTABLE || C::MUTABLE;

    fn signature(world: &World) -> Option<Signature> {
        Some(
            Signature::EMPTY
                .with(A::type_id(world)?)
                .with(B::type_id(world)?)
                .with(C::type_id(world)?),
        )
    }

    fn validate_access(world: &World) {
        validate_no_access_conflicts(&[
            (A::MUTABLE, A::type_id(world)),
            (B::MUTABLE, B::type_id(world)),
            (C::MUTABLE, C::type_id(world)),
        ]);
    }

    fn fetch_row(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        (
            A::fetch(world, store, row),
            B::fetch(world, store, row),
            C::fetch(world, store, row),
        )
    }

    fn owned_row(world: &World, store: usize, row: usize) -> Self::Owned {
        (
            A::cloned(&A::fetch(world, store, row)),
            B::cloned(&B::fetch(world, store, row)),
            C::cloned(&C::fetch(world, store, row)),
        )
    }
}

impl<A: QueryItem, B: QueryItem, C: QueryItem, D: QueryItem> Query for (A, B, C, D) {
    type Item<'w> = (A::Item<'w>, B::Item<'w>, C::Item<'w>, D::Item<'w>);
    type Owned = (A::Owned, B::Owned, C::Owned, D::Owned);
    const HAS_MUTABLE: bool = A::MUTABLE || B::MUTABLE || C::MUTABLE || D::MUTABLE;

    fn signature(world: &World) -> Option<Signature> {
        Some(
            Signature::EMPTY
                .with(A::type_id(world)?)
                .with(B::type_id(world)?)
                .with(C::type_id(world)?)
                .with(D::type_id(world)?),
        )
    }

    fn validate_access(world: &World) {
        validate_no_access_conflicts(&[
            (A::MUTABLE, A::type_id(world)),
            (B::MUTABLE, B::type_id(world)),
            (C::MUTABLE, C::type_id(world)),
            (D::MUTABLE, D::type_id(world)),
        ]);
    }

    fn fetch_row(world: &World, store: usize, row: usize) -> Self::Item<'_> {
        (
            A::fetch(world, store, row),
            B::fetch(world, store, row),
            C::fetch(world, store, row),
            D::fetch(world, store, row),
        )
    }

    fn owned_row(world: &World, store: usize, row: usize) -> Self::Owned {
        (
            A::cloned(&A::fetch(world, store, row)),
            B::cloned(&B::fetch(world, store, row)),
            C::cloned(&C::fetch(world, store, row)),
            D::cloned(&D::fetch(world, store, row)),
        )
    }
}

// ---------------------------------------------------------------------------
// QueryIter (read-only)
// ---------------------------------------------------------------------------

/// Iterator over `(EntityId, Q::Item)` for all matching entities. Obtained
/// from [`World::query`]; holds the reentrancy guard until dropped.
pub struct QueryIter<'w, Q: Query> {
    world: &'w World,
    /// Indices of the matching stores, in creation order.
    stores: Vec<usize>,
    store_cursor: usize,
    row_cursor: usize,
    _guard: QueryGuard<'w>,
    _marker: PhantomData<Q>,
}

impl<'w, Q: Query> QueryIter<'w, Q> {
    pub(crate) fn new(world: &'w World, stores: Vec<usize>) -> Self {
        Self {
            world,
            stores,
            store_cursor: 0,
            row_cursor: 0,
            _guard: world.begin_query(),
            _marker: PhantomData,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &store_idx = self.stores.get(self.store_cursor)?;
            let store = self.world.store(store_idx);
            if self.row_cursor < store.len() {
                let entity = store.entities()[self.row_cursor];
                let item = Q::fetch_row(self.world, store_idx, self.row_cursor);
                self.row_cursor += 1;
                return Some((entity, item));
            }
            self.store_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// QueryIterMut
// ---------------------------------------------------------------------------

/// Iterator over `(EntityId, Q::Item)` with mutable items. Obtained from
/// [`World::query_mut`]; the `'w` lifetime is tied to the exclusive world
/// borrow, so no aliasing reference can exist while it lives.
pub struct QueryIterMut<'w, Q: Query> {
    world: &'w World,
    stores: Vec<usize>,
    store_cursor: usize,
    row_cursor: usize,
    _guard: QueryGuard<'w>,
    _marker: PhantomData<Q>,
}

impl<'w, Q: Query> QueryIterMut<'w, Q> {
    /// `world` must be a reborrow of an exclusive (`&mut World`) borrow.
    pub(crate) fn new(world: &'w World, stores: Vec<usize>) -> Self {
        Self {
            world,
            stores,
            store_cursor: 0,
            row_cursor: 0,
            _guard: world.begin_query(),
            _marker: PhantomData,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIterMut<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &store_idx = self.stores.get(self.store_cursor)?;
            let store = self.world.store(store_idx);
            if self.row_cursor < store.len() {
                let entity = store.entities()[self.row_cursor];
                let item = Q::fetch_row(self.world, store_idx, self.row_cursor);
                self.row_cursor += 1;
                return Some((entity, item));
            }
            self.store_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// World query surface
// ---------------------------------------------------------------------------

impl World {
    /// Iterate every entity whose signature is a superset of `Q`'s types.
    ///
    /// Rejects mutable query items; use [`query_mut`](Self::query_mut) for
    /// those. Nested read queries are fine. Structural operations panic while
    /// any query iterator is alive.
    ///
    /// ```ignore
    /// for (id, (pos, vel)) in world.query::<(&Position, &Velocity)>() {
    ///     debug!(?id, ?pos, ?vel);
    /// }
    /// ```
    pub fn query<Q: Query>(&self) -> QueryIter<'_, Q> {
        assert!(
            !Q::HAS_MUTABLE,
            "World::query cannot yield mutable items (&mut T); use World::query_mut"
        );
        QueryIter::new(self, self.matching_store_indices::<Q>())
    }

    /// Iterate with mutable access to components. Takes `&mut self`, which
    /// makes producing `&mut T` items sound and rules out nesting.
    ///
    /// ```ignore
    /// for (_id, (pos, vel)) in world.query_mut::<(&mut Position, &Velocity)>() {
    ///     pos.x += vel.dx;
    ///     pos.y += vel.dy;
    /// }
    /// ```
    pub fn query_mut<Q: Query>(&mut self) -> QueryIterMut<'_, Q> {
        Q::validate_access(self);
        QueryIterMut::new(self, self.matching_store_indices::<Q>())
    }

    /// Number of rows [`query`](Self::query) would visit, without visiting
    /// them. Guarded like a query for the duration of the call.
    pub fn query_count<Q: Query>(&self) -> usize {
        let _guard = self.begin_query();
        self.matching_store_indices::<Q>()
            .iter()
            .map(|&idx| self.store(idx).len())
            .sum()
    }

    /// Materialize every matching row into an owned `Vec`.
    ///
    /// The reentrancy guard is released before the `Vec` is returned, so this
    /// is the sanctioned way to gather results and then spawn or remove based
    /// on them.
    pub fn query_into_vec<Q: Query>(&self) -> Vec<(EntityId, Q::Owned)> {
        assert!(
            !Q::HAS_MUTABLE,
            "query_into_vec clones rows out of storage; request shared items (&T)"
        );
        let mut rows = Vec::new();
        {
            let _guard = self.begin_query();
            for idx in self.matching_store_indices::<Q>() {
                let store = self.store(idx);
                rows.reserve(store.len());
                for row in 0..store.len() {
                    rows.push((store.entities()[row], Q::owned_row(self, idx, row)));
                }
            }
        }
        rows
    }

    /// Indices of every store whose signature is a superset of `Q`'s.
    fn matching_store_indices<Q: Query>(&self) -> Vec<usize> {
        match Q::signature(self) {
            Some(required) => self.matching_stores(required),
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
