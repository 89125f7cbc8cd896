//! Dense column storage for one exact component signature.
//!
//! A [`ColumnStore`] holds every entity whose component set matches its
//! signature exactly. The storage is a single contiguous heap allocation:
//! the entity-id column sits at offset 0, followed by one column per
//! component type at an aligned byte offset, each `capacity` elements long.
//! Row `i` of every column describes the same entity; rows are dense and
//! swap-removal reorders them.
//!
//! # Safety
//!
//! Component data is type-erased: columns are addressed by byte offset and
//! described only by a [`ComponentInfo`]. The [`World`](crate::world::World)
//! guarantees that every access pairs a column with the descriptor of the
//! type actually stored there.

use crate::component::{ComponentInfo, ComponentTypeId};
use crate::entity::EntityId;
use crate::signature::Signature;

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr;

/// Rows allocated for a store before its first growth.
pub(crate) const INITIAL_CAPACITY: usize = 8;

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// Placement and element operations for one component column inside the
/// store's buffer. `offset` is recomputed whenever the buffer is reallocated.
struct Column {
    type_id: ComponentTypeId,
    /// Byte offset of the column's first element in the current buffer.
    offset: usize,
    size: usize,
    align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

// ---------------------------------------------------------------------------
// ColumnStore
// ---------------------------------------------------------------------------

/// Dense, type-erased storage for all entities sharing one exact signature.
pub struct ColumnStore {
    signature: Signature,
    /// Number of live rows.
    len: usize,
    /// Number of rows the current buffer can hold.
    capacity: usize,
    /// The single backing allocation.
    data: *mut u8,
    /// Layout of the current allocation (needed to free it).
    layout: Layout,
    /// One entry per component type, sorted by ascending type id.
    columns: Vec<Column>,
}

// Raw pointers keep the compiler from deriving these. Component types are
// required to be Send + Sync at registration, and the buffer is exclusively
// owned, so moving or sharing the store across threads is sound.
unsafe impl Send for ColumnStore {}
unsafe impl Sync for ColumnStore {}

impl ColumnStore {
    /// Create a store for `signature`, pre-allocating [`INITIAL_CAPACITY`]
    /// rows. `infos` must be the descriptors of the signature's types in
    /// ascending type-id order.
    pub(crate) fn new(signature: Signature, infos: &[&ComponentInfo]) -> Self {
        let columns = infos
            .iter()
            .map(|info| Column {
                type_id: info.id,
                offset: 0,
                size: info.size,
                align: info.align,
                drop_fn: info.drop_fn,
            })
            .collect();

        let mut store = Self {
            signature,
            len: 0,
            capacity: 0,
            data: ptr::null_mut(),
            layout: Layout::new::<()>(),
            columns,
        };
        store.reallocate(INITIAL_CAPACITY);
        store
    }

    /// The exact signature this store holds.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the store holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows the current buffer can hold before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The live entity-id column.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        // The entity column starts at offset 0 and the buffer is always
        // allocated (capacity >= INITIAL_CAPACITY).
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.data.cast::<EntityId>(), self.len)
        }
    }

    // -- layout -------------------------------------------------------------

    /// Binary search for a column by type id.
    #[inline]
    fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&type_id, |col| col.type_id)
            .ok()
    }

    /// Compute the buffer layout and per-column byte offsets for `capacity`
    /// rows. The entity column occupies `[0, capacity * 8)`; each component
    /// column starts at the next offset aligned for its type.
    fn layout_for(capacity: usize, columns: &[Column]) -> (Layout, Vec<usize>) {
        let mut size = std::mem::size_of::<EntityId>() * capacity;
        let mut align = std::mem::align_of::<EntityId>();
        let mut offsets = Vec::with_capacity(columns.len());
        for col in columns {
            size = (size + col.align - 1) & !(col.align - 1);
            offsets.push(size);
            size += col.size * capacity;
            align = align.max(col.align);
        }
        let layout = Layout::from_size_align(size, align).expect("column store layout overflow");
        (layout, offsets)
    }

    /// Pointer to element `row` of the column for `type_id`.
    ///
    /// Returns `None` if the store has no such column. `row` must be less
    /// than `len`; the pointer is invalidated by any growth or removal.
    #[inline]
    pub(crate) fn component_ptr(&self, type_id: ComponentTypeId, row: usize) -> Option<*mut u8> {
        debug_assert!(row < self.len);
        let col = &self.columns[self.column_index(type_id)?];
        #[allow(unsafe_code)]
        Some(unsafe { self.data.add(col.offset + row * col.size) })
    }

    /// Byte-level pointer to the start of the column for `type_id`, or `None`
    /// if the store has no such column.
    ///
    /// This is the type-erased access used to build typed views without the
    /// store knowing the requesting code's types. The pointer is invalidated
    /// by any growth or removal on this store.
    #[inline]
    pub fn column_ptr(&self, type_id: ComponentTypeId) -> Option<*mut u8> {
        let col = &self.columns[self.column_index(type_id)?];
        #[allow(unsafe_code)]
        Some(unsafe { self.data.add(col.offset) })
    }

    // -- growth -------------------------------------------------------------

    fn ensure_capacity(&mut self, required: usize) {
        if required <= self.capacity {
            return;
        }
        let mut new_capacity = self.capacity.max(INITIAL_CAPACITY);
        while new_capacity < required {
            new_capacity *= 2;
        }
        tracing::trace!(
            from = self.capacity,
            to = new_capacity,
            rows = self.len,
            "column store growing"
        );
        self.reallocate(new_capacity);
    }

    /// Allocate a buffer for `new_capacity` rows, copy every live column into
    /// its new offset, free the old buffer. Column strides change with the
    /// capacity, so offsets are recomputed. Invalidates every pointer
    /// previously obtained from this store.
    #[allow(unsafe_code)]
    fn reallocate(&mut self, new_capacity: usize) {
        let (new_layout, new_offsets) = Self::layout_for(new_capacity, &self.columns);
        let new_data = unsafe { alloc::alloc(new_layout) };
        assert!(
            !new_data.is_null(),
            "column store allocation failed ({} bytes)",
            new_layout.size()
        );

        if !self.data.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(
                    self.data,
                    new_data,
                    self.len * std::mem::size_of::<EntityId>(),
                );
                for (col, &new_offset) in self.columns.iter().zip(&new_offsets) {
                    ptr::copy_nonoverlapping(
                        self.data.add(col.offset),
                        new_data.add(new_offset),
                        self.len * col.size,
                    );
                }
                alloc::dealloc(self.data, self.layout);
            }
        }

        for (col, new_offset) in self.columns.iter_mut().zip(new_offsets) {
            col.offset = new_offset;
        }
        self.data = new_data;
        self.layout = new_layout;
        self.capacity = new_capacity;
    }

    // -- row operations -----------------------------------------------------

    /// Append a row for `id`, growing the buffer if needed. Returns the row
    /// index.
    ///
    /// # Safety
    ///
    /// `components` must contain exactly one `(type id, value pointer)` pair
    /// for every column of this store, each pointing to a valid, initialized
    /// value of that column's type. Ownership of every value moves into the
    /// store; the caller must not drop the sources afterwards.
    #[allow(unsafe_code)]
    pub(crate) unsafe fn push(
        &mut self,
        id: EntityId,
        components: &[(ComponentTypeId, *const u8)],
    ) -> usize {
        debug_assert_eq!(components.len(), self.columns.len());
        self.ensure_capacity(self.len + 1);
        let row = self.len;
        *self.data.cast::<EntityId>().add(row) = id;
        for &(type_id, src) in components {
            let idx = self
                .column_index(type_id)
                .expect("component type not in this store");
            let col = &self.columns[idx];
            if col.size > 0 {
                ptr::copy_nonoverlapping(src, self.data.add(col.offset + row * col.size), col.size);
            }
        }
        self.len = row + 1;
        row
    }

    /// Remove the row holding `id`, if present. Linear scan of the entity
    /// column; on a match the last row is swapped into the freed slot, so
    /// row order is not preserved.
    pub(crate) fn remove_entity(&mut self, id: EntityId) -> bool {
        match self.entities().iter().position(|&e| e == id) {
            Some(row) => {
                self.swap_remove_row(row);
                true
            }
            None => false,
        }
    }

    /// Drop row `row`'s component values and move the last row into its
    /// place.
    #[allow(unsafe_code)]
    fn swap_remove_row(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        unsafe {
            let ids = self.data.cast::<EntityId>();
            *ids.add(row) = *ids.add(last);
            for col in &self.columns {
                let base = self.data.add(col.offset);
                let removed = base.add(row * col.size);
                if let Some(drop_fn) = col.drop_fn {
                    drop_fn(removed);
                }
                if row != last && col.size > 0 {
                    ptr::copy_nonoverlapping(base.add(last * col.size), removed, col.size);
                }
            }
        }
        self.len = last;
    }

    /// Drop every live row without releasing the backing buffer.
    #[allow(unsafe_code)]
    pub(crate) fn clear(&mut self) {
        unsafe {
            for col in &self.columns {
                if let Some(drop_fn) = col.drop_fn {
                    let base = self.data.add(col.offset);
                    for row in 0..self.len {
                        drop_fn(base.add(row * col.size));
                    }
                }
            }
        }
        self.len = 0;
    }
}

impl Drop for ColumnStore {
    fn drop(&mut self) {
        self.clear();
        if !self.data.is_null() {
            #[allow(unsafe_code)]
            unsafe {
                alloc::dealloc(self.data, self.layout);
            }
        }
    }
}

impl fmt::Debug for ColumnStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnStore")
            .field("signature", &self.signature)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("columns", &self.columns.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    fn store_of<T: Clone + Send + Sync + 'static>(
        reg: &mut ComponentRegistry,
    ) -> (ColumnStore, ComponentTypeId) {
        let id = reg.index_of::<T>();
        let signature = Signature::EMPTY.with(id);
        let store = ColumnStore::new(signature, &[reg.info(id)]);
        (store, id)
    }

    /// Push a single-component row, transferring ownership of `value`.
    fn push_one<T>(store: &mut ColumnStore, type_id: ComponentTypeId, id: EntityId, value: T) {
        let pairs = [(type_id, &value as *const T as *const u8)];
        #[allow(unsafe_code)]
        unsafe {
            store.push(id, &pairs);
        }
        std::mem::forget(value);
    }

    fn read_at<T: Clone>(store: &ColumnStore, type_id: ComponentTypeId, row: usize) -> T {
        let ptr = store.component_ptr(type_id, row).unwrap();
        #[allow(unsafe_code)]
        unsafe {
            (*ptr.cast::<T>()).clone()
        }
    }

    #[test]
    fn push_and_read_back() {
        let mut reg = ComponentRegistry::new();
        let (mut store, pos_id) = store_of::<Pos>(&mut reg);

        push_one(&mut store, pos_id, EntityId::from_raw(1), Pos { x: 1.0, y: 2.0 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.entities(), &[EntityId::from_raw(1)]);
        assert_eq!(read_at::<Pos>(&store, pos_id, 0), Pos { x: 1.0, y: 2.0 });
    }

    #[test]
    fn swap_remove_moves_last_row_into_gap() {
        let mut reg = ComponentRegistry::new();
        let (mut store, pos_id) = store_of::<Pos>(&mut reg);

        for i in 0..3u64 {
            let v = i as f32;
            push_one(&mut store, pos_id, EntityId::from_raw(i + 1), Pos { x: v, y: v });
        }

        assert!(store.remove_entity(EntityId::from_raw(1)));
        assert_eq!(store.len(), 2);
        // Row 0 now holds what was the last row (entity 3).
        assert_eq!(store.entities()[0], EntityId::from_raw(3));
        assert_eq!(read_at::<Pos>(&store, pos_id, 0), Pos { x: 2.0, y: 2.0 });
        // Entity 2 is untouched.
        assert_eq!(store.entities()[1], EntityId::from_raw(2));
        assert_eq!(read_at::<Pos>(&store, pos_id, 1), Pos { x: 1.0, y: 1.0 });
    }

    #[test]
    fn remove_missing_id_reports_false() {
        let mut reg = ComponentRegistry::new();
        let (mut store, pos_id) = store_of::<Pos>(&mut reg);
        push_one(&mut store, pos_id, EntityId::from_raw(1), Pos { x: 0.0, y: 0.0 });
        assert!(!store.remove_entity(EntityId::from_raw(99)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn growth_preserves_rows() {
        let mut reg = ComponentRegistry::new();
        let (mut store, pos_id) = store_of::<Pos>(&mut reg);

        let count = INITIAL_CAPACITY as u64 + 1;
        for i in 0..count {
            let v = i as f32;
            push_one(&mut store, pos_id, EntityId::from_raw(i + 1), Pos { x: v, y: -v });
        }

        assert_eq!(store.len(), count as usize);
        assert!(store.capacity() >= count as usize);
        for i in 0..count {
            let v = i as f32;
            assert_eq!(store.entities()[i as usize], EntityId::from_raw(i + 1));
            assert_eq!(
                read_at::<Pos>(&store, pos_id, i as usize),
                Pos { x: v, y: -v }
            );
        }
    }

    #[test]
    fn clear_keeps_buffer_and_empties_rows() {
        let mut reg = ComponentRegistry::new();
        let (mut store, pos_id) = store_of::<Pos>(&mut reg);
        for i in 0..20u64 {
            push_one(&mut store, pos_id, EntityId::from_raw(i + 1), Pos { x: 0.0, y: 0.0 });
        }
        let capacity = store.capacity();
        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.capacity(), capacity);
        // The store remains usable after a clear.
        push_one(&mut store, pos_id, EntityId::from_raw(21), Pos { x: 7.0, y: 7.0 });
        assert_eq!(read_at::<Pos>(&store, pos_id, 0), Pos { x: 7.0, y: 7.0 });
    }

    #[test]
    fn owning_components_are_dropped_on_remove_and_clear() {
        let mut reg = ComponentRegistry::new();
        let (mut store, label_id) = store_of::<Label>(&mut reg);

        push_one(&mut store, label_id, EntityId::from_raw(1), Label("a".to_owned()));
        push_one(&mut store, label_id, EntityId::from_raw(2), Label("b".to_owned()));
        assert_eq!(read_at::<Label>(&store, label_id, 0), Label("a".to_owned()));

        // Swap-remove drops the removed value and relocates the survivor.
        assert!(store.remove_entity(EntityId::from_raw(1)));
        assert_eq!(read_at::<Label>(&store, label_id, 0), Label("b".to_owned()));

        // Clearing drops the rest; dropping the store afterwards must not
        // double-free.
        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn multi_column_rows_stay_aligned() {
        let mut reg = ComponentRegistry::new();
        let pos_id = reg.index_of::<Pos>();
        let label_id = reg.index_of::<Label>();
        let signature = Signature::EMPTY.with(pos_id).with(label_id);
        let mut store = ColumnStore::new(signature, &[reg.info(pos_id), reg.info(label_id)]);

        for i in 0..10u64 {
            let pos = Pos {
                x: i as f32,
                y: 0.0,
            };
            let label = Label(format!("e{i}"));
            let pairs = [
                (pos_id, &pos as *const Pos as *const u8),
                (label_id, &label as *const Label as *const u8),
            ];
            #[allow(unsafe_code)]
            unsafe {
                store.push(EntityId::from_raw(i + 1), &pairs);
            }
            std::mem::forget(pos);
            std::mem::forget(label);
        }

        assert!(store.remove_entity(EntityId::from_raw(3)));
        for row in 0..store.len() {
            let id = store.entities()[row].to_raw();
            assert_eq!(read_at::<Pos>(&store, pos_id, row).x, (id - 1) as f32);
            assert_eq!(
                read_at::<Label>(&store, label_id, row),
                Label(format!("e{}", id - 1))
            );
        }
    }
}
