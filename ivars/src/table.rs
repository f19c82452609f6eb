use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicPtr, Ordering::{Acquire, Release}},
    },
};

use parking_lot::Mutex;

use crate::{
    ClassId, RubyObject, TableStrategy, Value, VariableAccessor,
    VariableAccessorField,
};

pub const OBJECT_ID_VARIABLE: &str = "object_id";
pub const FFI_HANDLE_VARIABLE: &str = "ffi";
pub const OBJECT_GROUP_VARIABLE: &str = "objectspace_group";

/// Slots owned by the runtime, only written through their fields.
pub const RESERVED_VARIABLES: [&str; 3] =
    [OBJECT_ID_VARIABLE, FFI_HANDLE_VARIABLE, OBJECT_GROUP_VARIABLE];

pub fn is_reserved_variable_name(name: &str) -> bool {
    RESERVED_VARIABLES.contains(&name)
}

/// One published version of a class's variable layout.
///
/// `names[i]` is the name of the accessor with index `i`.
#[derive(Default)]
struct VariableLayout {
    accessors: HashMap<Arc<str>, Arc<VariableAccessor>, ahash::RandomState>,
    names: Vec<Arc<str>>,
}

/// The name → slot registry shared by every instance of one class.
///
/// Lookups never lock. New names are allocated under the class allocation
/// lock and published by swapping in a complete copy of the layout, so an
/// unlocked reader sees either the old or the new layout. Indices are handed
/// out sequentially and never reused, the table only grows.
pub struct VariableTableManager {
    class_id: ClassId,
    strategy: TableStrategy,
    layout: AtomicPtr<VariableLayout>,
    allocation: Mutex<()>,
    /// superseded layouts, unlocked readers may still hold them
    retired: Mutex<Vec<Box<VariableLayout>>>,
    object_id: VariableAccessorField,
    ffi_handle: VariableAccessorField,
    object_group: VariableAccessorField,
}

// SAFETY: layouts behind the raw pointer are immutable once published
unsafe impl Send for VariableTableManager {}
// SAFETY: see above
unsafe impl Sync for VariableTableManager {}

impl VariableTableManager {
    pub fn new(class_id: ClassId, strategy: TableStrategy) -> Self {
        let layout = Box::<VariableLayout>::default();
        Self {
            class_id,
            strategy,
            layout: AtomicPtr::new(Box::into_raw(layout)),
            allocation: Mutex::new(()),
            retired: Mutex::new(Vec::new()),
            object_id: VariableAccessorField::new(OBJECT_ID_VARIABLE),
            ffi_handle: VariableAccessorField::new(FFI_HANDLE_VARIABLE),
            object_group: VariableAccessorField::new(OBJECT_GROUP_VARIABLE),
        }
    }

    #[inline(always)]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[inline(always)]
    pub fn strategy(&self) -> TableStrategy {
        self.strategy
    }

    #[inline(always)]
    fn layout(&self) -> &VariableLayout {
        // SAFETY: the pointer is never null and published layouts live as
        // long as the manager
        unsafe { &*self.layout.load(Acquire) }
    }

    /// The accessor for `name`, allocating a new slot on first use.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn accessor_for_write(&self, name: &str) -> Arc<VariableAccessor> {
        if let Some(accessor) = self.layout().accessors.get(name) {
            return accessor.clone();
        }

        let _guard = self.allocation.lock();
        // another writer may have allocated it while we were waiting
        let layout = self.layout();
        if let Some(accessor) = layout.accessors.get(name) {
            return accessor.clone();
        }
        let (accessor, next) = self.allocate_accessor(layout, name);
        self.publish(next);
        accessor
    }

    /// The accessor for `name`, or the dummy accessor if no instance of this
    /// class ever had it. Never allocates.
    pub fn accessor_for_read(&self, name: &str) -> Arc<VariableAccessor> {
        self.layout()
            .accessors
            .get(name)
            .cloned()
            .unwrap_or_else(VariableAccessor::dummy)
    }

    /// Build the successor of `layout` with `name` at the next index.
    /// Must be called with the allocation lock held.
    fn allocate_accessor(
        &self,
        layout: &VariableLayout,
        name: &str,
    ) -> (Arc<VariableAccessor>, Box<VariableLayout>) {
        assert!(!name.is_empty(), "variable names must not be empty");
        let index = layout.names.len();
        let Ok(slot) = u32::try_from(index) else {
            panic!("variable table of {:?} is full", self.class_id);
        };

        let name: Arc<str> = Arc::from(name);
        let accessor =
            Arc::new(VariableAccessor::new(name.clone(), slot, self.class_id));

        let mut names = Vec::with_capacity(index + 1);
        names.extend(layout.names.iter().cloned());
        names.push(name.clone());

        let mut accessors = layout.accessors.clone();
        accessors.insert(name, accessor.clone());

        log::trace!(
            "allocated variable `{}` at index {index} for {:?}",
            accessor.name(),
            self.class_id
        );
        (accessor, Box::new(VariableLayout { accessors, names }))
    }

    fn publish(&self, layout: Box<VariableLayout>) {
        let old = self.layout.swap(Box::into_raw(layout), Release);
        // SAFETY: `old` came from `Box::into_raw` and is no longer published
        self.retired.lock().push(unsafe { Box::from_raw(old) });
    }

    /// Number of allocated slots, also the size new backing arrays grow to.
    pub fn table_size(&self) -> usize {
        self.layout().names.len()
    }

    /// Snapshot of all allocated names in index order.
    pub fn variable_names(&self) -> Vec<Arc<str>> {
        self.layout().names.clone()
    }

    /// Snapshot of all allocated accessors in index order.
    pub fn accessors_for_read(&self) -> Vec<Arc<VariableAccessor>> {
        let layout = self.layout();
        layout
            .names
            .iter()
            .filter_map(|name| layout.accessors.get(name).cloned())
            .collect()
    }

    // ── Well-known slots ───────────────────────────────────────────

    pub fn object_id_field(&self) -> &VariableAccessorField {
        &self.object_id
    }

    pub fn ffi_handle_field(&self) -> &VariableAccessorField {
        &self.ffi_handle
    }

    pub fn object_group_field(&self) -> &VariableAccessorField {
        &self.object_group
    }

    /// Whether any instance of this class ever had its object id taken.
    pub fn has_object_id(&self) -> bool {
        self.object_id.is_allocated(self)
    }

    pub fn ffi_handle(&self, object: &RubyObject) -> Value {
        self.ffi_handle.for_read(self).get(object)
    }

    pub fn set_ffi_handle(&self, object: &RubyObject, handle: Value) {
        self.ffi_handle.for_write(self).set(object, handle);
    }

    pub fn object_group(&self, object: &RubyObject) -> Value {
        self.object_group.for_read(self).get(object)
    }

    pub fn set_object_group(&self, object: &RubyObject, group: Value) {
        self.object_group.for_write(self).set(object, group);
    }

    // ── Per-object access ──────────────────────────────────────────

    #[inline]
    pub fn get_variable(&self, object: &RubyObject, index: usize) -> Value {
        object.storage().get(index)
    }

    /// Write through the configured strategy, growing the object's array to
    /// the current table size when needed.
    #[inline]
    pub fn set_variable_internal(
        &self,
        object: &RubyObject,
        index: usize,
        value: Value,
    ) {
        debug_assert_eq!(object.class().id(), self.class_id);
        object
            .storage()
            .set(index, value, self.strategy, self.table_size());
    }

    /// Number of variables currently set on `object`.
    pub fn variable_count(&self, object: &RubyObject) -> usize {
        object
            .storage()
            .snapshot()
            .iter()
            .filter(|value| !value.is_undef())
            .count()
    }

    pub fn has_variables(&self, object: &RubyObject) -> bool {
        self.variable_count(object) > 0
    }

    /// Every variable set on `object`, internal ones included, in index
    /// order.
    pub fn variable_list(&self, object: &RubyObject) -> Vec<(Arc<str>, Value)> {
        let names = self.variable_names();
        object
            .storage()
            .snapshot()
            .into_iter()
            .zip(names)
            .filter(|(value, _)| !value.is_undef())
            .map(|(value, name)| (name, value))
            .collect()
    }

    /// Unset `name` on `object` and return its previous value, `UNDEF` if it
    /// was not set.
    pub fn clear_variable(&self, object: &RubyObject, name: &str) -> Value {
        let accessor = self.accessor_for_read(name);
        let Some(index) = accessor.index() else {
            return Value::UNDEF;
        };
        let previous = accessor.get(object);
        if !previous.is_undef() {
            object
                .storage()
                .set(index, Value::UNDEF, self.strategy, self.table_size());
        }
        previous
    }

    /// Copy every variable set on `source` into `dest`, an instance of this
    /// class. The object id never travels: `dest` keeps its own identity,
    /// or none.
    pub fn sync_variables(&self, dest: &RubyObject, source: &RubyObject) {
        debug_assert_eq!(dest.class().id(), self.class_id);
        let source_class = source.class();
        let source_variables = source_class.variables();
        let source_id_index = source_variables
            .object_id_field()
            .for_read(source_variables)
            .index();

        if source_class.id() == self.class_id {
            let values = source.storage().snapshot();
            dest.storage().install(self.strategy, |current| {
                let mut merged = current.to_vec();
                if merged.len() < values.len() {
                    merged.resize(values.len(), Value::UNDEF);
                }
                for (index, &value) in values.iter().enumerate() {
                    if !value.is_undef() && Some(index) != source_id_index {
                        merged[index] = value;
                    }
                }
                merged
            });
            return;
        }

        for accessor in source_variables.accessors_for_read() {
            if accessor.index() == source_id_index {
                continue;
            }
            let value = accessor.get(source);
            if !value.is_undef() {
                self.accessor_for_write(accessor.name()).set(dest, value);
            }
        }
    }
}

impl Drop for VariableTableManager {
    fn drop(&mut self) {
        // SAFETY: sole owner, the pointer came from `Box::into_raw`
        drop(unsafe { Box::from_raw(*self.layout.get_mut()) });
    }
}

impl core::fmt::Debug for VariableTableManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VariableTableManager")
            .field("class_id", &self.class_id)
            .field("strategy", &self.strategy)
            .field("names", &self.layout().names)
            .finish()
    }
}
