use std::sync::{Arc, LazyLock, OnceLock};

use crate::{ClassId, RubyObject, Value, VariableTableManager};

static DUMMY_ACCESSOR: LazyLock<Arc<VariableAccessor>> = LazyLock::new(|| {
    Arc::new(VariableAccessor {
        name: Arc::from(""),
        index: None,
        class_id: None,
    })
});

/// Where one named variable lives in the backing array of the instances of
/// one class.
///
/// Accessors are immutable and cheap to clone, call sites that touch the
/// same variable on many objects keep one around and skip the name lookup.
/// An accessor is only meaningful for objects whose class created it, for
/// any other object reads report `UNDEF`.
#[derive(Debug, PartialEq, Eq)]
pub struct VariableAccessor {
    name: Arc<str>,
    index: Option<u32>,
    class_id: Option<ClassId>,
}

impl VariableAccessor {
    pub(crate) fn new(name: Arc<str>, index: u32, class_id: ClassId) -> Self {
        Self {
            name,
            index: Some(index),
            class_id: Some(class_id),
        }
    }

    /// The shared accessor for variables that were never allocated.
    pub fn dummy() -> Arc<Self> {
        DUMMY_ACCESSOR.clone()
    }

    #[inline(always)]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline(always)]
    pub fn index(&self) -> Option<usize> {
        self.index.map(|index| index as usize)
    }

    #[inline(always)]
    pub fn class_id(&self) -> Option<ClassId> {
        self.class_id
    }

    #[inline(always)]
    pub fn is_dummy(&self) -> bool {
        self.index.is_none()
    }

    /// Whether this accessor indexes into `object`'s backing array.
    #[inline(always)]
    pub fn is_valid_for(&self, object: &RubyObject) -> bool {
        self.class_id == Some(object.class().id())
    }

    #[inline]
    pub fn get(&self, object: &RubyObject) -> Value {
        match self.index {
            Some(index) if self.is_valid_for(object) => {
                object.storage().get(index as usize)
            }
            _ => Value::UNDEF,
        }
    }

    /// Store `value` into `object`.
    ///
    /// An accessor of another class is resolved again by name through the
    /// object's own class, which allocates the variable when needed.
    ///
    /// # Panics
    ///
    /// Writing through the dummy accessor or writing `UNDEF` is an internal
    /// consistency violation.
    pub fn set(&self, object: &RubyObject, value: Value) {
        assert!(
            !value.is_undef(),
            "attempt to store the absent marker into `{}`",
            self.name
        );
        let Some(index) = self.index else {
            panic!("write through an unallocated variable accessor");
        };
        let variables = object.class().variables();
        if self.is_valid_for(object) {
            variables.set_variable_internal(object, index as usize, value);
        } else {
            variables.accessor_for_write(&self.name).set(object, value);
        }
    }
}

/// A well-known per-object slot (object id, foreign handle, ...) of one
/// class. The accessor is allocated through the class's table manager on
/// first write and never changes afterwards.
#[derive(Debug)]
pub struct VariableAccessorField {
    name: &'static str,
    accessor: OnceLock<Arc<VariableAccessor>>,
}

impl VariableAccessorField {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            accessor: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `manager` allocated this slot, through the field or by name.
    pub fn is_allocated(&self, manager: &VariableTableManager) -> bool {
        !self.for_read(manager).is_dummy()
    }

    /// The current accessor, the dummy one until the slot is allocated.
    ///
    /// The slot may have been allocated by name without going through the
    /// field (copying variables between classes does that), so a miss falls
    /// back to the published layout and caches what it finds.
    pub fn for_read(&self, manager: &VariableTableManager) -> Arc<VariableAccessor> {
        if let Some(accessor) = self.accessor.get() {
            return accessor.clone();
        }
        let accessor = manager.accessor_for_read(self.name);
        if accessor.is_dummy() {
            return accessor;
        }
        self.accessor.get_or_init(|| accessor).clone()
    }

    pub fn for_write(&self, manager: &VariableTableManager) -> Arc<VariableAccessor> {
        self.accessor
            .get_or_init(|| manager.accessor_for_write(self.name))
            .clone()
    }
}
