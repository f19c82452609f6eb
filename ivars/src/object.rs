use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};

use bitflags::bitflags;

use crate::{RubyClass, VariableStorage};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        const FROZEN = 1 << 0;
    }
}

/// Per-object flags, updated atomically.
#[derive(Debug, Default)]
pub struct ObjectHeader {
    flags: AtomicU8,
}

impl ObjectHeader {
    #[inline(always)]
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: ObjectFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: ObjectFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: ObjectFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }
}

/// A heap object: a class reference plus its lazily allocated variables.
///
/// The class is the object's real class and never changes. A singleton
/// class, once created, only affects [`RubyObject::metaclass`]; the
/// variable layout is always dictated by the real class.
#[derive(Debug)]
pub struct RubyObject {
    header: ObjectHeader,
    class: Arc<RubyClass>,
    singleton: OnceLock<Arc<RubyClass>>,
    variables: VariableStorage,
}

impl RubyObject {
    pub fn new(class: Arc<RubyClass>) -> Self {
        debug_assert!(!class.is_singleton() && !class.is_module());
        Self {
            header: ObjectHeader::default(),
            class,
            singleton: OnceLock::new(),
            variables: VariableStorage::new(),
        }
    }

    #[inline(always)]
    pub fn class(&self) -> &Arc<RubyClass> {
        &self.class
    }

    pub fn singleton_class(&self) -> Option<&Arc<RubyClass>> {
        self.singleton.get()
    }

    /// Install `make()` as singleton class unless one already exists.
    pub(crate) fn singleton_class_or_init<F>(&self, make: F) -> &Arc<RubyClass>
    where
        F: FnOnce() -> Arc<RubyClass>,
    {
        self.singleton.get_or_init(make)
    }

    /// The singleton class if there is one, otherwise the real class.
    pub fn metaclass(&self) -> &Arc<RubyClass> {
        self.singleton.get().unwrap_or(&self.class)
    }

    #[inline(always)]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    #[inline(always)]
    pub fn storage(&self) -> &VariableStorage {
        &self.variables
    }

    pub fn is_frozen(&self) -> bool {
        self.header.has_flag(ObjectFlags::FROZEN)
    }

    pub fn freeze(&self) {
        self.header.add_flag(ObjectFlags::FROZEN);
    }
}
