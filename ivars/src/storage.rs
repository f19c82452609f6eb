use std::{
    hint,
    ptr,
    sync::atomic::{
        AtomicPtr, AtomicU32, AtomicU64,
        Ordering::{Acquire, Relaxed, Release, SeqCst},
    },
};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::Value;

/// How writers coordinate when they touch the same object's backing array.
///
/// Both strategies are observably identical, they only differ in cost.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableStrategy {
    /// Lock-free writes guarded by the per-object stamp.
    #[default]
    Stamped,
    /// Every write takes the per-object monitor.
    Synchronized,
}

/// A fully built backing array. Never shrinks, never mutated except through
/// its atomic slots.
struct VarTable {
    slots: Box<[AtomicU64]>,
}

impl VarTable {
    fn new(len: usize) -> Box<Self> {
        let slots = (0..len).map(|_| AtomicU64::new(Value::UNDEF.raw())).collect();
        Box::new(Self { slots })
    }

    /// Copy of `old` with room for at least `len` slots.
    fn grown_from(old: Option<&VarTable>, len: usize) -> Box<Self> {
        let table = Self::new(len.max(old.map_or(0, VarTable::len)));
        if let Some(old) = old {
            for (dst, src) in table.slots.iter().zip(old.slots.iter()) {
                // SeqCst pairs with the re-check of stamped writers
                dst.store(src.load(SeqCst), Relaxed);
            }
        }
        table
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// The per-object backing array together with the state used to grow it.
///
/// The array is published through an atomic pointer with release/acquire
/// ordering, so a reader sees either the old or the new array, both fully
/// initialised. Replaced arrays are parked in `retired` until the storage
/// itself is dropped: a reader racing a resize may still be looking at one.
pub struct VariableStorage {
    table: AtomicPtr<VarTable>,
    /// odd while a writer holds exclusive rights to replace `table`
    stamp: AtomicU32,
    /// reentrant, a thread inside the object's critical section may write
    monitor: ReentrantMutex<()>,
    retired: Mutex<Vec<Box<VarTable>>>,
}

// SAFETY: the raw table pointer is only dereferenced as a shared reference,
// all mutation goes through atomics or the exclusive protocols below.
unsafe impl Send for VariableStorage {}
// SAFETY: see above
unsafe impl Sync for VariableStorage {}

impl VariableStorage {
    pub fn new() -> Self {
        Self {
            table: AtomicPtr::new(ptr::null_mut()),
            stamp: AtomicU32::new(0),
            monitor: ReentrantMutex::new(()),
            retired: Mutex::new(Vec::new()),
        }
    }

    #[inline(always)]
    fn current(&self) -> Option<&VarTable> {
        let table = self.table.load(Acquire);
        // SAFETY: published tables are never freed while `self` is alive
        unsafe { table.as_ref() }
    }

    /// Length of the current backing array, zero if none was allocated.
    pub fn len(&self) -> usize {
        self.current().map_or(0, VarTable::len)
    }

    pub fn is_allocated(&self) -> bool {
        !self.table.load(Acquire).is_null()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Value {
        match self.current().and_then(|table| table.slots.get(index)) {
            Some(slot) => Value::from_raw(slot.load(Acquire)),
            None => Value::UNDEF,
        }
    }

    /// Copy of every slot of the current array, `UNDEF` for unset ones.
    pub fn snapshot(&self) -> Vec<Value> {
        self.current().map_or_else(Vec::new, |table| {
            table
                .slots
                .iter()
                .map(|slot| Value::from_raw(slot.load(SeqCst)))
                .collect()
        })
    }

    /// The per-object critical section, also used for lazy object ids.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.monitor.lock()
    }

    /// Write `value` at `index`, growing the array to at least `size_hint`
    /// slots when `index` is not covered yet.
    pub fn set(
        &self,
        index: usize,
        value: Value,
        strategy: TableStrategy,
        size_hint: usize,
    ) {
        match strategy {
            TableStrategy::Synchronized => {
                let _guard = self.monitor.lock();
                self.store_locked(index, value, size_hint);
            }
            TableStrategy::Stamped => self.store_stamped(index, value, size_hint),
        }
    }

    /// Replace the whole array with the result of `build`, which receives the
    /// current array contents. Exclusive against every writer of both
    /// strategies.
    pub fn install<F>(&self, strategy: TableStrategy, build: F)
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        match strategy {
            TableStrategy::Synchronized => {
                let _guard = self.monitor.lock();
                let values = build(&self.snapshot());
                self.publish(Self::table_of(&values));
            }
            TableStrategy::Stamped => {
                let stamp = self.claim();
                let values = build(&self.snapshot());
                self.publish(Self::table_of(&values));
                self.stamp.store(stamp.wrapping_add(2), SeqCst);
            }
        }
    }

    fn table_of(values: &[Value]) -> Box<VarTable> {
        let table = VarTable::new(values.len());
        for (slot, value) in table.slots.iter().zip(values) {
            slot.store(value.raw(), Relaxed);
        }
        table
    }

    fn store_locked(&self, index: usize, value: Value, size_hint: usize) {
        let table = match self.current() {
            Some(table) if index < table.len() => table,
            current => {
                let grown = VarTable::grown_from(current, size_hint.max(index + 1));
                log::trace!(
                    "growing variable table {} -> {} slots",
                    current.map_or(0, VarTable::len),
                    grown.len()
                );
                self.publish(grown);
                self.current().unwrap_or_else(|| {
                    unreachable!("variable table missing after growth")
                })
            }
        };
        Self::store_slot(table, index, value);
    }

    fn store_stamped(&self, index: usize, value: Value, size_hint: usize) {
        loop {
            let stamp = self.stamp.load(SeqCst);
            if stamp & 1 != 0 {
                hint::spin_loop();
                continue;
            }

            match self.current() {
                Some(table) if index < table.len() => {
                    table.slots[index].store(value.raw(), SeqCst);
                    // a resize that started after our stamp read may have
                    // copied the slot before we wrote it
                    if self.stamp.load(SeqCst) == stamp {
                        return;
                    }
                }
                _ => {
                    if self.stamp
                        .compare_exchange(stamp, stamp.wrapping_add(1), SeqCst, Relaxed)
                        .is_err()
                    {
                        continue;
                    }
                    let current = self.current();
                    let grown =
                        VarTable::grown_from(current, size_hint.max(index + 1));
                    log::trace!(
                        "growing variable table {} -> {} slots (stamp {stamp})",
                        current.map_or(0, VarTable::len),
                        grown.len()
                    );
                    Self::store_slot(&grown, index, value);
                    self.publish(grown);
                    self.stamp.store(stamp.wrapping_add(2), SeqCst);
                    return;
                }
            }
        }
    }

    /// Spin until the stamp is even and move it to odd. Returns the even
    /// stamp that was claimed.
    fn claim(&self) -> u32 {
        loop {
            let stamp = self.stamp.load(SeqCst);
            if stamp & 1 == 0
                && self
                    .stamp
                    .compare_exchange_weak(stamp, stamp.wrapping_add(1), SeqCst, Relaxed)
                    .is_ok()
            {
                return stamp;
            }
            hint::spin_loop();
        }
    }

    #[inline(always)]
    fn store_slot(table: &VarTable, index: usize, value: Value) {
        match table.slots.get(index) {
            Some(slot) => slot.store(value.raw(), SeqCst),
            None => panic!(
                "variable table has {} slots after growth, index {index} is not covered",
                table.len()
            ),
        }
    }

    /// Publish a fully built table. Caller must hold exclusive write rights.
    fn publish(&self, table: Box<VarTable>) {
        let old = self.table.swap(Box::into_raw(table), Release);
        if !old.is_null() {
            // SAFETY: `old` came from `Box::into_raw` and is no longer published
            let old = unsafe { Box::from_raw(old) };
            self.retired.lock().push(old);
        }
    }
}

impl Default for VariableStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VariableStorage {
    fn drop(&mut self) {
        let table = *self.table.get_mut();
        if !table.is_null() {
            // SAFETY: we are the sole owner, nobody can observe the table anymore
            drop(unsafe { Box::from_raw(table) });
        }
    }
}

impl core::fmt::Debug for VariableStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VariableStorage")
            .field("len", &self.len())
            .field("stamp", &self.stamp.load(Relaxed))
            .finish()
    }
}
