use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

struct SymbolTableImpl {
    table: Vec<Arc<str>>,
    mappings: HashMap<Arc<str>, SymbolId, ahash::RandomState>,
}

/// Symbol registry of one runtime. Ids are handed out densely in
/// interning order and live as long as the table.
pub struct SymbolTable(Arc<RwLock<SymbolTableImpl>>);

impl SymbolTableImpl {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Vec::with_capacity(capacity),
            mappings: HashMap::with_capacity_and_hasher(
                capacity,
                ahash::RandomState::new(),
            ),
        }
    }

    fn get_or_add(&mut self, value: &str) -> SymbolId {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        let id = SymbolId(self.table.len() as u32);
        let interned = Arc::<str>::from(value);
        self.mappings.insert(interned.clone(), id);
        self.table.push(interned);
        id
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(RwLock::new(SymbolTableImpl::with_capacity(capacity))))
    }

    pub fn intern(&self, value: &str) -> SymbolId {
        // most symbols already exist, avoid the write lock for them
        if let Some(id) = self.lookup(value) {
            return id;
        }
        self.0.write().get_or_add(value)
    }

    pub fn lookup(&self, value: &str) -> Option<SymbolId> {
        self.0.read().mappings.get(value).copied()
    }

    pub fn name(&self, id: SymbolId) -> Option<Arc<str>> {
        self.0.read().table.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SymbolTable {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl core::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.len())
            .finish()
    }
}
