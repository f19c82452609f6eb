use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{Result, RuntimeError, TableStrategy, VariableTableManager};

/// Index of a class in its runtime's [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Module,
    /// A per-object metaclass. Never instantiated, instances keep using the
    /// variable layout of their real class.
    Singleton,
}

/// Class metadata. Every class, singleton classes included, owns exactly one
/// variable table; subclasses do not share their superclass's.
#[derive(Debug)]
pub struct RubyClass {
    id: ClassId,
    name: Option<Arc<str>>,
    kind: ClassKind,
    superclass: Option<ClassId>,
    variables: VariableTableManager,
}

impl RubyClass {
    #[inline(always)]
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline(always)]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    #[inline(always)]
    pub fn superclass(&self) -> Option<ClassId> {
        self.superclass
    }

    #[inline(always)]
    pub fn variables(&self) -> &VariableTableManager {
        &self.variables
    }

    pub fn is_singleton(&self) -> bool {
        self.kind == ClassKind::Singleton
    }

    pub fn is_module(&self) -> bool {
        self.kind == ClassKind::Module
    }

    /// Name for diagnostics, anonymous classes render like Ruby does.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("#<Class:{:#x}>", self.id.0),
        }
    }
}

#[derive(Default)]
struct ClassTableImpl {
    classes: Vec<Arc<RubyClass>>,
    names: HashMap<Arc<str>, ClassId, ahash::RandomState>,
}

/// Arena of all classes of one runtime, indexed by [`ClassId`].
#[derive(Default)]
pub struct ClassTable(RwLock<ClassTableImpl>);

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a class, or reopen an existing one with the same name.
    ///
    /// Reopening with a different superclass is a `TypeError`, as is
    /// inheriting from a module or a singleton class.
    pub fn define(
        &self,
        name: Option<&str>,
        kind: ClassKind,
        superclass: Option<ClassId>,
        strategy: TableStrategy,
    ) -> Result<Arc<RubyClass>> {
        let mut inner = self.0.write();

        if let Some(parent) = superclass {
            let parent = inner
                .classes
                .get(parent.0 as usize)
                .ok_or(RuntimeError::UnknownClass { id: parent })?;
            if parent.kind != ClassKind::Class {
                return Err(RuntimeError::TypeError {
                    expected: "a class as superclass",
                    got: parent.display_name(),
                });
            }
        }

        if let Some(existing) = name.and_then(|name| inner.names.get(name)) {
            let existing = inner.classes[existing.0 as usize].clone();
            if existing.kind != kind {
                return Err(RuntimeError::TypeError {
                    expected: match kind {
                        ClassKind::Module => "a module",
                        _ => "a class",
                    },
                    got: existing.display_name(),
                });
            }
            if superclass.is_some() && superclass != existing.superclass {
                return Err(RuntimeError::SuperclassMismatch {
                    class: existing.display_name(),
                });
            }
            return Ok(existing);
        }

        let id = ClassId(inner.classes.len() as u32);
        let name: Option<Arc<str>> = name.map(Arc::from);
        let class = Arc::new(RubyClass {
            id,
            name: name.clone(),
            kind,
            superclass,
            variables: VariableTableManager::new(id, strategy),
        });
        inner.classes.push(class.clone());
        if let Some(name) = name {
            inner.names.insert(name, id);
        }

        log::debug!(
            "defined {:?} {} ({id:?}, superclass {superclass:?})",
            kind,
            class.display_name()
        );
        Ok(class)
    }

    pub fn get(&self, id: ClassId) -> Option<Arc<RubyClass>> {
        self.0.read().classes.get(id.0 as usize).cloned()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<RubyClass>> {
        let inner = self.0.read();
        let id = inner.names.get(name)?;
        inner.classes.get(id.0 as usize).cloned()
    }

    /// `id` followed by its superclasses, nearest first.
    pub fn superclass_chain(&self, id: ClassId) -> Vec<ClassId> {
        let inner = self.0.read();
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(class) = inner.classes.get(id.0 as usize) else {
                break;
            };
            chain.push(id);
            current = class.superclass;
        }
        chain
    }

    /// The nearest non-singleton class of `id`.
    pub fn real_class(&self, id: ClassId) -> Option<Arc<RubyClass>> {
        let inner = self.0.read();
        let mut class = inner.classes.get(id.0 as usize)?;
        while class.is_singleton() {
            class = inner.classes.get(class.superclass?.0 as usize)?;
        }
        Some(class.clone())
    }

    pub fn is_subclass_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.superclass_chain(class).contains(&ancestor)
    }

    pub fn len(&self) -> usize {
        self.0.read().classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for ClassTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClassTable")
            .field("len", &self.len())
            .finish()
    }
}
