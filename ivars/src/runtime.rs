use std::sync::Arc;

use crate::{
    ClassId, ClassKind, ClassTable, ObjectIdGenerator, ObjectRegistry, Result,
    RubyClass, RubyObject, RuntimeError, SymbolId, SymbolTable, TableStrategy,
    Value, VariableAccessor, identity, is_reserved_variable_name,
};

#[derive(Debug, Default, Clone)]
pub struct RuntimeCreateInfo {
    pub strategy: Option<TableStrategy>,
    pub first_object_id: Option<i64>,
    pub object_id_step: Option<i64>,
    pub symbol_capacity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub strategy: TableStrategy,
    pub first_object_id: i64,
    pub object_id_step: i64,
    pub symbol_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            strategy: TableStrategy::default(),
            first_object_id: 8,
            object_id_step: 8,
            symbol_capacity: 256,
        }
    }
}

impl RuntimeSettings {
    fn from_info(info: &RuntimeCreateInfo) -> Self {
        let mut settings = Self::default();
        info.strategy.inspect(|&val| settings.strategy = val);
        info.first_object_id
            .inspect(|&val| settings.first_object_id = val);
        info.object_id_step
            .inspect(|&val| settings.object_id_step = val);
        info.symbol_capacity
            .inspect(|&val| settings.symbol_capacity = val);
        settings
    }
}

/// The bootstrapped core classes.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    pub basic_object: ClassId,
    pub object: ClassId,
    pub module: ClassId,
    pub class: ClassId,
}

/// One independent runtime: classes, symbols and object identities.
/// Nothing is process-global, runtimes can coexist and are torn down by
/// dropping them.
#[derive(Debug)]
pub struct Runtime {
    settings: RuntimeSettings,
    symbols: SymbolTable,
    classes: ClassTable,
    ids: ObjectIdGenerator,
    registry: ObjectRegistry,
    core: CoreClasses,
}

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Self {
        let settings = RuntimeSettings::from_info(&info);
        let classes = ClassTable::new();
        let strategy = settings.strategy;

        let define = |name, superclass| {
            classes
                .define(Some(name), ClassKind::Class, superclass, strategy)
                .map(|class| class.id())
                .unwrap_or_else(|err| panic!("bootstrapping {name} failed: {err}"))
        };
        let basic_object = define("BasicObject", None);
        let object = define("Object", Some(basic_object));
        let module = define("Module", Some(object));
        let class = define("Class", Some(module));

        log::debug!("runtime created with {settings:?}");
        Self {
            symbols: SymbolTable::with_capacity(settings.symbol_capacity),
            ids: ObjectIdGenerator::new(
                settings.first_object_id,
                settings.object_id_step,
            ),
            registry: ObjectRegistry::default(),
            classes,
            core: CoreClasses {
                basic_object,
                object,
                module,
                class,
            },
            settings,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn core(&self) -> CoreClasses {
        self.core
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn intern(&self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn symbol(&self, name: &str) -> Value {
        Value::symbol(self.intern(name))
    }

    // ── Classes ────────────────────────────────────────────────────

    /// Define (or reopen) a class. `superclass` defaults to `Object`.
    pub fn define_class(
        &self,
        name: &str,
        superclass: Option<ClassId>,
    ) -> Result<ClassId> {
        let superclass = superclass.unwrap_or(self.core.object);
        self.classes
            .define(Some(name), ClassKind::Class, Some(superclass), self.settings.strategy)
            .map(|class| class.id())
    }

    pub fn define_module(&self, name: &str) -> Result<ClassId> {
        self.classes
            .define(Some(name), ClassKind::Module, None, self.settings.strategy)
            .map(|class| class.id())
    }

    pub fn class(&self, id: ClassId) -> Result<Arc<RubyClass>> {
        self.classes
            .get(id)
            .ok_or(RuntimeError::UnknownClass { id })
    }

    pub fn class_named(&self, name: &str) -> Result<Arc<RubyClass>> {
        self.classes
            .lookup(name)
            .ok_or_else(|| RuntimeError::NotDefined { name: name.into() })
    }

    // ── Objects ────────────────────────────────────────────────────

    pub fn allocate(&self, class: ClassId) -> Result<Arc<RubyObject>> {
        let class = self.class(class)?;
        if class.kind() != ClassKind::Class {
            return Err(RuntimeError::TypeError {
                expected: "an instantiable class",
                got: class.display_name(),
            });
        }
        Ok(Arc::new(RubyObject::new(class)))
    }

    /// The singleton class of `object`, created on first request.
    pub fn singleton_class_of(&self, object: &RubyObject) -> Arc<RubyClass> {
        object
            .singleton_class_or_init(|| {
                self.classes
                    .define(
                        None,
                        ClassKind::Singleton,
                        Some(object.class().id()),
                        self.settings.strategy,
                    )
                    .unwrap_or_else(|err| {
                        panic!("singleton class creation failed: {err}")
                    })
            })
            .clone()
    }

    /// A fresh object of the same class carrying copies of `object`'s
    /// variables. The copy gets its own identity and is not frozen.
    pub fn dup(&self, object: &RubyObject) -> Arc<RubyObject> {
        let copy = Arc::new(RubyObject::new(object.class().clone()));
        self.copy_variables(object, &copy);
        copy
    }

    /// Like [`Runtime::dup`], but the copy is frozen if `object` is.
    pub fn clone_object(&self, object: &RubyObject) -> Arc<RubyObject> {
        let copy = self.dup(object);
        if object.is_frozen() {
            copy.freeze();
        }
        copy
    }

    pub fn freeze(&self, object: &RubyObject) {
        object.freeze();
    }

    // ── Identity ───────────────────────────────────────────────────

    pub fn object_id(&self, object: &Arc<RubyObject>) -> i64 {
        let assigned = identity::object_id(object, &self.ids);
        if assigned.fresh {
            self.registry.register(assigned.id, object);
        }
        assigned.id
    }

    /// The live object with id `id`, if its id was ever taken.
    pub fn id2ref(&self, id: i64) -> Option<Arc<RubyObject>> {
        self.registry.lookup(id)
    }

    // ── Variable table API ─────────────────────────────────────────

    /// The accessor for `name` in `class`, allocating it on first use.
    /// Slots owned by the runtime (`object_id`, `ffi`, `objectspace_group`)
    /// are only reachable through their fields.
    pub fn get_or_allocate_accessor(
        &self,
        class: ClassId,
        name: &str,
    ) -> Result<Arc<VariableAccessor>> {
        if is_reserved_variable_name(name) {
            return Err(RuntimeError::NameError {
                name: name.into(),
                message: "is reserved for the runtime",
            });
        }
        Ok(self.class(class)?.variables().accessor_for_write(name))
    }

    /// Read through `accessor`, `UNDEF` if the variable is not set.
    pub fn get_variable(
        &self,
        object: &RubyObject,
        accessor: &VariableAccessor,
    ) -> Value {
        accessor.get(object)
    }

    pub fn set_variable(
        &self,
        object: &RubyObject,
        accessor: &VariableAccessor,
        value: Value,
    ) {
        accessor.set(object, value);
    }

    /// Copy every variable set on `from` into `to`, except the object id.
    pub fn copy_variables(&self, from: &RubyObject, to: &RubyObject) {
        to.class().variables().sync_variables(to, from);
    }

    /// Snapshot of the variable names allocated for instances of `class`.
    pub fn variable_names(&self, class: ClassId) -> Result<Vec<Arc<str>>> {
        Ok(self.class(class)?.variables().variable_names())
    }

    // ── Instance variables ─────────────────────────────────────────

    /// `instance_variable_get`: `nil` when the variable is not set.
    pub fn instance_variable_get(
        &self,
        object: &RubyObject,
        name: &str,
    ) -> Result<Value> {
        check_instance_variable_name(name)?;
        let value = object.class().variables().accessor_for_read(name).get(object);
        Ok(if value.is_undef() { Value::NIL } else { value })
    }

    pub fn instance_variable_set(
        &self,
        object: &RubyObject,
        name: &str,
        value: Value,
    ) -> Result<Value> {
        check_instance_variable_name(name)?;
        check_settable(object)?;
        if value.is_undef() {
            return Err(RuntimeError::TypeError {
                expected: "a defined value",
                got: "undef".into(),
            });
        }
        object
            .class()
            .variables()
            .accessor_for_write(name)
            .set(object, value);
        Ok(value)
    }

    pub fn instance_variable_defined(
        &self,
        object: &RubyObject,
        name: &str,
    ) -> Result<bool> {
        check_instance_variable_name(name)?;
        let accessor = object.class().variables().accessor_for_read(name);
        Ok(!accessor.get(object).is_undef())
    }

    /// `remove_instance_variable`: the removed value, a `NameError` if the
    /// variable was not set.
    pub fn remove_instance_variable(
        &self,
        object: &RubyObject,
        name: &str,
    ) -> Result<Value> {
        check_instance_variable_name(name)?;
        check_settable(object)?;
        let previous = object.class().variables().clear_variable(object, name);
        if previous.is_undef() {
            return Err(RuntimeError::NameError {
                name: name.into(),
                message: "instance variable not defined",
            });
        }
        Ok(previous)
    }

    /// Names of the instance variables set on `object`, in allocation
    /// order. Internal slots such as the object id are not listed.
    pub fn instance_variables(&self, object: &RubyObject) -> Vec<Arc<str>> {
        object
            .class()
            .variables()
            .variable_list(object)
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| is_instance_variable_name(name))
            .collect()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeCreateInfo::default())
    }
}

/// `@` followed by an identifier: a letter or `_`, then letters, digits or
/// `_`. Non-ASCII characters count as letters.
pub fn is_instance_variable_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('@') else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() || !c.is_ascii() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric() || !c.is_ascii())
}

fn check_instance_variable_name(name: &str) -> Result<()> {
    if is_instance_variable_name(name) {
        Ok(())
    } else {
        Err(RuntimeError::NameError {
            name: name.into(),
            message: "is not allowed as an instance variable name",
        })
    }
}

fn check_settable(object: &RubyObject) -> Result<()> {
    if object.is_frozen() {
        return Err(RuntimeError::FrozenError {
            class: object.class().display_name(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_merge_create_info() {
        let runtime = Runtime::new(RuntimeCreateInfo {
            strategy: Some(TableStrategy::Synchronized),
            first_object_id: Some(1000),
            ..Default::default()
        });
        let settings = runtime.settings();
        assert_eq!(settings.strategy, TableStrategy::Synchronized);
        assert_eq!(settings.first_object_id, 1000);
        assert_eq!(settings.object_id_step, 8);

        let class = runtime.define_class("Point", None).unwrap();
        let class = runtime.class(class).unwrap();
        assert_eq!(class.variables().strategy(), TableStrategy::Synchronized);
    }

    #[test]
    fn bootstrap_hierarchy() {
        let runtime = Runtime::default();
        let core = runtime.core();
        assert_eq!(runtime.class_named("Object").unwrap().id(), core.object);
        assert!(runtime.classes().is_subclass_of(core.class, core.basic_object));
        assert!(runtime.classes().is_subclass_of(core.module, core.object));
        assert_eq!(
            runtime.class_named("Nope").unwrap_err(),
            RuntimeError::NotDefined { name: "Nope".into() }
        );

        let point = runtime.define_class("Point", None).unwrap();
        assert_eq!(
            runtime.class(point).unwrap().superclass(),
            Some(core.object)
        );
    }

    #[test]
    fn ivar_names() {
        for name in ["@a", "@_", "@foo_bar9", "@Ünïcode", "@CamelCase"] {
            assert!(is_instance_variable_name(name), "{name}");
        }
        for name in ["", "@", "a", "@9", "@@a", "@a-b", "@a b", "object_id", "$a"] {
            assert!(!is_instance_variable_name(name), "{name}");
        }
    }

    #[test]
    fn instance_variable_layer() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();

        assert_eq!(runtime.instance_variable_get(&object, "@x"), Ok(Value::NIL));
        assert_eq!(runtime.instance_variable_defined(&object, "@x"), Ok(false));

        runtime
            .instance_variable_set(&object, "@x", Value::NIL)
            .unwrap();
        assert_eq!(runtime.instance_variable_defined(&object, "@x"), Ok(true));

        runtime
            .instance_variable_set(&object, "@y", Value::from_i64(3))
            .unwrap();
        runtime.object_id(&object);
        let names: Vec<_> = runtime
            .instance_variables(&object)
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["@x", "@y"]);

        assert_eq!(
            runtime.remove_instance_variable(&object, "@y"),
            Ok(Value::from_i64(3))
        );
        assert!(matches!(
            runtime.remove_instance_variable(&object, "@y"),
            Err(RuntimeError::NameError { .. })
        ));
        assert_eq!(runtime.instance_variable_get(&object, "@y"), Ok(Value::NIL));
    }

    #[test]
    fn reserved_slots_stay_out_of_reach() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        let id = runtime.object_id(&object);

        for name in ["object_id", "ffi", "objectspace_group"] {
            assert!(matches!(
                runtime.get_or_allocate_accessor(class, name),
                Err(RuntimeError::NameError { .. })
            ));
        }
        // the id slot cannot be overwritten, so the id stays readable
        assert_eq!(runtime.object_id(&object), id);
        assert!(runtime.get_or_allocate_accessor(class, "@object_id").is_ok());
    }

    #[test]
    fn invalid_names_and_values_are_rejected() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();

        assert!(matches!(
            runtime.instance_variable_set(&object, "object_id", Value::from_i64(1)),
            Err(RuntimeError::NameError { .. })
        ));
        assert!(matches!(
            runtime.instance_variable_get(&object, "x"),
            Err(RuntimeError::NameError { .. })
        ));
        assert!(matches!(
            runtime.instance_variable_set(&object, "@x", Value::UNDEF),
            Err(RuntimeError::TypeError { .. })
        ));
        assert_eq!(runtime.variable_names(class).unwrap().len(), 0);
    }

    #[test]
    fn frozen_objects_reject_writes_but_get_ids() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        runtime
            .instance_variable_set(&object, "@x", Value::from_i64(1))
            .unwrap();
        runtime.freeze(&object);

        assert_eq!(
            runtime.instance_variable_set(&object, "@x", Value::from_i64(2)),
            Err(RuntimeError::FrozenError { class: "Point".into() })
        );
        assert!(matches!(
            runtime.remove_instance_variable(&object, "@x"),
            Err(RuntimeError::FrozenError { .. })
        ));
        let id = runtime.object_id(&object);
        assert_eq!(runtime.object_id(&object), id);
        assert_eq!(runtime.instance_variable_get(&object, "@x"), Ok(Value::from_i64(1)));
    }

    #[test]
    fn modules_and_singletons_are_not_instantiable() {
        let runtime = Runtime::default();
        let module = runtime.define_module("Comparable").unwrap();
        assert!(matches!(
            runtime.allocate(module),
            Err(RuntimeError::TypeError { .. })
        ));

        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        let meta = runtime.singleton_class_of(&object);
        assert!(meta.is_singleton());
        assert!(Arc::ptr_eq(&meta, &runtime.singleton_class_of(&object)));
        assert!(Arc::ptr_eq(object.metaclass(), &meta));
        assert_eq!(object.class().id(), class);
        assert!(runtime.allocate(meta.id()).is_err());
    }

    #[test]
    fn singleton_class_does_not_move_variables() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        runtime
            .instance_variable_set(&object, "@x", Value::from_i64(1))
            .unwrap();
        runtime.singleton_class_of(&object);
        assert_eq!(runtime.instance_variable_get(&object, "@x"), Ok(Value::from_i64(1)));
        runtime
            .instance_variable_set(&object, "@y", Value::from_i64(2))
            .unwrap();
        assert_eq!(runtime.variable_names(class).unwrap().len(), 2);
    }

    #[test]
    fn id2ref_finds_live_objects() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        let other = runtime.allocate(class).unwrap();

        let id = runtime.object_id(&object);
        let other_id = runtime.object_id(&other);
        assert_eq!(id, 8);
        assert_eq!(other_id, 16);
        assert!(Arc::ptr_eq(&runtime.id2ref(id).unwrap(), &object));
        assert!(runtime.id2ref(24).is_none());

        drop(object);
        assert!(runtime.id2ref(id).is_none());
    }

    #[test]
    fn clone_keeps_frozen_state_dup_does_not() {
        let runtime = Runtime::default();
        let class = runtime.define_class("Point", None).unwrap();
        let object = runtime.allocate(class).unwrap();
        runtime
            .instance_variable_set(&object, "@x", Value::from_i64(1))
            .unwrap();
        object.freeze();

        let dup = runtime.dup(&object);
        let clone = runtime.clone_object(&object);
        assert!(!dup.is_frozen());
        assert!(clone.is_frozen());
        assert_eq!(runtime.instance_variable_get(&dup, "@x"), Ok(Value::from_i64(1)));
        assert_eq!(runtime.instance_variable_get(&clone, "@x"), Ok(Value::from_i64(1)));
    }
}
