use std::{collections::HashSet, sync::Arc, thread};

use ivars::{Runtime, RuntimeCreateInfo, TableStrategy, Value};

const STRATEGIES: [TableStrategy; 2] =
    [TableStrategy::Stamped, TableStrategy::Synchronized];

fn runtime(strategy: TableStrategy) -> Runtime {
    Runtime::new(RuntimeCreateInfo {
        strategy: Some(strategy),
        ..Default::default()
    })
}

#[test]
fn indices_stay_distinct_and_stable() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let class = rt.define_class("C", None).unwrap();
        let n1 = rt.get_or_allocate_accessor(class, "@n1").unwrap();
        let n2 = rt.get_or_allocate_accessor(class, "@n2").unwrap();
        assert_ne!(n1.index(), n2.index());

        let rt = Arc::new(rt);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let rt = rt.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        rt.get_or_allocate_accessor(class, &format!("@t{t}_{i}"))
                            .unwrap();
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(rt.get_or_allocate_accessor(class, "@n1").unwrap().index(), n1.index());
        assert_eq!(rt.get_or_allocate_accessor(class, "@n2").unwrap().index(), n2.index());
        assert_eq!(rt.variable_names(class).unwrap().len(), 402);
    }
}

#[test]
fn read_after_write_and_absent_by_default() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let class = rt.define_class("C", None).unwrap();
        let object = rt.allocate(class).unwrap();
        let fresh = rt.allocate(class).unwrap();

        let values = [
            Value::NIL,
            Value::FALSE,
            Value::TRUE,
            Value::from_i64(-7),
            rt.symbol("sym"),
        ];
        for (i, &value) in values.iter().enumerate() {
            let accessor = rt
                .get_or_allocate_accessor(class, &format!("@v{i}"))
                .unwrap();
            rt.set_variable(&object, &accessor, value);
            assert_eq!(rt.get_variable(&object, &accessor), value);
            assert_eq!(rt.get_variable(&fresh, &accessor), Value::UNDEF);
        }
    }
}

#[test]
fn growth_preserves_prior_values() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let class = rt.define_class("C", None).unwrap();
        let object = rt.allocate(class).unwrap();

        let accessors: Vec<_> = (0..20)
            .map(|i| rt.get_or_allocate_accessor(class, &format!("@v{i}")).unwrap())
            .collect();
        // the first write already sizes the array to the whole table
        for (i, accessor) in accessors.iter().enumerate().rev() {
            rt.set_variable(&object, accessor, Value::from_i64(i as i64));
        }
        // a name allocated after the array was sized forces another growth
        let late = rt.get_or_allocate_accessor(class, "@late").unwrap();
        rt.set_variable(&object, &late, Value::TRUE);

        for (i, accessor) in accessors.iter().enumerate() {
            assert_eq!(rt.get_variable(&object, accessor), Value::from_i64(i as i64));
        }
        assert_eq!(rt.get_variable(&object, &late), Value::TRUE);
    }
}

#[test]
fn concurrent_allocation_race() {
    for strategy in STRATEGIES {
        let rt = Arc::new(runtime(strategy));
        let class = rt.define_class("C", None).unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let rt = rt.clone();
                thread::spawn(move || rt.get_or_allocate_accessor(class, "@x").unwrap().index())
            })
            .collect();
        let indices: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(indices.len(), 1);
        assert_eq!(rt.variable_names(class).unwrap().len(), 1);
    }
}

#[test]
fn concurrent_writers_on_shared_objects() {
    for strategy in STRATEGIES {
        let rt = Arc::new(runtime(strategy));
        let class = rt.define_class("C", None).unwrap();
        let objects: Arc<Vec<_>> =
            Arc::new((0..16).map(|_| rt.allocate(class).unwrap()).collect());
        let threads = 8;
        let names = 24;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let rt = rt.clone();
                let objects = objects.clone();
                thread::spawn(move || {
                    for n in 0..names {
                        let accessor = rt
                            .get_or_allocate_accessor(class, &format!("@t{t}_{n}"))
                            .unwrap();
                        for (o, object) in objects.iter().enumerate() {
                            rt.set_variable(object, &accessor, Value::from_i64((t * 1000 + n * 10 + o) as i64));
                        }
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());

        for (o, object) in objects.iter().enumerate() {
            for t in 0..threads {
                for n in 0..names {
                    let accessor = object
                        .class()
                        .variables()
                        .accessor_for_read(&format!("@t{t}_{n}"));
                    assert_eq!(
                        rt.get_variable(object, &accessor),
                        Value::from_i64((t * 1000 + n * 10 + o) as i64),
                        "{strategy:?} lost a write"
                    );
                }
            }
        }
    }
}

#[test]
fn clone_excludes_identity() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let class = rt.define_class("C", None).unwrap();
        let a = rt.allocate(class).unwrap();
        let b = rt.allocate(class).unwrap();

        rt.instance_variable_set(&a, "@x", Value::from_i64(1)).unwrap();
        let id = rt.object_id(&a);

        rt.copy_variables(&a, &b);
        let variables = b.class().variables();
        let id_accessor = variables.object_id_field().for_read(variables);
        assert!(!id_accessor.is_dummy());
        assert_eq!(rt.get_variable(&b, &id_accessor), Value::UNDEF);
        assert_eq!(rt.instance_variable_get(&b, "@x"), Ok(Value::from_i64(1)));
        assert_ne!(rt.object_id(&b), id);
        assert_eq!(rt.object_id(&a), id);
    }
}

#[test]
fn copy_keeps_destination_identity() {
    let rt = runtime(TableStrategy::Stamped);
    let class = rt.define_class("C", None).unwrap();
    let a = rt.allocate(class).unwrap();
    let b = rt.allocate(class).unwrap();
    rt.object_id(&a);
    let b_id = rt.object_id(&b);
    rt.instance_variable_set(&b, "@only_b", Value::TRUE).unwrap();
    rt.instance_variable_set(&a, "@x", Value::from_i64(5)).unwrap();

    rt.copy_variables(&a, &b);
    assert_eq!(rt.object_id(&b), b_id);
    assert_eq!(rt.instance_variable_get(&b, "@x"), Ok(Value::from_i64(5)));
    assert_eq!(rt.instance_variable_get(&b, "@only_b"), Ok(Value::TRUE));
}

#[test]
fn copy_across_classes_resolves_by_name() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let source_class = rt.define_class("Source", None).unwrap();
        let dest_class = rt.define_class("Dest", None).unwrap();
        let source = rt.allocate(source_class).unwrap();
        let dest = rt.allocate(dest_class).unwrap();

        rt.instance_variable_set(&dest, "@z", Value::from_i64(26)).unwrap();
        rt.instance_variable_set(&source, "@a", Value::from_i64(1)).unwrap();
        rt.object_id(&source);
        rt.instance_variable_set(&source, "@b", Value::from_i64(2)).unwrap();

        rt.copy_variables(&source, &dest);

        let names: Vec<_> = rt
            .variable_names(dest_class)
            .unwrap()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["@z", "@a", "@b"]);
        assert_eq!(rt.instance_variable_get(&dest, "@a"), Ok(Value::from_i64(1)));
        assert_eq!(rt.instance_variable_get(&dest, "@b"), Ok(Value::from_i64(2)));
        assert_eq!(rt.instance_variable_get(&dest, "@z"), Ok(Value::from_i64(26)));
        assert!(!rt.class(dest_class).unwrap().variables().has_object_id());
    }
}

#[test]
fn variable_names_is_a_snapshot() {
    let rt = runtime(TableStrategy::Stamped);
    let class = rt.define_class("C", None).unwrap();
    rt.get_or_allocate_accessor(class, "@a").unwrap();

    let mut names = rt.variable_names(class).unwrap();
    names.clear();
    rt.get_or_allocate_accessor(class, "@b").unwrap();

    assert!(names.is_empty());
    assert_eq!(rt.variable_names(class).unwrap().len(), 2);
}

#[test]
fn end_to_end_scenario() {
    for strategy in STRATEGIES {
        let rt = runtime(strategy);
        let c = rt.define_class("C", None).unwrap();

        let o1 = rt.allocate(c).unwrap();
        let a = rt.get_or_allocate_accessor(c, "a").unwrap();
        rt.set_variable(&o1, &a, Value::from_i64(1));
        assert_eq!(o1.storage().len(), 1);

        let b = rt.get_or_allocate_accessor(c, "b").unwrap();
        rt.set_variable(&o1, &b, Value::from_i64(2));
        assert_eq!(o1.storage().len(), 2);

        let cvar = rt.class(c).unwrap().variables().accessor_for_read("c");
        assert_eq!(rt.get_variable(&o1, &a), Value::from_i64(1));
        assert_eq!(rt.get_variable(&o1, &b), Value::from_i64(2));
        assert_eq!(rt.get_variable(&o1, &cvar), Value::UNDEF);

        let o2 = rt.allocate(c).unwrap();
        assert_eq!(rt.get_variable(&o2, &a), Value::UNDEF);
        assert!(!o2.storage().is_allocated());

        let o3 = rt.allocate(c).unwrap();
        rt.copy_variables(&o1, &o3);
        assert_eq!(rt.get_variable(&o3, &a), Value::from_i64(1));
        assert_eq!(rt.get_variable(&o3, &b), Value::from_i64(2));
    }
}

#[test]
fn runtimes_are_independent() {
    let first = runtime(TableStrategy::Stamped);
    let second = runtime(TableStrategy::Synchronized);
    let c1 = first.define_class("C", None).unwrap();
    let c2 = second.define_class("C", None).unwrap();

    first.get_or_allocate_accessor(c1, "@only_here").unwrap();
    assert!(second.variable_names(c2).unwrap().is_empty());

    let o1 = first.allocate(c1).unwrap();
    let o2 = second.allocate(c2).unwrap();
    assert_eq!(first.object_id(&o1), second.object_id(&o2));
    drop(first);
    assert!(second.id2ref(second.object_id(&o2)).is_some());
}
