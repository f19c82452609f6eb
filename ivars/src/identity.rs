use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{RubyObject, Value};

/// Hands out object ids. Ids are only consumed by objects that get asked
/// for one, most objects never pay for an identity.
#[derive(Debug)]
pub struct ObjectIdGenerator {
    next: AtomicI64,
    step: i64,
}

impl ObjectIdGenerator {
    pub fn new(first: i64, step: i64) -> Self {
        assert!(step > 0, "object id step must be positive");
        assert!(
            Value::try_from_i64(first).is_some(),
            "first object id {first} is not a fixnum"
        );
        Self {
            next: AtomicI64::new(first),
            step,
        }
    }

    /// # Panics
    ///
    /// Panics once ids no longer fit in a fixnum. The counter is left at
    /// the exhausted id, it never wraps.
    pub fn next_id(&self) -> i64 {
        let step = self.step;
        let claimed = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                (id <= Value::FIXNUM_MAX).then(|| id.saturating_add(step))
            });
        match claimed {
            Ok(id) => id,
            Err(id) => panic!("object id space exhausted at {id}"),
        }
    }
}

/// Id → object lookup for objects whose id was taken. Holds weak
/// references only, the registry never keeps an object alive.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: Mutex<HashMap<i64, Weak<RubyObject>, ahash::RandomState>>,
}

impl ObjectRegistry {
    pub fn register(&self, id: i64, object: &Arc<RubyObject>) {
        let mut objects = self.objects.lock();
        // dead entries accumulate until someone registers, prune them here
        if objects.len() >= 64 && objects.len().is_power_of_two() {
            objects.retain(|_, object| object.strong_count() > 0);
        }
        objects.insert(id, Arc::downgrade(object));
    }

    pub fn lookup(&self, id: i64) -> Option<Arc<RubyObject>> {
        self.objects.lock().get(&id)?.upgrade()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by [`object_id`], `fresh` is set when this call assigned the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId {
    pub id: i64,
    pub fresh: bool,
}

/// The object id of `object`, assigned from `ids` on first request.
///
/// The id lives in the well-known `object_id` slot of the object's class,
/// written through the same table protocol as any other variable.
pub fn object_id(object: &RubyObject, ids: &ObjectIdGenerator) -> ObjectId {
    let variables = object.class().variables();

    if let Some(id) = read_id(object) {
        return ObjectId { id, fresh: false };
    }

    let _guard = object.storage().lock();
    // someone else may have assigned it while we were waiting
    if let Some(id) = read_id(object) {
        return ObjectId { id, fresh: false };
    }

    let id = ids.next_id();
    variables
        .object_id_field()
        .for_write(variables)
        .set(object, Value::from_i64(id));
    log::debug!(
        "assigned object id {id} to an instance of {}",
        object.class().display_name()
    );
    ObjectId { id, fresh: true }
}

fn read_id(object: &RubyObject) -> Option<i64> {
    let variables = object.class().variables();
    let accessor = variables.object_id_field().for_read(variables);
    let value = accessor.get(object);
    if value.is_undef() {
        return None;
    }
    match value.as_i64() {
        Some(id) => Some(id),
        None => panic!("object id slot holds a non-fixnum {value:?}"),
    }
}
