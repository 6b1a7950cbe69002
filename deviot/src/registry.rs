use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Arc,
};

use compact_str::CompactString;
use deviot_common::{Action, Envelope, Thing, ThingId};
use parking_lot::{Mutex, RwLock};

use crate::{
    dispatch::DispatchError,
    instance::{Instance, Operations},
};

/// Type-erased instance together with its operation table.
pub(crate) trait Handler: Send {
    fn invoke(&mut self, action: &Action, envelope: &Envelope) -> Result<(), DispatchError>;
}

struct Bound<I> {
    instance: I,
    ops: Operations<I>,
}

impl<I: Instance> Handler for Bound<I> {
    fn invoke(&mut self, action: &Action, envelope: &Envelope) -> Result<(), DispatchError> {
        let Some(op) = self.ops.get(&action.name) else {
            return Err(DispatchError::UnknownOperation(action.name.clone()));
        };

        if op.params() != action.parameters.len() {
            return Err(DispatchError::ArityMismatch {
                action: action.name.clone(),
                operation: op.params() + usize::from(op.takes_payload()),
                declared: action.parameters.len(),
            });
        }

        let args = action
            .parameters
            .iter()
            .map(|param| envelope.get(param.name.as_str()).or(param.value.as_ref()))
            .collect::<Vec<_>>();

        op.call(&mut self.instance, &args, envelope.get("payload"))?;

        Ok(())
    }
}

pub(crate) struct RegisteredThing {
    pub(crate) thing: Thing,
    pub(crate) handler: Mutex<Box<dyn Handler>>,
}

/// Things currently exposed by the gateway, keyed by id.
///
/// Safe to read from transport callbacks and the heartbeat task while
/// application code registers or deregisters things.
#[derive(Default)]
pub struct Registry {
    things: RwLock<BTreeMap<ThingId, Arc<RegisteredThing>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as thing `id`. A second registration of the same id
    /// is ignored and the original instance stays in place.
    pub fn register<I: Instance>(
        &self,
        id: impl Into<ThingId>,
        name: impl Into<CompactString>,
        mut instance: I,
    ) {
        let id = id.into();

        let mut things = self.things.write();
        let entry = match things.entry(id) {
            Entry::Occupied(entry) => {
                tracing::info!(id = %entry.key(), "Thing has already been registered");
                return;
            }
            Entry::Vacant(entry) => entry,
        };

        let mut thing = Thing::new(entry.key().clone(), name, instance.kind());
        let mut ops = Operations::new();
        instance.init(&mut thing, &mut ops);

        tracing::info!(
            id = %thing.id,
            name = %thing.name,
            kind = %thing.kind,
            actions = thing.actions.len(),
            "Thing registered",
        );

        entry.insert(Arc::new(RegisteredThing {
            thing,
            handler: Mutex::new(Box::new(Bound { instance, ops })),
        }));
    }

    pub fn deregister(&self, id: &str) {
        match self.things.write().remove(id) {
            Some(removed) => tracing::info!(
                id,
                name = %removed.thing.name,
                kind = %removed.thing.kind,
                "Thing deregistered",
            ),
            None => tracing::info!(id, "Thing not registered yet"),
        }
    }

    /// Copies of all registered things, ordered by id.
    pub fn snapshot(&self) -> Vec<Thing> {
        self.things
            .read()
            .values()
            .map(|registered| registered.thing.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Thing> {
        self.things.read().get(id).map(|registered| registered.thing.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.things.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.things.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.read().is_empty()
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<Arc<RegisteredThing>> {
        self.things.read().get(id).cloned()
    }
}
