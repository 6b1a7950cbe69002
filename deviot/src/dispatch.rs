//! Routing of inbound command envelopes to registered instances.

use compact_str::CompactString;
use deviot_common::{Envelope, ThingId};
use serde_json::Value;

use crate::{instance::ConversionError, registry::Registry};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("thing id/name not available")]
    MissingThing,
    #[error("thing id/name ({0}) not available")]
    UnknownThing(ThingId),
    #[error("thing action not available")]
    MissingAction,
    #[error("thing action ({action}) not available on {thing}")]
    UnknownAction { thing: ThingId, action: CompactString },
    #[error("thing method ({0}) not available")]
    UnknownOperation(CompactString),
    #[error("thing method ({action}) arguments ({operation}:{declared}) do not match")]
    ArityMismatch {
        action: CompactString,
        operation: usize,
        declared: usize,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

fn str_field<'a>(envelope: &'a Envelope, key: &str) -> Option<&'a str> {
    envelope.get(key).and_then(Value::as_str)
}

impl Registry {
    /// Invokes the operation a command envelope names.
    ///
    /// Nothing is invoked unless the thing, action and operation all resolve
    /// and every argument converts.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let id = str_field(envelope, "id")
            .or_else(|| str_field(envelope, "name"))
            .ok_or(DispatchError::MissingThing)?;

        let registered = self
            .lookup(id)
            .ok_or_else(|| DispatchError::UnknownThing(ThingId::from(id)))?;

        let action = str_field(envelope, "action").ok_or(DispatchError::MissingAction)?;

        let action = registered.thing.find_action(action).ok_or_else(|| {
            DispatchError::UnknownAction {
                thing: registered.thing.id.clone(),
                action: action.into(),
            }
        })?;

        tracing::debug!(id, action = %action.name, "Dispatching action");

        registered.handler.lock().invoke(action, envelope)
    }
}
