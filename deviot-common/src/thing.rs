use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{Property, ThingId};

/// A named command a thing accepts. Parameter order is the order arguments are
/// bound to the handling operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: CompactString,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Property>,
}

impl Action {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self { name: name.into(), parameters: Vec::new() }
    }

    pub fn add_parameter(&mut self, parameter: Property) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_parameter(mut self, parameter: Property) -> Self {
        self.add_parameter(parameter);
        self
    }
}

/// The shape of a device as the management server sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub id: ThingId,
    pub name: CompactString,
    #[serde(default, skip_serializing_if = "CompactString::is_empty")]
    pub kind: CompactString,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
}

impl Thing {
    pub fn new(
        id: impl Into<ThingId>,
        name: impl Into<CompactString>,
        kind: impl Into<CompactString>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            actions: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn add_action(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn add_property(&mut self, property: Property) -> &mut Self {
        self.properties.push(property);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.add_action(action);
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.add_property(property);
        self
    }

    /// First action with the given name, in insertion order.
    pub fn find_action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }
}
