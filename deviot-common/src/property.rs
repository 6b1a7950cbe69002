use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire type of a property. Informational for the management server; dispatch
/// coerces by the handler's parameter type instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PropertyType {
    Int,
    String,
    Bool,
    Color,
}

impl From<PropertyType> for u8 {
    fn from(value: PropertyType) -> Self {
        match value {
            PropertyType::Int => 0,
            PropertyType::String => 1,
            PropertyType::Bool => 2,
            PropertyType::Color => 3,
        }
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PropertyType::Int),
            1 => Ok(PropertyType::String),
            2 => Ok(PropertyType::Bool),
            3 => Ok(PropertyType::Color),
            _ => Err("unknown property type"),
        }
    }
}

/// A named, typed attribute of a thing, or a parameter of one of its actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: CompactString,
    #[serde(rename = "type")]
    pub ty: PropertyType,
    /// Current reading, or the default bound when a command omits the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<CompactString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<CompactString>,
}

impl Property {
    pub fn new(name: impl Into<CompactString>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            value: None,
            range: Vec::new(),
            unit: None,
            description: None,
        }
    }

    pub fn int(name: impl Into<CompactString>) -> Self {
        Self::new(name, PropertyType::Int)
    }

    pub fn string(name: impl Into<CompactString>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn bool(name: impl Into<CompactString>) -> Self {
        Self::new(name, PropertyType::Bool)
    }

    pub fn color(name: impl Into<CompactString>) -> Self {
        Self::new(name, PropertyType::Color)
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_range(mut self, range: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.range = range.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<CompactString>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<CompactString>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_format() {
        assert_eq!(
            serde_json::to_value(Property::bool("on").with_value(false)).unwrap(),
            serde_json::json!({ "name": "on", "type": 2, "value": false })
        );

        assert_eq!(
            serde_json::to_value(
                Property::int("temperature")
                    .with_value(21)
                    .with_range([-40, 85])
                    .with_unit("°C")
                    .with_description("Ambient temperature")
            )
            .unwrap(),
            serde_json::json!({
                "name": "temperature",
                "type": 0,
                "value": 21,
                "range": [-40, 85],
                "unit": "°C",
                "description": "Ambient temperature",
            })
        );
    }

    #[test]
    fn property_type_codes() {
        assert_eq!(
            serde_json::from_value::<PropertyType>(serde_json::json!(3)).unwrap(),
            PropertyType::Color
        );
        assert!(serde_json::from_value::<PropertyType>(serde_json::json!(4)).is_err());
    }
}
