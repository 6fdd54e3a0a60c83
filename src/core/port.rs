//! Typed, named data slots attached to states.

use super::error::ModelError;
use super::ids::PortId;
use super::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Port name reserved for error propagation.
const RESERVED_ERROR_NAME: &str = "error";

/// A typed, named slot owned by exactly one state.
///
/// The default value always satisfies the declared type or is a deferred
/// reference (`"$name"`) resolved against the global variables when the
/// owning state is entered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPort {
    id: PortId,
    name: String,
    data_type: DataType,
    default_value: Value,
    /// Persisted modelling flag. Port values are immutable once written, so a
    /// shared port and a copied one behave the same at run time; mutable
    /// sharing goes through by-reference global variables.
    by_reference: bool,
}

/// A container-owned slot visible to all direct children as source and sink.
pub type ScopedVariable = DataPort;

/// Which slot collection of a state a port belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Input,
    Output,
    Scoped,
}

impl DataPort {
    /// Create a port, validating the default against the declared type.
    ///
    /// String defaults are converted to the declared type where possible.
    pub fn new(
        id: PortId,
        name: impl Into<String>,
        data_type: DataType,
        default_value: impl Into<Value>,
    ) -> Result<Self, ModelError> {
        let name = validate_name(name.into())?;
        let default_value = check_default_value(default_value.into(), data_type)?;
        Ok(Self {
            id,
            name,
            data_type,
            default_value,
            by_reference: false,
        })
    }

    /// Flag the port as share-by-reference. Kept with the model and carried
    /// over by grouping; it does not change how values flow.
    pub fn shared(mut self, by_reference: bool) -> Self {
        self.by_reference = by_reference;
        self
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn by_reference(&self) -> bool {
        self.by_reference
    }

    pub(crate) fn with_id(mut self, id: PortId) -> Self {
        self.id = id;
        self
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), ModelError> {
        self.name = validate_name(name.into())?;
        Ok(())
    }

    pub fn set_default_value(&mut self, value: impl Into<Value>) -> Result<(), ModelError> {
        self.default_value = check_default_value(value.into(), self.data_type)?;
        Ok(())
    }

    /// Change the declared type, keeping the default consistent.
    ///
    /// A default that still fits (or a deferred reference) is kept, numeric
    /// defaults are converted between int and float, anything else is nulled.
    pub fn change_data_type(&mut self, data_type: DataType, default_value: Option<Value>) {
        let candidate = default_value.unwrap_or_else(|| self.default_value.clone());
        self.default_value = if candidate.deferred_reference().is_some() {
            candidate
        } else {
            data_type.convert(&candidate).unwrap_or(Value::Null)
        };
        self.data_type = data_type;
    }

    /// Re-check the invariant on a port obtained without validation.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.default_value.deferred_reference().is_some()
            || self.data_type.accepts(&self.default_value)
        {
            Ok(())
        } else {
            Err(ModelError::InvalidDefault {
                value: self.default_value.clone(),
                data_type: self.data_type,
            })
        }
    }
}

fn validate_name(name: String) -> Result<String, ModelError> {
    if name.is_empty() {
        return Err(ModelError::Validation("port name cannot be empty".into()));
    }
    if name == RESERVED_ERROR_NAME {
        warn!(
            port = %name,
            "port name is used internally for error propagation"
        );
    }
    Ok(name)
}

/// Check a default value against a data type, converting textual defaults.
pub fn check_default_value(value: Value, data_type: DataType) -> Result<Value, ModelError> {
    if let Value::Str(text) = &value {
        if value.deferred_reference().is_some() {
            return Ok(value);
        }
        if text == "None" {
            return Ok(Value::Null);
        }
        if !data_type.accepts(&value) {
            return data_type
                .parse_value(text)
                .ok_or(ModelError::InvalidDefault {
                    value: value.clone(),
                    data_type,
                });
        }
    }
    if data_type.accepts(&value) {
        Ok(value)
    } else {
        Err(ModelError::InvalidDefault { value, data_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_must_satisfy_type() {
        let err = DataPort::new(0, "count", DataType::Int, "abc").unwrap_err();
        assert!(matches!(err, ModelError::InvalidDefault { .. }));
    }

    #[test]
    fn textual_defaults_are_converted() {
        let port = DataPort::new(0, "count", DataType::Int, "7").unwrap();
        assert_eq!(port.default_value(), &Value::Int(7));

        let port = DataPort::new(1, "flag", DataType::Bool, "None").unwrap();
        assert_eq!(port.default_value(), &Value::Null);
    }

    #[test]
    fn deferred_reference_skips_type_check() {
        let port = DataPort::new(0, "speed", DataType::Float, "$max_speed").unwrap();
        assert_eq!(port.default_value().deferred_reference(), Some("max_speed"));
    }

    #[test]
    fn change_data_type_converts_numbers() {
        let mut port = DataPort::new(0, "x", DataType::Int, 3).unwrap();
        port.change_data_type(DataType::Float, None);
        assert_eq!(port.default_value(), &Value::Float(3.0));

        port.change_data_type(DataType::Str, None);
        assert_eq!(port.default_value(), &Value::Null);
        assert!(port.validate().is_ok());
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(DataPort::new(0, "", DataType::Any, Value::Null).is_err());
        let mut port = DataPort::new(0, "x", DataType::Any, Value::Null).unwrap();
        assert!(port.rename("").is_err());
        assert_eq!(port.name(), "x");
    }
}
