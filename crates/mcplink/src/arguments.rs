//! Argument envelope used by tool calls.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The object of named arguments passed to a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// An empty argument object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Typed lookup for a parameter the handler cannot do without.
    pub fn require<T: DeserializeOwned>(&self, tool: &str, key: &str) -> Result<T> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| Error::invalid_arguments(tool, format!("missing '{key}'")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_arguments(tool, format!("'{key}': {e}")))
    }

    /// Deserialize the whole argument object into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self, tool: &str) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| Error::invalid_arguments(tool, e.to_string()))
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Coords {
        latitude: f64,
        longitude: f64,
    }

    #[test]
    fn test_typed_access() {
        let args = Arguments::new().set("latitude", 52.37).set("longitude", 4.89);
        assert_eq!(args.require::<f64>("getTemperature", "latitude").unwrap(), 52.37);
        assert!(args.require::<String>("getTemperature", "latitude").is_err());
        assert!(matches!(
            args.require::<f64>("getTemperature", "altitude"),
            Err(Error::InvalidArguments { .. })
        ));
        let coords: Coords = args.deserialize("getTemperature").unwrap();
        assert_eq!(coords.longitude, 4.89);
    }

    #[test]
    fn test_from_wire_object() {
        let args: Arguments =
            serde_json::from_value(serde_json::json!({"latitude": 1.0, "longitude": 2.0}))
                .unwrap();
        assert_eq!(args, Arguments::new().set("latitude", 1.0).set("longitude", 2.0));
        assert!(serde_json::from_value::<Arguments>(serde_json::json!(5)).is_err());
    }
}
