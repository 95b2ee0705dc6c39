//! Typed values exchanged across the worker boundary.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Transport handle to a collaborator service handed to the worker
/// (data access, model inference, ...).
#[derive(Clone)]
pub struct ServiceHandle {
    name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ServiceHandle {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, service: Arc<T>) -> Self {
        Self {
            name: name.into(),
            inner: service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Bool(bool),
    Record(serde_json::Value),
    Service(ServiceHandle),
}

impl Value {
    pub fn record<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Value::Record(
            serde_json::to_value(value).context("failed to encode record")?,
        ))
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Record(_) => "record",
            Value::Service(_) => "service",
        }
    }
}

/// Operation input. Assembled through [`ParameterMapBuilder`] and read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: BTreeMap<String, Value>,
}

impl ParameterMap {
    pub fn builder() -> ParameterMapBuilder {
        ParameterMapBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn record<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.get(key) {
            Some(Value::Record(raw)) => serde_json::from_value(raw.clone())
                .with_context(|| format!("parameter '{key}' has an unexpected shape")),
            Some(other) => Err(anyhow!("parameter '{key}' is {}, expected record", other.kind())),
            None => Err(anyhow!("missing parameter '{key}'")),
        }
    }

    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.get(key) {
            Some(Value::Service(handle)) => handle.downcast::<T>(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ParameterMapBuilder {
    entries: BTreeMap<String, Value>,
}

impl ParameterMapBuilder {
    pub fn insert(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn record<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(self.insert(key, Value::record(value)?))
    }

    pub fn service<T: Any + Send + Sync>(self, key: impl Into<String>, service: Arc<T>) -> Self {
        let key = key.into();
        let handle = ServiceHandle::new(key.clone(), service);
        self.insert(key, Value::Service(handle))
    }

    pub fn build(self) -> ParameterMap {
        ParameterMap {
            entries: self.entries,
        }
    }
}

/// Worker output. Consumed once by result extraction.
#[derive(Debug, Default)]
pub struct ResultMap {
    entries: BTreeMap<String, Value>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn with_record<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(self.with(key, Value::record(value)?))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn take_record<T: DeserializeOwned>(&mut self, key: &str) -> Result<T> {
        match self.take(key) {
            Some(Value::Record(raw)) => serde_json::from_value(raw)
                .with_context(|| format!("result '{key}' has an unexpected shape")),
            Some(other) => Err(anyhow!("result '{key}' is {}, expected record", other.kind())),
            None => Err(anyhow!("missing result '{key}'")),
        }
    }

    pub fn take_bytes(&mut self, key: &str) -> Result<Vec<u8>> {
        match self.take(key) {
            Some(Value::Bytes(bytes)) => Ok(bytes),
            Some(other) => Err(anyhow!("result '{key}' is {}, expected bytes", other.kind())),
            None => Err(anyhow!("missing result '{key}'")),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Input {
        width: u32,
        height: u32,
    }

    struct DataAccess {
        package: String,
    }

    #[test]
    fn test_parameter_map_records_and_services() {
        let params = ParameterMap::builder()
            .record("input", &Input { width: 100, height: 50 })
            .unwrap()
            .service("data_access", Arc::new(DataAccess { package: "com.vendor".into() }))
            .insert("token", Value::Text("abc".into()))
            .build();

        assert_eq!(params.len(), 3);
        assert_eq!(params.record::<Input>("input").unwrap(), Input { width: 100, height: 50 });
        let access = params.service::<DataAccess>("data_access").unwrap();
        assert_eq!(access.package, "com.vendor");
        assert!(params.service::<Input>("data_access").is_none());
        assert!(params.record::<Input>("token").is_err());
        assert!(params.record::<Input>("missing").is_err());
    }

    #[test]
    fn test_result_map_is_consumed() {
        let mut result = ResultMap::new()
            .with_record("result", &Input { width: 1, height: 2 })
            .unwrap()
            .with("blob", Value::Bytes(vec![1, 2, 3]));

        assert_eq!(result.take_record::<Input>("result").unwrap(), Input { width: 1, height: 2 });
        assert!(result.take_record::<Input>("result").is_err());
        assert_eq!(result.take_bytes("blob").unwrap(), vec![1, 2, 3]);
        assert!(result.is_empty());
    }
}
