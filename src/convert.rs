use std::collections::HashMap;
use std::sync::Arc;

use crate::result::{Error, Result};
use crate::value::Value;

// Raw wire value to user value and back. Implementations must be
// inverses of each other for round-trips to hold.
pub trait Converter: Send + Sync {
    fn decode(&self, raw: Value) -> Result<Value>;
    fn encode(&self, user: Value) -> Result<Value>;
}

pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<()>;
}

#[derive(Default)]
pub struct ConverterRegistry {
    strategies: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn register(&mut self, id: impl Into<String>, converter: Arc<dyn Converter>) -> Result<()> {
        let id = id.into();
        if self.strategies.contains_key(&id) {
            return Err(Error::config(
                "converter registry",
                format!("converter `{}` already registered", id),
            ));
        }
        self.strategies.insert(id, converter);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Converter>> {
        self.strategies
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Value(format!("unknown converter `{}`", id)))
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct ValidatorRegistry {
    strategies: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn register(&mut self, id: impl Into<String>, validator: Arc<dyn Validator>) -> Result<()> {
        let id = id.into();
        if self.strategies.contains_key(&id) {
            return Err(Error::config(
                "validator registry",
                format!("validator `{}` already registered", id),
            ));
        }
        self.strategies.insert(id, validator);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Validator>> {
        self.strategies
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Value(format!("unknown validator `{}`", id)))
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}
