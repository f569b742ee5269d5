use num_bigint::BigInt;

use crate::bits::BitSet;
use crate::result::{Error, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Big(BigInt),
    Float(f64),
    Str(String),
    Bits(BitSet),
    List(Vec<Value>),
    Object(ObjectValue),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Big(_) => "big",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bits(_) => "bits",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    pub fn from_u64(raw: u64) -> Value {
        if raw <= i64::MAX as u64 {
            Value::Int(raw as i64)
        } else {
            Value::Big(BigInt::from(raw))
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::Value(format!("expected a bool, got {}", other.kind()))),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Big(b) => i64::try_from(b.clone())
                .map_err(|_| Error::Value("integer too large for a 64-bit value".into())),
            other => Err(Error::Value(format!("expected an integer, got {}", other.kind()))),
        }
    }

    pub fn as_size(&self) -> Result<usize> {
        let size = self.as_int()?;
        usize::try_from(size).map_err(|_| Error::Value(format!("negative size {}", size)))
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::Value(format!("expected a string, got {}", other.kind()))),
        }
    }

    pub fn as_object(&self) -> Result<&ObjectValue> {
        match self {
            Value::Object(o) => Ok(o),
            other => Err(Error::Value(format!("expected an object, got {}", other.kind()))),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(Error::Value(format!("expected a list, got {}", other.kind()))),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

// Field order mirrors the template plan, so a linear map keeps both
// iteration order and the small-message lookups cheap.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectValue {
    context: String,
    fields: Vec<(String, Value)>,
}

impl ObjectValue {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            fields: vec![],
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
