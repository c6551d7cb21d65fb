//! Dynamic entity values.
//!
//! Entities are plain property bags behind a shared, lockable handle. Secure
//! views are separate handles over separate data; identity of a view is the
//! identity of its handle.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A runtime value: a scalar, an entity or a collection.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Entity(EntityRef),
    Collection(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Get a description of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Entity(_) => "entity",
            Value::Collection(_) => "collection",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// SQL equality: numeric values compare across `Int` and `Float`,
    /// entities compare by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (a, b) => a == b,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Convert to JSON. Entities are written as `{"type": .., "id": ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Entity(e) => {
                let data = e.read();
                serde_json::json!({ "type": data.type_name, "id": data.id.to_json() })
            }
            Value::Collection(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Array(
                entries
                    .iter()
                    .map(|(k, v)| serde_json::json!([k.to_json(), v.to_json()]))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a == b,
            (Value::Collection(a), Value::Collection(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Entity(e) => write!(f, "{}", e),
            Value::Collection(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Collection(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Value::Entity(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Collection(items)
    }
}

/// The state of one entity instance.
#[derive(Debug, Clone, Default)]
pub struct EntityData {
    /// Concrete mapped type.
    pub type_name: String,
    /// Identifier value.
    pub id: Value,
    /// Loaded property values. A mapped property that is absent is not loaded.
    pub properties: BTreeMap<String, Value>,
}

impl EntityData {
    pub fn new(type_name: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Set a property value.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Shared handle to an entity instance.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<EntityData>>);

impl EntityRef {
    pub fn new(data: EntityData) -> Self {
        Self(Arc::new(RwLock::new(data)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, EntityData> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, EntityData> {
        self.0.write()
    }

    pub fn type_name(&self) -> String {
        self.0.read().type_name.clone()
    }

    pub fn id(&self) -> Value {
        self.0.read().id.clone()
    }

    /// Read a property; `None` when not loaded.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.0.read().properties.get(name).cloned()
    }

    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.write().properties.insert(name.into(), value.into());
    }

    /// Whether both handles point to the same instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared instance, used as identity-map key.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl From<EntityData> for EntityRef {
    fn from(data: EntityData) -> Self {
        EntityRef::new(data)
    }
}

/// Same handle, or same concrete type name and non-null id.
impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = self.0.read();
        let b = other.0.read();
        !a.id.is_null() && a.type_name == b.type_name && a.id == b.id
    }
}

// Relationships may be cyclic; only the key is printed.
impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.read();
        write!(f, "EntityRef({}#{})", data.type_name, data.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.read();
        write!(f, "{}#{}", data.type_name, data.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_identity() {
        let a = EntityRef::new(EntityData::new("Parent", 1));
        let b = EntityRef::new(EntityData::new("Parent", 1));
        let c = EntityRef::new(EntityData::new("Parent", 2));
        let d = EntityRef::new(EntityData::new("Parent", Value::Null));
        let e = EntityRef::new(EntityData::new("Parent", Value::Null));

        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(d, e);
        assert_eq!(d, d.clone());

        let child = EntityRef::new(EntityData::new("Child", 1));
        assert_ne!(a, child);
    }

    #[test]
    fn test_numeric_equality() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert!(!Value::Int(2).equals(&Value::String("2".into())));
        assert_eq!(
            Value::Int(1).compare(&Value::Float(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).compare(&Value::Bool(true)), None);
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({ "roles": ["admin", "user"], "level": 3, "ratio": 0.5 });
        let value = Value::from(json);
        let Value::Map(entries) = &value else {
            panic!("expected map");
        };
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().any(|(k, v)| {
            k == &Value::from("roles")
                && *v == Value::Collection(vec!["admin".into(), "user".into()])
        }));
        assert!(entries.iter().any(|(_, v)| *v == Value::Int(3)));
        assert!(entries.iter().any(|(_, v)| *v == Value::Float(0.5)));
    }

    #[test]
    fn test_cyclic_debug() {
        let parent = EntityRef::new(EntityData::new("Parent", 1));
        let child =
            EntityRef::new(EntityData::new("Child", 2).with_property("parent", parent.clone()));
        parent.set_property("children", vec![Value::Entity(child.clone())]);
        assert_eq!(format!("{:?}", child), "EntityRef(Child#2)");
        assert_eq!(child.to_string(), "Child#2");
    }
}
