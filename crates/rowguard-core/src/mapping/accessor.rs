//! Property access for mapped entities.

use std::fmt;

use crate::object::{EntityData, Value};

/// Reads and writes one mapped property of an entity.
///
/// Accessors are resolved once per mapped property when the mapping is built.
pub trait PropertyAccessor: Send + Sync + fmt::Debug {
    /// Read the property; `None` when it is not loaded.
    fn get(&self, entity: &EntityData) -> Option<Value>;

    /// Write the property.
    fn set(&self, entity: &mut EntityData, value: Value);
}

/// Accessor backed by the entity's property map.
#[derive(Debug, Clone)]
pub struct FieldAccessor {
    name: String,
}

impl FieldAccessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PropertyAccessor for FieldAccessor {
    fn get(&self, entity: &EntityData) -> Option<Value> {
        entity.properties.get(&self.name).cloned()
    }

    fn set(&self, entity: &mut EntityData, value: Value) {
        entity.properties.insert(self.name.clone(), value);
    }
}

/// Accessor for an identifier property, backed by [`EntityData::id`].
#[derive(Debug, Clone, Default)]
pub struct IdAccessor;

impl PropertyAccessor for IdAccessor {
    fn get(&self, entity: &EntityData) -> Option<Value> {
        Some(entity.id.clone())
    }

    fn set(&self, entity: &mut EntityData, value: Value) {
        entity.id = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_accessor() {
        let accessor = FieldAccessor::new("name");
        let mut data = EntityData::new("Parent", 1);
        assert_eq!(accessor.get(&data), None);

        accessor.set(&mut data, Value::from("test"));
        assert_eq!(accessor.get(&data), Some(Value::from("test")));
    }

    #[test]
    fn test_id_accessor() {
        let mut data = EntityData::new("Parent", 7);
        assert_eq!(IdAccessor.get(&data), Some(Value::Int(7)));
        IdAccessor.set(&mut data, Value::Int(8));
        assert_eq!(data.id, Value::Int(8));
    }
}
