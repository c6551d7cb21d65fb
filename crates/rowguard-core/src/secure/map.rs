//! Filtered map views with deferred write-back.

use std::sync::Arc;

use rowguard_lang::AccessType;
use tracing::debug;

use super::{secure_value, unsecure_value, SecureEntityContext, SecureObject};
use crate::error::SecurityResult;
use crate::object::{EntityRef, Value};

/// A recorded map mutation, in terms of secure keys and values.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOperation {
    Put { key: Value, value: Value },
    Remove { key: Value },
}

/// A map that only exposes entries whose key and value are readable.
///
/// Mutations change the filtered view and are logged; the original is only
/// changed by [`flush`](SecureObject::flush), which replays the log.
#[derive(Debug)]
pub struct SecureMap {
    context: Arc<dyn SecureEntityContext>,
    owner: Option<(EntityRef, String)>,
    original: Vec<(Value, Value)>,
    filtered: Option<Vec<(Value, Value)>>,
    operations: Vec<MapOperation>,
}

impl SecureMap {
    pub fn new(context: Arc<dyn SecureEntityContext>, original: Vec<(Value, Value)>) -> Self {
        Self {
            context,
            owner: None,
            original,
            filtered: None,
            operations: Vec::new(),
        }
    }

    /// Wrap the map held by `owner.property`.
    pub fn for_property(
        context: Arc<dyn SecureEntityContext>,
        owner: &EntityRef,
        property: impl Into<String>,
    ) -> Self {
        let owner = context.unsecure_entity(owner);
        let property = property.into();
        let original = match owner.property(&property) {
            Some(Value::Map(entries)) => entries,
            _ => Vec::new(),
        };
        Self {
            context,
            owner: Some((owner, property)),
            original,
            filtered: None,
            operations: Vec::new(),
        }
    }

    pub fn original(&self) -> &[(Value, Value)] {
        &self.original
    }

    pub fn set_original(&mut self, original: Vec<(Value, Value)>) {
        self.original = original;
        self.filtered = None;
    }

    /// Pending operations, oldest first.
    pub fn operations(&self) -> &[MapOperation] {
        &self.operations
    }

    /// Whether there are operations not yet flushed.
    pub fn is_dirty(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn entries(&mut self) -> SecurityResult<&[(Value, Value)]> {
        Ok(self.filtered_mut()?.as_slice())
    }

    pub fn len(&mut self) -> SecurityResult<usize> {
        Ok(self.filtered_mut()?.len())
    }

    pub fn is_empty(&mut self) -> SecurityResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&mut self, key: &Value) -> SecurityResult<Option<Value>> {
        Ok(self
            .filtered_mut()?
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v.clone()))
    }

    pub fn contains_key(&mut self, key: &Value) -> SecurityResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace an entry, returning the previous visible value.
    pub fn put(&mut self, key: Value, value: Value) -> SecurityResult<Option<Value>> {
        self.check_owner()?;
        let previous = put_entry(self.filtered_mut()?, key.clone(), value.clone());
        self.operations.push(MapOperation::Put { key, value });
        Ok(previous)
    }

    /// Remove a visible entry, returning its value.
    pub fn remove(&mut self, key: &Value) -> SecurityResult<Option<Value>> {
        self.check_owner()?;
        let previous = remove_entry(self.filtered_mut()?, key);
        if previous.is_some() {
            self.operations.push(MapOperation::Remove { key: key.clone() });
        }
        Ok(previous)
    }

    /// Remove every visible entry. Hidden entries survive the flush.
    pub fn clear(&mut self) -> SecurityResult<()> {
        self.check_owner()?;
        let visible = std::mem::take(self.filtered_mut()?);
        self.operations
            .extend(visible.into_iter().map(|(key, _)| MapOperation::Remove { key }));
        Ok(())
    }

    /// Append the pending operations of `other`. The filtered view is
    /// rebuilt from the original and the combined log on next access.
    pub fn merge(&mut self, other: SecureMap) {
        self.operations.extend(other.operations);
        self.filtered = None;
    }

    fn filtered_mut(&mut self) -> SecurityResult<&mut Vec<(Value, Value)>> {
        if self.filtered.is_none() {
            let context = self.context.as_ref();
            let mut filtered = Vec::with_capacity(self.original.len());
            for (key, value) in &self.original {
                let Some(key) = secure_value(context, key)? else {
                    continue;
                };
                let Some(value) = secure_value(context, value)? else {
                    continue;
                };
                filtered.push((key, value));
            }
            for operation in &self.operations {
                apply(&mut filtered, operation.clone());
            }
            self.filtered = Some(filtered);
        }
        Ok(self.filtered.get_or_insert_with(Vec::new))
    }

    fn check_owner(&self) -> SecurityResult<()> {
        match &self.owner {
            Some((owner, _)) => self.context.check_access(owner, AccessType::Update),
            None => Ok(()),
        }
    }
}

impl SecureObject for SecureMap {
    fn is_initialized(&self) -> bool {
        self.filtered.is_some()
    }

    fn refresh(&mut self) {
        self.filtered = None;
    }

    fn flush(&mut self) -> SecurityResult<()> {
        let context = self.context.as_ref();
        let operations = std::mem::take(&mut self.operations);
        let count = operations.len();
        for operation in operations {
            let operation = match operation {
                MapOperation::Put { key, value } => MapOperation::Put {
                    key: unsecure_value(context, &key),
                    value: unsecure_value(context, &value),
                },
                MapOperation::Remove { key } => MapOperation::Remove {
                    key: unsecure_value(context, &key),
                },
            };
            apply(&mut self.original, operation);
        }
        if let Some((owner, property)) = &self.owner {
            owner.set_property(property.clone(), Value::Map(self.original.clone()));
        }
        if count > 0 {
            debug!(operations = count, "Flushed secure map");
        }
        Ok(())
    }
}

fn apply(entries: &mut Vec<(Value, Value)>, operation: MapOperation) {
    match operation {
        MapOperation::Put { key, value } => {
            put_entry(entries, key, value);
        }
        MapOperation::Remove { key } => {
            remove_entry(entries, &key);
        }
    }
}

fn put_entry(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) -> Option<Value> {
    match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
        Some((_, existing)) => Some(std::mem::replace(existing, value)),
        None => {
            entries.push((key, value));
            None
        }
    }
}

fn remove_entry(entries: &mut Vec<(Value, Value)>, key: &Value) -> Option<Value> {
    let index = entries.iter().position(|(k, _)| k.equals(key))?;
    Some(entries.remove(index).1)
}
