//! Filtered collection views.

use std::sync::Arc;

use rowguard_lang::AccessType;

use super::{secure_value, unsecure_value, SecureEntityContext, SecureObject};
use crate::error::{SecurityError, SecurityResult};
use crate::mapping::CollectionKind;
use crate::object::{EntityRef, Value};

/// A collection that only exposes elements the current user may read.
///
/// The filtered view holds secure views of the readable elements of the
/// original, in original order. Mutations are applied to the filtered view
/// and to the original immediately; elements that are not visible are
/// never touched.
#[derive(Debug)]
pub struct SecureCollection {
    context: Arc<dyn SecureEntityContext>,
    kind: CollectionKind,
    /// Unsecure owner and property the collection belongs to.
    owner: Option<(EntityRef, String)>,
    original: Vec<Value>,
    filtered: Option<Vec<Value>>,
}

impl SecureCollection {
    /// Wrap a free-standing collection.
    pub fn new(
        context: Arc<dyn SecureEntityContext>,
        kind: CollectionKind,
        original: Vec<Value>,
    ) -> Self {
        Self {
            context,
            kind,
            owner: None,
            original,
            filtered: None,
        }
    }

    /// Wrap the collection held by `owner.property`. Mutations require
    /// UPDATE access to the owner; `flush` writes the original back.
    pub fn for_property(
        context: Arc<dyn SecureEntityContext>,
        kind: CollectionKind,
        owner: &EntityRef,
        property: impl Into<String>,
    ) -> Self {
        let owner = context.unsecure_entity(owner);
        let property = property.into();
        let original = match owner.property(&property) {
            Some(Value::Collection(items)) => items,
            _ => Vec::new(),
        };
        Self {
            context,
            kind,
            owner: Some((owner, property)),
            original,
            filtered: None,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// The unfiltered elements.
    pub fn original(&self) -> &[Value] {
        &self.original
    }

    /// Replace the original and drop the filtered view.
    pub fn set_original(&mut self, original: Vec<Value>) {
        self.original = original;
        self.filtered = None;
    }

    /// The visible elements.
    pub fn elements(&mut self) -> SecurityResult<&[Value]> {
        Ok(self.filtered_mut()?.as_slice())
    }

    pub fn len(&mut self) -> SecurityResult<usize> {
        Ok(self.filtered_mut()?.len())
    }

    pub fn is_empty(&mut self) -> SecurityResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&mut self, value: &Value) -> SecurityResult<bool> {
        Ok(self.filtered_mut()?.iter().any(|v| v.equals(value)))
    }

    /// Add an element. A set rejects elements it already contains.
    pub fn add(&mut self, value: Value) -> SecurityResult<bool> {
        self.check_owner()?;
        if self.kind == CollectionKind::Set && self.contains(&value)? {
            return Ok(false);
        }
        let unsecure = unsecure_value(self.context.as_ref(), &value);
        self.filtered_mut()?.push(value);
        self.original.push(unsecure);
        Ok(true)
    }

    /// Remove one occurrence of an element. Returns `false` if it is not
    /// part of the original collection.
    pub fn remove(&mut self, value: &Value) -> SecurityResult<bool> {
        self.check_owner()?;
        let unsecure = unsecure_value(self.context.as_ref(), value);
        let Some(index) = self.original.iter().position(|v| v.equals(&unsecure)) else {
            return Ok(false);
        };
        let filtered = self.filtered_mut()?;
        if let Some(pos) = filtered.iter().position(|v| v.equals(value)) {
            filtered.remove(pos);
        }
        self.original.remove(index);
        Ok(true)
    }

    /// Remove all visible elements. Elements that are not visible stay in
    /// the original.
    pub fn clear(&mut self) -> SecurityResult<()> {
        self.check_owner()?;
        let visible = std::mem::take(self.filtered_mut()?);
        for value in &visible {
            let unsecure = unsecure_value(self.context.as_ref(), value);
            if let Some(index) = self.original.iter().position(|v| v.equals(&unsecure)) {
                self.original.remove(index);
            }
        }
        Ok(())
    }

    /// Get the visible element at `index`.
    pub fn get(&mut self, index: usize) -> SecurityResult<Option<Value>> {
        self.require_list("get")?;
        Ok(self.filtered_mut()?.get(index).cloned())
    }

    /// Insert at a visible position. The element lands in the original just
    /// before the element currently visible at `index`.
    pub fn insert(&mut self, index: usize, value: Value) -> SecurityResult<()> {
        self.require_list("insert")?;
        self.check_owner()?;
        let len = self.len()?;
        if index > len {
            return Err(SecurityError::IndexOutOfBounds { index, len });
        }
        let position = if index == len {
            self.original.len()
        } else {
            self.original_positions()?[index]
        };
        self.original
            .insert(position, unsecure_value(self.context.as_ref(), &value));
        self.filtered_mut()?.insert(index, value);
        Ok(())
    }

    /// Remove the visible element at `index`.
    pub fn remove_at(&mut self, index: usize) -> SecurityResult<Value> {
        self.require_list("remove_at")?;
        self.check_owner()?;
        let position = self.original_position(index)?;
        self.original.remove(position);
        Ok(self.filtered_mut()?.remove(index))
    }

    /// Replace the visible element at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: Value) -> SecurityResult<Value> {
        self.require_list("set")?;
        self.check_owner()?;
        let position = self.original_position(index)?;
        self.original[position] = unsecure_value(self.context.as_ref(), &value);
        Ok(std::mem::replace(&mut self.filtered_mut()?[index], value))
    }

    fn filtered_mut(&mut self) -> SecurityResult<&mut Vec<Value>> {
        if self.filtered.is_none() {
            let mut filtered = Vec::with_capacity(self.original.len());
            for value in &self.original {
                if let Some(secure) = secure_value(self.context.as_ref(), value)? {
                    filtered.push(secure);
                }
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

    fn require_list(&self, operation: &str) -> SecurityResult<()> {
        if self.kind == CollectionKind::List {
            Ok(())
        } else {
            Err(SecurityError::Unsupported(format!(
                "{} on a {:?} collection",
                operation, self.kind
            )))
        }
    }

    /// Original index of every visible element. The filtered view is an
    /// ordered subsequence of the original.
    fn original_positions(&mut self) -> SecurityResult<Vec<usize>> {
        let context = Arc::clone(&self.context);
        let filtered = self.filtered_mut()?.clone();
        let mut positions = Vec::with_capacity(filtered.len());
        let mut next = filtered.iter();
        let mut wanted = next.next().map(|v| unsecure_value(context.as_ref(), v));
        for (index, value) in self.original.iter().enumerate() {
            let Some(target) = &wanted else {
                break;
            };
            if value.equals(target) {
                positions.push(index);
                wanted = next.next().map(|v| unsecure_value(context.as_ref(), v));
            }
        }
        Ok(positions)
    }

    fn original_position(&mut self, index: usize) -> SecurityResult<usize> {
        let len = self.len()?;
        self.original_positions()?
            .get(index)
            .copied()
            .ok_or(SecurityError::IndexOutOfBounds { index, len })
    }
}

impl SecureObject for SecureCollection {
    fn is_initialized(&self) -> bool {
        self.filtered.is_some()
    }

    fn refresh(&mut self) {
        self.filtered = None;
    }

    fn flush(&mut self) -> SecurityResult<()> {
        if let Some((owner, property)) = &self.owner {
            owner.set_property(property.clone(), Value::Collection(self.original.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::EntityData;
    use parking_lot::Mutex;

    // Readable when `visible` is set; secure views are the entities themselves.
    #[derive(Debug, Default)]
    struct FlagContext {
        updatable: bool,
        checks: Mutex<usize>,
    }

    impl SecureEntityContext for FlagContext {
        fn is_accessible(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<bool> {
            *self.checks.lock() += 1;
            Ok(match access {
                AccessType::Update => self.updatable,
                _ => entity.property("visible").and_then(|v| v.as_bool()).unwrap_or(false),
            })
        }

        fn secure_entity(&self, entity: &EntityRef) -> SecurityResult<Option<EntityRef>> {
            Ok(self
                .is_accessible(entity, AccessType::Read)?
                .then(|| entity.clone()))
        }

        fn unsecure_entity(&self, entity: &EntityRef) -> EntityRef {
            entity.clone()
        }
    }

    fn item(id: i64, visible: bool) -> Value {
        Value::Entity(EntityRef::new(
            EntityData::new("Item", id).with_property("visible", visible),
        ))
    }

    fn context(updatable: bool) -> Arc<FlagContext> {
        Arc::new(FlagContext {
            updatable,
            ..FlagContext::default()
        })
    }

    #[test]
    fn test_lazy_filtering() {
        let ctx = context(true);
        let mut collection = SecureCollection::new(
            ctx.clone(),
            CollectionKind::Bag,
            vec![item(1, true), item(2, false), Value::from("plain"), item(3, true)],
        );
        assert!(!collection.is_initialized());
        assert_eq!(*ctx.checks.lock(), 0);

        assert_eq!(collection.len().unwrap(), 3);
        assert!(collection.is_initialized());
        assert!(!collection.contains(&item(2, false)).unwrap());
        assert!(collection.contains(&Value::from("plain")).unwrap());

        collection.refresh();
        assert!(!collection.is_initialized());
    }

    #[test]
    fn test_add_then_remove_leaves_original_unchanged() {
        let owner = EntityRef::new(
            EntityData::new("Order", 1).with_property("items", vec![item(1, true), item(2, false)]),
        );
        let mut collection =
            SecureCollection::for_property(context(true), CollectionKind::Bag, &owner, "items");
        let before = collection.original().to_vec();

        let added = item(9, true);
        assert!(collection.add(added.clone()).unwrap());
        assert_eq!(collection.original().len(), 3);
        assert!(collection.remove(&added).unwrap());
        collection.flush().unwrap();

        assert_eq!(owner.property("items"), Some(Value::Collection(before)));
    }

    #[test]
    fn test_remove_missing_and_clear_keeps_hidden() {
        let mut collection = SecureCollection::new(
            context(true),
            CollectionKind::Bag,
            vec![item(1, true), item(2, false), item(3, true)],
        );
        assert!(!collection.remove(&item(7, true)).unwrap());

        collection.clear().unwrap();
        assert!(collection.is_empty().unwrap());
        assert_eq!(collection.original(), &[item(2, false)]);
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let mut collection =
            SecureCollection::new(context(true), CollectionKind::Set, vec![item(1, true)]);
        assert!(!collection.add(item(1, true)).unwrap());
        assert!(collection.add(item(2, true)).unwrap());
        assert_eq!(collection.original().len(), 2);
    }

    #[test]
    fn test_mutation_requires_owner_update() {
        let owner =
            EntityRef::new(EntityData::new("Order", 1).with_property("items", vec![item(1, true)]));
        let mut collection =
            SecureCollection::for_property(context(false), CollectionKind::List, &owner, "items");

        let err = collection.add(item(2, true)).unwrap_err();
        assert!(err.is_access_denied());
        assert!(collection.clear().unwrap_err().is_access_denied());
        assert_eq!(collection.original().len(), 1);
        assert_eq!(collection.get(0).unwrap(), Some(item(1, true)));
    }

    #[test]
    fn test_list_positions_skip_hidden_elements() {
        let mut list = SecureCollection::new(
            context(true),
            CollectionKind::List,
            vec![item(1, true), item(2, false), item(3, true)],
        );

        assert_eq!(list.get(1).unwrap(), Some(item(3, true)));
        list.insert(1, item(4, true)).unwrap();
        assert_eq!(
            list.original(),
            &[item(1, true), item(2, false), item(4, true), item(3, true)]
        );

        let removed = list.remove_at(0).unwrap();
        assert_eq!(removed, item(1, true));
        let previous = list.set(1, item(5, true)).unwrap();
        assert_eq!(previous, item(3, true));
        assert_eq!(list.original(), &[item(2, false), item(4, true), item(5, true)]);

        assert!(matches!(
            list.remove_at(5),
            Err(SecurityError::IndexOutOfBounds { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_positional_access_needs_list() {
        let mut bag =
            SecureCollection::new(context(true), CollectionKind::Bag, vec![item(1, true)]);
        assert!(matches!(bag.get(0), Err(SecurityError::Unsupported(_))));
    }
}
