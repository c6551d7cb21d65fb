//! Identity map between managed entities and their secure views.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rowguard_lang::AccessType;
use tracing::{debug, trace};

use super::{
    readable, secure_value, unsecure_value, AccessManager, SecureCollection, SecureEntityContext,
    SecureMap,
};
use crate::error::{SecurityError, SecurityResult};
use crate::mapping::PropertyKind;
use crate::object::{EntityData, EntityRef, Value};

#[derive(Debug, Clone)]
struct ManagedEntity {
    unsecure: EntityRef,
    secure: EntityRef,
    /// Secure properties as last handed out or flushed.
    snapshot: BTreeMap<String, Value>,
    removed: bool,
}

#[derive(Debug, Default)]
struct IdentityMap {
    /// Keyed by the address of the unsecure entity.
    entities: HashMap<usize, ManagedEntity>,
    /// Secure address to unsecure address.
    secure_index: HashMap<usize, usize>,
}

/// Resets the flush flag when a flush ends, including on error.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Hands out secure views of entities and writes their changes back.
///
/// Secure views are separate entity handles. Relationship values of a view
/// only reference readable entities: an unreadable single-valued target is
/// `NULL`, collections and maps omit unreadable elements. Each entity gets
/// at most one secure view, so cyclic graphs map onto cyclic views.
pub struct SecureObjectManager {
    access: Arc<AccessManager>,
    identity: Mutex<IdentityMap>,
    flushing: AtomicBool,
}

impl SecureObjectManager {
    pub fn new(access: Arc<AccessManager>) -> Self {
        Self {
            access,
            identity: Mutex::new(IdentityMap::default()),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn access_manager(&self) -> &Arc<AccessManager> {
        &self.access
    }

    /// Number of entities with a secure view.
    pub fn len(&self) -> usize {
        self.identity.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `entity`, secure or unsecure, has a secure view.
    pub fn is_managed(&self, entity: &EntityRef) -> bool {
        let identity = self.identity.lock();
        identity.entities.contains_key(&entity.addr())
            || identity.secure_index.contains_key(&entity.addr())
    }

    pub fn is_removed(&self, entity: &EntityRef) -> bool {
        let unsecure = self.unsecure_entity(entity);
        self.identity
            .lock()
            .entities
            .get(&unsecure.addr())
            .is_some_and(|managed| managed.removed)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Forget all secure views.
    pub fn clear(&self) {
        let mut identity = self.identity.lock();
        identity.entities.clear();
        identity.secure_index.clear();
    }

    /// Register a new entity after a CREATE check and return its secure view.
    pub fn persist(&self, entity: &EntityRef) -> SecurityResult<EntityRef> {
        self.access.check_access(entity, AccessType::Create)?;
        self.secure_entity(entity)?.ok_or_else(|| {
            SecurityError::access_denied(
                AccessType::Read,
                entity.to_string(),
                "created entity is not readable",
            )
        })
    }

    /// Mark an entity removed after a DELETE check.
    pub fn remove(&self, entity: &EntityRef) -> SecurityResult<()> {
        let unsecure = self.unsecure_entity(entity);
        self.access.check_access(&unsecure, AccessType::Delete)?;
        if let Some(managed) = self.identity.lock().entities.get_mut(&unsecure.addr()) {
            managed.removed = true;
        }
        Ok(())
    }

    /// Write changed basic and single-valued properties of secure views back
    /// to their entities. Every changed entity is checked for UPDATE access
    /// before any of them is written. Collection and map properties are written back by
    /// [`SecureCollection`] and [`SecureMap`]. A flush started while another
    /// flush runs returns immediately.
    pub fn flush(&self) -> SecurityResult<()> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            trace!("Flush already in progress");
            return Ok(());
        }
        let _guard = FlushGuard(&self.flushing);

        let managed: Vec<ManagedEntity> = self
            .identity
            .lock()
            .entities
            .values()
            .filter(|managed| !managed.removed)
            .cloned()
            .collect();

        let mut pending = Vec::new();
        for entity in managed {
            let current = entity.secure.read().properties.clone();
            let changed: Vec<String> = current
                .iter()
                .filter(|(name, value)| entity.snapshot.get(*name) != Some(*value))
                .map(|(name, _)| name.clone())
                .collect();
            if !changed.is_empty() {
                pending.push((entity, current, changed));
            }
        }

        // Nothing is written unless every changed entity may be updated.
        for (entity, _, _) in &pending {
            self.access.check_access(&entity.unsecure, AccessType::Update)?;
        }

        let flushed = pending.len();
        for (entity, current, changed) in pending {
            for name in changed {
                let Some(value) = current.get(&name) else {
                    continue;
                };
                if matches!(value, Value::Collection(_) | Value::Map(_)) {
                    continue;
                }
                entity.unsecure.set_property(name, unsecure_value(self, value));
            }
            let key = entity.unsecure.addr();
            if let Some(managed) = self.identity.lock().entities.get_mut(&key) {
                managed.snapshot = current;
            }
        }

        debug!(entities = flushed, "Flushed secure entities");
        Ok(())
    }

    /// A secure view of the collection `owner.property`.
    pub fn secure_collection(
        self: &Arc<Self>,
        owner: &EntityRef,
        property: &str,
    ) -> SecurityResult<SecureCollection> {
        let owner = self.unsecure_entity(owner);
        let type_name = owner.type_name();
        match &self.property_kind(&type_name, property)? {
            PropertyKind::CollectionValued { kind, .. } => Ok(SecureCollection::for_property(
                Arc::clone(self) as Arc<dyn SecureEntityContext>,
                *kind,
                &owner,
                property,
            )),
            _ => Err(SecurityError::Unsupported(format!(
                "{}.{} is not collection-valued",
                type_name, property
            ))),
        }
    }

    /// A secure view of the map `owner.property`.
    pub fn secure_map(
        self: &Arc<Self>,
        owner: &EntityRef,
        property: &str,
    ) -> SecurityResult<SecureMap> {
        let owner = self.unsecure_entity(owner);
        let type_name = owner.type_name();
        match self.property_kind(&type_name, property)? {
            PropertyKind::MapValued { .. } => Ok(SecureMap::for_property(
                Arc::clone(self) as Arc<dyn SecureEntityContext>,
                &owner,
                property,
            )),
            _ => Err(SecurityError::Unsupported(format!(
                "{}.{} is not map-valued",
                type_name, property
            ))),
        }
    }

    fn property_kind(&self, type_name: &str, property: &str) -> SecurityResult<PropertyKind> {
        let mapping = self.access.filter().mapping();
        Ok(mapping.property(type_name, property)?.kind.clone())
    }

    fn lookup_secure(&self, unsecure: &EntityRef) -> Option<EntityRef> {
        self.identity
            .lock()
            .entities
            .get(&unsecure.addr())
            .map(|managed| managed.secure.clone())
    }

    fn secure_properties(&self, data: &EntityData) -> SecurityResult<BTreeMap<String, Value>> {
        let mut properties = BTreeMap::new();
        for (name, value) in &data.properties {
            let secured = match value {
                Value::Entity(_) => secure_value(self, value)?.unwrap_or(Value::Null),
                Value::Collection(items) => {
                    let mut visible = Vec::with_capacity(items.len());
                    for item in items {
                        if let Some(item) = secure_value(self, item)? {
                            visible.push(item);
                        }
                    }
                    Value::Collection(visible)
                }
                Value::Map(entries) => {
                    let mut visible = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        if let (Some(key), Some(value)) =
                            (secure_value(self, key)?, secure_value(self, value)?)
                        {
                            visible.push((key, value));
                        }
                    }
                    Value::Map(visible)
                }
                other => other.clone(),
            };
            properties.insert(name.clone(), secured);
        }
        Ok(properties)
    }

    fn forget(&self, unsecure: &EntityRef) {
        let mut identity = self.identity.lock();
        if let Some(managed) = identity.entities.remove(&unsecure.addr()) {
            identity.secure_index.remove(&managed.secure.addr());
        }
    }
}

impl SecureEntityContext for SecureObjectManager {
    fn is_accessible(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<bool> {
        self.access.is_accessible(&self.unsecure_entity(entity), access)
    }

    fn check_access(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<()> {
        self.access.check_access(&self.unsecure_entity(entity), access)
    }

    fn secure_entity(&self, entity: &EntityRef) -> SecurityResult<Option<EntityRef>> {
        let unsecure = self.unsecure_entity(entity);
        if let Some(secure) = self.lookup_secure(&unsecure) {
            return Ok(Some(secure));
        }
        if !readable(self.access.is_accessible(&unsecure, AccessType::Read))? {
            trace!(entity = %unsecure, "Entity hidden from secure view");
            return Ok(None);
        }

        let data = unsecure.read().clone();
        let secure = EntityRef::new(EntityData::new(data.type_name.clone(), data.id.clone()));
        {
            // Registered before its properties are secured so that cycles
            // resolve to this view.
            let mut identity = self.identity.lock();
            if let Some(existing) = identity.entities.get(&unsecure.addr()) {
                return Ok(Some(existing.secure.clone()));
            }
            identity.secure_index.insert(secure.addr(), unsecure.addr());
            identity.entities.insert(
                unsecure.addr(),
                ManagedEntity {
                    unsecure: unsecure.clone(),
                    secure: secure.clone(),
                    snapshot: BTreeMap::new(),
                    removed: false,
                },
            );
        }

        let properties = match self.secure_properties(&data) {
            Ok(properties) => properties,
            Err(err) => {
                self.forget(&unsecure);
                return Err(err);
            }
        };
        secure.write().properties = properties.clone();
        if let Some(managed) = self.identity.lock().entities.get_mut(&unsecure.addr()) {
            managed.snapshot = properties;
        }
        Ok(Some(secure))
    }

    fn unsecure_entity(&self, entity: &EntityRef) -> EntityRef {
        let identity = self.identity.lock();
        identity
            .secure_index
            .get(&entity.addr())
            .and_then(|addr| identity.entities.get(addr))
            .map(|managed| managed.unsecure.clone())
            .unwrap_or_else(|| entity.clone())
    }
}

impl fmt::Debug for SecureObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureObjectManager")
            .field("access", &self.access)
            .field("managed", &self.len())
            .field("flushing", &self.is_flushing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultSecurityContext;
    use crate::filter::EntityFilter;
    use crate::mapping::{ClassMapping, CollectionKind, MappingInformation, PropertyMapping};
    use crate::rules::StaticAccessRulesProvider;
    use crate::secure::SecureObject;

    fn manager(rules: &[&str], principal: &str) -> Arc<SecureObjectManager> {
        let mapping = Arc::new(
            MappingInformation::new()
                .with_class(
                    ClassMapping::new("Parent")
                        .with_property(PropertyMapping::basic("name"))
                        .with_property(PropertyMapping::basic("owner"))
                        .with_property(PropertyMapping::collection(
                            "children",
                            "Child",
                            CollectionKind::List,
                        ))
                        .with_property(PropertyMapping::map("labels", "Parent")),
                )
                .with_class(
                    ClassMapping::new("Child")
                        .with_superclass("Parent")
                        .with_property(PropertyMapping::single("parent", "Parent")),
                ),
        );
        let rules = StaticAccessRulesProvider::compile(rules.iter().copied(), &mapping).unwrap();
        let filter = EntityFilter::new(
            mapping,
            Arc::new(rules),
            Arc::new(DefaultSecurityContext::new().with_principal(principal)),
        );
        Arc::new(SecureObjectManager::new(Arc::new(AccessManager::new(Arc::new(filter)))))
    }

    const OWNER_RULE: &str =
        "GRANT ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL";

    fn parent(id: i64, owner: &str) -> EntityRef {
        EntityRef::new(
            EntityData::new("Parent", id)
                .with_property("name", format!("parent {}", id))
                .with_property("owner", owner),
        )
    }

    fn child(id: i64, owner: &str, of: &EntityRef) -> EntityRef {
        let child = EntityRef::new(
            EntityData::new("Child", id)
                .with_property("owner", owner)
                .with_property("parent", of.clone()),
        );
        let mut children = match of.property("children") {
            Some(Value::Collection(items)) => items,
            _ => Vec::new(),
        };
        children.push(Value::Entity(child.clone()));
        of.set_property("children", children);
        child
    }

    #[test]
    fn test_unreadable_entity_has_no_view() {
        let manager = manager(&[OWNER_RULE], "alice");
        assert!(manager.secure_entity(&parent(1, "bob")).unwrap().is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_secure_view_filters_relationships() {
        let manager = manager(&[OWNER_RULE], "alice");
        let own = parent(1, "alice");
        let foreign = parent(2, "bob");
        let visible = child(10, "alice", &own);
        child(11, "bob", &own);
        let orphan = child(12, "alice", &foreign);

        let secure = manager.secure_entity(&own).unwrap().unwrap();
        assert!(!secure.ptr_eq(&own));
        assert_eq!(secure.property("name"), Some(Value::from("parent 1")));

        let Some(Value::Collection(children)) = secure.property("children") else {
            panic!("expected children");
        };
        assert_eq!(children.len(), 1);
        let secure_child = children[0].as_entity().unwrap().clone();
        assert!(manager.unsecure_entity(&secure_child).ptr_eq(&visible));

        // Cycles resolve to the same view.
        let back = secure_child.property("parent").unwrap();
        assert!(back.as_entity().unwrap().ptr_eq(&secure));

        // An unreadable single-valued target reads as NULL.
        let secure_orphan = manager.secure_entity(&orphan).unwrap().unwrap();
        assert_eq!(secure_orphan.property("parent"), Some(Value::Null));
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn test_flush_writes_changed_properties() {
        let manager = manager(&[OWNER_RULE], "alice");
        let foreign = parent(2, "bob");
        let orphan = child(12, "alice", &foreign);

        let secure = manager.secure_entity(&orphan).unwrap().unwrap();
        secure.set_property("name", "renamed");
        manager.flush().unwrap();

        assert_eq!(orphan.property("name"), Some(Value::from("renamed")));
        // The hidden parent is not overwritten by its NULL view.
        assert!(orphan.property("parent").unwrap().as_entity().unwrap().ptr_eq(&foreign));
        assert!(!manager.is_flushing());
    }

    #[test]
    fn test_flush_requires_update() {
        let manager = manager(
            &[
                "GRANT READ ACCESS TO Parent p",
                "GRANT UPDATE ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL",
            ],
            "alice",
        );
        let own = parent(1, "alice");
        let foreign = parent(2, "bob");
        let secure_own = manager.secure_entity(&own).unwrap().unwrap();
        let secure_foreign = manager.secure_entity(&foreign).unwrap().unwrap();
        secure_own.set_property("name", "renamed");
        secure_foreign.set_property("name", "mine now");

        let err = manager.flush().unwrap_err();
        assert!(err.is_access_denied());
        // A denial leaves every entity untouched.
        assert_eq!(own.property("name"), Some(Value::from("parent 1")));
        assert_eq!(foreign.property("name"), Some(Value::from("parent 2")));
        assert!(!manager.is_flushing());

        secure_foreign.set_property("name", "parent 2");
        manager.flush().unwrap();
        assert_eq!(own.property("name"), Some(Value::from("renamed")));
    }

    #[test]
    fn test_remove_and_persist_checks() {
        let manager = manager(&[OWNER_RULE], "alice");
        let own = parent(1, "alice");
        let secure = manager.persist(&own).unwrap();
        manager.remove(&secure).unwrap();
        assert!(manager.is_removed(&own));

        let err = manager.persist(&parent(2, "bob")).unwrap_err();
        assert!(err.is_access_denied());
        let err = manager.remove(&parent(3, "bob")).unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_secure_collection_of_owner() {
        let manager = manager(&[OWNER_RULE], "alice");
        let own = parent(1, "alice");
        child(10, "alice", &own);
        child(11, "bob", &own);
        let secure = manager.secure_entity(&own).unwrap().unwrap();
        let before = own.property("children");

        let mut children = manager.secure_collection(&secure, "children").unwrap();
        assert_eq!(children.kind(), CollectionKind::List);
        assert_eq!(children.len().unwrap(), 1);

        let added = Value::Entity(EntityRef::new(
            EntityData::new("Child", 13).with_property("owner", "alice"),
        ));
        children.add(added.clone()).unwrap();
        children.remove(&added).unwrap();
        children.flush().unwrap();
        assert_eq!(own.property("children"), before);

        assert!(matches!(
            manager.secure_collection(&secure, "name"),
            Err(SecurityError::Unsupported(_))
        ));
        assert!(manager.secure_map(&secure, "labels").is_ok());
    }

    #[test]
    fn test_disabled_checks_expose_everything() {
        let manager = manager(&[OWNER_RULE], "alice");
        manager.access_manager().disable_checks();
        assert!(manager.secure_entity(&parent(2, "bob")).unwrap().is_some());
    }
}
