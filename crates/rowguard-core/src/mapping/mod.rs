//! Object-relational mapping metadata.
//!
//! The mapping describes entity classes, their inheritance hierarchy and
//! their properties. It is used to resolve path types and to enumerate the
//! concrete subtypes an `INSTANCE OF` guard has to cover.

mod accessor;
mod class;

pub use accessor::{FieldAccessor, IdAccessor, PropertyAccessor};
pub use class::{ClassMapping, CollectionKind, PropertyKind, PropertyMapping};

use std::collections::BTreeMap;

use crate::error::MappingError;

/// Mapping information for all entity classes of a persistence unit.
#[derive(Debug, Clone, Default)]
pub struct MappingInformation {
    classes: BTreeMap<String, ClassMapping>,
}

impl MappingInformation {
    /// Create empty mapping information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build mapping information from class mappings and validate the
    /// hierarchy.
    pub fn from_classes(
        classes: impl IntoIterator<Item = ClassMapping>,
    ) -> Result<Self, MappingError> {
        let mut mapping = Self::new();
        for class in classes {
            if mapping.classes.contains_key(&class.entity_name) {
                return Err(MappingError::InvalidHierarchy(format!(
                    "class {} is mapped twice",
                    class.entity_name
                )));
            }
            mapping.classes.insert(class.entity_name.clone(), class);
        }
        mapping.validate()?;
        Ok(mapping)
    }

    /// Add a class mapping, replacing an existing mapping of the same name.
    pub fn with_class(mut self, class: ClassMapping) -> Self {
        self.classes.insert(class.entity_name.clone(), class);
        self
    }

    /// Check that every superclass is mapped and the hierarchy is acyclic.
    pub fn validate(&self) -> Result<(), MappingError> {
        for class in self.classes.values() {
            let mut seen = vec![class.entity_name.as_str()];
            let mut current = class;
            while let Some(superclass) = &current.superclass {
                let Some(next) = self.classes.get(superclass) else {
                    return Err(MappingError::InvalidHierarchy(format!(
                        "superclass {} of {} is not mapped",
                        superclass, current.entity_name
                    )));
                };
                if seen.contains(&next.entity_name.as_str()) {
                    return Err(MappingError::InvalidHierarchy(format!(
                        "cyclic inheritance involving {}",
                        class.entity_name
                    )));
                }
                seen.push(&next.entity_name);
                current = next;
            }
            for property in &class.properties {
                if let Some(target) = property.kind.target() {
                    if !self.classes.contains_key(target) && is_entity_name(target) {
                        return Err(MappingError::UnmappedClass(target.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Get a class mapping by entity name.
    pub fn class_mapping(&self, name: &str) -> Result<&ClassMapping, MappingError> {
        self.classes
            .get(name)
            .ok_or_else(|| MappingError::UnmappedClass(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Names of all mapped entity classes, in name order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// The class and its superclasses, most derived first.
    pub fn ancestors_or_self<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(class_name) = current {
            if chain.contains(&class_name) {
                break;
            }
            chain.push(class_name);
            current = self
                .classes
                .get(class_name)
                .and_then(|class| class.superclass.as_deref());
        }
        chain
    }

    /// Whether `sub` is `sup` or one of its subclasses.
    pub fn is_subclass_or_self(&self, sub: &str, sup: &str) -> bool {
        self.ancestors_or_self(sub).contains(&sup)
    }

    /// Whether `sub` is a strict subclass of `sup`.
    pub fn is_strict_subclass(&self, sub: &str, sup: &str) -> bool {
        sub != sup && self.is_subclass_or_self(sub, sup)
    }

    /// The topmost mapped superclass of `name`.
    pub fn root_type<'a>(&'a self, name: &'a str) -> &'a str {
        self.ancestors_or_self(name).last().copied().unwrap_or(name)
    }

    /// All strict subclasses of `name`, in name order.
    pub fn subclasses(&self, name: &str) -> Vec<&str> {
        self.classes
            .keys()
            .map(String::as_str)
            .filter(|candidate| self.is_strict_subclass(candidate, name))
            .collect()
    }

    /// The non-abstract classes among `name` and its subclasses.
    pub fn concrete_subtypes(&self, name: &str) -> Vec<&str> {
        self.classes
            .values()
            .filter(|class| !class.is_abstract)
            .map(|class| class.entity_name.as_str())
            .filter(|candidate| self.is_subclass_or_self(candidate, name))
            .collect()
    }

    /// Look up a property on the class or one of its superclasses.
    pub fn property(&self, class: &str, property: &str) -> Result<&PropertyMapping, MappingError> {
        self.class_mapping(class)?;
        self.ancestors_or_self(class)
            .into_iter()
            .filter_map(|name| self.classes.get(name))
            .find_map(|mapping| mapping.declared_property(property))
            .ok_or_else(|| MappingError::UnknownProperty {
                class: class.to_string(),
                property: property.to_string(),
            })
    }

    /// Whether `property` is an identifier property of the class hierarchy.
    pub fn is_id_property(&self, class: &str, property: &str) -> bool {
        self.ancestors_or_self(class)
            .into_iter()
            .filter_map(|name| self.classes.get(name))
            .any(|mapping| mapping.is_id_property(property))
    }
}

// Element collections target value types, which are never mapped.
fn is_entity_name(name: &str) -> bool {
    const VALUE_TYPES: [&str; 8] = [
        "String", "Integer", "Long", "Boolean", "Double", "Float", "Short", "Byte",
    ];
    !VALUE_TYPES.contains(&name)
}
