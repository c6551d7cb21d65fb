//! Class and property mapping definitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::accessor::{FieldAccessor, PropertyAccessor};

/// Collection semantics of a collection-valued property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Ordered, duplicates allowed.
    List,
    /// Unordered, no duplicates.
    Set,
    /// Unordered, duplicates allowed.
    #[default]
    Bag,
}

/// What a property holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    /// A scalar value.
    #[default]
    Basic,
    /// A reference to one entity.
    SingleValued { target: String },
    /// A collection of entities or values.
    CollectionValued {
        target: String,
        #[serde(default)]
        kind: CollectionKind,
    },
    /// A map whose values are entities or values.
    MapValued { target: String },
}

impl PropertyKind {
    /// The target type of a relationship property.
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyKind::Basic => None,
            PropertyKind::SingleValued { target }
            | PropertyKind::CollectionValued { target, .. }
            | PropertyKind::MapValued { target } => Some(target),
        }
    }

    pub fn is_relationship(&self) -> bool {
        !matches!(self, PropertyKind::Basic)
    }
}

/// Mapping of one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PropertyMappingDef", into = "PropertyMappingDef")]
pub struct PropertyMapping {
    pub name: String,
    pub kind: PropertyKind,
    /// Resolved once, when the mapping is created.
    pub accessor: Arc<dyn PropertyAccessor>,
}

/// Serialized form of a property mapping.
#[derive(Serialize, Deserialize)]
struct PropertyMappingDef {
    name: String,
    #[serde(default)]
    kind: PropertyKind,
}

impl From<PropertyMappingDef> for PropertyMapping {
    fn from(def: PropertyMappingDef) -> Self {
        PropertyMapping::new(def.name, def.kind)
    }
}

impl From<PropertyMapping> for PropertyMappingDef {
    fn from(mapping: PropertyMapping) -> Self {
        PropertyMappingDef {
            name: mapping.name,
            kind: mapping.kind,
        }
    }
}

impl PropertyMapping {
    /// Create a basic property.
    pub fn basic(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Basic)
    }

    /// Create a single-valued relationship.
    pub fn single(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::SingleValued {
                target: target.into(),
            },
        )
    }

    /// Create a collection-valued relationship.
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        kind: CollectionKind,
    ) -> Self {
        Self::new(
            name,
            PropertyKind::CollectionValued {
                target: target.into(),
                kind,
            },
        )
    }

    /// Create a map-valued relationship.
    pub fn map(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::MapValued {
                target: target.into(),
            },
        )
    }

    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            accessor: Arc::new(FieldAccessor::new(name.clone())),
            name,
            kind,
        }
    }

    /// Use a custom accessor.
    pub fn with_accessor(mut self, accessor: Arc<dyn PropertyAccessor>) -> Self {
        self.accessor = accessor;
        self
    }
}

fn default_id_properties() -> Vec<String> {
    vec!["id".to_string()]
}

/// Mapping of one entity class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMapping {
    pub entity_name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default = "default_id_properties")]
    pub id_properties: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
}

impl ClassMapping {
    /// Create a new class mapping with an `id` identifier property.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            superclass: None,
            is_abstract: false,
            id_properties: default_id_properties(),
            properties: Vec::new(),
        }
    }

    /// Set the mapped superclass.
    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    /// Mark the class abstract.
    pub fn with_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Set the identifier properties.
    pub fn with_id_properties(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.id_properties = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Add a property mapping.
    pub fn with_property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    /// Get a property declared directly on this class.
    pub fn declared_property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_id_property(&self, name: &str) -> bool {
        self.id_properties.iter().any(|id| id == name)
    }
}
