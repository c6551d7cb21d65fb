//! Configuration of a secured persistence unit.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::DefaultSecurityContext;
use crate::error::ConfigError;
use crate::filter::EntityFilter;
use crate::mapping::{ClassMapping, MappingInformation};
use crate::object::Value;
use crate::rules::StaticAccessRulesProvider;

/// Behaviour of the entity filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fold conditions decidable from the security context into literals.
    pub optimize_queries: bool,

    /// Whether `NULL` operands yield `NULL` (SQL semantics) or make a
    /// condition not evaluatable.
    pub propagate_undefined: bool,

    /// Maximum number of compiled statements kept. Zero disables caching.
    pub statement_cache_capacity: usize,

    /// Alias bound to the entity of a single-entity access check.
    pub default_alias: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            optimize_queries: true,
            propagate_undefined: true,
            statement_cache_capacity: 1024,
            default_alias: "entity".to_string(),
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable query optimization.
    pub fn with_optimize_queries(mut self, optimize: bool) -> Self {
        self.optimize_queries = optimize;
        self
    }

    /// Set whether undefined results propagate as `NULL`.
    pub fn with_propagate_undefined(mut self, propagate: bool) -> Self {
        self.propagate_undefined = propagate;
        self
    }

    /// Set the statement cache capacity.
    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Set the alias used for single-entity checks.
    pub fn with_default_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = alias.into();
        self
    }
}

/// A persistence unit: mapping, access rules, security context and filter
/// settings, as loaded from a JSON file.
///
/// ```json
/// {
///   "mapping": [
///     {"entity_name": "Parent", "properties": [{"name": "owner"}]}
///   ],
///   "rules": ["GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL"],
///   "context": {"CURRENT_PRINCIPAL": "alice", "CURRENT_ROLES": ["admin"]},
///   "filter": {"optimize_queries": true}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub mapping: Vec<ClassMapping>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl UnitConfig {
    /// Load a unit configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            classes = config.mapping.len(),
            rules = config.rules.len(),
            "Loaded unit configuration"
        );
        Ok(config)
    }

    /// Parse a unit configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build and validate the mapping metadata.
    pub fn mapping_information(&self) -> Result<MappingInformation, ConfigError> {
        Ok(MappingInformation::from_classes(self.mapping.iter().cloned())?)
    }

    /// The configured security context.
    pub fn security_context(&self) -> DefaultSecurityContext {
        DefaultSecurityContext::new().with_attributes(
            self.context
                .iter()
                .map(|(alias, value)| (alias.clone(), Value::from(value.clone()))),
        )
    }

    /// Compile the rules and assemble an entity filter.
    pub fn build_filter(&self) -> Result<EntityFilter, ConfigError> {
        let mapping = Arc::new(self.mapping_information()?);
        let rules = StaticAccessRulesProvider::compile(&self.rules, &mapping)?;
        Ok(EntityFilter::new(mapping, Arc::new(rules), Arc::new(self.security_context()))
            .with_config(self.filter.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use rowguard_lang::AccessType;
    use std::io::Write;

    const UNIT: &str = r#"{
        "mapping": [
            {
                "entity_name": "Parent",
                "properties": [
                    {"name": "owner"},
                    {"name": "children", "kind": {"type": "collection_valued", "target": "Child", "kind": "list"}}
                ]
            },
            {"entity_name": "Child", "superclass": "Parent"}
        ],
        "rules": ["GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL"],
        "context": {"CURRENT_PRINCIPAL": "alice", "CURRENT_ROLES": ["admin", "user"]},
        "filter": {"optimize_queries": false}
    }"#;

    #[test]
    fn test_filter_config_defaults() {
        let config: FilterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, FilterConfig::default());
        assert!(config.optimize_queries);
        assert_eq!(config.statement_cache_capacity, 1024);
        assert_eq!(config.default_alias, "entity");
    }

    #[test]
    fn test_load_unit_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(UNIT.as_bytes()).unwrap();

        let config = UnitConfig::from_path(file.path()).unwrap();
        assert_eq!(config.mapping.len(), 2);
        assert!(!config.filter.optimize_queries);
        assert!(config.filter.propagate_undefined);

        let filter = config.build_filter().unwrap();
        let result = filter
            .filter_query("SELECT p FROM Parent p", AccessType::Read)
            .unwrap();
        assert_eq!(
            result.query,
            "SELECT p FROM Parent p WHERE (p.owner = :CURRENT_PRINCIPAL)"
        );
        assert_eq!(
            config.security_context().alias_values("CURRENT_ROLES").len(),
            2
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = UnitConfig::from_path(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_rule_is_reported() {
        let config = UnitConfig {
            rules: vec!["GRANT READ ACCESS TO Ghost g".to_string()],
            ..UnitConfig::default()
        };
        assert!(matches!(config.build_filter(), Err(ConfigError::Rule(_))));
    }
}
