//! Security context that supplies the current principal, roles and tenant to
//! access rules.
//!
//! Rules reference context values through aliases such as
//! `CURRENT_PRINCIPAL`. When a rule is attached to a query those aliases are
//! replaced by named parameters carrying the values returned here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::object::Value;

/// Alias of the acting principal.
pub const CURRENT_PRINCIPAL: &str = "CURRENT_PRINCIPAL";
/// Alias of the roles of the acting principal.
pub const CURRENT_ROLES: &str = "CURRENT_ROLES";
/// Alias of the tenant of the acting principal.
pub const CURRENT_TENANT: &str = "CURRENT_TENANT";

/// Source of the values bound to context aliases.
pub trait SecurityContext: Send + Sync + fmt::Debug {
    /// All aliases this context provides values for.
    fn aliases(&self) -> Vec<String>;

    /// The value bound to `alias`, if any.
    fn alias_value(&self, alias: &str) -> Option<Value>;

    /// The values bound to `alias` as a collection. A single value yields a
    /// one-element collection; `NULL` and unbound aliases yield none.
    fn alias_values(&self, alias: &str) -> Vec<Value> {
        match self.alias_value(alias) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Collection(values)) => values,
            Some(value) => vec![value],
        }
    }
}

/// Aliases every [`DefaultSecurityContext`] provides, bound or not.
pub const STANDARD_ALIASES: [&str; 3] = [CURRENT_PRINCIPAL, CURRENT_ROLES, CURRENT_TENANT];

/// A context backed by a map of attributes. The standard aliases are always
/// reported so that rules referencing them are rewritten to parameters even
/// for an anonymous principal.
#[derive(Debug, Clone, Default)]
pub struct DefaultSecurityContext {
    attributes: BTreeMap<String, Value>,
}

impl DefaultSecurityContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, alias: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(alias.into(), value.into());
        self
    }

    /// Set the current principal.
    pub fn with_principal(self, principal: impl Into<Value>) -> Self {
        self.with_attribute(CURRENT_PRINCIPAL, principal)
    }

    /// Set the current roles.
    pub fn with_roles<I, V>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let roles: Vec<Value> = roles.into_iter().map(Into::into).collect();
        self.with_attribute(CURRENT_ROLES, roles)
    }

    /// Set the current tenant.
    pub fn with_tenant(self, tenant: impl Into<Value>) -> Self {
        self.with_attribute(CURRENT_TENANT, tenant)
    }

    /// Set multiple attributes.
    pub fn with_attributes(
        mut self,
        attributes: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

impl SecurityContext for DefaultSecurityContext {
    fn aliases(&self) -> Vec<String> {
        let mut aliases: BTreeSet<String> = self.attributes.keys().cloned().collect();
        aliases.extend(STANDARD_ALIASES.iter().map(|alias| alias.to_string()));
        aliases.into_iter().collect()
    }

    fn alias_value(&self, alias: &str) -> Option<Value> {
        self.attributes.get(alias).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_values() {
        let context = DefaultSecurityContext::new()
            .with_principal("alice")
            .with_roles(["admin", "user"])
            .with_attribute("CURRENT_LEVEL", Value::Null);

        assert_eq!(
            context.aliases(),
            vec!["CURRENT_LEVEL", "CURRENT_PRINCIPAL", "CURRENT_ROLES", "CURRENT_TENANT"]
        );
        assert_eq!(context.alias_value(CURRENT_PRINCIPAL), Some(Value::from("alice")));
        assert_eq!(context.alias_values(CURRENT_PRINCIPAL), vec![Value::from("alice")]);
        assert_eq!(
            context.alias_values(CURRENT_ROLES),
            vec![Value::from("admin"), Value::from("user")]
        );
        assert!(context.alias_values("CURRENT_LEVEL").is_empty());
        assert!(context.alias_values(CURRENT_TENANT).is_empty());
        assert_eq!(context.alias_value(CURRENT_TENANT), None);
    }

    #[test]
    fn test_anonymous_context_reports_standard_aliases() {
        let context = DefaultSecurityContext::new();
        assert_eq!(
            context.aliases(),
            vec![CURRENT_PRINCIPAL, CURRENT_ROLES, CURRENT_TENANT]
        );
        assert_eq!(context.alias_value(CURRENT_PRINCIPAL), None);
        assert!(context.alias_values(CURRENT_ROLES).is_empty());
    }
}
