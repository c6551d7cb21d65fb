//! Access definitions: the predicate that restricts a query to the instances
//! the current user may access.

use std::collections::{BTreeMap, BTreeSet};

use rowguard_lang::{and_all, or_all, visit, AccessType, Expr, InItems, Path};
use tracing::debug;

use crate::context::SecurityContext;
use crate::mapping::MappingInformation;
use crate::object::Value;
use crate::query::{SelectedType, TypeDefinition};
use crate::rules::AccessRule;

/// A predicate together with the named parameters it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDefinition {
    predicate: Expr,
    parameters: BTreeMap<String, Value>,
}

impl AccessDefinition {
    pub fn new(predicate: Expr) -> Self {
        Self {
            predicate,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn into_parts(self) -> (Expr, BTreeMap<String, Value>) {
        (self.predicate, self.parameters)
    }

    /// Disjunction with another definition. Parameters are merged.
    pub fn or(mut self, other: AccessDefinition) -> Self {
        self.parameters.extend(other.parameters);
        self.predicate = Expr::or(self.predicate, other.predicate);
        self
    }

    /// Conjunction with another definition. Parameters are merged.
    pub fn and(mut self, other: AccessDefinition) -> Self {
        self.parameters.extend(other.parameters);
        self.predicate = Expr::and(self.predicate, other.predicate);
        self
    }
}

/// Builds access definitions for the selected types of a statement.
pub struct AccessDefinitionBuilder<'a> {
    mapping: &'a MappingInformation,
    rules: &'a [AccessRule],
    context: &'a dyn SecurityContext,
}

impl<'a> AccessDefinitionBuilder<'a> {
    pub fn new(
        mapping: &'a MappingInformation,
        rules: &'a [AccessRule],
        context: &'a dyn SecurityContext,
    ) -> Self {
        Self {
            mapping,
            rules,
            context,
        }
    }

    /// Build the access definition for `selected_types`.
    ///
    /// `used_aliases` holds every alias of the target statement; aliases
    /// introduced by renamed rule subselects are added to it. Returns `None`
    /// when no rule restricts any of the selected types.
    pub fn build(
        &self,
        selected_types: &[SelectedType],
        type_definitions: &[TypeDefinition],
        access: AccessType,
        used_aliases: &mut BTreeSet<String>,
    ) -> Option<AccessDefinition> {
        let mut parameters = BTreeMap::new();
        let mut predicates = Vec::new();

        for selected in selected_types {
            let Some(predicate) =
                self.type_predicate(selected, access, used_aliases, &mut parameters)
            else {
                continue;
            };
            let path = &selected.selected.path;
            let outer = type_definitions
                .iter()
                .rev()
                .find(|definition| definition.alias == path.root)
                .is_some_and(|definition| definition.outer);
            let predicate = if outer {
                Expr::or(
                    Expr::is_null(Expr::path(path.clone())),
                    Expr::brackets(predicate),
                )
            } else {
                predicate
            };
            let predicate = match &selected.selected.condition {
                Some(condition) => Expr::or(
                    Expr::not(Expr::brackets(condition.clone())),
                    Expr::brackets(predicate),
                ),
                None => predicate,
            };
            predicates.push(Expr::brackets(predicate));
        }

        let predicate = Expr::brackets(and_all(predicates)?);
        debug!(
            access = %access,
            predicate = %predicate,
            parameter_count = parameters.len(),
            "Built access definition"
        );
        Some(AccessDefinition {
            predicate,
            parameters,
        })
    }

    /// Whether any rule, of any access type, guards instances of `type_name`.
    pub fn is_restricted(&self, type_name: &str) -> bool {
        self.rules.iter().any(|rule| {
            rule.is_assignable(type_name, self.mapping)
                || rule.may_be_assignable(type_name, self.mapping)
        })
    }

    fn has_rules(&self, type_name: &str) -> bool {
        self.rules.iter().any(|rule| rule.entity() == type_name)
    }

    /// Rules declared on exactly `type_name` granting `access`, without
    /// duplicates.
    fn granting_rules(&self, type_name: &str, access: AccessType) -> Vec<&'a AccessRule> {
        let mut rules: Vec<&AccessRule> = Vec::new();
        for rule in self.rules {
            if rule.entity() == type_name && rule.grants_access(access) && !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        rules
    }

    /// Strict subclasses of `type_name` that carry rules and are not below
    /// another such subclass.
    fn restricted_subtypes(&self, type_name: &str) -> Vec<&'a str> {
        let ruled: Vec<&str> = self
            .mapping
            .subclasses(type_name)
            .into_iter()
            .filter(|subtype| self.has_rules(subtype))
            .collect();
        ruled
            .iter()
            .copied()
            .filter(|subtype| {
                !ruled
                    .iter()
                    .any(|other| self.mapping.is_strict_subclass(subtype, other))
            })
            .collect()
    }

    /// The predicate restricting one selected type, `None` if unrestricted.
    ///
    /// Instances are governed by the rules of the most derived class in their
    /// hierarchy that has rules. Grants of a class are therefore guarded with
    /// `NOT INSTANCE OF` for each subclass carrying its own rules, and each
    /// such subclass contributes its own guarded candidate.
    fn type_predicate(
        &self,
        selected: &SelectedType,
        access: AccessType,
        used_aliases: &mut BTreeSet<String>,
        parameters: &mut BTreeMap<String, Value>,
    ) -> Option<Expr> {
        let type_name = selected.type_name.as_str();
        if !self.is_restricted(type_name) {
            return None;
        }
        let path = &selected.selected.path;
        let mut parts = Vec::new();

        let governing = self
            .mapping
            .ancestors_or_self(type_name)
            .into_iter()
            .find(|ancestor| self.has_rules(ancestor));
        let base = match governing {
            Some(governing) => {
                self.granted(governing, access, path, used_aliases, parameters)
            }
            None => Some(Expr::always_true()),
        };
        let excluded = self.restricted_subtypes(type_name);
        if let Some(base) = base {
            parts.push(self.exclude(base, path, &excluded));
        }

        for subtype in self.mapping.subclasses(type_name) {
            if !self.has_rules(subtype) {
                continue;
            }
            let Some(granted) = self.granted(subtype, access, path, used_aliases, parameters)
            else {
                continue;
            };
            let Some(guard) = self.instance_guard(subtype, path) else {
                continue;
            };
            let candidate = Expr::and(guard, Expr::brackets(granted));
            parts.push(self.exclude(candidate, path, &self.restricted_subtypes(subtype)));
        }

        Some(or_all(parts.into_iter().map(Expr::brackets)).unwrap_or_else(|| Expr::boolean(false)))
    }

    /// OR of the prepared rules declared on `type_name` granting `access`.
    fn granted(
        &self,
        type_name: &str,
        access: AccessType,
        path: &Path,
        used_aliases: &mut BTreeSet<String>,
        parameters: &mut BTreeMap<String, Value>,
    ) -> Option<Expr> {
        let prepared = self
            .granting_rules(type_name, access)
            .into_iter()
            .map(|rule| self.prepare(rule, path, used_aliases, parameters))
            .map(|predicate| match predicate {
                Expr::Or(..) => Expr::brackets(predicate),
                other => other,
            })
            .collect::<Vec<_>>();
        or_all(prepared)
    }

    fn exclude(&self, expr: Expr, path: &Path, subtypes: &[&str]) -> Expr {
        subtypes.iter().fold(expr, |expr, subtype| {
            Expr::and(
                expr,
                Expr::not(Expr::brackets(Expr::instance_of(path.clone(), *subtype))),
            )
        })
    }

    /// `path INSTANCE OF T`, or a disjunction over the concrete subtypes of
    /// an abstract `T`. `None` when `T` has no concrete subtype.
    fn instance_guard(&self, type_name: &str, path: &Path) -> Option<Expr> {
        let is_abstract = self
            .mapping
            .class_mapping(type_name)
            .map(|class| class.is_abstract)
            .unwrap_or(false);
        if !is_abstract {
            return Some(Expr::instance_of(path.clone(), type_name));
        }
        let guards = self
            .mapping
            .concrete_subtypes(type_name)
            .into_iter()
            .map(|subtype| Expr::instance_of(path.clone(), subtype));
        or_all(guards).map(Expr::brackets)
    }

    /// Attach a rule to `path`: rename colliding subselect aliases, replace
    /// security-context aliases with parameters and substitute the rule alias.
    fn prepare(
        &self,
        rule: &AccessRule,
        path: &Path,
        used_aliases: &mut BTreeSet<String>,
        parameters: &mut BTreeMap<String, Value>,
    ) -> Expr {
        let mut predicate = rule.predicate();

        for alias in rule.declared_aliases() {
            if !used_aliases.contains(&alias) {
                continue;
            }
            let mut suffix = 0;
            let renamed = loop {
                let candidate = format!("{}{}", alias, suffix);
                if !used_aliases.contains(&candidate) && !rule.aliases().contains(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };
            visit::rename_variable(&mut predicate, &alias, &renamed);
            used_aliases.insert(renamed);
        }

        let context_aliases: Vec<String> = self
            .context
            .aliases()
            .into_iter()
            .filter(|alias| alias != rule.alias() && rule.aliases().contains(alias))
            .collect();

        for alias in &context_aliases {
            if !rule.in_nodes(alias).is_empty() {
                self.expand_in_nodes(&mut predicate, alias, parameters);
            }
        }
        for alias in &context_aliases {
            if rule.identification_variables(alias).is_empty() {
                continue;
            }
            let value = self.context.alias_value(alias).unwrap_or(Value::Null);
            let mut referenced = false;
            visit::rewrite(&mut predicate, &mut |expr| match expr {
                Expr::Path(variable) if variable.is_variable() && variable.root == *alias => {
                    referenced = true;
                    Some(Expr::named_parameter(alias.as_str()))
                }
                _ => None,
            });
            if referenced {
                parameters.insert(alias.clone(), value);
            }
        }

        visit::substitute_variable(&mut predicate, rule.alias(), path);
        predicate
    }

    /// Expand `x IN (ALIAS)` into `(x = :ALIAS0 OR x = :ALIAS1 ...)`, one
    /// parameter per context value.
    fn expand_in_nodes(
        &self,
        predicate: &mut Expr,
        alias: &str,
        parameters: &mut BTreeMap<String, Value>,
    ) {
        let values = self.context.alias_values(alias);
        let names: Vec<String> = (0..values.len()).map(|i| format!("{}{}", alias, i)).collect();
        let mut expanded = false;

        visit::rewrite(predicate, &mut |expr| {
            let Expr::In {
                expr: operand,
                items: InItems::List(items),
                negated,
            } = expr
            else {
                return None;
            };
            let is_context_item = |item: &Expr| match item {
                Expr::Path(path) => path.is_variable() && path.root == alias,
                Expr::NamedParameter(name) => name == alias,
                _ => false,
            };
            if !items.iter().any(|item| is_context_item(item)) {
                return None;
            }
            expanded = true;

            let mut alternatives = Vec::new();
            for item in items {
                if is_context_item(item) {
                    alternatives.extend(names.iter().map(|name| {
                        Expr::equals((**operand).clone(), Expr::named_parameter(name.as_str()))
                    }));
                } else {
                    alternatives.push(Expr::equals((**operand).clone(), item.clone()));
                }
            }
            let expansion = Expr::brackets(or_all(alternatives).unwrap_or_else(Expr::never));
            Some(if *negated {
                Expr::not(expansion)
            } else {
                expansion
            })
        });

        if expanded {
            parameters.extend(names.into_iter().zip(values));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DefaultSecurityContext, CURRENT_PRINCIPAL, CURRENT_ROLES};
    use crate::mapping::{ClassMapping, PropertyMapping};
    use crate::query::SelectedPath;

    fn mapping() -> MappingInformation {
        MappingInformation::new()
            .with_class(
                ClassMapping::new("Parent")
                    .with_property(PropertyMapping::basic("name"))
                    .with_property(PropertyMapping::basic("owner"))
                    .with_property(PropertyMapping::basic("role")),
            )
            .with_class(ClassMapping::new("Child").with_superclass("Parent"))
            .with_class(
                ClassMapping::new("Document")
                    .with_abstract()
                    .with_property(PropertyMapping::basic("owner")),
            )
            .with_class(ClassMapping::new("Memo").with_superclass("Document"))
            .with_class(ClassMapping::new("Report").with_superclass("Document"))
            .with_class(
                ClassMapping::new("Archive")
                    .with_property(PropertyMapping::basic("owner"))
                    .with_property(PropertyMapping::basic("role")),
            )
    }

    fn rules(mapping: &MappingInformation, sources: &[&str]) -> Vec<AccessRule> {
        sources
            .iter()
            .map(|source| AccessRule::compile(source, mapping).unwrap())
            .collect()
    }

    fn selected(path: &str, type_name: &str) -> SelectedType {
        SelectedType {
            selected: SelectedPath::new(Path::parse(path)),
            type_name: type_name.to_string(),
        }
    }

    fn build(
        sources: &[&str],
        context: &DefaultSecurityContext,
        types: &[SelectedType],
        access: AccessType,
    ) -> Option<AccessDefinition> {
        let mapping = mapping();
        let rules = rules(&mapping, sources);
        let definitions: Vec<TypeDefinition> = types
            .iter()
            .map(|t| TypeDefinition::root(&t.selected.path.root, &t.type_name))
            .collect();
        let mut used: BTreeSet<String> =
            types.iter().map(|t| t.selected.path.root.clone()).collect();
        AccessDefinitionBuilder::new(&mapping, &rules, context).build(
            types,
            &definitions,
            access,
            &mut used,
        )
    }

    #[test]
    fn test_unrestricted_type_yields_none() {
        let context = DefaultSecurityContext::new();
        let definition = build(
            &["GRANT READ ACCESS TO Parent p WHERE p.name = 'x'"],
            &context,
            &[selected("a", "Archive")],
            AccessType::Read,
        );
        assert_eq!(definition, None);
    }

    #[test]
    fn test_owner_rule_is_substituted() {
        let context = DefaultSecurityContext::new().with_principal("alice");
        let definition = build(
            &["GRANT READ ACCESS TO Archive x WHERE x.owner = CURRENT_PRINCIPAL"],
            &context,
            &[selected("a", "Archive")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(
            definition.predicate().to_string(),
            "(a.owner = :CURRENT_PRINCIPAL)"
        );
        assert_eq!(
            definition.parameters().get(CURRENT_PRINCIPAL),
            Some(&Value::from("alice"))
        );
    }

    #[test]
    fn test_restricted_without_grant_is_false() {
        let context = DefaultSecurityContext::new();
        let definition = build(
            &["GRANT READ ACCESS TO Archive x"],
            &context,
            &[selected("a", "Archive")],
            AccessType::Delete,
        )
        .unwrap();
        assert_eq!(definition.predicate().to_string(), "(FALSE)");
    }

    #[test]
    fn test_subclass_rules_override_superclass_grants() {
        let context = DefaultSecurityContext::new();
        let definition = build(
            &[
                "GRANT READ ACCESS TO Parent p",
                "GRANT READ ACCESS TO Child c WHERE c.name = 'test'",
            ],
            &context,
            &[selected("p", "Parent")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(
            definition.predicate().to_string(),
            "((TRUE = TRUE AND NOT (p INSTANCE OF Child)) OR (p INSTANCE OF Child AND (p.name = 'test')))"
        );

        let definition = build(
            &[
                "GRANT READ ACCESS TO Parent p",
                "GRANT READ ACCESS TO Child c WHERE c.name = 'test'",
            ],
            &context,
            &[selected("c", "Child")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(definition.predicate().to_string(), "(c.name = 'test')");
    }

    #[test]
    fn test_abstract_subtype_guard_lists_concrete_types() {
        let context = DefaultSecurityContext::new().with_principal("alice");
        let mapping = mapping();
        let rules = rules(
            &mapping,
            &["GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL"],
        );
        let builder = AccessDefinitionBuilder::new(&mapping, &rules, &context);
        assert_eq!(
            builder
                .instance_guard("Document", &Path::new("x"))
                .unwrap()
                .to_string(),
            "(x INSTANCE OF Memo OR x INSTANCE OF Report)"
        );
        assert!(builder.is_restricted("Memo"));
        assert!(!builder.is_restricted("Archive"));
    }

    #[test]
    fn test_in_context_alias_is_expanded() {
        let context = DefaultSecurityContext::new().with_roles(["admin", "user"]);
        let definition = build(
            &["GRANT READ ACCESS TO Archive x WHERE x.role IN (CURRENT_ROLES)"],
            &context,
            &[selected("a", "Archive")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(
            definition.predicate().to_string(),
            "(a.role = :CURRENT_ROLES0 OR a.role = :CURRENT_ROLES1)"
        );
        assert_eq!(definition.parameters().len(), 2);
        assert_eq!(
            definition.parameters().get("CURRENT_ROLES1"),
            Some(&Value::from("user"))
        );

        let empty = DefaultSecurityContext::new().with_roles(Vec::<String>::new());
        let definition = build(
            &["GRANT READ ACCESS TO Archive x WHERE x.role NOT IN (CURRENT_ROLES)"],
            &empty,
            &[selected("a", "Archive")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(definition.predicate().to_string(), "(NOT (1 <> 1))");
        assert!(definition.parameters().get(CURRENT_ROLES).is_none());
    }

    #[test]
    fn test_colliding_subselect_alias_is_renamed() {
        let context = DefaultSecurityContext::new();
        let definition = build(
            &["GRANT READ ACCESS TO Archive x WHERE EXISTS (SELECT a FROM Archive a WHERE a.owner = x.owner)"],
            &context,
            &[selected("a", "Archive")],
            AccessType::Read,
        )
        .unwrap();
        assert_eq!(
            definition.predicate().to_string(),
            "(EXISTS (SELECT a0 FROM Archive a0 WHERE a0.owner = a.owner))"
        );
    }

    #[test]
    fn test_conditional_and_outer_paths() {
        let context = DefaultSecurityContext::new();
        let mapping = mapping();
        let rules = rules(&mapping, &["GRANT READ ACCESS TO Archive x WHERE x.owner = 'bob'"]);
        let conditional = SelectedType {
            selected: SelectedPath {
                path: Path::new("a"),
                condition: Some(rowguard_lang::parse_expression("a.owner IS NULL").unwrap()),
            },
            type_name: "Archive".to_string(),
        };
        let mut outer = TypeDefinition::root("a", "Archive");
        outer.outer = true;
        let mut used = BTreeSet::from(["a".to_string()]);
        let definition = AccessDefinitionBuilder::new(&mapping, &rules, &context)
            .build(&[conditional], &[outer], AccessType::Read, &mut used)
            .unwrap();
        assert_eq!(
            definition.predicate().to_string(),
            "(NOT (a.owner IS NULL) OR (a IS NULL OR (a.owner = 'bob')))"
        );
    }

    #[test]
    fn test_same_rule_twice_gives_equal_definitions() {
        let context = DefaultSecurityContext::new().with_principal("alice");
        let sources = ["GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL"];
        let first = build(&sources, &context, &[selected("p", "Parent")], AccessType::Read);
        let second = build(&sources, &context, &[selected("p", "Parent")], AccessType::Read);
        assert_eq!(first, second);
    }
}
