//! Compiled access rules.
//!
//! An access rule grants a set of access types on instances of an entity
//! class that satisfy a condition:
//!
//! ```text
//! GRANT READ UPDATE ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL
//! ```
//!
//! Rules are compiled once at startup and shared read-only. Everything that
//! rewrites a rule works on a clone of its predicate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use rowguard_lang::{visit, AccessRuleStatement, AccessType, Expr, InItems, Path};
use tracing::info;

use crate::error::RuleError;
use crate::mapping::MappingInformation;

/// Alias occurrences of a rule, computed on first use.
#[derive(Debug, Clone, Default)]
struct RuleAnalysis {
    aliases: BTreeSet<String>,
    variables: BTreeMap<String, Vec<Path>>,
    in_nodes: BTreeMap<String, Vec<Expr>>,
}

impl RuleAnalysis {
    fn analyze(statement: &AccessRuleStatement) -> Self {
        let mut analysis = RuleAnalysis::default();
        analysis.aliases.insert(statement.alias.clone());

        let Some(condition) = &statement.where_clause else {
            return analysis;
        };

        analysis.aliases.extend(visit::declared_aliases(condition));
        visit::for_each_path(condition, &mut |path| {
            analysis.aliases.insert(path.root.clone());
            analysis
                .variables
                .entry(path.root.clone())
                .or_default()
                .push(path.clone());
        });
        visit::for_each_expr(condition, &mut |expr| {
            let Expr::In {
                items: InItems::List(items),
                ..
            } = expr
            else {
                return;
            };
            for item in items {
                let alias = match item {
                    Expr::Path(path) if path.is_variable() => &path.root,
                    Expr::NamedParameter(name) => name,
                    _ => continue,
                };
                analysis
                    .in_nodes
                    .entry(alias.clone())
                    .or_default()
                    .push(expr.clone());
            }
        });
        analysis
    }
}

/// A compiled access rule.
#[derive(Debug, Clone)]
pub struct AccessRule {
    statement: AccessRuleStatement,
    source: String,
    analysis: OnceLock<RuleAnalysis>,
}

impl AccessRule {
    /// Parse a rule and check that it guards a mapped class.
    pub fn compile(source: &str, mapping: &MappingInformation) -> Result<Self, RuleError> {
        let statement = rowguard_lang::parse_rule(source).map_err(|e| RuleError::Parse {
            rule: source.to_string(),
            source: e,
        })?;
        if !mapping.contains(&statement.entity) {
            return Err(RuleError::UnknownEntity {
                rule: source.to_string(),
                entity: statement.entity,
            });
        }
        Ok(Self {
            statement,
            source: source.to_string(),
            analysis: OnceLock::new(),
        })
    }

    /// Wrap an already parsed rule statement.
    pub fn from_statement(statement: AccessRuleStatement) -> Self {
        Self {
            source: statement.to_string(),
            statement,
            analysis: OnceLock::new(),
        }
    }

    pub fn statement(&self) -> &AccessRuleStatement {
        &self.statement
    }

    /// The rule text as declared.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The guarded entity class.
    pub fn entity(&self) -> &str {
        &self.statement.entity
    }

    /// The alias the rule binds the guarded entity to.
    pub fn alias(&self) -> &str {
        &self.statement.alias
    }

    /// The declared access types; empty means all.
    pub fn access(&self) -> &[AccessType] {
        &self.statement.access
    }

    /// The rule condition, if any.
    pub fn condition(&self) -> Option<&Expr> {
        self.statement.where_clause.as_ref()
    }

    /// A fresh copy of the condition; a rule without `WHERE` yields `TRUE = TRUE`.
    pub fn predicate(&self) -> Expr {
        self.condition().cloned().unwrap_or_else(Expr::always_true)
    }

    /// Whether the rule grants `access`.
    pub fn grants_access(&self, access: AccessType) -> bool {
        self.statement.access.is_empty() || self.statement.access.contains(&access)
    }

    /// Whether instances of `type_name` are always guarded by this rule,
    /// i.e. the rule's class is `type_name` or one of its superclasses.
    pub fn is_assignable(&self, type_name: &str, mapping: &MappingInformation) -> bool {
        mapping.is_subclass_or_self(type_name, self.entity())
    }

    /// Whether some instances of `type_name` may be guarded by this rule,
    /// i.e. the rule's class is a strict subclass of `type_name`.
    pub fn may_be_assignable(&self, type_name: &str, mapping: &MappingInformation) -> bool {
        mapping.is_strict_subclass(self.entity(), type_name)
    }

    fn analysis(&self) -> &RuleAnalysis {
        self.analysis
            .get_or_init(|| RuleAnalysis::analyze(&self.statement))
    }

    /// All aliases the rule refers to or declares, including context aliases.
    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.analysis().aliases
    }

    /// Aliases declared by the rule's subselects.
    pub fn declared_aliases(&self) -> Vec<String> {
        self.condition()
            .map(visit::declared_aliases)
            .unwrap_or_default()
    }

    /// Every path rooted at `alias`.
    pub fn identification_variables(&self, alias: &str) -> &[Path] {
        self.analysis()
            .variables
            .get(alias)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every `IN (...)` node whose list contains `alias`.
    pub fn in_nodes(&self, alias: &str) -> &[Expr] {
        self.analysis()
            .in_nodes
            .get(alias)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl PartialEq for AccessRule {
    fn eq(&self, other: &Self) -> bool {
        self.statement == other.statement
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement)
    }
}

/// Source of the access rules of a persistence unit.
pub trait AccessRulesProvider: Send + Sync {
    fn access_rules(&self) -> Arc<[AccessRule]>;
}

/// Rules compiled once from a fixed list of rule texts.
#[derive(Debug, Clone)]
pub struct StaticAccessRulesProvider {
    rules: Arc<[AccessRule]>,
}

impl StaticAccessRulesProvider {
    /// Compile all rule texts. The first invalid rule aborts loading.
    pub fn compile<S: AsRef<str>>(
        sources: impl IntoIterator<Item = S>,
        mapping: &MappingInformation,
    ) -> Result<Self, RuleError> {
        let rules = sources
            .into_iter()
            .map(|source| AccessRule::compile(source.as_ref(), mapping))
            .collect::<Result<Vec<_>, _>>()?;
        info!(rule_count = rules.len(), "Loaded access rules");
        Ok(Self::new(rules))
    }

    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }
}

impl AccessRulesProvider for StaticAccessRulesProvider {
    fn access_rules(&self) -> Arc<[AccessRule]> {
        Arc::clone(&self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ClassMapping, PropertyMapping};

    fn mapping() -> MappingInformation {
        MappingInformation::new()
            .with_class(
                ClassMapping::new("Parent")
                    .with_property(PropertyMapping::basic("owner"))
                    .with_property(PropertyMapping::basic("tenant")),
            )
            .with_class(ClassMapping::new("Child").with_superclass("Parent"))
    }

    #[test]
    fn test_compile_rule() {
        let rule = AccessRule::compile(
            "GRANT READ UPDATE ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL",
            &mapping(),
        )
        .unwrap();
        assert_eq!(rule.entity(), "Parent");
        assert_eq!(rule.alias(), "p");
        assert!(rule.grants_access(AccessType::Read));
        assert!(rule.grants_access(AccessType::Update));
        assert!(!rule.grants_access(AccessType::Delete));
        assert_eq!(
            rule.aliases().iter().cloned().collect::<Vec<_>>(),
            vec!["CURRENT_PRINCIPAL".to_string(), "p".to_string()]
        );
        assert_eq!(rule.identification_variables("p"), &[Path::parse("p.owner")]);
        assert!(rule.identification_variables("x").is_empty());
    }

    #[test]
    fn test_rule_without_condition_grants_everything() {
        let rule = AccessRule::compile("GRANT ACCESS TO Parent p", &mapping()).unwrap();
        assert!(AccessType::ALL.iter().all(|a| rule.grants_access(*a)));
        assert!(rule.predicate().is_always_true());
    }

    #[test]
    fn test_assignability() {
        let mapping = mapping();
        let parent_rule = AccessRule::compile("GRANT READ ACCESS TO Parent p", &mapping).unwrap();
        let child_rule = AccessRule::compile("GRANT READ ACCESS TO Child c", &mapping).unwrap();

        assert!(parent_rule.is_assignable("Parent", &mapping));
        assert!(parent_rule.is_assignable("Child", &mapping));
        assert!(!parent_rule.may_be_assignable("Child", &mapping));

        assert!(!child_rule.is_assignable("Parent", &mapping));
        assert!(child_rule.may_be_assignable("Parent", &mapping));
        assert!(child_rule.is_assignable("Child", &mapping));
    }

    #[test]
    fn test_in_nodes() {
        let rule = AccessRule::compile(
            "GRANT ACCESS TO Parent p WHERE p.tenant IN (CURRENT_TENANT) OR p.owner NOT IN (:CURRENT_PRINCIPAL, 'root')",
            &mapping(),
        )
        .unwrap();
        assert_eq!(rule.in_nodes("CURRENT_TENANT").len(), 1);
        assert_eq!(rule.in_nodes("CURRENT_PRINCIPAL").len(), 1);
        assert!(rule.in_nodes("p").is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let rule = AccessRule::compile(
            "GRANT ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL",
            &mapping(),
        )
        .unwrap();
        let mut predicate = rule.predicate();
        visit::substitute_variable(&mut predicate, "p", &Path::new("bean"));
        assert_eq!(predicate.to_string(), "bean.owner = CURRENT_PRINCIPAL");
        assert_eq!(
            rule.condition().unwrap().to_string(),
            "p.owner = CURRENT_PRINCIPAL"
        );
        assert_eq!(rule.clone(), rule);
    }

    #[test]
    fn test_compile_errors() {
        let err = AccessRule::compile("GRANT READ TO Parent p", &mapping()).unwrap_err();
        assert!(matches!(err, RuleError::Parse { .. }));

        let err = AccessRule::compile("GRANT ACCESS TO Ghost g", &mapping()).unwrap_err();
        assert!(matches!(err, RuleError::UnknownEntity { entity, .. } if entity == "Ghost"));
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticAccessRulesProvider::compile(
            ["GRANT READ ACCESS TO Parent p", "GRANT ACCESS TO Child c WHERE c.owner = 'x'"],
            &mapping(),
        )
        .unwrap();
        assert_eq!(provider.access_rules().len(), 2);
    }
}
