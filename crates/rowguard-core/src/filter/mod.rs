//! Query filtering and single-entity access checks.
//!
//! [`EntityFilter`] is the entry point of the security layer: it appends the
//! access definition of the current user to queries and decides whether a
//! loaded entity may be accessed.

pub mod definition;

pub use definition::{AccessDefinition, AccessDefinitionBuilder};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rowguard_lang::{visit, AccessType, Expr, Path, SelectStatement, Statement};
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::context::SecurityContext;
use crate::error::{EvaluationError, FilterError, MappingError, SecurityError, SecurityResult};
use crate::evaluator::{EvaluationMode, QueryEvaluationParameters, QueryEvaluator, QueryOptimizer};
use crate::mapping::MappingInformation;
use crate::object::{EntityRef, Value};
use crate::query::{
    CompiledStatement, SelectedPath, SelectedType, StatementCache, TypeDefinition, TypeResolver,
};
use crate::rules::AccessRulesProvider;

/// A filtered query.
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// The filtered query text.
    pub query: String,
    pub statement: Statement,
    /// Named parameters introduced by the access definition.
    pub parameters: BTreeMap<String, Value>,
    pub selected_paths: Vec<SelectedPath>,
    pub type_definitions: Vec<TypeDefinition>,
}

/// Applies access rules to queries and entities.
pub struct EntityFilter {
    mapping: Arc<MappingInformation>,
    rules: Arc<dyn AccessRulesProvider>,
    context: Arc<dyn SecurityContext>,
    evaluator: QueryEvaluator,
    cache: StatementCache,
    config: FilterConfig,
}

impl EntityFilter {
    pub fn new(
        mapping: Arc<MappingInformation>,
        rules: Arc<dyn AccessRulesProvider>,
        context: Arc<dyn SecurityContext>,
    ) -> Self {
        let config = FilterConfig::default();
        Self {
            evaluator: QueryEvaluator::new(Arc::clone(&mapping)),
            cache: StatementCache::new(config.statement_cache_capacity),
            mapping,
            rules,
            context,
            config,
        }
    }

    /// Replace the configuration. The statement cache is recreated.
    pub fn with_config(mut self, config: FilterConfig) -> Self {
        self.cache = StatementCache::new(config.statement_cache_capacity);
        self.config = config;
        self
    }

    /// Replace the evaluator, e.g. one with additional subselect strategies.
    pub fn with_evaluator(mut self, evaluator: QueryEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn mapping(&self) -> &Arc<MappingInformation> {
        &self.mapping
    }

    pub fn context(&self) -> &Arc<dyn SecurityContext> {
        &self.context
    }

    pub fn evaluator(&self) -> &QueryEvaluator {
        &self.evaluator
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.cache
    }

    /// The access definition restricting the selected types of a compiled
    /// statement. `None` when no rule applies.
    pub fn create_access_definition(
        &self,
        compiled: &CompiledStatement,
        access: AccessType,
    ) -> Option<AccessDefinition> {
        let mut used_aliases = compiled.aliases.clone();
        self.access_definition(
            &compiled.selected_types,
            &compiled.type_definitions,
            access,
            &mut used_aliases,
        )
    }

    fn access_definition(
        &self,
        selected_types: &[SelectedType],
        type_definitions: &[TypeDefinition],
        access: AccessType,
        used_aliases: &mut BTreeSet<String>,
    ) -> Option<AccessDefinition> {
        let rules = self.rules.access_rules();
        AccessDefinitionBuilder::new(&self.mapping, &rules, self.context.as_ref()).build(
            selected_types,
            type_definitions,
            access,
            used_aliases,
        )
    }

    /// Filter a query so it only returns what the current user may access
    /// with `access`.
    pub fn filter_query(
        &self,
        query: &str,
        access: AccessType,
    ) -> Result<FilterResult, FilterError> {
        let compiled = self.cache.get_or_compile(query, &self.mapping)?;
        let mut statement = compiled.statement.clone();
        let mut used_aliases = compiled.aliases.clone();
        let mut parameters = BTreeMap::new();

        if let Some(condition) = statement.where_clause_mut() {
            self.filter_subselects(
                condition,
                &compiled.type_definitions,
                &mut used_aliases,
                &mut parameters,
            )?;
        }

        if let Some(definition) = self.access_definition(
            &compiled.selected_types,
            &compiled.type_definitions,
            access,
            &mut used_aliases,
        ) {
            let (predicate, definition_parameters) = definition.into_parts();
            parameters.extend(definition_parameters);
            conjoin(statement.where_clause_mut(), predicate);
        }

        if self.config.optimize_queries {
            let params = QueryEvaluationParameters::new(EvaluationMode::OptimizeQuery)
                .with_named_parameters(parameters.clone())
                .with_propagate_undefined(self.config.propagate_undefined);
            QueryOptimizer::new(&self.evaluator).optimize(&mut statement, &params)?;
            parameters.retain(|name, _| references_parameter(&statement, name));
        }

        let query = statement.to_string();
        debug!(query = %query, access = %access, "Filtered query");
        Ok(FilterResult {
            query,
            statement,
            parameters,
            selected_paths: compiled.selected_paths.clone(),
            type_definitions: compiled.type_definitions.clone(),
        })
    }

    /// Filter the subselects of a condition with their READ access
    /// definitions. Subselects added by the filter itself are not visited.
    fn filter_subselects(
        &self,
        condition: &mut Expr,
        outer: &[TypeDefinition],
        used_aliases: &mut BTreeSet<String>,
        parameters: &mut BTreeMap<String, Value>,
    ) -> Result<(), MappingError> {
        let mut result = Ok(());
        visit::for_each_subselect_mut(condition, &mut |select| {
            if result.is_ok() {
                result = self.filter_subselect(select, outer, used_aliases, parameters);
            }
        });
        result
    }

    fn filter_subselect(
        &self,
        select: &mut SelectStatement,
        outer: &[TypeDefinition],
        used_aliases: &mut BTreeSet<String>,
        parameters: &mut BTreeMap<String, Value>,
    ) -> Result<(), MappingError> {
        let resolver = TypeResolver::new(&self.mapping);
        let mut scope = outer.to_vec();
        scope.extend(resolver.type_definitions(select, outer)?);
        let selected_types = resolver.selected_types(select, &scope)?;

        if let Some(condition) = &mut select.where_clause {
            self.filter_subselects(condition, &scope, used_aliases, parameters)?;
        }
        if let Some(definition) =
            self.access_definition(&selected_types, &scope, AccessType::Read, used_aliases)
        {
            let (predicate, definition_parameters) = definition.into_parts();
            parameters.extend(definition_parameters);
            conjoin(&mut select.where_clause, predicate);
        }
        Ok(())
    }

    /// Whether the current user may access `entity` with `access`.
    ///
    /// A condition that cannot be decided in memory is reported as
    /// [`SecurityError::AccessDenied`].
    pub fn is_accessible(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<bool> {
        let type_name = entity.type_name();
        self.mapping.class_mapping(&type_name)?;

        let alias = self.config.default_alias.as_str();
        let selected = [SelectedType {
            selected: SelectedPath::new(Path::new(alias)),
            type_name: type_name.clone(),
        }];
        let definitions = [TypeDefinition::root(alias, &type_name)];
        let mut used_aliases = BTreeSet::from([alias.to_string()]);
        let Some(definition) =
            self.access_definition(&selected, &definitions, access, &mut used_aliases)
        else {
            return Ok(true);
        };

        let params = QueryEvaluationParameters::new(EvaluationMode::AccessCheck)
            .with_alias(alias, entity.clone())
            .with_named_parameters(definition.parameters().clone())
            .with_propagate_undefined(self.config.propagate_undefined);
        match self.evaluator.evaluate_condition(definition.predicate(), &params) {
            Ok(Some(granted)) => Ok(granted),
            Ok(None) => Ok(false),
            Err(EvaluationError::NotEvaluatable(reason)) => {
                warn!(
                    entity = %entity,
                    access = %access,
                    reason = %reason,
                    "Access check could not be decided in memory"
                );
                Err(SecurityError::access_denied(access, entity.to_string(), reason))
            }
            Err(EvaluationError::Mapping(e)) => Err(e.into()),
        }
    }

    /// Like [`is_accessible`](Self::is_accessible), failing unless access is
    /// granted.
    pub fn check_access(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<()> {
        if self.is_accessible(entity, access)? {
            return Ok(());
        }
        warn!(entity = %entity, access = %access, "Access denied");
        Err(SecurityError::access_denied(
            access,
            entity.to_string(),
            "no access rule grants access",
        ))
    }
}

impl fmt::Debug for EntityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFilter")
            .field("rule_count", &self.rules.access_rules().len())
            .field("context", &self.context)
            .field("config", &self.config)
            .finish()
    }
}

/// AND `predicate` into a `WHERE` clause.
fn conjoin(where_clause: &mut Option<Expr>, predicate: Expr) {
    *where_clause = Some(match where_clause.take() {
        Some(existing) => Expr::and(existing, predicate),
        None => predicate,
    });
}

fn references_parameter(statement: &Statement, name: &str) -> bool {
    let Some(condition) = statement.where_clause() else {
        return false;
    };
    let mut found = false;
    visit::for_each_expr(condition, &mut |expr| {
        if matches!(expr, Expr::NamedParameter(parameter) if parameter == name) {
            found = true;
        }
    });
    found
}
