//! Subselect evaluation strategies.
//!
//! A subselect is evaluated by the first strategy that is enabled for it and
//! succeeds. Strategies differ in where range candidates come from: values
//! reachable from bound aliases, a pool of already loaded entities, or the
//! backing store.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rowguard_lang::{Range, SelectStatement};

use super::params::{EvaluationMode, QueryEvaluationParameters};
use super::QueryEvaluator;
use crate::error::{EvaluationError, EvaluationResult};
use crate::mapping::MappingInformation;
use crate::object::{EntityRef, Value};

/// Disables the entity pool while optimizing queries.
pub const QUERY_OPTIMIZE_NOCACHE: &str = "QUERY_OPTIMIZE_NOCACHE";
/// Disables the entity pool during accessibility checks.
pub const IS_ACCESSIBLE_NOCACHE: &str = "IS_ACCESSIBLE_NOCACHE";
/// Disables the backing store while optimizing queries.
pub const QUERY_OPTIMIZE_NODB: &str = "QUERY_OPTIMIZE_NODB";
/// Disables the backing store during accessibility checks.
pub const IS_ACCESSIBLE_NODB: &str = "IS_ACCESSIBLE_NODB";

/// Rows of an evaluated subselect.
///
/// An incomplete result may miss rows, so an empty incomplete result cannot
/// prove that no row exists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubselectResult {
    pub rows: Vec<Value>,
    pub complete: bool,
}

impl SubselectResult {
    pub fn complete(rows: Vec<Value>) -> Self {
        Self {
            rows,
            complete: true,
        }
    }
}

/// Candidate values of one range variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeValues {
    pub values: Vec<Value>,
    pub complete: bool,
}

/// A way of evaluating subselects in memory.
pub trait SubselectEvaluator: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Why this strategy must not be used for `subselect`, if it must not.
    fn disabled_reason(
        &self,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> Option<String>;

    /// Whether this strategy may evaluate `subselect`.
    fn can_evaluate(
        &self,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> bool {
        self.disabled_reason(subselect, params).is_none()
    }

    /// Evaluate the subselect into rows.
    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<SubselectResult>;
}

fn disabled(
    strategy: &dyn SubselectEvaluator,
    subselect: &SelectStatement,
    params: &QueryEvaluationParameters,
) -> EvaluationResult<()> {
    match strategy.disabled_reason(subselect, params) {
        Some(reason) => Err(EvaluationError::not_evaluatable(reason)),
        None => Ok(()),
    }
}

/// Candidates of a path range (`FROM bean.children c`), navigated from the
/// bound aliases.
fn path_range(
    evaluator: &QueryEvaluator,
    range: &Range,
    params: &QueryEvaluationParameters,
) -> EvaluationResult<Option<RangeValues>> {
    let Range::Path(path) = range else {
        return Ok(None);
    };
    let values = match evaluator.navigate(path, params)? {
        Value::Null => Vec::new(),
        Value::Collection(values) => values,
        Value::Map(entries) => entries.into_iter().map(|(_, value)| value).collect(),
        value => vec![value],
    };
    Ok(Some(RangeValues {
        values,
        complete: true,
    }))
}

/// Evaluates subselects whose ranges are all reachable from bound aliases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSubselectEvaluator;

impl SubselectEvaluator for SimpleSubselectEvaluator {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn disabled_reason(
        &self,
        subselect: &SelectStatement,
        _params: &QueryEvaluationParameters,
    ) -> Option<String> {
        subselect.from.iter().find_map(|item| match &item.range {
            Range::Entity(entity) => Some(format!(
                "subselect ranges over entity {} and no entity pool is available",
                entity
            )),
            Range::Path(_) => None,
        })
    }

    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<SubselectResult> {
        disabled(self, subselect, params)?;
        evaluator.evaluate_rows(subselect, params, &|range, params| {
            path_range(evaluator, range, params)?.ok_or_else(|| {
                EvaluationError::not_evaluatable("entity range requires an entity pool")
            })
        })
    }
}

/// Entities already loaded by the unit of work, keyed by type.
#[derive(Debug, Default)]
pub struct EntityPool {
    entities: RwLock<Vec<EntityRef>>,
    complete: RwLock<BTreeSet<String>>,
}

impl EntityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool holding `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = EntityRef>) -> Self {
        let pool = Self::new();
        pool.entities.write().extend(entities);
        pool
    }

    /// Add an entity unless it is already pooled.
    pub fn add(&self, entity: EntityRef) {
        let mut entities = self.entities.write();
        if !entities.iter().any(|e| e.ptr_eq(&entity)) {
            entities.push(entity);
        }
    }

    /// Record that every instance of `type_name` (and its subtypes) is pooled.
    pub fn set_complete(&self, type_name: impl Into<String>) {
        self.complete.write().insert(type_name.into());
    }

    /// Whether all instances of `type_name` are known to be pooled.
    pub fn is_complete(&self, type_name: &str, mapping: &MappingInformation) -> bool {
        let complete = self.complete.read();
        mapping
            .ancestors_or_self(type_name)
            .iter()
            .any(|name| complete.contains(*name))
    }

    /// Pooled instances of `type_name` and its subtypes.
    pub fn entities_of(&self, type_name: &str, mapping: &MappingInformation) -> Vec<EntityRef> {
        self.entities
            .read()
            .iter()
            .filter(|entity| mapping.is_subclass_or_self(&entity.type_name(), type_name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    pub fn clear(&self) {
        self.entities.write().clear();
        self.complete.write().clear();
    }
}

/// Evaluates subselects against an [`EntityPool`].
#[derive(Debug, Clone)]
pub struct EntityPoolSubselectEvaluator {
    pool: Arc<EntityPool>,
}

impl EntityPoolSubselectEvaluator {
    pub fn new(pool: Arc<EntityPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<EntityPool> {
        &self.pool
    }
}

impl SubselectEvaluator for EntityPoolSubselectEvaluator {
    fn name(&self) -> &'static str {
        "entity pool"
    }

    fn disabled_reason(
        &self,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> Option<String> {
        let hint = match params.mode() {
            EvaluationMode::OptimizeQuery => QUERY_OPTIMIZE_NOCACHE,
            EvaluationMode::AccessCheck => IS_ACCESSIBLE_NOCACHE,
            EvaluationMode::GetAlwaysEvaluatableResult => return None,
        };
        subselect.has_hint(hint).then(|| {
            format!(
                "entity pool evaluation disabled by hint {} in mode {}",
                hint,
                params.mode()
            )
        })
    }

    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<SubselectResult> {
        disabled(self, subselect, params)?;
        let mapping = evaluator.mapping();
        evaluator.evaluate_rows(subselect, params, &|range, params| {
            if let Some(values) = path_range(evaluator, range, params)? {
                return Ok(values);
            }
            let Range::Entity(entity) = range else {
                return Err(EvaluationError::not_evaluatable("unsupported range"));
            };
            mapping.class_mapping(entity)?;
            Ok(RangeValues {
                values: self
                    .pool
                    .entities_of(entity, mapping)
                    .into_iter()
                    .map(Value::Entity)
                    .collect(),
                complete: self.pool.is_complete(entity, mapping),
            })
        })
    }
}

/// The authoritative store, queried for subselects that cannot be answered
/// from memory.
pub trait SubselectStore: Send + Sync + fmt::Debug {
    /// Execute the subselect with the bound parameters and return its rows.
    fn select(
        &self,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Vec<Value>>;
}

/// Evaluates subselects by asking a [`SubselectStore`].
#[derive(Debug, Clone)]
pub struct StoreSubselectEvaluator {
    store: Arc<dyn SubselectStore>,
}

impl StoreSubselectEvaluator {
    pub fn new(store: Arc<dyn SubselectStore>) -> Self {
        Self { store }
    }
}

impl SubselectEvaluator for StoreSubselectEvaluator {
    fn name(&self) -> &'static str {
        "store"
    }

    fn disabled_reason(
        &self,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> Option<String> {
        let hint = match params.mode() {
            EvaluationMode::OptimizeQuery => QUERY_OPTIMIZE_NODB,
            EvaluationMode::AccessCheck => IS_ACCESSIBLE_NODB,
            EvaluationMode::GetAlwaysEvaluatableResult => {
                return Some(format!(
                    "store evaluation is not allowed in mode {}",
                    params.mode()
                ));
            }
        };
        subselect.has_hint(hint).then(|| {
            format!(
                "store evaluation disabled by hint {} in mode {}",
                hint,
                params.mode()
            )
        })
    }

    fn evaluate(
        &self,
        _evaluator: &QueryEvaluator,
        subselect: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<SubselectResult> {
        disabled(self, subselect, params)?;
        Ok(SubselectResult::complete(self.store.select(subselect, params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ClassMapping, PropertyMapping};
    use crate::object::EntityData;
    use rowguard_lang::{parse, Statement};

    fn mapping() -> Arc<MappingInformation> {
        Arc::new(
            MappingInformation::new()
                .with_class(
                    ClassMapping::new("Parent").with_property(PropertyMapping::basic("name")),
                )
                .with_class(
                    ClassMapping::new("Child")
                        .with_superclass("Parent")
                        .with_property(PropertyMapping::single("parent", "Parent")),
                ),
        )
    }

    fn subselect(query: &str) -> SelectStatement {
        match parse(query).unwrap() {
            Statement::Select(select) => select,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[derive(Debug)]
    struct FixedStore(Vec<Value>);

    impl SubselectStore for FixedStore {
        fn select(
            &self,
            _subselect: &SelectStatement,
            _params: &QueryEvaluationParameters,
        ) -> EvaluationResult<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_pool_is_subtype_inclusive() {
        let mapping = mapping();
        let parent = EntityRef::new(EntityData::new("Parent", 1));
        let child = EntityRef::new(EntityData::new("Child", 2));
        let pool = EntityPool::with_entities([parent.clone(), child.clone()]);
        pool.add(child.clone());

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.entities_of("Parent", &mapping).len(), 2);
        assert_eq!(pool.entities_of("Child", &mapping), vec![child]);

        assert!(!pool.is_complete("Child", &mapping));
        pool.set_complete("Parent");
        assert!(pool.is_complete("Child", &mapping));
    }

    #[test]
    fn test_pool_hints_depend_on_mode() {
        let strategy = EntityPoolSubselectEvaluator::new(Arc::new(EntityPool::new()));
        let hinted = subselect("SELECT /* IS_ACCESSIBLE_NOCACHE */ c FROM Child c");
        let plain = subselect("SELECT c FROM Child c");

        let access = QueryEvaluationParameters::new(EvaluationMode::AccessCheck);
        let optimize = QueryEvaluationParameters::new(EvaluationMode::OptimizeQuery);

        assert!(strategy.can_evaluate(&plain, &access));
        assert!(!strategy.can_evaluate(&hinted, &access));
        assert!(strategy.can_evaluate(&hinted, &optimize));

        let reason = strategy.disabled_reason(&hinted, &access).unwrap();
        assert!(reason.contains(IS_ACCESSIBLE_NOCACHE));
        assert!(reason.contains("ACCESS_CHECK"));
    }

    #[test]
    fn test_store_strategy() {
        let evaluator = QueryEvaluator::new(mapping());
        let strategy = StoreSubselectEvaluator::new(Arc::new(FixedStore(vec![Value::Int(1)])));
        let select = subselect("SELECT c.id FROM Child c");

        let access = QueryEvaluationParameters::new(EvaluationMode::AccessCheck);
        let result = strategy.evaluate(&evaluator, &select, &access).unwrap();
        assert_eq!(result, SubselectResult::complete(vec![Value::Int(1)]));

        let safe = QueryEvaluationParameters::new(EvaluationMode::GetAlwaysEvaluatableResult);
        assert!(!strategy.can_evaluate(&select, &safe));
        assert!(strategy
            .evaluate(&evaluator, &select, &safe)
            .unwrap_err()
            .is_not_evaluatable());

        let hinted = subselect("SELECT /* QUERY_OPTIMIZE_NODB */ c.id FROM Child c");
        let optimize = QueryEvaluationParameters::new(EvaluationMode::OptimizeQuery);
        assert!(!strategy.can_evaluate(&hinted, &optimize));
        assert!(strategy.can_evaluate(&hinted, &access));
    }

    #[test]
    fn test_simple_strategy_rejects_entity_ranges() {
        let strategy = SimpleSubselectEvaluator;
        let params = QueryEvaluationParameters::default();
        assert!(!strategy.can_evaluate(&subselect("SELECT c FROM Child c"), &params));
        assert!(strategy.can_evaluate(&subselect("SELECT c FROM bean.children c"), &params));
    }
}
