//! Integration tests for query filtering and in-memory access checks.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rowguard_core::evaluator::IS_ACCESSIBLE_NOCACHE;
use rowguard_core::{
    ClassMapping, CollectionKind, DefaultSecurityContext, EntityData, EntityFilter, EntityPool,
    EntityPoolSubselectEvaluator, EntityRef, EvaluationMode, FilterResult, MappingInformation,
    PropertyMapping, QueryEvaluationParameters, QueryEvaluator, StaticAccessRulesProvider, Value,
};
use rowguard_lang::{parse, parse_expression, AccessType, SelectStatement, Statement};

/// Parent/Child model with a pool holding every instance.
struct TestContext {
    mapping: Arc<MappingInformation>,
    pool: Arc<EntityPool>,
}

impl TestContext {
    fn new() -> Self {
        let mapping = Arc::new(
            MappingInformation::new()
                .with_class(
                    ClassMapping::new("Parent")
                        .with_property(PropertyMapping::basic("name"))
                        .with_property(PropertyMapping::basic("owner"))
                        .with_property(PropertyMapping::collection(
                            "children",
                            "Child",
                            CollectionKind::Set,
                        )),
                )
                .with_class(
                    ClassMapping::new("Child")
                        .with_superclass("Parent")
                        .with_property(PropertyMapping::single("parent", "Parent")),
                ),
        );
        let pool = Arc::new(EntityPool::new());
        pool.set_complete("Parent");
        Self { mapping, pool }
    }

    fn add(&self, type_name: &str, id: i64, name: &str, owner: &str) -> EntityRef {
        let entity = EntityRef::new(
            EntityData::new(type_name, id)
                .with_property("name", name)
                .with_property("owner", owner),
        );
        self.pool.add(entity.clone());
        entity
    }

    fn filter(&self, rules: &[&str], principal: &str) -> EntityFilter {
        let rules =
            StaticAccessRulesProvider::compile(rules.iter().copied(), &self.mapping).unwrap();
        EntityFilter::new(
            Arc::clone(&self.mapping),
            Arc::new(rules),
            Arc::new(DefaultSecurityContext::new().with_principal(principal)),
        )
    }

    fn evaluator(&self) -> QueryEvaluator {
        QueryEvaluator::new(Arc::clone(&self.mapping))
            .with_strategy(Arc::new(EntityPoolSubselectEvaluator::new(Arc::clone(&self.pool))))
    }

    /// Run a filtered query against the pool.
    fn run(&self, result: &FilterResult) -> Vec<EntityRef> {
        let Statement::Select(select) = &result.statement else {
            panic!("expected a select statement");
        };
        let params = QueryEvaluationParameters::new(EvaluationMode::GetAlwaysEvaluatableResult)
            .with_named_parameters(result.parameters.clone());
        let rows = self.evaluator().evaluate_subselect(select, &params).unwrap();
        assert!(rows.complete);
        rows.rows
            .into_iter()
            .map(|row| row.as_entity().cloned().unwrap())
            .collect()
    }
}

fn select(query: &str) -> SelectStatement {
    match parse(query).unwrap() {
        Statement::Select(select) => select,
        other => panic!("expected a select statement, got {}", other),
    }
}

const OWNER_RULE: &str = "GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL";

#[test]
fn test_short_circuit_with_unbound_operand() {
    let ctx = TestContext::new();
    let evaluator = ctx.evaluator();
    let params = QueryEvaluationParameters::default();

    let and = parse_expression("1 = 2 AND nobody.name = 'x'").unwrap();
    assert_eq!(evaluator.evaluate(&and, &params).unwrap(), Value::Bool(false));

    let or = parse_expression("1 = 1 OR nobody.name = 'x'").unwrap();
    assert_eq!(evaluator.evaluate(&or, &params).unwrap(), Value::Bool(true));

    let undecided = parse_expression("1 = 1 AND nobody.name = 'x'").unwrap();
    assert!(evaluator
        .evaluate(&undecided, &params)
        .unwrap_err()
        .is_not_evaluatable());
}

#[test]
fn test_filtering_is_repeatable() {
    let ctx = TestContext::new();
    let filter = ctx.filter(
        &[OWNER_RULE, "GRANT READ ACCESS TO Child c WHERE c.name = 'visible'"],
        "alice",
    );

    let first = filter.filter_query("SELECT p FROM Parent p", AccessType::Read).unwrap();
    let second = filter.filter_query("SELECT p FROM Parent p", AccessType::Read).unwrap();
    assert_eq!(first.query, second.query);
    assert_eq!(first.parameters, second.parameters);
    assert_eq!(filter.statement_cache().stats().hits(), 1);
}

#[test]
fn test_owner_rule_hides_foreign_rows() {
    let ctx = TestContext::new();
    ctx.add("Parent", 1, "first", "alice");
    ctx.add("Parent", 2, "second", "alice");

    let foreign = ctx.filter(&[OWNER_RULE], "bob");
    let result = foreign.filter_query("SELECT p FROM Parent p", AccessType::Read).unwrap();
    assert!(ctx.run(&result).is_empty());

    let owner = ctx.filter(&[OWNER_RULE], "alice");
    let result = owner.filter_query("SELECT p FROM Parent p", AccessType::Read).unwrap();
    assert_eq!(ctx.run(&result).len(), 2);
}

#[test]
fn test_child_rule_is_not_bypassed_by_parent_rule() {
    let ctx = TestContext::new();
    let parent = ctx.add("Parent", 1, "parent", "alice");
    let hidden = ctx.add("Child", 2, "hidden", "alice");
    let visible = ctx.add("Child", 3, "visible", "alice");

    let filter = ctx.filter(
        &[OWNER_RULE, "GRANT READ ACCESS TO Child c WHERE c.name = 'visible'"],
        "alice",
    );
    let result = filter.filter_query("SELECT p FROM Parent p", AccessType::Read).unwrap();
    let rows = ctx.run(&result);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|row| row.ptr_eq(&parent)));
    assert!(rows.iter().any(|row| row.ptr_eq(&visible)));
    assert!(!rows.iter().any(|row| row.ptr_eq(&hidden)));

    assert!(filter.is_accessible(&parent, AccessType::Read).unwrap());
    assert!(filter.is_accessible(&visible, AccessType::Read).unwrap());
    assert!(!filter.is_accessible(&hidden, AccessType::Read).unwrap());
}

#[test]
fn test_pool_subselect_finds_loaded_row() {
    let ctx = TestContext::new();
    let parent = ctx.add("Parent", 1, "root", "alice");
    let child = ctx.add("Child", 2, "test", "alice");
    child.set_property("parent", parent.clone());

    let query = select("SELECT innerBean FROM Child innerBean WHERE innerBean.parent = bean");
    let params =
        QueryEvaluationParameters::new(EvaluationMode::AccessCheck).with_alias("bean", parent);

    let simple = QueryEvaluator::new(Arc::clone(&ctx.mapping));
    assert!(simple
        .evaluate_subselect(&query, &params)
        .unwrap_err()
        .is_not_evaluatable());

    let result = ctx.evaluator().evaluate_subselect(&query, &params).unwrap();
    assert_eq!(result.rows.len(), 1);
    let row = result.rows[0].as_entity().unwrap();
    assert_eq!(row.property("name"), Some(Value::from("test")));
}

#[test]
fn test_nocache_hint_disables_pool() {
    let ctx = TestContext::new();
    let parent = ctx.add("Parent", 1, "root", "alice");
    let child = ctx.add("Child", 2, "test", "alice");
    child.set_property("parent", parent.clone());

    let query = select(
        "SELECT /* IS_ACCESSIBLE_NOCACHE */ innerBean FROM Child innerBean WHERE innerBean.parent = bean",
    );
    let params = QueryEvaluationParameters::new(EvaluationMode::AccessCheck)
        .with_alias("bean", parent.clone());

    let err = ctx.evaluator().evaluate_subselect(&query, &params).unwrap_err();
    assert!(err.is_not_evaluatable());
    let message = err.to_string();
    assert!(message.contains(IS_ACCESSIBLE_NOCACHE), "{}", message);
    assert!(message.contains("ACCESS_CHECK"), "{}", message);

    // The hint only applies to its own mode.
    let optimize =
        QueryEvaluationParameters::new(EvaluationMode::OptimizeQuery).with_alias("bean", parent);
    assert_eq!(
        ctx.evaluator().evaluate_subselect(&query, &optimize).unwrap().rows.len(),
        1
    );
}

#[test]
fn test_undecidable_check_fails_closed() {
    let ctx = TestContext::new();
    let filter = ctx.filter(&[OWNER_RULE], "alice");
    let unloaded = EntityRef::new(EntityData::new("Parent", 9));

    let err = filter.is_accessible(&unloaded, AccessType::Read).unwrap_err();
    assert!(err.is_access_denied());
    assert!(filter.check_access(&unloaded, AccessType::Read).is_err());
}
