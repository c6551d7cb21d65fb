//! In-memory query evaluation.
//!
//! [`QueryEvaluator`] walks a predicate tree against bound alias values and
//! parameters. Evaluation is three-valued: a definite value, SQL `NULL`, or
//! [`EvaluationError::NotEvaluatable`] when the value depends on data that is
//! not bound (or not loaded) and the predicate has to be left to the backing
//! store.

pub mod optimizer;
pub mod params;
pub mod subselect;

pub use optimizer::QueryOptimizer;
pub use params::{EvaluationMode, QueryEvaluationParameters};
pub use subselect::{
    EntityPool, EntityPoolSubselectEvaluator, RangeValues, SimpleSubselectEvaluator,
    StoreSubselectEvaluator, SubselectEvaluator, SubselectResult, SubselectStore,
    IS_ACCESSIBLE_NOCACHE, IS_ACCESSIBLE_NODB, QUERY_OPTIMIZE_NOCACHE, QUERY_OPTIMIZE_NODB,
};

use std::cmp::Ordering;
use std::sync::Arc;

use rowguard_lang::{
    ArithmeticOp, CaseExpr, ComparisonOp, Expr, Function, InItems, JoinKind, Literal, Path, Range,
    SelectStatement, TrimSpec,
};
use tracing::trace;

use crate::error::{EvaluationError, EvaluationResult, MappingError};
use crate::mapping::MappingInformation;
use crate::object::{EntityRef, Value};

/// Evaluates predicate trees in memory.
#[derive(Debug, Clone)]
pub struct QueryEvaluator {
    mapping: Arc<MappingInformation>,
    strategies: Vec<Arc<dyn SubselectEvaluator>>,
}

impl QueryEvaluator {
    /// Create an evaluator that evaluates subselects over bound aliases only.
    pub fn new(mapping: Arc<MappingInformation>) -> Self {
        Self {
            mapping,
            strategies: vec![Arc::new(SimpleSubselectEvaluator)],
        }
    }

    /// Add a subselect strategy, tried before the ones already registered.
    pub fn with_strategy(mut self, strategy: Arc<dyn SubselectEvaluator>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn mapping(&self) -> &MappingInformation {
        &self.mapping
    }

    pub fn strategies(&self) -> &[Arc<dyn SubselectEvaluator>] {
        &self.strategies
    }

    /// Whether `expr` evaluates to a definite value.
    pub fn can_evaluate(&self, expr: &Expr, params: &QueryEvaluationParameters) -> bool {
        self.evaluate(expr, params).is_ok()
    }

    /// Evaluate a condition. `None` is SQL `UNKNOWN`.
    pub fn evaluate_condition(
        &self,
        expr: &Expr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Option<bool>> {
        match self.evaluate(expr, params)? {
            Value::Bool(b) => Ok(Some(b)),
            Value::Null => Ok(None),
            other => Err(EvaluationError::not_evaluatable(format!(
                "expected a boolean, got {}",
                other.type_name()
            ))),
        }
    }

    /// Evaluate an expression.
    pub fn evaluate(
        &self,
        expr: &Expr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let result = self.evaluate_node(expr, params);
        if let Err(EvaluationError::NotEvaluatable(reason)) = &result {
            trace!(expr = %expr, reason = %reason, "Not evaluatable");
        }
        result
    }

    fn evaluate_node(
        &self,
        expr: &Expr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Path(path) => self.navigate(path, params),
            Expr::NamedParameter(name) => params.named_parameter(name).cloned().ok_or_else(|| {
                EvaluationError::not_evaluatable(format!("parameter :{} is not bound", name))
            }),
            Expr::PositionalParameter(index) => params
                .positional_parameter(*index)
                .cloned()
                .ok_or_else(|| {
                    EvaluationError::not_evaluatable(format!("parameter ?{} is not bound", index))
                }),
            Expr::And(left, right) => self.evaluate_and(left, right, params),
            Expr::Or(left, right) => self.evaluate_or(left, right, params),
            Expr::Not(inner) => match self.evaluate_condition(inner, params)? {
                Some(b) => Ok(Value::Bool(!b)),
                None => self.undefined(params, "NOT of an unknown condition"),
            },
            Expr::Brackets(inner) => self.evaluate(inner, params),
            Expr::Comparison { op, left, right } => {
                let left = self.evaluate(left, params)?;
                let right = self.evaluate(right, params)?;
                self.compare(*op, &left, &right, params)
            }
            Expr::Between {
                expr,
                lower,
                upper,
                negated,
            } => {
                let value = self.evaluate(expr, params)?;
                let lower = self.evaluate(lower, params)?;
                let upper = self.evaluate(upper, params)?;
                if value.is_null() || lower.is_null() || upper.is_null() {
                    return self.undefined(params, "BETWEEN with a NULL operand");
                }
                let within = ordering(&value, &lower)?.is_ge() && ordering(&value, &upper)?.is_le();
                Ok(Value::Bool(within != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                negated,
            } => self.evaluate_like(expr, pattern, escape.as_deref(), *negated, params),
            Expr::In {
                expr,
                items,
                negated,
            } => self.evaluate_in(expr, items, *negated, params),
            Expr::IsNull { expr, negated } => {
                let value = self.evaluate(expr, params)?;
                Ok(Value::Bool(value.is_null() != *negated))
            }
            Expr::IsEmpty { expr, negated } => {
                let empty = match self.evaluate(expr, params)? {
                    Value::Null => true,
                    Value::Collection(items) => items.is_empty(),
                    Value::Map(entries) => entries.is_empty(),
                    other => {
                        return Err(EvaluationError::not_evaluatable(format!(
                            "IS EMPTY applied to {}",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Bool(empty != *negated))
            }
            Expr::MemberOf {
                expr,
                collection,
                negated,
            } => {
                let value = self.evaluate(expr, params)?;
                let member = match self.navigate(collection, params)? {
                    Value::Null => false,
                    _ if value.is_null() => {
                        return self.undefined(params, "MEMBER OF with a NULL element");
                    }
                    Value::Collection(items) => items.iter().any(|item| item.equals(&value)),
                    Value::Map(entries) => entries.iter().any(|(_, item)| item.equals(&value)),
                    other => {
                        return Err(EvaluationError::not_evaluatable(format!(
                            "MEMBER OF applied to {}",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Bool(member != *negated))
            }
            Expr::InstanceOf { path, type_name } => {
                self.mapping.class_mapping(type_name)?;
                match self.navigate(path, params)? {
                    Value::Null => Ok(Value::Bool(false)),
                    Value::Entity(entity) => Ok(Value::Bool(
                        self.mapping
                            .is_subclass_or_self(&entity.type_name(), type_name),
                    )),
                    other => Err(EvaluationError::not_evaluatable(format!(
                        "INSTANCE OF applied to {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Exists(select) => {
                let result = self.evaluate_subselect(select, params)?;
                if !result.rows.is_empty() {
                    Ok(Value::Bool(true))
                } else if result.complete {
                    Ok(Value::Bool(false))
                } else {
                    Err(EvaluationError::not_evaluatable(
                        "subselect found no rows in an incomplete range",
                    ))
                }
            }
            Expr::Subselect(select) => {
                let mut result = self.evaluate_subselect(select, params)?;
                match result.rows.len() {
                    1 if result.complete => Ok(result.rows.remove(0)),
                    1 => Err(EvaluationError::not_evaluatable(
                        "scalar subselect row comes from an incomplete range",
                    )),
                    0 if result.complete => Ok(Value::Null),
                    0 => Err(EvaluationError::not_evaluatable(
                        "scalar subselect found no rows in an incomplete range",
                    )),
                    n => Err(EvaluationError::not_evaluatable(format!(
                        "scalar subselect returned {} rows",
                        n
                    ))),
                }
            }
            Expr::Arithmetic { op, left, right } => {
                let left = self.evaluate(left, params)?;
                let right = self.evaluate(right, params)?;
                if left.is_null() || right.is_null() {
                    return self.undefined(params, "arithmetic with a NULL operand");
                }
                arithmetic(*op, &left, &right)
            }
            Expr::Negative(inner) => match self.evaluate(inner, params)? {
                Value::Null => self.undefined(params, "negation of NULL"),
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvaluationError::not_evaluatable("integer overflow")),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(type_mismatch("negation", &other)),
            },
            Expr::Function { function, args } => self.evaluate_function(*function, args, params),
            Expr::Trim {
                spec,
                character,
                expr,
            } => {
                let trim = match character {
                    Some(character) => match self.evaluate(character, params)? {
                        Value::Null => return self.undefined(params, "TRIM with a NULL character"),
                        value => single_char(&value)?,
                    },
                    None => ' ',
                };
                match self.evaluate(expr, params)? {
                    Value::Null => self.undefined(params, "TRIM of NULL"),
                    Value::String(s) => Ok(Value::String(
                        match spec {
                            TrimSpec::Leading => s.trim_start_matches(trim),
                            TrimSpec::Trailing => s.trim_end_matches(trim),
                            TrimSpec::Both => s.trim_matches(trim),
                        }
                        .to_string(),
                    )),
                    other => Err(type_mismatch("TRIM", &other)),
                }
            }
            Expr::Case(case) => self.evaluate_case(case, params),
            Expr::Aggregate { function, .. } => Err(EvaluationError::not_evaluatable(format!(
                "aggregate function {} cannot be evaluated in memory",
                function.name()
            ))),
        }
    }

    /// `NULL` when undefined results propagate, not-evaluatable otherwise.
    fn undefined(&self, params: &QueryEvaluationParameters, what: &str) -> EvaluationResult<Value> {
        if params.propagate_undefined() {
            Ok(Value::Null)
        } else {
            Err(EvaluationError::not_evaluatable(format!(
                "{} is undefined",
                what
            )))
        }
    }

    fn evaluate_and(
        &self,
        left: &Expr,
        right: &Expr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let left = self.evaluate_condition(left, params);
        match left {
            Ok(Some(false)) => return Ok(Value::Bool(false)),
            Err(EvaluationError::Mapping(e)) => return Err(e.into()),
            _ => {}
        }
        let right = self.evaluate_condition(right, params);
        match (left, right) {
            (_, Ok(Some(false))) => Ok(Value::Bool(false)),
            (Ok(Some(true)), Ok(Some(true))) => Ok(Value::Bool(true)),
            (_, Err(e @ EvaluationError::Mapping(_))) => Err(e),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(_)) => self.undefined(params, "AND of an unknown condition"),
        }
    }

    fn evaluate_or(
        &self,
        left: &Expr,
        right: &Expr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let left = self.evaluate_condition(left, params);
        match left {
            Ok(Some(true)) => return Ok(Value::Bool(true)),
            Err(EvaluationError::Mapping(e)) => return Err(e.into()),
            _ => {}
        }
        let right = self.evaluate_condition(right, params);
        match (left, right) {
            (_, Ok(Some(true))) => Ok(Value::Bool(true)),
            (Ok(Some(false)), Ok(Some(false))) => Ok(Value::Bool(false)),
            (_, Err(e @ EvaluationError::Mapping(_))) => Err(e),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(_)) => self.undefined(params, "OR of an unknown condition"),
        }
    }

    fn compare(
        &self,
        op: ComparisonOp,
        left: &Value,
        right: &Value,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        if left.is_null() || right.is_null() {
            return self.undefined(params, "comparison with NULL");
        }
        let result = match op {
            ComparisonOp::Eq => left.equals(right),
            ComparisonOp::Ne => !left.equals(right),
            ComparisonOp::Lt => ordering(left, right)?.is_lt(),
            ComparisonOp::Le => ordering(left, right)?.is_le(),
            ComparisonOp::Gt => ordering(left, right)?.is_gt(),
            ComparisonOp::Ge => ordering(left, right)?.is_ge(),
        };
        Ok(Value::Bool(result))
    }

    fn evaluate_like(
        &self,
        expr: &Expr,
        pattern: &Expr,
        escape: Option<&Expr>,
        negated: bool,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let value = self.evaluate(expr, params)?;
        let pattern = self.evaluate(pattern, params)?;
        let escape = match escape {
            Some(escape) => Some(self.evaluate(escape, params)?),
            None => None,
        };
        if value.is_null() || pattern.is_null() || escape.as_ref().is_some_and(Value::is_null) {
            return self.undefined(params, "LIKE with a NULL operand");
        }
        let (Value::String(value), Value::String(pattern)) = (&value, &pattern) else {
            return Err(EvaluationError::not_evaluatable(format!(
                "LIKE applied to {} and {}",
                value.type_name(),
                pattern.type_name()
            )));
        };
        let escape = escape.as_ref().map(single_char).transpose()?;
        Ok(Value::Bool(like_match(value, pattern, escape) != negated))
    }

    fn evaluate_in(
        &self,
        expr: &Expr,
        items: &InItems,
        negated: bool,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let value = self.evaluate(expr, params)?;
        let (candidates, complete) = match items {
            InItems::List(items) => {
                let mut candidates = Vec::with_capacity(items.len());
                for item in items {
                    match self.evaluate(item, params)? {
                        Value::Collection(values) => candidates.extend(values),
                        value => candidates.push(value),
                    }
                }
                (candidates, true)
            }
            InItems::Subselect(select) => {
                let result = self.evaluate_subselect(select, params)?;
                (result.rows, result.complete)
            }
        };

        if candidates.is_empty() && complete {
            return Ok(Value::Bool(negated));
        }
        if value.is_null() {
            return self.undefined(params, "IN with a NULL operand");
        }
        if candidates.iter().any(|candidate| candidate.equals(&value)) {
            return Ok(Value::Bool(!negated));
        }
        if !complete {
            return Err(EvaluationError::not_evaluatable(
                "IN subselect found no match in an incomplete range",
            ));
        }
        if candidates.iter().any(Value::is_null) {
            return self.undefined(params, "IN with a NULL candidate");
        }
        Ok(Value::Bool(negated))
    }

    fn evaluate_case(
        &self,
        case: &CaseExpr,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let operand = match &case.operand {
            Some(operand) => Some(self.evaluate(operand, params)?),
            None => None,
        };
        for when in &case.whens {
            let matched = match &operand {
                Some(operand) => {
                    let candidate = self.evaluate(&when.condition, params)?;
                    !operand.is_null() && operand.equals(&candidate)
                }
                None => self.evaluate_condition(&when.condition, params)? == Some(true),
            };
            if matched {
                return self.evaluate(&when.result, params);
            }
        }
        match &case.else_expr {
            Some(else_expr) => self.evaluate(else_expr, params),
            None => Ok(Value::Null),
        }
    }

    fn evaluate_function(
        &self,
        function: Function,
        args: &[Expr],
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        // COALESCE evaluates lazily; every other function needs all arguments.
        if function == Function::Coalesce {
            for arg in args {
                let value = self.evaluate(arg, params)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            return Ok(Value::Null);
        }

        let values = args
            .iter()
            .map(|arg| self.evaluate(arg, params))
            .collect::<EvaluationResult<Vec<_>>>()?;

        match function {
            Function::Size => match values.first() {
                Some(Value::Null) => Ok(Value::Int(0)),
                Some(Value::Collection(items)) => Ok(Value::Int(items.len() as i64)),
                Some(Value::Map(entries)) => Ok(Value::Int(entries.len() as i64)),
                Some(other) => Err(type_mismatch("SIZE", other)),
                None => Err(arity(function)),
            },
            Function::Nullif => match values.as_slice() {
                [first, second] if !first.is_null() && first.equals(second) => Ok(Value::Null),
                [first, _] => Ok(first.clone()),
                _ => Err(arity(function)),
            },
            _ if values.iter().any(Value::is_null) => {
                self.undefined(params, &format!("{} of NULL", function.name()))
            }
            Function::Upper => Ok(Value::String(string_arg(function, &values, 0)?.to_uppercase())),
            Function::Lower => Ok(Value::String(string_arg(function, &values, 0)?.to_lowercase())),
            Function::Concat => {
                let mut result = String::new();
                for index in 0..values.len() {
                    result.push_str(string_arg(function, &values, index)?);
                }
                Ok(Value::String(result))
            }
            Function::Substring => {
                let s = string_arg(function, &values, 0)?;
                let start = int_arg(function, &values, 1)?.max(1) as usize - 1;
                let chars = s.chars().skip(start);
                let result: String = match values.get(2) {
                    Some(_) => chars.take(int_arg(function, &values, 2)?.max(0) as usize).collect(),
                    None => chars.collect(),
                };
                Ok(Value::String(result))
            }
            Function::Length => Ok(Value::Int(
                string_arg(function, &values, 0)?.chars().count() as i64,
            )),
            Function::Locate => {
                let needle = string_arg(function, &values, 0)?;
                let haystack = string_arg(function, &values, 1)?;
                let start = match values.get(2) {
                    Some(_) => int_arg(function, &values, 2)?.max(1) as usize - 1,
                    None => 0,
                };
                let tail: String = haystack.chars().skip(start).collect();
                let position = tail
                    .find(needle)
                    .map(|byte| tail[..byte].chars().count() + start + 1)
                    .unwrap_or(0);
                Ok(Value::Int(position as i64))
            }
            Function::Abs => match values.first() {
                Some(Value::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| EvaluationError::not_evaluatable("integer overflow")),
                Some(Value::Float(x)) => Ok(Value::Float(x.abs())),
                Some(other) => Err(type_mismatch("ABS", other)),
                None => Err(arity(function)),
            },
            Function::Sqrt => {
                let x = match values.first() {
                    Some(Value::Int(i)) => *i as f64,
                    Some(Value::Float(x)) => *x,
                    Some(other) => return Err(type_mismatch("SQRT", other)),
                    None => return Err(arity(function)),
                };
                if x < 0.0 {
                    return Err(EvaluationError::not_evaluatable(
                        "square root of a negative number",
                    ));
                }
                Ok(Value::Float(x.sqrt()))
            }
            Function::Mod => {
                let dividend = int_arg(function, &values, 0)?;
                let divisor = int_arg(function, &values, 1)?;
                dividend
                    .checked_rem(divisor)
                    .map(Value::Int)
                    .ok_or_else(|| EvaluationError::not_evaluatable("MOD by zero"))
            }
            Function::Coalesce => Err(arity(function)),
        }
    }

    /// Navigate a path from its bound root alias.
    pub fn navigate(
        &self,
        path: &Path,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<Value> {
        let mut current = params.alias_value(&path.root).cloned().ok_or_else(|| {
            EvaluationError::not_evaluatable(format!("alias '{}' is not bound", path.root))
        })?;
        for segment in &path.segments {
            current = match current {
                Value::Null => return Ok(Value::Null),
                Value::Entity(entity) => self.property_value(&entity, segment)?,
                Value::Collection(_) | Value::Map(_) => {
                    return Err(MappingError::CollectionNavigation(path.to_string()).into());
                }
                _ => return Err(MappingError::BasicNavigation(path.to_string()).into()),
            };
        }
        Ok(current)
    }

    /// Read a mapped property of an entity.
    pub fn property_value(&self, entity: &EntityRef, property: &str) -> EvaluationResult<Value> {
        let data = entity.read();
        match self.mapping.property(&data.type_name, property) {
            Ok(mapping) => mapping.accessor.get(&data).ok_or_else(|| {
                EvaluationError::not_evaluatable(format!(
                    "property {}.{} is not loaded",
                    data.type_name, property
                ))
            }),
            Err(_) if self.mapping.is_id_property(&data.type_name, property) => {
                Ok(data.id.clone())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate a subselect with the first enabled strategy that returns a
    /// complete result. Incomplete results are only returned when no later
    /// strategy can do better.
    pub fn evaluate_subselect(
        &self,
        select: &SelectStatement,
        params: &QueryEvaluationParameters,
    ) -> EvaluationResult<SubselectResult> {
        let mut reasons = Vec::new();
        let mut partial: Option<SubselectResult> = None;
        for strategy in &self.strategies {
            if let Some(reason) = strategy.disabled_reason(select, params) {
                reasons.push(reason);
                continue;
            }
            match strategy.evaluate(self, select, params) {
                Ok(result) if result.complete => return Ok(result),
                Ok(result) => {
                    trace!(
                        strategy = strategy.name(),
                        rows = result.rows.len(),
                        "Incomplete subselect result"
                    );
                    if partial.as_ref().map_or(true, |p| p.rows.is_empty()) {
                        partial = Some(result);
                    }
                }
                Err(EvaluationError::NotEvaluatable(reason)) => {
                    reasons.push(format!("{}: {}", strategy.name(), reason))
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(result) = partial {
            return Ok(result);
        }
        if reasons.is_empty() {
            reasons.push("no subselect evaluator available".to_string());
        }
        Err(EvaluationError::NotEvaluatable(reasons.join("; ")))
    }

    /// Compute the rows of a subselect. `ranges` supplies the candidates of
    /// each `FROM` item; joins are navigated from the bound values.
    pub fn evaluate_rows(
        &self,
        select: &SelectStatement,
        params: &QueryEvaluationParameters,
        ranges: &dyn Fn(&Range, &QueryEvaluationParameters) -> EvaluationResult<RangeValues>,
    ) -> EvaluationResult<SubselectResult> {
        let mut complete = true;
        let mut bindings = vec![params.clone()];

        for item in &select.from {
            let mut expanded = Vec::new();
            for binding in &bindings {
                let candidates = ranges(&item.range, binding)?;
                complete &= candidates.complete;
                for value in candidates.values {
                    expanded.push(binding.with_binding(&item.alias, value));
                }
            }
            bindings = expanded;

            for join in &item.joins {
                let mut joined = Vec::new();
                for binding in bindings {
                    let mut targets = match self.navigate(&join.path, &binding)? {
                        Value::Null => Vec::new(),
                        Value::Collection(values) => values,
                        Value::Map(entries) => entries.into_iter().map(|(_, v)| v).collect(),
                        value => vec![value],
                    };
                    if targets.is_empty() && join.kind == JoinKind::LeftOuter {
                        targets.push(Value::Null);
                    }
                    match &join.alias {
                        Some(alias) => joined.extend(
                            targets
                                .into_iter()
                                .map(|target| binding.with_binding(alias, target)),
                        ),
                        None if !targets.is_empty() => joined.push(binding),
                        None => {}
                    }
                }
                bindings = joined;
            }
        }

        let mut rows: Vec<Value> = Vec::new();
        for binding in &bindings {
            if let Some(condition) = &select.where_clause {
                if self.evaluate_condition(condition, binding)? != Some(true) {
                    continue;
                }
            }
            let Some(item) = select.select.first() else {
                return Err(EvaluationError::not_evaluatable("subselect selects nothing"));
            };
            let row = self.evaluate(&item.expr, binding)?;
            if select.distinct && rows.iter().any(|r| r.equals(&row)) {
                continue;
            }
            rows.push(row);
        }

        Ok(SubselectResult { rows, complete })
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn ordering(left: &Value, right: &Value) -> EvaluationResult<Ordering> {
    left.compare(right).ok_or_else(|| {
        EvaluationError::not_evaluatable(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> EvaluationResult<Value> {
    let overflow = || EvaluationError::not_evaluatable("integer overflow");
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithmeticOp::Add => a.checked_add(*b).ok_or_else(overflow)?,
                ArithmeticOp::Subtract => a.checked_sub(*b).ok_or_else(overflow)?,
                ArithmeticOp::Multiply => a.checked_mul(*b).ok_or_else(overflow)?,
                ArithmeticOp::Divide => {
                    if *b == 0 {
                        return Err(EvaluationError::not_evaluatable("division by zero"));
                    }
                    a.checked_div(*b).ok_or_else(overflow)?
                }
            };
            Ok(Value::Int(result))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (as_float(left), as_float(right));
            let result = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Subtract => a - b,
                ArithmeticOp::Multiply => a * b,
                ArithmeticOp::Divide => {
                    if b == 0.0 {
                        return Err(EvaluationError::not_evaluatable("division by zero"));
                    }
                    a / b
                }
            };
            Ok(Value::Float(result))
        }
        _ => Err(EvaluationError::not_evaluatable(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(x) => *x,
        _ => f64::NAN,
    }
}

fn type_mismatch(operation: &str, value: &Value) -> EvaluationError {
    EvaluationError::not_evaluatable(format!(
        "{} cannot be applied to {}",
        operation,
        value.type_name()
    ))
}

fn arity(function: Function) -> EvaluationError {
    EvaluationError::not_evaluatable(format!(
        "wrong number of arguments for {}",
        function.name()
    ))
}

fn string_arg(function: Function, values: &[Value], index: usize) -> EvaluationResult<&str> {
    match values.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(type_mismatch(function.name(), other)),
        None => Err(arity(function)),
    }
}

fn int_arg(function: Function, values: &[Value], index: usize) -> EvaluationResult<i64> {
    match values.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(type_mismatch(function.name(), other)),
        None => Err(arity(function)),
    }
}

fn single_char(value: &Value) -> EvaluationResult<char> {
    let mut chars = value.as_str().unwrap_or_default().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(EvaluationError::not_evaluatable(format!(
            "expected a single character, got {}",
            value
        ))),
    }
}

/// Match a string against a SQL LIKE pattern.
///
/// `%` matches zero or more characters, `_` exactly one. The escape
/// character makes the following pattern character literal; a pattern
/// ending in a lone escape character matches nothing.
pub fn like_match(value: &str, pattern: &str, escape: Option<char>) -> bool {
    let Some(tokens) = like_tokens(pattern, escape) else {
        return false;
    };
    let chars: Vec<char> = value.chars().collect();

    // Position after the last `%` and the value position it currently covers.
    let mut resume: Option<(usize, usize)> = None;
    let (mut t, mut c) = (0, 0);
    while c < chars.len() {
        match tokens.get(t) {
            Some(LikeToken::AnyRun) => {
                t += 1;
                resume = Some((t, c));
                continue;
            }
            Some(LikeToken::AnyChar) => {
                t += 1;
                c += 1;
                continue;
            }
            Some(LikeToken::Literal(literal)) if *literal == chars[c] => {
                t += 1;
                c += 1;
                continue;
            }
            _ => {}
        }
        match resume {
            Some((after_run, covered)) => {
                t = after_run;
                c = covered + 1;
                resume = Some((after_run, c));
            }
            None => return false,
        }
    }
    tokens[t..].iter().all(|token| *token == LikeToken::AnyRun)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    AnyRun,
    AnyChar,
    Literal(char),
}

fn like_tokens(pattern: &str, escape: Option<char>) -> Option<Vec<LikeToken>> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(p) = chars.next() {
        let token = match p {
            p if Some(p) == escape => LikeToken::Literal(chars.next()?),
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyChar,
            p => LikeToken::Literal(p),
        };
        tokens.push(token);
    }
    Some(tokens)
}
