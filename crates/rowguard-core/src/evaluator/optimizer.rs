//! Constant folding of filtered queries.
//!
//! After access conditions are conjoined into a query, many branches can be
//! decided in memory because they only depend on the security context. The
//! optimizer replaces those branches by literals and drops what they make
//! redundant. It never enters subselects.

use rowguard_lang::{Expr, Statement};
use tracing::debug;

use super::{QueryEvaluationParameters, QueryEvaluator};
use crate::error::{EvaluationError, MappingError};

/// Folds the decidable parts of a statement's `WHERE` clause.
pub struct QueryOptimizer<'a> {
    evaluator: &'a QueryEvaluator,
}

impl<'a> QueryOptimizer<'a> {
    pub fn new(evaluator: &'a QueryEvaluator) -> Self {
        Self { evaluator }
    }

    /// Optimize `statement` in place.
    ///
    /// A `WHERE` clause that is always true is removed; one that is always
    /// false or unknown is replaced by `FALSE`. Mapping errors propagate.
    pub fn optimize(
        &self,
        statement: &mut Statement,
        params: &QueryEvaluationParameters,
    ) -> Result<(), MappingError> {
        let where_clause = statement.where_clause_mut();
        let Some(condition) = where_clause.take() else {
            return Ok(());
        };

        *where_clause = match self.evaluator.evaluate_condition(&condition, params) {
            Ok(Some(true)) => None,
            Ok(_) => Some(Expr::boolean(false)),
            Err(EvaluationError::NotEvaluatable(_)) => Some(self.optimize_expr(condition, params)?),
            Err(EvaluationError::Mapping(e)) => return Err(e),
        };
        debug!(
            statement = %statement,
            mode = %params.mode(),
            "Optimized statement"
        );
        Ok(())
    }

    /// Optimize a single condition.
    pub fn optimize_expr(
        &self,
        expr: Expr,
        params: &QueryEvaluationParameters,
    ) -> Result<Expr, MappingError> {
        match expr {
            Expr::And(left, right) => {
                match (self.determine(&left, params)?, self.determine(&right, params)?) {
                    (Some(false), _) | (_, Some(false)) => Ok(Expr::boolean(false)),
                    (Some(true), Some(true)) => Ok(Expr::always_true()),
                    (Some(true), None) => self.optimize_expr(*right, params),
                    (None, Some(true)) => self.optimize_expr(*left, params),
                    (None, None) => Ok(Expr::and(
                        self.optimize_expr(*left, params)?,
                        self.optimize_expr(*right, params)?,
                    )),
                }
            }
            Expr::Or(left, right) => {
                match (self.determine(&left, params)?, self.determine(&right, params)?) {
                    (Some(true), _) | (_, Some(true)) => Ok(Expr::always_true()),
                    (Some(false), Some(false)) => Ok(Expr::boolean(false)),
                    (Some(false), None) => self.optimize_expr(*right, params),
                    (None, Some(false)) => self.optimize_expr(*left, params),
                    (None, None) => Ok(Expr::or(
                        self.optimize_expr(*left, params)?,
                        self.optimize_expr(*right, params)?,
                    )),
                }
            }
            Expr::Not(inner) => match self.determine(&inner, params)? {
                Some(true) => Ok(Expr::boolean(false)),
                Some(false) => Ok(Expr::always_true()),
                None => Ok(Expr::not(self.optimize_expr(*inner, params)?)),
            },
            Expr::Brackets(inner) => {
                let mut inner = *inner;
                while let Expr::Brackets(nested) = inner {
                    inner = *nested;
                }
                Ok(Expr::brackets(self.optimize_expr(inner, params)?))
            }
            other => Ok(other),
        }
    }

    /// Decide a condition in memory. `None` when it depends on data that is
    /// not available or is unknown.
    fn determine(
        &self,
        expr: &Expr,
        params: &QueryEvaluationParameters,
    ) -> Result<Option<bool>, MappingError> {
        match self.evaluator.evaluate_condition(expr, params) {
            Ok(result) => Ok(result),
            Err(EvaluationError::NotEvaluatable(_)) => Ok(None),
            Err(EvaluationError::Mapping(e)) => Err(e),
        }
    }
}
