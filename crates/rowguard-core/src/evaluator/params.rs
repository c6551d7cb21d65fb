//! Per-call evaluation parameters.

use std::collections::BTreeMap;
use std::fmt;

use crate::object::Value;

/// Why an evaluation is run. The mode decides which subselect strategies
/// may be used; boolean semantics do not depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationMode {
    /// Single-entity accessibility check.
    #[default]
    AccessCheck,
    /// Folding constant branches of a filtered query.
    OptimizeQuery,
    /// Only strategies that never consult the backing store.
    GetAlwaysEvaluatableResult,
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationMode::AccessCheck => "ACCESS_CHECK",
            EvaluationMode::OptimizeQuery => "OPTIMIZE_QUERY",
            EvaluationMode::GetAlwaysEvaluatableResult => "GET_ALWAYS_EVALUATABLE_RESULT",
        };
        f.write_str(name)
    }
}

/// Alias bindings, parameters and mode of one evaluation.
#[derive(Debug, Clone)]
pub struct QueryEvaluationParameters {
    aliases: BTreeMap<String, Value>,
    named: BTreeMap<String, Value>,
    positional: BTreeMap<u32, Value>,
    mode: EvaluationMode,
    propagate_undefined: bool,
}

impl Default for QueryEvaluationParameters {
    fn default() -> Self {
        Self::new(EvaluationMode::default())
    }
}

impl QueryEvaluationParameters {
    /// Create parameters for `mode`. Undefined results propagate as `NULL`.
    pub fn new(mode: EvaluationMode) -> Self {
        Self {
            aliases: BTreeMap::new(),
            named: BTreeMap::new(),
            positional: BTreeMap::new(),
            mode,
            propagate_undefined: true,
        }
    }

    /// Bind an alias.
    pub fn with_alias(mut self, alias: impl Into<String>, value: impl Into<Value>) -> Self {
        self.aliases.insert(alias.into(), value.into());
        self
    }

    /// Set a named parameter.
    pub fn with_named_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Set multiple named parameters.
    pub fn with_named_parameters(
        mut self,
        parameters: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        self.named.extend(parameters);
        self
    }

    /// Set a positional parameter (`?1` is index 1).
    pub fn with_positional_parameter(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(index, value.into());
        self
    }

    /// Choose whether `NULL` operands yield `NULL` or not-evaluatable.
    pub fn with_propagate_undefined(mut self, propagate: bool) -> Self {
        self.propagate_undefined = propagate;
        self
    }

    /// A copy with one more alias bound, used while iterating subselect rows.
    pub fn with_binding(&self, alias: &str, value: Value) -> Self {
        let mut params = self.clone();
        params.aliases.insert(alias.to_string(), value);
        params
    }

    pub fn alias_value(&self, alias: &str) -> Option<&Value> {
        self.aliases.get(alias)
    }

    pub fn is_bound(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn named_parameter(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn positional_parameter(&self, index: u32) -> Option<&Value> {
        self.positional.get(&index)
    }

    pub fn named_parameters(&self) -> &BTreeMap<String, Value> {
        &self.named
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn propagate_undefined(&self) -> bool {
        self.propagate_undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_binding_leaves_original() {
        let params = QueryEvaluationParameters::new(EvaluationMode::OptimizeQuery)
            .with_alias("bean", 1i64)
            .with_named_parameter("name", "test")
            .with_positional_parameter(1, true);
        let inner = params.with_binding("child", Value::Int(2));

        assert!(inner.is_bound("child"));
        assert!(!params.is_bound("child"));
        assert_eq!(inner.alias_value("bean"), Some(&Value::Int(1)));
        assert_eq!(inner.named_parameter("name"), Some(&Value::from("test")));
        assert_eq!(inner.positional_parameter(1), Some(&Value::Bool(true)));
        assert_eq!(inner.mode(), EvaluationMode::OptimizeQuery);
        assert!(inner.propagate_undefined());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(EvaluationMode::AccessCheck.to_string(), "ACCESS_CHECK");
        assert_eq!(
            EvaluationMode::GetAlwaysEvaluatableResult.to_string(),
            "GET_ALWAYS_EVALUATABLE_RESULT"
        );
    }
}
