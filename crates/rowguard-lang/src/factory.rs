//! Constructors for building and combining expression trees.

use crate::ast::*;
use crate::visit;

impl Expr {
    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Expr) -> Expr {
        Expr::Not(Box::new(inner))
    }

    /// Wrap in brackets unless the expression already is bracketed.
    pub fn brackets(inner: Expr) -> Expr {
        match inner {
            Expr::Brackets(_) => inner,
            other => Expr::Brackets(Box::new(other)),
        }
    }

    pub fn comparison(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
        Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Expr {
        Expr::comparison(ComparisonOp::Eq, left, right)
    }

    pub fn not_equals(left: Expr, right: Expr) -> Expr {
        Expr::comparison(ComparisonOp::Ne, left, right)
    }

    pub fn path(path: Path) -> Expr {
        Expr::Path(path)
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn instance_of(path: Path, type_name: impl Into<String>) -> Expr {
        Expr::InstanceOf {
            path,
            type_name: type_name.into(),
        }
    }

    pub fn named_parameter(name: impl Into<String>) -> Expr {
        Expr::NamedParameter(name.into())
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn integer(value: i64) -> Expr {
        Expr::Literal(Literal::Int(value))
    }

    pub fn string(value: impl Into<String>) -> Expr {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn null() -> Expr {
        Expr::Literal(Literal::Null)
    }

    /// `TRUE = TRUE`, the condition a folded-away predicate is replaced with.
    pub fn always_true() -> Expr {
        Expr::equals(Expr::boolean(true), Expr::boolean(true))
    }

    /// `1 <> 1`, a condition that never holds.
    pub fn never() -> Expr {
        Expr::not_equals(Expr::integer(1), Expr::integer(1))
    }

    /// Whether the expression is one of the constant forms of `TRUE`.
    pub fn is_always_true(&self) -> bool {
        match self {
            Expr::Literal(Literal::Bool(true)) => true,
            Expr::Brackets(inner) => inner.is_always_true(),
            other => *other == Expr::always_true(),
        }
    }

    /// Whether the expression is one of the constant forms of `FALSE`.
    pub fn is_always_false(&self) -> bool {
        match self {
            Expr::Literal(Literal::Bool(false)) => true,
            Expr::Brackets(inner) => inner.is_always_false(),
            other => *other == Expr::never(),
        }
    }
}

/// Conjunction of all expressions; `None` when there are none.
pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

/// Disjunction of all expressions; `None` when there are none.
pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::or)
}

/// Remove every explicit `Brackets` node.
pub fn strip_brackets(mut expr: Expr) -> Expr {
    fn strip(expr: &mut Expr) {
        while let Expr::Brackets(inner) = expr {
            *expr = std::mem::replace(inner.as_mut(), Expr::null());
        }
        visit::children_mut(expr, &mut |child| strip(child));
    }
    strip(&mut expr);
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    #[test]
    fn test_and_all_or_all() {
        assert_eq!(and_all(Vec::new()), None);
        let a = Expr::boolean(true);
        let b = Expr::boolean(false);
        assert_eq!(and_all(vec![a.clone()]), Some(a.clone()));
        assert_eq!(
            or_all(vec![a.clone(), b.clone()]),
            Some(Expr::or(a, b))
        );
    }

    #[test]
    fn test_constant_forms() {
        assert!(Expr::always_true().is_always_true());
        assert!(Expr::brackets(Expr::boolean(true)).is_always_true());
        assert!(Expr::never().is_always_false());
        assert!(!Expr::never().is_always_true());
        assert_eq!(Expr::always_true().to_string(), "TRUE = TRUE");
        assert_eq!(Expr::never().to_string(), "1 <> 1");
    }

    #[test]
    fn test_brackets_not_doubled() {
        let expr = Expr::brackets(Expr::brackets(Expr::boolean(true)));
        assert_eq!(expr.to_string(), "(TRUE)");
    }

    #[test]
    fn test_strip_brackets() {
        let expr = parse_expression("((b.a = 1)) AND (NOT (b.b = 2))").unwrap();
        assert_eq!(
            strip_brackets(expr),
            Expr::and(
                parse_expression("b.a = 1").unwrap(),
                Expr::not(parse_expression("b.b = 2").unwrap())
            )
        );
    }
}
