//! Query text serialization.
//!
//! Printing inserts parentheses only where operator precedence requires them,
//! so a printed tree parses back into the same tree (explicit `Brackets`
//! nodes are kept as written).

use std::fmt::{self, Display, Formatter};

use crate::ast::*;

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_PREDICATE: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_PRIMARY: u8 = 8;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Or(..) => PREC_OR,
        Expr::And(..) => PREC_AND,
        Expr::Not(_) => PREC_NOT,
        Expr::Comparison { .. }
        | Expr::Between { .. }
        | Expr::Like { .. }
        | Expr::In { .. }
        | Expr::IsNull { .. }
        | Expr::IsEmpty { .. }
        | Expr::MemberOf { .. }
        | Expr::InstanceOf { .. }
        | Expr::Exists(_) => PREC_PREDICATE,
        Expr::Arithmetic {
            op: ArithmeticOp::Add | ArithmeticOp::Subtract,
            ..
        } => PREC_ADDITIVE,
        Expr::Arithmetic { .. } => PREC_MULTIPLICATIVE,
        Expr::Negative(_) => PREC_UNARY,
        Expr::Literal(Literal::Int(i)) if *i < 0 => PREC_UNARY,
        Expr::Literal(Literal::Float(x)) if *x < 0.0 => PREC_UNARY,
        _ => PREC_PRIMARY,
    }
}

fn write_expr(f: &mut Formatter<'_>, expr: &Expr, min_prec: u8) -> fmt::Result {
    if precedence(expr) < min_prec {
        f.write_str("(")?;
        write_expr(f, expr, 0)?;
        return f.write_str(")");
    }

    match expr {
        Expr::Literal(literal) => write!(f, "{}", literal),
        Expr::Path(path) => write!(f, "{}", path),
        Expr::NamedParameter(name) => write!(f, ":{}", name),
        Expr::PositionalParameter(index) => write!(f, "?{}", index),
        Expr::And(left, right) => {
            write_expr(f, left, PREC_AND)?;
            f.write_str(" AND ")?;
            write_expr(f, right, PREC_AND + 1)
        }
        Expr::Or(left, right) => {
            write_expr(f, left, PREC_OR)?;
            f.write_str(" OR ")?;
            write_expr(f, right, PREC_OR + 1)
        }
        Expr::Not(inner) => {
            f.write_str("NOT ")?;
            write_expr(f, inner, PREC_NOT)
        }
        Expr::Brackets(inner) => {
            f.write_str("(")?;
            write_expr(f, inner, 0)?;
            f.write_str(")")
        }
        Expr::Comparison { op, left, right } => {
            write_expr(f, left, PREC_ADDITIVE)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, right, PREC_ADDITIVE)
        }
        Expr::Between {
            expr,
            lower,
            upper,
            negated,
        } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " })?;
            write_expr(f, lower, PREC_ADDITIVE)?;
            f.write_str(" AND ")?;
            write_expr(f, upper, PREC_ADDITIVE)
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            negated,
        } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " NOT LIKE " } else { " LIKE " })?;
            write_expr(f, pattern, PREC_ADDITIVE)?;
            if let Some(escape) = escape {
                f.write_str(" ESCAPE ")?;
                write_expr(f, escape, PREC_ADDITIVE)?;
            }
            Ok(())
        }
        Expr::In {
            expr,
            items,
            negated,
        } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " NOT IN (" } else { " IN (" })?;
            match items {
                InItems::List(items) => write_list(f, items)?,
                InItems::Subselect(subselect) => write!(f, "{}", subselect)?,
            }
            f.write_str(")")
        }
        Expr::IsNull { expr, negated } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " IS NOT NULL" } else { " IS NULL" })
        }
        Expr::IsEmpty { expr, negated } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " IS NOT EMPTY" } else { " IS EMPTY" })
        }
        Expr::MemberOf {
            expr,
            collection,
            negated,
        } => {
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(if *negated { " NOT MEMBER OF " } else { " MEMBER OF " })?;
            write!(f, "{}", collection)
        }
        Expr::InstanceOf { path, type_name } => write!(f, "{} INSTANCE OF {}", path, type_name),
        Expr::Exists(subselect) => write!(f, "EXISTS ({})", subselect),
        Expr::Subselect(subselect) => write!(f, "({})", subselect),
        Expr::Arithmetic { op, left, right } => {
            let prec = precedence(expr);
            write_expr(f, left, prec)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, right, prec + 1)
        }
        Expr::Negative(inner) => {
            f.write_str("-")?;
            write_expr(f, inner, PREC_PRIMARY)
        }
        Expr::Function { function, args } => {
            write!(f, "{}(", function.name())?;
            write_list(f, args)?;
            f.write_str(")")
        }
        Expr::Trim {
            spec,
            character,
            expr,
        } => {
            f.write_str("TRIM(")?;
            match (spec, character) {
                (TrimSpec::Both, None) => {}
                (spec, character) => {
                    match spec {
                        TrimSpec::Leading => f.write_str("LEADING ")?,
                        TrimSpec::Trailing => f.write_str("TRAILING ")?,
                        TrimSpec::Both => f.write_str("BOTH ")?,
                    }
                    if let Some(character) = character {
                        write_expr(f, character, PREC_PRIMARY)?;
                        f.write_str(" ")?;
                    }
                    f.write_str("FROM ")?;
                }
            }
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(")")
        }
        Expr::Case(case) => {
            f.write_str("CASE")?;
            if let Some(operand) = &case.operand {
                f.write_str(" ")?;
                write_expr(f, operand, PREC_ADDITIVE)?;
            }
            for when in &case.whens {
                write!(f, " WHEN {} THEN {}", when.condition, when.result)?;
            }
            if let Some(else_expr) = &case.else_expr {
                write!(f, " ELSE {}", else_expr)?;
            }
            f.write_str(" END")
        }
        Expr::Aggregate {
            function,
            distinct,
            expr,
        } => {
            write!(f, "{}(", function.name())?;
            if *distinct {
                f.write_str("DISTINCT ")?;
            }
            write_expr(f, expr, PREC_ADDITIVE)?;
            f.write_str(")")
        }
    }
}

fn write_list(f: &mut Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_expr(f, item, 0)?;
    }
    Ok(())
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expr(f, self, 0)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(true) => f.write_str("TRUE"),
            Literal::Bool(false) => f.write_str("FALSE"),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

impl Display for SelectStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        for hint in &self.hints {
            write!(f, "/* {} */ ", hint)?;
        }
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item.expr)?;
            if let Some(alias) = &item.alias {
                write!(f, " AS {}", alias)?;
            }
        }

        f.write_str(" FROM ")?;
        for (i, item) in self.from.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item)?;
        }

        if let Some(condition) = &self.where_clause {
            write!(f, " WHERE {}", condition)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {}", having)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", item.expr)?;
                if item.direction == SortDirection::Desc {
                    f.write_str(" DESC")?;
                }
            }
        }
        Ok(())
    }
}

impl Display for FromItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.range {
            Range::Entity(name) => write!(f, "{} {}", name, self.alias)?,
            Range::Path(path) => write!(f, "{} {}", path, self.alias)?,
        }
        for join in &self.joins {
            match join.kind {
                JoinKind::Inner => f.write_str(" JOIN ")?,
                JoinKind::LeftOuter => f.write_str(" LEFT OUTER JOIN ")?,
            }
            if join.fetch {
                f.write_str("FETCH ")?;
            }
            write!(f, "{}", join.path)?;
            if let Some(alias) = &join.alias {
                write!(f, " {}", alias)?;
            }
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(select) => write!(f, "{}", select),
            Statement::Update(update) => {
                write!(f, "UPDATE {} {} SET ", update.entity, update.alias)?;
                for (i, assignment) in update.assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", assignment.path, assignment.value)?;
                }
                if let Some(condition) = &update.where_clause {
                    write!(f, " WHERE {}", condition)?;
                }
                Ok(())
            }
            Statement::Delete(delete) => {
                write!(f, "DELETE FROM {} {}", delete.entity, delete.alias)?;
                if let Some(condition) = &delete.where_clause {
                    write!(f, " WHERE {}", condition)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for AccessRuleStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("GRANT ")?;
        for access in &self.access {
            write!(f, "{} ", access)?;
        }
        write!(f, "ACCESS TO {} {}", self.entity, self.alias)?;
        if let Some(condition) = &self.where_clause {
            write!(f, " WHERE {}", condition)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, parse_expression, parse_rule};
    use pretty_assertions::assert_eq;

    fn reprint(source: &str) -> String {
        parse(source).unwrap().to_string()
    }

    #[test]
    fn test_print_select() {
        let source = "SELECT DISTINCT p FROM Parent p LEFT OUTER JOIN FETCH p.children c WHERE p.name = 'x' ORDER BY p.name DESC";
        assert_eq!(reprint(source), source);
    }

    #[test]
    fn test_print_is_stable() {
        let source = "select /* IS_ACCESSIBLE_NOCACHE */ b from Bean b where not (b.a = 1 or b.b <> 2) and b.c in (:p, 3)";
        let once = reprint(source);
        assert_eq!(
            once,
            "SELECT /* IS_ACCESSIBLE_NOCACHE */ b FROM Bean b WHERE NOT (b.a = 1 OR b.b <> 2) AND b.c IN (:p, 3)"
        );
        assert_eq!(parse(&once).unwrap(), parse(source).unwrap());
    }

    #[test]
    fn test_print_needs_parentheses() {
        use crate::ast::Expr;
        use crate::factory;

        let a = parse_expression("b.a = 1").unwrap();
        let b = parse_expression("b.b = 2").unwrap();
        let c = parse_expression("b.c = 3").unwrap();
        let expr = Expr::and(Expr::or(a, b), c);
        let printed = expr.to_string();
        assert_eq!(printed, "(b.a = 1 OR b.b = 2) AND b.c = 3");
        assert_eq!(factory::strip_brackets(parse_expression(&printed).unwrap()), expr);
    }

    #[test]
    fn test_print_arithmetic() {
        let expr = parse_expression("(b.a - (b.b - 1)) * -2 = -b.c").unwrap();
        assert_eq!(expr.to_string(), "(b.a - (b.b - 1)) * -2 = -b.c");
    }

    #[test]
    fn test_print_string_escape() {
        let expr = parse_expression("b.name = 'it''s'").unwrap();
        assert_eq!(expr.to_string(), "b.name = 'it''s'");
    }

    #[test]
    fn test_print_rule() {
        let source = "GRANT READ UPDATE ACCESS TO Child c WHERE c.owner = CURRENT_PRINCIPAL";
        assert_eq!(parse_rule(source).unwrap().to_string(), source);
    }

    #[test]
    fn test_print_update_delete() {
        let source = "UPDATE Parent p SET p.name = 'x', p.size = p.size + 1 WHERE p.id = 1";
        assert_eq!(reprint(source), source);
        let source = "DELETE FROM Parent p WHERE p.id IN (SELECT c.id FROM Child c)";
        assert_eq!(reprint(source), source);
    }
}
