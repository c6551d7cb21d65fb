//! Tree traversal and rewriting utilities.
//!
//! Traversals descend into subselects unless stated otherwise. Access rules
//! are rewritten through these helpers before being attached to a query, so
//! every path-carrying node (including `INSTANCE OF`, `MEMBER OF` and the
//! ranges of a subselect) must be reachable from here.

use crate::ast::*;

/// Call `f` on every direct child expression of `expr`.
pub fn children<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    match expr {
        Expr::Literal(_)
        | Expr::Path(_)
        | Expr::NamedParameter(_)
        | Expr::PositionalParameter(_)
        | Expr::InstanceOf { .. } => {}
        Expr::And(left, right)
        | Expr::Or(left, right)
        | Expr::Comparison { left, right, .. }
        | Expr::Arithmetic { left, right, .. } => {
            f(left);
            f(right);
        }
        Expr::Not(inner) | Expr::Brackets(inner) | Expr::Negative(inner) => f(inner),
        Expr::Between {
            expr, lower, upper, ..
        } => {
            f(expr);
            f(lower);
            f(upper);
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            f(expr);
            f(pattern);
            if let Some(escape) = escape {
                f(escape);
            }
        }
        Expr::In { expr, items, .. } => {
            f(expr);
            match items {
                InItems::List(items) => items.iter().for_each(|item| f(item)),
                InItems::Subselect(select) => select_children(select, f),
            }
        }
        Expr::IsNull { expr, .. } | Expr::IsEmpty { expr, .. } | Expr::MemberOf { expr, .. } => {
            f(expr)
        }
        Expr::Exists(select) | Expr::Subselect(select) => select_children(select, f),
        Expr::Function { args, .. } => args.iter().for_each(|arg| f(arg)),
        Expr::Trim {
            character, expr, ..
        } => {
            if let Some(character) = character {
                f(character);
            }
            f(expr);
        }
        Expr::Case(case) => {
            if let Some(operand) = &case.operand {
                f(operand);
            }
            for when in &case.whens {
                f(&when.condition);
                f(&when.result);
            }
            if let Some(else_expr) = &case.else_expr {
                f(else_expr);
            }
        }
        Expr::Aggregate { expr, .. } => f(expr),
    }
}

/// Call `f` on every top-level expression of a select statement.
pub fn select_children<'a>(select: &'a SelectStatement, f: &mut dyn FnMut(&'a Expr)) {
    for item in &select.select {
        f(&item.expr);
    }
    if let Some(condition) = &select.where_clause {
        f(condition);
    }
    for expr in &select.group_by {
        f(expr);
    }
    if let Some(having) = &select.having {
        f(having);
    }
    for item in &select.order_by {
        f(&item.expr);
    }
}

/// Mutable counterpart of [`children`].
pub fn children_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    match expr {
        Expr::Literal(_)
        | Expr::Path(_)
        | Expr::NamedParameter(_)
        | Expr::PositionalParameter(_)
        | Expr::InstanceOf { .. } => {}
        Expr::And(left, right)
        | Expr::Or(left, right)
        | Expr::Comparison { left, right, .. }
        | Expr::Arithmetic { left, right, .. } => {
            f(left);
            f(right);
        }
        Expr::Not(inner) | Expr::Brackets(inner) | Expr::Negative(inner) => f(inner),
        Expr::Between {
            expr, lower, upper, ..
        } => {
            f(expr);
            f(lower);
            f(upper);
        }
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            f(expr);
            f(pattern);
            if let Some(escape) = escape {
                f(escape);
            }
        }
        Expr::In { expr, items, .. } => {
            f(expr);
            match items {
                InItems::List(items) => items.iter_mut().for_each(|item| f(item)),
                InItems::Subselect(select) => select_children_mut(select, f),
            }
        }
        Expr::IsNull { expr, .. } | Expr::IsEmpty { expr, .. } | Expr::MemberOf { expr, .. } => {
            f(expr)
        }
        Expr::Exists(select) | Expr::Subselect(select) => select_children_mut(select, f),
        Expr::Function { args, .. } => args.iter_mut().for_each(|arg| f(arg)),
        Expr::Trim {
            character, expr, ..
        } => {
            if let Some(character) = character {
                f(character);
            }
            f(expr);
        }
        Expr::Case(case) => {
            if let Some(operand) = &mut case.operand {
                f(operand);
            }
            for when in &mut case.whens {
                f(&mut when.condition);
                f(&mut when.result);
            }
            if let Some(else_expr) = &mut case.else_expr {
                f(else_expr);
            }
        }
        Expr::Aggregate { expr, .. } => f(expr),
    }
}

/// Mutable counterpart of [`select_children`].
pub fn select_children_mut(select: &mut SelectStatement, f: &mut dyn FnMut(&mut Expr)) {
    for item in &mut select.select {
        f(&mut item.expr);
    }
    if let Some(condition) = &mut select.where_clause {
        f(condition);
    }
    for expr in &mut select.group_by {
        f(expr);
    }
    if let Some(having) = &mut select.having {
        f(having);
    }
    for item in &mut select.order_by {
        f(&mut item.expr);
    }
}

/// Pre-order walk over `expr` and all of its descendants.
pub fn for_each_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(expr);
    children(expr, &mut |child| for_each_expr(child, f));
}

/// Call `f` on every path in `expr`, including range and join paths of
/// subselects.
pub fn for_each_path<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Path)) {
    match expr {
        Expr::Path(path) => f(path),
        Expr::InstanceOf { path, .. } => f(path),
        Expr::MemberOf {
            expr, collection, ..
        } => {
            for_each_path(expr, f);
            f(collection);
        }
        Expr::Exists(select) | Expr::Subselect(select) => for_each_select_path(select, f),
        Expr::In {
            expr,
            items: InItems::Subselect(select),
            ..
        } => {
            for_each_path(expr, f);
            for_each_select_path(select, f);
        }
        _ => children(expr, &mut |child| for_each_path(child, f)),
    }
}

/// Call `f` on every path of a select statement.
pub fn for_each_select_path<'a>(select: &'a SelectStatement, f: &mut dyn FnMut(&'a Path)) {
    for item in &select.from {
        if let Range::Path(path) = &item.range {
            f(path);
        }
        for join in &item.joins {
            f(&join.path);
        }
    }
    select_children(select, &mut |child| for_each_path(child, f));
}

/// Mutable counterpart of [`for_each_path`].
pub fn visit_paths_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut Path)) {
    match expr {
        Expr::Path(path) => f(path),
        Expr::InstanceOf { path, .. } => f(path),
        Expr::MemberOf {
            expr, collection, ..
        } => {
            visit_paths_mut(expr, f);
            f(collection);
        }
        Expr::Exists(select) | Expr::Subselect(select) => visit_select_paths_mut(select, f),
        Expr::In {
            expr,
            items: InItems::Subselect(select),
            ..
        } => {
            visit_paths_mut(expr, f);
            visit_select_paths_mut(select, f);
        }
        _ => children_mut(expr, &mut |child| visit_paths_mut(child, f)),
    }
}

/// Mutable counterpart of [`for_each_select_path`].
pub fn visit_select_paths_mut(select: &mut SelectStatement, f: &mut dyn FnMut(&mut Path)) {
    for item in &mut select.from {
        if let Range::Path(path) = &mut item.range {
            f(path);
        }
        for join in &mut item.joins {
            f(&mut join.path);
        }
    }
    select_children_mut(select, &mut |child| visit_paths_mut(child, f));
}

/// Top-down rewrite: where `f` returns a replacement the subtree is replaced
/// and not visited further; otherwise children are rewritten.
pub fn rewrite(expr: &mut Expr, f: &mut dyn FnMut(&Expr) -> Option<Expr>) {
    if let Some(replacement) = f(expr) {
        *expr = replacement;
        return;
    }
    children_mut(expr, &mut |child| rewrite(child, f));
}

/// Replace every subtree equal to `old` with a clone of `new`.
pub fn replace(expr: &mut Expr, old: &Expr, new: &Expr) {
    rewrite(expr, &mut |e| (e == old).then(|| new.clone()));
}

/// Aliases declared by the subselects nested in `expr`, in declaration order.
pub fn declared_aliases(expr: &Expr) -> Vec<String> {
    let mut aliases = Vec::new();
    for_each_expr(expr, &mut |e| {
        let select = match e {
            Expr::Exists(select) | Expr::Subselect(select) => select,
            Expr::In {
                items: InItems::Subselect(select),
                ..
            } => select,
            _ => return,
        };
        for alias in select_declared_aliases(select) {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
    });
    aliases
}

/// Aliases declared directly in the `FROM` clause of `select`.
pub fn select_declared_aliases(select: &SelectStatement) -> Vec<String> {
    let mut aliases = Vec::new();
    for item in &select.from {
        aliases.push(item.alias.clone());
        for join in &item.joins {
            if let Some(alias) = &join.alias {
                aliases.push(alias.clone());
            }
        }
    }
    aliases
}

/// Rename an identification variable everywhere in `expr`, including its
/// declarations in subselects.
pub fn rename_variable(expr: &mut Expr, from: &str, to: &str) {
    visit_paths_mut(expr, &mut |path| {
        if path.root == from {
            path.root = to.to_string();
        }
    });
    for_each_subselect_mut(expr, &mut |select| rename_declarations(select, from, to));
}

fn rename_declarations(select: &mut SelectStatement, from: &str, to: &str) {
    for item in &mut select.from {
        if item.alias == from {
            item.alias = to.to_string();
        }
        for join in &mut item.joins {
            if join.alias.as_deref() == Some(from) {
                join.alias = Some(to.to_string());
            }
        }
    }
    select_children_mut(select, &mut |child| {
        for_each_subselect_mut(child, &mut |s| rename_declarations(s, from, to))
    });
}

/// Replace the identification variable `alias` with `replacement` in every
/// path of `expr` (`c.name` becomes `bean.children.name` for replacement
/// `bean.children`).
pub fn substitute_variable(expr: &mut Expr, alias: &str, replacement: &Path) {
    visit_paths_mut(expr, &mut |path| {
        if path.root == alias {
            *path = path.rebase(replacement);
        }
    });
}

/// Call `f` on each outermost subselect of `expr`. Nested subselects are not
/// visited; `f` can recurse on its own.
pub fn for_each_subselect_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut SelectStatement)) {
    match expr {
        Expr::Exists(select) | Expr::Subselect(select) => f(select),
        Expr::In {
            expr,
            items: InItems::Subselect(select),
            ..
        } => {
            for_each_subselect_mut(expr, f);
            f(select);
        }
        _ => children_mut(expr, &mut |child| for_each_subselect_mut(child, f)),
    }
}

/// Immutable counterpart of [`for_each_subselect_mut`].
pub fn for_each_subselect<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a SelectStatement)) {
    match expr {
        Expr::Exists(select) | Expr::Subselect(select) => f(select),
        Expr::In {
            expr,
            items: InItems::Subselect(select),
            ..
        } => {
            for_each_subselect(expr, f);
            f(select);
        }
        _ => children(expr, &mut |child| for_each_subselect(child, f)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_for_each_path_reaches_subselects() {
        let expr = parse_expression(
            "c.owner = CURRENT_PRINCIPAL AND EXISTS (SELECT x FROM c.parent.children x WHERE x INSTANCE OF Child)",
        )
        .unwrap();
        let mut paths = Vec::new();
        for_each_path(&expr, &mut |p| paths.push(p.to_string()));
        assert_eq!(
            paths,
            vec![
                "c.owner",
                "CURRENT_PRINCIPAL",
                "c.parent.children",
                "x",
                "x",
            ]
        );
    }

    #[test]
    fn test_substitute_variable() {
        let mut expr =
            parse_expression("c.name = 'x' AND :p MEMBER OF c.children AND c INSTANCE OF Child")
                .unwrap();
        substitute_variable(&mut expr, "c", &Path::parse("bean.parent"));
        assert_eq!(
            expr.to_string(),
            "bean.parent.name = 'x' AND :p MEMBER OF bean.parent.children AND bean.parent INSTANCE OF Child"
        );
    }

    #[test]
    fn test_rename_variable_renames_declarations() {
        let mut expr =
            parse_expression("EXISTS (SELECT x FROM Child x WHERE x.parent = c)").unwrap();
        assert_eq!(declared_aliases(&expr), vec!["x".to_string()]);
        rename_variable(&mut expr, "x", "x0");
        assert_eq!(
            expr.to_string(),
            "EXISTS (SELECT x0 FROM Child x0 WHERE x0.parent = c)"
        );
        assert_eq!(declared_aliases(&expr), vec!["x0".to_string()]);
    }

    #[test]
    fn test_rename_variable_reaches_every_clause() {
        let mut expr = parse_expression(
            "EXISTS (SELECT x FROM Child x GROUP BY x.name \
             HAVING EXISTS (SELECT y FROM Child y) \
             ORDER BY (SELECT z.name FROM Child z WHERE z = x))",
        )
        .unwrap();
        rename_variable(&mut expr, "y", "y0");
        rename_variable(&mut expr, "z", "z0");
        assert_eq!(declared_aliases(&expr), vec!["x", "y0", "z0"]);

        let text = expr.to_string();
        assert!(text.contains("(SELECT y0 FROM Child y0)"));
        assert!(text.contains("(SELECT z0.name FROM Child z0 WHERE z0 = x)"));
    }

    #[test]
    fn test_rewrite_replaces_whole_subtrees() {
        let mut expr = parse_expression("b.a = 1 AND (b.b = 2 OR b.a = 1)").unwrap();
        let old = parse_expression("b.a = 1").unwrap();
        replace(&mut expr, &old, &Expr::always_true());
        assert_eq!(
            expr.to_string(),
            "TRUE = TRUE AND (b.b = 2 OR TRUE = TRUE)"
        );
    }

    #[test]
    fn test_for_each_subselect_outermost_only() {
        let mut expr = parse_expression(
            "EXISTS (SELECT x FROM Child x WHERE x.id IN (SELECT y.id FROM Child y)) OR b.id IN (SELECT z.id FROM Child z)",
        )
        .unwrap();
        let mut count = 0;
        for_each_subselect_mut(&mut expr, &mut |_| count += 1);
        assert_eq!(count, 2);
    }
}
