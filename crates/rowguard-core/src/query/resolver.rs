//! Alias, path and type resolution for compiled statements.

use std::collections::BTreeSet;

use rowguard_lang::{
    or_all, visit, Expr, JoinKind, Path, Range, SelectStatement, Statement,
};

use crate::error::MappingError;
use crate::mapping::{MappingInformation, PropertyKind};

/// How an alias was introduced into a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub alias: String,
    /// Declared or resolved entity type.
    pub type_name: String,
    /// The navigated path for joins and path ranges.
    pub join_path: Option<Path>,
    /// Introduced by an outer join.
    pub outer: bool,
    pub fetch: bool,
}

impl TypeDefinition {
    /// A root `FROM` item.
    pub fn root(alias: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            type_name: type_name.into(),
            join_path: None,
            outer: false,
            fetch: false,
        }
    }
}

/// A selected path, optionally guarded by the condition under which it is
/// selected (`CASE WHEN c THEN p`).
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPath {
    pub path: Path,
    pub condition: Option<Expr>,
}

impl SelectedPath {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            condition: None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// A selected path together with the entity type it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedType {
    pub selected: SelectedPath,
    pub type_name: String,
}

/// Resolves aliases and paths against mapping metadata.
#[derive(Debug, Clone, Copy)]
pub struct TypeResolver<'a> {
    mapping: &'a MappingInformation,
}

impl<'a> TypeResolver<'a> {
    pub fn new(mapping: &'a MappingInformation) -> Self {
        Self { mapping }
    }

    /// Type definitions declared by the `FROM` clause of `select`.
    ///
    /// `outer` holds the definitions of enclosing statements; path ranges of
    /// a subselect are resolved against them.
    pub fn type_definitions(
        &self,
        select: &SelectStatement,
        outer: &[TypeDefinition],
    ) -> Result<Vec<TypeDefinition>, MappingError> {
        let mut scope: Vec<TypeDefinition> = outer.to_vec();
        let mut declared = Vec::new();

        for item in &select.from {
            let definition = match &item.range {
                Range::Entity(entity) => {
                    self.mapping.class_mapping(entity)?;
                    TypeDefinition::root(&item.alias, entity)
                }
                Range::Path(path) => TypeDefinition {
                    alias: item.alias.clone(),
                    type_name: self.resolve_entity_type(path, &scope)?,
                    join_path: Some(path.clone()),
                    outer: false,
                    fetch: false,
                },
            };
            declare(&mut scope, &mut declared, definition)?;

            for join in &item.joins {
                let type_name = self.resolve_entity_type(&join.path, &scope)?;
                let Some(alias) = &join.alias else {
                    continue;
                };
                let definition = TypeDefinition {
                    alias: alias.clone(),
                    type_name,
                    join_path: Some(join.path.clone()),
                    outer: join.kind == JoinKind::LeftOuter,
                    fetch: join.fetch,
                };
                declare(&mut scope, &mut declared, definition)?;
            }
        }
        Ok(declared)
    }

    /// Resolve the type a path navigates to. `None` means the path ends in a
    /// basic (non-entity) value.
    ///
    /// Inner scopes shadow outer ones: the last definition of an alias wins.
    pub fn resolve_type(
        &self,
        path: &Path,
        definitions: &[TypeDefinition],
    ) -> Result<Option<String>, MappingError> {
        let definition = definitions
            .iter()
            .rev()
            .find(|d| d.alias == path.root)
            .ok_or_else(|| MappingError::UnknownAlias(path.root.clone()))?;

        let mut current = definition.type_name.clone();
        let last = path.segments.len();
        for (index, segment) in path.segments.iter().enumerate() {
            let is_last = index + 1 == last;
            let kind = match self.mapping.property(&current, segment) {
                Ok(property) => property.kind.clone(),
                Err(_) if self.mapping.is_id_property(&current, segment) => PropertyKind::Basic,
                Err(e) => return Err(e),
            };
            match kind {
                PropertyKind::Basic if is_last => return Ok(None),
                PropertyKind::Basic => {
                    return Err(MappingError::BasicNavigation(path.to_string()));
                }
                PropertyKind::SingleValued { target } => current = target,
                PropertyKind::CollectionValued { target, .. } | PropertyKind::MapValued { target }
                    if is_last =>
                {
                    current = target
                }
                PropertyKind::CollectionValued { .. } | PropertyKind::MapValued { .. } => {
                    return Err(MappingError::CollectionNavigation(path.to_string()));
                }
            }
        }

        Ok(self.mapping.contains(&current).then_some(current))
    }

    fn resolve_entity_type(
        &self,
        path: &Path,
        definitions: &[TypeDefinition],
    ) -> Result<String, MappingError> {
        self.resolve_type(path, definitions)?
            .ok_or_else(|| MappingError::BasicNavigation(path.to_string()))
    }

    /// The entity types selected by `select`.
    ///
    /// A path ending in a basic property selects the entity owning it, so
    /// `SELECT p.name` is guarded by the rules of `p`.
    pub fn selected_types(
        &self,
        select: &SelectStatement,
        definitions: &[TypeDefinition],
    ) -> Result<Vec<SelectedType>, MappingError> {
        let mut selected: Vec<SelectedType> = Vec::new();
        for candidate in selected_paths(select) {
            let mut path = candidate.path;
            loop {
                if let Some(type_name) = self.resolve_type(&path, definitions)? {
                    let entry = SelectedType {
                        selected: SelectedPath {
                            path,
                            condition: candidate.condition,
                        },
                        type_name,
                    };
                    if !selected.contains(&entry) {
                        selected.push(entry);
                    }
                    break;
                }
                match path.parent() {
                    Some(parent) => path = parent,
                    None => break,
                }
            }
        }
        Ok(selected)
    }

    /// The selected types of a top-level statement. Updates and deletes
    /// select their single range variable.
    pub fn statement_selected_types(
        &self,
        statement: &Statement,
        definitions: &[TypeDefinition],
    ) -> Result<Vec<SelectedType>, MappingError> {
        match statement {
            Statement::Select(select) => self.selected_types(select, definitions),
            Statement::Update(update) => Ok(vec![SelectedType {
                selected: SelectedPath::new(Path::new(&update.alias)),
                type_name: update.entity.clone(),
            }]),
            Statement::Delete(delete) => Ok(vec![SelectedType {
                selected: SelectedPath::new(Path::new(&delete.alias)),
                type_name: delete.entity.clone(),
            }]),
        }
    }

    /// Type definitions of a top-level statement.
    pub fn statement_type_definitions(
        &self,
        statement: &Statement,
    ) -> Result<Vec<TypeDefinition>, MappingError> {
        match statement {
            Statement::Select(select) => self.type_definitions(select, &[]),
            Statement::Update(update) => {
                self.mapping.class_mapping(&update.entity)?;
                Ok(vec![TypeDefinition::root(&update.alias, &update.entity)])
            }
            Statement::Delete(delete) => {
                self.mapping.class_mapping(&delete.entity)?;
                Ok(vec![TypeDefinition::root(&delete.alias, &delete.entity)])
            }
        }
    }
}

fn declare(
    scope: &mut Vec<TypeDefinition>,
    declared: &mut Vec<TypeDefinition>,
    definition: TypeDefinition,
) -> Result<(), MappingError> {
    if declared.iter().any(|d| d.alias == definition.alias) {
        return Err(MappingError::AmbiguousPath(definition.alias));
    }
    scope.push(definition.clone());
    declared.push(definition);
    Ok(())
}

/// The paths selected by `select`, in selection order.
pub fn selected_paths(select: &SelectStatement) -> Vec<SelectedPath> {
    let mut paths = Vec::new();
    for item in &select.select {
        collect_selected(&item.expr, None, &mut paths);
    }
    paths
}

fn collect_selected(expr: &Expr, guard: Option<&Expr>, paths: &mut Vec<SelectedPath>) {
    match expr {
        Expr::Path(path) => {
            let selected = SelectedPath {
                path: path.clone(),
                condition: guard.cloned(),
            };
            if !paths.contains(&selected) {
                paths.push(selected);
            }
        }
        Expr::Brackets(inner) | Expr::Aggregate { expr: inner, .. } => {
            collect_selected(inner, guard, paths)
        }
        Expr::Case(case) => {
            let mut previous = Vec::new();
            for when in &case.whens {
                let condition = match &case.operand {
                    Some(operand) => Expr::equals((**operand).clone(), when.condition.clone()),
                    None => when.condition.clone(),
                };
                let guarded = conjoin(guard, condition.clone());
                collect_selected(&when.result, Some(&guarded), paths);
                previous.push(Expr::brackets(condition));
            }
            if let Some(else_expr) = &case.else_expr {
                let condition = match or_all(previous) {
                    Some(any) => Expr::not(Expr::brackets(any)),
                    None => Expr::always_true(),
                };
                let guarded = conjoin(guard, condition);
                collect_selected(else_expr, Some(&guarded), paths);
            }
        }
        _ => {}
    }
}

fn conjoin(guard: Option<&Expr>, condition: Expr) -> Expr {
    match guard {
        Some(guard) => Expr::and(Expr::brackets(guard.clone()), Expr::brackets(condition)),
        None => condition,
    }
}

/// Every alias declared anywhere in the statement, including subselects.
pub fn statement_aliases(statement: &Statement) -> BTreeSet<String> {
    let mut aliases = BTreeSet::new();
    match statement {
        Statement::Select(select) => collect_select_aliases(select, &mut aliases),
        Statement::Update(update) => {
            aliases.insert(update.alias.clone());
            for assignment in &update.assignments {
                aliases.extend(visit::declared_aliases(&assignment.value));
            }
            if let Some(condition) = &update.where_clause {
                aliases.extend(visit::declared_aliases(condition));
            }
        }
        Statement::Delete(delete) => {
            aliases.insert(delete.alias.clone());
            if let Some(condition) = &delete.where_clause {
                aliases.extend(visit::declared_aliases(condition));
            }
        }
    }
    aliases
}

fn collect_select_aliases(select: &SelectStatement, aliases: &mut BTreeSet<String>) {
    aliases.extend(visit::select_declared_aliases(select));
    visit::select_children(select, &mut |expr| {
        aliases.extend(visit::declared_aliases(expr));
    });
}
