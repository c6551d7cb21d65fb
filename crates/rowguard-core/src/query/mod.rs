//! Compiled statements and their type information.

pub mod cache;
pub mod resolver;

pub use cache::{CacheStats, StatementCache};
pub use resolver::{
    selected_paths, statement_aliases, SelectedPath, SelectedType, TypeDefinition, TypeResolver,
};

use std::collections::BTreeSet;

use rowguard_lang::{Expr, Path, Statement};

use crate::error::{FilterError, MappingError};
use crate::mapping::MappingInformation;

/// A parsed statement together with the type information the filter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub statement: Statement,
    /// Paths selected by the statement, as written.
    pub selected_paths: Vec<SelectedPath>,
    /// Selected paths resolved to entity types.
    pub selected_types: Vec<SelectedType>,
    /// Aliases declared by the top-level statement.
    pub type_definitions: Vec<TypeDefinition>,
    /// Every alias declared in the statement, subselects included.
    pub aliases: BTreeSet<String>,
}

impl CompiledStatement {
    /// Parse and compile query text.
    pub fn compile(query: &str, mapping: &MappingInformation) -> Result<Self, FilterError> {
        let statement = rowguard_lang::parse(query)?;
        Ok(Self::from_statement(statement, mapping)?)
    }

    /// Compile a parsed statement.
    pub fn from_statement(
        statement: Statement,
        mapping: &MappingInformation,
    ) -> Result<Self, MappingError> {
        let resolver = TypeResolver::new(mapping);
        let type_definitions = resolver.statement_type_definitions(&statement)?;
        let selected_types = resolver.statement_selected_types(&statement, &type_definitions)?;
        let selected_paths = match &statement {
            Statement::Select(select) => selected_paths(select),
            Statement::Update(update) => vec![SelectedPath::new(Path::new(&update.alias))],
            Statement::Delete(delete) => vec![SelectedPath::new(Path::new(&delete.alias))],
        };
        let aliases = statement_aliases(&statement);
        Ok(Self {
            statement,
            selected_paths,
            selected_types,
            type_definitions,
            aliases,
        })
    }

    pub fn where_clause(&self) -> Option<&Expr> {
        self.statement.where_clause()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ClassMapping, PropertyMapping};

    #[test]
    fn test_compile_delete() {
        let mapping = MappingInformation::new()
            .with_class(ClassMapping::new("Parent").with_property(PropertyMapping::basic("name")));
        let compiled =
            CompiledStatement::compile("DELETE FROM Parent p WHERE p.name = 'x'", &mapping)
                .unwrap();
        assert_eq!(compiled.selected_paths, vec![SelectedPath::new(Path::new("p"))]);
        assert_eq!(compiled.selected_types[0].type_name, "Parent");
        assert_eq!(compiled.type_definitions, vec![TypeDefinition::root("p", "Parent")]);
        assert_eq!(compiled.where_clause().unwrap().to_string(), "p.name = 'x'");
    }
}
