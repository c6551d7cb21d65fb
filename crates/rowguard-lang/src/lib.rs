//! Rowguard query and access-rule language
//!
//! This crate provides the lexer, parser, syntax tree and serializer for the
//! object query language that rowguard filters, plus the access-rule syntax
//! that grants access to entities.
//!
//! # Query Syntax
//!
//! ```text
//! SELECT p FROM Parent p WHERE p.name = 'test'
//! SELECT DISTINCT c FROM Parent p LEFT OUTER JOIN p.children c
//! SELECT /* IS_ACCESSIBLE_NOCACHE */ p FROM Parent p
//!     WHERE EXISTS (SELECT c FROM p.children c WHERE c.name LIKE 'a%')
//! UPDATE Parent p SET p.name = :name WHERE p.id = ?1
//! DELETE FROM Parent p WHERE p.owner IS NULL
//! ```
//!
//! # Access Rules
//!
//! ```text
//! GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL
//! GRANT UPDATE DELETE ACCESS TO Child c WHERE c.tenant IN (CURRENT_TENANT)
//! GRANT ACCESS TO PublicDocument d
//! ```
//!
//! # Usage
//!
//! ```rust
//! use rowguard_lang::{parse, parse_rule};
//!
//! let query = parse("SELECT p FROM Parent p WHERE p.name = 'test'").unwrap();
//! let rule = parse_rule("GRANT READ ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL").unwrap();
//! assert_eq!(query.to_string(), "SELECT p FROM Parent p WHERE p.name = 'test'");
//! assert_eq!(rule.entity, "Parent");
//! ```

pub mod ast;
pub mod display;
pub mod error;
pub mod factory;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod visit;

// Re-export main types
pub use ast::{
    AccessRuleStatement, AccessType, AggregateFunction, ArithmeticOp, Assignment, CaseExpr,
    ComparisonOp, DeleteStatement, Expr, FromItem, Function, InItems, Join, JoinKind, Literal,
    OrderByItem, Path, Range, SelectItem, SelectStatement, SortDirection, Statement, TrimSpec,
    UpdateStatement, WhenClause,
};
pub use error::ParseError;
pub use factory::{and_all, or_all};
pub use lexer::tokenize;
pub use span::Span;

/// Parse a query statement.
///
/// # Example
///
/// ```rust
/// use rowguard_lang::parse;
///
/// let stmt = parse("SELECT p FROM Parent p").unwrap();
/// ```
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    parser::parse(source)
}

/// Parse an access rule.
pub fn parse_rule(source: &str) -> Result<AccessRuleStatement, ParseError> {
    parser::parse_rule(source)
}

/// Parse a standalone conditional expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    parser::parse_expression(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_print() {
        let source = "SELECT c FROM Parent p JOIN p.children c WHERE c.name = :name";
        let stmt = parse(source).unwrap();
        assert_eq!(stmt.to_string(), source);
    }

    #[test]
    fn test_parse_error_with_source() {
        let source = "SELECT p FROM Parent p WHERE p.name = = 'x'";
        let err = parse(source).unwrap_err();
        let formatted = err.format_with_source(source);
        assert!(formatted.contains("expected expression"));
        assert!(formatted.contains("line 1:"));
    }
}
