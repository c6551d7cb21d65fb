//! Abstract Syntax Tree types for queries and access rules.
//!
//! The tree is deliberately mutable: access rules are cloned and rewritten in
//! place (alias substitution, parameter expansion) before being appended to a
//! query, and the optimizer folds subtrees of the final `WHERE` clause.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A select query.
    Select(SelectStatement),
    /// A bulk update.
    Update(UpdateStatement),
    /// A bulk delete.
    Delete(DeleteStatement),
}

impl Statement {
    /// The `WHERE` condition of the statement, if any.
    pub fn where_clause(&self) -> Option<&Expr> {
        match self {
            Statement::Select(s) => s.where_clause.as_ref(),
            Statement::Update(u) => u.where_clause.as_ref(),
            Statement::Delete(d) => d.where_clause.as_ref(),
        }
    }

    /// Mutable access to the `WHERE` condition slot.
    pub fn where_clause_mut(&mut self) -> &mut Option<Expr> {
        match self {
            Statement::Select(s) => &mut s.where_clause,
            Statement::Update(u) => &mut u.where_clause,
            Statement::Delete(d) => &mut d.where_clause,
        }
    }
}

/// A `SELECT` statement. Subselects use the same type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    /// Hint comments placed directly after `SELECT`.
    pub hints: Vec<String>,
    /// Whether `DISTINCT` was given.
    pub distinct: bool,
    /// Selected expressions.
    pub select: Vec<SelectItem>,
    /// Range variable declarations.
    pub from: Vec<FromItem>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
}

impl SelectStatement {
    /// Check whether a hint comment is present (exact token match).
    pub fn has_hint(&self, hint: &str) -> bool {
        self.hints
            .iter()
            .any(|h| h.split_whitespace().any(|word| word == hint))
    }
}

/// One item of the select clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    /// Result variable (`AS name`).
    pub alias: Option<String>,
}

/// A range variable declaration with its joins.
#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub range: Range,
    pub alias: String,
    pub joins: Vec<Join>,
}

/// What a range variable ranges over.
#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    /// All instances of an entity type.
    Entity(String),
    /// Members of a collection reachable from an outer alias (subselects).
    Path(Path),
}

/// A join of a path to a new alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub fetch: bool,
    pub path: Path,
    pub alias: Option<String>,
}

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// An `ORDER BY` item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A bulk `UPDATE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub entity: String,
    pub alias: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

/// `path = value` inside `SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub path: Path,
    pub value: Expr,
}

/// A bulk `DELETE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub entity: String,
    pub alias: String,
    pub where_clause: Option<Expr>,
}

/// The kinds of access an access rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Create,
    Read,
    Update,
    Delete,
}

impl AccessType {
    /// All access types, in declaration order.
    pub const ALL: [AccessType; 4] = [
        AccessType::Create,
        AccessType::Read,
        AccessType::Update,
        AccessType::Delete,
    ];

    /// Keyword used in rule text.
    pub fn keyword(&self) -> &'static str {
        match self {
            AccessType::Create => "CREATE",
            AccessType::Read => "READ",
            AccessType::Update => "UPDATE",
            AccessType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl std::str::FromStr for AccessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(AccessType::Create),
            "READ" => Ok(AccessType::Read),
            "UPDATE" => Ok(AccessType::Update),
            "DELETE" => Ok(AccessType::Delete),
            other => Err(format!("unknown access type '{}'", other)),
        }
    }
}

/// `GRANT [access...] ACCESS TO Entity alias [WHERE condition]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRuleStatement {
    /// Granted access types; empty means all.
    pub access: Vec<AccessType>,
    /// Guarded entity type.
    pub entity: String,
    /// Alias the condition uses for the guarded instance.
    pub alias: String,
    pub where_clause: Option<Expr>,
}

/// A navigation path rooted at an identification variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    /// The identification variable the path starts from.
    pub root: String,
    /// Property names navigated from the root.
    pub segments: Vec<String>,
}

impl Path {
    /// A path consisting of a bare identification variable.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segments: Vec::new(),
        }
    }

    /// Parse a dotted path like `bean.parent.name`.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.split('.').map(|p| p.trim().to_string());
        let root = parts.next().unwrap_or_default();
        Self {
            root,
            segments: parts.collect(),
        }
    }

    /// Append a property segment.
    pub fn child(&self, segment: impl Into<String>) -> Path {
        let mut path = self.clone();
        path.segments.push(segment.into());
        path
    }

    /// The path without its last segment; `None` for a bare variable.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        let mut path = self.clone();
        path.segments.pop();
        Some(path)
    }

    /// Whether the path is just an identification variable.
    pub fn is_variable(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `prefix` is a (non-strict) prefix of this path.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.root == prefix.root
            && self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Replace the root variable with `replacement`, keeping the segments.
    pub fn rebase(&self, replacement: &Path) -> Path {
        let mut segments = replacement.segments.clone();
        segments.extend(self.segments.iter().cloned());
        Path {
            root: replacement.root.clone(),
            segments,
        }
    }
}

/// A boolean, scalar or collection expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Path(Path),
    NamedParameter(String),
    PositionalParameter(u32),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Explicit parentheses.
    Brackets(Box<Expr>),
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        lower: Box<Expr>,
        upper: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        items: InItems,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    IsEmpty {
        expr: Box<Expr>,
        negated: bool,
    },
    MemberOf {
        expr: Box<Expr>,
        collection: Path,
        negated: bool,
    },
    /// `path INSTANCE OF Type`, true for the type and all of its subtypes.
    InstanceOf {
        path: Path,
        type_name: String,
    },
    Exists(Box<SelectStatement>),
    /// A scalar subselect.
    Subselect(Box<SelectStatement>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negative(Box<Expr>),
    Function {
        function: Function,
        args: Vec<Expr>,
    },
    Trim {
        spec: TrimSpec,
        character: Option<Box<Expr>>,
        expr: Box<Expr>,
    },
    Case(CaseExpr),
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        expr: Box<Expr>,
    },
}

/// Right-hand side of `IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum InItems {
    List(Vec<Expr>),
    Subselect(Box<SelectStatement>),
}

/// `CASE [operand] WHEN ... THEN ... [ELSE ...] END`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpr {
    /// Operand of a simple case; `None` for a general case.
    pub operand: Option<Box<Expr>>,
    pub whens: Vec<WhenClause>,
    pub else_expr: Option<Box<Expr>>,
}

/// One `WHEN ... THEN ...` branch.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: Expr,
    pub result: Expr,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// Equal (=).
    Eq,
    /// Not equal (<>).
    Ne,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    Le,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    Ge,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }
}

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Upper,
    Lower,
    Concat,
    Substring,
    Length,
    Locate,
    Abs,
    Sqrt,
    Mod,
    Size,
    Coalesce,
    Nullif,
}

impl Function {
    /// Resolve a function by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Function> {
        let function = match name.to_ascii_uppercase().as_str() {
            "UPPER" => Function::Upper,
            "LOWER" => Function::Lower,
            "CONCAT" => Function::Concat,
            "SUBSTRING" => Function::Substring,
            "LENGTH" => Function::Length,
            "LOCATE" => Function::Locate,
            "ABS" => Function::Abs,
            "SQRT" => Function::Sqrt,
            "MOD" => Function::Mod,
            "SIZE" => Function::Size,
            "COALESCE" => Function::Coalesce,
            "NULLIF" => Function::Nullif,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Upper => "UPPER",
            Function::Lower => "LOWER",
            Function::Concat => "CONCAT",
            Function::Substring => "SUBSTRING",
            Function::Length => "LENGTH",
            Function::Locate => "LOCATE",
            Function::Abs => "ABS",
            Function::Sqrt => "SQRT",
            Function::Mod => "MOD",
            Function::Size => "SIZE",
            Function::Coalesce => "COALESCE",
            Function::Nullif => "NULLIF",
        }
    }

    /// Accepted argument counts (inclusive); `None` as upper bound means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Upper
            | Function::Lower
            | Function::Length
            | Function::Abs
            | Function::Sqrt
            | Function::Size => (1, Some(1)),
            Function::Mod | Function::Nullif => (2, Some(2)),
            Function::Substring | Function::Locate => (2, Some(3)),
            Function::Concat | Function::Coalesce => (2, None),
        }
    }
}

/// `TRIM` specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimSpec {
    Leading,
    Trailing,
    #[default]
    Both,
}

/// Aggregate functions (never evaluatable in memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<AggregateFunction> {
        let function = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunction::Count,
            "SUM" => AggregateFunction::Sum,
            "AVG" => AggregateFunction::Avg,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    /// Get a description of the literal type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
        }
    }
}
