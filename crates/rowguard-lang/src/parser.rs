//! Recursive descent parser for queries and access rules.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::Span;

/// Parser for the query language.
pub struct Parser<'source> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    source: &'source str,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            source,
        })
    }

    /// Parse a complete statement.
    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let statement = match self.peek().map(|t| &t.token) {
            Some(Token::Select) => Statement::Select(self.parse_select()?),
            Some(Token::Update) => Statement::Update(self.parse_update()?),
            Some(Token::Delete) => Statement::Delete(self.parse_delete()?),
            _ => {
                let tok = self.next_token()?;
                return Err(ParseError::new(
                    format!("expected SELECT, UPDATE or DELETE, found {:?}", tok.token),
                    tok.span,
                ));
            }
        };
        self.expect_end()?;
        Ok(statement)
    }

    /// Parse a complete access rule.
    pub fn parse_access_rule(&mut self) -> Result<AccessRuleStatement, ParseError> {
        self.expect_token(Token::Grant)?;

        let mut access = Vec::new();
        loop {
            let access_type = match self.peek().map(|t| &t.token) {
                Some(Token::Create) => AccessType::Create,
                Some(Token::Read) => AccessType::Read,
                Some(Token::Update) => AccessType::Update,
                Some(Token::Delete) => AccessType::Delete,
                _ => break,
            };
            self.next_token()?;
            if !access.contains(&access_type) {
                access.push(access_type);
            }
        }

        self.expect_token(Token::Access).map_err(|e| {
            e.with_hint("access types are CREATE, READ, UPDATE and DELETE")
        })?;
        self.expect_token(Token::To)?;
        let entity = self.expect_ident()?;
        self.eat(&Token::As);
        let alias = self
            .expect_ident()
            .map_err(|e| e.with_hint("an access rule needs an alias for the guarded entity"))?;

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_end()?;

        Ok(AccessRuleStatement {
            access,
            entity,
            alias,
            where_clause,
        })
    }

    /// Parse a select statement, including subselects.
    fn parse_select(&mut self) -> Result<SelectStatement, ParseError> {
        self.expect_token(Token::Select)?;
        let hints = self.take_hints();
        let distinct = self.eat(&Token::Distinct);

        let mut select = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let alias = if self.eat(&Token::As) || self.check(&Token::Ident(String::new())) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            select.push(SelectItem { expr, alias });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect_token(Token::From)?;
        let mut from = vec![self.parse_from_item()?];
        while self.eat(&Token::Comma) {
            from.push(self.parse_from_item()?);
        }

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat(&Token::Group) {
            self.expect_token(Token::By)?;
            loop {
                group_by.push(self.parse_additive()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let having = if self.eat(&Token::Having) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat(&Token::Order) {
            self.expect_token(Token::By)?;
            loop {
                let expr = self.parse_additive()?;
                let direction = if self.eat(&Token::Desc) {
                    SortDirection::Desc
                } else {
                    self.eat(&Token::Asc);
                    SortDirection::Asc
                };
                order_by.push(OrderByItem { expr, direction });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        Ok(SelectStatement {
            hints,
            distinct,
            select,
            from,
            where_clause,
            group_by,
            having,
            order_by,
        })
    }

    /// Parse one range variable declaration with its joins.
    fn parse_from_item(&mut self) -> Result<FromItem, ParseError> {
        let range = if self.check(&Token::In) {
            // IN(path) alias
            self.next_token()?;
            self.expect_token(Token::LParen)?;
            let path = self.parse_path()?;
            self.expect_token(Token::RParen)?;
            Range::Path(path)
        } else if self.peek_nth(1) == Some(&Token::Dot) {
            Range::Path(self.parse_path()?)
        } else {
            Range::Entity(self.expect_ident()?)
        };

        self.eat(&Token::As);
        let alias = self
            .expect_ident()
            .map_err(|e| e.with_hint("range variables must be given an alias"))?;

        let mut joins = Vec::new();
        loop {
            let kind = match self.peek().map(|t| &t.token) {
                Some(Token::Join) => JoinKind::Inner,
                Some(Token::Inner) => {
                    self.next_token()?;
                    JoinKind::Inner
                }
                Some(Token::Left) => {
                    self.next_token()?;
                    self.eat(&Token::Outer);
                    JoinKind::LeftOuter
                }
                _ => break,
            };
            self.expect_token(Token::Join)?;
            let fetch = self.eat(&Token::Fetch);
            let path = self.parse_path()?;
            let alias = if self.eat(&Token::As) || self.check(&Token::Ident(String::new())) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            joins.push(Join {
                kind,
                fetch,
                path,
                alias,
            });
        }

        Ok(FromItem { range, alias, joins })
    }

    fn parse_update(&mut self) -> Result<UpdateStatement, ParseError> {
        self.expect_token(Token::Update)?;
        let entity = self.expect_ident()?;
        self.eat(&Token::As);
        let alias = self.expect_ident()?;
        self.expect_token(Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let path = self.parse_path()?;
            self.expect_token(Token::Eq)?;
            let value = self.parse_additive()?;
            assignments.push(Assignment { path, value });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            entity,
            alias,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement, ParseError> {
        self.expect_token(Token::Delete)?;
        self.expect_token(Token::From)?;
        let entity = self.expect_ident()?;
        self.eat(&Token::As);
        let alias = self.expect_ident()?;
        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(DeleteStatement {
            entity,
            alias,
            where_clause,
        })
    }

    /// Parse a conditional expression.
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    /// Parse a simple conditional expression (comparison, BETWEEN, LIKE, ...).
    fn parse_predicate(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Exists) {
            self.expect_token(Token::LParen)?;
            let subselect = self.parse_select()?;
            self.expect_token(Token::RParen)?;
            return Ok(Expr::Exists(Box::new(subselect)));
        }

        let left = self.parse_additive()?;

        // NOT BETWEEN / NOT LIKE / NOT IN / NOT MEMBER / NOT INSTANCE
        let negated = self.check(&Token::Not)
            && matches!(
                self.peek_nth(1),
                Some(Token::Between | Token::Like | Token::In | Token::Member | Token::Instance)
            );
        if negated {
            self.next_token()?;
        }

        let Some((token, span)) = self.peek().map(|t| (t.token.clone(), t.span)) else {
            return Ok(left);
        };
        let op = match token {
            Token::Eq => Some(ComparisonOp::Eq),
            Token::Ne => Some(ComparisonOp::Ne),
            Token::Lt => Some(ComparisonOp::Lt),
            Token::Le => Some(ComparisonOp::Le),
            Token::Gt => Some(ComparisonOp::Gt),
            Token::Ge => Some(ComparisonOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.next_token()?;
            let right = self.parse_additive()?;
            return Ok(Expr::Comparison {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        match token {
            Token::Between => {
                self.next_token()?;
                let lower = self.parse_additive()?;
                self.expect_token(Token::And)?;
                let upper = self.parse_additive()?;
                Ok(Expr::Between {
                    expr: Box::new(left),
                    lower: Box::new(lower),
                    upper: Box::new(upper),
                    negated,
                })
            }
            Token::Like => {
                self.next_token()?;
                let pattern = self.parse_additive()?;
                let escape = if self.eat(&Token::Escape) {
                    Some(Box::new(self.parse_additive()?))
                } else {
                    None
                };
                Ok(Expr::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    escape,
                    negated,
                })
            }
            Token::In => {
                self.next_token()?;
                let items = self.parse_in_items()?;
                Ok(Expr::In {
                    expr: Box::new(left),
                    items,
                    negated,
                })
            }
            Token::Member => {
                self.next_token()?;
                self.eat(&Token::Of);
                let collection = self.parse_path()?;
                Ok(Expr::MemberOf {
                    expr: Box::new(left),
                    collection,
                    negated,
                })
            }
            Token::Instance => {
                self.next_token()?;
                self.expect_token(Token::Of)?;
                let type_name = self.expect_ident()?;
                let Expr::Path(path) = left else {
                    return Err(ParseError::new(
                        "INSTANCE OF requires a path on its left side",
                        span,
                    ));
                };
                let expr = Expr::InstanceOf { path, type_name };
                if negated {
                    Ok(Expr::Not(Box::new(expr)))
                } else {
                    Ok(expr)
                }
            }
            Token::Is => {
                self.next_token()?;
                let negated = self.eat(&Token::Not);
                let tok = self.next_token()?;
                match tok.token {
                    Token::Null => Ok(Expr::IsNull {
                        expr: Box::new(left),
                        negated,
                    }),
                    Token::Empty => Ok(Expr::IsEmpty {
                        expr: Box::new(left),
                        negated,
                    }),
                    other => Err(ParseError::new(
                        format!("expected NULL or EMPTY after IS, found {:?}", other),
                        tok.span,
                    )),
                }
            }
            _ => Ok(left),
        }
    }

    /// Parse the right-hand side of `IN`.
    fn parse_in_items(&mut self) -> Result<InItems, ParseError> {
        match self.peek().map(|t| &t.token) {
            Some(Token::NamedParameter(_) | Token::PositionalParameter(_)) => {
                Ok(InItems::List(vec![self.parse_primary()?]))
            }
            _ => {
                self.expect_token(Token::LParen)?;
                if self.check(&Token::Select) {
                    let subselect = self.parse_select()?;
                    self.expect_token(Token::RParen)?;
                    return Ok(InItems::Subselect(Box::new(subselect)));
                }
                let mut items = vec![self.parse_additive()?];
                while self.eat(&Token::Comma) {
                    items.push(self.parse_additive()?);
                }
                self.expect_token(Token::RParen)?;
                Ok(InItems::List(items))
            }
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Subtract,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Star) => ArithmeticOp::Multiply,
                Some(Token::Slash) => ArithmeticOp::Divide,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            return match self.parse_unary()? {
                Expr::Literal(Literal::Int(i)) => Ok(Expr::Literal(Literal::Int(-i))),
                Expr::Literal(Literal::Float(f)) => Ok(Expr::Literal(Literal::Float(-f))),
                other => Ok(Expr::Negative(Box::new(other))),
            };
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(self.end_of_input());
        };
        let span = tok.span;

        match tok.token.clone() {
            Token::Int(i) => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Token::Float(f) => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Token::String(s) => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::True => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Token::False => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Token::Null => {
                self.next_token()?;
                Ok(Expr::Literal(Literal::Null))
            }
            Token::NamedParameter(name) => {
                self.next_token()?;
                Ok(Expr::NamedParameter(name))
            }
            Token::PositionalParameter(index) => {
                self.next_token()?;
                Ok(Expr::PositionalParameter(index))
            }
            Token::LParen => {
                self.next_token()?;
                if self.check(&Token::Select) {
                    let subselect = self.parse_select()?;
                    self.expect_token(Token::RParen)?;
                    return Ok(Expr::Subselect(Box::new(subselect)));
                }
                let inner = self.parse_expr()?;
                self.expect_token(Token::RParen)?;
                Ok(Expr::Brackets(Box::new(inner)))
            }
            Token::Case => self.parse_case(),
            Token::Ident(name) if self.peek_nth(1) == Some(&Token::LParen) => {
                self.parse_function_call(&name, span)
            }
            Token::Ident(_) => Ok(Expr::Path(self.parse_path()?)),
            other => Err(ParseError::new(
                format!("expected expression, found {:?}", other),
                span,
            )),
        }
    }

    /// Parse `name(args...)` for scalar functions, aggregates and `TRIM`.
    fn parse_function_call(&mut self, name: &str, span: Span) -> Result<Expr, ParseError> {
        self.next_token()?; // name
        self.expect_token(Token::LParen)?;

        if name.eq_ignore_ascii_case("TRIM") {
            return self.parse_trim();
        }

        if let Some(function) = AggregateFunction::from_name(name) {
            let distinct = self.eat(&Token::Distinct);
            let expr = self.parse_additive()?;
            self.expect_token(Token::RParen)?;
            return Ok(Expr::Aggregate {
                function,
                distinct,
                expr: Box::new(expr),
            });
        }

        let Some(function) = Function::from_name(name) else {
            return Err(
                ParseError::new(format!("unknown function '{}'", name), span).with_hint(
                    "supported functions are UPPER, LOWER, CONCAT, SUBSTRING, TRIM, LENGTH, \
                     LOCATE, ABS, SQRT, MOD, SIZE, COALESCE and NULLIF",
                ),
            );
        };

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect_token(Token::RParen)?;

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(ParseError::new(
                format!(
                    "{} takes {} argument(s), found {}",
                    function.name(),
                    match max {
                        Some(max) if max == min => min.to_string(),
                        Some(max) => format!("{} to {}", min, max),
                        None => format!("at least {}", min),
                    },
                    args.len()
                ),
                span.merge(end.span),
            ));
        }

        Ok(Expr::Function { function, args })
    }

    /// Parse the inside of `TRIM([LEADING|TRAILING|BOTH] [char] FROM expr)`.
    fn parse_trim(&mut self) -> Result<Expr, ParseError> {
        let spec = match self.peek().map(|t| &t.token) {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("LEADING") => {
                Some(TrimSpec::Leading)
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("TRAILING") => {
                Some(TrimSpec::Trailing)
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("BOTH") => Some(TrimSpec::Both),
            _ => None,
        };

        let (spec, character, expr) = if let Some(spec) = spec {
            self.next_token()?;
            let character = if self.check(&Token::From) {
                None
            } else {
                Some(Box::new(self.parse_primary()?))
            };
            self.expect_token(Token::From)?;
            (spec, character, self.parse_additive()?)
        } else {
            let first = self.parse_additive()?;
            if self.eat(&Token::From) {
                (TrimSpec::Both, Some(Box::new(first)), self.parse_additive()?)
            } else {
                (TrimSpec::Both, None, first)
            }
        };
        self.expect_token(Token::RParen)?;

        Ok(Expr::Trim {
            spec,
            character,
            expr: Box::new(expr),
        })
    }

    fn parse_case(&mut self) -> Result<Expr, ParseError> {
        self.expect_token(Token::Case)?;
        let operand = if self.check(&Token::When) {
            None
        } else {
            Some(Box::new(self.parse_additive()?))
        };

        let mut whens = Vec::new();
        while self.eat(&Token::When) {
            let condition = if operand.is_some() {
                self.parse_additive()?
            } else {
                self.parse_expr()?
            };
            self.expect_token(Token::Then)?;
            let result = self.parse_expr()?;
            whens.push(WhenClause { condition, result });
        }
        if whens.is_empty() {
            let tok = self.next_token()?;
            return Err(ParseError::new(
                format!("expected WHEN, found {:?}", tok.token),
                tok.span,
            ));
        }

        let else_expr = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_token(Token::End)?;

        Ok(Expr::Case(CaseExpr {
            operand,
            whens,
            else_expr,
        }))
    }

    /// Parse a dotted path. Segments after the root may be keywords.
    fn parse_path(&mut self) -> Result<Path, ParseError> {
        let root = self.expect_ident()?;
        let mut segments = Vec::new();
        while self.check(&Token::Dot) {
            self.next_token()?;
            let tok = self.next_token()?;
            if !tok.token.is_word() {
                return Err(ParseError::new(
                    format!("expected property name, found {:?}", tok.token),
                    tok.span,
                ));
            }
            segments.push(tok.span.slice(self.source).to_string());
        }
        Ok(Path { root, segments })
    }

    /// Collect hint comments at the current position.
    fn take_hints(&mut self) -> Vec<String> {
        let mut hints = Vec::new();
        while let Some(SpannedToken {
            token: Token::Comment(text),
            ..
        }) = self.tokens.get(self.pos)
        {
            hints.push(text.clone());
            self.pos += 1;
        }
        hints
    }

    /// Peek at the next non-comment token.
    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens[self.pos..]
            .iter()
            .find(|t| !matches!(t.token, Token::Comment(_)))
    }

    /// Peek `n` non-comment tokens ahead (0 is the next token).
    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens[self.pos..]
            .iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .nth(n)
            .map(|t| &t.token)
    }

    /// Check whether the next token has the same kind as `expected`.
    fn check(&self, expected: &Token) -> bool {
        self.peek().is_some_and(|t| {
            std::mem::discriminant(&t.token) == std::mem::discriminant(expected)
        })
    }

    /// Consume the next token if it has the same kind as `expected`.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos_after_next();
            true
        } else {
            false
        }
    }

    /// Expect and consume an identifier.
    fn expect_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(name),
            _ => Err(ParseError::new(
                format!("expected identifier, found {:?}", tok.token),
                tok.span,
            )),
        }
    }

    /// Expect and consume a specific token.
    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("expected {:?}, found {:?}", expected, tok.token),
                tok.span,
            ))
        }
    }

    /// Expect that all input has been consumed.
    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(ParseError::new(
                format!("unexpected trailing input {:?}", tok.token),
                tok.span,
            )),
        }
    }

    /// Get the next token or error if EOF.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        let tok = self.peek().cloned().ok_or_else(|| self.end_of_input())?;
        self.pos_after_next();
        Ok(tok)
    }

    /// Advance past the next non-comment token.
    fn pos_after_next(&mut self) {
        while let Some(tok) = self.tokens.get(self.pos) {
            self.pos += 1;
            if !matches!(tok.token, Token::Comment(_)) {
                break;
            }
        }
    }

    fn end_of_input(&self) -> ParseError {
        ParseError::new("unexpected end of input", Span::at(self.source.len()))
    }
}

/// Parse a query statement.
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    Parser::new(source)?.parse_statement()
}

/// Parse an access rule.
pub fn parse_rule(source: &str) -> Result<AccessRuleStatement, ParseError> {
    Parser::new(source)?.parse_access_rule()
}

/// Parse a standalone conditional expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn select(source: &str) -> SelectStatement {
        match parse(source).unwrap() {
            Statement::Select(select) => select,
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let select = select("SELECT bean FROM Parent bean");
        assert_eq!(select.select.len(), 1);
        assert_eq!(select.select[0].expr, Expr::Path(Path::new("bean")));
        assert_eq!(select.from[0].range, Range::Entity("Parent".to_string()));
        assert_eq!(select.from[0].alias, "bean");
        assert!(select.where_clause.is_none());
    }

    #[test]
    fn test_parse_where_precedence() {
        let select = select("SELECT b FROM Bean b WHERE b.a = 1 OR b.b = 2 AND NOT b.c = 3");
        let Some(Expr::Or(left, right)) = select.where_clause else {
            panic!("expected OR at the top");
        };
        assert!(matches!(*left, Expr::Comparison { op: ComparisonOp::Eq, .. }));
        let Expr::And(_, not) = *right else {
            panic!("expected AND on the right");
        };
        assert!(matches!(*not, Expr::Not(_)));
    }

    #[test]
    fn test_parse_hints() {
        let select = select("SELECT /* IS_ACCESSIBLE_NOCACHE */ b FROM Bean b");
        assert_eq!(select.hints, vec!["IS_ACCESSIBLE_NOCACHE".to_string()]);
        assert!(select.has_hint("IS_ACCESSIBLE_NOCACHE"));
    }

    #[test]
    fn test_parse_joins() {
        let select = select(
            "SELECT p FROM Parent p LEFT OUTER JOIN FETCH p.children c INNER JOIN p.owner o",
        );
        let joins = &select.from[0].joins;
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].kind, JoinKind::LeftOuter);
        assert!(joins[0].fetch);
        assert_eq!(joins[0].path, Path::parse("p.children"));
        assert_eq!(joins[0].alias.as_deref(), Some("c"));
        assert_eq!(joins[1].kind, JoinKind::Inner);
        assert!(!joins[1].fetch);
    }

    #[test]
    fn test_parse_keyword_path_segment() {
        let select = select("SELECT b FROM Bean b WHERE b.order.Type = 'x'");
        let Some(Expr::Comparison { left, .. }) = select.where_clause else {
            panic!("expected comparison");
        };
        assert_eq!(*left, Expr::Path(Path::parse("b.order.Type")));
    }

    #[test]
    fn test_parse_exists_with_path_range() {
        let select = select(
            "SELECT p FROM Parent p WHERE EXISTS (SELECT c FROM p.children c WHERE c.name = 'test')",
        );
        let Some(Expr::Exists(subselect)) = select.where_clause else {
            panic!("expected EXISTS");
        };
        assert_eq!(subselect.from[0].range, Range::Path(Path::parse("p.children")));
        assert_eq!(subselect.from[0].alias, "c");
    }

    #[test]
    fn test_parse_in_forms() {
        let expr = parse_expression("b.role IN ('a', 'b')").unwrap();
        assert!(matches!(
            expr,
            Expr::In { items: InItems::List(ref items), negated: false, .. } if items.len() == 2
        ));

        let expr = parse_expression("b.role NOT IN (CURRENT_ROLES)").unwrap();
        let Expr::In { items: InItems::List(items), negated: true, .. } = expr else {
            panic!("expected NOT IN");
        };
        assert_eq!(items, vec![Expr::Path(Path::new("CURRENT_ROLES"))]);

        let expr = parse_expression("b.role IN :roles").unwrap();
        assert!(matches!(expr, Expr::In { items: InItems::List(_), .. }));

        let expr = parse_expression("b.id IN (SELECT c.id FROM Child c)").unwrap();
        assert!(matches!(expr, Expr::In { items: InItems::Subselect(_), .. }));
    }

    #[test]
    fn test_parse_predicates() {
        assert!(matches!(
            parse_expression("b.age NOT BETWEEN 1 AND 10").unwrap(),
            Expr::Between { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("b.name LIKE 'a\\_%' ESCAPE '\\'").unwrap(),
            Expr::Like { escape: Some(_), negated: false, .. }
        ));
        assert!(matches!(
            parse_expression("b.parent IS NOT NULL").unwrap(),
            Expr::IsNull { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("b.children IS EMPTY").unwrap(),
            Expr::IsEmpty { negated: false, .. }
        ));
        assert!(matches!(
            parse_expression(":child MEMBER OF b.children").unwrap(),
            Expr::MemberOf { negated: false, .. }
        ));
        assert_eq!(
            parse_expression("b INSTANCE OF Child").unwrap(),
            Expr::InstanceOf {
                path: Path::new("b"),
                type_name: "Child".to_string()
            }
        );
    }

    #[test]
    fn test_parse_functions_and_case() {
        assert!(matches!(
            parse_expression("UPPER(b.name) = 'X'").unwrap(),
            Expr::Comparison { .. }
        ));
        assert!(matches!(
            parse_expression("TRIM(LEADING 'x' FROM b.name)").unwrap(),
            Expr::Trim { spec: TrimSpec::Leading, character: Some(_), .. }
        ));
        assert!(matches!(
            parse_expression("CASE WHEN b.a = 1 THEN 'one' ELSE 'other' END").unwrap(),
            Expr::Case(CaseExpr { operand: None, .. })
        ));
        assert!(matches!(
            parse_expression("COUNT(DISTINCT b.id)").unwrap(),
            Expr::Aggregate { function: AggregateFunction::Count, distinct: true, .. }
        ));
    }

    #[test]
    fn test_parse_negative_literal() {
        assert_eq!(
            parse_expression("-5").unwrap(),
            Expr::Literal(Literal::Int(-5))
        );
        assert!(matches!(parse_expression("-b.x").unwrap(), Expr::Negative(_)));
    }

    #[test]
    fn test_function_arity_error() {
        let err = parse_expression("UPPER(b.a, b.b)").unwrap_err();
        assert!(err.message.contains("UPPER takes 1 argument(s)"));

        let err = parse_expression("FROB(b.a)").unwrap_err();
        assert!(err.message.contains("unknown function"));
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_parse_update_and_delete() {
        let Statement::Update(update) =
            parse("UPDATE Parent p SET p.name = 'x' WHERE p.id = 1").unwrap()
        else {
            panic!("expected Update");
        };
        assert_eq!(update.entity, "Parent");
        assert_eq!(update.assignments.len(), 1);
        assert!(update.where_clause.is_some());

        let Statement::Delete(delete) = parse("DELETE FROM Parent p").unwrap() else {
            panic!("expected Delete");
        };
        assert_eq!(delete.alias, "p");
        assert!(delete.where_clause.is_none());
    }

    #[test]
    fn test_parse_access_rule() {
        let rule =
            parse_rule("GRANT READ UPDATE ACCESS TO Child c WHERE c.owner = CURRENT_PRINCIPAL")
                .unwrap();
        assert_eq!(rule.access, vec![AccessType::Read, AccessType::Update]);
        assert_eq!(rule.entity, "Child");
        assert_eq!(rule.alias, "c");
        assert!(rule.where_clause.is_some());

        let rule = parse_rule("GRANT ACCESS TO Parent p").unwrap();
        assert!(rule.access.is_empty());
        assert!(rule.where_clause.is_none());
    }

    #[test]
    fn test_access_rule_errors() {
        let err = parse_rule("GRANT WRITE ACCESS TO Parent p").unwrap_err();
        assert!(err.hint.unwrap().contains("CREATE, READ, UPDATE and DELETE"));

        let err = parse_rule("GRANT ACCESS TO Parent").unwrap_err();
        assert_eq!(err.message, "unexpected end of input");
    }

    #[test]
    fn test_trailing_input() {
        let err = parse("SELECT b FROM Bean b )").unwrap_err();
        assert!(err.message.contains("trailing input"));
    }

    #[test]
    fn test_missing_alias() {
        let err = parse("SELECT b FROM Bean WHERE b.x = 1").unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("range variables must be given an alias"));
    }
}
