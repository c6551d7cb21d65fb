//! Lexer for the query and access-rule language using logos.
//!
//! Keywords are case-insensitive. logos only recognizes the raw shape of a
//! word; the keyword table is applied afterwards so that keywords can still be
//! used as path segments (`bean.order`, `bean.type`).

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum RawToken {
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Word(String),

    // String literal, SQL style: a doubled quote escapes a quote
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    String(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    NamedParameter(String),

    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok())]
    PositionalParameter(u32),

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", |lex| {
        let s = lex.slice();
        s[2..s.len() - 2].trim().to_string()
    })]
    Comment(String),

    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

/// Token types for the query language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Statement keywords
    Select,
    Distinct,
    From,
    Where,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    Update,
    Set,
    Delete,
    As,

    // Join keywords
    Join,
    Left,
    Outer,
    Inner,
    Fetch,

    // Access rule keywords
    Grant,
    Create,
    Read,
    Access,
    To,

    // Logical operators
    And,
    Or,
    Not,

    // Predicate keywords
    In,
    Is,
    Empty,
    Member,
    Of,
    Like,
    Escape,
    Between,
    Exists,
    Instance,

    // Case expressions
    Case,
    When,
    Then,
    Else,
    End,

    // Literals
    True,
    False,
    Null,
    Ident(String),
    String(String),
    Int(i64),
    Float(f64),
    NamedParameter(String),
    PositionalParameter(u32),

    /// A block comment; comments directly after `SELECT` are query hints.
    Comment(String),

    // Operators and punctuation
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    Comma,
    LParen,
    RParen,
}

impl Token {
    /// Look up a keyword, ignoring ASCII case.
    pub fn keyword(word: &str) -> Option<Token> {
        let token = match word.to_ascii_uppercase().as_str() {
            "SELECT" => Token::Select,
            "DISTINCT" => Token::Distinct,
            "FROM" => Token::From,
            "WHERE" => Token::Where,
            "GROUP" => Token::Group,
            "BY" => Token::By,
            "HAVING" => Token::Having,
            "ORDER" => Token::Order,
            "ASC" => Token::Asc,
            "DESC" => Token::Desc,
            "UPDATE" => Token::Update,
            "SET" => Token::Set,
            "DELETE" => Token::Delete,
            "AS" => Token::As,
            "JOIN" => Token::Join,
            "LEFT" => Token::Left,
            "OUTER" => Token::Outer,
            "INNER" => Token::Inner,
            "FETCH" => Token::Fetch,
            "GRANT" => Token::Grant,
            "CREATE" => Token::Create,
            "READ" => Token::Read,
            "ACCESS" => Token::Access,
            "TO" => Token::To,
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "IN" => Token::In,
            "IS" => Token::Is,
            "EMPTY" => Token::Empty,
            "MEMBER" => Token::Member,
            "OF" => Token::Of,
            "LIKE" => Token::Like,
            "ESCAPE" => Token::Escape,
            "BETWEEN" => Token::Between,
            "EXISTS" => Token::Exists,
            "INSTANCE" => Token::Instance,
            "CASE" => Token::Case,
            "WHEN" => Token::When,
            "THEN" => Token::Then,
            "ELSE" => Token::Else,
            "END" => Token::End,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            "NULL" => Token::Null,
            _ => return None,
        };
        Some(token)
    }

    /// Whether the token is a word (identifier or keyword).
    pub fn is_word(&self) -> bool {
        match self {
            Token::Ident(_) => true,
            Token::String(_)
            | Token::Int(_)
            | Token::Float(_)
            | Token::NamedParameter(_)
            | Token::PositionalParameter(_)
            | Token::Comment(_)
            | Token::Eq
            | Token::Ne
            | Token::Lt
            | Token::Le
            | Token::Gt
            | Token::Ge
            | Token::Plus
            | Token::Minus
            | Token::Star
            | Token::Slash
            | Token::Dot
            | Token::Comma
            | Token::LParen
            | Token::RParen => false,
            _ => true,
        }
    }

    fn from_raw(raw: RawToken) -> Token {
        match raw {
            RawToken::Word(word) => Token::keyword(&word).unwrap_or(Token::Ident(word)),
            RawToken::String(s) => Token::String(s),
            RawToken::Int(i) => Token::Int(i),
            RawToken::Float(f) => Token::Float(f),
            RawToken::NamedParameter(name) => Token::NamedParameter(name),
            RawToken::PositionalParameter(index) => Token::PositionalParameter(index),
            RawToken::Comment(text) => Token::Comment(text),
            RawToken::Eq => Token::Eq,
            RawToken::Ne => Token::Ne,
            RawToken::Le => Token::Le,
            RawToken::Ge => Token::Ge,
            RawToken::Lt => Token::Lt,
            RawToken::Gt => Token::Gt,
            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Star => Token::Star,
            RawToken::Slash => Token::Slash,
            RawToken::Dot => Token::Dot,
            RawToken::Comma => Token::Comma,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, RawToken>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: RawToken::lexer(source),
        }
    }

    /// Get the source string.
    pub fn source(&self) -> &'source str {
        self.inner.source()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<SpannedToken, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.inner.next()?;
        let span: Span = self.inner.span().into();
        Some(match raw {
            Ok(raw) => Ok(SpannedToken {
                token: Token::from_raw(raw),
                span,
            }),
            Err(()) => Err(ParseError::new(
                format!("unexpected character sequence '{}'", self.inner.slice()),
                span,
            )),
        })
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    Lexer::new(source).collect()
}
