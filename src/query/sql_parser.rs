//! SQL parser.
//!
//! Supports the interpreted subset:
//! - SELECT with column/aggregate projections, aliases, FROM with optional
//!   table alias, JOIN / LEFT JOIN ... ON, WHERE, GROUP BY, ORDER BY,
//!   LIMIT/OFFSET
//! - INSERT INTO ... (columns) VALUES (...)
//! - UPDATE ... SET ... [WHERE]
//! - DELETE FROM ... [WHERE]
//!
//! Keywords are case-insensitive; string literals are single-quoted with a
//! doubled quote as escape; `--` and `/* */` comments are skipped. Unknown
//! leading keywords fail with `UnsupportedCommand`, everything else with a
//! `ParseError` carrying the byte position.

use crate::data::Value;
use crate::{Result, RowbaseError};

/// A possibly alias-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedName {
    pub qualifier: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// SQL statement types
#[derive(Debug, Clone)]
pub enum SqlStatement {
    Select(SelectStatement),
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Update {
        table: String,
        assignments: Vec<(String, SqlExpr)>,
        where_clause: Option<SqlExpr>,
    },
    Delete {
        table: String,
        where_clause: Option<SqlExpr>,
    },
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub columns: Vec<SelectColumn>,
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Table name with optional alias.
#[derive(Debug, Clone)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// The name identifiers resolve against: the alias when present.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// `JOIN <table> ON <a> = <b>`. Which side of the equality belongs to the
/// joined table is resolved at execution time.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on_left: QualifiedName,
    pub on_right: QualifiedName,
}

/// Column selection in the SELECT clause
#[derive(Debug, Clone)]
pub enum SelectColumn {
    /// SELECT *
    All,
    /// SELECT expr [AS alias]
    Expr {
        expr: SqlExpr,
        alias: Option<String>,
    },
    /// SELECT COUNT(*), SUM(col), ... [AS alias]; `arg` is None for COUNT(*)
    Aggregate {
        func: AggregateFunc,
        arg: Option<SqlExpr>,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl std::fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFunc::Count => write!(f, "COUNT"),
            AggregateFunc::Sum => write!(f, "SUM"),
            AggregateFunc::Avg => write!(f, "AVG"),
            AggregateFunc::Min => write!(f, "MIN"),
            AggregateFunc::Max => write!(f, "MAX"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderByClause {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// Expression for WHERE, SET, GROUP BY, and ORDER BY positions
#[derive(Debug, Clone)]
pub enum SqlExpr {
    Column(QualifiedName),
    Literal(Value),
    Binary {
        left: Box<SqlExpr>,
        op: BinaryOperator,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
struct SpannedToken {
    token: Token,
    start: usize,
    end: usize,
}

/// Token types for the lexer. Deliberately small: anything outside the
/// supported grammar tokenizes as an identifier and fails as an unsupported
/// command or a syntax error.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Keywords
    Select, From, Where, And, Or, Not, As,
    Order, By, Asc, Desc, Group, Limit, Offset,
    Join, Left, Inner, Outer, On,
    Is, Null, True, False,
    Insert, Into, Values, Update, Set, Delete,
    Count, Sum, Avg, Min, Max,
    // Symbols
    Star,      // *
    Comma,     // ,
    Dot,       // .
    LParen,    // (
    RParen,    // )
    Semicolon, // ;
    Eq,        // =
    NotEq,     // != or <>
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=
    Plus,      // +
    Minus,     // -
    Slash,     // /
    // Literals
    Identifier(String),
    StringLit(String),
    IntLit(i64),
    FloatLit(f64),
    // End
    Eof,
}

/// SQL parser
pub struct SqlParser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl SqlParser {
    /// Parse a single SQL statement.
    pub fn parse(sql: &str) -> Result<SqlStatement> {
        if sql.trim().is_empty() {
            return Err(RowbaseError::InvalidArgument("empty SQL".to_string()));
        }
        let tokens = Self::tokenize(sql)?;
        let mut parser = SqlParser { tokens, pos: 0 };
        let stmt = parser.parse_statement()?;
        // Trailing semicolons are allowed
        while matches!(parser.current(), Token::Semicolon) {
            parser.advance();
        }
        if !matches!(parser.current(), Token::Eof) {
            let (start, _) = parser.current_span();
            return Err(parser.syntax_error(
                start,
                format!("unexpected {:?} after statement", parser.current()),
            ));
        }
        Ok(stmt)
    }

    /// Tokenize by byte scanning; SQL syntax characters are all ASCII, so
    /// multi-byte UTF-8 sequences can only occur inside literals and
    /// identifiers where they are copied through untouched.
    fn tokenize(sql: &str) -> Result<Vec<SpannedToken>> {
        let mut tokens: Vec<SpannedToken> = Vec::with_capacity(sql.len() / 4 + 8);
        let bytes = sql.as_bytes();
        let len = bytes.len();
        let mut i = 0;

        while i < len {
            let c = bytes[i];

            if c.is_ascii_whitespace() {
                i += 1;
                continue;
            }

            // -- line comment
            if c == b'-' && i + 1 < len && bytes[i + 1] == b'-' {
                i += 2;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }

            // /* block comment */
            if c == b'/' && i + 1 < len && bytes[i + 1] == b'*' {
                let start = i;
                i += 2;
                loop {
                    if i + 1 >= len {
                        return Err(RowbaseError::ParseError(format!(
                            "Syntax error at byte {}: unterminated block comment",
                            start
                        )));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                continue;
            }

            // Single-character tokens
            let single = match c {
                b'*' => Some(Token::Star),
                b',' => Some(Token::Comma),
                b'.' => Some(Token::Dot),
                b'(' => Some(Token::LParen),
                b')' => Some(Token::RParen),
                b';' => Some(Token::Semicolon),
                b'=' => Some(Token::Eq),
                b'+' => Some(Token::Plus),
                b'-' => Some(Token::Minus),
                b'/' => Some(Token::Slash),
                _ => None,
            };
            if let Some(token) = single {
                // '.' starting a number is handled below
                if !(c == b'.' && i + 1 < len && bytes[i + 1].is_ascii_digit()) {
                    tokens.push(SpannedToken { token, start: i, end: i + 1 });
                    i += 1;
                    continue;
                }
            }

            // String literal, single-quoted, '' escapes a quote
            if c == b'\'' {
                let start = i;
                i += 1;
                let mut text = String::new();
                loop {
                    if i >= len {
                        return Err(RowbaseError::ParseError(format!(
                            "Syntax error at byte {}: unterminated string literal",
                            start
                        )));
                    }
                    if bytes[i] == b'\'' {
                        if i + 1 < len && bytes[i + 1] == b'\'' {
                            text.push('\'');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    // Copy whole UTF-8 sequences through
                    let ch_len = utf8_len(bytes[i]);
                    text.push_str(&sql[i..i + ch_len]);
                    i += ch_len;
                }
                tokens.push(SpannedToken {
                    token: Token::StringLit(text),
                    start,
                    end: i,
                });
                continue;
            }

            if c == b'!' && i + 1 < len && bytes[i + 1] == b'=' {
                tokens.push(SpannedToken { token: Token::NotEq, start: i, end: i + 2 });
                i += 2;
                continue;
            }
            if c == b'<' {
                if i + 1 < len && bytes[i + 1] == b'=' {
                    tokens.push(SpannedToken { token: Token::Le, start: i, end: i + 2 });
                    i += 2;
                } else if i + 1 < len && bytes[i + 1] == b'>' {
                    tokens.push(SpannedToken { token: Token::NotEq, start: i, end: i + 2 });
                    i += 2;
                } else {
                    tokens.push(SpannedToken { token: Token::Lt, start: i, end: i + 1 });
                    i += 1;
                }
                continue;
            }
            if c == b'>' {
                if i + 1 < len && bytes[i + 1] == b'=' {
                    tokens.push(SpannedToken { token: Token::Ge, start: i, end: i + 2 });
                    i += 2;
                } else {
                    tokens.push(SpannedToken { token: Token::Gt, start: i, end: i + 1 });
                    i += 1;
                }
                continue;
            }

            // Numbers
            if c.is_ascii_digit() || (c == b'.' && i + 1 < len && bytes[i + 1].is_ascii_digit()) {
                let start = i;
                let mut has_dot = c == b'.';
                i += 1;
                while i < len && (bytes[i].is_ascii_digit() || (!has_dot && bytes[i] == b'.')) {
                    if bytes[i] == b'.' {
                        has_dot = true;
                    }
                    i += 1;
                }
                let text = &sql[start..i];
                let token = if has_dot {
                    Token::FloatLit(text.parse().map_err(|_| {
                        RowbaseError::ParseError(format!(
                            "Syntax error at byte {}: invalid number {}",
                            start, text
                        ))
                    })?)
                } else {
                    Token::IntLit(text.parse().map_err(|_| {
                        RowbaseError::ParseError(format!(
                            "Syntax error at byte {}: invalid number {}",
                            start, text
                        ))
                    })?)
                };
                tokens.push(SpannedToken { token, start, end: i });
                continue;
            }

            // Identifiers and keywords
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                i += 1;
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &sql[start..i];
                let token = match word.to_ascii_uppercase().as_str() {
                    "SELECT" => Token::Select,
                    "FROM" => Token::From,
                    "WHERE" => Token::Where,
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "AS" => Token::As,
                    "ORDER" => Token::Order,
                    "BY" => Token::By,
                    "ASC" => Token::Asc,
                    "DESC" => Token::Desc,
                    "GROUP" => Token::Group,
                    "LIMIT" => Token::Limit,
                    "OFFSET" => Token::Offset,
                    "JOIN" => Token::Join,
                    "LEFT" => Token::Left,
                    "INNER" => Token::Inner,
                    "OUTER" => Token::Outer,
                    "ON" => Token::On,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    "INSERT" => Token::Insert,
                    "INTO" => Token::Into,
                    "VALUES" => Token::Values,
                    "UPDATE" => Token::Update,
                    "SET" => Token::Set,
                    "DELETE" => Token::Delete,
                    "COUNT" => Token::Count,
                    "SUM" => Token::Sum,
                    "AVG" => Token::Avg,
                    "MIN" => Token::Min,
                    "MAX" => Token::Max,
                    _ => Token::Identifier(word.to_string()),
                };
                tokens.push(SpannedToken { token, start, end: i });
                continue;
            }

            return Err(RowbaseError::ParseError(format!(
                "Syntax error at byte {}: unexpected character {:?}",
                i, sql[i..].chars().next().unwrap_or('?')
            )));
        }

        tokens.push(SpannedToken { token: Token::Eof, start: len, end: len });
        Ok(tokens)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn current_span(&self) -> (usize, usize) {
        (self.tokens[self.pos].start, self.tokens[self.pos].end)
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn syntax_error(&self, at: usize, message: impl Into<String>) -> RowbaseError {
        RowbaseError::ParseError(format!("Syntax error at byte {}: {}", at, message.into()))
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if *self.current() == token {
            self.advance();
            Ok(())
        } else {
            let (start, _) = self.current_span();
            Err(self.syntax_error(
                start,
                format!("expected {}, found {:?}", what, self.current()),
            ))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => {
                let (start, _) = self.current_span();
                Err(self.syntax_error(start, format!("expected {}, found {:?}", what, other)))
            }
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<SqlStatement> {
        match self.current().clone() {
            Token::Select => self.parse_select().map(SqlStatement::Select),
            Token::Insert => self.parse_insert(),
            Token::Update => self.parse_update(),
            Token::Delete => self.parse_delete(),
            Token::Identifier(word) => {
                Err(RowbaseError::UnsupportedCommand(word.to_ascii_uppercase()))
            }
            other => {
                let (start, _) = self.current_span();
                Err(self.syntax_error(start, format!("expected a statement, found {:?}", other)))
            }
        }
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(Token::Select, "SELECT")?;
        let columns = self.parse_select_columns()?;
        self.expect(Token::From, "FROM")?;
        let from = self.parse_table_ref()?;

        let mut joins = Vec::new();
        loop {
            let join_type = match self.current() {
                Token::Join => {
                    self.advance();
                    JoinType::Inner
                }
                Token::Inner => {
                    self.advance();
                    self.expect(Token::Join, "JOIN")?;
                    JoinType::Inner
                }
                Token::Left => {
                    self.advance();
                    if matches!(self.current(), Token::Outer) {
                        self.advance();
                    }
                    self.expect(Token::Join, "JOIN")?;
                    JoinType::Left
                }
                _ => break,
            };
            let table = self.parse_table_ref()?;
            self.expect(Token::On, "ON")?;
            let on_left = self.parse_qualified_name()?;
            self.expect(Token::Eq, "=")?;
            let on_right = self.parse_qualified_name()?;
            joins.push(JoinClause {
                join_type,
                table,
                on_left,
                on_right,
            });
        }

        let where_clause = if matches!(self.current(), Token::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if matches!(self.current(), Token::Group) {
            self.advance();
            self.expect(Token::By, "BY")?;
            loop {
                group_by.push(self.parse_expr()?);
                if matches!(self.current(), Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let order_by = if matches!(self.current(), Token::Order) {
            self.advance();
            self.expect(Token::By, "BY")?;
            self.parse_order_by()?
        } else {
            Vec::new()
        };

        let mut limit = None;
        let mut offset = None;
        if matches!(self.current(), Token::Limit) {
            self.advance();
            limit = Some(self.parse_count("LIMIT")?);
            if matches!(self.current(), Token::Offset) {
                self.advance();
                offset = Some(self.parse_count("OFFSET")?);
            }
        }

        Ok(SelectStatement {
            columns,
            from,
            joins,
            where_clause,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_count(&mut self, what: &str) -> Result<usize> {
        match self.current().clone() {
            Token::IntLit(n) if n >= 0 => {
                self.advance();
                Ok(n as usize)
            }
            other => {
                let (start, _) = self.current_span();
                Err(self.syntax_error(
                    start,
                    format!("{} expects a non-negative integer, found {:?}", what, other),
                ))
            }
        }
    }

    fn parse_select_columns(&mut self) -> Result<Vec<SelectColumn>> {
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_select_column()?);
            if matches!(self.current(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(columns)
    }

    fn parse_select_column(&mut self) -> Result<SelectColumn> {
        if matches!(self.current(), Token::Star) {
            self.advance();
            return Ok(SelectColumn::All);
        }

        if let Some(func) = self.aggregate_func() {
            self.advance();
            self.expect(Token::LParen, "(")?;
            let arg = if matches!(self.current(), Token::Star) {
                if func != AggregateFunc::Count {
                    let (start, _) = self.current_span();
                    return Err(self.syntax_error(start, format!("{}(*) is not valid", func)));
                }
                self.advance();
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(Token::RParen, ")")?;
            let alias = self.parse_alias()?;
            return Ok(SelectColumn::Aggregate { func, arg, alias });
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_alias()?;
        Ok(SelectColumn::Expr { expr, alias })
    }

    fn aggregate_func(&self) -> Option<AggregateFunc> {
        match self.current() {
            Token::Count => Some(AggregateFunc::Count),
            Token::Sum => Some(AggregateFunc::Sum),
            Token::Avg => Some(AggregateFunc::Avg),
            Token::Min => Some(AggregateFunc::Min),
            Token::Max => Some(AggregateFunc::Max),
            _ => None,
        }
    }

    fn parse_alias(&mut self) -> Result<Option<String>> {
        if matches!(self.current(), Token::As) {
            self.advance();
            return self.expect_identifier("alias after AS").map(Some);
        }
        if let Token::Identifier(name) = self.current().clone() {
            self.advance();
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let table = self.expect_identifier("table name")?;
        let alias = if let Token::Identifier(name) = self.current().clone() {
            self.advance();
            Some(name)
        } else {
            None
        };
        Ok(TableRef { table, alias })
    }

    fn parse_qualified_name(&mut self) -> Result<QualifiedName> {
        let first = self.expect_identifier("column name")?;
        if matches!(self.current(), Token::Dot) {
            self.advance();
            let name = self.expect_identifier("column name after '.'")?;
            Ok(QualifiedName {
                qualifier: Some(first),
                name,
            })
        } else {
            Ok(QualifiedName {
                qualifier: None,
                name: first,
            })
        }
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderByClause>> {
        let mut clauses = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let descending = match self.current() {
                Token::Asc => {
                    self.advance();
                    false
                }
                Token::Desc => {
                    self.advance();
                    true
                }
                _ => false,
            };
            clauses.push(OrderByClause { expr, descending });
            if matches!(self.current(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(clauses)
    }

    fn parse_insert(&mut self) -> Result<SqlStatement> {
        self.expect(Token::Insert, "INSERT")?;
        self.expect(Token::Into, "INTO")?;
        let table = self.expect_identifier("table name")?;

        self.expect(Token::LParen, "'(' before column list")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_identifier("column name")?);
            match self.current() {
                Token::Comma => self.advance(),
                Token::RParen => {
                    self.advance();
                    break;
                }
                other => {
                    let (start, _) = self.current_span();
                    return Err(self.syntax_error(
                        start,
                        format!("expected ',' or ')' in column list, found {:?}", other),
                    ));
                }
            }
        }

        self.expect(Token::Values, "VALUES")?;
        self.expect(Token::LParen, "'(' before value list")?;
        let mut values = Vec::new();
        loop {
            values.push(self.parse_literal_value()?);
            match self.current() {
                Token::Comma => self.advance(),
                Token::RParen => {
                    self.advance();
                    break;
                }
                other => {
                    let (start, _) = self.current_span();
                    return Err(self.syntax_error(
                        start,
                        format!("expected ',' or ')' in value list, found {:?}", other),
                    ));
                }
            }
        }

        if columns.len() != values.len() {
            return Err(RowbaseError::InvalidArgument(format!(
                "INSERT lists {} columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        Ok(SqlStatement::Insert {
            table,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> Result<SqlStatement> {
        self.expect(Token::Update, "UPDATE")?;
        let table = self.expect_identifier("table name")?;
        self.expect(Token::Set, "SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier("column name")?;
            self.expect(Token::Eq, "'='")?;
            let expr = self.parse_expr()?;
            assignments.push((column, expr));
            if matches!(self.current(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }

        let where_clause = if matches!(self.current(), Token::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(SqlStatement::Update {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<SqlStatement> {
        self.expect(Token::Delete, "DELETE")?;
        self.expect(Token::From, "FROM")?;
        let table = self.expect_identifier("table name")?;
        let where_clause = if matches!(self.current(), Token::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(SqlStatement::Delete {
            table,
            where_clause,
        })
    }

    // ---- expressions ----
    // Precedence: OR < AND < NOT < comparison < add/sub < mul/div < primary

    fn parse_expr(&mut self) -> Result<SqlExpr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<SqlExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.current(), Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = SqlExpr::Binary {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<SqlExpr> {
        let mut left = self.parse_not()?;
        while matches!(self.current(), Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = SqlExpr::Binary {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<SqlExpr> {
        if matches!(self.current(), Token::Not) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(SqlExpr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<SqlExpr> {
        let left = self.parse_add_sub()?;

        if matches!(self.current(), Token::Is) {
            self.advance();
            let negated = if matches!(self.current(), Token::Not) {
                self.advance();
                true
            } else {
                false
            };
            self.expect(Token::Null, "NULL after IS")?;
            return Ok(SqlExpr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let op = match self.current() {
            Token::Eq => Some(BinaryOperator::Eq),
            Token::NotEq => Some(BinaryOperator::NotEq),
            Token::Lt => Some(BinaryOperator::Lt),
            Token::Le => Some(BinaryOperator::Le),
            Token::Gt => Some(BinaryOperator::Gt),
            Token::Ge => Some(BinaryOperator::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_add_sub()?;
            return Ok(SqlExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_add_sub(&mut self) -> Result<SqlExpr> {
        let mut left = self.parse_mul_div()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul_div()?;
            left = SqlExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_mul_div(&mut self) -> Result<SqlExpr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary()?;
            left = SqlExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<SqlExpr> {
        match self.current().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Identifier(_) => {
                let qname = self.parse_qualified_name()?;
                Ok(SqlExpr::Column(qname))
            }
            Token::StringLit(_)
            | Token::IntLit(_)
            | Token::FloatLit(_)
            | Token::True
            | Token::False
            | Token::Null
            | Token::Minus => self.parse_literal_value().map(SqlExpr::Literal),
            other => {
                let (start, _) = self.current_span();
                Err(self.syntax_error(start, format!("expected an expression, found {:?}", other)))
            }
        }
    }

    fn parse_literal_value(&mut self) -> Result<Value> {
        match self.current().clone() {
            Token::StringLit(s) => {
                self.advance();
                Ok(Value::String(s))
            }
            Token::IntLit(n) => {
                self.advance();
                Ok(Value::Int64(n))
            }
            Token::FloatLit(f) => {
                self.advance();
                Ok(Value::Decimal(f))
            }
            Token::True => {
                self.advance();
                Ok(Value::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Value::Bool(false))
            }
            Token::Null => {
                self.advance();
                Ok(Value::Null)
            }
            Token::Minus => {
                self.advance();
                match self.current().clone() {
                    Token::IntLit(n) => {
                        self.advance();
                        Ok(Value::Int64(-n))
                    }
                    Token::FloatLit(f) => {
                        self.advance();
                        Ok(Value::Decimal(-f))
                    }
                    other => {
                        let (start, _) = self.current_span();
                        Err(self.syntax_error(
                            start,
                            format!("expected a number after '-', found {:?}", other),
                        ))
                    }
                }
            }
            other => {
                let (start, _) = self.current_span();
                Err(self.syntax_error(start, format!("expected a literal, found {:?}", other)))
            }
        }
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}
