//! View query templates.
//!
//! A view query method declares a template of the form
//!
//! ```text
//! SELECT * | column[, column..] [AS field] FROM table
//!     [WHERE column = :param | 'literal' | number [AND ..]]
//! ```
//!
//! `AS field` makes the query return every matching row wrapped as
//! `{ "field": [rows..] }`. Without it the query returns a single row and
//! fails with [`QueryError::NotFound`] when nothing matches. Columns may name
//! nested fields with dots (`address.city`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{QueryError, QueryParseError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Collection { field: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Param(String),
    Literal(Value),
}

/// An equality condition of the `WHERE` clause.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operand: Operand,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub template: String,
    pub projection: Projection,
    /// Result field of collection queries.
    pub collection: Option<String>,
    pub table: String,
    pub filters: Vec<Filter>,
}

impl QueryDefinition {
    pub fn parse(template: &str) -> Result<Self, QueryParseError> {
        let tokens = tokenize(template)?;
        Parser {
            tokens,
            pos: 0,
            end: template.len(),
        }
        .parse(template)
    }

    pub fn cardinality(&self) -> Cardinality {
        match &self.collection {
            Some(field) => Cardinality::Collection {
                field: field.clone(),
            },
            None => Cardinality::Single,
        }
    }

    /// Names of the placeholders, in order of first appearance.
    pub fn parameters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for filter in &self.filters {
            if let Operand::Param(name) = &filter.operand {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Checks that a query method taking `arity` arguments can bind every
    /// placeholder.
    ///
    /// A single argument binds either by field name or, for one placeholder,
    /// as a whole. Two or more arguments bind positionally, so their number
    /// must match the placeholders.
    pub fn check_arity(&self, arity: usize) -> Result<(), String> {
        let placeholders = self.parameters().len();
        match arity {
            0 if placeholders > 0 => Err(format!(
                "takes no arguments but its query has {placeholders} placeholders"
            )),
            0 | 1 => Ok(()),
            _ if arity != placeholders => Err(format!(
                "takes {arity} arguments but its query has {placeholders} placeholders"
            )),
            _ => Ok(()),
        }
    }

    /// Turns the argument tuple of a multi-argument query method into
    /// parameters keyed by placeholder name, in order of first appearance.
    pub fn bind_positional(&self, args: Value) -> Result<Value, QueryError> {
        let names = self.parameters();
        match args {
            Value::Array(values) if values.len() == names.len() => Ok(Value::Object(
                names
                    .into_iter()
                    .map(str::to_string)
                    .zip(values)
                    .collect(),
            )),
            _ => Err(QueryError::UnboundParameters(names.len())),
        }
    }

    /// Evaluates the query over `rows`, which must be ordered by key.
    ///
    /// `params` binds placeholders by field name when it is an object. A
    /// query with exactly one placeholder also accepts a bare value.
    pub fn evaluate(&self, params: &Value, rows: &[(String, Value)]) -> Result<Value, QueryError> {
        let bound = self.bind(params)?;
        let mut matches = rows
            .iter()
            .map(|(_, row)| row)
            .filter(|row| {
                self.filters.iter().all(|filter| {
                    let expected = match &filter.operand {
                        Operand::Param(name) => &bound[name.as_str()],
                        Operand::Literal(value) => value,
                    };
                    lookup(row, &filter.column).unwrap_or(&Value::Null) == expected
                })
            })
            .map(|row| self.project(row));

        match &self.collection {
            Some(field) => {
                let mut result = Map::new();
                result.insert(field.clone(), Value::Array(matches.collect()));
                Ok(Value::Object(result))
            }
            None => matches
                .next()
                .ok_or_else(|| QueryError::NotFound(self.table.clone())),
        }
    }

    fn bind<'a>(&'a self, params: &Value) -> Result<HashMap<&'a str, Value>, QueryError> {
        let names = self.parameters();
        match params {
            Value::Object(fields) => names
                .into_iter()
                .map(|name| {
                    fields
                        .get(name)
                        .cloned()
                        .map(|value| (name, value))
                        .ok_or_else(|| QueryError::MissingParameter(name.to_string()))
                })
                .collect(),
            _ if names.is_empty() => Ok(HashMap::new()),
            value if names.len() == 1 => Ok(HashMap::from([(names[0], value.clone())])),
            _ => Err(QueryError::UnboundParameters(names.len())),
        }
    }

    fn project(&self, row: &Value) -> Value {
        match &self.projection {
            Projection::All => row.clone(),
            Projection::Columns(columns) => Value::Object(
                columns
                    .iter()
                    .map(|column| {
                        let key = column.rsplit('.').next().unwrap_or(column);
                        let value = lookup(row, column).cloned().unwrap_or(Value::Null);
                        (key.to_string(), value)
                    })
                    .collect(),
            ),
        }
    }
}

fn lookup<'a>(row: &'a Value, column: &str) -> Option<&'a Value> {
    column.split('.').try_fold(row, |value, field| value.get(field))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Star,
    Comma,
    Equals,
    Param(String),
    Str(String),
    Number(Number),
}

fn tokenize(template: &str) -> Result<Vec<(usize, Token)>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut chars = template.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '*' | ',' | '=' => {
                chars.next();
                let token = match c {
                    '*' => Token::Star,
                    ',' => Token::Comma,
                    _ => Token::Equals,
                };
                tokens.push((pos, token));
            }
            ':' => {
                chars.next();
                let name = take_while(&mut chars, is_word_char);
                if name.is_empty() {
                    return Err(parse_error("expected a parameter name after `:`", pos));
                }
                tokens.push((pos, Token::Param(name)));
            }
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        // '' escapes a quote
                        Some((_, '\'')) if chars.peek().is_some_and(|&(_, c)| c == '\'') => {
                            chars.next();
                            literal.push('\'');
                        }
                        Some((_, '\'')) => break,
                        Some((_, c)) => literal.push(c),
                        None => return Err(parse_error("unterminated string literal", pos)),
                    }
                }
                tokens.push((pos, Token::Str(literal)));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let text = take_while(&mut chars, |c| {
                    c.is_ascii_digit() || matches!(c, '-' | '.' | 'e' | 'E' | '+')
                });
                let number = serde_json::from_str::<Number>(&text)
                    .map_err(|_| parse_error(format!("invalid number `{text}`"), pos))?;
                tokens.push((pos, Token::Number(number)));
            }
            c if is_word_char(c) => {
                let word = take_while(&mut chars, |c| is_word_char(c) || c == '.');
                tokens.push((pos, Token::Word(word)));
            }
            c => return Err(parse_error(format!("unexpected character `{c}`"), pos)),
        }
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn take_while(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    pred: impl Fn(char) -> bool,
) -> String {
    let mut taken = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !pred(c) {
            break;
        }
        taken.push(c);
        chars.next();
    }
    taken
}

fn parse_error(message: impl Into<String>, position: usize) -> QueryParseError {
    QueryParseError {
        message: message.into(),
        position,
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn parse(mut self, template: &str) -> Result<QueryDefinition, QueryParseError> {
        self.keyword("SELECT")?;

        let projection = if self.eat(&Token::Star) {
            Projection::All
        } else {
            let mut columns = vec![self.word("a column name")?];
            while self.eat(&Token::Comma) {
                columns.push(self.word("a column name")?);
            }
            Projection::Columns(columns)
        };

        let collection = if self.eat_keyword("AS") {
            Some(self.word("a result field name")?)
        } else {
            None
        };

        self.keyword("FROM")?;
        let table = self.word("a table name")?;

        let mut filters = Vec::new();
        if self.eat_keyword("WHERE") {
            loop {
                let column = self.word("a column name")?;
                self.expect(&Token::Equals, "`=`")?;
                let operand = match self.next() {
                    Some(Token::Param(name)) => Operand::Param(name),
                    Some(Token::Str(literal)) => Operand::Literal(Value::String(literal)),
                    Some(Token::Number(number)) => Operand::Literal(Value::Number(number)),
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("true") => {
                        Operand::Literal(Value::Bool(true))
                    }
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("false") => {
                        Operand::Literal(Value::Bool(false))
                    }
                    _ => return Err(self.error_before("expected a parameter or a literal")),
                };
                filters.push(Filter { column, operand });

                if !self.eat_keyword("AND") {
                    break;
                }
            }
        }

        if self.pos < self.tokens.len() {
            return Err(self.error_at("unexpected trailing input"));
        }

        Ok(QueryDefinition {
            template: template.to_string(),
            projection,
            collection,
            table,
            filters,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), QueryParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_at(format!("expected `{keyword}`")))
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), QueryParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error_at(format!("expected {what}")))
        }
    }

    fn word(&mut self, what: &str) -> Result<String, QueryParseError> {
        match self.peek() {
            Some(Token::Word(word)) if !is_keyword(word) => {
                let word = word.clone();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.error_at(format!("expected {what}"))),
        }
    }

    fn error_at(&self, message: impl Into<String>) -> QueryParseError {
        let position = self
            .tokens
            .get(self.pos)
            .map_or(self.end, |(position, _)| *position);
        parse_error(message, position)
    }

    fn error_before(&self, message: impl Into<String>) -> QueryParseError {
        let position = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map_or(self.end, |(position, _)| *position);
        parse_error(message, position)
    }
}

fn is_keyword(word: &str) -> bool {
    ["SELECT", "AS", "FROM", "WHERE", "AND"]
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}
