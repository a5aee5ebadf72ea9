use crate::ast::{
    BinaryOperator, ColumnDefinition, ColumnType, CreateTableStatement, Expr, InsertStatement,
    Literal, OrderBy, SelectStatement, SortOrder, Statement,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParserError {
    pub message: String,
}

impl ParserError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Eof,
    Whitespace,
    String(String),
    Number(i64),
    Keyword(String),
    Identifier(String),
    Operator(String),
    Wildcard,
    Comma,
    LeftParen,
    RightParen,
    Unknown(String),
}

const EOF_TOKEN: Token = Token::Eof;

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn scan(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            match self.next_token() {
                Token::Eof => break,
                Token::Whitespace => continue,
                token => tokens.push(token),
            }
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        let Some(ch) = self.peek() else {
            return Token::Eof;
        };
        if ch.is_whitespace() {
            self.advance_while(char::is_whitespace);
            return Token::Whitespace;
        }
        match ch {
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            '*' => {
                self.advance();
                Token::Wildcard
            }
            '\'' => self.string_token(),
            _ if ch.is_ascii_digit() => {
                let start = self.pos;
                self.advance_while(|c| c.is_ascii_digit());
                let text = &self.input[start..self.pos];
                match text.parse::<i64>() {
                    Ok(value) => Token::Number(value),
                    Err(_) => Token::Unknown(text.to_string()),
                }
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => {
                let start = self.pos;
                self.advance_while(|c| c.is_ascii_alphanumeric() || c == '_');
                let word = &self.input[start..self.pos];
                if is_keyword(word) {
                    Token::Keyword(word.to_string())
                } else {
                    Token::Identifier(word.to_string())
                }
            }
            _ => self.operator_or_unknown(),
        }
    }

    fn string_token(&mut self) -> Token {
        let start = self.pos;
        self.advance();
        let body_start = self.pos;
        self.advance_while(|c| c != '\'');
        if self.pos >= self.input.len() {
            // unterminated literal; surface the raw text so parsing fails
            return Token::Unknown(self.input[start..].to_string());
        }
        let value = self.input[body_start..self.pos].to_string();
        self.advance();
        Token::String(value)
    }

    fn operator_or_unknown(&mut self) -> Token {
        let rest = &self.input[self.pos..];
        // longest operator first
        for candidate in ["<>", ">=", "<=", "=", ">", "<", "+", "-", "%"] {
            if rest.starts_with(candidate) {
                self.pos += candidate.len();
                return Token::Operator(candidate.to_string());
            }
        }
        let mut chars = rest.chars();
        match chars.next() {
            Some(ch) => {
                self.pos += ch.len_utf8();
                Token::Unknown(ch.to_string())
            }
            None => Token::Eof,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
        }
    }

    fn advance_while(&mut self, predicate: impl Fn(char) -> bool) {
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "select"
            | "from"
            | "where"
            | "group"
            | "by"
            | "order"
            | "asc"
            | "desc"
            | "limit"
            | "offset"
            | "create"
            | "table"
            | "insert"
            | "into"
            | "values"
            | "text"
            | "integer"
    )
}

fn is_aggregate(name: &str) -> bool {
    name == "count"
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&EOF_TOKEN)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.current() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keywords(&mut self, keywords: &[&str]) -> bool {
        for (offset, keyword) in keywords.iter().enumerate() {
            match self.tokens.get(self.pos + offset) {
                Some(Token::Keyword(word)) if word == keyword => {}
                _ => return false,
            }
        }
        self.pos += keywords.len();
        true
    }

    fn expect_identifier(&mut self, context: &str) -> Result<String, ParserError> {
        match self.current() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(ParserError::new(format!(
                "expected identifier after '{}'",
                context
            ))),
        }
    }

    fn expect_left_paren(&mut self, context: &str) -> Result<(), ParserError> {
        if self.eat(&Token::LeftParen) {
            Ok(())
        } else {
            Err(ParserError::new(format!("expected ( to open {}", context)))
        }
    }

    fn expect_right_paren(&mut self, context: &str) -> Result<(), ParserError> {
        if self.eat(&Token::RightParen) {
            Ok(())
        } else {
            Err(ParserError::new(format!("expected ) to close {}", context)))
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParserError> {
        if self.eat_keywords(&["create", "table"]) {
            return Ok(Statement::CreateTable(self.parse_create_table()?));
        }
        if self.eat_keywords(&["insert", "into"]) {
            return Ok(Statement::Insert(self.parse_insert()?));
        }
        if self.eat_keywords(&["select"]) {
            return Ok(Statement::Select(self.parse_select()?));
        }
        Err(ParserError::new("unable to identify operation type"))
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStatement, ParserError> {
        let name = self.expect_identifier("create table")?;
        self.expect_left_paren("column definitions")?;
        let mut columns = Vec::new();
        loop {
            let column = self.expect_identifier("(")?;
            let column_type = match self.current() {
                Token::Keyword(word) => {
                    let column_type = column_type_from_keyword(word);
                    self.pos += 1;
                    column_type
                }
                _ => {
                    return Err(ParserError::new(format!(
                        "expected column type after '{}'",
                        column
                    )))
                }
            };
            columns.push(ColumnDefinition { name: column, column_type });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_right_paren("column definitions")?;
        Ok(CreateTableStatement { name, columns })
    }

    fn parse_insert(&mut self) -> Result<InsertStatement, ParserError> {
        let table = self.expect_identifier("insert into")?;
        self.expect_left_paren("insert columns")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_identifier("(")?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_right_paren("insert columns")?;
        if !self.eat_keywords(&["values"]) {
            return Err(ParserError::new("expected 'values' after insert columns"));
        }
        self.expect_left_paren("values")?;
        let mut values = Vec::new();
        loop {
            let literal = match self.current() {
                Token::Number(value) => Literal::Integer(*value),
                Token::String(value) => Literal::String(value.clone()),
                _ => return Err(ParserError::new("expected literal in values list")),
            };
            self.pos += 1;
            values.push(literal);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_right_paren("values")?;
        Ok(InsertStatement {
            table,
            columns,
            values,
        })
    }

    fn parse_select(&mut self) -> Result<SelectStatement, ParserError> {
        let items = self.parse_select_items()?;
        if !self.eat_keywords(&["from"]) {
            return Err(ParserError::new("expected 'from' after select items"));
        }
        let table = self.expect_identifier("from")?;
        let selection = self.parse_clause_expression(&["where"])?;
        let group_by = self.parse_clause_expression(&["group", "by"])?;
        let order_by = self.parse_order_by()?;
        let limit = self.parse_clause_int(&["limit"])?;
        let offset = self.parse_clause_int(&["offset"])?;
        Ok(SelectStatement {
            table,
            items,
            selection,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_items(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut items = Vec::new();
        loop {
            let Some(item) = self.parse_item()? else {
                break;
            };
            items.push(item);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// One select item: `atom (operator item)?`. Right-recursive with no
    /// precedence, so `a + b * c` groups right to left.
    fn parse_item(&mut self) -> Result<Option<Expr>, ParserError> {
        let atom = match self.current() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.pos += 1;
                if is_aggregate(&name) {
                    Expr::Function {
                        name,
                        args: Vec::new(),
                    }
                } else {
                    Expr::Identifier(name)
                }
            }
            Token::Wildcard => {
                self.pos += 1;
                Expr::Identifier("*".to_string())
            }
            Token::Number(value) => {
                let value = *value;
                self.pos += 1;
                Expr::Literal(Literal::Integer(value))
            }
            Token::String(value) => {
                let value = value.clone();
                self.pos += 1;
                Expr::Literal(Literal::String(value))
            }
            _ => return Ok(None),
        };
        if let Token::Operator(op) = self.current() {
            let op = operator_from_str(op)?;
            self.pos += 1;
            let Some(right) = self.parse_item()? else {
                return Err(ParserError::new("expected expression after operator"));
            };
            return Ok(Some(Expr::Binary {
                left: Box::new(atom),
                op,
                right: Box::new(right),
            }));
        }
        Ok(Some(atom))
    }

    fn parse_clause_expression(&mut self, keywords: &[&str]) -> Result<Option<Expr>, ParserError> {
        if !self.eat_keywords(keywords) {
            return Ok(None);
        }
        match self.parse_item()? {
            Some(expr) => Ok(Some(expr)),
            None => Err(ParserError::new(format!(
                "expected valid expression after '{}'",
                keywords.join(" ")
            ))),
        }
    }

    fn parse_order_by(&mut self) -> Result<Option<OrderBy>, ParserError> {
        if !self.eat_keywords(&["order", "by"]) {
            return Ok(None);
        }
        let Some(by) = self.parse_item()? else {
            return Err(ParserError::new("expected valid expression after 'order by'"));
        };
        let order = if self.eat_keywords(&["desc"]) {
            SortOrder::Desc
        } else {
            self.eat_keywords(&["asc"]);
            SortOrder::Asc
        };
        Ok(Some(OrderBy { by, order }))
    }

    fn parse_clause_int(&mut self, keywords: &[&str]) -> Result<Option<i64>, ParserError> {
        if !self.eat_keywords(keywords) {
            return Ok(None);
        }
        match self.parse_item()? {
            Some(Expr::Literal(Literal::Integer(value))) => Ok(Some(value)),
            _ => Err(ParserError::new(format!(
                "expected valid int after '{}'",
                keywords.join(" ")
            ))),
        }
    }
}

fn column_type_from_keyword(word: &str) -> ColumnType {
    match word {
        "integer" => ColumnType::Integer,
        "text" => ColumnType::Text,
        _ => ColumnType::Unknown,
    }
}

fn operator_from_str(op: &str) -> Result<BinaryOperator, ParserError> {
    match op {
        "=" => Ok(BinaryOperator::Eq),
        "<>" => Ok(BinaryOperator::NotEq),
        "<" => Ok(BinaryOperator::Lt),
        "<=" => Ok(BinaryOperator::LtEq),
        ">" => Ok(BinaryOperator::Gt),
        ">=" => Ok(BinaryOperator::GtEq),
        "+" => Ok(BinaryOperator::Plus),
        "-" => Ok(BinaryOperator::Minus),
        "%" => Ok(BinaryOperator::Modulo),
        other => Err(ParserError::new(format!("unknown operator '{}'", other))),
    }
}

/// Lex and parse a single statement.
pub fn parse_statement(input: &str) -> Result<Statement, ParserError> {
    let tokens = Lexer::new(input).scan();
    let mut parser = Parser::new(tokens);
    parser.parse_statement()
}
