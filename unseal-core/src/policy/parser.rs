//! Reader for the policy source language.
//!
//! Accepts the HCL subset used by ACL policies (attributes, labelled blocks,
//! lists, nested objects and `#`, `//`, `/* */` comments) as well as the
//! equivalent JSON document. Both are lowered into a [`Document`] holding the
//! path blocks in source order.

use crate::errors::{Error, Result};

/// Deepest list or object nesting accepted in HCL source.
const MAX_NESTING: usize = 64;

const TOP_LEVEL_KEYS: &[&str] = &["name", "path"];
const PATH_KEYS: &[&str] = &[
    "capabilities",
    "policy",
    "comment",
    "allowed_parameters",
    "denied_parameters",
    "required_parameters",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub name: Option<String>,
    pub paths: Vec<PathBlock>,
}

/// One `path "<pattern>" { ... }` block before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathBlock {
    pub pattern: String,
    pub capabilities: Vec<String>,
    pub legacy_policy: Option<String>,
}

pub fn parse(source: &str) -> Result<Document> {
    let items = if source.trim_start().starts_with('{') {
        parse_json(source)?
    } else {
        Parser::new(source)?.parse_body(false)?
    };
    lower(items)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Number(String),
    Bool(bool),
    List(Vec<Value>),
    Object(Vec<Item>),
}

impl Value {
    fn describe(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Item {
    key: String,
    labels: Vec<String>,
    value: Value,
    line: usize,
}

fn lower(items: Vec<Item>) -> Result<Document> {
    let mut document = Document::default();
    for Item {
        key,
        labels,
        value,
        line,
    } in items
    {
        match key.as_str() {
            "name" => match value {
                Value::Str(name) => document.name = Some(name),
                other => {
                    return Err(Error::compile(format!(
                        "line {line}: name must be a string, found {}",
                        other.describe()
                    )));
                }
            },
            "path" => lower_path(labels, value, line, &mut document.paths)?,
            other => {
                return Err(Error::compile(format!(
                    "line {line}: invalid key {other:?}; expected one of {TOP_LEVEL_KEYS:?}"
                )));
            }
        }
    }
    Ok(document)
}

fn lower_path(
    labels: Vec<String>,
    value: Value,
    line: usize,
    paths: &mut Vec<PathBlock>,
) -> Result<()> {
    match (labels.as_slice(), value) {
        ([pattern], Value::Object(body)) => {
            paths.push(lower_path_body(pattern.clone(), body)?);
            Ok(())
        }
        ([], Value::Object(entries)) => {
            for entry in entries {
                match (entry.labels.is_empty(), entry.value) {
                    (true, Value::Object(body)) => {
                        paths.push(lower_path_body(entry.key, body)?);
                    }
                    _ => {
                        return Err(Error::compile(format!(
                            "line {}: path {:?} must be an object",
                            entry.line, entry.key
                        )));
                    }
                }
            }
            Ok(())
        }
        (labels, _) if labels.len() > 1 => Err(Error::compile(format!(
            "line {line}: path block takes exactly one label"
        ))),
        _ => Err(Error::compile(format!(
            "line {line}: path must be a block like path \"<pattern>\" {{ ... }}"
        ))),
    }
}

fn lower_path_body(pattern: String, body: Vec<Item>) -> Result<PathBlock> {
    let mut block = PathBlock {
        pattern,
        ..Default::default()
    };
    for item in body {
        match item.key.as_str() {
            "capabilities" => {
                let Value::List(values) = item.value else {
                    return Err(Error::compile(format!(
                        "line {}: capabilities for path {:?} must be a list",
                        item.line, block.pattern
                    )));
                };
                for value in values {
                    match value {
                        Value::Str(name) => block.capabilities.push(name),
                        other => {
                            return Err(Error::compile(format!(
                                "line {}: capability must be a string, found {}",
                                item.line,
                                other.describe()
                            )));
                        }
                    }
                }
            }
            "policy" => match item.value {
                Value::Str(level) => block.legacy_policy = Some(level),
                other => {
                    return Err(Error::compile(format!(
                        "line {}: policy must be a string, found {}",
                        item.line,
                        other.describe()
                    )));
                }
            },
            key if PATH_KEYS.contains(&key) => {}
            other => {
                return Err(Error::compile(format!(
                    "line {}: invalid key {other:?} in path {:?}",
                    item.line,
                    block.pattern
                )));
            }
        }
    }
    Ok(block)
}

fn parse_json(source: &str) -> Result<Vec<Item>> {
    let value: serde_json::Value = serde_json::from_str(source)
        .map_err(|err| Error::compile(format!("invalid JSON policy: {err}")))?;
    match from_json(value) {
        Value::Object(items) => Ok(items),
        _ => Err(Error::compile("JSON policy must be an object")),
    }
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Str(String::new()),
        serde_json::Value::Bool(flag) => Value::Bool(flag),
        serde_json::Value::Number(number) => Value::Number(number.to_string()),
        serde_json::Value::String(text) => Value::Str(text),
        serde_json::Value::Array(values) => Value::List(values.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| Item {
                    key,
                    labels: Vec::new(),
                    value: from_json(value),
                    line: 1,
                })
                .collect(),
        ),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    Bool(bool),
    Equals,
    Comma,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(ident) => format!("identifier {ident:?}"),
            Token::Str(text) => format!("string {text:?}"),
            Token::Number(number) => format!("number {number}"),
            Token::Bool(flag) => format!("bool {flag}"),
            Token::Equals => "'='".into(),
            Token::Comma => "','".into(),
            Token::LeftBrace => "'{'".into(),
            Token::RightBrace => "'}'".into(),
            Token::LeftBracket => "'['".into(),
            Token::RightBracket => "']'".into(),
            Token::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    line: usize,
    column: usize,
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    position: Position,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            position: Position { line: 1, column: 1 },
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.position.line += 1;
            self.position.column = 1;
        } else {
            self.position.column += 1;
        }
        Some(c)
    }

    fn error(&self, at: Position, message: impl std::fmt::Display) -> Error {
        Error::compile(format!("line {}, column {}: {message}", at.line, at.column))
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_next()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('#'), _) | (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.position;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<(Token, Position)> {
        self.skip_trivia()?;
        let start = self.position;
        let Some(c) = self.peek() else {
            return Ok((Token::Eof, start));
        };

        let token = match c {
            '=' => self.single(Token::Equals),
            ',' => self.single(Token::Comma),
            '{' => self.single(Token::LeftBrace),
            '}' => self.single(Token::RightBrace),
            '[' => self.single(Token::LeftBracket),
            ']' => self.single(Token::RightBracket),
            '"' => Token::Str(self.string(start)?),
            c if c.is_ascii_digit() || (c == '-' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) => {
                Token::Number(self.take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-')))
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident =
                    self.take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
                match ident.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(ident),
                }
            }
            other => return Err(self.error(start, format!("unexpected character {other:?}"))),
        };
        Ok((token, start))
    }

    fn single(&mut self, token: Token) -> Token {
        self.bump();
        token
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn string(&mut self, start: Position) -> Result<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        return Err(self.error(start, format!("unknown escape \\{other}")));
                    }
                    None => return Err(self.error(start, "unterminated string")),
                },
                Some('\n') | None => return Err(self.error(start, "unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }
}

struct Parser {
    lexer: Lexer,
    current: Token,
    position: Position,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let (current, position) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            position,
            depth: 0,
        })
    }

    fn advance(&mut self) -> Result<Token> {
        let (next, position) = self.lexer.next_token()?;
        self.position = position;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn unexpected(&self, expected: &str) -> Error {
        self.lexer.error(
            self.position,
            format!("expected {expected}, found {}", self.current.describe()),
        )
    }

    /// Parses items until end of input, or until the closing brace of an
    /// object when `nested` is set.
    fn parse_body(&mut self, nested: bool) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        loop {
            match &self.current {
                Token::Eof if !nested => return Ok(items),
                Token::RightBrace if nested => {
                    self.advance()?;
                    return Ok(items);
                }
                Token::Comma if nested => {
                    self.advance()?;
                }
                Token::Ident(_) | Token::Str(_) => items.push(self.parse_item()?),
                _ => return Err(self.unexpected("a key")),
            }
        }
    }

    fn parse_item(&mut self) -> Result<Item> {
        let line = self.position.line;
        let key = match self.advance()? {
            Token::Ident(key) | Token::Str(key) => key,
            _ => return Err(self.unexpected("a key")),
        };

        let mut labels = Vec::new();
        while let Token::Str(label) = &self.current {
            labels.push(label.clone());
            self.advance()?;
        }

        let value = match self.current {
            Token::Equals => {
                self.advance()?;
                if !labels.is_empty() && self.current != Token::LeftBrace {
                    return Err(self.unexpected("'{' after block labels"));
                }
                self.parse_value()?
            }
            Token::LeftBrace => self.parse_value()?,
            _ if labels.is_empty() => return Err(self.unexpected("'=' or '{'")),
            _ => return Err(self.unexpected("'{'")),
        };

        Ok(Item {
            key,
            labels,
            value,
            line,
        })
    }

    fn parse_value(&mut self) -> Result<Value> {
        let at = self.position;
        match self.advance()? {
            Token::Str(text) => Ok(Value::Str(text)),
            Token::Number(number) => Ok(Value::Number(number)),
            Token::Bool(flag) => Ok(Value::Bool(flag)),
            Token::LeftBrace => {
                self.nested(at, |parser| Ok(Value::Object(parser.parse_body(true)?)))
            }
            Token::LeftBracket => self.nested(at, Self::parse_list),
            other => Err(self.lexer.error(
                self.position,
                format!("expected a value, found {}", other.describe()),
            )),
        }
    }

    fn nested(
        &mut self,
        at: Position,
        parse: impl FnOnce(&mut Self) -> Result<Value>,
    ) -> Result<Value> {
        if self.depth >= MAX_NESTING {
            return Err(self.lexer.error(at, "nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_list(&mut self) -> Result<Value> {
        let mut values = Vec::new();
        loop {
            if self.current == Token::RightBracket {
                self.advance()?;
                return Ok(Value::List(values));
            }
            values.push(self.parse_value()?);
            match self.current {
                Token::Comma => {
                    self.advance()?;
                }
                Token::RightBracket => {}
                _ => return Err(self.unexpected("',' or ']'")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocks_in_declaration_order() {
        let source = r#"
            # operators
            name = "ops"

            path "secret/*" {
                capabilities = ["read", "list"]
            }

            // second block
            path "/sys/policies/acl" {
                capabilities = ["sudo",]
                comment = "policy admin"
            }

            /* legacy */
            path "auth/token/create" { policy = "write" }
        "#;
        let document = parse(source).expect("parse");
        assert_eq!(document.name.as_deref(), Some("ops"));
        let patterns: Vec<&str> = document.paths.iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["secret/*", "/sys/policies/acl", "auth/token/create"]);
        assert_eq!(document.paths[0].capabilities, vec!["read", "list"]);
        assert_eq!(document.paths[1].capabilities, vec!["sudo"]);
        assert_eq!(document.paths[2].legacy_policy.as_deref(), Some("write"));
    }

    #[test]
    fn accepts_parameter_constraints_and_nested_form() {
        let source = r#"
            path = {
              "secret/a" = { capabilities = ["read"] },
              "secret/b" = {
                capabilities = ["update"]
                allowed_parameters = { "ttl" = ["1h", "2h"] }
                required_parameters = ["ttl"]
              }
            }
        "#;
        let document = parse(source).expect("parse");
        assert_eq!(document.paths.len(), 2);
        assert_eq!(document.paths[1].pattern, "secret/b");
    }

    #[test]
    fn parses_json_documents_preserving_order() {
        let source = r#"{
            "path": {
                "z/*": { "capabilities": ["deny"] },
                "a/*": { "capabilities": ["read"] }
            }
        }"#;
        let document = parse(source).expect("parse");
        let patterns: Vec<&str> = document.paths.iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["z/*", "a/*"]);
    }

    #[test]
    fn empty_source_has_no_paths() {
        assert!(parse("").expect("parse").paths.is_empty());
        assert!(parse("# only a comment\n").expect("parse").paths.is_empty());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse(r#"paths "x" { capabilities = ["read"] }"#).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        let err = parse(r#"path "x" { capability = ["read"] }"#).unwrap_err();
        assert!(matches!(err, Error::Compile(ref message) if message.contains("capability")));
    }

    #[test]
    fn reports_syntax_errors_with_location() {
        let cases = [
            r#"path "x" { capabilities = ["read" }"#,
            r#"path "x" { capabilities = ["read"]"#,
            r#"path "x" capabilities"#,
            r#"path "x { }"#,
            "path \"x\" { /* open",
            r#"path "x" { capabilities = "read" }"#,
            r#"path "x" "y" { }"#,
            r#"path { capabilities = ["read"] }"#,
            "{ not json",
        ];
        for case in cases {
            let err = parse(case).unwrap_err();
            assert!(matches!(err, Error::Compile(_)), "{case:?} -> {err:?}");
        }
        let err = parse("\n\npath \"x\" { capabilities = [read] }").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn rejects_runaway_nesting() {
        let lists = format!("path = {}", "[".repeat(500_000));
        let err = parse(&lists).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"), "{err}");

        let objects = format!("path = {}", "{ a = ".repeat(10_000));
        let err = parse(&objects).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"), "{err}");

        let shallow = format!(
            r#"path "x" {{ capabilities = ["read"] allowed_parameters = {{ "k" = {}{} }} }}"#,
            "[".repeat(8),
            "]".repeat(8)
        );
        parse(&shallow).expect("moderate nesting parses");
    }
}
