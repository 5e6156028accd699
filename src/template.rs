//! A Go-style template engine for notification texts.
//!
//! Covers the `text/template` features notification templates use:
//!
//! - `{{ .field.path }}` lookups relative to dot, `{{ . }}`
//! - variables: `{{ $v := .x }}`, `{{ $v = .y }}`, `{{ $v.field }}`, `{{ $ }}`
//! - literals, function calls, parenthesized sub-pipelines and pipelines
//!   (`{{ .name | printf "%q" }}`)
//! - `{{if}}`, `{{with}}` and `{{range}}` with `{{else}}`, `{{else if}}` and
//!   `{{else with}}`
//! - trim markers (`{{- ` / ` -}}`) and comments (`{{/* ... */}}`)
//! - builtins `and`, `or`, `not`, `eq`, `ne`, `lt`, `le`, `gt`, `ge`, `len`,
//!   `index`, `print`, `printf`, `println`
//!
//! `define`, `template`, `block`, `break` and `continue` are not supported and
//! fail to parse.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::TemplateError;

/// Variable bindings a template is executed against. They become dot.
pub type Vars = Map<String, Value>;

/// A function callable from templates. Receives the evaluated arguments.
pub type TemplateFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Function-extension table, keyed by the name used inside templates.
pub type FuncMap = HashMap<String, TemplateFn>;

/// Wraps a closure as a [`TemplateFn`].
pub fn func<F>(f: F) -> TemplateFn
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Printed for nil or missing values.
const NO_VALUE: &str = "<no value>";

const UNSUPPORTED_KEYWORDS: [&str; 5] = ["define", "template", "block", "break", "continue"];

/// A parsed template.
#[derive(Clone)]
pub struct Template {
    name: String,
    root: Vec<Node>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.root.len())
            .finish()
    }
}

#[derive(Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
    If(Branch),
    With(Branch),
    Range(Branch),
}

#[derive(Clone)]
struct Branch {
    pipeline: Pipeline,
    list: Vec<Node>,
    else_list: Vec<Node>,
}

#[derive(Clone)]
struct Pipeline {
    /// Variables declared (`:=`) or assigned (`=`) by this pipeline.
    decl: Vec<String>,
    assign: bool,
    commands: Vec<Command>,
}

/// The first operand is the callee when it is a function.
#[derive(Clone)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Clone)]
enum Operand {
    Dot,
    Field(Vec<String>),
    Var { name: String, path: Vec<String> },
    Literal(Value),
    Func { name: String, func: Callable },
    Sub(Box<Pipeline>),
}

#[derive(Clone)]
enum Callable {
    Builtin(Builtin),
    Custom(TemplateFn),
}

#[derive(Clone, Copy)]
enum Builtin {
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Len,
    Index,
    Print,
    Printf,
    Println,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Builtin> {
        Some(match name {
            "and" => Builtin::And,
            "or" => Builtin::Or,
            "not" => Builtin::Not,
            "eq" => Builtin::Eq,
            "ne" => Builtin::Ne,
            "lt" => Builtin::Lt,
            "le" => Builtin::Le,
            "gt" => Builtin::Gt,
            "ge" => Builtin::Ge,
            "len" => Builtin::Len,
            "index" => Builtin::Index,
            "print" => Builtin::Print,
            "printf" => Builtin::Printf,
            "println" => Builtin::Println,
            _ => return None,
        })
    }
}

impl Template {
    /// Parses `source`. Function names are resolved against `funcs` first and
    /// the builtins second; an unknown name is a parse error, as is a
    /// variable used before it is declared.
    pub fn parse(name: &str, source: &str, funcs: &FuncMap) -> Result<Template, TemplateError> {
        let items = lex(source).map_err(|e| TemplateError::parse(name, e))?;
        let mut parser = Parser {
            funcs,
            items,
            pos: 0,
            scope: vec!["$".to_string()],
        };

        let root = match parser.parse_list() {
            Ok((nodes, Stop::Eof)) => nodes,
            Ok((_, Stop::End)) => return Err(TemplateError::parse(name, "unexpected {{end}}")),
            Ok((_, Stop::Else(_))) => {
                return Err(TemplateError::parse(name, "unexpected {{else}}"));
            }
            Err(e) => return Err(TemplateError::parse(name, e)),
        };

        Ok(Template {
            name: name.to_string(),
            root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the template with `vars` as dot.
    pub fn execute(&self, vars: &Vars) -> Result<String, TemplateError> {
        let dot = Value::Object(vars.clone());
        let mut state = State {
            vars: vec![("$".to_string(), dot.clone())],
            out: String::new(),
        };
        state
            .walk_list(&self.root, &dot)
            .map_err(|e| TemplateError::execute(&self.name, e))?;
        Ok(state.out)
    }
}

/// Parses and executes `source` in one go.
pub fn render(
    name: &str,
    source: &str,
    funcs: &FuncMap,
    vars: &Vars,
) -> Result<String, TemplateError> {
    Template::parse(name, source, funcs)?.execute(vars)
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Item {
    Text(String),
    Action(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    LParen,
    RParen,
    Comma,
    Declare,
    Assign,
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Ident(String),
    Literal(Value),
}

fn starts_with_at(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut i = at;
    for p in pattern.chars() {
        if chars.get(i) != Some(&p) {
            return false;
        }
        i += 1;
    }
    true
}

fn skip_whitespace(chars: &[char], mut at: usize) -> usize {
    while chars.get(at).is_some_and(|c| c.is_whitespace()) {
        at += 1;
    }
    at
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(source: &str) -> Result<Vec<Item>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut items = Vec::new();
    let mut text = String::new();
    let mut trim_next_text = false;
    let mut i = 0;

    while i < chars.len() {
        if !starts_with_at(&chars, i, "{{") {
            text.push(chars[i]);
            i += 1;
            continue;
        }

        let mut at = i + 2;
        let trim_left = chars.get(at) == Some(&'-')
            && chars.get(at + 1).is_some_and(|c| c.is_whitespace());
        if trim_left {
            at += 2;
        }
        push_text(&mut items, &mut text, trim_next_text, trim_left);

        let comment_start = skip_whitespace(&chars, at);
        if starts_with_at(&chars, comment_start, "/*") {
            let mut end = comment_start + 2;
            while end < chars.len() && !starts_with_at(&chars, end, "*/") {
                end += 1;
            }
            if end >= chars.len() {
                return Err("unclosed comment".to_string());
            }
            let mut close = skip_whitespace(&chars, end + 2);
            trim_next_text = starts_with_at(&chars, close, "-}}");
            if trim_next_text {
                close += 1;
            }
            if !starts_with_at(&chars, close, "}}") {
                return Err("comment ends before closing delimiter".to_string());
            }
            i = close + 2;
            continue;
        }

        let (tokens, next, trim_right) = lex_action(&chars, at)?;
        items.push(Item::Action(tokens));
        trim_next_text = trim_right;
        i = next;
    }

    push_text(&mut items, &mut text, trim_next_text, false);
    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &mut String, trim_start: bool, trim_end: bool) {
    let mut slice = text.as_str();
    if trim_start {
        slice = slice.trim_start();
    }
    if trim_end {
        slice = slice.trim_end();
    }
    if !slice.is_empty() {
        items.push(Item::Text(slice.to_string()));
    }
    text.clear();
}

/// Lexes one action starting after `{{`. Returns the tokens, the position
/// after the closing delimiter and whether a right trim marker was present.
fn lex_action(chars: &[char], start: usize) -> Result<(Vec<Token>, usize, bool), String> {
    let mut tokens = Vec::new();
    let mut i = start;

    loop {
        let Some(&c) = chars.get(i) else {
            return Err("unclosed action".to_string());
        };

        if starts_with_at(chars, i, "}}") {
            return Ok((tokens, i + 2, false));
        }
        if i > start && chars[i - 1].is_whitespace() && starts_with_at(chars, i, "-}}") {
            return Ok((tokens, i + 3, true));
        }

        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '.' => {
                let (path, next) = lex_field_path(chars, i);
                tokens.push(if path.is_empty() {
                    Token::Dot
                } else {
                    Token::Field(path)
                });
                i = next.max(i + 1);
            }
            '$' => {
                let start = i;
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let mut path = Vec::new();
                if chars.get(i) == Some(&'.') {
                    let (fields, next) = lex_field_path(chars, i);
                    path = fields;
                    i = next;
                }
                tokens.push(Token::Var(name, path));
            }
            '"' => {
                let (value, next) = lex_quoted(chars, i + 1)?;
                tokens.push(Token::Literal(Value::String(value)));
                i = next;
            }
            '`' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '`' {
                    end += 1;
                }
                if end == chars.len() {
                    return Err("unterminated raw quoted string".to_string());
                }
                tokens.push(Token::Literal(Value::String(
                    chars[start..end].iter().collect(),
                )));
                i = end + 1;
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+') && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number(&text)?));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(match ident.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(format!("unexpected {other:?} in command")),
        }
    }
}

/// Lexes `.a.b` starting at a `.`; returns an empty path for a bare dot.
fn lex_field_path(chars: &[char], at: usize) -> (Vec<String>, usize) {
    let mut path = Vec::new();
    let mut i = at;
    while chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| is_ident_char(*c)) {
        i += 1;
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        path.push(chars[start..i].iter().collect());
    }
    if path.is_empty() {
        (path, at + 1)
    } else {
        (path, i)
    }
}

fn lex_quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut s = String::new();
    let mut i = start;
    loop {
        let Some(&c) = chars.get(i) else {
            return Err("unterminated quoted string".to_string());
        };
        i += 1;
        match c {
            '"' => return Ok((s, i)),
            '\\' => {
                let Some(&escaped) = chars.get(i) else {
                    return Err("unterminated quoted string".to_string());
                };
                i += 1;
                s.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    other => return Err(format!("unknown escape sequence \\{other}")),
                });
            }
            '\n' => return Err("unterminated quoted string".to_string()),
            c => s.push(c),
        }
    }
}

fn parse_number(text: &str) -> Result<Value, String> {
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    if let Ok(n) = unsigned.parse::<i64>() {
        return Ok(Value::from(n));
    }
    unsigned
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("bad number syntax: {text:?}"))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

enum Stop {
    Eof,
    End,
    Else(Vec<Token>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Control {
    If,
    With,
    Range,
}

impl Control {
    fn keyword(self) -> &'static str {
        match self {
            Control::If => "if",
            Control::With => "with",
            Control::Range => "range",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Action,
    Control(Control),
    Paren,
}

struct Parser<'a> {
    funcs: &'a FuncMap,
    items: Vec<Item>,
    pos: usize,
    /// Variables visible at the current position.
    scope: Vec<String>,
}

impl Parser<'_> {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), String> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.get(self.pos).cloned() {
            self.pos += 1;
            let tokens = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(tokens) => tokens,
            };

            let keyword = match tokens.first() {
                Some(Token::Ident(k)) => Some(k.as_str()),
                _ => None,
            };
            match keyword {
                Some("end") => {
                    if tokens.len() > 1 {
                        return Err("unexpected tokens in end".to_string());
                    }
                    return Ok((nodes, Stop::End));
                }
                Some("else") => return Ok((nodes, Stop::Else(tokens[1..].to_vec()))),
                Some("if") => nodes.push(self.parse_control(Control::If, &tokens[1..])?),
                Some("with") => nodes.push(self.parse_control(Control::With, &tokens[1..])?),
                Some("range") => nodes.push(self.parse_control(Control::Range, &tokens[1..])?),
                Some(k) if UNSUPPORTED_KEYWORDS.contains(&k) => {
                    return Err(format!("{{{{{k}}}}} is not supported"));
                }
                _ => nodes.push(Node::Action(self.parse_pipeline(&tokens, Context::Action)?)),
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn parse_control(&mut self, control: Control, tokens: &[Token]) -> Result<Node, String> {
        let outer = self.scope.len();
        let pipeline = self.parse_pipeline(tokens, Context::Control(control))?;
        let inner = self.scope.len();

        let (list, stop) = self.parse_list()?;
        self.scope.truncate(inner);

        let else_list = match stop {
            Stop::End => Vec::new(),
            Stop::Eof => return Err(format!("unexpected EOF in {}", control.keyword())),
            Stop::Else(rest) if rest.is_empty() => {
                let (else_list, stop) = self.parse_list()?;
                match stop {
                    Stop::End => else_list,
                    Stop::Eof => return Err(format!("unexpected EOF in {}", control.keyword())),
                    Stop::Else(_) => return Err("expected end; found else".to_string()),
                }
            }
            // `else if` / `else with` chains share the closing end.
            Stop::Else(rest)
                if control != Control::Range
                    && rest[0] == Token::Ident(control.keyword().to_string()) =>
            {
                vec![self.parse_control(control, &rest[1..])?]
            }
            Stop::Else(_) => return Err("unexpected tokens after else".to_string()),
        };
        self.scope.truncate(outer);

        let branch = Branch {
            pipeline,
            list,
            else_list,
        };
        Ok(match control {
            Control::If => Node::If(branch),
            Control::With => Node::With(branch),
            Control::Range => Node::Range(branch),
        })
    }

    fn parse_pipeline(&mut self, tokens: &[Token], context: Context) -> Result<Pipeline, String> {
        let mut decl = Vec::new();
        let mut assign = false;
        let mut rest = tokens;

        if context != Context::Paren {
            match tokens {
                [Token::Var(key, kp), Token::Comma, Token::Var(elem, ep), Token::Declare, tail @ ..]
                    if context == Context::Control(Control::Range)
                        && kp.is_empty()
                        && ep.is_empty() =>
                {
                    decl = vec![key.clone(), elem.clone()];
                    rest = tail;
                }
                [Token::Var(name, path), Token::Declare, tail @ ..] if path.is_empty() => {
                    decl = vec![name.clone()];
                    rest = tail;
                }
                [Token::Var(name, path), Token::Assign, tail @ ..] if path.is_empty() => {
                    if !self.scope.contains(name) {
                        return Err(format!("undefined variable {name:?}"));
                    }
                    decl = vec![name.clone()];
                    assign = true;
                    rest = tail;
                }
                _ => {}
            }
        }

        if rest.is_empty() {
            return Err("missing value for command".to_string());
        }
        let commands = self.parse_commands(rest)?;

        // Declarations become visible after the pipeline that makes them.
        if !assign {
            self.scope.extend(decl.iter().cloned());
        }

        Ok(Pipeline {
            decl,
            assign,
            commands,
        })
    }

    fn parse_commands(&mut self, tokens: &[Token]) -> Result<Vec<Command>, String> {
        let mut segments = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| "unexpected right paren".to_string())?;
                }
                Token::Pipe if depth == 0 => {
                    segments.push(&tokens[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err("unclosed left paren".to_string());
        }
        segments.push(&tokens[start..]);

        let mut commands = Vec::new();
        for (position, segment) in segments.into_iter().enumerate() {
            if segment.is_empty() {
                return Err("missing command".to_string());
            }
            let operands = self.parse_operands(segment)?;
            let is_call = matches!(operands[0], Operand::Func { .. });
            if !is_call && (operands.len() > 1 || position > 0) {
                return Err("can't give argument to non-function".to_string());
            }
            commands.push(Command { operands });
        }
        Ok(commands)
    }

    fn parse_operands(&mut self, tokens: &[Token]) -> Result<Vec<Operand>, String> {
        let mut operands = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let operand = match &tokens[i] {
                Token::Dot => Operand::Dot,
                Token::Field(path) => Operand::Field(path.clone()),
                Token::Var(name, path) => {
                    if !self.scope.contains(name) {
                        return Err(format!("undefined variable {name:?}"));
                    }
                    Operand::Var {
                        name: name.clone(),
                        path: path.clone(),
                    }
                }
                Token::Literal(value) => Operand::Literal(value.clone()),
                Token::Ident(name) => Operand::Func {
                    name: name.clone(),
                    func: self.lookup(name)?,
                },
                Token::LParen => {
                    let close = matching_paren(tokens, i)?;
                    let inner = self.parse_pipeline(&tokens[i + 1..close], Context::Paren)?;
                    i = close;
                    Operand::Sub(Box::new(inner))
                }
                other => return Err(format!("unexpected {other:?} in operand")),
            };
            operands.push(operand);
            i += 1;
        }
        Ok(operands)
    }

    fn lookup(&self, name: &str) -> Result<Callable, String> {
        if let Some(f) = self.funcs.get(name) {
            return Ok(Callable::Custom(Arc::clone(f)));
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Callable::Builtin(builtin));
        }
        if matches!(name, "if" | "else" | "end" | "range" | "with")
            || UNSUPPORTED_KEYWORDS.contains(&name)
        {
            return Err(format!("unexpected {name:?} in operand"));
        }
        Err(format!("function {name:?} not defined"))
    }
}

fn matching_paren(tokens: &[Token], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unclosed left paren".to_string())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

struct State {
    vars: Vec<(String, Value)>,
    out: String,
}

impl State {
    fn walk_list(&mut self, nodes: &[Node], dot: &Value) -> Result<(), String> {
        let mark = self.vars.len();
        for node in nodes {
            self.walk(node, dot)?;
        }
        self.vars.truncate(mark);
        Ok(())
    }

    fn walk(&mut self, node: &Node, dot: &Value) -> Result<(), String> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Action(pipeline) => {
                let value = self.eval_pipeline(pipeline, dot)?;
                if pipeline.decl.is_empty() {
                    self.out.push_str(&print_value(&value));
                }
            }
            Node::If(branch) => {
                let mark = self.vars.len();
                let value = self.eval_pipeline(&branch.pipeline, dot)?;
                if truthy(&value) {
                    self.walk_list(&branch.list, dot)?;
                } else {
                    self.walk_list(&branch.else_list, dot)?;
                }
                self.vars.truncate(mark);
            }
            Node::With(branch) => {
                let mark = self.vars.len();
                let value = self.eval_pipeline(&branch.pipeline, dot)?;
                if truthy(&value) {
                    self.walk_list(&branch.list, &value)?;
                } else {
                    self.walk_list(&branch.else_list, dot)?;
                }
                self.vars.truncate(mark);
            }
            Node::Range(branch) => self.walk_range(branch, dot)?,
        }
        Ok(())
    }

    fn walk_range(&mut self, branch: &Branch, dot: &Value) -> Result<(), String> {
        let value = self.eval_commands(&branch.pipeline.commands, dot)?;
        let entries: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
                    .into_iter()
                    .map(|(key, item)| (Value::String(key), item))
                    .collect()
            }
            Value::Null => Vec::new(),
            Value::Number(n) if n.as_u64().is_some() => (0..n.as_u64().unwrap_or(0))
                .map(|i| (Value::from(i), Value::from(i)))
                .collect(),
            other => return Err(format!("range can't iterate over {}", print_value(&other))),
        };

        if entries.is_empty() {
            return self.walk_list(&branch.else_list, dot);
        }

        for (key, item) in entries {
            let mark = self.vars.len();
            match branch.pipeline.decl.as_slice() {
                [elem] => self.vars.push((elem.clone(), item.clone())),
                [k, elem] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((elem.clone(), item.clone()));
                }
                _ => {}
            }
            self.walk_list(&branch.list, &item)?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    fn eval_pipeline(&mut self, pipeline: &Pipeline, dot: &Value) -> Result<Value, String> {
        let value = self.eval_commands(&pipeline.commands, dot)?;
        if pipeline.assign {
            let name = &pipeline.decl[0];
            match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => return Err(format!("undefined variable {name:?}")),
            }
        } else {
            for name in &pipeline.decl {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        Ok(value)
    }

    fn eval_commands(&mut self, commands: &[Command], dot: &Value) -> Result<Value, String> {
        let mut piped: Option<Value> = None;
        for command in commands {
            let value = match &command.operands[0] {
                Operand::Func { name, func } => {
                    let mut args = Vec::with_capacity(command.operands.len());
                    for operand in &command.operands[1..] {
                        args.push(self.eval_operand(operand, dot)?);
                    }
                    if let Some(previous) = piped.take() {
                        args.push(previous);
                    }
                    call(name, func, &args)?
                }
                operand => self.eval_operand(operand, dot)?,
            };
            piped = Some(value);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn eval_operand(&mut self, operand: &Operand, dot: &Value) -> Result<Value, String> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(path) => field_of(dot, path, ""),
            Operand::Var { name, path } => {
                let base = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| format!("undefined variable {name:?}"))?;
                field_of(&base, path, name)
            }
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Func { name, func } => call(name, func, &[]),
            Operand::Sub(pipeline) => self.eval_pipeline(pipeline, dot),
        }
    }
}

fn call(name: &str, func: &Callable, args: &[Value]) -> Result<Value, String> {
    let result = match func {
        Callable::Builtin(builtin) => call_builtin(*builtin, args),
        Callable::Custom(f) => (**f)(args),
    };
    result.map_err(|e| format!("error calling {name}: {e}"))
}

fn field_of(base: &Value, path: &[String], prefix: &str) -> Result<Value, String> {
    let mut current = Some(base);
    for (depth, segment) in path.iter().enumerate() {
        current = match current {
            Some(Value::Object(map)) => map.get(segment),
            None | Some(Value::Null) => {
                return Err(format!(
                    "nil pointer evaluating {prefix}.{}",
                    path[..=depth].join(".")
                ));
            }
            Some(other) => {
                return Err(format!(
                    "can't evaluate field {segment} in type {}",
                    go_type(other)
                ));
            }
        };
    }
    Ok(current.cloned().unwrap_or(Value::Null))
}

fn go_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float64",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "[]interface {}",
        Value::Object(_) => "map[string]interface {}",
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn print_value(value: &Value) -> String {
    match value {
        Value::Null => NO_VALUE.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Ok(x.cmp(&y)),
            _ => x
                .as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y))
                .ok_or_else(|| "invalid number for comparison".to_string()),
        },
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        _ => Err("incompatible types for comparison".to_string()),
    }
}

fn equal(a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(a == b),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            Err("non-comparable type".to_string())
        }
        _ => compare(a, b).map(|o| o == Ordering::Equal),
    }
}

fn arity(name: &str, args: &[Value], want: usize) -> Result<(), String> {
    if args.len() == want {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args for {name}: want {want} got {}",
            args.len()
        ))
    }
}

fn call_builtin(builtin: Builtin, args: &[Value]) -> Result<Value, String> {
    match builtin {
        Builtin::And => args
            .iter()
            .find(|a| !truthy(a))
            .or(args.last())
            .cloned()
            .ok_or_else(|| "wrong number of args for and: want at least 1 got 0".to_string()),
        Builtin::Or => args
            .iter()
            .find(|a| truthy(a))
            .or(args.last())
            .cloned()
            .ok_or_else(|| "wrong number of args for or: want at least 1 got 0".to_string()),
        Builtin::Not => {
            arity("not", args, 1)?;
            Ok(Value::Bool(!truthy(&args[0])))
        }
        Builtin::Eq => match args.split_first() {
            Some((first, rest)) if !rest.is_empty() => {
                for other in rest {
                    if equal(first, other)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            _ => Err("missing argument for comparison".to_string()),
        },
        Builtin::Ne => {
            arity("ne", args, 2)?;
            Ok(Value::Bool(!equal(&args[0], &args[1])?))
        }
        Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge => {
            arity("comparison", args, 2)?;
            let ordering = compare(&args[0], &args[1])?;
            Ok(Value::Bool(match builtin {
                Builtin::Lt => ordering == Ordering::Less,
                Builtin::Le => ordering != Ordering::Greater,
                Builtin::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        Builtin::Len => {
            arity("len", args, 1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.len())),
                Value::Array(a) => Ok(Value::from(a.len())),
                Value::Object(o) => Ok(Value::from(o.len())),
                other => Err(format!("len of type {}", go_type(other))),
            }
        }
        Builtin::Index => index(args),
        Builtin::Print => Ok(Value::String(sprint(args))),
        Builtin::Println => {
            let mut out = args.iter().map(print_value).collect::<Vec<_>>().join(" ");
            out.push('\n');
            Ok(Value::String(out))
        }
        Builtin::Printf => match args.split_first() {
            Some((Value::String(format), rest)) => Ok(Value::String(sprintf(format, rest))),
            Some((other, _)) => Err(format!(
                "wrong type for value; expected string; got {}",
                go_type(other)
            )),
            None => Err("wrong number of args for printf: want at least 1 got 0".to_string()),
        },
    }
}

fn index(args: &[Value]) -> Result<Value, String> {
    let Some((collection, keys)) = args.split_first() else {
        return Err("wrong number of args for index: want at least 1 got 0".to_string());
    };
    let mut current = collection.clone();
    for key in keys {
        current = match (&current, key) {
            (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Array(items), Value::Number(n)) => {
                let idx = n
                    .as_u64()
                    .ok_or_else(|| format!("cannot index slice with {n}"))?;
                usize::try_from(idx)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| format!("index out of range: {idx}"))?
            }
            (Value::Null, _) => return Err("index of untyped nil".to_string()),
            (other, key) => {
                return Err(format!(
                    "can't index item of type {} with {}",
                    go_type(other),
                    go_type(key)
                ));
            }
        };
    }
    Ok(current)
}

/// Spaces separate operands when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&print_value(arg));
    }
    out
}

#[derive(Default)]
struct Spec {
    minus: bool,
    plus: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    let mut next_arg = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.minus = true,
                '+' => spec.plus = true,
                '0' => spec.zero = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        spec.width = take_digits(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(take_digits(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = args.get(next_arg) else {
            let _ = write!(out, "%!{verb}(MISSING)");
            continue;
        };
        next_arg += 1;

        let body = format_verb(verb, &spec, arg);
        out.push_str(&pad(body, &spec, matches!(verb, 'd' | 'f' | 'F' | 'g' | 'x' | 'X')));
    }

    if next_arg < args.len() {
        let extra = args[next_arg..]
            .iter()
            .map(|a| format!("{}={}", go_type(a), print_value(a)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(out, "%!(EXTRA {extra})");
    }
    out
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&d) = chars.peek() {
        if !d.is_ascii_digit() {
            break;
        }
        digits.push(d);
        chars.next();
    }
    digits.parse().ok()
}

fn format_verb(verb: char, spec: &Spec, arg: &Value) -> String {
    let bad = || format!("%!{verb}({}={})", go_type(arg), print_value(arg));
    let signed = |s: String, negative: bool| {
        if spec.plus && !negative {
            format!("+{s}")
        } else {
            s
        }
    };

    match (verb, arg) {
        ('v', _) => print_value(arg),
        ('s', Value::String(s)) => match spec.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.clone(),
        },
        ('q', Value::String(s)) => serde_json::to_string(s).unwrap_or_else(|_| bad()),
        ('t', Value::Bool(b)) => b.to_string(),
        ('d', Value::Number(n)) => match n.as_i64() {
            Some(i) => signed(i.to_string(), i < 0),
            None => n.as_u64().map(|u| signed(u.to_string(), false)).unwrap_or_else(bad),
        },
        ('f' | 'F', Value::Number(n)) => match n.as_f64() {
            Some(f) => signed(format!("{:.*}", spec.precision.unwrap_or(6), f), f < 0.0),
            None => bad(),
        },
        ('g', Value::Number(n)) => signed(n.to_string(), n.as_f64().is_some_and(|f| f < 0.0)),
        ('x' | 'X', Value::String(s)) => {
            let hex: String = s.bytes().map(|b| format!("{b:02x}")).collect();
            if verb == 'X' { hex.to_uppercase() } else { hex }
        }
        ('x' | 'X', Value::Number(n)) => match n.as_i64() {
            Some(i) => {
                let hex = if i < 0 {
                    format!("-{:x}", i.unsigned_abs())
                } else {
                    format!("{i:x}")
                };
                if verb == 'X' { hex.to_uppercase() } else { hex }
            }
            None => bad(),
        },
        _ => bad(),
    }
}

fn pad(body: String, spec: &Spec, numeric: bool) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let fill = width - len;
    if spec.minus {
        format!("{body}{}", " ".repeat(fill))
    } else if spec.zero && numeric {
        let first = body.chars().next();
        let (sign, digits) = match first {
            Some(c @ ('-' | '+')) => (c.to_string(), body[1..].to_string()),
            _ => (String::new(), body),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}
