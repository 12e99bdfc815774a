//! Template resolution for node parameters
//!
//! A parameter string may carry `{{path}}` tokens where `path` follows
//! `identifier ('.' identifier | '[' integer ']')*`:
//!
//! - a string that is exactly one token resolves to the native value
//! - tokens embedded in text are stringified and substituted left to right
//! - tokens that do not resolve are left as written
//!
//! Lookup order for the root identifier: system variables (`$date`, `$time`,
//! `$timestamp`, `$datetime`), node outputs addressed `<nodeId>.<output>`,
//! then workflow variables.
//!
//! ```
//! use graphcore::Value;
//! use graphruntime::{VariableResolver, VariableScope};
//!
//! let mut scope = VariableScope::default();
//! scope.set_variable("name", Value::from("World"));
//!
//! let resolver = VariableResolver::new();
//! let out = resolver.resolve(&Value::from("Hello {{name}}"), &scope);
//! assert_eq!(out, Value::from("Hello World"));
//! ```

use chrono::{DateTime, Local};
use graphcore::{NodeId, Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use thiserror::Error;

/// Any `{{...}}` token inside a string
static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("Valid regex pattern"));

/// A string made of a single token and nothing else
static WHOLE_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*([^{}]*?)\s*\}\}$").expect("Valid regex pattern"));

const SYSTEM_SIGIL: char = '$';

/// Variables visible to template resolution during one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    variables: HashMap<String, Value>,
    node_outputs: HashMap<NodeId, HashMap<String, Value>>,
}

impl VariableScope {
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            node_outputs: HashMap::new(),
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Add outputs under the node's namespace, replacing same-named ones
    pub fn merge_node_output(&mut self, node_id: &str, outputs: HashMap<String, Value>) {
        self.node_outputs
            .entry(node_id.to_string())
            .or_default()
            .extend(outputs);
    }

    pub fn node_output(&self, node_id: &str, name: &str) -> Option<&Value> {
        self.node_outputs.get(node_id).and_then(|o| o.get(name))
    }

    pub fn node_outputs(&self) -> &HashMap<NodeId, HashMap<String, Value>> {
        &self.node_outputs
    }
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(DateTime<Local>),
}

/// Pure, total template resolver. Never fails.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    clock: Clock,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableResolver {
    pub fn new() -> Self {
        Self { clock: Clock::System }
    }

    /// Resolver whose system variables report a fixed instant
    pub fn with_fixed_time(now: DateTime<Local>) -> Self {
        Self {
            clock: Clock::Fixed(now),
        }
    }

    /// Resolve a parameter value. Only strings are inspected.
    pub fn resolve(&self, value: &Value, scope: &VariableScope) -> Value {
        match value {
            Value::String(s) => self.resolve_str(s, scope),
            other => other.clone(),
        }
    }

    /// Like [`resolve`](Self::resolve) but descends into lists and maps
    pub fn resolve_deep(&self, value: &Value, scope: &VariableScope) -> Value {
        match value {
            Value::List(items) => {
                Value::List(items.iter().map(|v| self.resolve_deep(v, scope)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_deep(v, scope)))
                    .collect(),
            ),
            other => self.resolve(other, scope),
        }
    }

    fn resolve_str(&self, text: &str, scope: &VariableScope) -> Value {
        if !text.contains("{{") {
            return Value::String(text.to_string());
        }

        if let Some(caps) = WHOLE_TOKEN_REGEX.captures(text) {
            return match self.lookup(&caps[1], scope) {
                Some(value) => value,
                None => {
                    tracing::debug!("Unresolved template token left verbatim: {}", text);
                    Value::String(text.to_string())
                }
            };
        }

        let interpolated = TOKEN_REGEX.replace_all(text, |caps: &Captures| {
            match self.lookup(&caps[1], scope) {
                Some(value) => value.to_string(),
                None => {
                    tracing::debug!("Unresolved template token left verbatim: {}", &caps[0]);
                    caps[0].to_string()
                }
            }
        });
        Value::String(interpolated.into_owned())
    }

    /// Look up a bare path expression such as `data.users[0].name`
    pub fn lookup(&self, expression: &str, scope: &VariableScope) -> Option<Value> {
        let path = match parse_path(expression.trim()) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("Invalid template path '{}': {}", expression, e);
                return None;
            }
        };

        if path.root.starts_with(SYSTEM_SIGIL) {
            let value = self.system_variable(&path.root)?;
            return walk(&value, &path.segments).cloned();
        }

        if let Some(Segment::Key(output)) = path.segments.first() {
            if let Some(value) = scope.node_output(&path.root, output) {
                return walk(value, &path.segments[1..]).cloned();
            }
        }

        let value = scope.variable(&path.root)?;
        walk(value, &path.segments).cloned()
    }

    fn now(&self) -> DateTime<Local> {
        match self.clock {
            Clock::System => Local::now(),
            Clock::Fixed(now) => now,
        }
    }

    fn system_variable(&self, name: &str) -> Option<Value> {
        let now = self.now();
        let value = match name {
            "$date" => Value::String(now.format("%Y-%m-%d").to_string()),
            "$time" => Value::String(now.format("%H:%M:%S").to_string()),
            "$timestamp" => Value::Number(now.timestamp() as f64),
            "$datetime" => Value::String(now.to_rfc3339()),
            _ => return None,
        };
        Some(value)
    }
}

fn walk<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Key(key) => current.get(key),
        Segment::Index(index) => current.index(*index),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    root: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq)]
enum PathError {
    #[error("expected identifier at offset {0}")]
    ExpectedIdentifier(usize),
    #[error("expected integer index at offset {0}")]
    ExpectedIndex(usize),
    #[error("expected ']' at offset {0}")]
    UnclosedIndex(usize),
    #[error("unexpected character '{1}' at offset {0}")]
    Unexpected(usize, char),
}

fn parse_path(input: &str) -> Result<Path, PathError> {
    let mut parser = PathParser { input, pos: 0 };
    let root = parser.identifier(true)?;
    let segments = parser.segments()?;
    Ok(Path { root, segments })
}

/// Single-pass parser over `{identifier, '.', '[', integer, ']'}`
struct PathParser<'a> {
    input: &'a str,
    pos: usize,
}

impl PathParser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn segments(&mut self) -> Result<Vec<Segment>, PathError> {
        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.bump();
                    segments.push(Segment::Key(self.identifier(false)?));
                }
                '[' => {
                    self.bump();
                    segments.push(Segment::Index(self.index()?));
                }
                other => return Err(PathError::Unexpected(self.pos, other)),
            }
        }
        Ok(segments)
    }

    fn identifier(&mut self, root: bool) -> Result<String, PathError> {
        let start = self.pos;
        if root && self.peek() == Some(SYSTEM_SIGIL) {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                self.bump();
            } else {
                break;
            }
        }
        let ident = &self.input[start..self.pos];
        if ident.is_empty() || ident == "$" {
            return Err(PathError::ExpectedIdentifier(start));
        }
        Ok(ident.to_string())
    }

    fn index(&mut self) -> Result<usize, PathError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let index = self.input[start..self.pos]
            .parse()
            .map_err(|_| PathError::ExpectedIndex(start))?;
        if self.bump() != Some(']') {
            return Err(PathError::UnclosedIndex(self.pos));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn scope(json: serde_json::Value) -> VariableScope {
        match Value::from(json) {
            Value::Map(map) => VariableScope::new(map),
            _ => panic!("scope must be an object"),
        }
    }

    fn resolve(template: &str, vars: serde_json::Value) -> Value {
        VariableResolver::new().resolve(&Value::from(template), &scope(vars))
    }

    #[test]
    fn single_token_keeps_native_type() {
        assert_eq!(resolve("{{x}}", json!({"x": 42})), Value::Number(42.0));
    }

    #[test]
    fn embedded_token_interpolates() {
        assert_eq!(
            resolve("Hello {{name}}", json!({"name": "World"})),
            Value::from("Hello World")
        );
    }

    #[test]
    fn missing_token_is_left_verbatim() {
        assert_eq!(resolve("{{missing}}", json!({})), Value::from("{{missing}}"));
        assert_eq!(
            resolve("a {{missing}} b {{x}}", json!({"x": 1})),
            Value::from("a {{missing}} b 1")
        );
    }

    #[test]
    fn dotted_and_indexed_paths() {
        assert_eq!(resolve("{{obj.key}}", json!({"obj": {"key": "v"}})), Value::from("v"));
        assert_eq!(resolve("{{items[0]}}", json!({"items": [1, 2]})), Value::Number(1.0));
        assert_eq!(
            resolve(
                "{{data.users[1].name}}",
                json!({"data": {"users": [{"name": "a"}, {"name": "b"}]}})
            ),
            Value::from("b")
        );
    }

    #[test]
    fn whole_token_may_return_collections() {
        let out = resolve("{{data.users}}", json!({"data": {"users": [1, 2]}}));
        assert_eq!(out, Value::List(vec![Value::Number(1.0), Value::Number(2.0)]));
    }

    #[test]
    fn whitespace_inside_braces_is_ignored() {
        assert_eq!(resolve("{{ x }}", json!({"x": true})), Value::Bool(true));
    }

    #[test]
    fn collections_are_stringified_as_json_when_embedded() {
        assert_eq!(resolve("list={{l}}", json!({"l": [1, "a"]})), Value::from(r#"list=[1,"a"]"#));
    }

    #[test]
    fn non_strings_pass_through() {
        let resolver = VariableResolver::new();
        let list = Value::List(vec![Value::from("{{x}}")]);
        assert_eq!(resolver.resolve(&list, &scope(json!({"x": 1}))), list);
        assert_eq!(resolver.resolve(&Value::Number(3.0), &scope(json!({}))), Value::Number(3.0));
    }

    #[test]
    fn resolve_deep_descends_into_collections() {
        let resolver = VariableResolver::new();
        let list = Value::List(vec![Value::from("{{x}}")]);
        assert_eq!(
            resolver.resolve_deep(&list, &scope(json!({"x": 1}))),
            Value::List(vec![Value::Number(1.0)])
        );
    }

    #[test]
    fn malformed_paths_stay_verbatim() {
        assert_eq!(resolve("{{items[x]}}", json!({"items": [1]})), Value::from("{{items[x]}}"));
        assert_eq!(resolve("{{a..b}}", json!({"a": {}})), Value::from("{{a..b}}"));
        assert_eq!(resolve("{{}}", json!({})), Value::from("{{}}"));
    }

    #[test]
    fn out_of_range_index_is_unresolved() {
        assert_eq!(resolve("{{items[5]}}", json!({"items": [1]})), Value::from("{{items[5]}}"));
    }

    #[test]
    fn node_outputs_win_over_workflow_variables() {
        let mut scope = scope(json!({"fetch": {"body": "from-variable"}}));
        scope.merge_node_output(
            "fetch",
            HashMap::from([("body".to_string(), Value::from("from-node"))]),
        );
        let out = VariableResolver::new().resolve(&Value::from("{{fetch.body}}"), &scope);
        assert_eq!(out, Value::from("from-node"));

        // other roots still fall through to variables
        let out = VariableResolver::new().resolve(&Value::from("{{fetch.other}}"), &scope);
        assert_eq!(out, Value::from("{{fetch.other}}"));
    }

    #[test]
    fn node_output_paths_descend_into_values() {
        let mut scope = VariableScope::default();
        scope.merge_node_output(
            "read",
            HashMap::from([("rows".to_string(), Value::from(json!([{"id": 7}])))]),
        );
        let out = VariableResolver::new().resolve(&Value::from("{{read.rows[0].id}}"), &scope);
        assert_eq!(out, Value::Number(7.0));
    }

    #[test]
    fn system_variables_come_first() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        let resolver = VariableResolver::with_fixed_time(now);
        let scope = scope(json!({"$date": "shadowed"}));

        assert_eq!(
            resolver.resolve(&Value::from("{{$date}}"), &scope),
            Value::from("2024-03-09")
        );
        assert_eq!(
            resolver.resolve(&Value::from("at {{$time}}"), &scope),
            Value::from("at 14:05:06")
        );
        assert_eq!(
            resolver.resolve(&Value::from("{{$timestamp}}"), &scope),
            Value::Number(now.timestamp() as f64)
        );
    }

    #[test]
    fn unknown_system_variable_is_unresolved() {
        assert_eq!(resolve("{{$nope}}", json!({})), Value::from("{{$nope}}"));
    }

    #[test]
    fn parser_handles_deep_paths() {
        let path = parse_path("a.b[2].c[0][1]").unwrap();
        assert_eq!(path.root, "a");
        assert_eq!(
            path.segments,
            vec![
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
                Segment::Index(0),
                Segment::Index(1),
            ]
        );
        assert!(matches!(parse_path("a b"), Err(PathError::Unexpected(1, ' '))));
    }

    #[test]
    fn very_deep_path_stays_verbatim() {
        let template = format!("{{{{a{}}}}}", ".b".repeat(10_000));
        assert_eq!(resolve(&template, json!({"a": "x"})), Value::from(template.as_str()));

        let path = parse_path(&format!("a{}", "[0]".repeat(10_000))).unwrap();
        assert_eq!(path.segments.len(), 10_000);
    }
}
