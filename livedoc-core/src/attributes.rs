//! Typed chunk attributes.
//!
//! The scanner hands over a normalized key/value map. The engine only
//! interprets a fixed set of keys; everything else rides along in
//! [`ChunkAttributes::extra`].

use livedoc_types::{ChunkId, OutputFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AttributeError {
    #[error("attribute `{key}` has an invalid value: {value}")]
    InvalidValue { key: String, value: String },

    #[error("unterminated {0} in attribute list")]
    Unterminated(&'static str),

    #[error("expected an attribute name at `{0}`")]
    ExpectedKey(String),
}

/// What a chunk's `cmd` names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSpec {
    /// `cmd=true`: run the fence language as the program
    Language,
    /// `cmd="program"`
    Program(String),
}

/// Which chunk's code a `continue` chunk builds on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuation {
    /// `continue=true`: the chunk immediately before this one
    Previous,
    /// `continue="id"`
    Chunk(ChunkId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkAttributes {
    pub cmd: Option<CommandSpec>,
    pub args: Vec<String>,
    pub stdin: bool,
    #[serde(rename = "continue")]
    pub continue_from: Option<Continuation>,
    pub output: OutputFormat,
    pub modify_source: bool,
    pub run_on_save: bool,
    pub hide: bool,
    pub filename: Option<String>,
    pub id: Option<String>,
    /// Keys the engine does not interpret
    pub extra: BTreeMap<String, Value>,
}

impl ChunkAttributes {
    /// Build typed attributes from the scanner's normalized map
    pub fn from_map(map: Map<String, Value>) -> Result<Self, AttributeError> {
        let mut attrs = ChunkAttributes::default();

        for (key, value) in map {
            match key.as_str() {
                "cmd" => {
                    attrs.cmd = match value {
                        Value::Bool(true) => Some(CommandSpec::Language),
                        Value::Bool(false) | Value::Null => None,
                        Value::String(program) if program.trim().is_empty() => None,
                        Value::String(program) => Some(CommandSpec::Program(program)),
                        other => return Err(invalid(&key, &other)),
                    }
                }
                "args" => {
                    attrs.args = match value {
                        Value::String(s) => s.split_whitespace().map(String::from).collect(),
                        Value::Array(items) => items.into_iter().map(scalar_to_string).collect(),
                        Value::Null => Vec::new(),
                        other => return Err(invalid(&key, &other)),
                    }
                }
                "stdin" => attrs.stdin = flag(&key, &value)?,
                "continue" => {
                    attrs.continue_from = match value {
                        Value::Bool(true) => Some(Continuation::Previous),
                        Value::Bool(false) | Value::Null => None,
                        Value::String(id) => Some(Continuation::Chunk(ChunkId::new(id))),
                        other => return Err(invalid(&key, &other)),
                    }
                }
                "output" => {
                    attrs.output = serde_json::from_value(value.clone())
                        .map_err(|_| invalid(&key, &value))?;
                }
                "modify_source" | "modifySource" => attrs.modify_source = flag(&key, &value)?,
                "run_on_save" | "runOnSave" => attrs.run_on_save = flag(&key, &value)?,
                "hide" => attrs.hide = flag(&key, &value)?,
                "filename" => attrs.filename = Some(scalar_to_string(value)),
                "id" => attrs.id = Some(scalar_to_string(value)),
                _ => {
                    attrs.extra.insert(key, value);
                }
            }
        }

        Ok(attrs)
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }

    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }
}

fn invalid(key: &str, value: &Value) -> AttributeError {
    AttributeError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn flag(key: &str, value: &Value) -> Result<bool, AttributeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(invalid(key, other)),
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Parse the text inside a fence's `{...}` into a normalized map
///
/// Accepts `key=value`, `key:value` and bare `key` (meaning `true`),
/// separated by whitespace or commas. Values are double- or single-quoted
/// strings, JSON arrays, or bare words (`true`, `false`, numbers, anything
/// else is a string).
///
/// ```
/// use livedoc_core::attributes::parse_attribute_list;
///
/// let map = parse_attribute_list(r#"cmd=true args=["-c", "x"] hide"#).unwrap();
/// assert_eq!(map["cmd"], true);
/// assert_eq!(map["args"][1], "x");
/// assert_eq!(map["hide"], true);
/// ```
pub fn parse_attribute_list(src: &str) -> Result<Map<String, Value>, AttributeError> {
    let chars: Vec<char> = src.chars().collect();
    let mut map = Map::new();
    let mut pos = 0;

    loop {
        while pos < chars.len() && (chars[pos].is_whitespace() || chars[pos] == ',') {
            pos += 1;
        }
        if pos >= chars.len() {
            break;
        }

        let start = pos;
        while pos < chars.len() && is_key_char(chars[pos]) {
            pos += 1;
        }
        if start == pos {
            return Err(AttributeError::ExpectedKey(chars[start..].iter().collect()));
        }
        let key: String = chars[start..pos].iter().collect();

        while pos < chars.len() && chars[pos] == ' ' {
            pos += 1;
        }
        if pos < chars.len() && (chars[pos] == '=' || chars[pos] == ':') {
            pos += 1;
            while pos < chars.len() && chars[pos] == ' ' {
                pos += 1;
            }
            let (value, next) = parse_value(&chars, pos)?;
            map.insert(key, value);
            pos = next;
        } else {
            map.insert(key, Value::Bool(true));
        }
    }

    Ok(map)
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn parse_value(chars: &[char], pos: usize) -> Result<(Value, usize), AttributeError> {
    match chars.get(pos) {
        Some(&quote @ ('"' | '\'')) => {
            let (text, next) = parse_quoted(chars, pos, quote)?;
            Ok((Value::String(text), next))
        }
        Some('[') => parse_array(chars, pos),
        _ => {
            let start = pos;
            let mut end = pos;
            while end < chars.len() && !chars[end].is_whitespace() && chars[end] != ',' {
                end += 1;
            }
            let word: String = chars[start..end].iter().collect();
            Ok((bare_word(&word), end))
        }
    }
}

fn parse_quoted(chars: &[char], pos: usize, quote: char) -> Result<(String, usize), AttributeError> {
    let mut text = String::new();
    let mut i = pos + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(AttributeError::Unterminated("string"))
}

fn parse_array(chars: &[char], pos: usize) -> Result<(Value, usize), AttributeError> {
    let mut items = Vec::new();
    let mut i = pos + 1;
    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        match chars.get(i) {
            None => return Err(AttributeError::Unterminated("array")),
            Some(']') => return Ok((Value::Array(items), i + 1)),
            Some(&quote @ ('"' | '\'')) => {
                let (text, next) = parse_quoted(chars, i, quote)?;
                items.push(Value::String(text));
                i = next;
            }
            Some(_) => {
                let start = i;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && chars[i] != ','
                    && chars[i] != ']'
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                items.push(bare_word(&word));
            }
        }
    }
}

fn bare_word(word: &str) -> Value {
    match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => serde_json::from_str::<serde_json::Number>(word)
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(word.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(src: &str) -> ChunkAttributes {
        ChunkAttributes::from_map(parse_attribute_list(src).unwrap()).unwrap()
    }

    #[test]
    fn test_cmd_forms() {
        assert_eq!(attrs("cmd=true").cmd, Some(CommandSpec::Language));
        assert_eq!(
            attrs("cmd=\"python3\"").cmd,
            Some(CommandSpec::Program("python3".into()))
        );
        assert_eq!(attrs("cmd=node").cmd, Some(CommandSpec::Program("node".into())));
        assert_eq!(attrs("cmd=false").cmd, None);
    }

    #[test]
    fn test_args_string_and_array() {
        assert_eq!(attrs("args=\"-u -B\"").args, vec!["-u", "-B"]);
        assert_eq!(
            attrs(r#"args=["-c", 'print(1)', $input_file]"#).args,
            vec!["-c", "print(1)", "$input_file"]
        );
    }

    #[test]
    fn test_continue_forms() {
        assert_eq!(attrs("continue").continue_from, Some(Continuation::Previous));
        assert_eq!(
            attrs("continue=\"setup\"").continue_from,
            Some(Continuation::Chunk(ChunkId::new("setup")))
        );
        assert_eq!(attrs("continue=false").continue_from, None);
    }

    #[test]
    fn test_flags_output_and_extra() {
        let a = attrs("cmd=true, output=html modify_source stdin runOnSave depthFrom=2 hide=false");
        assert_eq!(a.output, OutputFormat::Html);
        assert!(a.modify_source);
        assert!(a.stdin);
        assert!(a.run_on_save);
        assert!(!a.hide);
        assert_eq!(a.extra_u64("depthFrom"), Some(2));
        assert_eq!(a.extra.get("cmd"), None);
    }

    #[test]
    fn test_invalid_output_is_rejected() {
        let map = parse_attribute_list("output=pdf").unwrap();
        let err = ChunkAttributes::from_map(map).unwrap_err();
        assert!(matches!(err, AttributeError::InvalidValue { ref key, .. } if key == "output"));
    }

    #[test]
    fn test_non_bool_flag_is_rejected() {
        let map = Map::from_iter([("stdin".to_string(), json!("yes"))]);
        assert!(ChunkAttributes::from_map(map).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_attribute_list("id=\"open"),
            Err(AttributeError::Unterminated("string"))
        );
        assert_eq!(
            parse_attribute_list("args=[\"a\""),
            Err(AttributeError::Unterminated("array"))
        );
        assert!(matches!(
            parse_attribute_list("=x"),
            Err(AttributeError::ExpectedKey(_))
        ));
    }

    #[test]
    fn test_id_and_filename_are_strings() {
        let a = attrs("id=42 filename=\"out.png\"");
        assert_eq!(a.id.as_deref(), Some("42"));
        assert_eq!(a.filename.as_deref(), Some("out.png"));
    }
}
