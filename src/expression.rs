//! # Expression Evaluation
//!
//! The tree builder never interprets expressions itself: it hands them to an
//! [`Evaluator`] together with the data of the instance the expression is
//! scoped to. [`DefaultEvaluator`] covers the template subset the builder
//! needs (keypaths, literals, negation, comparisons, `&&`/`||`, ternaries and
//! `+`). Hosts with a richer expression language plug in their own.
//!
//! Filter pipelines are applied by [`apply_filters`] against the filter
//! registry visible from the instance.

use std::rc::Rc;

use serde_json::{Map, Number, Value};

use crate::assets::Registry;
use crate::common::{get_path, is_truthy};
use crate::element::FilterCall;
use crate::error::BuildIssue;

/// A registered filter: receives the piped value and the evaluated arguments.
pub type Filter = Rc<dyn Fn(Value, &[Value]) -> anyhow::Result<Value>>;

pub trait Evaluator {
    /// Evaluate `expr` against `data`. `None` means "undefined".
    /// Implementations must not panic on malformed input.
    fn get_value(&self, data: &Map<String, Value>, expr: &str) -> Option<Value>;
}

/// A failed filter pipeline. `partial` is the value as it stood before the
/// failing filter ran; callers log the issue and carry on with it.
#[derive(Debug, Clone)]
pub struct FilterFailure {
    pub partial: Value,
    pub issue: BuildIssue,
}

pub fn apply_filters(
    evaluator: &dyn Evaluator,
    data: &Map<String, Value>,
    registry: &Registry<Filter>,
    calls: &[FilterCall],
    value: Value,
) -> Result<Value, FilterFailure> {
    let mut current = value;
    for call in calls {
        let Some((_, filter)) = registry.lookup(&call.name) else {
            return Err(FilterFailure {
                partial: current,
                issue: BuildIssue::MissingFilter {
                    name: call.name.clone(),
                },
            });
        };
        let args: Vec<Value> = call
            .args
            .iter()
            .map(|a| evaluator.get_value(data, a).unwrap_or(Value::Null))
            .collect();
        match filter(current.clone(), &args) {
            Ok(next) => current = next,
            Err(e) => {
                return Err(FilterFailure {
                    partial: current,
                    issue: BuildIssue::FilterFailed {
                        filter: call.name.clone(),
                        error: e.to_string(),
                    },
                })
            }
        }
    }
    Ok(current)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULT EVALUATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn get_value(&self, data: &Map<String, Value>, expr: &str) -> Option<Value> {
        eval(expr, data)
    }
}

fn eval(expr: &str, data: &Map<String, Value>) -> Option<Value> {
    let trimmed = expr.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(value) = try_ternary(trimmed, data) {
        return value;
    }

    if let Some((idx, op)) = find_top_level(trimmed, &["||"]) {
        let left = eval(&trimmed[..idx], data);
        if left.as_ref().map(is_truthy).unwrap_or(false) {
            return left;
        }
        return eval(&trimmed[idx + op.len()..], data);
    }

    if let Some((idx, op)) = find_top_level(trimmed, &["&&"]) {
        let left = eval(&trimmed[..idx], data);
        if !left.as_ref().map(is_truthy).unwrap_or(false) {
            return left;
        }
        return eval(&trimmed[idx + op.len()..], data);
    }

    if let Some((idx, op)) = find_top_level(trimmed, &["===", "!==", "==", "!="]) {
        let left = eval(&trimmed[..idx], data);
        let right = eval(&trimmed[idx + op.len()..], data);
        let equal = loosely_equal(left.as_ref(), right.as_ref());
        return Some(Value::Bool(if op.starts_with('!') { !equal } else { equal }));
    }

    if let Some((idx, op)) = find_top_level(trimmed, &[">=", "<=", ">", "<"]) {
        let left = eval(&trimmed[..idx], data).unwrap_or(Value::Null);
        let right = eval(&trimmed[idx + op.len()..], data).unwrap_or(Value::Null);
        return Some(Value::Bool(compare(&left, &right, op)));
    }

    if let Some((idx, op)) = find_top_level(trimmed, &["+"]) {
        if idx > 0 {
            let left = eval(&trimmed[..idx], data).unwrap_or(Value::Null);
            let right = eval(&trimmed[idx + op.len()..], data).unwrap_or(Value::Null);
            return Some(add(&left, &right));
        }
    }

    if let Some(rest) = trimmed.strip_prefix('!') {
        let inner = eval(rest, data);
        return Some(Value::Bool(!inner.as_ref().map(is_truthy).unwrap_or(false)));
    }

    if trimmed.starts_with('(') && find_closing_paren(trimmed) == Some(trimmed.len() - 1) {
        return eval(&trimmed[1..trimmed.len() - 1], data);
    }

    primary(trimmed, data)
}

fn primary(expr: &str, data: &Map<String, Value>) -> Option<Value> {
    if let Some(literal) = try_parse_string_literal(expr) {
        return Some(Value::String(literal));
    }

    match expr {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        "undefined" => return None,
        _ => {}
    }

    if let Ok(int) = expr.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    if let Ok(float) = expr.parse::<f64>() {
        return Number::from_f64(float).map(Value::Number);
    }

    if let Some(prefix) = expr.strip_suffix(".length") {
        return match eval(prefix, data)? {
            Value::Array(items) => Some(Value::Number(items.len().into())),
            Value::String(s) => Some(Value::Number(s.chars().count().into())),
            Value::Object(map) => map.get("length").cloned(),
            _ => None,
        };
    }

    get_path(data, expr).cloned()
}

fn loosely_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare(left: &Value, right: &Value, op: &str) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        ">=" => ordering.is_ge(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        "<" => ordering.is_lt(),
        _ => false,
    }
}

fn add(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Value::Number((x + y).into()),
            _ => Number::from_f64(a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN))
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
        _ => Value::String(format!("{}{}", display(left), display(right))),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn try_ternary(expr: &str, data: &Map<String, Value>) -> Option<Option<Value>> {
    let bytes = expr.as_bytes();
    let mut depth: i32 = 0;
    let mut question_idx = None;
    let mut nested = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'?' if depth == 0 => {
                if question_idx.is_none() {
                    question_idx = Some(i);
                } else {
                    nested += 1;
                }
            }
            b':' if depth == 0 && question_idx.is_some() => {
                if nested == 0 {
                    let q = question_idx?;
                    let condition = eval(&expr[..q], data);
                    let branch = if condition.as_ref().map(is_truthy).unwrap_or(false) {
                        &expr[q + 1..i]
                    } else {
                        &expr[i + 1..]
                    };
                    return Some(eval(branch, data));
                }
                nested -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the last top-level occurrence of any operator in `ops`
/// (operators listed longest first).
fn find_top_level<'o>(expr: &str, ops: &[&'o str]) -> Option<(usize, &'o str)> {
    let bytes = expr.as_bytes();
    let mut depth: i32 = 0;
    let mut found = None;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i) + 1;
                continue;
            }
            _ if depth == 0 => {
                if let Some(op) = ops.iter().find(|op| expr[i..].starts_with(**op)) {
                    found = Some((i, *op));
                    i += op.len();
                    continue;
                }
                // Skip over longer operators that merely contain ours.
                if let Some(skip) = ["===", "!==", "==", "!=", ">=", "<=", "&&", "||"]
                    .iter()
                    .find(|other| expr[i..].starts_with(**other))
                {
                    i += skip.len();
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() && bytes[i] != quote {
        if bytes[i] == b'\\' {
            i += 1;
        }
        i += 1;
    }
    i.min(bytes.len().saturating_sub(1))
}

fn find_closing_paren(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut depth = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn try_parse_string_literal(s: &str) -> Option<String> {
    let quoted = |q: char| s.len() >= 2 && s.starts_with(q) && s.ends_with(q);
    if quoted('"') || quoted('\'') || (quoted('`') && !s.contains("${")) {
        let inner = &s[1..s.len() - 1];
        if inner.contains(&s[..1]) && !inner.contains('\\') {
            // `'a' + 'b'` style input that merely starts and ends with quotes
            return None;
        }
        return Some(unescape_string(inner));
    }
    None
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(other) => result.push(other),
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}
