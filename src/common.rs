//! Shared helpers: name casing, keypaths, truthiness and the native tag list.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// Tag names that are never treated as implicit component references,
    /// even when a registered component happens to share the name.
    static ref NATIVE_TAG_RE: Regex = Regex::new(
        r"^(div|p|span|img|a|b|i|br|ul|ol|li|h1|h2|h3|h4|h5|h6|code|pre|table|th|td|tr|form|label|input|select|option|nav|article|section|header|footer)$"
    )
    .unwrap();
    static ref NUMERIC_RE: Regex = Regex::new(r"^-?\d+").unwrap();
    static ref KEYPATH_SEGMENT_RE: Regex =
        Regex::new(r#"([^.\[\]]+)|\[(\d+)\]|\[['"]([^'"]*)['"]\]"#).unwrap();
}

/// `my-comp` -> `myComp`
pub fn dash_to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `my-comp` -> `MyComp`
pub fn dash_to_upper_camel_case(name: &str) -> String {
    let camel = dash_to_camel_case(name);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `myProp` -> `my-prop`
pub fn camel_to_dash_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn is_native_tag(name: &str) -> bool {
    NATIVE_TAG_RE.is_match(&name.to_lowercase())
}

/// Loose "looks like an integer" check used for numeric loop sources.
pub fn looks_numeric(s: &str) -> bool {
    NUMERIC_RE.is_match(s)
}

/// Truthiness with the template language's rules: empty strings, zero,
/// NaN, `false` and `null` are falsy; every array and object is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_keypath(path: &str) -> Vec<Segment> {
    KEYPATH_SEGMENT_RE
        .captures_iter(path.trim())
        .filter_map(|cap| {
            if let Some(key) = cap.get(1) {
                let key = key.as_str().trim();
                if key.is_empty() {
                    None
                } else {
                    Some(Segment::Key(key.to_string()))
                }
            } else if let Some(idx) = cap.get(2) {
                idx.as_str().parse().ok().map(Segment::Index)
            } else {
                cap.get(3).map(|k| Segment::Key(k.as_str().to_string()))
            }
        })
        .collect()
}

/// Resolve `a.b[0].c` against a data map.
pub fn get_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse_keypath(path);
    let (first, rest) = segments.split_first()?;
    let mut current = match first {
        Segment::Key(k) => data.get(k)?,
        Segment::Index(_) => return None,
    };
    for segment in rest {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            (Segment::Key(k), Value::Array(items)) => {
                if k == "length" {
                    return None;
                }
                items.get(k.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Assign by keypath, creating intermediate objects as needed.
/// Returns false when an intermediate segment is a non-container value.
pub fn set_path(data: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    let segments = parse_keypath(path);
    let Some((last, init)) = segments.split_last() else {
        return false;
    };

    if init.is_empty() {
        return match last {
            Segment::Key(k) => {
                data.insert(k.clone(), value);
                true
            }
            Segment::Index(_) => false,
        };
    }

    let mut current = match &init[0] {
        Segment::Key(k) => data
            .entry(k.clone())
            .or_insert_with(|| Value::Object(Map::new())),
        Segment::Index(_) => return false,
    };
    for segment in &init[1..] {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map
                .entry(k.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            (Segment::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                Some(v) => v,
                None => return false,
            },
            _ => return false,
        };
    }

    match (last, current) {
        (Segment::Key(k), Value::Object(map)) => {
            map.insert(k.clone(), value);
            true
        }
        (Segment::Index(i), Value::Array(items)) if *i < items.len() => {
            items[*i] = value;
            true
        }
        _ => false,
    }
}

/// Shallow merge, source keys overwrite target keys.
pub fn extend(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (k, v) in source {
        target.insert(k.clone(), v.clone());
    }
}
