//! Loop expansion for `for` (light scope per item) and `repeat` (full
//! instance per item).

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::common::looks_numeric;
use crate::element::{DirectiveValue, ElementKey, ElementNode, NodeType, MERGE_TAG};
use crate::instance::InstanceKey;
use crate::renderer::Session;
use crate::scope::ChildOptions;

pub const KEY_NAME: &str = "$key";
pub const VALUE_NAME: &str = "$value";
pub const INDEX_NAME: &str = "$index";

/// Turn a loop source into a list. Mappings become `{$key, $value}` pairs in
/// their own order; a non-negative number (or numeric string) `n` becomes
/// `0..n`. Anything else is empty.
pub fn normalize_source(source: Option<Value>) -> (Vec<Value>, bool) {
    match source {
        Some(Value::Array(items)) => (items, false),
        Some(Value::Object(map)) => {
            let pairs = map
                .into_iter()
                .map(|(k, v)| {
                    let mut pair = Map::new();
                    pair.insert(KEY_NAME.to_string(), Value::String(k));
                    pair.insert(VALUE_NAME.to_string(), v);
                    Value::Object(pair)
                })
                .collect();
            (pairs, true)
        }
        Some(Value::Number(n)) => (range(n.as_f64()), false),
        Some(Value::String(s)) if looks_numeric(&s) => (range(s.trim().parse().ok()), false),
        _ => (vec![], false),
    }
}

/// Upper bound on the items a numeric loop source produces.
pub const MAX_RANGE: u64 = 100_000;

fn range(n: Option<f64>) -> Vec<Value> {
    match n {
        Some(n) if n.is_finite() && n > 0.0 => {
            let requested = n.floor();
            let len = if requested > MAX_RANGE as f64 {
                warn!(requested, limit = MAX_RANGE, "numeric loop source truncated");
                MAX_RANGE
            } else {
                requested as u64
            };
            (0..len).map(|i| json!(i)).collect()
        }
        _ => vec![],
    }
}

/// Data context for one item. An alias takes the whole item, even when the
/// item is an object holding a field of the same name.
pub fn item_context(
    entry: &Value,
    index: usize,
    mapping: bool,
    alias: Option<&str>,
    index_name: Option<&str>,
) -> Map<String, Value> {
    let (item, key) = match entry {
        Value::Object(pair) if mapping && pair.contains_key(KEY_NAME) => (
            pair.get(VALUE_NAME).cloned().unwrap_or(Value::Null),
            pair.get(KEY_NAME).cloned(),
        ),
        other => (other.clone(), None),
    };

    let mut context = Map::new();
    match (alias, item) {
        (Some(alias), item) => {
            context.insert(alias.to_string(), item);
        }
        (None, Value::Object(fields)) => {
            if mapping {
                context.insert(VALUE_NAME.to_string(), Value::Object(fields.clone()));
            }
            context.extend(fields);
        }
        (None, item) => {
            context.insert(VALUE_NAME.to_string(), item);
        }
    }
    if let Some(key) = key {
        context.insert(KEY_NAME.to_string(), key);
    }
    context.insert(index_name.unwrap_or(INDEX_NAME).to_string(), json!(index));
    context
}

impl Session {
    fn loop_items(&mut self, key: InstanceKey, value: &DirectiveValue) -> Vec<Map<String, Value>> {
        let source = self.evaluate(key, &value.get, &[]);
        let (entries, mapping) = normalize_source(source);
        let entries = if value.filters.is_empty() {
            entries
        } else {
            match self.filter_value(key, &value.filters, Value::Array(entries)) {
                Value::Array(items) => items,
                _ => vec![],
            }
        };

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                item_context(
                    entry,
                    i,
                    mapping,
                    value.arg.as_deref(),
                    value.index.as_deref(),
                )
            })
            .collect()
    }

    /// Replace `node` with one `$merge` wrapper per item, each owned by a
    /// light instance.
    pub(crate) fn expand_for(
        &mut self,
        key: InstanceKey,
        list: ElementKey,
        index: usize,
        node: ElementKey,
    ) {
        let Some(directive) = self.tree[node].directives.for_.clone() else {
            return;
        };
        self.tree[list].inner.remove(index);
        if let Some(d) = self.tree[node].directives.for_.as_mut() {
            d.is_compiled = true;
        }

        let mut wrappers = vec![];
        for context in self.loop_items(key, &directive.value) {
            let clone = self.tree.clone_subtree(node);
            let wrapper = self
                .tree
                .add(ElementNode::synthetic(NodeType::Tag, MERGE_TAG, vec![clone]));
            self.add_light_child(key, wrapper, context);
            wrappers.push(wrapper);
        }
        self.tree[list].inner.splice(index..index, wrappers);
    }

    /// Replace `node` with one clone per item, each owned by a repeat-item
    /// instance (or by the component the node names).
    pub(crate) fn expand_repeat(
        &mut self,
        key: InstanceKey,
        list: ElementKey,
        index: usize,
        node: ElementKey,
    ) {
        let Some(directive) = self.tree[node].directives.repeat.clone() else {
            return;
        };
        self.tree[list].inner.remove(index);
        if let Some(d) = self.tree[node].directives.repeat.as_mut() {
            d.is_compiled = true;
        }
        let is_component = self.tree[node].directives.component.is_some();

        let mut clones = vec![];
        for context in self.loop_items(key, &directive.value) {
            let clone = self.tree.clone_subtree(node);
            let options = ChildOptions {
                element: clone,
                repeat_data: Some(context),
                is_repeat: true,
                ..Default::default()
            };
            if is_component {
                self.wrap_content(clone);
                self.build_component(key, clone, options);
            } else {
                self.add_child(key, options);
            }
            clones.push(clone);
        }
        self.tree[list].inner.splice(index..index, clones);
    }
}
