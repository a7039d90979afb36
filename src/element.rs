//! # Element Tree
//!
//! Template nodes arrive as [`NodeSpec`] trees (the serde form produced by the
//! markup parser) and are loaded into an [`ElementTree`] arena for building.
//!
//! ## Invariants
//!
//! 1. **Stable identity**: every node carries a template `id`. Clones keep it,
//!    so a loop item clone and a rebuilt template share ids with their origin.
//! 2. **Compiled directives stay compiled**: once `is_compiled` is set on a
//!    loop directive of a concrete node, that node is never expanded again.
//! 3. **No removal**: nodes are never dropped from the arena. A discarded
//!    subtree is flagged `building_interrupted` so stale continuations skip it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::ops::{Index, IndexMut};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

new_key_type! { pub struct ElementKey; }

/// Wrapper tag whose children are merged into the parent on serialization.
pub const MERGE_TAG: &str = "$merge";
pub const TEMPLATE_TAG: &str = "template";
pub const PARTIAL_TAG: &str = "partial";
pub const COMPONENT_TAG: &str = "component";

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    #[default]
    Tag,
    Text,
    Document,
    /// Synthetic slot holding a component's original inner content.
    #[serde(rename = "$content")]
    Content,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl FilterCall {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: vec![],
        }
    }

    pub fn with_args(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Parsed directive value: `arg: get | filter` or `(index, arg) in get | filter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveValue {
    pub get: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectiveOptions {
    pub spare_inner_content: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub value: DirectiveValue,
    #[serde(default, skip_serializing_if = "is_default")]
    pub options: DirectiveOptions,
    #[serde(default)]
    pub is_compiled: bool,
}

fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

impl Directive {
    pub fn new(get: &str) -> Self {
        Self {
            value: DirectiveValue {
                get: get.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn alias(mut self, arg: &str) -> Self {
        self.value.arg = Some(arg.to_string());
        self
    }

    pub fn index(mut self, index: &str) -> Self {
        self.value.index = Some(index.to_string());
        self
    }

    pub fn filter(mut self, filter: FilterCall) -> Self {
        self.value.filters.push(filter);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ComponentName {
    /// Registered name, used verbatim.
    Static(String),
    /// Expression evaluated in the building instance.
    Dynamic(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ComponentStatus {
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDirective {
    pub name: ComponentName,
    #[serde(default, skip_serializing_if = "is_default")]
    pub options: DirectiveOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ComponentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WithItem {
    #[serde(default)]
    pub arg: Option<String>,
    pub get: String,
}

/// Template event handler: `on:event="method"` or `on:event="method(a, b)"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnHandler {
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Directives {
    #[serde(rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Directive>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentDirective>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub bind: IndexMap<String, Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with: Option<Vec<WithItem>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub on: IndexMap<String, OnHandler>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub el: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE SPEC (serde form)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attribs: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "is_default")]
    pub directives: Directives,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl NodeSpec {
    pub fn tag(name: &str) -> Self {
        Self {
            node_type: NodeType::Tag,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn text(text: &str) -> Self {
        Self {
            node_type: NodeType::Text,
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attribs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn bind(mut self, name: &str, get: &str) -> Self {
        self.directives
            .bind
            .insert(name.to_string(), Directive::new(get));
        self
    }

    pub fn for_each(mut self, directive: Directive) -> Self {
        self.directives.for_ = Some(directive);
        self
    }

    pub fn repeat(mut self, directive: Directive) -> Self {
        self.directives.repeat = Some(directive);
        self
    }

    pub fn when(mut self, get: &str) -> Self {
        self.directives.if_ = Some(Directive::new(get));
        self
    }

    pub fn with_data(mut self, items: Vec<WithItem>) -> Self {
        self.directives.with = Some(items);
        self
    }

    pub fn on(mut self, event: &str, handler: OnHandler) -> Self {
        self.directives.on.insert(event.to_string(), handler);
        self
    }

    pub fn reference(mut self, name: &str) -> Self {
        self.directives.ref_ = Some(name.to_string());
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.inner.push(child);
        self
    }

    pub fn children(mut self, children: Vec<NodeSpec>) -> Self {
        self.inner.extend(children);
        self
    }

    fn assign_ids(&mut self) {
        if self.id.is_none() {
            self.id = Some(next_node_id());
        }
        for child in &mut self.inner {
            child.assign_ids();
        }
    }
}

/// An immutable node list shared by every instantiation of a component
/// template or partial. Ids are fixed at construction so every
/// instantiation yields the same identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Rc<Vec<NodeSpec>>,
}

impl Template {
    pub fn new(mut nodes: Vec<NodeSpec>) -> Self {
        for node in &mut nodes {
            node.assign_ids();
        }
        Self {
            nodes: Rc::new(nodes),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let nodes: Vec<NodeSpec> = serde_json::from_str(json)?;
        Ok(Self::new(nodes))
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARENA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementFlags {
    /// Marks the boundary of an instance; parents do not walk into it.
    pub is_key_element: bool,
    pub compile_self_in_parent: bool,
    /// Set once the owning instance starts its own build pass.
    pub ready_to_build: bool,
    pub building_interrupted: bool,
    pub component_empty_template: bool,
    pub partial_resolved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginalContent {
    pub name: String,
    pub inner: Vec<ElementKey>,
}

#[derive(Debug, Clone)]
pub struct ElementNode {
    pub id: u64,
    pub node_type: NodeType,
    pub name: String,
    pub text: Option<String>,
    pub attribs: IndexMap<String, String>,
    pub directives: Directives,
    pub inner: Vec<ElementKey>,
    /// Attributes consumed by props, kept for the component entrance.
    pub props: IndexMap<String, String>,
    pub original: Option<OriginalContent>,
    pub flags: ElementFlags,
}

impl ElementNode {
    pub fn synthetic(node_type: NodeType, name: &str, inner: Vec<ElementKey>) -> Self {
        Self {
            id: next_node_id(),
            node_type,
            name: name.to_string(),
            text: None,
            attribs: IndexMap::new(),
            directives: Directives::default(),
            inner,
            props: IndexMap::new(),
            original: None,
            flags: ElementFlags::default(),
        }
    }

    pub fn is_tag(&self) -> bool {
        self.node_type == NodeType::Tag
    }

    /// A key element whose instance has not started building yet.
    pub fn awaits_own_build(&self) -> bool {
        self.flags.is_key_element && !self.flags.ready_to_build
    }
}

#[derive(Debug, Default)]
pub struct ElementTree {
    nodes: SlotMap<ElementKey, ElementNode>,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: ElementKey) -> Option<&ElementNode> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: ElementKey) -> Option<&mut ElementNode> {
        self.nodes.get_mut(key)
    }

    pub fn add(&mut self, node: ElementNode) -> ElementKey {
        self.nodes.insert(node)
    }

    pub fn insert(&mut self, spec: &NodeSpec) -> ElementKey {
        let inner = spec.inner.iter().map(|c| self.insert(c)).collect();
        self.nodes.insert(ElementNode {
            id: spec.id.unwrap_or_else(next_node_id),
            node_type: spec.node_type,
            name: spec.name.clone(),
            text: spec.text.clone(),
            attribs: spec.attribs.clone(),
            directives: spec.directives.clone(),
            inner,
            props: IndexMap::new(),
            original: None,
            flags: ElementFlags::default(),
        })
    }

    pub fn insert_all(&mut self, specs: &[NodeSpec]) -> Vec<ElementKey> {
        specs.iter().map(|s| self.insert(s)).collect()
    }

    /// Deep copy of a subtree. Template ids, attributes and directive state
    /// are copied; build flags are not.
    pub fn clone_subtree(&mut self, key: ElementKey) -> ElementKey {
        let source = self.nodes[key].clone();
        let inner = source
            .inner
            .iter()
            .map(|child| self.clone_subtree(*child))
            .collect();
        self.nodes.insert(ElementNode {
            inner,
            original: None,
            flags: ElementFlags::default(),
            ..source
        })
    }

    /// Flag a subtree as discarded. Deferred work bound to any of these
    /// nodes becomes a no-op.
    pub fn interrupt_subtree(&mut self, key: ElementKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(k) {
                node.flags.building_interrupted = true;
                stack.extend(node.inner.iter().copied());
            }
        }
    }

    pub fn is_interrupted(&self, key: ElementKey) -> bool {
        self.nodes
            .get(key)
            .map(|n| n.flags.building_interrupted)
            .unwrap_or(true)
    }

    /// Export a subtree back to its serde form.
    pub fn snapshot(&self, key: ElementKey) -> NodeSpec {
        let node = &self.nodes[key];
        NodeSpec {
            node_type: node.node_type,
            name: node.name.clone(),
            text: node.text.clone(),
            attribs: node.attribs.clone(),
            directives: node.directives.clone(),
            inner: node.inner.iter().map(|c| self.snapshot(*c)).collect(),
            id: Some(node.id),
        }
    }

    pub fn snapshot_inner(&self, key: ElementKey) -> Vec<NodeSpec> {
        self.nodes[key]
            .inner
            .iter()
            .map(|c| self.snapshot(*c))
            .collect()
    }
}

impl Index<ElementKey> for ElementTree {
    type Output = ElementNode;

    fn index(&self, key: ElementKey) -> &ElementNode {
        &self.nodes[key]
    }
}

impl IndexMut<ElementKey> for ElementTree {
    fn index_mut(&mut self, key: ElementKey) -> &mut ElementNode {
        &mut self.nodes[key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_keeps_ids_and_directives() {
        let mut tree = ElementTree::new();
        let spec = NodeSpec::tag("li")
            .for_each(Directive::new("items"))
            .child(NodeSpec::text("x"));
        let template = Template::new(vec![spec]);
        let original = tree.insert(&template.nodes()[0]);
        tree[original].flags.is_key_element = true;

        let copy = tree.clone_subtree(original);
        assert_ne!(copy, original);
        assert_eq!(tree[copy].id, tree[original].id);
        assert!(tree[copy].directives.for_.is_some());
        assert!(!tree[copy].flags.is_key_element);
        assert_ne!(tree[copy].inner[0], tree[original].inner[0]);

        tree[copy].directives.for_.as_mut().unwrap().is_compiled = true;
        assert!(!tree[original].directives.for_.as_ref().unwrap().is_compiled);
    }

    #[test]
    fn test_template_ids_are_stable_across_instantiation() {
        let template = Template::new(vec![NodeSpec::tag("div").child(NodeSpec::tag("span"))]);
        let mut tree = ElementTree::new();
        let a = tree.insert(&template.nodes()[0]);
        let b = tree.insert(&template.nodes()[0]);
        assert_eq!(tree[a].id, tree[b].id);
        assert_eq!(tree[tree[a].inner[0]].id, tree[tree[b].inner[0]].id);
    }

    #[test]
    fn test_node_spec_json_shape() {
        let json = r#"{
            "type": "tag",
            "name": "li",
            "attribs": {"class": "row"},
            "directives": {"for": {"value": {"get": "items", "arg": "item"}}},
            "inner": [{"type": "text", "text": "hi"}]
        }"#;
        let spec: NodeSpec = serde_json::from_str(json).unwrap();
        let dir = spec.directives.for_.as_ref().unwrap();
        assert_eq!(dir.value.get, "items");
        assert_eq!(dir.value.arg.as_deref(), Some("item"));
        assert!(!dir.is_compiled);
        assert_eq!(spec.inner[0].node_type, NodeType::Text);
    }

    #[test]
    fn test_interrupt_subtree() {
        let mut tree = ElementTree::new();
        let root = tree.insert(&NodeSpec::tag("div").child(NodeSpec::tag("p")));
        let child = tree[root].inner[0];
        tree.interrupt_subtree(root);
        assert!(tree.is_interrupted(root));
        assert!(tree.is_interrupted(child));
    }
}
