//! # Directive Processing
//!
//! Walks an instance's element list left to right and depth first, applying
//! the directive pipeline to every tag:
//!
//! 1. implicit component match (tag name is a registered component)
//! 2. `is` attribute or binding
//! 3. `for`
//! 4. `if` (skipped when `repeat` is present)
//! 5. `partial`
//! 6. `repeat`
//! 7. component content wrapping, then materialization
//!
//! ## Invariants
//!
//! 1. **Restart at the mutation point**: a step that splices the sibling list
//!    re-runs the pipeline at the same index, so every produced node passes
//!    through the full pipeline once.
//! 2. **Stable before descent**: a node's children are walked only after its
//!    own pipeline returns [`Step::Next`].
//! 3. **Key elements are opaque**: the walk never enters an element owned by
//!    an instance whose build has not started.

use serde_json::Value;

use crate::common::{dash_to_camel_case, is_native_tag, is_truthy};
use crate::component::{ComponentResolver, Resolved};
use crate::element::{
    ComponentDirective, ComponentName, ComponentStatus, DirectiveOptions, ElementKey, ElementNode,
    NodeType, COMPONENT_TAG, PARTIAL_TAG,
};
use crate::error::{BuildIssue, Level};
use crate::instance::{ChildSlot, InstanceKey};
use crate::lifecycle::{PendingComponent, PendingTarget};
use crate::renderer::Session;
use crate::scope::ChildOptions;

/// Outcome of running the pipeline on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The sibling list changed at this index; process the same index again.
    Restart,
    /// The node is stable; move on to its children, then its next sibling.
    Next,
}

impl Session {
    /// Process the inner list of `owner` in the scope of `key`.
    pub(crate) fn process_elements(&mut self, key: InstanceKey, owner: ElementKey) {
        let mut stack = vec![(owner, 0usize)];
        while let Some((list, index)) = stack.pop() {
            let Some(&node) = self.tree.get(list).and_then(|n| n.inner.get(index)) else {
                continue;
            };
            match self.apply_pipeline(key, list, index, node) {
                Step::Restart => stack.push((list, index)),
                Step::Next => {
                    stack.push((list, index + 1));
                    let n = &self.tree[node];
                    if !n.inner.is_empty()
                        && !n.awaits_own_build()
                        && !n.flags.building_interrupted
                    {
                        stack.push((node, 0));
                    }
                }
            }
        }
    }

    pub(crate) fn apply_pipeline(
        &mut self,
        key: InstanceKey,
        list: ElementKey,
        index: usize,
        node: ElementKey,
    ) -> Step {
        if !self.tree[node].is_tag() {
            return Step::Next;
        }

        self.match_implicit_component(key, node);
        self.apply_is_attribute(node);

        if matches!(&self.tree[node].directives.for_, Some(d) if !d.is_compiled) {
            self.expand_for(key, list, index, node);
            return Step::Restart;
        }

        let conditional = {
            let directives = &self.tree[node].directives;
            match (&directives.repeat, &directives.if_) {
                (None, Some(d)) if !d.is_compiled => Some(d.value.clone()),
                _ => None,
            }
        };
        if let Some(condition) = conditional {
            let value = self.evaluate(key, &condition.get, &condition.filters);
            if !value.as_ref().map(is_truthy).unwrap_or(false) {
                self.tree[list].inner.remove(index);
                return Step::Restart;
            }
            if let Some(d) = self.tree[node].directives.if_.as_mut() {
                d.is_compiled = true;
            }
        }

        if self.tree[node].name == PARTIAL_TAG && !self.tree[node].flags.partial_resolved {
            self.resolve_partial(key, node);
        }

        if matches!(&self.tree[node].directives.repeat, Some(d) if !d.is_compiled) {
            self.expand_repeat(key, list, index, node);
            return Step::Restart;
        }

        // Loop clones were materialized by the expansion that produced them.
        let n = &self.tree[node];
        let repeated = matches!(&n.directives.repeat, Some(d) if d.is_compiled);
        if n.directives.component.is_some() && !n.flags.is_key_element && !repeated {
            if self.wrap_content(node) {
                return Step::Restart;
            }
            self.build_component(key, node, ChildOptions::default());
        }

        if let Some(name) = self.tree[node].directives.el.clone() {
            let target = self.real_parent(key);
            self.instances[target]
                .els
                .insert(dash_to_camel_case(&name), node);
        }
        Step::Next
    }

    fn match_implicit_component(&mut self, key: InstanceKey, node: ElementKey) {
        if self.tree[node].directives.component.is_some() {
            return;
        }
        let tag = self.tree[node].name.clone();
        let owner = self.real_parent(key);
        let Some((registered, _)) = self.instances[owner].assets.components.lookup(&tag) else {
            return;
        };
        if is_native_tag(&tag) && tag != COMPONENT_TAG {
            self.report(
                Some(key),
                Level::Debug,
                BuildIssue::NativeTagMatchedComponent {
                    tag,
                    name: registered,
                },
            );
            return;
        }
        self.tree[node].directives.component = Some(ComponentDirective {
            name: ComponentName::Static(tag),
            options: DirectiveOptions {
                spare_inner_content: true,
            },
            status: None,
        });
    }

    fn apply_is_attribute(&mut self, node: ElementKey) {
        let n = &mut self.tree[node];
        if n.directives.component.as_ref().is_some_and(|c| c.status.is_some()) {
            return;
        }
        let name = if let Some(bound) = n.directives.bind.get_mut("is") {
            bound.is_compiled = true;
            ComponentName::Dynamic(bound.value.get.clone())
        } else {
            match n.attribs.get("is").filter(|v| !v.is_empty()) {
                Some(is) => ComponentName::Static(is.clone()),
                None => return,
            }
        };
        n.directives.component = Some(ComponentDirective {
            name,
            options: DirectiveOptions::default(),
            status: None,
        });
    }

    /// Move a component element's existing content into a `$content` node.
    /// Returns whether anything moved.
    pub(crate) fn wrap_content(&mut self, node: ElementKey) -> bool {
        let inner = &self.tree[node].inner;
        let wrapped = inner.len() == 1 && self.tree[inner[0]].node_type == NodeType::Content;
        if inner.is_empty() || wrapped {
            return false;
        }
        let content = std::mem::take(&mut self.tree[node].inner);
        let slot = self
            .tree
            .add(ElementNode::synthetic(NodeType::Content, "", content));
        self.tree[node].inner = vec![slot];
        true
    }

    fn resolve_partial(&mut self, key: InstanceKey, node: ElementKey) {
        self.tree[node].flags.partial_resolved = true;
        let bound = self.tree[node].directives.bind.get_mut("name").map(|d| {
            d.is_compiled = true;
            d.value.clone()
        });
        let name = match bound {
            Some(value) => match self.evaluate(key, &value.get, &value.filters) {
                Some(Value::String(s)) => s,
                _ => String::new(),
            },
            None => self.tree[node].attribs.get("name").cloned().unwrap_or_default(),
        };

        let owner = self.real_parent(key);
        let template = self.instances[owner]
            .assets
            .partials
            .lookup(&name)
            .map(|(_, t)| t.clone());
        match template {
            Some(template) => {
                let inner = self.tree.insert_all(template.nodes());
                self.tree[node].inner = inner;
            }
            None => {
                let level = if name.is_empty() {
                    Level::Debug
                } else {
                    Level::Warn
                };
                self.tree[node].inner.clear();
                self.report(Some(key), level, BuildIssue::MissingPartial { name });
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPONENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resolve the component named by `node`'s directive and create it, or
    /// park it until its async factory settles.
    pub(crate) fn build_component(
        &mut self,
        key: InstanceKey,
        node: ElementKey,
        mut options: ChildOptions,
    ) {
        let Some(directive) = self.tree[node].directives.component.clone() else {
            return;
        };
        let name = match &directive.name {
            ComponentName::Static(name) => name.clone(),
            ComponentName::Dynamic(expr) => match self.evaluate(key, expr, &[]) {
                Some(Value::String(s)) => s,
                _ => String::new(),
            },
        };

        let owner = self.real_parent(key);
        let found = self.instances[owner]
            .assets
            .components
            .lookup(&name)
            .map(|(registered, component)| (registered, component.clone()));
        let Some((registered, component)) = found else {
            let n = &mut self.tree[node];
            n.inner.clear();
            if let Some(d) = n.directives.component.as_mut() {
                d.status = Some(ComponentStatus::Unresolved);
            }
            self.report_unresolved(key, &name, None);
            return;
        };

        let slots = &mut self.instances[key].state.slots;
        slots.push(ChildSlot::default());
        options.child_index = Some(slots.len() - 1);
        options.element = node;
        options.component_name = Some(registered.clone());

        let mixin = self.global_mixin(key);
        match ComponentResolver::new(mixin.as_ref()).resolve(&component) {
            Resolved::Direct(ctor) => {
                options.component = Some(ctor);
                self.build_component_content(key, node, options);
            }
            Resolved::Composed(ctor) => {
                self.cache_component(key, &registered, &ctor);
                options.component = Some(ctor);
                self.build_component_content(key, node, options);
            }
            Resolved::Pending(receiver) => {
                self.tree[node].flags.is_key_element = true;
                let generation = self.instances[key].state.generation;
                self.pending.push(PendingComponent {
                    target: PendingTarget::Child {
                        parent: key,
                        element: node,
                        generation,
                        options,
                    },
                    name: registered,
                    receiver,
                });
            }
        }
    }

    /// Consume the host element's component attributes and create the child.
    pub(crate) fn build_component_content(
        &mut self,
        key: InstanceKey,
        node: ElementKey,
        mut options: ChildOptions,
    ) {
        let n = &mut self.tree[node];
        if let Some(wait_for) = n.attribs.shift_remove("wait-for") {
            if !wait_for.is_empty() {
                options.wait_for = Some(wait_for);
            }
        }
        n.attribs.shift_remove("is");

        if let Some(items) = n.directives.with.clone() {
            match items.as_slice() {
                [single] if single.arg.is_none() => options.with_replace = Some(single.get.clone()),
                _ => options.with_items = Some(items),
            }
        }
        self.add_child(key, options);
    }
}
