//! # Instance Factory
//!
//! Creates component, repeat-item and light instances, and resets them in
//! place when a rebuild is requested.
//!
//! ## Construction order
//!
//! 1. Seed data (loop items inherit the parent's public fields).
//! 2. Merge registries and alias the component's own name to itself.
//! 3. Insert the instance with its identity links and an empty bus.
//! 4. Components: splice the template into the host element, wire listeners.
//! 5. Mark the key element.
//! 6. Data option, mixins first and own data last.
//! 7. Props, then loop context.
//! 8. `events` option.
//! 9. Computed properties.
//! 10. `created` mixins and hook.
//! 11. With-data; computed again if a created hook ran.
//! 12. Schedule the build pass.

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::assets::Assets;
use crate::common::{dash_to_camel_case, extend};
use crate::component::{ComponentRef, Constructor, DataOption, Mixin};
use crate::element::{
    ElementKey, ElementNode, NodeType, OriginalContent, WithItem, MERGE_TAG, TEMPLATE_TAG,
};
use crate::error::{BuildIssue, Level};
use crate::events::{
    EventBus, Listener, EVENT_READY_TO_COMPILE, EVENT_REBUILD_COMPUTED, EVENT_STOP_BUILDING,
    HOOK_PREFIX,
};
use crate::instance::{
    inherit_fields, is_system_prop, ChildSlot, Completion, Instance, InstanceKey, InstanceState,
    RefTarget, RootState, SlotRef,
};
use crate::lifecycle::HookKind;
use crate::renderer::Session;
use crate::vm::Vm;

/// What the directive pass knows about a child before it exists.
#[derive(Clone, Default)]
pub(crate) struct ChildOptions {
    pub element: ElementKey,
    pub component: Option<Rc<Constructor>>,
    pub component_name: Option<String>,
    /// Loop context merged over the child's data.
    pub repeat_data: Option<Map<String, Value>>,
    /// `with="expr"`: replace the child's data with the parent's value.
    pub with_replace: Option<String>,
    pub with_items: Option<Vec<WithItem>>,
    pub wait_for: Option<String>,
    /// Slot reserved before an async resolution.
    pub child_index: Option<usize>,
    pub is_repeat: bool,
}

impl Session {
    // ═══════════════════════════════════════════════════════════════════════════
    // CREATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn create_root(&mut self, ctor: Rc<Constructor>) -> InstanceKey {
        let document = self
            .tree
            .add(ElementNode::synthetic(NodeType::Document, "", vec![]));
        let options = ChildOptions {
            element: document,
            component_name: ctor.options().name.clone(),
            component: Some(ctor),
            ..Default::default()
        };
        let key = self.init_view_model(None, &options);
        self.root = Some(key);
        key
    }

    pub(crate) fn init_view_model(
        &mut self,
        parent: Option<InstanceKey>,
        options: &ChildOptions,
    ) -> InstanceKey {
        let ctor = options.component.clone();
        let is_component = ctor.is_some();

        let mut data = Map::new();
        if let (Some(p), false) = (parent, is_component) {
            if options.is_repeat {
                inherit_fields(&mut data, &self.instances[p].data);
            }
        }

        let own = ctor
            .as_ref()
            .map(|c| c.options().assets.clone())
            .unwrap_or_default();
        let mut assets = {
            let inherited = parent.map(|p| &self.instances[self.real_parent(p)].assets);
            Assets::merge(
                self.renderer.config.strict,
                &self.renderer.assets,
                inherited,
                &own,
            )
        };
        let component_name = options
            .component_name
            .clone()
            .or_else(|| ctor.as_ref().and_then(|c| c.options().name.clone()));
        if let (Some(c), Some(name)) = (&ctor, &component_name) {
            assets
                .components
                .insert(name, ComponentRef::Constructor(Rc::clone(c)));
        }

        let root = parent.map(|p| self.instances[p].root);
        let public_parent = parent.map(|p| self.real_parent(p));
        let root_state = parent.is_none().then(|| RootState {
            mixin: self.renderer.mixin.clone(),
            ..Default::default()
        });
        let key = self.instances.insert_with_key(|key| Instance {
            data,
            el: options.element,
            parent: public_parent,
            root: root.unwrap_or(key),
            children: vec![],
            refs: Default::default(),
            els: Default::default(),
            constructor: ctor.clone(),
            component_name,
            assets,
            bus: EventBus::new(),
            is_compiled: false,
            is_ready: false,
            state: InstanceState {
                parent,
                root: root_state,
                is_component,
                is_repeat: options.is_repeat,
                wait_for: options.wait_for.clone(),
                ..Default::default()
            },
        });

        if is_component {
            self.set_key_element_inner(key);
            self.set_event_listeners(key);
        }
        self.mark_key_element(key);
        let el = options.element;
        if !is_component || self.tree[el].flags.component_empty_template {
            self.instances[key].state.pristine = self.tree.snapshot_inner(el);
        }

        if let Some(ctor) = &ctor {
            self.init_data(key, ctor);
            if let (true, Some(p)) = (ctor.options().inherit, parent) {
                let source = self.instances[p].data.clone();
                inherit_fields(&mut self.instances[key].data, &source);
            }
        }
        self.pull_props(key);
        if let Some(context) = &options.repeat_data {
            extend(&mut self.instances[key].data, context);
        }

        self.bind_events_option(key);
        self.build_computed(key);

        let mut created = false;
        if is_component {
            created = self.call_mixin_hooks(key, HookKind::Created);
            created |= self.call_hook(key, HookKind::Created);
        }
        self.apply_with_data(key, options);
        if created {
            self.build_computed(key);
        }

        self.schedule_build(key, Completion::Initial);
        key
    }

    /// Light scope for one `for` item: inherited data plus the item context,
    /// filters only, no props, computed or hooks.
    pub(crate) fn add_light_child(
        &mut self,
        parent: InstanceKey,
        element: ElementKey,
        context: Map<String, Value>,
    ) -> InstanceKey {
        let mut data = Map::new();
        inherit_fields(&mut data, &self.instances[parent].data);
        extend(&mut data, &context);

        let assets = Assets::filters_only(
            self.renderer.config.strict,
            &self.renderer.assets,
            &self.instances[parent].assets,
        );
        let root = self.instances[parent].root;
        let key = self.instances.insert(Instance {
            data,
            el: element,
            parent: Some(parent),
            root,
            children: vec![],
            refs: Default::default(),
            els: Default::default(),
            constructor: None,
            component_name: None,
            assets,
            bus: EventBus::new(),
            is_compiled: false,
            is_ready: false,
            state: InstanceState {
                parent: Some(parent),
                not_public: true,
                ..Default::default()
            },
        });

        self.mark_key_element(key);
        self.instances[key].state.pristine = self.tree.snapshot_inner(element);

        let index = self.push_slot(parent, key);
        let generation = self.instances[parent].state.generation;
        self.instances[key].state.slot = Some(SlotRef { index, generation });
        self.schedule_build(key, Completion::Settle);
        key
    }

    /// Create (or reuse) a component or repeat-item child of `parent`.
    pub(crate) fn add_child(&mut self, parent: InstanceKey, options: ChildOptions) -> InstanceKey {
        let element = options.element;
        let template_id = self.tree[element].id;
        let name = options.component_name.clone().unwrap_or_default();
        let persistent = options.component.is_some() && options.repeat_data.is_none();

        let reused = if persistent {
            self.instances[parent]
                .state
                .vms_detached
                .shift_remove(&(template_id, name.clone()))
                .filter(|k| self.instances.contains_key(*k))
        } else {
            None
        };
        let child = match reused {
            Some(existing) => {
                self.reset(existing, Some(element));
                self.apply_with_data(existing, &options);
                self.pull_props(existing);
                self.build_computed(existing);
                existing
            }
            None => self.init_view_model(Some(parent), &options),
        };

        let generation = self.instances[parent].state.generation;
        let reserved = options
            .child_index
            .filter(|i| *i < self.instances[parent].state.slots.len());
        let index = match reserved {
            Some(i) => {
                self.instances[parent].state.slots[i] = ChildSlot {
                    instance: Some(child),
                    complete: false,
                };
                i
            }
            None => self.push_slot(parent, child),
        };
        self.instances[child].state.slot = Some(SlotRef { index, generation });

        let target = self.real_parent(parent);
        if !self.instances[target].children.contains(&child) {
            self.instances[target].children.push(child);
        }

        if let Some(reference) = self.tree[element].directives.ref_.clone() {
            let many = options.is_repeat || self.instances[parent].state.not_public;
            let refs = &mut self.instances[target].refs;
            let name = dash_to_camel_case(&reference);
            if many {
                match refs.entry(name).or_insert_with(|| RefTarget::Many(vec![])) {
                    RefTarget::Many(list) => list.push(child),
                    one => *one = RefTarget::Many(vec![child]),
                }
            } else {
                refs.insert(name, RefTarget::One(child));
            }
        }

        if persistent && !self.instances[parent].state.not_public {
            self.instances[parent]
                .state
                .vms
                .insert((template_id, name), child);
        }
        child
    }

    fn push_slot(&mut self, parent: InstanceKey, child: InstanceKey) -> usize {
        let slots = &mut self.instances[parent].state.slots;
        slots.push(ChildSlot {
            instance: Some(child),
            complete: false,
        });
        slots.len() - 1
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ELEMENT WIRING
    // ═══════════════════════════════════════════════════════════════════════════

    fn set_key_element_inner(&mut self, key: InstanceKey) {
        let instance = &self.instances[key];
        let el = instance.el;
        let is_root = instance.is_root();
        let Some(ctor) = instance.constructor.clone() else {
            return;
        };
        let options = ctor.options();
        let template = options.template.clone();

        if is_root {
            match template {
                Some(template) => {
                    let inner = self.tree.insert_all(template.nodes());
                    self.tree[el].inner = inner;
                }
                None => self.report(Some(key), Level::Error, BuildIssue::MissingRootTemplate),
            }
            return;
        }

        let replace = options.replace.unwrap_or(self.renderer.config.replace);
        let inner = template
            .as_ref()
            .map(|t| self.tree.insert_all(t.nodes()));
        let node = &mut self.tree[el];
        match &node.original {
            Some(original) => node.name = original.name.clone(),
            None => {
                node.original = Some(OriginalContent {
                    name: node.name.clone(),
                    inner: node.inner.clone(),
                })
            }
        }
        match inner {
            Some(inner) => {
                if replace {
                    let name = if inner.len() == 1 { MERGE_TAG } else { TEMPLATE_TAG };
                    node.name = name.to_string();
                }
                node.inner = inner;
            }
            None => {
                node.name = TEMPLATE_TAG.to_string();
                node.flags.component_empty_template = true;
            }
        }
    }

    fn mark_key_element(&mut self, key: InstanceKey) {
        let instance = &self.instances[key];
        let in_parent = instance.state.is_component && !instance.state.is_repeat;
        let flags = &mut self.tree[instance.el].flags;
        flags.is_key_element = true;
        flags.ready_to_build = false;
        flags.compile_self_in_parent = in_parent;
    }

    fn set_event_listeners(&mut self, key: InstanceKey) {
        let rebuild: Listener = Rc::new(|vm: &mut Vm<'_>, _: &[Value]| {
            vm.session.build_computed(vm.key);
        });
        let stop: Listener = Rc::new(|vm: &mut Vm<'_>, _: &[Value]| {
            let el = vm.session.instances[vm.key].el;
            vm.session.tree.interrupt_subtree(el);
        });
        let ready: Listener = Rc::new(|vm: &mut Vm<'_>, _: &[Value]| {
            vm.session.call_mixin_hooks(vm.key, HookKind::Ready);
            vm.session.call_hook(vm.key, HookKind::Ready);
        });
        let bus = &mut self.instances[key].bus;
        bus.on(EVENT_REBUILD_COMPUTED, rebuild);
        bus.on(EVENT_STOP_BUILDING, stop);
        bus.on(EVENT_READY_TO_COMPILE, ready);

        let el = self.instances[key].el;
        let handlers = self.tree[el].directives.on.clone();
        for (event, handler) in handlers {
            let event = match event.strip_prefix(HOOK_PREFIX) {
                Some(hook) => format!("{}{}", HOOK_PREFIX, dash_to_camel_case(hook)),
                None => event,
            };
            let listener: Listener = Rc::new(move |vm: &mut Vm<'_>, args: &[Value]| {
                let Some(parent) = vm.session.instances[vm.key].parent else {
                    return;
                };
                let args = match &handler.args {
                    Some(exprs) => exprs
                        .iter()
                        .map(|e| vm.session.evaluate(parent, e, &[]).unwrap_or(Value::Null))
                        .collect(),
                    None => args.to_vec(),
                };
                vm.session.call_method(parent, &handler.handler, &args);
            });
            self.instances[key].bus.on(&event, listener);
        }
    }

    fn bind_events_option(&mut self, key: InstanceKey) {
        let Some(ctor) = self.instances[key].constructor.clone() else {
            return;
        };
        for (event, listener) in &ctor.options().events {
            self.instances[key].bus.on(event, Rc::clone(listener));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DATA
    // ═══════════════════════════════════════════════════════════════════════════

    fn init_data(&mut self, key: InstanceKey, ctor: &Constructor) {
        let options = ctor.options();
        let own = options
            .data
            .as_ref()
            .map(|d| self.data_unit(key, d))
            .unwrap_or_default();

        let mut merged = Map::new();
        for mixin in &options.mixins {
            if let Some(data) = &mixin.data {
                let unit = self.data_unit(key, data);
                extend(&mut merged, &unit);
            }
        }
        extend(&mut merged, &own);
        extend(&mut self.instances[key].data, &merged);
    }

    fn data_unit(&mut self, key: InstanceKey, option: &DataOption) -> Map<String, Value> {
        match option {
            DataOption::Value(Value::Object(map)) if self.instances[key].is_root() => map.clone(),
            DataOption::Value(_) => {
                self.report(Some(key), Level::Warn, BuildIssue::InvalidDataOption);
                Map::new()
            }
            DataOption::Function(f) => match f(&Vm::new(self, key)) {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub(crate) fn build_computed(&mut self, key: InstanceKey) {
        let Some(ctor) = self
            .instances
            .get(key)
            .and_then(|i| i.constructor.clone())
        else {
            return;
        };
        for (name, getter) in &ctor.options().computed {
            match getter(&Vm::new(self, key)) {
                Ok(value) => {
                    self.instances[key].data.insert(name.clone(), value);
                }
                Err(e) => self.report(
                    Some(key),
                    Level::Debug,
                    BuildIssue::ComputedFailed {
                        name: name.clone(),
                        error: format!("{:#}", e),
                    },
                ),
            }
        }
    }

    /// Returns whether any with-data was applied.
    pub(crate) fn apply_with_data(&mut self, key: InstanceKey, options: &ChildOptions) -> bool {
        let Some(parent) = self.instances[key].state.parent else {
            return false;
        };

        if let Some(expr) = &options.with_replace {
            let value = self.evaluate(parent, expr, &[]);
            let data = &mut self.instances[key].data;
            data.retain(|k, _| is_system_prop(k));
            if let Some(Value::Object(map)) = value {
                extend(data, &map);
            }
            self.instances[key].state.has_with_data = true;
            return true;
        }

        let Some(items) = &options.with_items else {
            return false;
        };
        for item in items {
            let Some(arg) = &item.arg else {
                continue;
            };
            let value = self.evaluate(parent, &item.get, &[]);
            let data = &mut self.instances[key].data;
            match value {
                Some(v) => {
                    data.insert(arg.clone(), v);
                }
                None => {
                    data.remove(arg);
                }
            }
        }
        self.instances[key].state.has_with_data = true;
        true
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RESET
    // ═══════════════════════════════════════════════════════════════════════════

    /// Tear down the instance's subtree and rebuild it from the same (or a
    /// new) host element, keeping identity and persisted children.
    pub(crate) fn reset(&mut self, key: InstanceKey, new_el: Option<ElementKey>) {
        self.rebuilds += 1;

        let instance = &mut self.instances[key];
        instance.refs.clear();
        instance.els.clear();
        if let Some(el) = new_el {
            instance.el = el;
        }
        let old_children: Vec<_> = instance
            .state
            .slots
            .iter()
            .filter_map(|s| s.instance)
            .collect();
        instance.children.clear();
        instance.state.slots.clear();
        instance.state.vms_detached = std::mem::take(&mut instance.state.vms);
        instance.is_ready = false;
        instance.state.generation += 1;
        instance.state.awaiting = None;
        let el = instance.el;
        let is_component = instance.state.is_component;
        let is_root = instance.is_root();

        if new_el.is_some() {
            self.mark_key_element(key);
        }
        for child in old_children {
            self.emit(child, EVENT_STOP_BUILDING, &[]);
        }
        if new_el.is_none() {
            let old = std::mem::take(&mut self.tree[el].inner);
            for node in old {
                self.tree.interrupt_subtree(node);
            }
        }

        let empty_template = self.tree[el].flags.component_empty_template;
        if is_component && !empty_template {
            self.set_key_element_inner(key);
        } else if new_el.is_none() {
            let pristine = self.instances[key].state.pristine.clone();
            let inner = self.tree.insert_all(&pristine);
            self.tree[el].inner = inner;
        }

        if !is_root {
            self.instances[key].bus.clear();
            if is_component {
                self.set_event_listeners(key);
            }
            self.bind_events_option(key);
        }

        self.build_computed(key);
        self.schedule_build(key, Completion::Settle);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Nearest instance at or above `key` that is not a light scope. Owns the
    /// registries, refs and els used while building `key`'s subtree.
    pub(crate) fn real_parent(&self, key: InstanceKey) -> InstanceKey {
        let mut cursor = key;
        while let Some(instance) = self.instances.get(cursor) {
            match instance.state.parent {
                Some(parent) if instance.state.not_public => cursor = parent,
                _ => break,
            }
        }
        cursor
    }

    pub(crate) fn global_mixin(&self, key: InstanceKey) -> Option<Rc<Mixin>> {
        self.instances
            .get(key)
            .and_then(|i| self.instances.get(i.root))
            .and_then(|root| root.state.root.as_ref())
            .and_then(|state| state.mixin.clone())
            .or_else(|| self.renderer.mixin.clone())
    }

    /// Store a composed descriptor back under its registered name.
    pub(crate) fn cache_component(&mut self, key: InstanceKey, name: &str, ctor: &Rc<Constructor>) {
        let owner = self.real_parent(key);
        self.instances[owner]
            .assets
            .components
            .insert(name, ComponentRef::Constructor(Rc::clone(ctor)));
    }
}
