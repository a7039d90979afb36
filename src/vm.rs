//! Handles passed to user callbacks ([`Vm`]) and used to inspect a finished
//! render ([`VmView`]).

use indexmap::IndexMap;
use serde_json::{Map, Value};
use slotmap::SlotMap;
use tracing::info;

use crate::common::{get_path, set_path};
use crate::element::{ElementKey, ElementNode, ElementTree};
use crate::events::{Listener, ListenerId};
use crate::instance::{Instance, InstanceKey, InstanceKind, RefTarget};
use crate::lifecycle::Task;
use crate::logging::LogContext;
use crate::renderer::Session;

/// Mutable access to one instance from inside a hook, method, listener or
/// computed getter.
pub struct Vm<'a> {
    pub(crate) session: &'a mut Session,
    pub(crate) key: InstanceKey,
}

impl<'a> Vm<'a> {
    pub(crate) fn new(session: &'a mut Session, key: InstanceKey) -> Self {
        Self { session, key }
    }

    fn instance(&self) -> &Instance {
        &self.session.instances[self.key]
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn kind(&self) -> InstanceKind {
        self.instance().kind()
    }

    pub fn component_name(&self) -> Option<&str> {
        self.instance().component_name.as_deref()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.instance().data
    }

    pub fn get(&self, keypath: &str) -> Option<&Value> {
        get_path(&self.instance().data, keypath)
    }

    pub fn set(&mut self, keypath: &str, value: Value) -> &mut Self {
        set_path(&mut self.session.instances[self.key].data, keypath, value);
        self
    }

    /// Evaluate an expression against this instance.
    pub fn evaluate(&mut self, expr: &str) -> Option<Value> {
        self.session.evaluate(self.key, expr, &[])
    }

    pub fn parent(&self) -> Option<InstanceKey> {
        self.instance().parent
    }

    pub fn root(&self) -> InstanceKey {
        self.instance().root
    }

    pub fn children(&self) -> &[InstanceKey] {
        &self.instance().children
    }

    pub fn refs(&self) -> &IndexMap<String, RefTarget> {
        &self.instance().refs
    }

    pub fn els(&self) -> &IndexMap<String, ElementKey> {
        &self.instance().els
    }

    pub fn element(&self) -> &ElementNode {
        &self.session.tree[self.instance().el]
    }

    pub fn element_mut(&mut self) -> &mut ElementNode {
        let el = self.instance().el;
        &mut self.session.tree[el]
    }

    pub fn is_compiled(&self) -> bool {
        self.instance().is_compiled
    }

    pub fn is_ready(&self) -> bool {
        self.instance().is_ready
    }

    /// Run `f` against another instance of the same render.
    pub fn with<R>(&mut self, key: InstanceKey, f: impl FnOnce(&mut Vm<'_>) -> R) -> Option<R> {
        if !self.session.instances.contains_key(key) {
            return None;
        }
        Some(f(&mut Vm::new(self.session, key)))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Events
    // ───────────────────────────────────────────────────────────────────────────

    pub fn emit(&mut self, event: &str, args: &[Value]) {
        self.session.emit(self.key, event, args);
    }

    /// Emit on this instance and every instance below it.
    pub fn broadcast(&mut self, event: &str, args: &[Value]) {
        self.session.broadcast(self.key, event, args);
    }

    pub fn on(&mut self, event: &str, f: impl Fn(&mut Vm<'_>, &[Value]) + 'static) -> ListenerId {
        let listener: Listener = std::rc::Rc::new(f);
        self.session.instances[self.key].bus.on(event, listener)
    }

    pub fn once(&mut self, event: &str, f: impl Fn(&mut Vm<'_>, &[Value]) + 'static) -> ListenerId {
        let listener: Listener = std::rc::Rc::new(f);
        self.session.instances[self.key].bus.once(event, listener)
    }

    pub fn off(&mut self, event: &str) {
        self.session.instances[self.key].bus.off(event);
    }

    pub fn off_listener(&mut self, id: ListenerId) {
        self.session.instances[self.key].bus.off_listener(id);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Methods and scheduling
    // ───────────────────────────────────────────────────────────────────────────

    /// Call a method visible from this instance: own methods, props bound to
    /// ancestor methods, then up through loop scopes to the owning component.
    pub fn call(&mut self, method: &str, args: &[Value]) -> Option<Value> {
        self.session.call_method(self.key, method, args)
    }

    /// Run `f` after the current synchronous pass, in enqueue order.
    pub fn next_tick(&mut self, f: impl FnOnce(&mut Vm<'_>) + 'static) {
        self.session.queue.push_back(Task::NextTick {
            instance: self.key,
            callback: Box::new(f),
        });
    }

    /// Log the current value of a data field.
    pub fn log(&self, name: &str) {
        let context = LogContext::of(&*self.session, self.key);
        info!(vm = %context, field = name, value = ?self.get(name), "vm field");
    }
}

impl Session {
    pub(crate) fn emit(&mut self, key: InstanceKey, event: &str, args: &[Value]) {
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };
        for listener in instance.bus.take(event) {
            listener(&mut Vm::new(self, key), args);
        }
    }

    /// Pre-order emission over the instance and its slot children.
    pub(crate) fn broadcast(&mut self, key: InstanceKey, event: &str, args: &[Value]) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            self.emit(k, event, args);
            if let Some(instance) = self.instances.get(k) {
                let children: Vec<_> = instance
                    .state
                    .slots
                    .iter()
                    .filter_map(|s| s.instance)
                    .collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }

    /// The instance that owns `method`, searching the way [`Vm::call`] does.
    pub(crate) fn method_owner(&self, key: InstanceKey, method: &str) -> Option<InstanceKey> {
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            let instance = self.instances.get(k)?;
            let own = instance
                .constructor
                .as_ref()
                .map(|c| c.options().methods.contains_key(method))
                .unwrap_or(false);
            if own {
                return Some(k);
            }
            if let Some((owner, name)) = instance.state.bound_methods.get(method) {
                return self.method_owner(*owner, name);
            }
            if instance.state.is_component {
                return None;
            }
            cursor = instance.state.parent;
        }
        None
    }

    pub(crate) fn call_method(
        &mut self,
        key: InstanceKey,
        method: &str,
        args: &[Value],
    ) -> Option<Value> {
        let mut cursor = Some(key);
        let mut name = method.to_string();
        while let Some(k) = cursor {
            let instance = self.instances.get(k)?;
            let own = instance
                .constructor
                .as_ref()
                .and_then(|c| c.options().methods.get(&name).cloned());
            if let Some(f) = own {
                return Some(f(&mut Vm::new(self, k), args));
            }
            if let Some((owner, target)) = instance.state.bound_methods.get(&name).cloned() {
                cursor = Some(owner);
                name = target;
                continue;
            }
            if instance.state.is_component {
                return None;
            }
            cursor = instance.state.parent;
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// READ-ONLY VIEW
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
pub struct VmView<'a> {
    instances: &'a SlotMap<InstanceKey, Instance>,
    tree: &'a ElementTree,
    key: InstanceKey,
}

impl<'a> VmView<'a> {
    pub(crate) fn new(
        instances: &'a SlotMap<InstanceKey, Instance>,
        tree: &'a ElementTree,
        key: InstanceKey,
    ) -> Self {
        Self {
            instances,
            tree,
            key,
        }
    }

    fn instance(&self) -> &'a Instance {
        &self.instances[self.key]
    }

    fn view(&self, key: InstanceKey) -> VmView<'a> {
        VmView::new(self.instances, self.tree, key)
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn kind(&self) -> InstanceKind {
        self.instance().kind()
    }

    pub fn component_name(&self) -> Option<&'a str> {
        self.instance().component_name.as_deref()
    }

    pub fn data(&self) -> &'a Map<String, Value> {
        &self.instance().data
    }

    pub fn get(&self, keypath: &str) -> Option<&'a Value> {
        get_path(&self.instance().data, keypath)
    }

    pub fn element(&self) -> &'a ElementNode {
        &self.tree[self.instance().el]
    }

    pub fn parent(&self) -> Option<VmView<'a>> {
        self.instance().parent.map(|k| self.view(k))
    }

    pub fn root(&self) -> VmView<'a> {
        self.view(self.instance().root)
    }

    /// Public children (`$children`), in registration order.
    pub fn children(&self) -> Vec<VmView<'a>> {
        self.instance()
            .children
            .iter()
            .map(|k| self.view(*k))
            .collect()
    }

    /// Every child slot, light scopes included, in template order.
    pub fn slot_children(&self) -> Vec<VmView<'a>> {
        self.instance()
            .state
            .slots
            .iter()
            .filter_map(|s| s.instance)
            .map(|k| self.view(k))
            .collect()
    }

    pub fn reference(&self, name: &str) -> Vec<VmView<'a>> {
        self.instance()
            .refs
            .get(name)
            .map(|target| target.keys().into_iter().map(|k| self.view(k)).collect())
            .unwrap_or_default()
    }

    pub fn element_ref(&self, name: &str) -> Option<&'a ElementNode> {
        let key = self.instance().els.get(name)?;
        self.tree.get(*key)
    }

    pub fn is_compiled(&self) -> bool {
        self.instance().is_compiled
    }

    pub fn is_ready(&self) -> bool {
        self.instance().is_ready
    }
}
