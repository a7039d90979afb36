//! # Lifecycle Coordination
//!
//! Builds run as tasks on a single FIFO queue. Async component handles are
//! polled whenever the queue drains, and their continuations are queued in
//! the order the handles settle.
//!
//! ## Invariants
//!
//! 1. **One ticket per build**: every queued build pass holds exactly one
//!    unit of the root's pending-build counter and releases it exactly once,
//!    including when the pass is discarded as stale.
//! 2. **Slot completion**: an instance finishes only after every reserved
//!    child slot reported in. Reporting twice counts once.
//! 3. **Stale work is inert**: a build or continuation bound to an
//!    interrupted element, or to an older generation of its instance, does
//!    nothing but release its ticket.
//! 4. **Zero means done**: when the counter returns to zero the root is
//!    either rebuilt (deferred rebuild flag) or the ready signal is broadcast.

use std::rc::Rc;

use futures::channel::oneshot;
use serde_json::Value;

use crate::component::{ComponentRef, ComponentResolver, Resolution, Resolved};
use crate::element::{ComponentStatus, ElementKey};
use crate::error::{BuildIssue, Level};
use crate::events::{Listener, EVENT_READY_TO_COMPILE, EVENT_VM_READY, HOOK_PREFIX};
use crate::instance::{Completion, InstanceKey};
use crate::renderer::Session;
use crate::scope::ChildOptions;
use crate::vm::Vm;

pub(crate) enum Task {
    Build {
        instance: InstanceKey,
        element: ElementKey,
        generation: u64,
        completion: Completion,
    },
    NextTick {
        instance: InstanceKey,
        callback: Box<dyn FnOnce(&mut Vm<'_>)>,
    },
    Resolved {
        target: PendingTarget,
        name: String,
        result: Resolution,
    },
}

pub(crate) enum PendingTarget {
    Root,
    Child {
        parent: InstanceKey,
        element: ElementKey,
        generation: u64,
        options: ChildOptions,
    },
}

pub(crate) struct PendingComponent {
    pub target: PendingTarget,
    pub name: String,
    pub receiver: oneshot::Receiver<Resolution>,
}

/// One-shot token handed to an `activate` hook. Completing it marks the
/// root for a deferred rebuild and releases the instance's pending count.
#[derive(Debug)]
pub struct Activation {
    instance: InstanceKey,
}

impl Activation {
    pub fn instance(&self) -> InstanceKey {
        self.instance
    }

    pub fn done(self, vm: &mut Vm<'_>) {
        vm.session.request_root_rebuild(self.instance);
        vm.session.update_not_ready(self.instance, -1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    Created,
    Compiled,
    Activate,
    Ready,
}

impl HookKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Compiled => "compiled",
            Self::Activate => "activate",
            Self::Ready => "ready",
        }
    }
}

impl Session {
    // ═══════════════════════════════════════════════════════════════════════════
    // TASK LOOP
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn run(&mut self) {
        loop {
            while let Some(task) = self.queue.pop_front() {
                self.run_task(task);
            }
            if !self.poll_pending() {
                break;
            }
        }

        if !self.pending.is_empty() {
            let count = self.pending.len();
            self.report(self.root, Level::Warn, BuildIssue::StalledAsyncComponents { count });
        }
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Build {
                instance,
                element,
                generation,
                completion,
            } => self.build(instance, element, generation, completion),
            Task::NextTick { instance, callback } => {
                if self.instances.contains_key(instance) {
                    callback(&mut Vm::new(self, instance));
                }
            }
            Task::Resolved {
                target,
                name,
                result,
            } => self.resume_component(target, name, result),
        }
    }

    /// Move settled async handles onto the queue. Returns whether any did.
    fn poll_pending(&mut self) -> bool {
        let mut progressed = false;
        let mut waiting = vec![];
        for mut pending in std::mem::take(&mut self.pending) {
            let result = match pending.receiver.try_recv() {
                Ok(Some(result)) => result,
                Ok(None) => {
                    waiting.push(pending);
                    continue;
                }
                // Resolver dropped without an answer.
                Err(_) => Err(None),
            };
            progressed = true;
            self.queue.push_back(Task::Resolved {
                target: pending.target,
                name: pending.name,
                result,
            });
        }
        self.pending = waiting;
        progressed
    }

    pub(crate) fn schedule_build(&mut self, key: InstanceKey, completion: Completion) {
        self.update_not_ready(key, 1);
        let instance = &self.instances[key];
        self.queue.push_back(Task::Build {
            instance: key,
            element: instance.el,
            generation: instance.state.generation,
            completion,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BUILD PASS
    // ═══════════════════════════════════════════════════════════════════════════

    fn build(
        &mut self,
        key: InstanceKey,
        element: ElementKey,
        generation: u64,
        completion: Completion,
    ) {
        let Some(current) = self.instances.get(key).map(|i| i.state.generation) else {
            return;
        };
        if self.tree.get(element).is_none() {
            self.report(Some(key), Level::Error, BuildIssue::MissingRootElement);
            self.update_not_ready(key, -1);
            return;
        }
        if current != generation || self.tree.is_interrupted(element) {
            self.update_not_ready(key, -1);
            return;
        }

        self.tree[element].flags.ready_to_build = true;
        self.process_elements(key, element);

        self.instances[key].state.awaiting = Some(completion);
        self.check_children(key);
    }

    pub(crate) fn check_children(&mut self, key: InstanceKey) {
        let Some(instance) = self.instances.get(key) else {
            return;
        };
        if instance.state.awaiting.is_some() && instance.slots_complete() {
            self.finish_build(key);
        }
    }

    fn finish_build(&mut self, key: InstanceKey) {
        let Some(completion) = self.instances[key].state.awaiting.take() else {
            return;
        };
        let finished = match completion {
            Completion::Initial => self.complete_initial(key),
            Completion::Settle => {
                self.instances[key].is_ready = true;
                self.update_not_ready(key, -1);
                true
            }
        };
        // An in-place reset reports to the parent from its own pass.
        if finished {
            self.emit(key, EVENT_VM_READY, &[]);
            self.notify_parent(key);
        }
    }

    fn notify_parent(&mut self, key: InstanceKey) {
        let instance = &self.instances[key];
        let (Some(parent), Some(slot)) = (instance.state.parent, instance.state.slot) else {
            return;
        };
        let Some(parent_instance) = self.instances.get_mut(parent) else {
            return;
        };
        if parent_instance.state.generation != slot.generation {
            return;
        }
        let newly_complete = match parent_instance.state.slots.get_mut(slot.index) {
            Some(entry) if entry.instance == Some(key) => {
                !std::mem::replace(&mut entry.complete, true)
            }
            _ => {
                let detail = format!("no slot {} for a finished child", slot.index);
                self.report(Some(parent), Level::Error, BuildIssue::ChildAccounting { detail });
                return;
            }
        };
        if newly_complete {
            self.check_children(parent);
        }
    }

    /// Mark a reserved slot complete without an instance in it.
    pub(crate) fn release_slot(&mut self, parent: InstanceKey, index: usize) {
        let Some(entry) = self
            .instances
            .get_mut(parent)
            .and_then(|p| p.state.slots.get_mut(index))
        else {
            return;
        };
        entry.complete = true;
        self.check_children(parent);
    }

    /// Returns false when the instance was reset in place.
    fn complete_initial(&mut self, key: InstanceKey) -> bool {
        let instance = &mut self.instances[key];
        instance.is_compiled = true;
        let is_root = instance.is_root();
        let parent = instance.state.parent;
        let wait_for = instance.state.wait_for.clone();
        let has_activate = self.has_activate(key);
        let under_light_scope = parent
            .and_then(|p| self.instances.get(p))
            .map(|p| p.state.not_public)
            .unwrap_or(false);
        let is_repeat_instance = self.instances[key].state.is_repeat || under_light_scope;

        // Listen before the compiled hooks so they may emit the event themselves.
        let waiting = match wait_for {
            Some(event) if !is_repeat_instance => {
                let release: Listener = Rc::new(|vm: &mut Vm<'_>, _: &[Value]| {
                    let key = vm.key;
                    if vm.session.has_activate(key) {
                        vm.session.call_activate(key);
                    } else {
                        vm.session.request_root_rebuild(key);
                        vm.session.update_not_ready(key, -1);
                    }
                });
                self.instances[key].bus.once(&event, release);
                true
            }
            _ => false,
        };

        let mut to_rebuild = self.call_mixin_hooks(key, HookKind::Compiled);
        if self.call_hook(key, HookKind::Compiled) {
            to_rebuild = true;
        }

        if is_repeat_instance {
            if has_activate {
                self.report(Some(key), Level::Warn, BuildIssue::ActivateOnLoopInstance);
            }
        } else if waiting {
            return true;
        } else if has_activate {
            self.call_activate(key);
            return true;
        }

        if to_rebuild {
            if !is_root {
                self.reset(key, None);
                self.update_not_ready(key, -1);
                return false;
            }
            self.request_root_rebuild(key);
        }

        self.instances[key].is_ready = true;
        self.update_not_ready(key, -1);
        true
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PENDING-BUILD COUNTER
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn request_root_rebuild(&mut self, key: InstanceKey) {
        let Some(root) = self.instances.get(key).map(|i| i.root) else {
            return;
        };
        if let Some(state) = self.instances.get_mut(root).and_then(|r| r.state.root.as_mut()) {
            state.to_rebuild = true;
        }
    }

    pub(crate) fn update_not_ready(&mut self, key: InstanceKey, change: i64) {
        let Some(root) = self.instances.get(key).map(|i| i.root) else {
            return;
        };
        let Some(state) = self.instances.get_mut(root).and_then(|r| r.state.root.as_mut()) else {
            return;
        };
        state.not_ready_count += change;
        let count = state.not_ready_count;

        if count == 0 {
            if state.to_rebuild {
                state.to_rebuild = false;
                self.reset(root, None);
            } else {
                self.ready_signals += 1;
                self.broadcast(root, EVENT_READY_TO_COMPILE, &[]);
            }
        }

        if count < 0 {
            self.report(Some(root), Level::Warn, BuildIssue::ReadyCountDeviance { count });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HOOKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run the instance's own hook and emit `hook:<name>`. Returns whether
    /// the hook was defined.
    pub(crate) fn call_hook(&mut self, key: InstanceKey, kind: HookKind) -> bool {
        let hook = self.instances[key].constructor.as_ref().and_then(|c| {
            let options = c.options();
            match kind {
                HookKind::Created => options.created.clone(),
                HookKind::Compiled => options.compiled.clone(),
                HookKind::Ready => options.ready.clone(),
                HookKind::Activate => None,
            }
        });
        let present = hook.is_some();
        if let Some(hook) = hook {
            hook(&mut Vm::new(self, key));
        }
        self.emit(key, &format!("{}{}", HOOK_PREFIX, kind.name()), &[]);
        present
    }

    /// Run the matching hook of every mixin in order. Returns whether any ran.
    pub(crate) fn call_mixin_hooks(&mut self, key: InstanceKey, kind: HookKind) -> bool {
        let Some(ctor) = self.instances[key].constructor.clone() else {
            return false;
        };
        let mut fired = false;
        for mixin in &ctor.options().mixins {
            let hook = match kind {
                HookKind::Created => mixin.created.clone(),
                HookKind::Compiled => mixin.compiled.clone(),
                HookKind::Ready => mixin.ready.clone(),
                HookKind::Activate => None,
            };
            if let Some(hook) = hook {
                hook(&mut Vm::new(self, key));
                fired = true;
            }
        }
        fired
    }

    fn has_activate(&self, key: InstanceKey) -> bool {
        self.instances
            .get(key)
            .and_then(|i| i.constructor.as_ref())
            .map(|c| c.options().activate.is_some())
            .unwrap_or(false)
    }

    fn call_activate(&mut self, key: InstanceKey) {
        let hook = self.instances[key]
            .constructor
            .as_ref()
            .and_then(|c| c.options().activate.clone());
        if let Some(hook) = hook {
            hook(&mut Vm::new(self, key), Activation { instance: key });
        }
        self.emit(key, &format!("{}{}", HOOK_PREFIX, HookKind::Activate.name()), &[]);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ASYNC COMPONENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn resume_component(&mut self, target: PendingTarget, name: String, result: Resolution) {
        match target {
            PendingTarget::Root => match result {
                Ok(component) => self.resume_root(component),
                Err(reason) => self.report(
                    None,
                    Level::Error,
                    BuildIssue::UnresolvedComponent { name, reason },
                ),
            },
            PendingTarget::Child {
                parent,
                element,
                generation,
                options,
            } => {
                let stale = self
                    .instances
                    .get(parent)
                    .map(|p| p.state.generation != generation)
                    .unwrap_or(true);
                if stale || self.tree.is_interrupted(element) {
                    return;
                }
                match result {
                    Ok(component) => {
                        self.resume_child(parent, element, generation, options, name, component)
                    }
                    Err(reason) => {
                        let node = &mut self.tree[element];
                        node.inner.clear();
                        if let Some(directive) = node.directives.component.as_mut() {
                            directive.status = Some(ComponentStatus::Unresolved);
                        }
                        self.report_unresolved(parent, &name, reason);
                        if let Some(index) = options.child_index {
                            self.release_slot(parent, index);
                        }
                    }
                }
            }
        }
    }

    fn resume_root(&mut self, component: ComponentRef) {
        match ComponentResolver::new(self.renderer.mixin.as_ref()).resolve(&component) {
            Resolved::Direct(ctor) | Resolved::Composed(ctor) => {
                self.create_root(ctor);
            }
            Resolved::Pending(receiver) => self.pending.push(PendingComponent {
                target: PendingTarget::Root,
                name: String::new(),
                receiver,
            }),
        }
    }

    fn resume_child(
        &mut self,
        parent: InstanceKey,
        element: ElementKey,
        generation: u64,
        mut options: ChildOptions,
        name: String,
        component: ComponentRef,
    ) {
        let mixin = self.global_mixin(parent);
        match ComponentResolver::new(mixin.as_ref()).resolve(&component) {
            Resolved::Direct(ctor) => {
                options.component = Some(ctor);
                self.build_component_content(parent, element, options);
            }
            Resolved::Composed(ctor) => {
                self.cache_component(parent, &name, &ctor);
                options.component = Some(ctor);
                self.build_component_content(parent, element, options);
            }
            Resolved::Pending(receiver) => self.pending.push(PendingComponent {
                target: PendingTarget::Child {
                    parent,
                    element,
                    generation,
                    options,
                },
                name,
                receiver,
            }),
        }
    }

    pub(crate) fn report_unresolved(
        &mut self,
        key: InstanceKey,
        name: &str,
        reason: Option<String>,
    ) {
        let level = if name.is_empty() {
            Level::Debug
        } else {
            Level::Warn
        };
        self.report(
            Some(key),
            level,
            BuildIssue::UnresolvedComponent {
                name: name.to_string(),
                reason,
            },
        );
    }
}
