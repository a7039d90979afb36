//! # Renderer
//!
//! [`Renderer`] owns the process-wide defaults (configuration, global
//! registries, global mixin, evaluator). Each call to [`Renderer::render`]
//! runs an independent build session over its own element and instance
//! arenas and returns everything it produced.
//!
//! ```ignore
//! let output = Renderer::new(RenderConfig::default())
//!     .component("user-card", ComponentRef::descriptor(card))
//!     .render(ComponentRef::descriptor(app));
//! assert!(output.ready);
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;
use slotmap::SlotMap;

use crate::assets::{Assets, Registry};
use crate::component::{ComponentRef, ComponentResolver, Mixin, Resolved};
use crate::config::RenderConfig;
use crate::element::{ElementTree, FilterCall, NodeSpec, NodeType, Template};
use crate::error::{Diagnostic, Level};
use crate::expression::{apply_filters, DefaultEvaluator, Evaluator, Filter};
use crate::instance::{Instance, InstanceKey};
use crate::lifecycle::{PendingComponent, PendingTarget, Task};
use crate::vm::VmView;

#[derive(Clone)]
pub struct Renderer {
    pub(crate) config: RenderConfig,
    pub(crate) assets: Assets,
    pub(crate) mixin: Option<Rc<Mixin>>,
    pub(crate) evaluator: Rc<dyn Evaluator>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            assets: Assets::default(),
            mixin: None,
            evaluator: Rc::new(DefaultEvaluator),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn component(mut self, name: &str, component: ComponentRef) -> Self {
        self.assets.components.insert(name, component);
        self
    }

    pub fn partial(mut self, name: &str, template: Template) -> Self {
        self.assets.partials.insert(name, template);
        self
    }

    pub fn filter(
        mut self,
        name: &str,
        f: impl Fn(Value, &[Value]) -> anyhow::Result<Value> + 'static,
    ) -> Self {
        let filter: Filter = Rc::new(f);
        self.assets.filters.insert(name, filter);
        self
    }

    /// Mixin prepended to every component composed from a descriptor.
    pub fn mixin(mut self, mixin: Mixin) -> Self {
        self.mixin = Some(Rc::new(mixin));
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Rc::new(evaluator);
        self
    }

    pub fn render(&self, component: ComponentRef) -> RenderOutput {
        let mut session = Session::new(self.clone());
        session.start(component);
        session.run();
        session.finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct RenderOutput {
    pub root: Option<InstanceKey>,
    /// The built document.
    pub tree: NodeSpec,
    pub instances: SlotMap<InstanceKey, Instance>,
    pub elements: ElementTree,
    pub diagnostics: Vec<Diagnostic>,
    /// Counter back at zero with no async component left unresolved.
    pub ready: bool,
    /// How many times the ready-to-compile signal was broadcast.
    pub ready_signals: usize,
    /// How many instance resets ran.
    pub rebuilds: usize,
}

impl RenderOutput {
    pub fn vm(&self, key: InstanceKey) -> Option<VmView<'_>> {
        self.instances.get(key)?;
        Some(VmView::new(&self.instances, &self.elements, key))
    }

    pub fn root_vm(&self) -> Option<VmView<'_>> {
        self.vm(self.root?)
    }

    /// Instances created for the given component name, in creation order.
    pub fn components_named(&self, name: &str) -> Vec<VmView<'_>> {
        self.instances
            .iter()
            .filter(|(_, inst)| inst.component_name.as_deref() == Some(name))
            .map(|(key, _)| VmView::new(&self.instances, &self.elements, key))
            .collect()
    }

    pub fn diagnostics_with_code(&self, code: &str) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.code == code).collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level >= Level::Warn)
            .collect()
    }

    pub fn tree_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.tree)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// State of one render. Behaviour is split across modules: `scope` builds
/// instances, `directives` and `repeat` expand elements, `props` binds
/// props and `lifecycle` drives tasks and readiness.
pub(crate) struct Session {
    pub(crate) renderer: Renderer,
    pub(crate) tree: ElementTree,
    pub(crate) instances: SlotMap<InstanceKey, Instance>,
    pub(crate) root: Option<InstanceKey>,
    pub(crate) queue: VecDeque<Task>,
    pub(crate) pending: Vec<PendingComponent>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) ready_signals: usize,
    pub(crate) rebuilds: usize,
}

impl Session {
    pub(crate) fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            tree: ElementTree::new(),
            instances: SlotMap::with_key(),
            root: None,
            queue: VecDeque::new(),
            pending: vec![],
            diagnostics: vec![],
            ready_signals: 0,
            rebuilds: 0,
        }
    }

    fn start(&mut self, component: ComponentRef) {
        let resolved = ComponentResolver::new(self.renderer.mixin.as_ref()).resolve(&component);
        match resolved {
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

    fn finish(self) -> RenderOutput {
        let tree = self
            .root
            .and_then(|root| self.instances.get(root))
            .map(|root| self.tree.snapshot(root.el))
            .unwrap_or_else(|| NodeSpec {
                node_type: NodeType::Document,
                ..Default::default()
            });
        let settled = self
            .root
            .and_then(|root| self.instances.get(root))
            .and_then(|root| root.state.root.as_ref())
            .map(|state| state.not_ready_count == 0)
            .unwrap_or(false);

        RenderOutput {
            root: self.root,
            tree,
            ready: settled && self.pending.is_empty() && self.ready_signals > 0,
            instances: self.instances,
            elements: self.tree,
            diagnostics: self.diagnostics,
            ready_signals: self.ready_signals,
            rebuilds: self.rebuilds,
        }
    }

    /// Evaluate `expr` (and its filter pipeline) in the scope of `key`.
    pub(crate) fn evaluate(
        &mut self,
        key: InstanceKey,
        expr: &str,
        filters: &[FilterCall],
    ) -> Option<Value> {
        let evaluator = Rc::clone(&self.renderer.evaluator);
        let value = evaluator.get_value(&self.instances.get(key)?.data, expr);
        if filters.is_empty() {
            return value;
        }
        Some(self.filter_value(key, filters, value.unwrap_or(Value::Null)))
    }

    /// Run a filter pipeline with the filters visible from `key`. A failing
    /// pipeline is reported and its partial value returned.
    pub(crate) fn filter_value(
        &mut self,
        key: InstanceKey,
        filters: &[FilterCall],
        value: Value,
    ) -> Value {
        let evaluator = Rc::clone(&self.renderer.evaluator);
        let Some(instance) = self.instances.get(key) else {
            return value;
        };
        let registry: &Registry<Filter> = &instance.assets.filters;
        match apply_filters(evaluator.as_ref(), &instance.data, registry, filters, value) {
            Ok(v) => v,
            Err(failure) => {
                self.report(Some(key), Level::Warn, failure.issue);
                failure.partial
            }
        }
    }
}
