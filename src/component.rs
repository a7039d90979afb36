//! # Components
//!
//! A component is described by [`ComponentOptions`] and referenced from a
//! registry through a [`ComponentRef`]:
//!
//! - `Constructor`: already composed, used as-is.
//! - `Descriptor`: composed on first use (the renderer's global mixin is
//!   prepended) and the result written back into the registry it came from.
//! - `AsyncFactory`: invoked with a [`Resolver`]; the builder polls the
//!   paired handle from its task loop.

use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use indexmap::IndexMap;
use serde_json::Value;

use crate::assets::Assets;
use crate::element::Template;
use crate::events::Listener;
use crate::expression::Filter;
use crate::lifecycle::Activation;
use crate::props::PropSpec;
use crate::vm::Vm;

pub type Hook = Rc<dyn Fn(&mut Vm<'_>)>;
pub type ActivateHook = Rc<dyn Fn(&mut Vm<'_>, Activation)>;
pub type Method = Rc<dyn Fn(&mut Vm<'_>, &[Value]) -> Value>;
pub type Getter = Rc<dyn Fn(&Vm<'_>) -> anyhow::Result<Value>>;
pub type DataFn = Rc<dyn Fn(&Vm<'_>) -> Value>;
pub type AsyncFactory = Rc<dyn Fn(Resolver)>;

/// Outcome delivered through a [`Resolver`]. `Err` carries the optional
/// rejection reason.
pub type Resolution = Result<ComponentRef, Option<String>>;

#[derive(Clone)]
pub enum DataOption {
    /// Plain object. Only accepted on the root instance.
    Value(Value),
    Function(DataFn),
}

#[derive(Clone, Default)]
pub struct Mixin {
    pub data: Option<DataOption>,
    pub created: Option<Hook>,
    pub compiled: Option<Hook>,
    pub ready: Option<Hook>,
}

impl Mixin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_fn(mut self, f: impl Fn(&Vm<'_>) -> Value + 'static) -> Self {
        self.data = Some(DataOption::Function(Rc::new(f)));
        self
    }

    pub fn created(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.created = Some(Rc::new(f));
        self
    }

    pub fn compiled(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.compiled = Some(Rc::new(f));
        self
    }

    pub fn ready(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.ready = Some(Rc::new(f));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub name: Option<String>,
    pub template: Option<Template>,
    /// Overrides the renderer-wide `replace` setting.
    pub replace: Option<bool>,
    pub inherit: bool,
    pub data: Option<DataOption>,
    /// `None` descriptor: the prop is declared without checks.
    pub props: IndexMap<String, Option<PropSpec>>,
    pub methods: IndexMap<String, Method>,
    pub computed: IndexMap<String, Getter>,
    pub events: IndexMap<String, Listener>,
    pub mixins: Vec<Rc<Mixin>>,
    pub created: Option<Hook>,
    pub compiled: Option<Hook>,
    pub activate: Option<ActivateHook>,
    pub ready: Option<Hook>,
    pub assets: Assets,
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("name", &self.name)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("mixins", &self.mixins.len())
            .finish_non_exhaustive()
    }
}

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = Some(replace);
        self
    }

    pub fn inherit(mut self, inherit: bool) -> Self {
        self.inherit = inherit;
        self
    }

    pub fn data(mut self, value: Value) -> Self {
        self.data = Some(DataOption::Value(value));
        self
    }

    pub fn data_fn(mut self, f: impl Fn(&Vm<'_>) -> Value + 'static) -> Self {
        self.data = Some(DataOption::Function(Rc::new(f)));
        self
    }

    pub fn prop(mut self, name: &str, spec: PropSpec) -> Self {
        self.props.insert(name.to_string(), Some(spec));
        self
    }

    /// Declare a prop with no type, default or validation.
    pub fn prop_any(mut self, name: &str) -> Self {
        self.props.insert(name.to_string(), None);
        self
    }

    pub fn method(
        mut self,
        name: &str,
        f: impl Fn(&mut Vm<'_>, &[Value]) -> Value + 'static,
    ) -> Self {
        self.methods.insert(name.to_string(), Rc::new(f));
        self
    }

    pub fn computed(
        mut self,
        name: &str,
        f: impl Fn(&Vm<'_>) -> anyhow::Result<Value> + 'static,
    ) -> Self {
        self.computed.insert(name.to_string(), Rc::new(f));
        self
    }

    pub fn on_event(mut self, event: &str, f: impl Fn(&mut Vm<'_>, &[Value]) + 'static) -> Self {
        self.events.insert(event.to_string(), Rc::new(f));
        self
    }

    pub fn mixin(mut self, mixin: Mixin) -> Self {
        self.mixins.push(Rc::new(mixin));
        self
    }

    pub fn created(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.created = Some(Rc::new(f));
        self
    }

    pub fn compiled(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.compiled = Some(Rc::new(f));
        self
    }

    pub fn activate(mut self, f: impl Fn(&mut Vm<'_>, Activation) + 'static) -> Self {
        self.activate = Some(Rc::new(f));
        self
    }

    pub fn ready(mut self, f: impl Fn(&mut Vm<'_>) + 'static) -> Self {
        self.ready = Some(Rc::new(f));
        self
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
}

/// Composed component, ready to instantiate.
#[derive(Debug, Clone)]
pub struct Constructor {
    options: ComponentOptions,
}

impl Constructor {
    pub fn new(options: ComponentOptions) -> Self {
        Self { options }
    }

    /// Compose a descriptor, prepending the process-wide mixin.
    pub fn compose(options: &ComponentOptions, global_mixin: Option<&Rc<Mixin>>) -> Self {
        let mut options = options.clone();
        if let Some(mixin) = global_mixin {
            options.mixins.insert(0, Rc::clone(mixin));
        }
        Self { options }
    }

    pub fn options(&self) -> &ComponentOptions {
        &self.options
    }
}

#[derive(Clone)]
pub enum ComponentRef {
    Constructor(Rc<Constructor>),
    Descriptor(Rc<ComponentOptions>),
    AsyncFactory(AsyncFactory),
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructor(c) => f.debug_tuple("Constructor").field(&c.options.name).finish(),
            Self::Descriptor(o) => f.debug_tuple("Descriptor").field(&o.name).finish(),
            Self::AsyncFactory(_) => f.write_str("AsyncFactory"),
        }
    }
}

impl ComponentRef {
    pub fn descriptor(options: ComponentOptions) -> Self {
        Self::Descriptor(Rc::new(options))
    }

    pub fn constructor(options: ComponentOptions) -> Self {
        Self::Constructor(Rc::new(Constructor::new(options)))
    }

    pub fn lazy(factory: impl Fn(Resolver) + 'static) -> Self {
        Self::AsyncFactory(Rc::new(factory))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// One-shot completion handle given to async factories. Dropping it without
/// calling either method counts as a rejection with no reason.
pub struct Resolver {
    sender: oneshot::Sender<Resolution>,
}

impl Resolver {
    pub fn resolve(self, component: ComponentRef) {
        let _ = self.sender.send(Ok(component));
    }

    pub fn reject(self, reason: Option<String>) {
        let _ = self.sender.send(Err(reason));
    }
}

pub enum Resolved {
    /// The reference was already a constructor.
    Direct(Rc<Constructor>),
    /// A descriptor was composed; the caller caches it under the asset name.
    Composed(Rc<Constructor>),
    Pending(oneshot::Receiver<Resolution>),
}

impl Resolved {
    pub fn constructor(&self) -> Option<&Rc<Constructor>> {
        match self {
            Self::Direct(c) | Self::Composed(c) => Some(c),
            Self::Pending(_) => None,
        }
    }
}

pub struct ComponentResolver<'m> {
    global_mixin: Option<&'m Rc<Mixin>>,
}

impl<'m> ComponentResolver<'m> {
    pub fn new(global_mixin: Option<&'m Rc<Mixin>>) -> Self {
        Self { global_mixin }
    }

    pub fn resolve(&self, component: &ComponentRef) -> Resolved {
        match component {
            ComponentRef::Constructor(ctor) => Resolved::Direct(Rc::clone(ctor)),
            ComponentRef::Descriptor(options) => {
                Resolved::Composed(Rc::new(Constructor::compose(options, self.global_mixin)))
            }
            ComponentRef::AsyncFactory(factory) => {
                let (sender, receiver) = oneshot::channel();
                factory(Resolver { sender });
                Resolved::Pending(receiver)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_is_composed_with_global_mixin() {
        let global = Rc::new(Mixin::new().created(|_| {}));
        let descriptor = ComponentRef::descriptor(
            ComponentOptions::new().name("card").mixin(Mixin::new()),
        );
        let resolved = ComponentResolver::new(Some(&global)).resolve(&descriptor);
        let Resolved::Composed(ctor) = resolved else {
            panic!("expected a composed constructor");
        };
        assert_eq!(ctor.options().mixins.len(), 2);
        assert!(ctor.options().mixins[0].created.is_some());
    }

    #[test]
    fn test_constructor_is_returned_directly() {
        let ctor = ComponentRef::constructor(ComponentOptions::new().name("plain"));
        let resolved = ComponentResolver::new(None).resolve(&ctor);
        assert!(matches!(resolved, Resolved::Direct(_)));
    }

    #[test]
    fn test_async_factory_handles() {
        let resolving = ComponentRef::lazy(|resolver| {
            resolver.resolve(ComponentRef::descriptor(ComponentOptions::new()))
        });
        let Resolved::Pending(mut rx) = ComponentResolver::new(None).resolve(&resolving) else {
            panic!("expected a pending handle");
        };
        assert!(matches!(rx.try_recv(), Ok(Some(Ok(_)))));

        let rejecting = ComponentRef::lazy(|resolver| resolver.reject(Some("offline".into())));
        let Resolved::Pending(mut rx) = ComponentResolver::new(None).resolve(&rejecting) else {
            panic!("expected a pending handle");
        };
        assert!(matches!(rx.try_recv(), Ok(Some(Err(Some(_))))));

        let dropping = ComponentRef::lazy(|_resolver| {});
        let Resolved::Pending(mut rx) = ComponentResolver::new(None).resolve(&dropping) else {
            panic!("expected a pending handle");
        };
        assert!(rx.try_recv().is_err());
    }
}
