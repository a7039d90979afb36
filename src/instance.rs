//! # Instances
//!
//! An instance is a built component or loop scope. Template-visible data
//! lives in `data`; the public handles (element, parent, root, children,
//! refs, els, options) are typed fields; everything the builder needs for
//! bookkeeping sits in [`InstanceState`].
//!
//! ## Invariants
//!
//! 1. **Single root**: every instance knows its root; only the root carries
//!    a [`RootState`] (pending-build counter and rebuild flag).
//! 2. **Fixed slots**: `state.slots` is sized while the parent's directives
//!    are expanded. Async children fill a reserved slot, never add one.
//! 3. **System names**: keys starting with `$` or `_` are never inherited.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use slotmap::new_key_type;

use crate::assets::Assets;
use crate::component::{Constructor, Mixin};
use crate::element::{ElementKey, NodeSpec};
use crate::events::{EventBus, Listener};

new_key_type! { pub struct InstanceKey; }

/// Whether `name` belongs to the reserved namespace (public handles,
/// loop bindings such as `$index`, private fields).
pub fn is_system_prop(name: &str) -> bool {
    name.starts_with('$') || name.starts_with('_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Root,
    Component,
    /// Plain scope created per `repeat` item.
    RepeatItem,
    /// Light scope created per `for` item.
    Light,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Component => "component",
            Self::RepeatItem => "repeat",
            Self::Light => "light",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefTarget {
    One(InstanceKey),
    Many(Vec<InstanceKey>),
}

impl RefTarget {
    pub fn keys(&self) -> Vec<InstanceKey> {
        match self {
            Self::One(k) => vec![*k],
            Self::Many(ks) => ks.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildSlot {
    pub instance: Option<InstanceKey>,
    pub complete: bool,
}

#[derive(Clone, Default)]
pub struct RootState {
    pub not_ready_count: i64,
    pub to_rebuild: bool,
    pub mixin: Option<Rc<Mixin>>,
}

/// How a finished build pass is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// First build: compiled hooks, activation and rebuild decisions.
    Initial,
    /// Rebuild or loop scope: mark ready and release the pending count.
    Settle,
}

/// Where a child reports completion in its direct parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub index: usize,
    pub generation: u64,
}

#[derive(Clone, Default)]
pub struct InstanceState {
    /// Direct parent, loop scopes included.
    pub parent: Option<InstanceKey>,
    pub slots: Vec<ChildSlot>,
    pub root: Option<RootState>,
    /// Component children keyed by (template id, component name).
    pub vms: IndexMap<(u64, String), InstanceKey>,
    pub vms_detached: IndexMap<(u64, String), InstanceKey>,
    pub initial_data_mirror: Map<String, Value>,
    /// Props whose value is a method of an ancestor: prop -> (owner, method).
    pub bound_methods: IndexMap<String, (InstanceKey, String)>,
    pub is_component: bool,
    pub is_repeat: bool,
    pub not_public: bool,
    pub has_props: bool,
    pub has_with_data: bool,
    /// Event that releases this instance's pending count (`wait-for`).
    pub wait_for: Option<String>,
    /// Inner content to restore when a non-component scope is reset.
    pub pristine: Vec<NodeSpec>,
    pub(crate) generation: u64,
    pub(crate) slot: Option<SlotRef>,
    pub(crate) awaiting: Option<Completion>,
}

pub struct Instance {
    pub data: Map<String, Value>,
    pub el: ElementKey,
    /// `$parent`: the nearest ancestor that is not a light scope. A light
    /// scope points at its direct parent.
    pub parent: Option<InstanceKey>,
    pub root: InstanceKey,
    pub children: Vec<InstanceKey>,
    pub refs: IndexMap<String, RefTarget>,
    pub els: IndexMap<String, ElementKey>,
    pub constructor: Option<Rc<Constructor>>,
    pub component_name: Option<String>,
    /// Merged registries visible from this instance.
    pub assets: Assets,
    pub bus: EventBus<Listener>,
    pub is_compiled: bool,
    pub is_ready: bool,
    pub state: InstanceState,
}

impl Instance {
    pub fn kind(&self) -> InstanceKind {
        if self.state.not_public {
            InstanceKind::Light
        } else if self.state.parent.is_none() {
            InstanceKind::Root
        } else if self.state.is_component {
            InstanceKind::Component
        } else {
            InstanceKind::RepeatItem
        }
    }

    pub fn is_root(&self) -> bool {
        self.state.parent.is_none()
    }

    /// Every reserved child slot has reported in.
    pub(crate) fn slots_complete(&self) -> bool {
        self.state.slots.iter().all(|s| s.complete)
    }
}

/// Copy the source's non-system fields the target does not define yet.
pub fn inherit_fields(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if is_system_prop(key) || target.contains_key(key) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}
