//! # vm-tree
//!
//! Server-side template tree builder. Takes a component (template, data,
//! props, hooks) plus registries of components, partials and filters, and
//! builds the full instance tree: loops and conditionals expanded, child
//! components resolved (synchronously or through async factories) and
//! scoped, and readiness tracked until the tree can be serialized.
//!
//! ## Build Invariants
//!
//! 1. **Single-threaded, cooperative**: one render runs on one thread. Deferred
//!    work (build passes, async resolutions, `next_tick` callbacks) is queued
//!    and drained in enqueue order, never in the middle of a synchronous pass.
//!
//! 2. **Compiled means done**: a loop or conditional directive marked
//!    compiled on a concrete node is never expanded again. This is what keeps
//!    expansion over a mutating sibling list terminating.
//!
//! 3. **Fixed slots**: an instance reserves one slot per child while its
//!    directives are expanded. It completes once every slot has reported in,
//!    whatever the order.
//!
//! 4. **Root counter**: each build pass takes one unit of the root's
//!    pending-build counter and releases it on completion. At zero the tree
//!    is either rebuilt (deferred rebuild flag) or declared ready.
//!
//! 5. **Degrade, never abort**: missing assets, invalid props, failing
//!    computed getters or filters and structural misuse are logged through
//!    `tracing`, recorded as [`Diagnostic`]s, and the build continues.
//!
//! ## Scoping
//!
//! - Component instances start from their own data. Loop items inherit every
//!   field of their parent whose name does not start with `$` or `_`.
//! - `for` items get a light scope (data and filters only). `repeat` items get
//!   a full instance.
//! - Props are evaluated in the direct parent's scope; with-data too.

mod assets;
mod common;
mod component;
mod config;
mod directives;
mod element;
mod error;
mod events;
mod expression;
mod instance;
mod lifecycle;
mod logging;
mod props;
mod renderer;
mod repeat;
mod scope;
mod vm;

#[cfg(test)]
mod component_tests;
#[cfg(test)]
mod props_tests;

pub use assets::{Assets, Registry};
pub use common::{camel_to_dash_case, dash_to_camel_case, dash_to_upper_camel_case};
pub use component::{
    ComponentOptions, ComponentRef, Constructor, DataOption, Mixin, Resolution, Resolver,
};
pub use config::RenderConfig;
pub use element::{
    ComponentName, ComponentStatus, Directive, DirectiveValue, ElementKey, ElementNode,
    ElementTree, FilterCall, NodeSpec, NodeType, OnHandler, Template, WithItem, MERGE_TAG,
    TEMPLATE_TAG,
};
pub use error::{BuildIssue, Diagnostic, Level};
pub use events::{
    ListenerId, EVENT_READY_TO_COMPILE, EVENT_REBUILD_COMPUTED, EVENT_STOP_BUILDING,
    EVENT_VM_READY,
};
pub use expression::{DefaultEvaluator, Evaluator, Filter};
pub use instance::{Instance, InstanceKey, InstanceKind, RefTarget};
pub use lifecycle::Activation;
pub use logging::{init_tracing, LogContext};
pub use props::{PropDefault, PropSpec, PropType};
pub use renderer::{RenderOutput, Renderer};
pub use repeat::{INDEX_NAME, KEY_NAME, VALUE_NAME};
pub use vm::{Vm, VmView};
