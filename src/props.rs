//! # Props Binding
//!
//! Pulls declared props from the component's host element into the
//! instance data.
//!
//! ## Invariants
//!
//! 1. **Source precedence**: a bound value (`bind` directive) wins over a
//!    plain attribute. An empty plain attribute counts as absent.
//! 2. **Consumption**: a plain attribute used as a prop source is moved from
//!    `attribs` to the element's `props` so it is not rendered twice.
//! 3. **Parent scope**: values are evaluated against the direct parent.
//! 4. **Mirror skip**: a prop whose new value equals the last applied value
//!    is left untouched.
//! 5. **No coercion**: a failed check logs and leaves the prop as it was.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::common::{camel_to_dash_case, dash_to_camel_case, type_name};
use crate::element::{DirectiveValue, ElementKey};
use crate::error::{BuildIssue, Level};
use crate::instance::InstanceKey;
use crate::renderer::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Satisfied only by a value bound to a parent method.
    Function,
}

impl PropType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Array => "Array",
            Self::Object => "Object",
            Self::Function => "Function",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Function => false,
        }
    }
}

#[derive(Clone)]
pub enum PropDefault {
    Value(Value),
    Generator(Rc<dyn Fn() -> Value>),
}

#[derive(Clone, Default)]
pub struct PropSpec {
    pub prop_type: Option<PropType>,
    pub default: Option<PropDefault>,
    pub required: bool,
    pub validator: Option<Rc<dyn Fn(&Value) -> bool>>,
}

impl fmt::Debug for PropSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropSpec")
            .field("prop_type", &self.prop_type)
            .field("has_default", &self.default.is_some())
            .field("required", &self.required)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl PropSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bare-type form.
    pub fn typed(prop_type: PropType) -> Self {
        Self {
            prop_type: Some(prop_type),
            ..Default::default()
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(PropDefault::Value(value));
        self
    }

    pub fn default_with(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.default = Some(PropDefault::Generator(Rc::new(f)));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validator(mut self, f: impl Fn(&Value) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(f));
        self
    }
}

enum RawValue {
    Attribute(String),
    Bound(DirectiveValue),
}

/// The evaluated value of a prop source.
enum PropValue {
    Data(Option<Value>),
    /// The source names a method of the parent.
    Method { owner: InstanceKey, method: String },
}

impl Session {
    pub(crate) fn pull_props(&mut self, key: InstanceKey) {
        let Some(ctor) = self.instances[key].constructor.clone() else {
            return;
        };
        let props = &ctor.options().props;
        if props.is_empty() {
            return;
        }
        self.instances[key].state.has_props = true;
        for (name, spec) in props {
            self.pull_prop(key, name, spec.as_ref());
        }
    }

    fn pull_prop(&mut self, key: InstanceKey, name: &str, spec: Option<&PropSpec>) {
        let attr_name = camel_to_dash_case(name);
        let prop_name = dash_to_camel_case(name);
        let el = self.instances[key].el;

        let raw = self.take_raw_prop(el, &attr_name);
        let value = match &raw {
            Some(raw) => self.evaluate_prop(key, raw),
            None => PropValue::Data(None),
        };

        if let PropValue::Method { owner, method } = value {
            let type_ok = spec
                .and_then(|s| s.prop_type)
                .map(|t| t == PropType::Function)
                .unwrap_or(true);
            if !type_ok {
                self.report_type_mismatch(key, &prop_name, spec, "Function");
                return;
            }
            let instance = &mut self.instances[key];
            instance.data.remove(&prop_name);
            instance
                .state
                .bound_methods
                .insert(prop_name, (owner, method));
            return;
        }
        let PropValue::Data(mut value) = value else {
            return;
        };

        let mirror = &mut self.instances[key].state.initial_data_mirror;
        let unchanged = matches!(
            (&value, mirror.get(&prop_name)),
            (Some(new), Some(old)) if new == old
        );
        if unchanged {
            return;
        }
        match &value {
            Some(new) => {
                mirror.insert(prop_name.clone(), new.clone());
            }
            None => {
                mirror.remove(&prop_name);
            }
        }

        if let Some(spec) = spec {
            if raw.is_none() {
                value = spec.default.as_ref().map(|d| match d {
                    PropDefault::Value(v) => v.clone(),
                    PropDefault::Generator(f) => f(),
                });
                if spec.required {
                    self.report(
                        Some(key),
                        Level::Warn,
                        BuildIssue::MissingRequiredProp { prop: prop_name },
                    );
                    return;
                }
            } else {
                if let Some(prop_type) = spec.prop_type {
                    let matches = value.as_ref().map(|v| prop_type.matches(v)).unwrap_or(false);
                    if !matches {
                        let got = value.as_ref().map(type_name).unwrap_or("undefined");
                        self.report_type_mismatch(key, &prop_name, Some(spec), got);
                        return;
                    }
                }
                if let Some(validator) = &spec.validator {
                    let valid = value.as_ref().map(|v| validator(v)).unwrap_or(false);
                    if !valid {
                        self.report(
                            Some(key),
                            Level::Warn,
                            BuildIssue::PropValidatorFailed { prop: prop_name },
                        );
                        return;
                    }
                }
            }
        }

        let instance = &mut self.instances[key];
        instance.state.bound_methods.shift_remove(&prop_name);
        match value {
            Some(v) => {
                instance.data.insert(prop_name, v);
            }
            None => {
                instance.data.remove(&prop_name);
            }
        }
    }

    /// Locate the prop source on the element, consuming a plain attribute
    /// into `props` and marking a bound source compiled.
    fn take_raw_prop(&mut self, el: ElementKey, attr_name: &str) -> Option<RawValue> {
        let node = &mut self.tree[el];
        if let Some(attr) = node.attribs.shift_remove(attr_name) {
            node.props.insert(attr_name.to_string(), attr);
        }

        if let Some(bound) = node.directives.bind.get_mut(attr_name) {
            bound.is_compiled = true;
            return Some(RawValue::Bound(bound.value.clone()));
        }

        node.props
            .get(attr_name)
            .filter(|v| !v.is_empty())
            .map(|v| RawValue::Attribute(v.clone()))
    }

    fn evaluate_prop(&mut self, key: InstanceKey, raw: &RawValue) -> PropValue {
        let Some(parent) = self.instances[key].state.parent else {
            return PropValue::Data(None);
        };
        match raw {
            RawValue::Attribute(text) => match interpolation(text) {
                Some(expr) => PropValue::Data(self.evaluate(parent, expr, &[])),
                None => PropValue::Data(Some(Value::String(text.clone()))),
            },
            RawValue::Bound(bound) => {
                let expr = bound.get.trim();
                if bound.filters.is_empty() {
                    if let Some(owner) = self.method_owner(parent, expr) {
                        return PropValue::Method {
                            owner,
                            method: expr.to_string(),
                        };
                    }
                }
                PropValue::Data(self.evaluate(parent, expr, &bound.filters))
            }
        }
    }

    fn report_type_mismatch(
        &mut self,
        key: InstanceKey,
        prop: &str,
        spec: Option<&PropSpec>,
        got: &str,
    ) {
        let expected = spec
            .and_then(|s| s.prop_type)
            .map(|t| t.name())
            .unwrap_or("any");
        self.report(
            Some(key),
            Level::Warn,
            BuildIssue::PropTypeMismatch {
                prop: prop.to_string(),
                expected: expected.to_string(),
                got: got.to_string(),
            },
        );
    }
}

/// `{{ expr }}` covering the whole attribute.
fn interpolation(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") {
        return None;
    }
    Some(inner.trim())
}
