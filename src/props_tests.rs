//! Prop binding scenarios: sources, defaults, validation and the mirror.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::component::{ComponentOptions, ComponentRef};
    use crate::element::{NodeSpec, Template};
    use crate::error::{BuildIssue, Level, ISSUE_INVALID_PROP};
    use crate::props::{PropSpec, PropType};
    use crate::renderer::{RenderOutput, Renderer};
    use crate::vm::VmView;

    fn render_with(child: ComponentOptions, host: NodeSpec, data: Value) -> RenderOutput {
        let root = ComponentOptions::new()
            .name("app")
            .data(data)
            .method("save", |_, _| json!("saved"))
            .template(Template::new(vec![host]));
        Renderer::default()
            .component("counter", ComponentRef::descriptor(child))
            .render(ComponentRef::descriptor(root))
    }

    fn counter(name: &str, spec: PropSpec) -> ComponentOptions {
        ComponentOptions::new()
            .template(Template::new(vec![NodeSpec::tag("span")]))
            .prop(name, spec)
    }

    fn child(output: &RenderOutput) -> VmView<'_> {
        output.components_named("counter").into_iter().next().unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SOURCES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_plain_attribute_is_consumed() {
        let output = render_with(
            counter("label", PropSpec::typed(PropType::String)),
            NodeSpec::tag("counter").attr("label", "Clicks").attr("class", "big"),
            json!({}),
        );

        let vm = child(&output);
        assert_eq!(vm.get("label"), Some(&json!("Clicks")));
        let el = vm.element();
        assert!(!el.attribs.contains_key("label"));
        assert_eq!(el.props.get("label").map(String::as_str), Some("Clicks"));
        assert_eq!(el.attribs.get("class").map(String::as_str), Some("big"));
    }

    #[test]
    fn test_bound_value_wins_and_keeps_type() {
        let output = render_with(
            counter("count", PropSpec::typed(PropType::Number)),
            NodeSpec::tag("counter").attr("count", "1").bind("count", "total"),
            json!({"total": 7}),
        );

        let vm = child(&output);
        assert_eq!(vm.get("count"), Some(&json!(7)));
        assert!(vm.element().directives.bind["count"].is_compiled);
    }

    #[test]
    fn test_interpolated_attribute_is_evaluated() {
        let output = render_with(
            counter("config", PropSpec::typed(PropType::Object)),
            NodeSpec::tag("counter").attr("config", "{{ settings }}"),
            json!({"settings": {"step": 2}}),
        );
        assert_eq!(child(&output).get("config"), Some(&json!({"step": 2})));
        assert!(output.warnings().is_empty());
    }

    #[test]
    fn test_camel_case_prop_reads_dashed_attribute() {
        let output = render_with(
            counter("userName", PropSpec::new()),
            NodeSpec::tag("counter").attr("user-name", "ann"),
            json!({}),
        );
        assert_eq!(child(&output).get("userName"), Some(&json!("ann")));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // DEFAULTS AND VALIDATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_absent_prop_takes_default() {
        let output = render_with(
            counter("count", PropSpec::typed(PropType::Number).default_value(json!(0))),
            NodeSpec::tag("counter"),
            json!({}),
        );
        assert_eq!(child(&output).get("count"), Some(&json!(0)));

        let output = render_with(
            counter("items", PropSpec::typed(PropType::Array).default_with(|| json!([]))),
            NodeSpec::tag("counter"),
            json!({}),
        );
        assert_eq!(child(&output).get("items"), Some(&json!([])));
    }

    #[test]
    fn test_empty_attribute_counts_as_absent() {
        let output = render_with(
            counter("label", PropSpec::new().default_value(json!("none"))),
            NodeSpec::tag("counter").attr("label", ""),
            json!({}),
        );
        assert_eq!(child(&output).get("label"), Some(&json!("none")));
    }

    #[test]
    fn test_type_mismatch_leaves_prop_unset() {
        let output = render_with(
            counter("count", PropSpec::typed(PropType::Number).default_value(json!(0))),
            NodeSpec::tag("counter").bind("count", "'5'"),
            json!({}),
        );

        assert!(child(&output).get("count").is_none());
        let invalid = output.diagnostics_with_code(ISSUE_INVALID_PROP);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].level, Level::Warn);
        assert_eq!(
            invalid[0].issue,
            BuildIssue::PropTypeMismatch {
                prop: "count".into(),
                expected: "Number".into(),
                got: "String".into(),
            }
        );
        assert!(output.ready);
    }

    #[test]
    fn test_missing_required_prop() {
        let output = render_with(
            counter("id", PropSpec::typed(PropType::String).required()),
            NodeSpec::tag("counter"),
            json!({}),
        );
        assert!(child(&output).get("id").is_none());
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.issue == BuildIssue::MissingRequiredProp { prop: "id".into() }));
    }

    #[test]
    fn test_validator() {
        let positive = || {
            PropSpec::typed(PropType::Number).validator(|v| v.as_i64().map(|n| n > 0).unwrap_or(false))
        };

        let output = render_with(
            counter("step", positive()),
            NodeSpec::tag("counter").bind("step", "3"),
            json!({}),
        );
        assert_eq!(child(&output).get("step"), Some(&json!(3)));

        let output = render_with(
            counter("step", positive()),
            NodeSpec::tag("counter").bind("step", "0"),
            json!({}),
        );
        assert!(child(&output).get("step").is_none());
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.issue == BuildIssue::PropValidatorFailed { prop: "step".into() }));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // METHOD PROPS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_function_prop_bound_to_method() {
        let component = counter("onSave", PropSpec::typed(PropType::Function)).created(|vm| {
            let result = vm.call("onSave", &[]).unwrap_or(Value::Null);
            vm.set("result", result);
        });
        let output = render_with(component, NodeSpec::tag("counter").bind("on-save", "save"), json!({}));

        let vm = child(&output);
        assert_eq!(vm.get("result"), Some(&json!("saved")));
        assert!(output.warnings().is_empty());
    }

    #[test]
    fn test_function_prop_rejects_data() {
        let output = render_with(
            counter("onSave", PropSpec::typed(PropType::Function)),
            NodeSpec::tag("counter").bind("on-save", "label"),
            json!({"label": "nope"}),
        );
        assert!(child(&output).get("onSave").is_none());
        assert_eq!(output.diagnostics_with_code(ISSUE_INVALID_PROP).len(), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MIRROR
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_unchanged_prop_survives_rebuild() {
        let component = counter("label", PropSpec::new()).created(|vm| {
            vm.set("label", json!("local"));
        });
        let root = ComponentOptions::new()
            .name("app")
            .compiled(|_| {})
            .template(Template::new(vec![NodeSpec::tag("counter").attr("label", "Hello")]));
        let output = Renderer::default()
            .component("counter", ComponentRef::descriptor(component))
            .render(ComponentRef::descriptor(root));

        assert!(output.rebuilds >= 1);
        let vm = child(&output);
        assert_eq!(vm.get("label"), Some(&json!("local")));
        assert_eq!(output.components_named("counter").len(), 1);
    }
}
