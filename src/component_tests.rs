//! Component resolution and scoping scenarios.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};

    use crate::component::{ComponentOptions, ComponentRef, Mixin};
    use crate::config::RenderConfig;
    use crate::element::{
        ComponentStatus, Directive, NodeSpec, NodeType, OnHandler, Template, WithItem, MERGE_TAG,
        TEMPLATE_TAG,
    };
    use crate::error::{BuildIssue, Level, ISSUE_MISSING_ASSET};
    use crate::instance::{InstanceKind, RefTarget};
    use crate::renderer::{RenderOutput, Renderer};

    fn app(nodes: Vec<NodeSpec>, data: Value) -> ComponentRef {
        ComponentRef::descriptor(
            ComponentOptions::new()
                .name("app")
                .template(Template::new(nodes))
                .data(data),
        )
    }

    fn card() -> ComponentOptions {
        ComponentOptions::new()
            .template(Template::new(vec![NodeSpec::tag("article")]))
            .prop_any("title")
    }

    fn first_named<'a>(output: &'a RenderOutput, name: &str) -> crate::vm::VmView<'a> {
        output
            .components_named(name)
            .into_iter()
            .next()
            .unwrap_or_else(|| panic!("no instance of {}", name))
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_implicit_tag_with_casing_fallback() {
        let renderer =
            Renderer::default().component("userCard", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("user-card").attr("title", "Hello")];
        let output = renderer.render(app(nodes, json!({})));

        assert!(output.ready);
        let vm = first_named(&output, "userCard");
        assert_eq!(vm.kind(), InstanceKind::Component);
        assert_eq!(vm.get("title"), Some(&json!("Hello")));
        assert_eq!(vm.parent().map(|p| p.key()), output.root);
        assert_eq!(output.root_vm().unwrap().children().len(), 1);
    }

    #[test]
    fn test_is_attribute_is_consumed() {
        let renderer = Renderer::default().component("Card", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("section").attr("is", "card")];
        let output = renderer.render(app(nodes, json!({})));

        let vm = first_named(&output, "Card");
        assert!(!vm.element().attribs.contains_key("is"));
    }

    #[test]
    fn test_dynamic_is_binding() {
        let renderer = Renderer::default()
            .component("a-view", ComponentRef::descriptor(card()))
            .component("b-view", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("div").bind("is", "current")];
        let output = renderer.render(app(nodes, json!({"current": "b-view"})));

        assert!(output.components_named("a-view").is_empty());
        assert_eq!(output.components_named("b-view").len(), 1);
    }

    #[test]
    fn test_descriptor_is_cached_as_constructor() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("card"), NodeSpec::tag("card")];
        let output = renderer.render(app(nodes, json!({})));

        let root = &output.instances[output.root.unwrap()];
        assert!(matches!(
            root.assets.components.get("card"),
            Some(ComponentRef::Constructor(_))
        ));
        let cards = output.components_named("card");
        assert_eq!(cards.len(), 2);
        let a = output.instances[cards[0].key()].constructor.clone().unwrap();
        let b = output.instances[cards[1].key()].constructor.clone().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unresolved_component_clears_content() {
        let nodes = vec![
            NodeSpec::tag("div")
                .attr("is", "ghost")
                .child(NodeSpec::text("fallback")),
            NodeSpec::tag("p").when("ok"),
        ];
        let output = Renderer::default().render(app(nodes, json!({"ok": true})));

        assert!(output.ready);
        let ghost = &output.tree.inner[0];
        assert!(ghost.inner.is_empty());
        assert_eq!(
            ghost.directives.component.as_ref().and_then(|d| d.status),
            Some(ComponentStatus::Unresolved)
        );
        assert_eq!(output.tree.inner[1].name, "p");

        let missing = output.diagnostics_with_code(ISSUE_MISSING_ASSET);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].level, Level::Warn);
        assert!(matches!(
            &missing[0].issue,
            BuildIssue::UnresolvedComponent { name, reason: None } if name == "ghost"
        ));
    }

    #[test]
    fn test_unresolved_repeat_component_reports_once_per_item() {
        let nodes = vec![NodeSpec::tag("div")
            .attr("is", "ghost")
            .repeat(Directive::new("rows"))
            .child(NodeSpec::text("fallback"))];
        let output = Renderer::default().render(app(nodes, json!({"rows": [1, 2]})));

        assert!(output.ready);
        assert_eq!(output.tree.inner.len(), 2);
        for ghost in &output.tree.inner {
            assert!(ghost.inner.is_empty());
            assert_eq!(
                ghost.directives.component.as_ref().and_then(|d| d.status),
                Some(ComponentStatus::Unresolved)
            );
        }
        assert_eq!(output.diagnostics_with_code(ISSUE_MISSING_ASSET).len(), 2);
    }

    #[test]
    fn test_recursive_self_reference() {
        let tree = ComponentOptions::new()
            .name("tree-node")
            .prop_any("node")
            .template(Template::new(vec![NodeSpec::tag("tree-node")
                .for_each(Directive::new("node.children").alias("child"))
                .bind("node", "child")]));
        let nodes = vec![NodeSpec::tag("tree-node").bind("node", "root")];
        let data = json!({"root": {"children": [
            {"children": []},
            {"children": [{"children": []}]}
        ]}});
        let renderer = Renderer::default().component("tree-node", ComponentRef::descriptor(tree));
        let output = renderer.render(app(nodes, data));

        assert!(output.ready);
        assert_eq!(output.components_named("tree-node").len(), 4);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TEMPLATE SPLICING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_replace_single_root_becomes_merge() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let output = renderer.render(app(vec![NodeSpec::tag("card")], json!({})));

        let host = &output.tree.inner[0];
        assert_eq!(host.name, MERGE_TAG);
        assert_eq!(host.inner[0].name, "article");
        let vm = first_named(&output, "card");
        assert_eq!(vm.element().original.as_ref().unwrap().name, "card");
    }

    #[test]
    fn test_replace_multiple_roots_becomes_template() {
        let two = ComponentOptions::new()
            .template(Template::new(vec![NodeSpec::tag("h1"), NodeSpec::tag("h2")]));
        let renderer = Renderer::default().component("pair", ComponentRef::descriptor(two));
        let output = renderer.render(app(vec![NodeSpec::tag("pair")], json!({})));
        assert_eq!(output.tree.inner[0].name, TEMPLATE_TAG);
    }

    #[test]
    fn test_no_replace_keeps_host_tag() {
        let renderer = Renderer::new(RenderConfig {
            replace: false,
            ..Default::default()
        })
        .component("card", ComponentRef::descriptor(card()));
        let output = renderer.render(app(vec![NodeSpec::tag("card")], json!({})));
        assert_eq!(output.tree.inner[0].name, "card");

        let overriding = Renderer::new(RenderConfig {
            replace: false,
            ..Default::default()
        })
        .component("card", ComponentRef::descriptor(card().replace(true)));
        let output = overriding.render(app(vec![NodeSpec::tag("card")], json!({})));
        assert_eq!(output.tree.inner[0].name, MERGE_TAG);
    }

    #[test]
    fn test_inner_content_is_wrapped_and_kept() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("card").child(NodeSpec::tag("em"))];
        let output = renderer.render(app(nodes, json!({})));

        let vm = first_named(&output, "card");
        let original = vm.element().original.clone().unwrap();
        assert_eq!(original.inner.len(), 1);
        let slot = &output.elements[original.inner[0]];
        assert_eq!(slot.node_type, NodeType::Content);
        assert_eq!(output.elements[slot.inner[0]].name, "em");
    }

    #[test]
    fn test_component_without_template() {
        let bare = ComponentOptions::new().name("bare");
        let renderer = Renderer::default().component("bare", ComponentRef::descriptor(bare));
        let output = renderer.render(app(vec![NodeSpec::tag("bare")], json!({})));

        assert!(output.ready);
        let vm = first_named(&output, "bare");
        assert_eq!(vm.element().name, TEMPLATE_TAG);
        assert!(vm.element().flags.component_empty_template);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCOPING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_component_does_not_inherit_parent_data() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let output = renderer.render(app(vec![NodeSpec::tag("card")], json!({"secret": 1})));
        assert!(first_named(&output, "card").get("secret").is_none());
    }

    #[test]
    fn test_inherit_option_copies_public_fields() {
        let child = card()
            .inherit(true)
            .data_fn(|_| json!({"own": "mine"}));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        let output = renderer.render(app(
            vec![NodeSpec::tag("card")],
            json!({"shared": 1, "own": "parent", "_private": true}),
        ));

        let vm = first_named(&output, "card");
        assert_eq!(vm.get("shared"), Some(&json!(1)));
        assert_eq!(vm.get("own"), Some(&json!("mine")));
        assert!(vm.get("_private").is_none());
    }

    #[test]
    fn test_object_data_rejected_below_root() {
        let child = card().data(json!({"x": 1}));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        let output = renderer.render(app(vec![NodeSpec::tag("card")], json!({})));

        assert!(first_named(&output, "card").get("x").is_none());
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.issue == BuildIssue::InvalidDataOption));
    }

    #[test]
    fn test_mixin_data_order() {
        let child = card()
            .mixin(Mixin::new().data_fn(|_| json!({"a": "first", "b": "first"})))
            .mixin(Mixin::new().data_fn(|_| json!({"b": "second", "c": "second"})))
            .data_fn(|_| json!({"c": "own"}));
        let global = Mixin::new().data_fn(|_| json!({"g": true, "a": "global"}));
        let renderer = Renderer::default()
            .mixin(global)
            .component("card", ComponentRef::descriptor(child));
        let output = renderer.render(app(vec![NodeSpec::tag("card")], json!({})));

        let vm = first_named(&output, "card");
        assert_eq!(vm.get("g"), Some(&json!(true)));
        assert_eq!(vm.get("a"), Some(&json!("first")));
        assert_eq!(vm.get("b"), Some(&json!("second")));
        assert_eq!(vm.get("c"), Some(&json!("own")));
    }

    #[test]
    fn test_with_replace_form() {
        let child = card().data_fn(|_| json!({"dropped": true}));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        let nodes = vec![NodeSpec::tag("card").with_data(vec![WithItem {
            arg: None,
            get: "profile".into(),
        }])];
        let output = renderer.render(app(nodes, json!({"profile": {"name": "ann"}})));

        let vm = first_named(&output, "card");
        assert_eq!(vm.get("name"), Some(&json!("ann")));
        assert!(vm.get("dropped").is_none());
        assert!(output.instances[vm.key()].state.has_with_data);
    }

    #[test]
    fn test_with_mapping_form() {
        let child = card().data_fn(|_| json!({"kept": true}));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        let nodes = vec![NodeSpec::tag("card").with_data(vec![
            WithItem {
                arg: Some("who".into()),
                get: "user.name".into(),
            },
            WithItem {
                arg: Some("missing".into()),
                get: "nothing".into(),
            },
        ])];
        let output = renderer.render(app(nodes, json!({"user": {"name": "bob"}})));

        let vm = first_named(&output, "card");
        assert_eq!(vm.get("who"), Some(&json!("bob")));
        assert_eq!(vm.get("kept"), Some(&json!(true)));
        assert!(vm.get("missing").is_none());
    }

    #[test]
    fn test_repeat_creates_component_per_item() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("card")
            .repeat(Directive::new("posts").alias("post"))
            .reference("cards")];
        let output = renderer.render(app(nodes, json!({"posts": ["x", "y"]})));

        assert!(output.ready);
        let cards = output.components_named("card");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].get("post"), Some(&json!("y")));
        assert_eq!(cards[1].get("$index"), Some(&json!(1)));
        let root = output.root_vm().unwrap();
        assert_eq!(root.reference("cards").len(), 2);
    }

    #[test]
    fn test_repeat_plain_items_inherit_data() {
        let nodes = vec![NodeSpec::tag("li").repeat(Directive::new("rows"))];
        let output = Renderer::default().render(app(nodes, json!({"rows": [1, 2], "page": 3})));

        let root = output.root_vm().unwrap();
        let items = root.children();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|vm| vm.kind() == InstanceKind::RepeatItem));
        assert_eq!(items[0].get("page"), Some(&json!(3)));
        assert_eq!(items[1].get("$value"), Some(&json!(2)));
    }

    #[test]
    fn test_component_under_for_reports_to_public_parent() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let nodes = vec![NodeSpec::tag("card")
            .for_each(Directive::new("items").alias("item"))
            .bind("title", "item")
            .reference("entry")];
        let output = renderer.render(app(nodes, json!({"items": ["a", "b"]})));

        assert!(output.ready);
        let root = output.root_vm().unwrap();
        assert_eq!(root.children().len(), 2);
        assert!(matches!(
            output.instances[root.key()].refs.get("entry"),
            Some(RefTarget::Many(list)) if list.len() == 2
        ));
        let titles: Vec<_> = root
            .children()
            .iter()
            .map(|vm| vm.get("title").cloned())
            .collect();
        assert_eq!(titles, vec![Some(json!("a")), Some(json!("b"))]);
        assert_eq!(root.children()[0].parent().map(|p| p.key()), Some(root.key()));
    }

    #[test]
    fn test_single_ref_and_el() {
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let mut marked = NodeSpec::tag("span");
        marked.directives.el = Some("badge-icon".into());
        let nodes = vec![NodeSpec::tag("card").reference("main-card"), marked];
        let output = renderer.render(app(nodes, json!({})));

        let root = output.root_vm().unwrap();
        assert_eq!(root.reference("mainCard").len(), 1);
        assert_eq!(root.element_ref("badgeIcon").map(|e| e.name.as_str()), Some("span"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EVENTS AND METHODS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_template_on_handler_calls_parent_method() {
        let seen = Rc::new(RefCell::new(vec![]));
        let sink = Rc::clone(&seen);
        let child = card().created(|vm| vm.emit("picked", &[json!("event-arg")]));
        let root = ComponentOptions::new()
            .name("app")
            .data(json!({"label": "from-parent"}))
            .method("onPick", move |_, args| {
                sink.borrow_mut().push(args.to_vec());
                Value::Null
            })
            .template(Template::new(vec![
                NodeSpec::tag("card").on(
                    "picked",
                    OnHandler {
                        handler: "onPick".into(),
                        args: None,
                    },
                ),
                NodeSpec::tag("card").on(
                    "picked",
                    OnHandler {
                        handler: "onPick".into(),
                        args: Some(vec!["label".into()]),
                    },
                ),
            ]));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        renderer.render(ComponentRef::descriptor(root));

        assert_eq!(
            *seen.borrow(),
            vec![vec![json!("event-arg")], vec![json!("from-parent")]]
        );
    }

    #[test]
    fn test_hook_handler_name_is_camel_cased() {
        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        let root = ComponentOptions::new()
            .name("app")
            .method("track", move |_, _| {
                *counter.borrow_mut() += 1;
                Value::Null
            })
            .template(Template::new(vec![NodeSpec::tag("card").on(
                "hook:compiled",
                OnHandler {
                    handler: "track".into(),
                    args: None,
                },
            )]));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(card()));
        let output = renderer.render(ComponentRef::descriptor(root));

        assert!(output.ready);
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_prop_bound_to_parent_method() {
        let child = card().prop_any("on-save").created(|vm| {
            let result = vm.call("onSave", &[json!(2)]);
            vm.set("saved", result.unwrap_or(Value::Null));
        });
        let root = ComponentOptions::new()
            .name("app")
            .data(json!({"base": 40}))
            .method("save", |vm, args| {
                let base = vm.get("base").and_then(Value::as_i64).unwrap_or(0);
                json!(base + args[0].as_i64().unwrap_or(0))
            })
            .template(Template::new(vec![NodeSpec::tag("card").bind("on-save", "save")]));
        let renderer = Renderer::default().component("card", ComponentRef::descriptor(child));
        let output = renderer.render(ComponentRef::descriptor(root));

        let vm = first_named(&output, "card");
        assert_eq!(vm.get("saved"), Some(&json!(42)));
        assert!(vm.get("onSave").is_none());
    }
}
