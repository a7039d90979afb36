//! Builds a small page and prints the resulting tree and diagnostics.
//!
//! Run with `RUST_LOG=debug` to see every degraded step.

use serde_json::{json, Value};
use vm_tree::{
    init_tracing, ComponentOptions, ComponentRef, Directive, FilterCall, Level, NodeSpec, PropSpec,
    PropType, RenderConfig, Renderer, Template,
};

fn post_card() -> ComponentOptions {
    ComponentOptions::new()
        .prop("post", PropSpec::typed(PropType::Object).required())
        .prop("highlight", PropSpec::typed(PropType::Boolean).default_value(json!(false)))
        .computed("heading", |vm| {
            let title = vm
                .get("post.title")
                .and_then(Value::as_str)
                .unwrap_or("untitled");
            Ok(json!(title.to_uppercase()))
        })
        .template(Template::new(vec![NodeSpec::tag("article")
            .child(NodeSpec::tag("h2").child(NodeSpec::text("{{ heading }}")))
            .child(NodeSpec::tag("em").when("highlight"))
            .child(NodeSpec::tag("partial").attr("name", "byline"))]))
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = RenderConfig::from_json(r#"{"replace": true}"#)?;
    let renderer = Renderer::new(config)
        .component("post-card", ComponentRef::descriptor(post_card()))
        .component(
            "side-bar",
            ComponentRef::lazy(|resolver| {
                resolver.resolve(ComponentRef::descriptor(
                    ComponentOptions::new().template(Template::new(vec![NodeSpec::tag("aside")])),
                ))
            }),
        )
        .partial(
            "byline",
            Template::new(vec![NodeSpec::tag("small").child(NodeSpec::text("{{ post.author }}"))]),
        )
        .filter("first", |value, args| {
            let count = args.first().and_then(Value::as_u64).unwrap_or(1) as usize;
            match value {
                Value::Array(items) => Ok(Value::Array(items.into_iter().take(count).collect())),
                other => anyhow::bail!("cannot take items from {}", other),
            }
        });

    let page = ComponentOptions::new()
        .name("page")
        .data(json!({
            "posts": [
                {"title": "Hello", "author": "ann", "pinned": true},
                {"title": "Second", "author": "bob", "pinned": false},
                {"title": "Third", "author": "cyd", "pinned": false}
            ],
            "nav": {"home": "/", "about": "/about"}
        }))
        .template(Template::new(vec![
            NodeSpec::tag("nav").child(
                NodeSpec::tag("a")
                    .for_each(Directive::new("nav"))
                    .attr("href", "{{ $value }}"),
            ),
            NodeSpec::tag("main").child(
                NodeSpec::tag("post-card")
                    .for_each(
                        Directive::new("posts")
                            .alias("post")
                            .filter(FilterCall::with_args("first", &["2"])),
                    )
                    .bind("post", "post")
                    .bind("highlight", "post.pinned")
                    .reference("cards"),
            ),
            NodeSpec::tag("side-bar"),
        ]));

    let output = renderer.render(ComponentRef::descriptor(page));

    println!("{}", output.tree_json()?);
    println!(
        "ready: {} (signals {}, rebuilds {}, instances {})",
        output.ready,
        output.ready_signals,
        output.rebuilds,
        output.instances.len()
    );
    for diagnostic in output.diagnostics.iter().filter(|d| d.level >= Level::Warn) {
        println!("[{}] {} ({})", diagnostic.code, diagnostic.issue, diagnostic.context);
    }
    Ok(())
}
