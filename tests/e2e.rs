//! End-to-end scenarios: template → compiler → reactivity → renderer →
//! in-memory host tree.

use std::cell::Cell;
use std::rc::Rc;

use cinder::{
    create_app, flush_jobs, on_mounted, on_updated, reset_reactivity, reset_scheduler,
    watch_effect, Children, ComponentDef, Computed, HostBackend, HostId, NativeFn, PatchFlags,
    PendingSetup, PropOptions, PropType, Renderer, SetupResult, Signal, Store, TestHost, Value,
    VNode, WatchOptions,
};

fn reset() {
    reset_reactivity();
    reset_scheduler();
}

fn new_app_host() -> (TestHost, HostId) {
    let mut host = TestHost::new();
    let container = host.create_element("div", false, false);
    (host, container)
}

fn find_tag(renderer: &Rc<Renderer<TestHost>>, root: HostId, tag: &str) -> Option<HostId> {
    renderer.with_host(|h| find_tag_in(h, root, tag))
}

fn find_tag_in(host: &TestHost, node: HostId, tag: &str) -> Option<HostId> {
    if host.tag(node) == Some(tag) {
        return Some(node);
    }
    for child in host.children_of(node).to_vec() {
        if let Some(found) = find_tag_in(host, child, tag) {
            return Some(found);
        }
    }
    None
}

// =============================================================================
// Counter with computed
// =============================================================================

#[test]
fn test_counter_with_computed() {
    reset();
    let renders = Rc::new(Cell::new(0));
    let getter_calls = Rc::new(Cell::new(0));

    let def = {
        let renders = renders.clone();
        let getter_calls = getter_calls.clone();
        ComponentDef::named("Counter")
            .with_template(r#"<p>{{ plusOne }}</p><button @click="count++">+</button>"#)
            .with_setup(move |_| {
                let count = Signal::new(Value::from(0));
                let c = count.clone();
                let g = getter_calls.clone();
                let plus_one = Computed::new(move || {
                    g.set(g.get() + 1);
                    Value::Number(c.get().as_number().unwrap_or(0.0) + 1.0)
                });

                let r1 = renders.clone();
                on_mounted(move || r1.set(r1.get() + 1));
                let r2 = renders.clone();
                on_updated(move || r2.set(r2.get() + 1));

                let state = Store::new();
                state.set("count", Value::Signal(count));
                state.set("plusOne", Value::Computed(plus_one));
                SetupResult::Bindings(state)
            })
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    let renderer = app.renderer();

    let p = find_tag(&renderer, container, "p").expect("p mounted");
    let button = find_tag(&renderer, container, "button").expect("button mounted");
    assert_eq!(renderer.with_host(|h| h.text_content(p)), "1");

    renderer.with_host(|h| h.dispatch(button, "onClick", &[]));
    flush_jobs();
    assert_eq!(renderer.with_host(|h| h.text_content(p)), "2");

    renderer.with_host(|h| h.dispatch(button, "onClick", &[]));
    flush_jobs();
    assert_eq!(renderer.with_host(|h| h.text_content(p)), "3");

    assert_eq!(renders.get(), 3, "mount + two updates");
    assert_eq!(getter_calls.get(), 3, "computed recomputes once per render");
}

// =============================================================================
// Keyed list shuffle
// =============================================================================

fn keyed_list(keys: &[&str]) -> VNode {
    let children: Vec<VNode> = keys
        .iter()
        .map(|k| {
            VNode::element("li", None, Children::None).with_key(Value::from(*k))
        })
        .collect();
    let fragment = VNode::fragment(children);
    fragment.borrow_mut().patch_flag = PatchFlags::KEYED_FRAGMENT;
    fragment
}

#[test]
fn test_keyed_swap_is_one_move() {
    reset();
    let renderer = Renderer::new(TestHost::new());
    let container = renderer.with_host(|h| h.create_element("div", false, false));

    renderer.render(Some(keyed_list(&["a", "b", "c", "d"])), container);
    let before = renderer.with_host(|h| h.ops);

    renderer.render(Some(keyed_list(&["b", "a", "c", "d"])), container);
    let after = renderer.with_host(|h| h.ops);

    assert_eq!(after.creates - before.creates, 0, "zero creates");
    assert_eq!(after.removes - before.removes, 0, "zero destroys");
    assert_eq!(after.moves - before.moves, 1, "exactly one move");
    assert_eq!(after.prop_patches - before.prop_patches, 0, "zero prop patches");
}

#[test]
fn test_keyed_middle_reorder() {
    // [A,B,C,D,E] → [A,C,D,B,E]: one move, no mounts, no unmounts.
    reset();
    let renderer = Renderer::new(TestHost::new());
    let container = renderer.with_host(|h| h.create_element("div", false, false));

    renderer.render(Some(keyed_list(&["a", "b", "c", "d", "e"])), container);
    let before = renderer.with_host(|h| h.ops);

    renderer.render(Some(keyed_list(&["a", "c", "d", "b", "e"])), container);
    let after = renderer.with_host(|h| h.ops);

    assert_eq!(after.creates - before.creates, 0);
    assert_eq!(after.removes - before.removes, 0);
    assert_eq!(after.moves - before.moves, 1, "only B moves");
}

#[test]
fn test_keyed_mount_unmount_counts_match_key_sets() {
    reset();
    let renderer = Renderer::new(TestHost::new());
    let container = renderer.with_host(|h| h.create_element("div", false, false));

    renderer.render(Some(keyed_list(&["a", "b", "c"])), container);
    let before = renderer.with_host(|h| h.ops);

    renderer.render(Some(keyed_list(&["b", "d"])), container);
    let after = renderer.with_host(|h| h.ops);

    assert_eq!(after.creates - before.creates, 1, "d mounts");
    assert_eq!(after.removes - before.removes, 2, "a and c unmount");
}

// =============================================================================
// Async setup under suspense
// =============================================================================

#[test]
fn test_async_setup_under_suspense() {
    reset();
    let resolved_count = Rc::new(Cell::new(0));
    let pending = PendingSetup::new();

    let async_def = {
        let pending = pending.clone();
        ComponentDef::named("AsyncChild")
            .with_template("<p>ready</p>")
            .with_setup(move |_| SetupResult::Pending(pending.clone()))
            .build()
    };

    let def = {
        let resolved_count = resolved_count.clone();
        ComponentDef::named("Page")
            .with_template(
                r#"<suspense @resolve="onSuspenseResolve"><template #default><AsyncChild/></template><template #fallback>loading</template></suspense>"#,
            )
            .with_setup(move |_| {
                let state = Store::new();
                let r = resolved_count.clone();
                state.set(
                    "onSuspenseResolve",
                    Value::Function(NativeFn::handler(move |_| r.set(r.get() + 1))),
                );
                SetupResult::Bindings(state)
            })
            .register_component("AsyncChild", async_def)
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    let renderer = app.renderer();

    // Immediately after mount: fallback visible.
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "loading");
    assert_eq!(resolved_count.get(), 0);

    // Async setup resolves.
    pending.resolve(SetupResult::Bindings(Store::new()));
    flush_jobs();

    assert_eq!(renderer.with_host(|h| h.text_content(container)), "ready");
    assert_eq!(resolved_count.get(), 1, "resolve fires exactly once");
}

// =============================================================================
// Watcher invalidation
// =============================================================================

#[test]
fn test_watch_effect_invalidation() {
    reset();
    let id = Signal::new(Value::from(1));
    let starts = Rc::new(Cell::new(0));
    let cancels = Rc::new(Cell::new(0));

    let (id2, starts2, cancels2) = (id.clone(), starts.clone(), cancels.clone());
    let _handle = watch_effect(
        move |on_invalidate| {
            id2.get();
            starts2.set(starts2.get() + 1);
            let c = cancels2.clone();
            on_invalidate.register(move || c.set(c.get() + 1));
        },
        WatchOptions::default(),
    );
    assert_eq!(starts.get(), 1);

    // Three writes in one tick: one batched restart, one cancel of the
    // previous token.
    id.set(Value::from(2));
    id.set(Value::from(3));
    id.set(Value::from(4));
    flush_jobs();

    assert_eq!(starts.get(), 2);
    assert_eq!(cancels.get(), 1);
}

// =============================================================================
// Nested provide/inject override
// =============================================================================

#[test]
fn test_nested_provide_inject() {
    reset();
    let leaf = ComponentDef::named("Leaf")
        .with_template("<p>{{ foo }}-{{ bar }}</p>")
        .with_setup(|_| {
            let state = Store::new();
            state.set("foo", cinder::inject("foo", None));
            state.set("bar", cinder::inject("bar", None));
            SetupResult::Bindings(state)
        })
        .build();

    let mid = ComponentDef::named("Mid")
        .with_template("<Leaf/>")
        .with_setup(|_| {
            cinder::provide("foo", Value::from("a2"));
            SetupResult::Bindings(Store::new())
        })
        .register_component("Leaf", leaf)
        .build();

    let root = ComponentDef::named("Root")
        .with_template("<Mid/>")
        .with_setup(|_| {
            cinder::provide("foo", Value::from("a"));
            cinder::provide("bar", Value::from("b"));
            SetupResult::Bindings(Store::new())
        })
        .register_component("Mid", mid)
        .build();

    let (host, container) = new_app_host();
    let app = create_app(root, host);
    let _ = app.mount(container);

    // Nearest provider wins for foo; bar falls through to the root.
    assert_eq!(
        app.renderer().with_host(|h| h.text_content(container)),
        "a2-b"
    );
}

// =============================================================================
// Props casting
// =============================================================================

#[test]
fn test_props_casting_through_template() {
    reset();
    let child = ComponentDef::named("Child")
        .with_template("<p>{{ flag }}:{{ name }}</p>")
        .with_props(vec![
            PropOptions::typed("flag", &[PropType::Bool]),
            PropOptions::typed("name", &[PropType::Bool, PropType::Str]),
        ])
        .build();

    let parent = ComponentDef::named("Parent")
        .with_template(r#"<Child :flag="nothing" name=""/>"#)
        .with_setup(|_| SetupResult::Bindings(Store::new()))
        .register_component("Child", child)
        .build();

    let (host, container) = new_app_host();
    let app = create_app(parent, host);
    let _ = app.mount(container);

    assert_eq!(
        app.renderer().with_host(|h| h.text_content(container)),
        "false:true"
    );
}

// =============================================================================
// Mount → unmount round trip
// =============================================================================

#[test]
fn test_mount_unmount_restores_container() {
    reset();
    let def = ComponentDef::named("X")
        .with_template("<div><p>hello</p></div>")
        .build();

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    assert_eq!(app.renderer().with_host(|h| h.text_content(container)), "hello");

    app.unmount();
    flush_jobs();
    assert_eq!(app.renderer().with_host(|h| h.text_content(container)), "");
    assert!(app.renderer().with_host(|h| h.children_of(container).is_empty()));
}

// =============================================================================
// v-once caching
// =============================================================================

#[test]
fn test_v_once_keeps_host_node_identity() {
    reset();
    let x = Signal::new(Value::from("first"));
    let def = {
        let x = x.clone();
        ComponentDef::named("OnceHost")
            .with_template(r#"<div><p v-once>{{ x }}</p><span>{{ x }}</span></div>"#)
            .with_setup(move |_| {
                let state = Store::new();
                state.set("x", Value::Signal(x.clone()));
                SetupResult::Bindings(state)
            })
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    let renderer = app.renderer();

    let p_before = find_tag(&renderer, container, "p").expect("p mounted");
    assert_eq!(renderer.with_host(|h| h.text_content(p_before)), "first");

    x.set(Value::from("second"));
    flush_jobs();

    let p_after = find_tag(&renderer, container, "p").expect("p still mounted");
    let span = find_tag(&renderer, container, "span").expect("span mounted");
    assert_eq!(p_after, p_before, "v-once subtree keeps its host node");
    assert_eq!(renderer.with_host(|h| h.text_content(p_after)), "first");
    assert_eq!(renderer.with_host(|h| h.text_content(span)), "second");
}

// =============================================================================
// Conditional rendering end to end
// =============================================================================

#[test]
fn test_v_if_toggle() {
    reset();
    let show = Signal::new(Value::Bool(true));
    let def = {
        let show = show.clone();
        ComponentDef::named("Toggle")
            .with_template(r#"<div><p v-if="show">yes</p><span v-else>no</span></div>"#)
            .with_setup(move |_| {
                let state = Store::new();
                state.set("show", Value::Signal(show.clone()));
                SetupResult::Bindings(state)
            })
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    let renderer = app.renderer();
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "yes");

    show.set(Value::Bool(false));
    flush_jobs();
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "no");
    assert!(find_tag(&renderer, container, "p").is_none(), "v-if branch unmounted");

    show.set(Value::Bool(true));
    flush_jobs();
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "yes");
}

// =============================================================================
// List rendering end to end
// =============================================================================

#[test]
fn test_v_for_reorder_via_template() {
    reset();
    let items = cinder::ListStore::from_values([
        Value::from("a"),
        Value::from("b"),
        Value::from("c"),
    ]);
    let def = {
        let items = items.clone();
        ComponentDef::named("List")
            .with_template(r#"<ul><li v-for="item in items" :key="item">{{ item }}</li></ul>"#)
            .with_setup(move |_| {
                let state = Store::new();
                state.set("items", Value::List(items.clone()));
                SetupResult::Bindings(state)
            })
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(def, host);
    let _ = app.mount(container);
    let renderer = app.renderer();
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "abc");

    let before = renderer.with_host(|h| h.ops);
    // Swap the first two entries.
    items.set(0, Value::from("b"));
    items.set(1, Value::from("a"));
    flush_jobs();
    let after = renderer.with_host(|h| h.ops);

    assert_eq!(renderer.with_host(|h| h.text_content(container)), "bac");
    assert_eq!(after.removes - before.removes, 0, "keyed reorder destroys nothing");
}

// =============================================================================
// Slots end to end
// =============================================================================

#[test]
fn test_named_and_scoped_slots() {
    reset();
    let card = ComponentDef::named("Card")
        .with_template(r#"<div><header><slot name="title">untitled</slot></header><main><slot :count="n"/></main></div>"#)
        .with_setup(|_| {
            let state = Store::new();
            state.set("n", Value::from(7));
            SetupResult::Bindings(state)
        })
        .build();

    let page = ComponentDef::named("Page")
        .with_template(
            r#"<Card><template #title>Hello</template><template #default="slotProps">count={{ slotProps.count }}</template></Card>"#,
        )
        .with_setup(|_| SetupResult::Bindings(Store::new()))
        .register_component("Card", card)
        .build();

    let (host, container) = new_app_host();
    let app = create_app(page, host);
    let _ = app.mount(container);

    let text = app.renderer().with_host(|h| h.text_content(container));
    assert_eq!(text, "Hellocount=7");
}

#[test]
fn test_slot_fallback_used_when_absent() {
    reset();
    let card = ComponentDef::named("Card")
        .with_template(r#"<div><slot name="title">untitled</slot></div>"#)
        .build();
    let page = ComponentDef::named("Page")
        .with_template("<Card/>")
        .register_component("Card", card)
        .build();

    let (host, container) = new_app_host();
    let app = create_app(page, host);
    let _ = app.mount(container);
    assert_eq!(app.renderer().with_host(|h| h.text_content(container)), "untitled");
}

// =============================================================================
// Parent-initiated child updates
// =============================================================================

#[test]
fn test_child_rerenders_once_per_tick_on_prop_change() {
    reset();
    let child_renders = Rc::new(Cell::new(0));
    let label = Signal::new(Value::from("one"));

    let child = {
        let child_renders = child_renders.clone();
        ComponentDef::named("Child")
            .with_template("<p>{{ label }}</p>")
            .with_props(vec![PropOptions::new("label")])
            .with_setup(move |_| {
                let r1 = child_renders.clone();
                on_mounted(move || r1.set(r1.get() + 1));
                let r2 = child_renders.clone();
                on_updated(move || r2.set(r2.get() + 1));
                SetupResult::Bindings(Store::new())
            })
            .build()
    };

    let parent = {
        let label = label.clone();
        ComponentDef::named("Parent")
            .with_template(r#"<Child :label="label"/>"#)
            .with_setup(move |_| {
                let state = Store::new();
                state.set("label", Value::Signal(label.clone()));
                SetupResult::Bindings(state)
            })
            .register_component("Child", child)
            .build()
    };

    let (host, container) = new_app_host();
    let app = create_app(parent, host);
    let _ = app.mount(container);
    let renderer = app.renderer();
    assert_eq!(renderer.with_host(|h| h.text_content(container)), "one");
    assert_eq!(child_renders.get(), 1);

    // Multiple writes in one tick: parent renders once, child once.
    label.set(Value::from("two"));
    label.set(Value::from("three"));
    flush_jobs();

    assert_eq!(renderer.with_host(|h| h.text_content(container)), "three");
    assert_eq!(child_renders.get(), 2, "no double render of the child");
}
