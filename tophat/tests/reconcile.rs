use facet_testhelpers::test;
use indextree::NodeId;
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;
use tophat::arena_dom::{self, Document};
use tophat::{DomRenderer, DomTarget, Head, HeadInput, SsrOptions, Value, render_ssr_head};

const SHELL: &str = "<!DOCTYPE html><html><head></head><body><main>app</main></body></html>";

fn shell() -> Document {
    arena_dom::parse(SHELL)
}

fn find(doc: &Document, parent: NodeId, tag: &str) -> Option<NodeId> {
    doc.children(&parent)
        .into_iter()
        .find(|node| doc.tag_name(node).as_deref() == Some(tag))
}

fn page_input() -> serde_json::Value {
    json!({
        "title": "Home",
        "htmlAttrs": { "lang": "en", "class": "dark" },
        "bodyAttrs": { "style": "color: red" },
        "meta": [{ "charset": "utf-8" }, { "name": "description", "content": "d" }],
        "link": { "rel": "stylesheet", "href": "/app.css" },
        "script": [
            { "innerHTML": "window.ready = true" },
            { "src": "/app.js", "tagPosition": "bodyClose" },
            { "src": "/early.js", "tagPosition": "bodyOpen" }
        ]
    })
}

#[test]
fn first_pass_creates_tags_in_resolved_order() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    head.push(json!({
        "title": "Home",
        "meta": [{ "name": "description", "content": "d" }, { "charset": "utf-8" }],
        "script": { "src": "/app.js", "tagPosition": "bodyClose" }
    }));

    let stats = renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(stats.tags, 4);
    assert_eq!(stats.created, 3);
    assert_eq!(stats.undone, 0);
    assert_eq!(
        doc.head_html(),
        r#"<meta charset="utf-8"><meta name="description" content="d"><title>Home</title>"#
    );
    assert!(
        doc.to_html()
            .contains(r#"<body><main>app</main><script src="/app.js"></script></body>"#)
    );
}

#[test]
fn unchanged_head_is_a_no_op() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    head.push(page_input());

    renderer.render(&mut doc, &mut head).unwrap();
    let before = doc.to_html();

    let again = renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.undone, 0);
    assert_eq!(doc.to_html(), before);
    assert_eq!(renderer.render_if_dirty(&mut doc, &mut head).unwrap(), None);
}

#[test]
fn render_if_dirty_picks_up_changes() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    let id = head.push(json!({ "title": "One" }));
    renderer.render(&mut doc, &mut head).unwrap();

    head.patch(id, json!({ "title": "Two" }));
    let stats = renderer.render_if_dirty(&mut doc, &mut head).unwrap();
    assert!(stats.is_some());
    assert_eq!(doc.title().as_deref(), Some("Two"));
    assert_eq!(renderer.rendered_revision(), Some(head.revision()));
}

#[test]
fn dispose_restores_the_original_document() {
    let mut doc = shell();
    let original = doc.to_html();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();

    let id = head.push(page_input());
    renderer.render(&mut doc, &mut head).unwrap();
    assert_ne!(doc.to_html(), original);

    head.dispose(id);
    let stats = renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(stats.tags, 0);
    assert_eq!(doc.to_html(), original);
}

#[test]
fn teardown_restores_the_original_document() {
    let mut doc = shell();
    let original = doc.to_html();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();

    head.push(page_input());
    renderer.render(&mut doc, &mut head).unwrap();
    renderer.teardown(&mut doc);
    assert_eq!(doc.to_html(), original);
    assert_eq!(renderer.rendered_revision(), None);
}

#[test]
fn disposing_one_contributor_keeps_the_other_class() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    let body = doc.body().unwrap();

    let a = head.push(json!({ "bodyAttrs": { "class": "from-a shared" } }));
    head.push(json!({ "bodyAttrs": { "class": "from-b" } }));
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.attribute(&body, "class").as_deref(), Some("from-a shared from-b"));

    head.dispose(a);
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.attribute(&body, "class").as_deref(), Some("from-b"));
}

#[test]
fn document_owned_class_tokens_survive() {
    let mut doc = arena_dom::parse(r#"<html><head></head><body class="js"></body></html>"#);
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    let body = doc.body().unwrap();

    let id = head.push(json!({ "bodyAttrs": { "class": "js extra" } }));
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.attribute(&body, "class").as_deref(), Some("js extra"));

    head.dispose(id);
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.attribute(&body, "class").as_deref(), Some("js"));
}

#[test]
fn title_is_restored_after_dispose() {
    let mut doc = arena_dom::parse("<html><head><title>Old</title></head><body></body></html>");
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();

    let id = head.push(json!({ "title": "New" }));
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.title().as_deref(), Some("New"));

    head.dispose(id);
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.title().as_deref(), Some("Old"));
}

#[test]
fn patch_updates_elements_in_place() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();

    let id = head.push(json!({
        "meta": { "name": "description", "content": "first" },
        "script": { "key": "app", "src": "/app.js", "async": true }
    }));
    renderer.render(&mut doc, &mut head).unwrap();
    let head_el = doc.head().unwrap();
    let meta = find(&doc, head_el, "meta").unwrap();
    let script = find(&doc, head_el, "script").unwrap();
    assert_eq!(doc.attribute(&script, "async").as_deref(), Some(""));

    head.patch(
        id,
        json!({
            "meta": { "name": "description", "content": "second" },
            "script": { "key": "app", "src": "/app.js" }
        }),
    );
    let stats = renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(find(&doc, head_el, "meta"), Some(meta));
    assert_eq!(doc.attribute(&meta, "content").as_deref(), Some("second"));
    assert_eq!(doc.attribute(&script, "async"), None);
}

#[test]
fn server_rendered_page_hydrates_without_new_elements() {
    let input = json!({
        "title": "Home",
        "htmlAttrs": { "lang": "en" },
        "meta": [{ "charset": "utf-8" }, { "name": "description", "content": "d" }],
        "link": { "rel": "stylesheet", "href": "/app.css" },
        "script": [
            { "innerHTML": "window.ready = true" },
            { "src": "/app.js", "tagPosition": "bodyClose" }
        ]
    });

    let mut server = Head::server();
    server.push(input.clone());
    let ssr = render_ssr_head(&mut server, &SsrOptions::new());
    let page = format!(
        "<!DOCTYPE html><html{}><head>{}</head><body{}>{}<main>app</main>{}</body></html>",
        ssr.html_attrs, ssr.head_tags, ssr.body_attrs, ssr.body_tags_open, ssr.body_tags
    );

    let mut doc = arena_dom::parse(&page);
    let before = doc.to_html();

    let mut client = Head::client();
    let id = client.push(input);
    let mut renderer = DomRenderer::new();
    let stats = renderer.render(&mut doc, &mut client).unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(doc.to_html(), before);

    // adopted elements are owned like created ones
    client.dispose(id);
    renderer.render(&mut doc, &mut client).unwrap();
    assert!(!doc.to_html().contains("data-hid"));
}

#[test]
fn handlers_bind_once_and_unbind_on_dispose() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();

    let id = head.push(HeadInput::new().with(
        "script",
        Value::object([
            ("src", Value::from("/a.js")),
            ("onload", Value::handler(move || counter.set(counter.get() + 1))),
        ]),
    ));
    renderer.render(&mut doc, &mut head).unwrap();
    let script = find(&doc, doc.head().unwrap(), "script").unwrap();
    assert_eq!(doc.listener_count(), 1);
    assert_eq!(doc.attribute(&script, "data-onload").as_deref(), Some(""));

    assert_eq!(doc.dispatch(script, "load"), 1);
    assert_eq!(hits.get(), 1);

    head.invalidate();
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.listener_count(), 1);

    head.dispose(id);
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.listener_count(), 0);
}

#[test]
fn events_fired_before_hydration_are_replayed() {
    let hits = Rc::new(Cell::new(0));
    let input = || {
        let counter = hits.clone();
        HeadInput::new().with(
            "script",
            Value::object([
                ("src", Value::from("/a.js")),
                ("onload", Value::handler(move || counter.set(counter.get() + 1))),
            ]),
        )
    };

    let mut server = Head::server();
    server.push(input());
    let ssr = render_ssr_head(&mut server, &SsrOptions::new());
    assert!(ssr.head_tags.contains(r#"onload="this.dataset.onloadfired = true""#));

    let mut doc = arena_dom::parse(&format!(
        "<html><head>{}</head><body></body></html>",
        ssr.head_tags
    ));
    let script = find(&doc, doc.head().unwrap(), "script").unwrap();
    // what the inline attribute does when the script loads before the client
    doc.set_attribute(&script, "data-onloadfired", "true");

    let mut client = Head::client();
    client.push(input());
    let mut renderer = DomRenderer::new();
    let stats = renderer.render(&mut doc, &mut client).unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(hits.get(), 1);
    assert_eq!(doc.attribute(&script, "data-onloadfired"), None);
    assert_eq!(doc.attribute(&script, "data-onload").as_deref(), Some(""));
}

#[test]
fn hydration_corrects_what_the_server_got_wrong() {
    let mut server = Head::server();
    server.push(json!({
        "style": { "key": "theme", "textContent": "body{color:red}" },
        "script": { "key": "app", "src": "/app.js", "async": true }
    }));
    let ssr = render_ssr_head(&mut server, &SsrOptions::new());
    let mut doc = arena_dom::parse(&format!(
        "<html><head>{}</head><body></body></html>",
        ssr.head_tags
    ));
    assert!(doc.head_html().contains("color:red"));

    let mut client = Head::client();
    client.push(json!({
        "style": { "key": "theme", "textContent": "body{color:blue}" },
        "script": { "key": "app", "src": "/app.js" }
    }));
    let mut renderer = DomRenderer::new();
    let stats = renderer.render(&mut doc, &mut client).unwrap();
    assert_eq!(stats.created, 0);

    let html = doc.head_html();
    assert!(html.contains("body{color:blue}"), "{html}");
    assert!(!html.contains("color:red"), "{html}");
    assert!(!html.contains("async"), "{html}");
    assert_eq!(html.matches("data-hid").count(), 2);
}

#[test]
fn patch_dropping_content_empties_the_element() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();

    let id = head.push(json!({ "style": { "key": "theme", "textContent": "a{}" } }));
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.head_html(), "<style>a{}</style>");

    head.patch(id, json!({ "style": { "key": "theme", "media": "print" } }));
    renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(doc.head_html(), r#"<style media="print"></style>"#);
}

#[test]
fn replacing_a_handler_rebinds_the_listener() {
    let mut doc = shell();
    let mut head = Head::client();
    let mut renderer = DomRenderer::new();
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));
    let input = |hits: &Rc<Cell<u32>>| {
        let counter = hits.clone();
        HeadInput::new().with(
            "script",
            Value::object([
                ("src", Value::from("/a.js")),
                ("onload", Value::handler(move || counter.set(counter.get() + 1))),
            ]),
        )
    };

    let id = head.push(input(&first));
    renderer.render(&mut doc, &mut head).unwrap();
    head.patch(id, input(&second));
    let stats = renderer.render(&mut doc, &mut head).unwrap();
    assert_eq!(stats.created, 0);

    let script = find(&doc, doc.head().unwrap(), "script").unwrap();
    assert_eq!(doc.listener_count(), 1);
    assert_eq!(doc.dispatch(script, "load"), 1);
    assert_eq!((first.get(), second.get()), (0, 1));
    assert_eq!(doc.attribute(&script, "data-onload").as_deref(), Some(""));
}
