//! Browser binding for tophat.
//!
//! [`WebDom`] implements [`DomTarget`] over `web-sys`, and [`ClientHead`]
//! owns a [`Head`] plus the renderer for the page's document. Every mutation
//! schedules a render on the microtask queue; a burst of synchronous
//! `push`/`patch`/`dispose` calls collapses into one pass.
//!
//! ```no_run
//! use serde_json::json;
//! use tophat_wasm::{ClientHead, WebDom};
//!
//! let dom = WebDom::from_window().expect("running in a browser");
//! let head = ClientHead::new(dom);
//! let entry = head.push(json!({ "title": "Inbox (3)" }));
//! // later, when the view goes away
//! head.dispose(entry);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::Function;
use tophat::{
    DomRenderer, DomTarget, EntryId, EntryOptions, Handler, Head, HeadError, HeadInput,
    RenderStats,
};
use tracing::{debug, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, Node};

/// Route `tracing` output (tophat's included) to the browser console.
#[wasm_bindgen]
pub fn init_tracing() {
    if let Err(e) = wasm_tracing::set_as_global_default() {
        // no subscriber to report through, so straight to the console
        web_sys::console::warn_1(&format!("tophat: tracing not installed: {e}").into());
    }
}

/// Log a failed DOM call. They only fail on invalid names, which the
/// reconciler never produces.
fn check<T>(result: Result<T, JsValue>, op: &str) {
    if let Err(e) = result {
        warn!(op, error = ?e, "DOM operation failed");
    }
}

/// A browser document as a reconciliation target.
pub struct WebDom {
    document: Document,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    /// The current window's document.
    pub fn from_window() -> Option<Self> {
        let document = web_sys::window()?.document()?;
        Some(Self::new(document))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn title_element(&self) -> Option<Element> {
        let head = self.document.head()?;
        head.query_selector("title").ok().flatten()
    }
}

impl DomTarget for WebDom {
    type Node = Node;
    type Listener = Closure<dyn FnMut()>;

    fn html_element(&self) -> Option<Node> {
        self.document.document_element().map(Node::from)
    }

    fn head_element(&self) -> Option<Node> {
        self.document.head().map(Node::from)
    }

    fn body_element(&self) -> Option<Node> {
        self.document.body().map(Node::from)
    }

    fn children(&self, parent: &Node) -> Vec<Node> {
        let list = parent.child_nodes();
        (0..list.length()).filter_map(|i| list.item(i)).collect()
    }

    fn tag_name(&self, node: &Node) -> Option<String> {
        node.dyn_ref::<Element>()
            .map(|el| el.tag_name().to_ascii_lowercase())
    }

    fn create_element(&mut self, tag: &str) -> Node {
        match self.document.create_element(tag) {
            Ok(el) => el.into(),
            Err(e) => {
                // an inert placeholder keeps the pass going
                warn!(tag, error = ?e, "could not create element");
                self.document.create_text_node("").into()
            }
        }
    }

    fn attribute(&self, node: &Node, name: &str) -> Option<String> {
        node.dyn_ref::<Element>()?.get_attribute(name)
    }

    fn attribute_names(&self, node: &Node) -> Vec<String> {
        node.dyn_ref::<Element>()
            .map(|el| {
                el.get_attribute_names()
                    .iter()
                    .filter_map(|name| name.as_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_attribute(&mut self, node: &Node, name: &str, value: &str) {
        if let Some(el) = node.dyn_ref::<Element>() {
            check(el.set_attribute(name, value), "setAttribute");
        }
    }

    fn remove_attribute(&mut self, node: &Node, name: &str) {
        if let Some(el) = node.dyn_ref::<Element>() {
            check(el.remove_attribute(name), "removeAttribute");
        }
    }

    fn set_text_content(&mut self, node: &Node, text: &str) {
        node.set_text_content(Some(text));
    }

    fn set_inner_html(&mut self, node: &Node, html: &str) {
        if let Some(el) = node.dyn_ref::<Element>() {
            el.set_inner_html(html);
        }
    }

    fn text(&self, node: &Node) -> String {
        node.text_content().unwrap_or_default()
    }

    fn title(&self) -> Option<String> {
        self.title_element().map(|_| self.document.title())
    }

    fn set_title(&mut self, title: Option<&str>) {
        match title {
            Some(text) => self.document.set_title(text),
            None => {
                if let Some(el) = self.title_element() {
                    el.remove();
                }
            }
        }
    }

    fn append_child(&mut self, parent: &Node, child: &Node) {
        check(parent.append_child(child), "appendChild");
    }

    fn prepend_child(&mut self, parent: &Node, child: &Node) {
        let first = parent.first_child();
        check(parent.insert_before(child, first.as_ref()), "insertBefore");
    }

    fn remove(&mut self, node: &Node) {
        if let Some(parent) = node.parent_node() {
            check(parent.remove_child(node), "removeChild");
        }
    }

    fn add_listener(&mut self, node: &Node, event: &str, handler: Handler) -> Self::Listener {
        let closure = Closure::<dyn FnMut()>::new(move || handler.call());
        check(
            node.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref()),
            "addEventListener",
        );
        closure
    }

    fn remove_listener(&mut self, node: &Node, event: &str, listener: Self::Listener) {
        let callback: &Function = listener.as_ref().unchecked_ref();
        check(
            node.remove_event_listener_with_callback(event, callback),
            "removeEventListener",
        );
    }
}

struct Target {
    dom: WebDom,
    renderer: DomRenderer<WebDom>,
}

/// Collapses bursts of mutations into one render pass and keeps passes
/// from nesting.
#[derive(Default)]
struct Coalescer {
    /// A render pass is running.
    busy: Cell<bool>,
    /// A flush is queued on the microtask queue.
    scheduled: Cell<bool>,
}

impl Coalescer {
    /// Record a mutation. True when no flush is queued yet and the caller
    /// must queue one.
    fn request(&self) -> bool {
        !self.scheduled.replace(true)
    }

    /// Start a pass. `None` while another pass is running: that pass reads
    /// the live entries, so it covers this request.
    fn begin(&self) -> Option<PassGuard<'_>> {
        self.scheduled.set(false);
        if self.busy.replace(true) {
            return None;
        }
        Some(PassGuard(&self.busy))
    }
}

/// Clears the busy flag when the pass ends, panics included.
struct PassGuard<'a>(&'a Cell<bool>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct Inner {
    head: RefCell<Head>,
    target: RefCell<Target>,
    flushes: Coalescer,
}

/// A client-side head bound to one document, re-rendered automatically.
///
/// Cheap to clone; clones share the same head. Thunks and handlers run
/// during a pass, while the head is borrowed: they must not call back into
/// this head synchronously.
#[derive(Clone)]
pub struct ClientHead {
    inner: Rc<Inner>,
}

impl ClientHead {
    pub fn new(dom: WebDom) -> Self {
        Self::with_head(Head::client(), dom)
    }

    /// Wrap an existing head, e.g. one built from server-side options.
    pub fn with_head(head: Head, dom: WebDom) -> Self {
        Self {
            inner: Rc::new(Inner {
                head: RefCell::new(head),
                target: RefCell::new(Target {
                    dom,
                    renderer: DomRenderer::new(),
                }),
                flushes: Coalescer::default(),
            }),
        }
    }

    pub fn push(&self, input: impl Into<HeadInput>) -> EntryId {
        self.mutate(|head| head.push(input))
    }

    pub fn push_with(&self, input: impl Into<HeadInput>, options: EntryOptions) -> EntryId {
        self.mutate(|head| head.push_with(input, options))
    }

    pub fn patch(&self, id: EntryId, input: impl Into<HeadInput>) -> bool {
        self.mutate(|head| head.patch(id, input))
    }

    pub fn dispose(&self, id: EntryId) -> bool {
        self.mutate(|head| head.dispose(id))
    }

    /// Re-run every thunk on the next pass.
    pub fn invalidate(&self) {
        self.mutate(Head::invalidate)
    }

    /// Render right away instead of waiting for the scheduled pass. Returns
    /// `None` when nothing changed or a pass is already running.
    pub fn flush(&self) -> Result<Option<RenderStats>, HeadError> {
        let inner = &self.inner;
        let Some(_pass) = inner.flushes.begin() else {
            return Ok(None);
        };

        let result = {
            let mut target = inner.target.borrow_mut();
            let Target { dom, renderer } = &mut *target;
            renderer.render_if_dirty(dom, &mut inner.head.borrow_mut())
        };

        if let Ok(Some(stats)) = &result {
            debug!(
                tags = stats.tags,
                created = stats.created,
                undone = stats.undone,
                "head rendered"
            );
        }
        result
    }

    /// Undo everything rendered so far. The head keeps its entries.
    pub fn teardown(&self) {
        let mut target = self.inner.target.borrow_mut();
        let Target { dom, renderer } = &mut *target;
        renderer.teardown(dom);
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Head) -> T) -> T {
        let out = f(&mut self.inner.head.borrow_mut());
        self.schedule();
        out
    }

    fn schedule(&self) {
        if !self.inner.flushes.request() {
            return;
        }
        let this = self.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(e) = this.flush() {
                warn!(error = %e, "head render failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_burst_of_mutations_queues_one_flush() {
        let flushes = Coalescer::default();
        assert!(flushes.request());
        assert!(!flushes.request());
        assert!(!flushes.request());

        let pass = flushes.begin();
        assert!(pass.is_some());
        // a mutation during the pass queues the next flush
        assert!(flushes.request());
        drop(pass);
        assert!(!flushes.request());
    }

    #[test]
    fn test_passes_do_not_nest() {
        let flushes = Coalescer::default();
        let outer = flushes.begin();
        assert!(outer.is_some());
        assert!(flushes.begin().is_none());
        drop(outer);
        assert!(flushes.begin().is_some());
    }

    #[test]
    fn test_busy_flag_clears_when_a_pass_panics() {
        let flushes = Coalescer::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _pass = flushes.begin();
            panic!("render failed");
        }));
        assert!(result.is_err());
        assert!(flushes.begin().is_some());
    }
}
