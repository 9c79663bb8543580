//! In-memory document, usable as a reconciliation target without a browser.
//!
//! - **Parsing** goes through html5ever, so a server-rendered page is loaded
//!   the way a browser would see it before hydration
//! - **Nodes** are `indextree` ids; detached nodes stay in the arena, which
//!   keeps the reconciler's undo handles valid
//! - **Listeners** live in a side table and run through [`Document::dispatch`]

use html5ever::tree_builder::{ElemName, ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute, LocalName, QualName, namespace_url, ns, parse_document};
use indexmap::IndexMap;
use indextree::{Arena, NodeId};
use std::borrow::Cow;
use std::cell::RefCell;
use tendril::{StrTendril, TendrilSink};

use crate::dom::DomTarget;
use crate::value::Handler;

/// An arena document plus the listeners bound to its nodes.
#[derive(Debug, Clone)]
pub struct Document {
    pub arena: Arena<NodeKind>,
    /// The `<html>` element, or the document node for fragments.
    pub root: NodeId,
    /// Doctype name, usually `html`.
    pub doctype: Option<StrTendril>,
    /// Indexed by listener id; unbound slots are `None` until reused.
    listeners: Vec<Option<Binding>>,
}

#[derive(Debug, Clone)]
struct Binding {
    node: NodeId,
    event: String,
    handler: Handler,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Invisible parent of `<html>`.
    Document,
    Element(ElementData),
    Text(StrTendril),
    Comment(StrTendril),
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: QualName,
    /// String keys, in source order.
    pub attrs: IndexMap<String, StrTendril>,
}

impl ElementData {
    fn html(tag: &str) -> Self {
        Self {
            name: QualName::new(None, ns!(html), LocalName::from(tag)),
            attrs: IndexMap::new(),
        }
    }

    /// Local name, lowercase for HTML elements.
    pub fn tag(&self) -> &str {
        &self.name.local
    }
}

impl Document {
    pub fn node(&self, id: NodeId) -> &NodeKind {
        self.arena[id].get()
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.node(id) {
            NodeKind::Element(elem) => Some(elem),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.arena[id].get_mut() {
            NodeKind::Element(elem) => Some(elem),
            _ => None,
        }
    }

    /// First child element of `parent` named `tag`.
    fn find_child(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
        parent
            .children(&self.arena)
            .find(|&id| self.element(id).is_some_and(|e| e.tag() == tag))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.find_child(self.root, "head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.find_child(self.root, "body")
    }

    /// The whole document as HTML, doctype included.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if let Some(doctype) = &self.doctype {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push('>');
        }
        self.write_node(&mut out, self.root, false);
        out
    }

    /// The children of `id` as HTML.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_children(&mut out, id);
        out
    }

    pub fn head_html(&self) -> String {
        self.head().map(|id| self.inner_html(id)).unwrap_or_default()
    }

    /// Text of every descendant text node, in document order.
    pub fn text_content(&self, id: NodeId) -> String {
        id.descendants(&self.arena)
            .filter_map(|d| match self.node(d) {
                NodeKind::Text(text) => Some(&**text),
                _ => None,
            })
            .collect()
    }

    /// Fire `event` at `node`, synchronously. Returns how many listeners ran.
    pub fn dispatch(&self, node: NodeId, event: &str) -> usize {
        let matching: Vec<&Handler> = self
            .listeners
            .iter()
            .flatten()
            .filter(|b| b.node == node && b.event == event)
            .map(|b| &b.handler)
            .collect();
        for handler in &matching {
            handler.call();
        }
        matching.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.iter().flatten().count()
    }

    fn set_text(&mut self, id: NodeId, text: &str) {
        let old: Vec<NodeId> = id.children(&self.arena).collect();
        for child in old {
            child.detach(&mut self.arena);
        }
        if !text.is_empty() {
            let node = self.arena.new_node(NodeKind::Text(StrTendril::from(text)));
            id.append(node, &mut self.arena);
        }
    }

    fn write_node(&self, out: &mut String, id: NodeId, raw: bool) {
        match self.node(id) {
            NodeKind::Document => self.write_children(out, id),
            NodeKind::Element(elem) => {
                let tag = elem.tag();
                out.push('<');
                out.push_str(tag);
                for (name, value) in &elem.attrs {
                    out.push(' ');
                    out.push_str(name);
                    // empty values are boolean attributes
                    if !value.is_empty() {
                        out.push_str("=\"");
                        escape_attr(out, value);
                        out.push('"');
                    }
                }
                out.push('>');
                if !is_void_element(tag) {
                    self.write_children(out, id);
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
            NodeKind::Text(text) if raw => out.push_str(text),
            NodeKind::Text(text) => escape_text(out, text),
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
        }
    }

    fn write_children(&self, out: &mut String, id: NodeId) {
        let raw = self
            .element(id)
            .is_some_and(|e| is_raw_text_element(e.tag()));
        for child in id.children(&self.arena) {
            self.write_node(out, child, raw);
        }
    }
}

impl DomTarget for Document {
    type Node = NodeId;
    type Listener = usize;

    fn html_element(&self) -> Option<NodeId> {
        self.element(self.root)
            .is_some_and(|e| e.tag() == "html")
            .then_some(self.root)
    }

    fn head_element(&self) -> Option<NodeId> {
        self.head()
    }

    fn body_element(&self) -> Option<NodeId> {
        self.body()
    }

    fn children(&self, parent: &NodeId) -> Vec<NodeId> {
        parent.children(&self.arena).collect()
    }

    fn tag_name(&self, node: &NodeId) -> Option<String> {
        self.element(*node).map(|e| e.tag().to_owned())
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.arena
            .new_node(NodeKind::Element(ElementData::html(tag)))
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        let value = self.element(*node)?.attrs.get(name)?;
        Some(value.to_string())
    }

    fn attribute_names(&self, node: &NodeId) -> Vec<String> {
        self.element(*node)
            .map(|elem| elem.attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) {
        if let Some(elem) = self.element_mut(*node) {
            elem.attrs.insert(name.to_owned(), StrTendril::from(value));
        }
    }

    fn remove_attribute(&mut self, node: &NodeId, name: &str) {
        if let Some(elem) = self.element_mut(*node) {
            elem.attrs.shift_remove(name);
        }
    }

    fn set_text_content(&mut self, node: &NodeId, text: &str) {
        self.set_text(*node, text);
    }

    /// Markup only ever lands in raw text elements here, which hold it as a
    /// single text node.
    fn set_inner_html(&mut self, node: &NodeId, html: &str) {
        self.set_text(*node, html);
    }

    fn text(&self, node: &NodeId) -> String {
        self.text_content(*node)
    }

    fn title(&self) -> Option<String> {
        let title = self.find_child(self.head()?, "title")?;
        Some(self.text_content(title))
    }

    fn set_title(&mut self, title: Option<&str>) {
        let Some(head) = self.head() else {
            return;
        };
        match (title, self.find_child(head, "title")) {
            (Some(text), Some(node)) => self.set_text(node, text),
            (Some(text), None) => {
                let node = self.create_element("title");
                self.set_text(node, text);
                head.append(node, &mut self.arena);
            }
            (None, Some(node)) => node.detach(&mut self.arena),
            (None, None) => {}
        }
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) {
        child.detach(&mut self.arena);
        parent.append(*child, &mut self.arena);
    }

    fn prepend_child(&mut self, parent: &NodeId, child: &NodeId) {
        child.detach(&mut self.arena);
        parent.prepend(*child, &mut self.arena);
    }

    fn remove(&mut self, node: &NodeId) {
        node.detach(&mut self.arena);
    }

    fn add_listener(&mut self, node: &NodeId, event: &str, handler: Handler) -> usize {
        let binding = Some(Binding {
            node: *node,
            event: event.to_owned(),
            handler,
        });
        match self.listeners.iter().position(Option::is_none) {
            Some(free) => {
                self.listeners[free] = binding;
                free
            }
            None => {
                self.listeners.push(binding);
                self.listeners.len() - 1
            }
        }
    }

    fn remove_listener(&mut self, _node: &NodeId, _event: &str, listener: usize) {
        if let Some(slot) = self.listeners.get_mut(listener) {
            slot.take();
        }
    }
}

fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

/// `noscript` is raw text because html5ever parses with scripting enabled.
fn is_raw_text_element(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "noscript")
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

pub(crate) fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

/// Parse a full HTML document. Missing `<head>`/`<body>` are implied, as in
/// a browser.
pub fn parse(html: &str) -> Document {
    parse_document(Sink::default(), Default::default()).one(StrTendril::from(html))
}

struct OwnedName(QualName);

impl ElemName for OwnedName {
    fn ns(&self) -> &html5ever::Namespace {
        &self.0.ns
    }

    fn local_name(&self) -> &LocalName {
        &self.0.local
    }
}

/// Builds the arena while html5ever drives. Tree sink methods take `&self`.
struct Sink {
    arena: RefCell<Arena<NodeKind>>,
    document: NodeId,
    doctype: RefCell<Option<StrTendril>>,
}

impl Default for Sink {
    fn default() -> Self {
        let mut arena = Arena::new();
        let document = arena.new_node(NodeKind::Document);
        Self {
            arena: RefCell::new(arena),
            document,
            doctype: RefCell::new(None),
        }
    }
}

impl Sink {
    fn node_or_text(&self, child: NodeOrText<NodeId>) -> NodeId {
        match child {
            NodeOrText::AppendNode(node) => node,
            NodeOrText::AppendText(text) => self.arena.borrow_mut().new_node(NodeKind::Text(text)),
        }
    }
}

impl TreeSink for Sink {
    type Handle = NodeId;
    type Output = Document;
    type ElemName<'a>
        = OwnedName
    where
        Self: 'a;

    fn finish(self) -> Document {
        let arena = self.arena.into_inner();
        let root = self
            .document
            .children(&arena)
            .find(|&id| matches!(arena[id].get(), NodeKind::Element(_)))
            .unwrap_or(self.document);
        Document {
            arena,
            root,
            doctype: self.doctype.into_inner(),
            listeners: Vec::new(),
        }
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {}

    fn get_document(&self) -> NodeId {
        self.document
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn same_node(&self, a: &NodeId, b: &NodeId) -> bool {
        a == b
    }

    fn elem_name<'a>(&'a self, target: &'a NodeId) -> OwnedName {
        match self.arena.borrow()[*target].get() {
            NodeKind::Element(elem) => OwnedName(elem.name.clone()),
            _ => OwnedName(QualName::new(None, ns!(html), LocalName::from(""))),
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> NodeId {
        let attrs = attrs
            .into_iter()
            .map(|attr| (attr.name.local.to_string(), attr.value))
            .collect();
        self.arena
            .borrow_mut()
            .new_node(NodeKind::Element(ElementData { name, attrs }))
    }

    fn create_comment(&self, text: StrTendril) -> NodeId {
        self.arena.borrow_mut().new_node(NodeKind::Comment(text))
    }

    fn create_pi(&self, _target: StrTendril, data: StrTendril) -> NodeId {
        self.create_comment(data)
    }

    fn append(&self, parent: &NodeId, child: NodeOrText<NodeId>) {
        if let NodeOrText::AppendText(text) = &child {
            let mut arena = self.arena.borrow_mut();
            let last = parent.children(&arena).next_back();
            if let Some(last) = last
                && let NodeKind::Text(existing) = arena[last].get_mut()
            {
                existing.push_tendril(text);
                return;
            }
        }
        let node = self.node_or_text(child);
        parent.append(node, &mut self.arena.borrow_mut());
    }

    fn append_before_sibling(&self, sibling: &NodeId, new_node: NodeOrText<NodeId>) {
        let node = self.node_or_text(new_node);
        sibling.insert_before(node, &mut self.arena.borrow_mut());
    }

    fn append_based_on_parent_node(
        &self,
        element: &NodeId,
        _prev_element: &NodeId,
        child: NodeOrText<NodeId>,
    ) {
        self.append(element, child);
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
        *self.doctype.borrow_mut() = Some(name);
    }

    fn get_template_contents(&self, target: &NodeId) -> NodeId {
        *target
    }

    fn add_attrs_if_missing(&self, target: &NodeId, attrs: Vec<Attribute>) {
        if let NodeKind::Element(elem) = self.arena.borrow_mut()[*target].get_mut() {
            for attr in attrs {
                elem.attrs
                    .entry(attr.name.local.to_string())
                    .or_insert(attr.value);
            }
        }
    }

    fn remove_from_parent(&self, target: &NodeId) {
        target.detach(&mut self.arena.borrow_mut());
    }

    fn reparent_children(&self, node: &NodeId, new_parent: &NodeId) {
        let mut arena = self.arena.borrow_mut();
        let moving: Vec<NodeId> = node.children(&arena).collect();
        for child in moving {
            child.detach(&mut arena);
            new_parent.append(child, &mut arena);
        }
    }
}
