//! Reconciles resolved tags against a live document.
//!
//! Every mutation a pass makes is recorded as an undo closure keyed by the
//! owning tag and the kind of side effect. The next pass starts from the
//! previous set as "pending", moves every effect it re-registers over to the
//! new set, and finally runs whatever is left. That difference is the only
//! way anything gets removed.

use crate::error::HeadError;
use crate::head::Head;
use crate::tag::{
    ClassList, KeySource, PropValue, StyleMap, Tag, TagContent, TagKind, TagPosition,
};
use crate::tracing_macros::{debug, trace};
use crate::value::Handler;
use indexmap::IndexMap;
use rapidhash::RapidHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

/// Attribute carrying a server-rendered element's tag id.
pub const HYDRATION_ATTR: &str = "data-hid";

/// The document operations the reconciler needs.
///
/// Nodes are cheap handles: undo closures hold on to them after the pass
/// that created them is over.
pub trait DomTarget {
    type Node: Clone + 'static;
    type Listener: 'static;

    fn html_element(&self) -> Option<Self::Node>;
    fn head_element(&self) -> Option<Self::Node>;
    fn body_element(&self) -> Option<Self::Node>;

    /// Direct children of `parent`, elements or not.
    fn children(&self, parent: &Self::Node) -> Vec<Self::Node>;
    /// Lowercase tag name, `None` for non-element nodes.
    fn tag_name(&self, node: &Self::Node) -> Option<String>;

    /// Create a detached element.
    fn create_element(&mut self, tag: &str) -> Self::Node;
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    /// Names of every attribute on `node`, in document order.
    fn attribute_names(&self, node: &Self::Node) -> Vec<String>;
    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);
    fn remove_attribute(&mut self, node: &Self::Node, name: &str);
    fn set_text_content(&mut self, node: &Self::Node, text: &str);
    fn set_inner_html(&mut self, node: &Self::Node, html: &str);
    /// Text of all descendants of `node`.
    fn text(&self, node: &Self::Node) -> String;

    /// The document title, `None` when there is no title element.
    fn title(&self) -> Option<String>;
    /// Set the title, `None` removes the title element.
    fn set_title(&mut self, title: Option<&str>);

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node);
    fn prepend_child(&mut self, parent: &Self::Node, child: &Self::Node);
    /// Detach a node from its parent.
    fn remove(&mut self, node: &Self::Node);

    fn add_listener(&mut self, node: &Self::Node, event: &str, handler: Handler) -> Self::Listener;
    fn remove_listener(&mut self, node: &Self::Node, event: &str, listener: Self::Listener);
}

/// What kind of side effect an undo closure reverts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Effect {
    Element,
    Title,
    Attr(String),
    Class(String),
    Style(String),
    Listener(String),
}

type EffectKey = (String, Effect);
type Undo<D> = Box<dyn FnOnce(&mut D)>;

/// The id a tag's element is tracked (and hydrated) by.
///
/// The identity key when the tag has one, a hash of the tag's content
/// otherwise. Only bytes are fed to the hasher so a server and a client
/// compute the same id.
pub fn tag_id(tag: &Tag) -> String {
    if let Some(identity) = &tag.identity
        && identity.source != KeySource::Content
    {
        return identity.key.clone();
    }
    let mut hasher = RapidHasher::default();
    hasher.write(tag.kind.as_str().as_bytes());
    for (name, value) in &tag.props {
        hasher.write_u8(0xff);
        hasher.write(name.as_bytes());
        hasher.write_u8(0xfe);
        if let Some(text) = value.render() {
            hasher.write(text.as_bytes());
        }
    }
    if let Some(content) = tag.content_str() {
        hasher.write_u8(0xfd);
        hasher.write(content.as_bytes());
    }
    format!("{}:{:016x}", tag.kind, hasher.finish())
}

/// Hands out per-pass tag ids; repeated ids get an occurrence suffix.
#[derive(Default)]
pub(crate) struct TagIds {
    seen: HashMap<String, usize>,
}

impl TagIds {
    pub(crate) fn next(&mut self, tag: &Tag) -> String {
        let base = tag_id(tag);
        let count = self.seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base
        } else {
            format!("{base}:{count}")
        };
        *count += 1;
        id
    }
}

/// What a render pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Resolved tags applied.
    pub tags: usize,
    /// Elements created and inserted.
    pub created: usize,
    /// Stale side effects undone.
    pub undone: usize,
}

struct Pass<D: DomTarget> {
    pending: IndexMap<EffectKey, Undo<D>>,
    ids: TagIds,
    head: Vec<D::Node>,
    body_open: Vec<D::Node>,
    body_close: Vec<D::Node>,
}

impl<D: DomTarget> Pass<D> {
    fn fresh(&mut self, position: TagPosition) -> &mut Vec<D::Node> {
        match position {
            TagPosition::Head => &mut self.head,
            TagPosition::BodyOpen => &mut self.body_open,
            TagPosition::BodyClose => &mut self.body_close,
        }
    }
}

/// Live reconciliation state for one target.
pub struct DomRenderer<D: DomTarget> {
    elements: HashMap<String, D::Node>,
    /// Last body written per element.
    bodies: HashMap<String, TagContent>,
    /// Server-rendered elements not claimed by a tag yet.
    adopted: HashSet<String>,
    effects: IndexMap<EffectKey, Undo<D>>,
    /// Handler behind each live listener effect.
    handlers: HashMap<EffectKey, Handler>,
    hydrated: bool,
    revision: Option<u64>,
}

impl<D: DomTarget> Default for DomRenderer<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DomTarget> DomRenderer<D> {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            bodies: HashMap::new(),
            adopted: HashSet::new(),
            effects: IndexMap::new(),
            handlers: HashMap::new(),
            hydrated: false,
            revision: None,
        }
    }

    /// Head revision of the last completed pass.
    pub fn rendered_revision(&self) -> Option<u64> {
        self.revision
    }

    /// Render only if the head changed since the last pass.
    pub fn render_if_dirty(
        &mut self,
        dom: &mut D,
        head: &mut Head,
    ) -> Result<Option<RenderStats>, HeadError> {
        if self.revision == Some(head.revision()) {
            return Ok(None);
        }
        self.render(dom, head).map(Some)
    }

    /// Resolve the head and apply the difference to `dom`.
    pub fn render(&mut self, dom: &mut D, head: &mut Head) -> Result<RenderStats, HeadError> {
        let html = dom.html_element().ok_or(HeadError::MissingRoot)?;
        let head_el = dom.head_element().ok_or(HeadError::MissingHead)?;
        let body = dom.body_element().ok_or(HeadError::MissingBody)?;

        if !self.hydrated {
            self.hydrate(dom, &head_el, &body);
            self.hydrated = true;
        }

        let tags = head.resolve_tags();
        let mut pass = Pass {
            pending: std::mem::take(&mut self.effects),
            ids: TagIds::default(),
            head: Vec::new(),
            body_open: Vec::new(),
            body_close: Vec::new(),
        };

        let mut title = None;
        for tag in &tags {
            let id = pass.ids.next(tag);
            match tag.kind {
                TagKind::Title => title = Some((id, tag)),
                TagKind::HtmlAttrs => self.apply_props(dom, &mut pass, &id, &html, tag, true),
                TagKind::BodyAttrs => self.apply_props(dom, &mut pass, &id, &body, tag, true),
                _ => self.apply_element(dom, &mut pass, id, tag),
            }
        }

        let created = pass.head.len() + pass.body_open.len() + pass.body_close.len();
        for node in &pass.head {
            dom.append_child(&head_el, node);
        }
        for node in pass.body_open.iter().rev() {
            dom.prepend_child(&body, node);
        }
        for node in &pass.body_close {
            dom.append_child(&body, node);
        }
        // after the batch, so a newly created title lands behind the tags
        // that outrank it
        if let Some((id, tag)) = title {
            self.apply_title(dom, &mut pass, id, tag);
        }

        let undone = pass.pending.len();
        for (key, undo) in pass.pending.into_iter().rev() {
            trace!(id = %key.0, effect = ?key.1, "undoing stale effect");
            undo(dom);
            match key.1 {
                Effect::Element => {
                    self.elements.remove(&key.0);
                    self.bodies.remove(&key.0);
                }
                Effect::Listener(_) => {
                    self.handlers.remove(&key);
                }
                _ => {}
            }
        }

        self.revision = Some(head.revision());
        debug!(tags = tags.len(), created, undone, "render pass done");
        Ok(RenderStats {
            tags: tags.len(),
            created,
            undone,
        })
    }

    /// Undo everything this renderer ever did to `dom`.
    pub fn teardown(&mut self, dom: &mut D) {
        for (_, undo) in std::mem::take(&mut self.effects).into_iter().rev() {
            undo(dom);
        }
        self.elements.clear();
        self.bodies.clear();
        self.adopted.clear();
        self.handlers.clear();
        self.revision = None;
    }

    /// Index server-rendered elements by their hydration marker.
    fn hydrate(&mut self, dom: &D, head: &D::Node, body: &D::Node) {
        for parent in [head, body] {
            for child in dom.children(parent) {
                let managed = dom
                    .tag_name(&child)
                    .is_some_and(|name| TagKind::from_element_name(&name).is_some());
                if !managed {
                    continue;
                }
                if let Some(id) = dom.attribute(&child, HYDRATION_ATTR) {
                    trace!(id = %id, "found server-rendered element");
                    self.adopted.insert(id.clone());
                    self.elements.insert(id, child);
                }
            }
        }
    }

    /// Move a still-wanted effect from the previous pass into this one.
    fn carry(&mut self, pass: &mut Pass<D>, key: &EffectKey) -> bool {
        match pass.pending.shift_remove(key) {
            Some(undo) => {
                self.effects.insert(key.clone(), undo);
                true
            }
            None => false,
        }
    }

    fn apply_title(&mut self, dom: &mut D, pass: &mut Pass<D>, id: String, tag: &Tag) {
        let text = tag.content_str().unwrap_or_default();
        let current = dom.title();
        let key = (id, Effect::Title);
        if !self.carry(pass, &key) {
            let previous = current.clone();
            self.effects.insert(
                key,
                Box::new(move |dom: &mut D| dom.set_title(previous.as_deref())),
            );
        }
        if current.as_deref() != Some(text) {
            dom.set_title(Some(text));
        }
    }

    fn apply_element(&mut self, dom: &mut D, pass: &mut Pass<D>, id: String, tag: &Tag) {
        let Some(name) = tag.kind.element_name() else {
            return;
        };
        let key = (id.clone(), Effect::Element);

        let node = match self.elements.get(&id) {
            Some(node) => node.clone(),
            None => {
                let node = dom.create_element(name);
                pass.fresh(tag.position).push(node.clone());
                self.elements.insert(id.clone(), node.clone());
                node
            }
        };
        if !self.carry(pass, &key) {
            let removed = node.clone();
            self.effects
                .insert(key, Box::new(move |dom: &mut D| dom.remove(&removed)));
        }

        // a server-rendered element is checked against the DOM itself, once
        let adopted = self.adopted.remove(&id);
        if adopted {
            for attr in dom.attribute_names(&node) {
                if !keeps_attribute(tag, &attr) {
                    trace!(id = %id, attr = %attr, "dropping server-only attribute");
                    dom.remove_attribute(&node, &attr);
                }
            }
        }

        self.apply_props(dom, pass, &id, &node, tag, false);

        match &tag.content {
            Some(content) => {
                let stale = if adopted {
                    dom.text(&node) != content.as_str()
                } else {
                    self.bodies.get(&id) != Some(content)
                };
                if stale {
                    match content {
                        TagContent::Text(text) => dom.set_text_content(&node, text),
                        TagContent::Html(html) => dom.set_inner_html(&node, html),
                    }
                }
                self.bodies.insert(id, content.clone());
            }
            None => {
                let had_body = adopted || self.bodies.remove(&id).is_some();
                if had_body && !dom.text(&node).is_empty() {
                    dom.set_text_content(&node, "");
                }
            }
        }
    }

    /// Apply a tag's props to `node`. Attribute sets edit class tokens and
    /// style declarations one by one, leaving everything else on the element
    /// alone.
    fn apply_props(
        &mut self,
        dom: &mut D,
        pass: &mut Pass<D>,
        id: &str,
        node: &D::Node,
        tag: &Tag,
        granular: bool,
    ) {
        for (name, value) in &tag.props {
            match value {
                PropValue::Class(list) if granular => self.apply_class(dom, pass, id, node, list),
                PropValue::Style(style) if granular => {
                    self.apply_style(dom, pass, id, node, style)
                }
                PropValue::Handler(handler) => {
                    self.bind_handler(dom, pass, id, node, name, handler)
                }
                value => {
                    if let Some(text) = value.render() {
                        self.set_attribute(dom, pass, id, node, name, &text);
                    }
                }
            }
        }
    }

    fn set_attribute(
        &mut self,
        dom: &mut D,
        pass: &mut Pass<D>,
        id: &str,
        node: &D::Node,
        name: &str,
        value: &str,
    ) {
        let current = dom.attribute(node, name);
        let key = (id.to_owned(), Effect::Attr(name.to_owned()));
        if !self.carry(pass, &key) {
            let (node, name, previous) = (node.clone(), name.to_owned(), current.clone());
            self.effects.insert(
                key,
                Box::new(move |dom: &mut D| match previous {
                    Some(value) => dom.set_attribute(&node, &name, &value),
                    None => dom.remove_attribute(&node, &name),
                }),
            );
        }
        if current.as_deref() != Some(value) {
            dom.set_attribute(node, name, value);
        }
    }

    fn apply_class(
        &mut self,
        dom: &mut D,
        pass: &mut Pass<D>,
        id: &str,
        node: &D::Node,
        list: &ClassList,
    ) {
        for token in list.iter() {
            let key = (id.to_owned(), Effect::Class(token.to_owned()));
            let mut tokens = class_tokens(dom, node);
            let present = tokens.contains(token);
            if self.carry(pass, &key) {
                if !present {
                    tokens.insert(token);
                    write_class(dom, node, &tokens);
                }
                continue;
            }
            if present {
                // owned by the document, never ours to remove
                continue;
            }
            tokens.insert(token);
            write_class(dom, node, &tokens);
            let (node, token) = (node.clone(), token.to_owned());
            self.effects.insert(
                key,
                Box::new(move |dom: &mut D| {
                    let remaining: ClassList = {
                        let mut kept = ClassList::new();
                        for t in class_tokens(dom, &node).iter().filter(|t| *t != token) {
                            kept.insert(t);
                        }
                        kept
                    };
                    write_class(dom, &node, &remaining);
                }),
            );
        }
    }

    fn apply_style(
        &mut self,
        dom: &mut D,
        pass: &mut Pass<D>,
        id: &str,
        node: &D::Node,
        style: &StyleMap,
    ) {
        for (prop, value) in style.iter() {
            let key = (id.to_owned(), Effect::Style(prop.to_owned()));
            let mut current = style_map(dom, node);
            if !self.carry(pass, &key) {
                let previous = current.get(prop).map(str::to_owned);
                let (node, prop) = (node.clone(), prop.to_owned());
                self.effects.insert(
                    key,
                    Box::new(move |dom: &mut D| {
                        let mut style = style_map(dom, &node);
                        match &previous {
                            Some(value) => style.set(&prop, value),
                            None => {
                                style.remove(&prop);
                            }
                        }
                        write_style(dom, &node, &style);
                    }),
                );
            }
            if current.get(prop) != Some(value) {
                current.set(prop, value);
                write_style(dom, node, &current);
            }
        }
    }

    /// Bind an `on*` handler, rebinding only when the handler itself changes.
    /// If the server-rendered element recorded that the event fired before
    /// the client was ready, the handler runs right away.
    fn bind_handler(
        &mut self,
        dom: &mut D,
        pass: &mut Pass<D>,
        id: &str,
        node: &D::Node,
        prop: &str,
        handler: &Handler,
    ) {
        let event = prop.strip_prefix("on").unwrap_or(prop).to_owned();
        let key = (id.to_owned(), Effect::Listener(event.clone()));
        if let Some(undo) = pass.pending.shift_remove(&key) {
            if self.handlers.get(&key) == Some(handler) {
                self.effects.insert(key, undo);
                return;
            }
            trace!(id, event = %event, "handler replaced, rebinding");
            undo(dom);
        }

        let fired = format!("data-{prop}fired");
        if dom.attribute(node, &fired).is_some() {
            debug!(id, event = %event, "event fired before hydration, replaying");
            handler.call();
            dom.remove_attribute(node, &fired);
        }

        let listener = dom.add_listener(node, &event, handler.clone());
        let marker = format!("data-{prop}");
        dom.set_attribute(node, &marker, "");

        let node = node.clone();
        self.handlers.insert(key.clone(), handler.clone());
        self.effects.insert(
            key,
            Box::new(move |dom: &mut D| {
                dom.remove_listener(&node, &event, listener);
                dom.remove_attribute(&node, &marker);
            }),
        );
    }
}

/// Attributes a hydrated element may carry beyond its tag's props: the
/// hydration marker and the listener markers of handlers it still binds.
fn keeps_attribute(tag: &Tag, name: &str) -> bool {
    if name == HYDRATION_ATTR || tag.props.contains_key(name) {
        return true;
    }
    name.strip_prefix("data-")
        .map(|rest| rest.strip_suffix("fired").unwrap_or(rest))
        .is_some_and(|prop| matches!(tag.prop(prop), Some(PropValue::Handler(_))))
}

fn class_tokens<D: DomTarget>(dom: &D, node: &D::Node) -> ClassList {
    let mut list = ClassList::new();
    if let Some(class) = dom.attribute(node, "class") {
        list.insert(&class);
    }
    list
}

fn write_class<D: DomTarget>(dom: &mut D, node: &D::Node, tokens: &ClassList) {
    if tokens.is_empty() {
        dom.remove_attribute(node, "class");
    } else {
        dom.set_attribute(node, "class", &tokens.to_string());
    }
}

fn style_map<D: DomTarget>(dom: &D, node: &D::Node) -> StyleMap {
    dom.attribute(node, "style")
        .map(|s| StyleMap::parse(&s))
        .unwrap_or_default()
}

fn write_style<D: DomTarget>(dom: &mut D, node: &D::Node, style: &StyleMap) {
    if style.is_empty() {
        dom.remove_attribute(node, "style");
    } else {
        dom.set_attribute(node, "style", &style.to_string());
    }
}
