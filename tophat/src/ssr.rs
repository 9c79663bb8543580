//! HTML string rendering of resolved tags.
//!
//! Output follows HTML5 serialization rules:
//!
//! - Void elements never get end tags
//! - Attribute values are escaped and double-quoted, boolean attributes are bare
//! - Title text is RCDATA: only `&` and `<` are escaped
//! - Script and style bodies are raw (resolution already escaped them)
//!
//! Element tags carry a [`HYDRATION_ATTR`] marker with the id the
//! [`DomRenderer`](crate::DomRenderer) tracks them by, so a client can adopt
//! them instead of creating duplicates.

use crate::arena_dom::escape_attr;
use crate::dom::{HYDRATION_ATTR, TagIds};
use crate::head::Head;
use crate::tag::{PropValue, Tag, TagKind, TagPosition};

/// Options for string rendering.
#[derive(Clone, Debug)]
pub struct SsrOptions {
    /// Put each tag on its own line (default: false)
    pub line_breaks: bool,
    /// Emit `data-hid` markers for client hydration (default: true)
    pub hydration_markers: bool,
}

impl Default for SsrOptions {
    fn default() -> Self {
        Self {
            line_breaks: false,
            hydration_markers: true,
        }
    }
}

impl SsrOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// One tag per line.
    pub fn line_breaks(mut self) -> Self {
        self.line_breaks = true;
        self
    }

    /// Skip hydration markers, for pages that are never hydrated.
    pub fn no_hydration_markers(mut self) -> Self {
        self.hydration_markers = false;
        self
    }
}

/// Rendered fragments, ready to splice into a page shell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SsrHead {
    /// Tags for inside `<head>`.
    pub head_tags: String,
    /// Tags right after `<body>`.
    pub body_tags_open: String,
    /// Tags right before `</body>`.
    pub body_tags: String,
    /// Attributes for `<html>`, each with a leading space.
    pub html_attrs: String,
    /// Attributes for `<body>`, each with a leading space.
    pub body_attrs: String,
}

/// Resolve `head` and render it.
pub fn render_ssr_head(head: &mut Head, options: &SsrOptions) -> SsrHead {
    render_tags(&head.resolve_tags(), options)
}

/// Render already-resolved tags.
pub fn render_tags(tags: &[Tag], options: &SsrOptions) -> SsrHead {
    let mut out = SsrHead::default();
    let mut ids = TagIds::default();

    for tag in tags {
        let id = ids.next(tag);
        match tag.kind {
            TagKind::HtmlAttrs => write_attrs(&mut out.html_attrs, tag),
            TagKind::BodyAttrs => write_attrs(&mut out.body_attrs, tag),
            kind => {
                let Some(name) = kind.element_name() else {
                    continue;
                };
                let buf = match tag.position {
                    TagPosition::Head => &mut out.head_tags,
                    TagPosition::BodyOpen => &mut out.body_tags_open,
                    TagPosition::BodyClose => &mut out.body_tags,
                };
                if options.line_breaks && !buf.is_empty() {
                    buf.push('\n');
                }
                // the title is adopted through the document title, not by id
                let marker = (options.hydration_markers && kind != TagKind::Title).then_some(id);
                write_element(buf, name, tag, marker.as_deref());
            }
        }
    }
    out
}

fn write_element(out: &mut String, name: &str, tag: &Tag, hid: Option<&str>) {
    out.push('<');
    out.push_str(name);
    write_attrs(out, tag);
    if let Some(hid) = hid {
        write_attr(out, HYDRATION_ATTR, hid);
    }
    out.push('>');

    if matches!(tag.kind, TagKind::Meta | TagKind::Link | TagKind::Base) {
        return;
    }
    if let Some(content) = tag.content_str() {
        if tag.kind == TagKind::Title {
            escape_rcdata(out, content);
        } else {
            out.push_str(content);
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_attrs(out: &mut String, tag: &Tag) {
    for (name, value) in &tag.props {
        match value {
            PropValue::Handler(_) => {
                let event = name.strip_prefix("on").unwrap_or(name);
                write_attr(
                    out,
                    name,
                    &format!("this.dataset.on{event}fired = true"),
                );
            }
            PropValue::Bool(true) => {
                out.push(' ');
                out.push_str(name);
            }
            value => {
                if let Some(text) = value.render() {
                    write_attr(out, name, &text);
                }
            }
        }
    }
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attr(out, value);
    out.push('"');
}

/// RCDATA escaping: only `&` and `<` can end the element early or start an
/// entity.
fn escape_rcdata(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(c),
        }
    }
}
