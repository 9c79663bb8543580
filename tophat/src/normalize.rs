//! Turns one entry's raw input into canonical tags.
//!
//! Malformed leaves (wrong shapes, unknown kinds, callables where data was
//! expected) are dropped one at a time; the rest of the entry survives.

use crate::head::{EntryId, EntryOptions};
use crate::identity;
use crate::tag::{
    ClassList, DuplicateStrategy, Priority, PropValue, StyleMap, Tag, TagContent, TagKind,
    TagPosition, TitleTemplate,
};
use crate::tracing_macros::{debug, trace};
use crate::value::{HeadInput, Object, Value, format_number};

/// Normalize an entry's input. Function leaves are invoked here, on every
/// call; callers cache the result until the entry changes.
pub fn normalize(input: &HeadInput, entry: EntryId, options: &EntryOptions) -> Vec<Tag> {
    let mut out = Normalizer {
        entry,
        tags: Vec::new(),
    };

    for (name, raw) in input.iter() {
        let Some(kind) = TagKind::from_input_key(name) else {
            debug!(entry = entry.0, kind = name, "dropping unknown head kind");
            continue;
        };
        out.push_kind(kind, raw);
    }

    for tag in &mut out.tags {
        if tag.priority.is_none() {
            tag.priority = options.tag_priority.clone();
        }
        if tag.strategy.is_none() {
            tag.strategy = options.tag_duplicate_strategy;
        }
        if tag.position == TagPosition::Head
            && let Some(position) = options.tag_position
        {
            tag.position = position;
        }
        identity::annotate(tag);
    }

    trace!(entry = entry.0, count = out.tags.len(), "normalized entry");
    out.tags
}

struct Normalizer {
    entry: EntryId,
    tags: Vec<Tag>,
}

impl Normalizer {
    fn new_tag(&self, kind: TagKind) -> Tag {
        Tag::new(kind, self.entry, self.tags.len())
    }

    fn push_kind(&mut self, kind: TagKind, raw: &Value) {
        let value = raw.resolved();
        let tag = match kind {
            TagKind::Title => self.title(value),
            TagKind::TitleTemplate => self.title_template(value),
            TagKind::TemplateParams => self.template_params(value),
            TagKind::HtmlAttrs | TagKind::BodyAttrs => match value {
                Value::Object(map) => Some(self.from_object(kind, &map)),
                _ => {
                    debug!(kind = %kind, "attribute set is not an object, dropping");
                    None
                }
            },
            TagKind::Base => self.element(kind, value),
            TagKind::Meta
            | TagKind::Link
            | TagKind::Style
            | TagKind::Script
            | TagKind::Noscript => {
                if let Value::Array(items) = &value {
                    for item in items {
                        if let Some(tag) = self.element(kind, item.resolved()) {
                            self.tags.push(tag);
                        }
                    }
                    return;
                }
                self.element(kind, value)
            }
        };
        if let Some(tag) = tag {
            self.tags.push(tag);
        }
    }

    fn title(&self, value: Value) -> Option<Tag> {
        let mut tag = self.new_tag(TagKind::Title);
        match value {
            Value::Object(map) => return Some(self.from_object(TagKind::Title, &map)),
            Value::String(_) | Value::Number(_) => {
                if let Some(text) = value.scalar_string().filter(|t| !t.is_empty()) {
                    tag.content = Some(TagContent::Text(text));
                }
            }
            Value::Null | Value::Bool(false) => {}
            _ => {
                debug!("title is not text, dropping");
                return None;
            }
        }
        Some(tag)
    }

    fn title_template(&self, value: Value) -> Option<Tag> {
        let mut tag = self.new_tag(TagKind::TitleTemplate);
        match value {
            Value::String(pattern) if !pattern.is_empty() => {
                tag.template = Some(TitleTemplate::Pattern(pattern));
            }
            Value::TitleFn(f) => tag.template = Some(TitleTemplate::Function(f)),
            value if value.is_falsy() => {}
            _ => {
                debug!("titleTemplate is neither a pattern nor a function, dropping");
                return None;
            }
        }
        Some(tag)
    }

    fn template_params(&self, value: Value) -> Option<Tag> {
        let Value::Object(map) = value else {
            debug!("templateParams is not an object, dropping");
            return None;
        };
        let mut tag = self.new_tag(TagKind::TemplateParams);
        flatten_params(&mut tag, "", &map);
        Some(tag)
    }

    /// A single element-bearing tag from a string shorthand, object or falsy value.
    fn element(&self, kind: TagKind, value: Value) -> Option<Tag> {
        match value {
            Value::Object(map) => Some(self.from_object(kind, &map)),
            Value::String(s) => self.shorthand(kind, s),
            Value::Number(n) if kind.has_body() => {
                let mut tag = self.new_tag(kind);
                tag.content = Some(TagContent::Text(format_number(n)));
                Some(tag)
            }
            Value::Null | Value::Bool(false) => Some(self.new_tag(kind)),
            _ => {
                debug!(kind = %kind, "unsupported tag value, dropping");
                None
            }
        }
    }

    fn shorthand(&self, kind: TagKind, s: String) -> Option<Tag> {
        let mut tag = self.new_tag(kind);
        if s.is_empty() {
            return Some(tag);
        }
        match kind {
            TagKind::Script if looks_like_url(&s) => {
                tag.set_prop("src", PropValue::Str(s));
            }
            TagKind::Script | TagKind::Noscript => tag.content = Some(TagContent::Html(s)),
            TagKind::Style => tag.content = Some(TagContent::Text(s)),
            TagKind::Meta => tag.set_prop("charset", PropValue::Str(s)),
            _ => {
                debug!(kind = %kind, "no string shorthand for this kind, dropping");
                return None;
            }
        }
        Some(tag)
    }

    fn from_object(&self, kind: TagKind, map: &Object) -> Tag {
        let mut tag = self.new_tag(kind);
        let mut json_body = false;

        for (name, raw) in map {
            match name.as_str() {
                "key" => tag.key = raw.resolved().scalar_string().filter(|k| !k.is_empty()),
                "tagPriority" => {
                    tag.priority = match raw.resolved() {
                        Value::Number(n) => Some(Priority::Weight(n as i32)),
                        Value::String(s) => Priority::parse(&s),
                        _ => None,
                    }
                }
                "tagDuplicateStrategy" => {
                    tag.strategy = raw
                        .resolved()
                        .as_str()
                        .and_then(DuplicateStrategy::parse)
                }
                "tagPosition" => {
                    if let Some(position) = raw.resolved().as_str().and_then(TagPosition::parse) {
                        tag.position = position;
                    }
                }
                "innerHTML" | "textContent" => {
                    if kind.is_attribute_set() {
                        continue;
                    }
                    let markup = name == "innerHTML";
                    match raw.resolved() {
                        value @ (Value::Object(_) | Value::Array(_)) => {
                            match serde_json::to_string(&value.to_json()) {
                                Ok(json) => {
                                    tag.content = Some(TagContent::Html(json));
                                    json_body = true;
                                }
                                Err(_e) => debug!(error = %_e, "unserializable body, dropping"),
                            }
                        }
                        value => {
                            if let Some(text) = value.scalar_string() {
                                tag.content = Some(if markup || kind == TagKind::Script {
                                    TagContent::Html(text)
                                } else {
                                    TagContent::Text(text)
                                });
                            }
                        }
                    }
                }
                _ => {
                    if let Some(value) = attribute(kind, name, raw) {
                        tag.set_prop(name.clone(), value);
                    }
                }
            }
        }

        if json_body && !tag.props.contains_key("type") {
            tag.set_prop("type", PropValue::Str("application/json".to_owned()));
        }
        tag
    }
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://") || s.starts_with('/')
}

fn flatten_params(tag: &mut Tag, prefix: &str, map: &Object) {
    for (name, raw) in map {
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match raw.resolved() {
            Value::Object(nested) => flatten_params(tag, &full, &nested),
            value => {
                if let Some(text) = value.scalar_string() {
                    tag.set_prop(full, PropValue::Str(text));
                }
            }
        }
    }
}

/// Normalize one attribute value. `None` drops the attribute.
fn attribute(kind: TagKind, name: &str, raw: &Value) -> Option<PropValue> {
    let value = raw.resolved();
    let is_data = name.starts_with("data-");
    let literal = is_data || (kind == TagKind::Meta && name == "content");

    match name {
        "class" => return class_value(&value).map(PropValue::Class),
        "style" => return style_value(&value).map(PropValue::Style),
        _ => {}
    }

    match value {
        Value::Null => None,
        Value::Bool(true) if is_data => Some(PropValue::Str("true".to_owned())),
        Value::Bool(false) if is_data => Some(PropValue::Str("false".to_owned())),
        Value::Bool(true) => Some(PropValue::Bool(true)),
        Value::Bool(false) => None,
        Value::String(s) if !literal && (s.is_empty() || s == "true") => {
            Some(PropValue::Bool(true))
        }
        Value::String(s) => Some(PropValue::Str(s)),
        Value::Number(n) => Some(PropValue::Str(format_number(n))),
        Value::Handler(handler) if name.starts_with("on") => Some(PropValue::Handler(handler)),
        _ => {
            debug!(attr = name, "unsupported attribute value, dropping");
            None
        }
    }
}

fn class_value(value: &Value) -> Option<ClassList> {
    let mut list = ClassList::new();
    match value {
        Value::String(s) => list.insert(s),
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item.resolved() {
                    list.insert(&s);
                }
            }
        }
        Value::Object(map) => {
            for (name, enabled) in map {
                if !enabled.resolved().is_falsy() {
                    list.insert(name);
                }
            }
        }
        _ => {}
    }
    (!list.is_empty()).then_some(list)
}

fn style_value(value: &Value) -> Option<StyleMap> {
    let mut style = StyleMap::new();
    match value {
        Value::String(s) => style.extend_from_str(s),
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item.resolved() {
                    style.extend_from_str(&s);
                }
            }
        }
        Value::Object(map) => {
            for (prop, raw) in map {
                if let Some(v) = raw.resolved().scalar_string() {
                    style.set(prop, &v);
                }
            }
        }
        _ => {}
    }
    (!style.is_empty()).then_some(style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Handler;
    use facet_testhelpers::test;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn run(input: serde_json::Value) -> Vec<Tag> {
        normalize(&input.into(), EntryId(1), &EntryOptions::default())
    }

    #[test]
    fn test_object_and_array_inputs() {
        let tags = run(json!({
            "title": "Hello",
            "meta": [
                { "name": "description", "content": "Desc" },
                { "property": "og:title", "content": "Hello" }
            ],
            "link": { "rel": "canonical", "href": "https://example.com" }
        }));
        let kinds: Vec<_> = tags.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [TagKind::Title, TagKind::Meta, TagKind::Meta, TagKind::Link]
        );
        assert_eq!(tags[0].content_str(), Some("Hello"));
        let indices: Vec<_> = tags.iter().map(|t| t.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn test_boolean_coercion() {
        let tags = run(json!({
            "script": { "src": "/a.js", "async": "", "defer": "true", "data-flag": "true" },
            "meta": { "name": "x", "content": "" }
        }));
        let script = &tags[0];
        assert_eq!(script.prop("async"), Some(&PropValue::Bool(true)));
        assert_eq!(script.prop("defer"), Some(&PropValue::Bool(true)));
        assert_eq!(script.prop_str("data-flag"), Some("true"));
        assert_eq!(tags[1].prop_str("content"), Some(""));
    }

    #[test]
    fn test_false_and_null_attributes_are_dropped() {
        let tags = run(json!({
            "script": { "src": "/a.js", "async": false, "nonce": null, "data-x": false }
        }));
        assert_eq!(tags[0].prop("async"), None);
        assert_eq!(tags[0].prop("nonce"), None);
        assert_eq!(tags[0].prop_str("data-x"), Some("false"));
    }

    #[test]
    fn test_class_and_style_forms() {
        let tags = run(json!({
            "htmlAttrs": { "class": ["a  b", "a", ""], "style": { "color": "red", "margin": 0 } },
            "bodyAttrs": { "class": { "dark": true, "light": false }, "style": "a: 1;; b :2" }
        }));
        assert_eq!(
            tags[0].prop("class"),
            Some(&PropValue::Class({
                let mut l = ClassList::new();
                l.insert("a b");
                l
            }))
        );
        assert_eq!(
            tags[0].prop("style").and_then(PropValue::render).as_deref(),
            Some("color:red;margin:0")
        );
        assert_eq!(
            tags[1].prop("class").and_then(PropValue::render).as_deref(),
            Some("dark")
        );
        assert_eq!(
            tags[1].prop("style").and_then(PropValue::render).as_deref(),
            Some("a:1;b:2")
        );
    }

    #[test]
    fn test_object_body_becomes_json() {
        let tags = run(json!({
            "script": [
                { "innerHTML": { "@context": "https://schema.org" } },
                { "type": "speculationrules", "textContent": { "prerender": [] } }
            ]
        }));
        assert_eq!(tags[0].prop_str("type"), Some("application/json"));
        assert_eq!(
            tags[0].content_str(),
            Some(r#"{"@context":"https://schema.org"}"#)
        );
        assert_eq!(tags[1].prop_str("type"), Some("speculationrules"));
    }

    #[test]
    fn test_shorthands() {
        let tags = run(json!({
            "script": ["https://cdn.example.com/x.js", "console.log(1)"],
            "style": "body { margin: 0 }",
            "meta": "utf-8",
            "link": "nope"
        }));
        assert_eq!(tags.len(), 4);
        assert_eq!(tags[0].prop_str("src"), Some("https://cdn.example.com/x.js"));
        assert_eq!(
            tags[1].content,
            Some(TagContent::Html("console.log(1)".to_owned()))
        );
        assert_eq!(tags[2].content_str(), Some("body { margin: 0 }"));
        assert_eq!(tags[3].prop_str("charset"), Some("utf-8"));
    }

    #[test]
    fn test_malformed_leaves_do_not_poison_entry() {
        let tags = run(json!({
            "title": ["not", "a", "title"],
            "widget": { "x": 1 },
            "htmlAttrs": "lang=en",
            "meta": [42, { "name": "robots", "content": "noindex", "bogus": { "a": 1 } }]
        }));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].prop_str("name"), Some("robots"));
        assert_eq!(tags[0].prop("bogus"), None);
    }

    #[test]
    fn test_thunks_are_invoked_per_run() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let input = HeadInput::new().with(
            "title",
            Value::thunk(move || {
                counter.set(counter.get() + 1);
                Value::from(format!("Run {}", counter.get()))
            }),
        );
        let first = normalize(&input, EntryId(1), &EntryOptions::default());
        let second = normalize(&input, EntryId(1), &EntryOptions::default());
        assert_eq!(first[0].content_str(), Some("Run 1"));
        assert_eq!(second[0].content_str(), Some("Run 2"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_falsy_values_become_tombstones() {
        let tags = run(json!({ "title": null, "script": [{ "key": "gone" }, null] }));
        assert!(tags.iter().all(Tag::is_tombstone));
        assert_eq!(tags[1].identity_key(), Some("script:key:gone"));
    }

    #[test]
    fn test_reserved_fields() {
        let tags = run(json!({
            "script": {
                "src": "/a.js",
                "key": "analytics",
                "tagPriority": "before:script:app",
                "tagPosition": "bodyClose",
                "tagDuplicateStrategy": "merge"
            }
        }));
        let tag = &tags[0];
        assert_eq!(tag.key.as_deref(), Some("analytics"));
        assert_eq!(tag.position, TagPosition::BodyClose);
        assert_eq!(tag.strategy, Some(DuplicateStrategy::Merge));
        assert_eq!(
            tag.priority,
            Some(Priority::Before {
                kind: TagKind::Script,
                key: "app".to_owned()
            })
        );
        assert!(!tag.props.contains_key("key"));
    }

    #[test]
    fn test_event_handlers_only_on_on_props() {
        let input = HeadInput::new().with(
            "script",
            Value::object([
                ("src", Value::from("/a.js")),
                ("onload", Value::Handler(Handler::new(|| {}))),
                ("title", Value::handler(|| {})),
            ]),
        );
        let tags = normalize(&input, EntryId(1), &EntryOptions::default());
        assert!(matches!(tags[0].prop("onload"), Some(PropValue::Handler(_))));
        assert_eq!(tags[0].prop("title"), None);
    }

    #[test]
    fn test_template_params_flatten() {
        let tags = run(json!({
            "templateParams": { "siteName": "Acme", "schema": { "type": "Org" }, "n": 3 }
        }));
        assert_eq!(tags[0].prop_str("siteName"), Some("Acme"));
        assert_eq!(tags[0].prop_str("schema.type"), Some("Org"));
        assert_eq!(tags[0].prop_str("n"), Some("3"));
    }

    #[test]
    fn test_entry_defaults_apply_to_untagged_fields() {
        let options = EntryOptions::default()
            .with_priority(Priority::Weight(-5))
            .with_position(TagPosition::BodyClose);
        let input = HeadInput::from(json!({
            "script": [{ "src": "/a.js" }, { "src": "/b.js", "tagPriority": 3 }]
        }));
        let tags = normalize(&input, EntryId(2), &options);
        assert_eq!(tags[0].weight, -5);
        assert_eq!(tags[1].weight, 3);
        assert!(tags.iter().all(|t| t.position == TagPosition::BodyClose));
    }
}
