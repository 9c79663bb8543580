//! Deduplication keys and ordering weights.
//!
//! Both are pure functions of a tag's kind, props, body and user key: the
//! owning entry and the tag's position never influence them, so identical
//! tags pushed from different call sites always collide the same way.

use crate::tag::{Identity, KeySource, Priority, PropValue, Tag, TagKind};

/// Weight of a tag the table has nothing to say about.
pub const DEFAULT_WEIGHT: i32 = 100;

/// Meta properties that legitimately repeat (`og:image` once per image, ...).
/// Same-key tags from one entry accumulate instead of replacing each other.
const MULTI_VALUE_META: &[&str] = &[
    "theme-color",
    "og:image",
    "og:image:alt",
    "og:image:height",
    "og:image:secure_url",
    "og:image:type",
    "og:image:url",
    "og:image:width",
    "og:audio",
    "og:audio:secure_url",
    "og:audio:type",
    "og:audio:url",
    "og:locale:alternate",
    "og:video",
    "og:video:alt",
    "og:video:height",
    "og:video:secure_url",
    "og:video:type",
    "og:video:url",
    "og:video:width",
    "article:author",
    "article:tag",
    "book:author",
    "book:tag",
    "music:album",
    "music:musician",
    "music:song",
    "video:actor",
    "video:director",
    "video:tag",
    "video:writer",
];

pub fn is_multi_value_meta(name: &str) -> bool {
    MULTI_VALUE_META.contains(&name)
}

/// Derive a tag's deduplication key. First matching rule wins; `None` means
/// the tag never collides with anything.
pub fn identity(tag: &Tag) -> Option<Identity> {
    let make = |key: String, source: KeySource| Some(Identity { key, source });

    if tag.kind.is_singleton() {
        return make(tag.kind.as_str().to_owned(), KeySource::Singleton);
    }

    if tag.kind == TagKind::Link {
        match tag.prop_str("rel") {
            Some("canonical") => return make("canonical".to_owned(), KeySource::Canonical),
            Some("alternate") => {
                let part = |name: &str| tag.prop_str(name).unwrap_or_default();
                return make(
                    format!(
                        "alternate:{}:{}:{}",
                        part("hreflang"),
                        part("type"),
                        part("href")
                    ),
                    KeySource::Alternate,
                );
            }
            _ => {}
        }
    }

    if tag.props.contains_key("charset") {
        return make("charset".to_owned(), KeySource::Charset);
    }

    if tag.kind == TagKind::Meta {
        let named = ["name", "property", "http-equiv"]
            .iter()
            .find_map(|attr| tag.prop_str(attr));
        if let Some(name) = named {
            let mut key = format!("meta:{name}");
            if let Some(user_key) = &tag.key {
                key.push_str(":key:");
                key.push_str(user_key);
            }
            let source = if is_multi_value_meta(name) && tag.key.is_none() {
                KeySource::MetaGroup
            } else {
                KeySource::Meta
            };
            return make(key, source);
        }
    }

    if let Some(user_key) = &tag.key {
        return make(format!("{}:key:{user_key}", tag.kind), KeySource::User);
    }

    if let Some(id) = tag.prop_str("id") {
        return make(format!("{}:id:{id}", tag.kind), KeySource::Id);
    }

    let content_addressed = matches!(
        tag.kind,
        TagKind::Style | TagKind::Script | TagKind::Noscript
    );
    if content_addressed && !tag.props.contains_key("src") {
        if let Some(body) = tag.content_str().filter(|b| !b.is_empty()) {
            return make(format!("{}:content:{body}", tag.kind), KeySource::Content);
        }
    }

    None
}

/// The browser-preference weight of a tag, ignoring explicit priorities.
///
/// Lower sorts earlier. Approximates the critical rendering path: policy and
/// encoding first, then hints, then blocking resources, then deferred ones.
pub fn table_weight(tag: &Tag) -> i32 {
    match tag.kind {
        TagKind::Base => -10,
        TagKind::Title | TagKind::TitleTemplate => 10,
        TagKind::Meta => {
            let is_csp = tag
                .prop_str("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("content-security-policy"));
            if is_csp {
                -30
            } else if tag.props.contains_key("charset") {
                -20
            } else if tag.prop_str("name") == Some("viewport") {
                -15
            } else {
                DEFAULT_WEIGHT
            }
        }
        TagKind::Link => {
            let rels = tag.prop_str("rel").unwrap_or_default().to_ascii_lowercase();
            let has = |rel: &str| rels.split_whitespace().any(|r| r == rel);
            if has("preconnect") {
                20
            } else if has("stylesheet") || has("preload") || has("modulepreload") {
                70
            } else if has("prefetch") || has("dns-prefetch") || has("prerender") {
                90
            } else {
                DEFAULT_WEIGHT
            }
        }
        TagKind::Script => script_weight(tag),
        TagKind::Style => {
            if tag.content_str().is_some_and(|css| css.contains("@import")) {
                40
            } else {
                60
            }
        }
        TagKind::TemplateParams | TagKind::HtmlAttrs | TagKind::BodyAttrs | TagKind::Noscript => {
            DEFAULT_WEIGHT
        }
    }
}

fn script_weight(tag: &Tag) -> i32 {
    let script_type = tag.prop_str("type").unwrap_or_default();
    if script_type == "importmap" {
        return 50;
    }
    let executes = script_type.is_empty()
        || script_type == "module"
        || script_type.ends_with("javascript");
    if !executes {
        return DEFAULT_WEIGHT;
    }
    let flag = |name: &str| matches!(tag.prop(name), Some(PropValue::Bool(true)));
    if flag("async") {
        30
    } else if flag("defer") || script_type == "module" {
        80
    } else {
        50
    }
}

/// Final ordering weight: explicit numbers replace the table, aliases offset
/// it, relative priorities keep it (they are applied after the merge).
pub fn weight(tag: &Tag) -> i32 {
    match &tag.priority {
        Some(Priority::Weight(w)) => *w,
        Some(Priority::Alias(alias)) => table_weight(tag) + alias.offset(),
        Some(Priority::Before { .. } | Priority::After { .. }) | None => table_weight(tag),
    }
}

/// Fill in `identity` and `weight` on a freshly normalized tag.
pub fn annotate(tag: &mut Tag) {
    tag.identity = identity(tag);
    tag.weight = weight(tag);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::EntryId;
    use crate::tag::{PriorityAlias, TagContent};
    use facet_testhelpers::test;

    fn tag(kind: TagKind, props: &[(&str, &str)]) -> Tag {
        let mut tag = Tag::new(kind, EntryId(0), 0);
        for (k, v) in props {
            tag.set_prop(*k, PropValue::Str((*v).to_owned()));
        }
        tag
    }

    fn key(tag: &Tag) -> Option<String> {
        identity(tag).map(|i| i.key)
    }

    #[test]
    fn test_singletons_key_by_kind() {
        assert_eq!(key(&tag(TagKind::Title, &[])).as_deref(), Some("title"));
        assert_eq!(
            key(&tag(TagKind::BodyAttrs, &[("class", "x")])).as_deref(),
            Some("bodyAttrs")
        );
    }

    #[test]
    fn test_link_keys() {
        let canonical = tag(TagKind::Link, &[("rel", "canonical"), ("href", "/a")]);
        assert_eq!(key(&canonical).as_deref(), Some("canonical"));

        let fr = tag(
            TagKind::Link,
            &[("rel", "alternate"), ("hreflang", "fr"), ("href", "/fr")],
        );
        let de = tag(
            TagKind::Link,
            &[("rel", "alternate"), ("hreflang", "de"), ("href", "/de")],
        );
        assert_ne!(key(&fr), key(&de));

        let stylesheet = tag(TagKind::Link, &[("rel", "stylesheet"), ("href", "/a.css")]);
        assert_eq!(key(&stylesheet), None);
    }

    #[test]
    fn test_meta_keys() {
        let charset = tag(TagKind::Meta, &[("charset", "utf-8")]);
        assert_eq!(key(&charset).as_deref(), Some("charset"));

        let desc = tag(TagKind::Meta, &[("name", "description"), ("content", "x")]);
        assert_eq!(key(&desc).as_deref(), Some("meta:description"));

        let og = tag(TagKind::Meta, &[("property", "og:image"), ("content", "a.png")]);
        let identity = identity(&og).expect("og:image has an identity");
        assert_eq!(identity.key, "meta:og:image");
        assert_eq!(identity.source, KeySource::MetaGroup);

        let mut keyed = og.clone();
        keyed.key = Some("hero".to_owned());
        let identity = super::identity(&keyed).expect("keyed og:image has an identity");
        assert_eq!(identity.key, "meta:og:image:key:hero");
        assert_eq!(identity.source, KeySource::Meta);
    }

    #[test]
    fn test_identity_ignores_ownership() {
        let mut a = tag(TagKind::Meta, &[("name", "robots"), ("content", "noindex")]);
        let mut b = a.clone();
        a.entry = EntryId(1);
        a.index = 4;
        b.entry = EntryId(9);
        b.index = 0;
        assert_eq!(identity(&a), identity(&b));
    }

    #[test]
    fn test_content_addressed_scripts() {
        let mut inline = tag(TagKind::Script, &[]);
        inline.content = Some(TagContent::Html("console.log(1)".to_owned()));
        assert_eq!(
            key(&inline).as_deref(),
            Some("script:content:console.log(1)")
        );

        let external = tag(TagKind::Script, &[("src", "/app.js")]);
        assert_eq!(key(&external), None);

        let mut keyed = external.clone();
        keyed.key = Some("app".to_owned());
        assert_eq!(key(&keyed).as_deref(), Some("script:key:app"));
    }

    #[test]
    fn test_weight_table_order() {
        let csp = tag(
            TagKind::Meta,
            &[("http-equiv", "Content-Security-Policy"), ("content", "x")],
        );
        let charset = tag(TagKind::Meta, &[("charset", "utf-8")]);
        let viewport = tag(TagKind::Meta, &[("name", "viewport"), ("content", "w")]);
        let base = tag(TagKind::Base, &[("href", "/")]);
        let title = tag(TagKind::Title, &[]);
        let preconnect = tag(TagKind::Link, &[("rel", "preconnect")]);
        let mut async_script = tag(TagKind::Script, &[("src", "/a.js")]);
        async_script.set_prop("async", PropValue::Bool(true));
        let sync_script = tag(TagKind::Script, &[("src", "/s.js")]);
        let stylesheet = tag(TagKind::Link, &[("rel", "stylesheet")]);
        let mut defer_script = tag(TagKind::Script, &[("src", "/d.js")]);
        defer_script.set_prop("defer", PropValue::Bool(true));
        let prefetch = tag(TagKind::Link, &[("rel", "dns-prefetch")]);
        let other = tag(TagKind::Meta, &[("name", "description")]);

        let weights: Vec<i32> = [
            &csp,
            &charset,
            &viewport,
            &base,
            &title,
            &preconnect,
            &async_script,
            &sync_script,
            &stylesheet,
            &defer_script,
            &prefetch,
            &other,
        ]
        .iter()
        .map(|t| weight(t))
        .collect();
        assert_eq!(weights, [-30, -20, -15, -10, 10, 20, 30, 50, 70, 80, 90, 100]);
    }

    #[test]
    fn test_priority_overrides() {
        let mut t = tag(TagKind::Meta, &[("name", "description")]);
        t.priority = Some(Priority::Weight(-100));
        assert_eq!(weight(&t), -100);

        t.priority = Some(Priority::Alias(PriorityAlias::Critical));
        assert_eq!(weight(&t), 92);

        let mut script = tag(TagKind::Script, &[("src", "/s.js")]);
        script.priority = Some(Priority::Alias(PriorityAlias::Low));
        assert_eq!(weight(&script), 52);
    }

    #[test]
    fn test_style_import_outranks_plain_style() {
        let mut imported = tag(TagKind::Style, &[]);
        imported.content = Some(TagContent::Text("@import url(a.css);".to_owned()));
        let mut plain = tag(TagKind::Style, &[]);
        plain.content = Some(TagContent::Text("body{}".to_owned()));
        assert!(weight(&imported) < weight(&plain));
    }
}
