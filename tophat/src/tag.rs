//! Canonical tag records produced by the normalizer.

use crate::head::EntryId;
use crate::value::{Handler, TitleFn};
use facet::Facet;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::fmt;

/// The kinds of head content the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum TagKind {
    Title,
    TitleTemplate,
    TemplateParams,
    Base,
    HtmlAttrs,
    BodyAttrs,
    Meta,
    Link,
    Style,
    Script,
    Noscript,
}

impl TagKind {
    /// Parse an input key (`"title"`, `"htmlAttrs"`, ...).
    pub fn from_input_key(key: &str) -> Option<Self> {
        Some(match key {
            "title" => TagKind::Title,
            "titleTemplate" => TagKind::TitleTemplate,
            "templateParams" => TagKind::TemplateParams,
            "base" => TagKind::Base,
            "htmlAttrs" => TagKind::HtmlAttrs,
            "bodyAttrs" => TagKind::BodyAttrs,
            "meta" => TagKind::Meta,
            "link" => TagKind::Link,
            "style" => TagKind::Style,
            "script" => TagKind::Script,
            "noscript" => TagKind::Noscript,
            _ => return None,
        })
    }

    /// The input key / identity name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Title => "title",
            TagKind::TitleTemplate => "titleTemplate",
            TagKind::TemplateParams => "templateParams",
            TagKind::Base => "base",
            TagKind::HtmlAttrs => "htmlAttrs",
            TagKind::BodyAttrs => "bodyAttrs",
            TagKind::Meta => "meta",
            TagKind::Link => "link",
            TagKind::Style => "style",
            TagKind::Script => "script",
            TagKind::Noscript => "noscript",
        }
    }

    /// HTML element name for kinds that render as an element.
    pub fn element_name(self) -> Option<&'static str> {
        match self {
            TagKind::Title => Some("title"),
            TagKind::Base => Some("base"),
            TagKind::Meta => Some("meta"),
            TagKind::Link => Some("link"),
            TagKind::Style => Some("style"),
            TagKind::Script => Some("script"),
            TagKind::Noscript => Some("noscript"),
            TagKind::TitleTemplate
            | TagKind::TemplateParams
            | TagKind::HtmlAttrs
            | TagKind::BodyAttrs => None,
        }
    }

    /// Element kinds whose tag name the reconciler may find in a live `<head>`.
    pub fn from_element_name(name: &str) -> Option<Self> {
        Some(match name {
            "title" => TagKind::Title,
            "base" => TagKind::Base,
            "meta" => TagKind::Meta,
            "link" => TagKind::Link,
            "style" => TagKind::Style,
            "script" => TagKind::Script,
            "noscript" => TagKind::Noscript,
            _ => return None,
        })
    }

    /// At most one instance of these survives resolution.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            TagKind::Title
                | TagKind::TitleTemplate
                | TagKind::Base
                | TagKind::HtmlAttrs
                | TagKind::BodyAttrs
                | TagKind::TemplateParams
        )
    }

    /// Attribute sets merge by default and are emitted even when empty.
    pub fn is_attribute_set(self) -> bool {
        matches!(
            self,
            TagKind::HtmlAttrs | TagKind::BodyAttrs | TagKind::TemplateParams
        )
    }

    /// Kinds whose empty instance means "remove the earlier one".
    pub fn is_element_bearing(self) -> bool {
        !self.is_attribute_set()
    }

    /// Kinds that carry a text or markup body.
    pub fn has_body(self) -> bool {
        matches!(
            self,
            TagKind::Title | TagKind::Style | TagKind::Script | TagKind::Noscript
        )
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an element is inserted in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Facet)]
#[repr(u8)]
pub enum TagPosition {
    #[default]
    Head,
    BodyOpen,
    BodyClose,
}

impl TagPosition {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "head" => TagPosition::Head,
            "bodyOpen" => TagPosition::BodyOpen,
            "bodyClose" => TagPosition::BodyClose,
            _ => return None,
        })
    }
}

/// What happens when two tags share an identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum DuplicateStrategy {
    Replace,
    Merge,
}

impl DuplicateStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "replace" => DuplicateStrategy::Replace,
            "merge" => DuplicateStrategy::Merge,
            _ => return None,
        })
    }
}

/// Symbolic priority aliases, applied as an offset to the table weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum PriorityAlias {
    Critical,
    High,
    Low,
}

impl PriorityAlias {
    pub fn offset(self) -> i32 {
        match self {
            PriorityAlias::Critical => -8,
            PriorityAlias::High => -1,
            PriorityAlias::Low => 2,
        }
    }
}

/// An explicit ordering request on a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Priority {
    /// Exact weight, replaces the table.
    Weight(i32),
    Alias(PriorityAlias),
    /// Place immediately before the tag `<kind>` with user key `key`.
    Before { kind: TagKind, key: String },
    /// Place immediately after the tag `<kind>` with user key `key`.
    After { kind: TagKind, key: String },
}

impl Priority {
    /// Parse the string form (`critical`, `before:script:analytics`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(weight) = s.trim().parse::<i32>() {
            return Some(Priority::Weight(weight));
        }
        match s {
            "critical" => return Some(Priority::Alias(PriorityAlias::Critical)),
            "high" => return Some(Priority::Alias(PriorityAlias::High)),
            "low" => return Some(Priority::Alias(PriorityAlias::Low)),
            _ => {}
        }
        let (direction, rest) = s.split_once(':')?;
        let (kind, key) = rest.split_once(':')?;
        let kind = TagKind::from_input_key(kind)?;
        if key.is_empty() {
            return None;
        }
        let key = key.to_owned();
        match direction {
            "before" => Some(Priority::Before { kind, key }),
            "after" => Some(Priority::After { kind, key }),
            _ => None,
        }
    }
}

/// Order-preserving set of class tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassList(SmallVec<[String; 4]>);

impl ClassList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a token; whitespace-separated input is split, empties dropped.
    pub fn insert(&mut self, tokens: &str) {
        for token in tokens.split_whitespace() {
            if !self.contains(token) {
                self.0.push(token.to_owned());
            }
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Union with another list, keeping this list's order first.
    pub fn union(&mut self, other: &ClassList) {
        for token in other.iter() {
            self.insert(token);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ClassList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

/// Ordered `property -> value` declarations of a `style` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleMap(IndexMap<String, String>);

impl StyleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `color: red; margin: 0` style declarations.
    pub fn parse(decls: &str) -> Self {
        let mut map = Self::new();
        map.extend_from_str(decls);
        map
    }

    pub fn extend_from_str(&mut self, decls: &str) {
        for decl in decls.split(';') {
            if let Some((prop, value)) = decl.split_once(':') {
                self.set(prop, value);
            }
        }
    }

    /// Set a declaration; empty property names or values are ignored.
    pub fn set(&mut self, prop: &str, value: &str) {
        let prop = prop.trim();
        let value = collapse_whitespace(value);
        if !prop.is_empty() && !value.is_empty() {
            self.0.insert(prop.to_owned(), value);
        }
    }

    pub fn get(&self, prop: &str) -> Option<&str> {
        self.0.get(prop).map(String::as_str)
    }

    pub fn remove(&mut self, prop: &str) -> Option<String> {
        self.0.shift_remove(prop)
    }

    /// Concatenate: declarations from `other` win on collision.
    pub fn concat(&mut self, other: &StyleMap) {
        for (prop, value) in &other.0 {
            self.0.insert(prop.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StyleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (prop, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{prop}:{value}")?;
        }
        Ok(())
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A normalized attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    /// A boolean attribute that is present. Absent attributes are not stored.
    Bool(bool),
    Class(ClassList),
    Style(StyleMap),
    /// Event callback for an `on*` prop.
    Handler(Handler),
}

impl PropValue {
    /// Attribute text, `None` for values that are not written as attributes.
    pub fn render(&self) -> Option<String> {
        match self {
            PropValue::Str(s) => Some(s.clone()),
            PropValue::Bool(true) => Some(String::new()),
            PropValue::Bool(false) | PropValue::Handler(_) => None,
            PropValue::Class(list) => Some(list.to_string()),
            PropValue::Style(map) => Some(map.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A tag body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagContent {
    /// Plain text, escaped where the element is not raw text.
    Text(String),
    /// Markup inserted verbatim.
    Html(String),
}

impl TagContent {
    pub fn as_str(&self) -> &str {
        match self {
            TagContent::Text(s) | TagContent::Html(s) => s,
        }
    }

    pub(crate) fn as_mut_string(&mut self) -> &mut String {
        match self {
            TagContent::Text(s) | TagContent::Html(s) => s,
        }
    }
}

/// A title template, either a `%s` pattern or a callable.
#[derive(Debug, Clone, PartialEq)]
pub enum TitleTemplate {
    Pattern(String),
    Function(TitleFn),
}

impl TitleTemplate {
    /// Apply the template to the current title. `None` suppresses the title.
    pub fn apply(&self, title: Option<&str>) -> Option<String> {
        match self {
            TitleTemplate::Pattern(pattern) => {
                Some(pattern.replacen("%s", title.unwrap_or_default(), 1))
            }
            TitleTemplate::Function(f) => f.call(title),
        }
    }
}

/// How an identity key was derived. Collision handling depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum KeySource {
    Singleton,
    Canonical,
    Alternate,
    Charset,
    Meta,
    /// Multi-value meta property (`og:image`, ...): same-key tags accumulate.
    MetaGroup,
    User,
    Id,
    /// Derived from a literal body.
    Content,
}

/// A tag's deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub key: String,
    pub source: KeySource,
}

/// One canonical unit of head content, derived from exactly one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub kind: TagKind,
    pub props: IndexMap<String, PropValue>,
    pub content: Option<TagContent>,
    /// Title template payload, only on `TitleTemplate` tags.
    pub template: Option<TitleTemplate>,
    /// User-supplied key.
    pub key: Option<String>,
    pub position: TagPosition,
    pub priority: Option<Priority>,
    pub strategy: Option<DuplicateStrategy>,
    pub entry: EntryId,
    /// Index within the owning entry's normalized list.
    pub index: usize,
    pub identity: Option<Identity>,
    pub weight: i32,
}

impl Tag {
    pub fn new(kind: TagKind, entry: EntryId, index: usize) -> Self {
        Self {
            kind,
            props: IndexMap::new(),
            content: None,
            template: None,
            key: None,
            position: TagPosition::Head,
            priority: None,
            strategy: None,
            entry,
            index,
            identity: None,
            weight: crate::identity::DEFAULT_WEIGHT,
        }
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    /// String value of a prop, if it is a plain string.
    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(PropValue::as_str)
    }

    pub fn set_prop(&mut self, name: impl Into<String>, value: PropValue) {
        self.props.insert(name.into(), value);
    }

    pub fn content_str(&self) -> Option<&str> {
        self.content.as_ref().map(TagContent::as_str)
    }

    pub fn identity_key(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.key.as_str())
    }

    /// Empty instance of an element-bearing kind: requests removal of an
    /// earlier tag with the same identity. A meta carrying nothing but its
    /// naming attribute counts as empty.
    pub fn is_tombstone(&self) -> bool {
        if !self.kind.is_element_bearing() || self.content.is_some() || self.template.is_some() {
            return false;
        }
        match self.kind {
            TagKind::Meta => self
                .props
                .keys()
                .all(|k| matches!(k.as_str(), "name" | "property" | "http-equiv")),
            _ => self.props.is_empty(),
        }
    }

    /// `(weight, entry, index)`: the total order of resolution.
    pub fn sort_key(&self) -> (i32, EntryId, usize) {
        (self.weight, self.entry, self.index)
    }
}
