//! The entry store: every call site's live head input, in registration order.

use crate::normalize::normalize;
use crate::resolve::resolve;
use crate::tag::{DuplicateStrategy, Priority, Tag, TagPosition};
use crate::tracing_macros::{debug, trace};
use crate::value::HeadInput;
use facet::Facet;

/// Identifies an entry for its whole lifetime. Ids are handed out in
/// registration order and never reused, so they double as the tie-break
/// between equal-weight tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
#[facet(transparent)]
pub struct EntryId(pub u32);

/// Which renderer an entry is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Facet)]
#[repr(u8)]
pub enum RenderMode {
    #[default]
    All,
    /// Only resolved on a server-rendering head.
    Server,
    /// Only resolved on a client head.
    Client,
}

/// Per-entry options. Tag-level defaults apply to every tag of the entry
/// that doesn't set its own.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub mode: RenderMode,
    pub tag_priority: Option<Priority>,
    pub tag_duplicate_strategy: Option<DuplicateStrategy>,
    pub tag_position: Option<TagPosition>,
}

impl EntryOptions {
    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.tag_priority = Some(priority);
        self
    }

    pub fn with_duplicate_strategy(mut self, strategy: DuplicateStrategy) -> Self {
        self.tag_duplicate_strategy = Some(strategy);
        self
    }

    pub fn with_position(mut self, position: TagPosition) -> Self {
        self.tag_position = Some(position);
        self
    }

    /// Fill unset fields from `defaults`.
    fn or(&self, defaults: &EntryOptions) -> EntryOptions {
        EntryOptions {
            mode: self.mode,
            tag_priority: self
                .tag_priority
                .clone()
                .or_else(|| defaults.tag_priority.clone()),
            tag_duplicate_strategy: self
                .tag_duplicate_strategy
                .or(defaults.tag_duplicate_strategy),
            tag_position: self.tag_position.or(defaults.tag_position),
        }
    }
}

/// Options for a whole head instance.
#[derive(Debug, Clone, Default)]
pub struct HeadOptions {
    /// Server-rendering head: skips client-only entries instead of
    /// server-only ones.
    pub ssr: bool,
    /// Defaults merged into every entry's own options.
    pub entry_defaults: EntryOptions,
}

impl HeadOptions {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self {
            ssr: true,
            ..Self::default()
        }
    }

    pub fn with_entry_defaults(mut self, defaults: EntryOptions) -> Self {
        self.entry_defaults = defaults;
        self
    }
}

struct Entry {
    id: EntryId,
    input: HeadInput,
    options: EntryOptions,
    /// Normalized tags, dropped whenever the input changes.
    cached: Option<Vec<Tag>>,
}

/// An ordered collection of live entries.
///
/// Every mutation bumps [`Head::revision`]; renderers compare revisions to
/// decide whether a pass is needed.
pub struct Head {
    options: HeadOptions,
    entries: Vec<Entry>,
    next_id: u32,
    revision: u64,
}

impl Default for Head {
    fn default() -> Self {
        Self::new(HeadOptions::default())
    }
}

impl Head {
    pub fn new(options: HeadOptions) -> Self {
        Self {
            options,
            entries: Vec::new(),
            next_id: 1,
            revision: 0,
        }
    }

    /// A head for the browser.
    pub fn client() -> Self {
        Self::new(HeadOptions::client())
    }

    /// A head for server rendering.
    pub fn server() -> Self {
        Self::new(HeadOptions::server())
    }

    pub fn is_ssr(&self) -> bool {
        self.options.ssr
    }

    /// Register a new entry with default options.
    pub fn push(&mut self, input: impl Into<HeadInput>) -> EntryId {
        self.push_with(input, EntryOptions::default())
    }

    /// Register a new entry. It sorts after every entry already present.
    pub fn push_with(&mut self, input: impl Into<HeadInput>, options: EntryOptions) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            input: input.into(),
            options,
            cached: None,
        });
        self.bump();
        debug!(entry = id.0, "pushed entry");
        id
    }

    /// Replace an entry's input in place. Its id, and therefore its position
    /// among equal-weight tags, is preserved. Returns `false` for a disposed
    /// or unknown id.
    pub fn patch(&mut self, id: EntryId, input: impl Into<HeadInput>) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            debug!(entry = id.0, "patch on a disposed entry, ignoring");
            return false;
        };
        entry.input = input.into();
        entry.cached = None;
        self.bump();
        trace!(entry = id.0, "patched entry");
        true
    }

    /// Remove an entry. Disposing twice is a no-op that returns `false`.
    pub fn dispose(&mut self, id: EntryId) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        self.entries.remove(pos);
        self.bump();
        debug!(entry = id.0, "disposed entry");
        true
    }

    /// Forget every cached normalization, so thunks run again on the next
    /// resolution. Use when state read by a thunk changed.
    pub fn invalidate(&mut self) {
        for entry in &mut self.entries {
            entry.cached = None;
        }
        self.bump();
    }

    /// Monotonic change counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Input of a live entry.
    pub fn input(&self, id: EntryId) -> Option<&HeadInput> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.input)
    }

    /// Resolve the current entry set into the final ordered tag list.
    pub fn resolve_tags(&mut self) -> Vec<Tag> {
        let tags = self.normalized_tags();
        resolve(tags)
    }

    /// Normalized tags of every entry this head renders, normalizing stale
    /// entries on the way.
    fn normalized_tags(&mut self) -> Vec<Tag> {
        let ssr = self.options.ssr;
        let defaults = &self.options.entry_defaults;
        let mut tags = Vec::new();
        for entry in &mut self.entries {
            let skipped = match entry.options.mode {
                RenderMode::All => false,
                RenderMode::Server => !ssr,
                RenderMode::Client => ssr,
            };
            if skipped {
                continue;
            }
            let cached = entry.cached.get_or_insert_with(|| {
                normalize(&entry.input, entry.id, &entry.options.or(defaults))
            });
            tags.extend(cached.iter().cloned());
        }
        tags
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use facet_testhelpers::test;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_ids_are_never_reused() {
        let mut head = Head::client();
        let a = head.push(json!({ "title": "A" }));
        assert!(head.dispose(a));
        let b = head.push(json!({ "title": "B" }));
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_dispose_twice_is_noop() {
        let mut head = Head::client();
        let id = head.push(json!({ "title": "A" }));
        assert!(head.dispose(id));
        let revision = head.revision();
        assert!(!head.dispose(id));
        assert_eq!(head.revision(), revision);
    }

    #[test]
    fn test_patch_after_dispose_is_ignored() {
        let mut head = Head::client();
        let id = head.push(json!({ "title": "A" }));
        head.dispose(id);
        assert!(!head.patch(id, json!({ "title": "B" })));
        assert!(head.resolve_tags().is_empty());
    }

    #[test]
    fn test_patch_keeps_registration_order() {
        let mut head = Head::client();
        let first = head.push(json!({ "meta": { "name": "a", "content": "1" } }));
        head.push(json!({ "meta": { "name": "b", "content": "2" } }));
        head.patch(first, json!({ "meta": { "name": "a", "content": "3" } }));

        let names: Vec<_> = head
            .resolve_tags()
            .iter()
            .map(|t| t.prop_str("name").unwrap_or_default().to_owned())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_cache_until_invalidated() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mut head = Head::client();
        head.push(HeadInput::new().with(
            "title",
            Value::thunk(move || {
                counter.set(counter.get() + 1);
                Value::from("T")
            }),
        ));

        head.resolve_tags();
        head.resolve_tags();
        assert_eq!(calls.get(), 1);

        head.invalidate();
        head.resolve_tags();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_render_modes() {
        let mut client = Head::client();
        let mut server = Head::server();
        for head in [&mut client, &mut server] {
            head.push_with(
                json!({ "meta": { "name": "server-only", "content": "x" } }),
                EntryOptions::default().with_mode(RenderMode::Server),
            );
            head.push_with(
                json!({ "meta": { "name": "client-only", "content": "y" } }),
                EntryOptions::default().with_mode(RenderMode::Client),
            );
        }
        let names = |head: &mut Head| -> Vec<String> {
            head.resolve_tags()
                .iter()
                .filter_map(|t| t.prop_str("name").map(str::to_owned))
                .collect()
        };
        assert_eq!(names(&mut client), ["client-only"]);
        assert_eq!(names(&mut server), ["server-only"]);
    }

    #[test]
    fn test_head_defaults_fill_entry_options() {
        let mut head = Head::new(
            HeadOptions::client()
                .with_entry_defaults(EntryOptions::default().with_position(TagPosition::BodyClose)),
        );
        head.push(json!({ "script": { "src": "/a.js" } }));
        head.push_with(
            json!({ "script": { "src": "/b.js" } }),
            EntryOptions::default().with_position(TagPosition::Head),
        );
        let positions: Vec<_> = head.resolve_tags().iter().map(|t| t.position).collect();
        assert_eq!(positions, [TagPosition::BodyClose, TagPosition::Head]);
    }
}
