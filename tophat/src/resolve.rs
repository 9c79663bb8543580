//! Folds every entry's normalized tags into the final ordered list.
//!
//! Tags are visited in `(entry, index)` order and folded into a map keyed by
//! identity, so a later entry always acts on what earlier entries left.
//! What happens on a key collision depends on the duplicate strategy and on
//! how the key was derived. Once the fold is done the survivors are sorted
//! by `(weight, entry, index)` and the post passes run: relative priorities,
//! the title template, template params and sanitization.

use crate::tag::{
    DuplicateStrategy, Identity, KeySource, Priority, PropValue, Tag, TagContent, TagKind,
};
use crate::tracing_macros::{debug, trace};
use indexmap::IndexMap;

/// Resolve normalized tags into the renderable list.
///
/// Pure: the result only depends on the tags passed in, never on the order
/// they arrive in.
pub fn resolve(mut tags: Vec<Tag>) -> Vec<Tag> {
    // weight only orders the output; precedence between entries is by age
    tags.sort_by_key(|tag| (tag.entry, tag.index));

    let mut fold = Fold::default();
    for tag in tags {
        fold.insert(tag);
    }
    let mut tags = fold.finish();

    apply_relative_priorities(&mut tags);
    apply_title_template(&mut tags);
    apply_template_params(&mut tags);
    let tags = sanitize(tags);

    trace!(count = tags.len(), "resolved tags");
    tags
}

/// What an incoming tag does to the tags already holding its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collision {
    /// Nothing holds the key yet.
    Insert,
    /// Tombstone: the earlier tag goes away.
    Remove,
    /// Combine props into the earlier tag.
    Merge,
    /// Join a multi-value meta group from the same entry.
    Accumulate,
    /// Start the group over with the incoming tag.
    Restart,
    /// A distinct tag that only shares a body with the earlier one.
    Variant,
    /// The earlier tag outranks the incoming one.
    Drop,
    Replace,
}

fn collision(existing: Option<&Tag>, incoming: &Tag, identity: &Identity) -> Collision {
    let Some(existing) = existing else {
        return Collision::Insert;
    };
    if incoming.is_tombstone() {
        return Collision::Remove;
    }

    let strategy = incoming.strategy.unwrap_or(if incoming.kind.is_attribute_set() {
        DuplicateStrategy::Merge
    } else {
        DuplicateStrategy::Replace
    });
    if strategy == DuplicateStrategy::Merge {
        return Collision::Merge;
    }

    if identity.source == KeySource::MetaGroup {
        return if existing.entry == incoming.entry {
            Collision::Accumulate
        } else {
            Collision::Restart
        };
    }

    let keyless = existing.key.is_none() && incoming.key.is_none();
    if identity.source == KeySource::Content && keyless && existing.props != incoming.props {
        return Collision::Variant;
    }
    if keyless && incoming.weight > existing.weight {
        return Collision::Drop;
    }
    Collision::Replace
}

#[derive(Default)]
struct Fold {
    keyed: IndexMap<String, Vec<Tag>>,
    /// Tags without identity never collide.
    loose: Vec<Tag>,
}

impl Fold {
    fn insert(&mut self, tag: Tag) {
        let Some(identity) = tag.identity.clone() else {
            if !tag.is_tombstone() {
                self.loose.push(tag);
            }
            return;
        };

        let existing = self.keyed.get(&identity.key).and_then(|slot| slot.last());
        let action = collision(existing, &tag, &identity);
        trace!(key = %identity.key, ?action, "fold");

        match action {
            Collision::Insert => {
                if !tag.is_tombstone() {
                    self.keyed.insert(identity.key, vec![tag]);
                }
            }
            Collision::Remove => {
                debug!(key = %identity.key, "tombstone removes earlier tag");
                self.keyed.shift_remove(&identity.key);
            }
            Collision::Merge => {
                if let Some(existing) = self
                    .keyed
                    .get_mut(&identity.key)
                    .and_then(|slot| slot.last_mut())
                {
                    merge_into(existing, tag);
                }
            }
            Collision::Accumulate => {
                if let Some(slot) = self.keyed.get_mut(&identity.key) {
                    slot.push(tag);
                }
            }
            Collision::Restart | Collision::Replace => {
                self.keyed.insert(identity.key, vec![tag]);
            }
            Collision::Variant => self.insert_variant(identity.key, tag),
            Collision::Drop => {
                trace!(key = %identity.key, "lower-priority duplicate dropped");
            }
        }
    }

    /// Park a body-sharing tag under the first free `key#n` sub-key, or
    /// replace a variant with identical props.
    fn insert_variant(&mut self, key: String, mut tag: Tag) {
        for n in 1.. {
            let sub_key = format!("{key}#{n}");
            let same_props = match self.keyed.get(&sub_key).and_then(|slot| slot.last()) {
                None => true,
                Some(existing) => existing.props == tag.props,
            };
            if same_props {
                if let Some(identity) = &mut tag.identity {
                    identity.key.clone_from(&sub_key);
                }
                self.keyed.insert(sub_key, vec![tag]);
                return;
            }
        }
    }

    fn finish(self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.keyed.into_values().flatten().collect();
        tags.extend(self.loose);
        tags.sort_by_key(Tag::sort_key);
        tags
    }
}

/// Merge `incoming` into `existing`: class lists union, style declarations
/// concatenate, other props are overwritten. The earlier tag keeps its place
/// in the order.
fn merge_into(existing: &mut Tag, incoming: Tag) {
    for (name, value) in incoming.props {
        let merged = match (existing.props.get_mut(&name), &value) {
            (Some(PropValue::Class(into)), PropValue::Class(from)) => {
                into.union(from);
                true
            }
            (Some(PropValue::Style(into)), PropValue::Style(from)) => {
                into.concat(from);
                true
            }
            _ => false,
        };
        if !merged {
            existing.props.insert(name, value);
        }
    }
    if incoming.content.is_some() {
        existing.content = incoming.content;
    }
    if incoming.template.is_some() {
        existing.template = incoming.template;
    }
}

/// Move tags with `before:`/`after:` priorities next to their target. A
/// missing target leaves the tag at its weight position.
fn apply_relative_priorities(tags: &mut Vec<Tag>) {
    let is_relative = |t: &Tag| {
        matches!(
            t.priority,
            Some(Priority::Before { .. } | Priority::After { .. })
        )
    };
    if !tags.iter().any(is_relative) {
        return;
    }

    let (movers, rest): (Vec<Tag>, Vec<Tag>) =
        std::mem::take(tags).into_iter().partition(is_relative);
    *tags = rest;

    for mover in movers {
        let (kind, key, after) = match &mover.priority {
            Some(Priority::Before { kind, key }) => (*kind, key.as_str(), false),
            Some(Priority::After { kind, key }) => (*kind, key.as_str(), true),
            _ => continue,
        };
        let target = tags
            .iter()
            .position(|t| t.kind == kind && t.key.as_deref() == Some(key));
        let pos = match target {
            Some(pos) if after => pos + 1,
            Some(pos) => pos,
            None => {
                debug!(kind = %kind, key, "relative priority target not found");
                let sort_key = mover.sort_key();
                tags.partition_point(|t| t.sort_key() <= sort_key)
            }
        };
        tags.insert(pos, mover);
    }
}

/// Apply the winning title template to the winning title. The template tag
/// itself never survives.
fn apply_title_template(tags: &mut Vec<Tag>) {
    let Some(pos) = tags.iter().position(|t| t.kind == TagKind::TitleTemplate) else {
        return;
    };
    let template_tag = tags.remove(pos);
    let Some(template) = &template_tag.template else {
        return;
    };

    match tags.iter().position(|t| t.kind == TagKind::Title) {
        Some(i) => {
            let current = tags[i].content_str().map(str::to_owned);
            match template.apply(current.as_deref()) {
                Some(title) => tags[i].content = Some(TagContent::Text(title)),
                None => {
                    debug!("title template suppressed the title");
                    tags.remove(i);
                }
            }
        }
        None => {
            let Some(title) = template.apply(None) else {
                return;
            };
            let title = title.trim();
            if title.is_empty() {
                return;
            }
            let mut tag = Tag::new(TagKind::Title, template_tag.entry, template_tag.index);
            tag.content = Some(TagContent::Text(title.to_owned()));
            tag.position = template_tag.position;
            tag.identity = Some(Identity {
                key: TagKind::Title.as_str().to_owned(),
                source: KeySource::Singleton,
            });
            tag.weight = template_tag.weight;
            let sort_key = tag.sort_key();
            let at = tags.partition_point(|t| t.sort_key() <= sort_key);
            tags.insert(at, tag);
        }
    }
}

const DEFAULT_SEPARATOR: &str = "|";

/// Substitute `%name` tokens in the title and in meta `content`.
fn apply_template_params(tags: &mut Vec<Tag>) {
    let mut params: IndexMap<String, String> = IndexMap::new();
    if let Some(pos) = tags.iter().position(|t| t.kind == TagKind::TemplateParams) {
        let tag = tags.remove(pos);
        for (name, value) in tag.props {
            if let Some(text) = value.render() {
                params.insert(name, text);
            }
        }
    }
    let separator = params
        .entry("separator".to_owned())
        .or_insert_with(|| DEFAULT_SEPARATOR.to_owned())
        .clone();

    for tag in tags.iter_mut() {
        match tag.kind {
            TagKind::Title => {
                let Some(content) = &mut tag.content else {
                    continue;
                };
                let text = content.as_mut_string();
                if let Some(replaced) = substitute(text, &params) {
                    *text = tidy_separators(&replaced, &separator);
                }
            }
            TagKind::Meta => {
                if let Some(PropValue::Str(text)) = tag.props.get_mut("content")
                    && let Some(replaced) = substitute(text, &params)
                {
                    *text = replaced;
                }
            }
            _ => {}
        }
    }
}

/// Replace known `%name` tokens. Unknown tokens stay verbatim. `None` when
/// nothing was replaced.
fn substitute(text: &str, params: &IndexMap<String, String>) -> Option<String> {
    if !text.contains('%') {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut replaced = false;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let token_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        let name = after[..token_len].trim_end_matches('.');
        match params.get(name).filter(|_| !name.is_empty()) {
            Some(value) => {
                out.push_str(value);
                rest = &after[name.len()..];
                replaced = true;
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    replaced.then_some(out)
}

/// Drop separators left dangling by empty params: leading, trailing or
/// doubled ones.
fn tidy_separators(title: &str, separator: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in title.split_whitespace() {
        if word == separator && words.last().is_none_or(|last| *last == separator) {
            continue;
        }
        words.push(word);
    }
    while words.last() == Some(&separator) {
        words.pop();
    }
    words.join(" ")
}

/// Drop what must not render and escape script bodies.
fn sanitize(tags: Vec<Tag>) -> Vec<Tag> {
    tags.into_iter()
        .filter_map(|mut tag| {
            match tag.kind {
                TagKind::TitleTemplate | TagKind::TemplateParams => return None,
                TagKind::HtmlAttrs | TagKind::BodyAttrs => return Some(tag),
                _ => {}
            }
            let empty_body = tag.content_str().is_none_or(str::is_empty);
            if tag.props.is_empty() && empty_body {
                trace!(kind = %tag.kind, "dropping empty tag");
                return None;
            }
            if tag.kind == TagKind::Title && empty_body {
                return None;
            }
            if tag.kind == TagKind::Meta
                && !["content", "http-equiv", "charset"]
                    .iter()
                    .any(|attr| tag.props.contains_key(*attr))
            {
                debug!("dropping meta without content");
                return None;
            }
            if tag.kind == TagKind::Script {
                let json = tag
                    .prop_str("type")
                    .is_some_and(|t| t.ends_with("json") || t == "speculationrules");
                if let Some(content) = &mut tag.content {
                    let body = content.as_mut_string();
                    *body = escape_script_body(body, json);
                }
            }
            Some(tag)
        })
        .collect()
}

/// Keep a script body from closing its element early. JSON bodies get every
/// `<` escaped, executable ones only `</script`.
pub(crate) fn escape_script_body(body: &str, json: bool) -> String {
    if json {
        return body.replace('<', "\\u003C");
    }
    const CLOSE: &[u8] = b"</script";
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len());
    let mut start = 0;
    let mut i = 0;
    while i + CLOSE.len() <= bytes.len() {
        if bytes[i..i + CLOSE.len()].eq_ignore_ascii_case(CLOSE) {
            out.push_str(&body[start..i]);
            out.push_str("<\\/");
            start = i + 2;
            i += CLOSE.len();
        } else {
            i += 1;
        }
    }
    out.push_str(&body[start..]);
    out
}
