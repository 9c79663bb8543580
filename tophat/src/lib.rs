//! Document head manager.
//!
//! tophat provides:
//! - **Entry store**: call sites push, patch and dispose partial head descriptions
//! - **Resolution**: normalization, deduplication and browser-friendly ordering
//!   of every live entry's tags into one list
//! - **SSR**: HTML string rendering with hydration markers
//! - **Reconciliation**: minimal, reversible edits to a live document
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tophat::{DomRenderer, Head, SsrOptions, arena_dom, render_ssr_head};
//!
//! let mut head = Head::server();
//! head.push(json!({
//!     "title": "Home",
//!     "titleTemplate": "%s | Acme",
//!     "meta": [{ "charset": "utf-8" }],
//! }));
//!
//! let ssr = render_ssr_head(&mut head, &SsrOptions::new().no_hydration_markers());
//! assert_eq!(ssr.head_tags, r#"<meta charset="utf-8"><title>Home | Acme</title>"#);
//!
//! // Or apply the same head to a document
//! let mut doc = arena_dom::parse("<html><head></head><body></body></html>");
//! let mut renderer = DomRenderer::new();
//! renderer.render(&mut doc, &mut head).unwrap();
//! assert_eq!(doc.head_html(), r#"<meta charset="utf-8"><title>Home | Acme</title>"#);
//! ```

mod tracing_macros;

pub mod arena_dom;
pub mod dom;
mod error;
mod head;
pub mod identity;
mod normalize;
mod resolve;
pub mod ssr;
mod tag;
mod value;

pub use dom::{DomRenderer, DomTarget, RenderStats};
pub use error::HeadError;
pub use head::{EntryId, EntryOptions, Head, HeadOptions, RenderMode};
pub use normalize::normalize;
pub use resolve::resolve;
pub use ssr::{SsrHead, SsrOptions, render_ssr_head};
pub use tag::{
    ClassList, DuplicateStrategy, Identity, KeySource, Priority, PriorityAlias, PropValue,
    StyleMap, Tag, TagContent, TagKind, TagPosition, TitleTemplate,
};
pub use value::{Handler, HeadInput, Object, Thunk, TitleFn, Value};
