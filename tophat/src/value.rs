//! Raw, unnormalized head input.
//!
//! Call sites describe the tags they want with a small closed set of value
//! shapes. Nothing here is interpreted yet: the normalizer turns a
//! [`HeadInput`] into canonical [`Tag`](crate::Tag) records.
//!
//! Input is usually authored with `serde_json::json!` and converted, with
//! callables spliced in where needed:
//!
//! ```rust
//! use serde_json::json;
//! use tophat::{HeadInput, Value};
//!
//! let input = HeadInput::from(json!({
//!     "title": "Home",
//!     "meta": [{ "name": "description", "content": "Landing page" }],
//! }))
//! .with("titleTemplate", Value::title_fn(|title| title.map(|t| format!("{t} | Acme"))));
//! assert_eq!(input.len(), 3);
//! ```

use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// Ordered object payload.
pub type Object = IndexMap<String, Value>;

/// Thunks returning thunks are followed at most this many times.
const MAX_THUNK_DEPTH: usize = 8;

/// A zero-argument callable producing the current value of a field.
///
/// Invoked every time the owning entry is normalized, never memoized across
/// normalization runs.
#[derive(Clone)]
pub struct Thunk(Rc<dyn Fn() -> Value>);

impl Thunk {
    pub fn new(f: impl Fn() -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Thunk(..)")
    }
}

/// A title template callable: receives the current title (if any) and
/// returns the final title, or `None` to suppress the title tag.
#[derive(Clone)]
pub struct TitleFn(Rc<dyn Fn(Option<&str>) -> Option<String>>);

impl TitleFn {
    pub fn new(f: impl Fn(Option<&str>) -> Option<String> + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, title: Option<&str>) -> Option<String> {
        (self.0)(title)
    }
}

impl fmt::Debug for TitleFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TitleFn(..)")
    }
}

impl PartialEq for TitleFn {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An event callback bound to an `on*` prop.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn()>);

impl Handler {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// One raw input leaf or branch.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    Thunk(Thunk),
    TitleFn(TitleFn),
    Handler(Handler),
}

impl Value {
    /// Wrap a closure producing the field's current value.
    pub fn thunk(f: impl Fn() -> Value + 'static) -> Self {
        Value::Thunk(Thunk::new(f))
    }

    /// Wrap a title template closure.
    pub fn title_fn(f: impl Fn(Option<&str>) -> Option<String> + 'static) -> Self {
        Value::TitleFn(TitleFn::new(f))
    }

    /// Wrap an event callback.
    pub fn handler(f: impl Fn() + 'static) -> Self {
        Value::Handler(Handler::new(f))
    }

    /// Build an object from key/value pairs.
    pub fn object<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Insert a field into an object value. Non-objects are returned unchanged.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// `null`, `false` and the empty string.
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Null | Value::Bool(false) => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Invoke thunks until a plain value comes out.
    ///
    /// Chains deeper than [`MAX_THUNK_DEPTH`] resolve to `Null`.
    pub(crate) fn resolved(&self) -> Value {
        let mut current = self.clone();
        for _ in 0..MAX_THUNK_DEPTH {
            match current {
                Value::Thunk(thunk) => current = thunk.call(),
                other => return other,
            }
        }
        Value::Null
    }

    /// Scalar rendering used for attribute values and text bodies.
    pub(crate) fn scalar_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// JSON projection used when an object is supplied as a tag body.
    /// Callables have no JSON form and become `null`.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::TitleFn(_) | Value::Handler(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if is_whole(*n) {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Thunk(_) => self.resolved().to_json(),
        }
    }
}

fn is_whole(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15
}

/// Whole numbers render without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if is_whole(n) {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(map: Object) -> Self {
        Value::Object(map)
    }
}

impl From<Thunk> for Value {
    fn from(thunk: Thunk) -> Self {
        Value::Thunk(thunk)
    }
}

impl From<TitleFn> for Value {
    fn from(f: TitleFn) -> Self {
        Value::TitleFn(f)
    }
}

impl From<Handler> for Value {
    fn from(handler: Handler) -> Self {
        Value::Handler(handler)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// One call site's partial head description, keyed by tag kind
/// (`title`, `meta`, `htmlAttrs`, ...).
#[derive(Debug, Clone, Default)]
pub struct HeadInput {
    fields: IndexMap<String, Value>,
}

impl HeadInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a kind's value, replacing any previous value for that kind.
    pub fn with(mut self, kind: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(kind.into(), value.into());
        self
    }

    pub fn insert(&mut self, kind: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(kind.into(), value.into());
    }

    pub fn get(&self, kind: &str) -> Option<&Value> {
        self.fields.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Object> for HeadInput {
    fn from(fields: Object) -> Self {
        Self { fields }
    }
}

impl From<Value> for HeadInput {
    /// Anything but an object yields an empty input.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }
}

impl From<serde_json::Value> for HeadInput {
    fn from(json: serde_json::Value) -> Self {
        Value::from(json).into()
    }
}
