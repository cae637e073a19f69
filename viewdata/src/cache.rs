//! The path-addressed lazy cache that all data is requested through.
//!
//! Paths are sequences of literal keys, optionally ending in a range of
//! indices and/or a list of attributes to project. A request for a path
//! resolves once the remote service has answered; re-requesting a path that
//! is already cached does not repeat any remote work.

use std::{cell::RefCell, path::Path};

use eyre::{Result, WrapErr};
use log::trace;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::data::load_from_file;

/// A single segment of a cache path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    /// An inclusive range of indices.
    Range { from: usize, to: usize },
    /// A set of attributes to project.
    Keys(Vec<String>),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{}", k),
            Self::Index(i) => write!(f, "{}", i),
            Self::Range { from, to } => write!(f, "{{from:{},to:{}}}", from, to),
            Self::Keys(keys) => write!(f, "[{}]", keys.join(",")),
        }
    }
}

/// A full cache path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CachePath(Vec<PathSegment>);

impl CachePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key<S: ToString>(mut self, key: S) -> Self {
        self.0.push(PathSegment::Key(key.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.0.push(PathSegment::Range { from, to });
        self
    }

    pub fn keys<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.0.push(PathSegment::Keys(
            keys.iter().map(|k| k.as_ref().to_string()).collect(),
        ));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl std::fmt::Display for CachePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
        write!(f, "{}", parts.join("/"))
    }
}

/// The cache protocol consumed by the engine.
///
/// The value returned for a path is the value stored at its literal prefix,
/// expanded by any trailing range or attribute segments into an object keyed
/// by index or attribute name. Paths that resolve to nothing yield
/// [`JsonValue::Null`].
pub trait LazyCache {
    fn get(&self, path: &CachePath) -> Result<JsonValue>;

    /// Like [`LazyCache::get`], for requests large enough that an
    /// implementation may want to split them into several round trips.
    fn chunk(&self, path: &CachePath) -> Result<JsonValue> {
        self.get(path)
    }
}

/// A cache whose entire content is held in memory as a JSON tree.
///
/// Every request is recorded, which makes it suitable for inspecting what a
/// resolution cycle asked for.
#[derive(Debug, Default)]
pub struct MemoryCache {
    root: JsonValue,
    requests: RefCell<Vec<CachePath>>,
}

impl MemoryCache {
    pub fn new(root: JsonValue) -> Self {
        Self {
            root,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Load a cache snapshot from a JSON or YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let root: JsonValue = load_from_file(path)
            .wrap_err_with(|| format!("failed to load cache snapshot from {}", path.display()))?;
        Ok(Self::new(root))
    }

    /// Stores a value at a literal path, creating intermediate objects as
    /// needed. Range and attribute segments are ignored.
    pub fn insert(&mut self, path: &CachePath, value: JsonValue) {
        let mut node = &mut self.root;
        for segment in path.segments() {
            let key = match segment {
                PathSegment::Key(k) => k.clone(),
                PathSegment::Index(i) => i.to_string(),
                _ => continue,
            };
            if !node.is_object() {
                *node = JsonValue::Object(JsonMap::new());
            }
            node = &mut node[key.as_str()];
        }
        *node = value;
    }

    /// All paths requested so far, in request order.
    pub fn requests(&self) -> Vec<CachePath> {
        self.requests.borrow().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
    }
}

impl LazyCache for MemoryCache {
    fn get(&self, path: &CachePath) -> Result<JsonValue> {
        trace!("cache get {}", path);
        self.requests.borrow_mut().push(path.clone());
        Ok(resolve(&self.root, path.segments()))
    }
}

fn resolve(node: &JsonValue, segments: &[PathSegment]) -> JsonValue {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return node.clone(),
    };
    match first {
        PathSegment::Key(k) => child(node, k)
            .map(|c| resolve(c, rest))
            .unwrap_or(JsonValue::Null),
        PathSegment::Index(i) => child(node, &i.to_string())
            .map(|c| resolve(c, rest))
            .unwrap_or(JsonValue::Null),
        PathSegment::Range { from, to } => {
            let mut out = JsonMap::new();
            for i in *from..=*to {
                let key = i.to_string();
                if let Some(c) = child(node, &key) {
                    out.insert(key, resolve(c, rest));
                }
            }
            JsonValue::Object(out)
        }
        PathSegment::Keys(keys) => {
            let mut out = JsonMap::new();
            for k in keys {
                if let Some(c) = child(node, k) {
                    out.insert(k.clone(), resolve(c, rest));
                }
            }
            JsonValue::Object(out)
        }
    }
}

fn child<'a>(node: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    node.as_object().and_then(|obj| obj.get(key))
}
