//! Paginated retrieval of query results through the lazy cache.

use std::str::FromStr;

use eyre::Result;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{
    cache::{CachePath, LazyCache},
    datetime::Timestamp,
    query::QueryDescriptor,
    value::{as_f64, unwrap_atom, RawRow},
    EngineConfig, Error,
};

/// The attributes requested for a version's provenance.
pub const ATTRIBUTION_ATTRIBUTES: &[&str] = &["source_id", "view_id", "version", "_modified_timestamp"];

/// A page of fetched rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// The length reported by the service, before capping.
    pub length: usize,
    pub rows: Vec<RawRow>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Provenance of a source version, displayed alongside its data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attribution {
    pub source_id: Option<i64>,
    pub view_id: Option<i64>,
    pub version: Option<String>,
    #[serde(rename = "_modified_timestamp")]
    pub modified: Option<Timestamp>,
}

impl Attribution {
    fn from_value(value: &JsonValue) -> Self {
        let field = |name: &str| value.get(name).map(unwrap_atom);
        let id = |name: &str| match field(name) {
            Some(JsonValue::Number(n)) => n.as_i64(),
            Some(JsonValue::String(s)) => s.parse().ok(),
            _ => None,
        };
        let version = match field("version") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let modified = match field("_modified_timestamp") {
            Some(JsonValue::String(s)) => match Timestamp::from_str(s) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!("Ignoring attribution timestamp: {}", e);
                    None
                }
            },
            _ => None,
        };
        Self {
            source_id: id("source_id"),
            view_id: id("view_id"),
            version,
            modified,
        }
    }
}

/// Resolves query descriptors into rows of a given view.
pub struct PagedDatasetFetcher<'c, C: ?Sized> {
    cache: &'c C,
    config: &'c EngineConfig,
    page_cap: usize,
}

impl<'c, C: LazyCache + ?Sized> PagedDatasetFetcher<'c, C> {
    pub fn new(cache: &'c C, config: &'c EngineConfig) -> Self {
        Self {
            cache,
            config,
            page_cap: config.page_cap,
        }
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap;
        self
    }

    pub fn page_cap(&self) -> usize {
        self.page_cap
    }

    /// The path under which results for the given descriptor are cached.
    pub fn options_path(&self, view_id: i64, descriptor: &QueryDescriptor) -> Result<CachePath> {
        Ok(CachePath::new()
            .key(&self.config.path_root)
            .key(&self.config.env)
            .key("viewsbyId")
            .key(view_id)
            .key("options")
            .key(descriptor.to_json()?))
    }

    pub fn length_path(&self, view_id: i64, descriptor: &QueryDescriptor) -> Result<CachePath> {
        Ok(self.options_path(view_id, descriptor)?.key("length"))
    }

    pub fn data_path(&self, view_id: i64, descriptor: &QueryDescriptor) -> Result<CachePath> {
        Ok(self.options_path(view_id, descriptor)?.key("databyIndex"))
    }

    pub fn attribution_path(&self, view_id: i64) -> CachePath {
        CachePath::new()
            .key(&self.config.path_root)
            .key(&self.config.env)
            .key("views")
            .key("byId")
            .key(view_id)
            .key("attributes")
            .keys(ATTRIBUTION_ATTRIBUTES)
    }

    /// The number of rows the service reports for a descriptor. An absent
    /// length counts as zero.
    pub fn length(&self, view_id: i64, descriptor: &QueryDescriptor) -> Result<usize> {
        let path = self.length_path(view_id, descriptor)?;
        let value = self.cache.get(&path)?;
        match unwrap_atom(&value) {
            JsonValue::Null => Ok(0),
            v => as_f64(v)
                .map(|n| n.max(0.0) as usize)
                .ok_or_else(|| Error::UnexpectedCacheValue(path.to_string(), "a length").into()),
        }
    }

    /// Fetches the first page of rows for a descriptor, restricted to the
    /// given attributes.
    pub fn fetch<S: AsRef<str>>(
        &self,
        view_id: i64,
        descriptor: &QueryDescriptor,
        attributes: &[S],
    ) -> Result<Page> {
        let length = self.length(view_id, descriptor)?;
        let capped = length.min(self.page_cap);
        debug!(
            "View {} reports {} row(s), fetching {}",
            view_id, length, capped
        );
        if capped == 0 {
            return Ok(Page { length, rows: Vec::new() });
        }
        let path = self.data_path(view_id, descriptor)?.range(0, capped - 1).keys(attributes);
        let rows = rows_by_index(&self.cache.get(&path)?);
        Ok(Page { length, rows })
    }

    /// Fetches every row for a descriptor, regardless of the page cap. Used
    /// for lookup tables, whose size is bounded by the keys they filter on.
    pub fn fetch_all<S: AsRef<str>>(
        &self,
        view_id: i64,
        descriptor: &QueryDescriptor,
        attributes: &[S],
    ) -> Result<Page> {
        let length = self.length(view_id, descriptor)?;
        if length == 0 {
            return Ok(Page::default());
        }
        let path = self.data_path(view_id, descriptor)?.range(0, length - 1).keys(attributes);
        let rows = rows_by_index(&self.cache.chunk(&path)?);
        debug!("Fetched {} lookup row(s) from view {}", rows.len(), view_id);
        Ok(Page { length, rows })
    }

    pub fn attribution(&self, view_id: i64) -> Result<Attribution> {
        let path = self.attribution_path(view_id);
        Ok(Attribution::from_value(&self.cache.get(&path)?))
    }
}

// Ranged responses are objects keyed by row index.
fn rows_by_index(value: &JsonValue) -> Vec<RawRow> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Vec::new(),
    };
    let mut indexed = obj
        .iter()
        .filter_map(|(k, v)| match (k.parse::<usize>(), v) {
            (Ok(i), JsonValue::Object(row)) => Some((i, row)),
            _ => {
                warn!("Skipping malformed row at index {}", k);
                None
            }
        })
        .collect::<Vec<_>>();
    indexed.sort_by_key(|(i, _)| *i);
    indexed
        .into_iter()
        .map(|(_, row)| row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .collect()
}
