//! Resolution of identifier columns into human-readable labels.
//!
//! A column whose metadata carries a `meta_lookup` specification shows labels
//! instead of its raw values. The labels either live inline in the
//! specification, or in another view of the data service. In the latter case
//! only the keys observed in the current page are looked up.

use eyre::Result;
use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    cache::LazyCache,
    column::ColumnDescriptor,
    fetch::PagedDatasetFetcher,
    query::{clean_col_name, geo_prefix_key, QueryDescriptor},
    value::{display_string, is_empty, lookup_key, parse_int_prefix, unwrap_atom, RawRow},
    Map,
};

/// How raw values are normalized before being used as lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueMapping {
    /// Keeps the leading integer only, so `"1335DR"` matches `1335`.
    #[serde(rename = "parseInt")]
    ParseInt,
    #[serde(rename = "none", other)]
    None,
}

impl Default for ValueMapping {
    fn default() -> Self {
        ValueMapping::None
    }
}

impl ValueMapping {
    /// Maps a single raw key. Keys that do not survive the mapping yield
    /// `None`.
    pub fn apply(&self, key: &JsonValue) -> Option<JsonValue> {
        let key = unwrap_atom(key);
        let mapped = match self {
            Self::None => key.clone(),
            Self::ParseInt => match key {
                JsonValue::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                    .map(JsonValue::from)?,
                JsonValue::String(s) => JsonValue::from(parse_int_prefix(s)?),
                _ => return None,
            },
        };
        match &mapped {
            JsonValue::Null => None,
            JsonValue::String(s) if s.is_empty() => None,
            _ => Some(mapped),
        }
    }
}

/// A lookup whose labels live in another view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteLookupSpec {
    /// The attributes to fetch from the lookup view.
    pub attributes: Vec<String>,
    #[serde(rename = "view_id", deserialize_with = "lenient_view_id")]
    pub view_id: i64,
    pub key_attribute: String,
    #[serde(default = "default_value_attribute")]
    pub value_attribute: String,
    /// The lookup view's attribute to filter on, if it differs from the
    /// column's own name.
    pub filter_attribute: Option<String>,
    pub format_values_to_map: ValueMapping,
    pub keep_id: bool,
    /// When set, the lookup is restricted to the current geography.
    pub geo_attribute: Option<String>,
    pub filter: Map<String, JsonValue>,
    pub aggregated_len: bool,
}

fn default_value_attribute() -> String {
    "name".to_string()
}

fn lenient_view_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => n.as_i64().unwrap_or_default(),
        JsonValue::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

impl RemoteLookupSpec {
    /// The attributes to request: the declared ones plus the key and value
    /// attributes the lookup depends on.
    pub fn requested_attributes(&self) -> Vec<String> {
        let mut attributes = self.attributes.clone();
        for attr in [&self.key_attribute, &self.value_attribute] {
            if !attr.is_empty() && !attributes.contains(attr) {
                attributes.push(attr.clone());
            }
        }
        attributes
    }

    /// The query against the lookup view for exactly the given keys.
    pub fn descriptor(
        &self,
        column_name: &str,
        keys: Vec<JsonValue>,
        geoid: Option<&str>,
    ) -> QueryDescriptor {
        let mut descriptor = QueryDescriptor {
            aggregated_len: self.aggregated_len,
            ..Default::default()
        };
        if !keys.is_empty() {
            let attr = self
                .filter_attribute
                .as_deref()
                .unwrap_or_else(|| clean_col_name(column_name));
            descriptor.add_filter(attr, keys);
        }
        if let (Some(geo_attribute), Some(geoid)) = (self.geo_attribute.as_deref(), geoid) {
            if !geoid.is_empty() {
                descriptor.add_filter(
                    geo_prefix_key(geo_attribute, geoid.len()),
                    vec![JsonValue::from(geoid)],
                );
            }
        }
        for (key, value) in &self.filter {
            let values = match value {
                JsonValue::Array(values) => values.clone(),
                v => vec![v.clone()],
            };
            descriptor.add_filter(key.as_str(), values);
        }
        descriptor
    }
}

/// A parsed `meta_lookup` specification.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaLookupSpec {
    /// The specification itself maps raw keys to labels.
    Inline {
        labels: Map<String, String>,
        keep_id: bool,
    },
    Remote(RemoteLookupSpec),
}

impl Default for MetaLookupSpec {
    fn default() -> Self {
        MetaLookupSpec::Inline {
            labels: Map::new(),
            keep_id: false,
        }
    }
}

impl MetaLookupSpec {
    /// Parses a column's `meta_lookup` JSON. Malformed input yields an empty
    /// inline lookup, under which values are left as they are.
    pub fn parse(raw: &str) -> Self {
        let value: JsonValue = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring malformed meta lookup: {}", e);
                return Self::default();
            }
        };
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                warn!("Ignoring meta lookup that is not an object: {}", raw);
                return Self::default();
            }
        };
        if obj.get("view_id").map_or(false, |v| !v.is_null()) {
            return match serde_json::from_value::<RemoteLookupSpec>(value.clone()) {
                Ok(spec) => Self::Remote(spec),
                Err(e) => {
                    warn!("Ignoring malformed meta lookup: {}", e);
                    Self::default()
                }
            };
        }
        let keep_id = obj.get("keepId").and_then(JsonValue::as_bool).unwrap_or(false);
        let labels = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "keepId")
            .filter_map(|(k, v)| match v {
                JsonValue::String(_) | JsonValue::Number(_) => Some((k.clone(), display_string(v))),
                _ => None,
            })
            .collect();
        Self::Inline { labels, keep_id }
    }

    pub fn keep_id(&self) -> bool {
        match self {
            Self::Inline { keep_id, .. } => *keep_id,
            Self::Remote(spec) => spec.keep_id,
        }
    }
}

/// Label records of one lookup column, keyed by the string form of the key
/// attribute.
pub type LabelMap = Map<String, Map<String, JsonValue>>;

/// Fetched label records, per row-data accessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaLookupTable(Map<String, LabelMap>);

impl MetaLookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, accessor: S, labels: LabelMap) {
        self.0.insert(accessor.into(), labels);
    }

    pub fn get(&self, accessor: &str) -> Option<&LabelMap> {
        self.0.get(accessor)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Collects the distinct keys present in a page of rows for the given
/// accessor, in the order they are first seen.
///
/// Empty cells are skipped, comma-joined text and arrays contribute each of
/// their parts, and every key is passed through `mapping`.
pub fn collect_distinct_keys(rows: &[RawRow], accessor: &str, mapping: ValueMapping) -> Vec<JsonValue> {
    let mut keys: Vec<JsonValue> = Vec::new();
    let mut push = |key: &JsonValue| {
        if let Some(key) = mapping.apply(key) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    };
    for row in rows {
        let cell = row.get(accessor);
        if is_empty(cell) {
            continue;
        }
        match cell.map(unwrap_atom) {
            Some(JsonValue::String(s)) if s.contains(',') => {
                for part in s.split(',') {
                    push(&JsonValue::from(part.trim()));
                }
            }
            Some(JsonValue::Array(parts)) => parts.iter().for_each(&mut push),
            Some(v) => push(v),
            None => {}
        }
    }
    keys
}

/// Fetches the labels of every remote lookup column among `columns`.
pub struct MetaLookupResolver<'c, C: ?Sized> {
    fetcher: PagedDatasetFetcher<'c, C>,
    geoid: Option<&'c str>,
}

impl<'c, C: LazyCache + ?Sized> MetaLookupResolver<'c, C> {
    pub fn new(fetcher: PagedDatasetFetcher<'c, C>) -> Self {
        Self { fetcher, geoid: None }
    }

    /// The geography the view is restricted to, applied to lookups that
    /// declare a geography attribute.
    pub fn geoid(mut self, geoid: Option<&'c str>) -> Self {
        self.geoid = geoid;
        self
    }

    pub fn resolve(&self, columns: &[ColumnDescriptor], rows: &[RawRow]) -> Result<MetaLookupTable> {
        let mut table = MetaLookupTable::new();
        for column in columns.iter().filter(|c| c.has_meta_lookup()) {
            let spec = match column.meta_lookup.as_deref().map(MetaLookupSpec::parse) {
                Some(MetaLookupSpec::Remote(spec)) => spec,
                _ => continue,
            };
            let keys = collect_distinct_keys(rows, &column.accessor, spec.format_values_to_map);
            if keys.is_empty() {
                debug!("No keys to look up for column {}", column.name);
                continue;
            }
            let descriptor = spec.descriptor(&column.name, keys, self.geoid);
            let attributes = spec.requested_attributes();
            let page = self
                .fetcher
                .fetch_all(spec.view_id, &descriptor, &attributes[..])?;
            if page.is_empty() {
                debug!("Lookup view {} has no labels for column {}", spec.view_id, column.name);
                continue;
            }
            let labels = page
                .rows
                .into_iter()
                .filter_map(|record| {
                    let key = record.get(&spec.key_attribute).and_then(lookup_key)?;
                    let attrs = spec
                        .attributes
                        .iter()
                        .chain([&spec.key_attribute, &spec.value_attribute])
                        .filter_map(|a| record.get(a).map(|v| (a.clone(), v.clone())))
                        .collect();
                    Some((key, attrs))
                })
                .collect::<LabelMap>();
            debug!("Resolved {} label(s) for column {}", labels.len(), column.name);
            table.insert(column.accessor.clone(), labels);
        }
        Ok(table)
    }
}
