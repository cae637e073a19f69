//! The user-editable view specification, as persisted by the hosting CMS.

use std::str::FromStr;

use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    column::{Align, LinkSpec},
    hash::sha256,
    Error, EngineConfig, Formatter, Map,
};

/// Whether an additional variable restricts rows to, or removes rows with,
/// its default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Include,
    Exclude,
    #[serde(other)]
    Ignore,
}

/// A filter the editor attaches to a view without it being a visible column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalVariable {
    pub name: String,
    pub action: FilterAction,
    #[serde(default)]
    pub default_value: JsonValue,
}

/// Everything a view specifies about a single column, gathered from the
/// per-column maps of a [`ViewSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnOverride {
    pub accessor: Option<String>,
    pub header: Option<String>,
    pub align: Option<Align>,
    pub width: Option<String>,
    pub link: Option<LinkSpec>,
    pub filter: Option<JsonValue>,
    pub format: Option<Formatter>,
    pub ext_filter: bool,
    pub open_out: bool,
}

/// The full, user-editable state of a view.
///
/// Every field tolerates being absent or of the wrong shape in persisted
/// JSON: such fields take their default value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    #[serde(default, deserialize_with = "lenient_id")]
    pub data_source: Option<i64>,
    /// The view ID of the selected version.
    #[serde(default, deserialize_with = "lenient_id")]
    pub version: Option<i64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub geoid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub geo_attribute: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub disaster_number: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub visible_cols: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub hidden_cols: Vec<String>,
    /// Accessor expressions replacing a column's plain name, e.g.
    /// `sum(loss) AS loss`.
    #[serde(rename = "fn", default, deserialize_with = "lenient")]
    pub accessor_overrides: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub group_by: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub not_null: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub data_size: Option<usize>,
    #[serde(default, deserialize_with = "lenient")]
    pub additional_variables: Vec<AdditionalVariable>,

    #[serde(default, deserialize_with = "lenient")]
    pub filters: Map<String, JsonValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub filter_value: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ext_filter_cols: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ext_filter_values: Map<String, Vec<JsonValue>>,
    #[serde(default, deserialize_with = "lenient")]
    pub open_out_cols: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub show_total: Vec<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub page_size: Option<usize>,
    /// Sort direction (`asc` or `desc`) keyed by column. Only the first
    /// entry is used.
    #[serde(default, deserialize_with = "lenient")]
    pub sort_by: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub custom_col_name: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub link_cols: Map<String, LinkSpec>,
    #[serde(default, deserialize_with = "lenient")]
    pub col_justify: Map<String, Align>,
    #[serde(default, deserialize_with = "lenient")]
    pub col_sizes: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub format_fn: Map<String, String>,
    #[serde(default, deserialize_with = "lenient")]
    pub striped: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub ext_filters_default_open: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub show_csv_download: bool,

    /// Keys this engine does not interpret, kept so that persisting a spec
    /// does not drop them.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

// The subset of a spec that determines what is requested from the cache.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchKey<'a> {
    data_source: Option<i64>,
    version: Option<i64>,
    geoid: Option<&'a str>,
    geo_attribute: Option<&'a str>,
    disaster_number: Option<&'a str>,
    visible_cols: &'a [String],
    accessor_overrides: &'a Map<String, String>,
    group_by: &'a [String],
    not_null: &'a [String],
    data_size: Option<usize>,
    additional_variables: &'a [AdditionalVariable],
}

impl ViewSpec {
    /// Parses a persisted spec. Empty input yields the default spec, and
    /// malformed input is treated as `{}`.
    pub fn from_persisted(value: Option<&str>) -> Self {
        let value = match value.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return Self::default(),
        };
        match serde_json::from_str(value) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Ignoring malformed persisted view spec: {}", e);
                Self::default()
            }
        }
    }

    /// Serializes this spec for persistence.
    pub fn to_persisted(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// The expression under which the given column is requested and keyed
    /// in fetched rows.
    pub fn accessor<'a>(&'a self, name: &'a str) -> &'a str {
        self.accessor_overrides
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// The visible columns mapped through their accessor overrides, in
    /// display order.
    pub fn columns_to_fetch(&self) -> Vec<String> {
        self.visible_cols
            .iter()
            .map(|c| self.accessor(c).to_string())
            .collect()
    }

    /// Number of rows to request for this view.
    pub fn page_cap(&self, config: &EngineConfig) -> usize {
        self.data_size.unwrap_or(config.page_cap)
    }

    /// Gathers the per-column settings for the given column.
    pub fn column_override(&self, name: &str) -> ColumnOverride {
        let accessor = self.accessor_overrides.get(name).cloned();
        let effective = accessor.as_deref().unwrap_or(name);
        let format = self.format_fn.get(name).and_then(|f| match Formatter::from_str(f) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("Column {}: {}", name, e);
                None
            }
        });
        ColumnOverride {
            header: self.custom_col_name.get(name).cloned(),
            align: self.col_justify.get(name).copied(),
            width: self.col_sizes.get(name).cloned(),
            link: self.link_cols.get(name).cloned(),
            filter: self.filters.get(name).cloned(),
            format,
            ext_filter: self
                .ext_filter_cols
                .iter()
                .any(|c| c == name || c == effective),
            open_out: self.open_out_cols.iter().any(|c| c == name),
            accessor,
        }
    }

    /// Per-column settings for every visible column.
    pub fn column_overrides(&self) -> Map<String, ColumnOverride> {
        self.visible_cols
            .iter()
            .map(|c| (c.clone(), self.column_override(c)))
            .collect()
    }

    /// A digest of everything that influences what is fetched. Two specs
    /// with equal fingerprints can share fetched rows.
    pub fn fetch_fingerprint(&self) -> Result<String, Error> {
        let key = FetchKey {
            data_source: self.data_source,
            version: self.version,
            geoid: self.geoid.as_deref(),
            geo_attribute: self.geo_attribute.as_deref(),
            disaster_number: self.disaster_number.as_deref(),
            visible_cols: &self.visible_cols,
            accessor_overrides: &self.accessor_overrides,
            group_by: &self.group_by,
            not_null: &self.not_null,
            data_size: self.data_size,
            additional_variables: &self.additional_variables,
        };
        Ok(sha256(serde_json::to_string(&key)?))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

// IDs are persisted as numbers or as numeric strings depending on which
// control last wrote them.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}
