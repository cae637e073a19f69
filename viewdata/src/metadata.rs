//! Column metadata attached to a data source's version.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{column::Align, query::clean_col_name};

/// The semantic role a column plays in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnDisplay {
    DataVariable,
    MetaVariable,
    GeoidVariable,
    /// Any role this engine does not act on.
    #[serde(other)]
    Other,
}

impl Default for ColumnDisplay {
    fn default() -> Self {
        ColumnDisplay::Other
    }
}

/// Describes a single column of a source. Read-only input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub display: ColumnDisplay,
    /// JSON-encoded lookup specification; see [`crate::MetaLookupSpec`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_lookup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(rename = "isDollar", default)]
    pub is_dollar: bool,
}

/// Whether a source column type name denotes a number.
pub fn is_numeric_type(type_name: &str) -> bool {
    matches!(
        type_name.to_lowercase().as_str(),
        "integer"
            | "int"
            | "smallint"
            | "bigint"
            | "numeric"
            | "number"
            | "decimal"
            | "real"
            | "double"
            | "double precision"
            | "float"
    )
}

/// A source's metadata arrives either as `{columns: [...]}` or as the bare
/// column list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceMetadata {
    Wrapped { columns: Vec<ColumnMetadata> },
    Bare(Vec<ColumnMetadata>),
}

impl Default for SourceMetadata {
    fn default() -> Self {
        SourceMetadata::Bare(Vec::new())
    }
}

impl SourceMetadata {
    pub fn columns(&self) -> &[ColumnMetadata] {
        match self {
            Self::Wrapped { columns } => columns,
            Self::Bare(columns) => columns,
        }
    }
}

/// A data source as listed in the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub source_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_metadata")]
    pub metadata: SourceMetadata,
}

// Sources without usable metadata are listed with no columns rather than
// failing the whole catalogue.
fn lenient_metadata<'de, D>(deserializer: D) -> Result<SourceMetadata, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl DataSource {
    pub fn columns(&self) -> &[ColumnMetadata] {
        self.metadata.columns()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// The source's geography attribute: the first `geoid-variable` column,
    /// with any ` AS alias` suffix removed.
    pub fn geo_attribute(&self) -> Option<String> {
        self.columns()
            .iter()
            .find(|c| c.display == ColumnDisplay::GeoidVariable)
            .map(|c| clean_col_name(&c.name).to_string())
    }
}

/// Finds the source with the given ID in a catalogue.
pub fn find_source(sources: &[DataSource], source_id: i64) -> Option<&DataSource> {
    sources.iter().find(|s| s.source_id == source_id)
}
