//! Render-ready column descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    metadata::is_numeric_type,
    query::Aggregation,
    value::{display_string, unwrap_atom},
    ColumnDisplay, ColumnMetadata, ColumnOverride, Formatter, Map,
};

/// Horizontal alignment of a column's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Right,
    Center,
    Justify,
}

impl Align {
    /// Numbers are right-aligned, everything else left-aligned.
    pub fn default_for_type(type_name: &str) -> Self {
        if is_numeric_type(type_name) {
            Align::Right
        } else {
            Align::Left
        }
    }
}

/// Turns a column's cells into links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSpec {
    pub is_link: bool,
    pub location: Option<String>,
    pub link_text: Option<String>,
}

impl LinkSpec {
    /// The link target for a cell of the given column, if this spec makes
    /// it a link. Geography names are normalized into URL slugs.
    pub fn href(&self, column_name: &str, cell: &JsonValue) -> Option<String> {
        if !self.is_link {
            return None;
        }
        let value = display_string(cell);
        let suffix = if column_name == "geoid" {
            url_slug(&value)
        } else {
            value
        };
        Some(format!("{}{}", self.location.as_deref().unwrap_or(""), suffix))
    }

    /// The text shown for a linked cell.
    pub fn text(&self, cell: &JsonValue) -> String {
        self.link_text
            .clone()
            .unwrap_or_else(|| display_string(cell))
    }
}

// "Albany County (County)" -> "albany_county"
fn url_slug(name: &str) -> String {
    name.to_lowercase()
        .replacen(" (county)", "", 1)
        .replacen('.', "", 1)
        .replace(' ', "_")
}

/// A column as handed to a renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// The column's name in the source.
    pub name: String,
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The key under which the column's values appear in fetched rows.
    pub accessor: String,
    pub align: Align,
    pub width: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_fn: Option<Formatter>,
    #[serde(default)]
    pub ext_filter: bool,
    #[serde(default)]
    pub open_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkSpec>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub display: ColumnDisplay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_lookup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default)]
    pub is_dollar: bool,
}

impl ColumnDescriptor {
    /// How this column's accessor aggregates, if at all.
    pub fn aggregation(&self) -> Option<Aggregation> {
        Aggregation::of(&self.accessor)
    }

    /// Whether this column's values should go through label substitution.
    pub fn has_meta_lookup(&self) -> bool {
        matches!(
            self.display,
            ColumnDisplay::MetaVariable | ColumnDisplay::GeoidVariable
        ) && self.meta_lookup.is_some()
    }

    /// Renders a cell for display, applying the column's formatter.
    pub fn render(&self, cell: Option<&JsonValue>) -> String {
        let cell = match cell.map(unwrap_atom) {
            Some(c) => c,
            None => return String::new(),
        };
        match self.format_fn {
            Some(f) => f.format(cell, self.is_dollar),
            None => display_string(cell),
        }
    }
}

/// Builds column descriptors from source metadata and a view's per-column
/// settings.
#[derive(Debug, Clone)]
pub struct ColumnDescriptorBuilder {
    default_width: String,
}

impl ColumnDescriptorBuilder {
    pub fn new<S: AsRef<str>>(default_width: S) -> Self {
        Self {
            default_width: default_width.as_ref().to_string(),
        }
    }

    /// Builds one descriptor per visible column, in order. Visible columns
    /// that are not described by the metadata are dropped.
    pub fn build(
        &self,
        visible_cols: &[String],
        metadata: &[ColumnMetadata],
        overrides: &Map<String, ColumnOverride>,
    ) -> Vec<ColumnDescriptor> {
        visible_cols
            .iter()
            .filter_map(|name| metadata.iter().find(|md| &md.name == name))
            .map(|md| {
                let fallback = ColumnOverride::default();
                let o = overrides.get(&md.name).unwrap_or(&fallback);
                self.describe(md, o)
            })
            .collect()
    }

    fn describe(&self, md: &ColumnMetadata, o: &ColumnOverride) -> ColumnDescriptor {
        let accessor = o.accessor.clone().unwrap_or_else(|| md.name.clone());
        // Array aggregates are text regardless of the underlying column type.
        let type_name = if accessor.contains("array_to_string") {
            "string".to_string()
        } else {
            md.type_name.clone()
        };
        ColumnDescriptor {
            name: md.name.clone(),
            header: o
                .header
                .clone()
                .or_else(|| md.display_name.clone())
                .unwrap_or_else(|| md.name.clone()),
            display_name: md.display_name.clone(),
            align: o
                .align
                .or(md.align)
                .unwrap_or_else(|| Align::default_for_type(&md.type_name)),
            width: o.width.clone().unwrap_or_else(|| self.default_width.clone()),
            filter: md.filter.clone().or_else(|| o.filter.clone()),
            format_fn: o.format,
            ext_filter: o.ext_filter,
            open_out: o.open_out,
            link: o.link.clone(),
            type_name,
            display: md.display,
            meta_lookup: md.meta_lookup.clone(),
            info: md.desc.clone(),
            is_dollar: md.is_dollar,
            accessor,
        }
    }
}

/// The column that disaster number filters are sent to when no visible column
/// carries disaster numbers.
pub const DEFAULT_DISASTER_NUMBER_COLUMN: &str = "disaster_number";

/// Finds the column carrying disaster numbers among the built descriptors.
/// Case-number columns are never chosen.
pub fn disaster_number_column(columns: &[ColumnDescriptor]) -> Option<&str> {
    columns
        .iter()
        .map(|c| c.name.as_str())
        .find(|name| name.contains("disaster_number") && !name.to_lowercase().contains("case"))
}
