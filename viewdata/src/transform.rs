//! Turns fetched rows into the rows a widget renders.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    column::ColumnDescriptor,
    metadata::is_numeric_type,
    meta::{LabelMap, MetaLookupSpec, MetaLookupTable, ValueMapping},
    query::Aggregation,
    value::{as_f64, display_string, is_empty, lookup_key, unwrap_atom, RawRow},
    Map,
};

/// A value moved out of a row into its expandable detail list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandEntry {
    /// The column's header.
    pub key: String,
    pub accessor: String,
    /// The value as displayed: arrays are joined with `", "`.
    pub value: JsonValue,
    /// The value as fetched, for filtering.
    pub original_value: JsonValue,
}

impl ExpandEntry {
    fn new(column: &ColumnDescriptor, cell: Option<JsonValue>) -> Self {
        let (value, original_value) = match cell.as_ref().map(unwrap_atom) {
            Some(JsonValue::Array(items)) => (
                JsonValue::from(display_string(&JsonValue::Array(items.clone()))),
                JsonValue::Array(items.clone()),
            ),
            None | Some(JsonValue::Null) | Some(JsonValue::Object(_)) => {
                (JsonValue::from(""), JsonValue::from(""))
            }
            Some(v) => (v.clone(), v.clone()),
        };
        Self {
            key: column.header.clone(),
            accessor: column.accessor.clone(),
            value,
            original_value,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A rendered row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(flatten)]
    pub cells: RawRow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<Vec<ExpandEntry>>,
    /// Marks the synthetic row aggregating the others.
    #[serde(default, skip_serializing_if = "is_false")]
    pub total_row: bool,
}

impl Row {
    pub fn from_raw(cells: RawRow) -> Self {
        Self {
            cells,
            ..Default::default()
        }
    }

    /// The value of the given accessor, whether it is still a cell or has
    /// been moved into the expandable details.
    pub fn value(&self, accessor: &str) -> Option<&JsonValue> {
        self.cells.get(accessor).or_else(|| {
            self.expand
                .as_ref()?
                .iter()
                .find(|e| e.accessor == accessor)
                .map(|e| &e.original_value)
        })
    }

    // The value as text, `None` when there is nothing to show.
    fn text(&self, accessor: &str) -> Option<String> {
        let value = self.value(accessor);
        if is_empty(value) {
            return None;
        }
        value.map(display_string)
    }
}

enum Labels<'a> {
    Inline(Map<String, String>),
    Remote {
        records: Option<&'a LabelMap>,
        value_attribute: String,
        mapping: ValueMapping,
    },
}

impl<'a> Labels<'a> {
    fn label(&self, key: &str) -> Option<String> {
        match self {
            Self::Inline(labels) => labels.get(key).cloned(),
            Self::Remote {
                records,
                value_attribute,
                mapping,
            } => {
                let records = (*records)?;
                let record = records.get(key).or_else(|| {
                    let mapped = mapping.apply(&JsonValue::from(key))?;
                    records.get(&lookup_key(&mapped)?)
                })?;
                let label = display_string(record.get(value_attribute.as_str())?);
                if label.is_empty() {
                    None
                } else {
                    Some(label)
                }
            }
        }
    }
}

struct Substitution<'a> {
    accessor: &'a str,
    labels: Labels<'a>,
    keep_id: bool,
}

impl<'a> Substitution<'a> {
    fn resolve_key(&self, key: &str) -> Option<String> {
        let label = self.labels.label(key)?;
        Some(if self.keep_id {
            format!("{} ({})", label, key)
        } else {
            label
        })
    }

    fn apply(&self, cells: &mut RawRow) {
        let cell = match cells.get(self.accessor) {
            Some(c) if !is_empty(Some(c)) => unwrap_atom(c),
            _ => return,
        };
        let substituted = match cell {
            JsonValue::String(s) if s.contains(',') => JsonValue::from(
                s.split(',')
                    .map(str::trim)
                    .map(|part| self.resolve_key(part).unwrap_or_else(|| part.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| {
                        lookup_key(item)
                            .and_then(|k| self.resolve_key(&k))
                            .map(JsonValue::from)
                            .unwrap_or_else(|| item.clone())
                    })
                    .collect(),
            ),
            v => match lookup_key(v).and_then(|k| self.resolve_key(&k)) {
                Some(label) => JsonValue::from(label),
                None => return,
            },
        };
        cells.insert(self.accessor.to_string(), substituted);
    }
}

/// Applies label substitution, expandable-column extraction, filtering and
/// total row synthesis to a page of fetched rows, in that order.
pub struct RowTransformer<'a> {
    columns: &'a [ColumnDescriptor],
    meta: Option<&'a MetaLookupTable>,
    disaster_filter: Option<(&'a str, &'a str)>,
    filter_value: Option<&'a Map<String, String>>,
    ext_filters: Option<&'a Map<String, Vec<JsonValue>>>,
    sort_by: Option<&'a Map<String, String>>,
    show_total: &'a [String],
}

impl<'a> RowTransformer<'a> {
    pub fn new(columns: &'a [ColumnDescriptor]) -> Self {
        Self {
            columns,
            meta: None,
            disaster_filter: None,
            filter_value: None,
            ext_filters: None,
            sort_by: None,
            show_total: &[],
        }
    }

    pub fn meta(mut self, meta: &'a MetaLookupTable) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Keeps only rows whose value for `accessor` contains `number`. An
    /// absent accessor or an empty or absent number disables the filter.
    pub fn disaster_filter(mut self, accessor: Option<&'a str>, number: Option<&'a str>) -> Self {
        self.disaster_filter = accessor.zip(number.filter(|n| !n.is_empty()));
        self
    }

    /// Case-insensitive substring filters, keyed by accessor.
    pub fn filter_value(mut self, filter_value: &'a Map<String, String>) -> Self {
        self.filter_value = Some(filter_value);
        self
    }

    /// Allowed values, keyed by accessor.
    pub fn ext_filters(mut self, ext_filters: &'a Map<String, Vec<JsonValue>>) -> Self {
        self.ext_filters = Some(ext_filters);
        self
    }

    /// Sort directions keyed by column name or accessor. The first entry that
    /// names a built column decides the order; rows with empty values for it
    /// always come last.
    pub fn sort_by(mut self, sort_by: &'a Map<String, String>) -> Self {
        self.sort_by = Some(sort_by);
        self
    }

    /// Columns (by name or accessor) to aggregate into a total row.
    pub fn show_total(mut self, show_total: &'a [String]) -> Self {
        self.show_total = show_total;
        self
    }

    pub fn transform(&self, rows: Vec<RawRow>) -> Vec<Row> {
        let substitutions = self.substitutions();
        let open_out = self.columns.iter().filter(|c| c.open_out).collect::<Vec<_>>();

        let mut rows = rows
            .into_iter()
            .map(Row::from_raw)
            .filter(|row| !is_total(row))
            .map(|mut row| {
                for s in &substitutions {
                    s.apply(&mut row.cells);
                }
                if !open_out.is_empty() {
                    row.expand = Some(
                        open_out
                            .iter()
                            .map(|c| ExpandEntry::new(c, row.cells.remove(&c.accessor)))
                            .collect(),
                    );
                }
                row
            })
            .filter(|row| self.passes_disaster_filter(row))
            .filter(|row| self.passes_filter_value(row))
            .filter(|row| self.passes_ext_filters(row))
            .collect::<Vec<_>>();
        self.sort(&mut rows);

        if let Some(total) = self.total_row(&rows) {
            rows.push(total);
        }
        rows
    }

    fn substitutions(&self) -> Vec<Substitution<'a>> {
        self.columns
            .iter()
            .filter(|c| c.has_meta_lookup())
            .filter_map(|c| {
                let spec = MetaLookupSpec::parse(c.meta_lookup.as_deref()?);
                Some(self.substitution(c, spec))
            })
            .collect()
    }

    fn substitution(&self, column: &'a ColumnDescriptor, spec: MetaLookupSpec) -> Substitution<'a> {
        let keep_id = spec.keep_id();
        let labels = match spec {
            MetaLookupSpec::Inline { labels, .. } => Labels::Inline(labels),
            MetaLookupSpec::Remote(remote) => Labels::Remote {
                records: self.meta.and_then(|m| m.get(&column.accessor)),
                value_attribute: remote.value_attribute,
                mapping: remote.format_values_to_map,
            },
        };
        Substitution {
            accessor: &column.accessor,
            labels,
            keep_id,
        }
    }

    fn sort(&self, rows: &mut [Row]) {
        let (accessor, descending) = match self.sort_column() {
            Some(sort) => sort,
            None => return,
        };
        rows.sort_by(|a, b| {
            let (x, y) = (a.value(accessor), b.value(accessor));
            match (is_empty(x), is_empty(y)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) if descending => compare_cells(x, y).reverse(),
                (false, false) => compare_cells(x, y),
            }
        });
    }

    fn sort_column(&self) -> Option<(&'a str, bool)> {
        self.sort_by?.iter().find_map(|(key, direction)| {
            let column = self.columns.iter().find(|c| &c.accessor == key || &c.name == key)?;
            Some((column.accessor.as_str(), direction.eq_ignore_ascii_case("desc")))
        })
    }

    fn passes_disaster_filter(&self, row: &Row) -> bool {
        match self.disaster_filter {
            None => true,
            Some((accessor, number)) => row
                .text(accessor)
                .map_or(false, |text| text.contains(number)),
        }
    }

    fn passes_filter_value(&self, row: &Row) -> bool {
        let filters = match self.filter_value {
            Some(f) => f,
            None => return true,
        };
        filters
            .iter()
            .filter(|(_, needle)| !needle.is_empty())
            .all(|(accessor, needle)| {
                row.text(accessor)
                    .map_or(false, |text| text.to_lowercase().contains(&needle.to_lowercase()))
            })
    }

    fn passes_ext_filters(&self, row: &Row) -> bool {
        let filters = match self.ext_filters {
            Some(f) => f,
            None => return true,
        };
        filters
            .iter()
            .filter(|(_, allowed)| !allowed.is_empty())
            .all(|(accessor, allowed)| {
                let allowed = allowed.iter().map(display_string).collect::<Vec<_>>();
                let value = row.value(accessor).map(unwrap_atom);
                match value {
                    Some(JsonValue::Array(items)) => items
                        .iter()
                        .any(|item| allowed.contains(&display_string(item))),
                    Some(v) if !is_empty(Some(v)) => allowed.contains(&display_string(v)),
                    _ => false,
                }
            })
    }

    fn total_row(&self, rows: &[Row]) -> Option<Row> {
        if self.show_total.is_empty() {
            return None;
        }
        let mut total = Row {
            total_row: true,
            ..Default::default()
        };
        for column in self.columns.iter().filter(|c| {
            self.show_total
                .iter()
                .any(|t| t == &c.name || t == &c.accessor)
        }) {
            let summable = match column.aggregation() {
                Some(Aggregation::Sum) | Some(Aggregation::Count) => true,
                Some(Aggregation::ArrayToString) => false,
                None => is_numeric_type(&column.type_name),
            };
            if !summable {
                continue;
            }
            let values = rows
                .iter()
                .filter_map(|r| r.value(&column.accessor).and_then(as_f64))
                .collect::<Vec<f64>>();
            total
                .cells
                .insert(column.accessor.clone(), number(values.iter().sum()));
        }
        if total.cells.is_empty() {
            None
        } else {
            Some(total)
        }
    }
}

fn is_total(row: &Row) -> bool {
    row.total_row
        || row
            .cells
            .get("totalRow")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
}

fn number(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        JsonValue::from(n as i64)
    } else {
        JsonValue::from(n)
    }
}

// Numbers compare numerically, anything else by its displayed text.
fn compare_cells(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a.and_then(as_f64), b.and_then(as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a
            .map(display_string)
            .unwrap_or_default()
            .cmp(&b.map(display_string).unwrap_or_default()),
    }
}
