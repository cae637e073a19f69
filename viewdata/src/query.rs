//! Canonical query descriptors and the validation of grouping selections.
//!
//! A [`QueryDescriptor`] is serialized into a cache path segment, so its JSON
//! form must be identical for logically identical requests. All of its maps
//! are ordered, and its fields always serialize in the same order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    metadata::is_numeric_type, spec::FilterAction, ColumnMetadata, Error, Map, ViewSpec,
};

/// Strips an ` AS alias` (or ` as alias`) suffix from a column expression.
pub fn clean_col_name(name: &str) -> &str {
    let sep = if name.contains(" AS") { " AS" } else { " as" };
    name.split(sep).next().unwrap_or(name)
}

/// The aggregation an accessor expression performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Sum,
    Count,
    ArrayToString,
}

impl Aggregation {
    /// Classifies an accessor expression by the aggregate functions it
    /// contains. Plain column references yield `None`.
    pub fn of(expr: &str) -> Option<Self> {
        let lower = expr.to_lowercase();
        if lower.contains("array_to_string") {
            Some(Self::ArrayToString)
        } else if lower.contains("sum(") {
            Some(Self::Sum)
        } else if lower.contains("count(") {
            Some(Self::Count)
        } else {
            None
        }
    }
}

/// Checks that a set of columns can be fetched with the given grouping.
///
/// With a grouping, the non-aggregated columns must be exactly the grouped
/// columns. Without one, no column may be aggregated.
pub fn is_valid(group_by: &[String], columns: &[String]) -> bool {
    if group_by.is_empty() {
        return columns.iter().all(|c| Aggregation::of(c).is_none());
    }
    let plain = columns
        .iter()
        .filter(|c| Aggregation::of(c).is_none())
        .map(String::as_str)
        .collect::<BTreeSet<&str>>();
    let grouped = group_by.iter().map(String::as_str).collect::<BTreeSet<&str>>();
    plain == grouped
}

/// A user-actionable reason why a view cannot be fetched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    NoDataSource,
    NoVersion,
    NoColumns,
    InvalidGrouping,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::NoDataSource => "Please select a Datasource.",
                Self::NoVersion => "Please select a version.",
                Self::NoColumns => "Please select columns.",
                Self::InvalidGrouping => "Please make appropriate grouping selections.",
            }
        )
    }
}

/// The canonical request sent to the data service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// The result length must be computed over groups rather than rows.
    pub aggregated_len: bool,
    pub filter: Map<String, Vec<JsonValue>>,
    pub exclude: Map<String, Vec<JsonValue>>,
    pub group_by: Vec<String>,
}

impl QueryDescriptor {
    /// The descriptor's canonical JSON form, used verbatim as a cache path
    /// segment.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Adds allowed values for a key, keeping values unique.
    pub fn add_filter<K: Into<String>>(&mut self, key: K, values: Vec<JsonValue>) {
        merge_values(self.filter.entry(key.into()).or_default(), values);
    }

    /// Adds excluded values for a key, keeping values unique.
    pub fn add_exclude<K: Into<String>>(&mut self, key: K, values: Vec<JsonValue>) {
        merge_values(self.exclude.entry(key.into()).or_default(), values);
    }
}

fn merge_values(existing: &mut Vec<JsonValue>, values: Vec<JsonValue>) {
    for v in values {
        if !existing.contains(&v) {
            existing.push(v);
        }
    }
}

/// The predicate key selecting rows whose geography ID starts with a prefix
/// of the given length.
pub fn geo_prefix_key(geo_attribute: &str, prefix_len: usize) -> String {
    format!("substring({}::text, 1, {})", geo_attribute, prefix_len)
}

/// Values that stand for "no value" in a column of the given type. Text
/// columns also treat the empty string as null; numeric columns reject it.
pub fn null_sentinels(type_name: Option<&str>) -> Vec<JsonValue> {
    match type_name {
        Some(t) if is_numeric_type(t) => vec![JsonValue::from("null")],
        _ => vec![JsonValue::from("null"), JsonValue::from("")],
    }
}

/// Assembles a [`QueryDescriptor`] from a view's selections.
#[derive(Debug, Clone)]
pub struct QueryOptionsBuilder<'a> {
    spec: &'a ViewSpec,
    metadata: &'a [ColumnMetadata],
    geo_attribute: Option<&'a str>,
    disaster_number_col: Option<&'a str>,
}

impl<'a> QueryOptionsBuilder<'a> {
    pub fn new(spec: &'a ViewSpec, metadata: &'a [ColumnMetadata]) -> Self {
        Self {
            spec,
            metadata,
            geo_attribute: None,
            disaster_number_col: None,
        }
    }

    /// The attribute that geography filters apply to.
    pub fn geo_attribute(mut self, geo_attribute: Option<&'a str>) -> Self {
        self.geo_attribute = geo_attribute;
        self
    }

    /// The accessor of the column that disaster number filters apply to.
    pub fn disaster_number_col(mut self, col: Option<&'a str>) -> Self {
        self.disaster_number_col = col;
        self
    }

    /// Checks the view's selections before anything is fetched.
    pub fn check(&self) -> Result<(), Status> {
        if self.spec.data_source.is_none() {
            return Err(Status::NoDataSource);
        }
        if self.spec.version.is_none() {
            return Err(Status::NoVersion);
        }
        if self.spec.visible_cols.is_empty() {
            return Err(Status::NoColumns);
        }
        if !is_valid(&self.spec.group_by, &self.spec.columns_to_fetch()) {
            return Err(Status::InvalidGrouping);
        }
        Ok(())
    }

    pub fn build(&self) -> QueryDescriptor {
        let spec = self.spec;
        let mut descriptor = QueryDescriptor {
            aggregated_len: !spec.group_by.is_empty(),
            group_by: spec.group_by.clone(),
            ..Default::default()
        };

        if let (Some(geo_attribute), Some(geoid)) = (self.geo_attribute, spec.geoid.as_deref()) {
            descriptor.add_filter(
                geo_prefix_key(geo_attribute, geoid.len()),
                vec![JsonValue::from(geoid)],
            );
        }
        if let (Some(number), Some(col)) = (spec.disaster_number.as_deref(), self.disaster_number_col) {
            descriptor.add_filter(clean_col_name(col), vec![JsonValue::from(number)]);
        }
        for col in &spec.not_null {
            descriptor.add_exclude(col.as_str(), null_sentinels(self.column_type(col)));
        }
        for var in &spec.additional_variables {
            let key = clean_col_name(&var.name);
            let values = vec![var.default_value.clone()];
            match var.action {
                FilterAction::Include => descriptor.add_filter(key, values),
                FilterAction::Exclude => descriptor.add_exclude(key, values),
                FilterAction::Ignore => {}
            }
        }
        descriptor
    }

    fn column_type(&self, col: &str) -> Option<&'a str> {
        let cleaned = clean_col_name(col);
        self.metadata
            .iter()
            .find(|md| md.name == col || clean_col_name(&md.name) == cleaned)
            .map(|md| md.type_name.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn cols(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alias_stripping() {
        assert_eq!(clean_col_name("sum(loss) AS loss"), "sum(loss)");
        assert_eq!(clean_col_name("geoid as county_fips"), "geoid");
        assert_eq!(clean_col_name("county"), "county");
    }

    #[test]
    fn aggregation_classification() {
        assert_eq!(Aggregation::of("sum(loss) AS loss"), Some(Aggregation::Sum));
        assert_eq!(Aggregation::of("COUNT(1) as n"), Some(Aggregation::Count));
        assert_eq!(
            Aggregation::of("array_to_string(array_agg(distinct p), ', ')"),
            Some(Aggregation::ArrayToString)
        );
        assert_eq!(Aggregation::of("county"), None);
    }

    #[test]
    fn grouping_validity() {
        let grouped = cols(&["county"]);
        assert!(is_valid(&grouped, &cols(&["county", "sum(loss) AS loss"])));
        // Plain column not grouped.
        assert!(!is_valid(&grouped, &cols(&["county", "state", "sum(loss) AS loss"])));
        // Grouped column not fetched.
        assert!(!is_valid(&cols(&["county", "state"]), &cols(&["county", "sum(loss) AS loss"])));
        // Aggregate without grouping.
        assert!(!is_valid(&[], &cols(&["county", "count(1) AS n"])));
        assert!(is_valid(&[], &cols(&["county", "state"])));
        // Only aggregates, grouped by nothing fetched.
        assert!(!is_valid(&grouped, &cols(&["sum(loss) AS loss"])));
    }

    #[test]
    fn status_messages() {
        assert_eq!(Status::NoDataSource.to_string(), "Please select a Datasource.");
        assert_eq!(
            Status::InvalidGrouping.to_string(),
            "Please make appropriate grouping selections."
        );
    }

    #[test]
    fn preconditions_short_circuit() {
        let metadata = Vec::new();
        let mut spec = ViewSpec::default();
        assert_eq!(QueryOptionsBuilder::new(&spec, &metadata).check(), Err(Status::NoDataSource));
        spec.data_source = Some(1);
        assert_eq!(QueryOptionsBuilder::new(&spec, &metadata).check(), Err(Status::NoVersion));
        spec.version = Some(2);
        assert_eq!(QueryOptionsBuilder::new(&spec, &metadata).check(), Err(Status::NoColumns));
        spec.visible_cols = cols(&["county", "loss"]);
        spec.accessor_overrides.insert("loss".into(), "sum(loss) AS loss".into());
        assert_eq!(QueryOptionsBuilder::new(&spec, &metadata).check(), Err(Status::InvalidGrouping));
        spec.group_by = cols(&["county"]);
        assert_eq!(QueryOptionsBuilder::new(&spec, &metadata).check(), Ok(()));
    }

    #[test]
    fn descriptor_assembly() {
        let metadata: Vec<ColumnMetadata> = serde_json::from_value(json!([
            {"name": "loss", "type": "numeric"},
            {"name": "county", "type": "text"},
        ]))
        .unwrap();
        let spec: ViewSpec = serde_json::from_value(json!({
            "geoid": "36001",
            "disasterNumber": "4480",
            "notNull": ["loss", "county"],
            "sortBy": {"loss": "desc"},
            "additionalVariables": [
                {"name": "program AS p", "action": "include", "defaultValue": "IA"},
                {"name": "program", "action": "include", "defaultValue": "PA"},
                {"name": "state", "action": "exclude", "defaultValue": "NJ"},
                {"name": "other", "action": "noop", "defaultValue": "x"},
            ],
        }))
        .unwrap();
        let descriptor = QueryOptionsBuilder::new(&spec, &metadata)
            .geo_attribute(Some("geoid"))
            .disaster_number_col(Some("distinct disaster_number as disaster_number"))
            .build();
        assert!(!descriptor.aggregated_len);
        assert_eq!(
            descriptor.filter.get("substring(geoid::text, 1, 5)"),
            Some(&vec![json!("36001")])
        );
        assert_eq!(
            descriptor.filter.get("distinct disaster_number"),
            Some(&vec![json!("4480")])
        );
        assert_eq!(descriptor.filter.get("program"), Some(&vec![json!("IA"), json!("PA")]));
        assert_eq!(descriptor.exclude.get("loss"), Some(&vec![json!("null")]));
        assert_eq!(descriptor.exclude.get("county"), Some(&vec![json!("null"), json!("")]));
        assert_eq!(descriptor.exclude.get("state"), Some(&vec![json!("NJ")]));
        assert!(!descriptor.filter.contains_key("other"));
        assert!(!descriptor.to_json().unwrap().contains("desc"), "Sorting is not requested from the service");
    }

    #[test]
    fn serialization_is_canonical() {
        let mut a = QueryDescriptor::default();
        a.add_filter("b", vec![json!(1)]);
        a.add_filter("a", vec![json!(2)]);
        let mut b = QueryDescriptor::default();
        b.add_filter("a", vec![json!(2)]);
        b.add_filter("b", vec![json!(1)]);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        assert_eq!(
            a.to_json().unwrap(),
            r#"{"aggregatedLen":false,"filter":{"a":[2],"b":[1]},"exclude":{},"groupBy":[]}"#
        );
    }

    #[test]
    fn grouped_descriptor() {
        let spec: ViewSpec = serde_json::from_value(json!({
            "visibleCols": ["county", "sum(loss) AS loss"],
            "groupBy": ["county"],
        }))
        .unwrap();
        let descriptor = QueryOptionsBuilder::new(&spec, &[]).build();
        assert!(descriptor.aggregated_len);
        assert_eq!(descriptor.group_by, cols(&["county"]));
        assert!(descriptor.filter.is_empty());
        assert!(descriptor.exclude.is_empty());
    }
}
