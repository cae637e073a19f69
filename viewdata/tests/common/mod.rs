//! Shared fixtures for integration tests

use serde_json::{json, Value as JsonValue};
use viewdata::{
    CachePath, DataSource, EngineConfig, FetchPlan, MemoryCache, PagedDatasetFetcher, PathSegment,
    QueryDescriptor, ViewEngine, ViewSpec,
};

pub const SOURCE_ID: i64 = 1;
pub const VIEW_ID: i64 = 2;
pub const PROGRAM_VIEW_ID: i64 = 50;

/// A catalogue with a single disaster loss source.
pub fn sources() -> Vec<DataSource> {
    serde_json::from_value(json!([{
        "source_id": SOURCE_ID,
        "name": "disaster_losses",
        "metadata": {"columns": [
            {"name": "geoid", "display_name": "County", "type": "text", "display": "geoid-variable"},
            {"name": "county", "type": "text", "display": "data-variable"},
            {"name": "loss", "display_name": "Loss", "type": "numeric", "display": "data-variable", "isDollar": true},
            {"name": "program", "display_name": "Program", "type": "text", "display": "meta-variable",
             "meta_lookup": "{\"view_id\": 50, \"keyAttribute\": \"id\", \"valueAttribute\": \"name\", \"attributes\": [\"id\", \"name\"]}"},
            {"name": "status", "type": "text", "display": "meta-variable", "meta_lookup": "{broken"},
            {"name": "tags", "display_name": "Tags", "type": "text", "display": "data-variable"},
            {"name": "disaster_number", "type": "text", "display": "data-variable"},
        ]},
    }]))
    .unwrap_or_else(|e| panic!("Invalid source fixture: {}", e))
}

pub fn config() -> EngineConfig {
    EngineConfig::default().with_env("test")
}

/// Parses a view spec, defaulting the data source and version to the
/// fixture's.
pub fn spec(mut value: JsonValue) -> ViewSpec {
    let obj = value.as_object_mut().expect("spec fixtures must be objects");
    obj.entry("dataSource").or_insert(json!(SOURCE_ID));
    obj.entry("version").or_insert(json!(VIEW_ID));
    serde_json::from_value(value).unwrap_or_else(|e| panic!("Invalid spec fixture: {}", e))
}

pub fn engine() -> ViewEngine {
    ViewEngine::new(config(), sources())
}

/// The plan an engine would make for the given spec.
pub fn plan_for(spec: &ViewSpec) -> FetchPlan {
    let mut engine = engine();
    engine.set_spec(spec.clone());
    engine
        .plan()
        .expect("planning should succeed")
        .expect("spec fixture should not be blocked")
}

/// Seeds the cache with a reported length and rows for a descriptor.
pub fn seed(cache: &mut MemoryCache, view_id: i64, descriptor: &QueryDescriptor, length: usize, rows: Vec<JsonValue>) {
    let config = config();
    let empty = MemoryCache::default();
    let fetcher = PagedDatasetFetcher::new(&empty, &config);
    let length_path = fetcher.length_path(view_id, descriptor).unwrap();
    let data_path = fetcher.data_path(view_id, descriptor).unwrap();
    cache.insert(&length_path, json!(length));
    for (i, row) in rows.into_iter().enumerate() {
        cache.insert(&data_path.clone().index(i), row);
    }
}

/// Seeds the rows an engine will request for the given spec.
pub fn seed_view(cache: &mut MemoryCache, spec: &ViewSpec, rows: Vec<JsonValue>) {
    let plan = plan_for(spec);
    let length = rows.len();
    seed(cache, plan.view_id(), plan.descriptor(), length, rows);
}

/// The query descriptors requested from the given view, in request order.
pub fn requested_descriptors(requests: &[CachePath], view_id: i64) -> Vec<QueryDescriptor> {
    let view_id = view_id.to_string();
    requests
        .iter()
        .filter_map(|path| {
            let segments = path.segments();
            match segments {
                [_, _, PathSegment::Key(by_id), PathSegment::Key(id), PathSegment::Key(options), PathSegment::Key(json), ..]
                    if by_id == "viewsbyId" && id == &view_id && options == "options" =>
                {
                    serde_json::from_str(json).ok()
                }
                _ => None,
            }
        })
        .collect()
}

/// The ranges requested, in request order.
pub fn requested_ranges(requests: &[CachePath]) -> Vec<(usize, usize)> {
    requests
        .iter()
        .flat_map(|path| path.segments().iter())
        .filter_map(|segment| match segment {
            PathSegment::Range { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}
