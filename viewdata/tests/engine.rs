//! Integration tests for full resolution cycles against an in-memory cache

mod common;

use common::{
    engine, plan_for, requested_descriptors, requested_ranges, seed, seed_view, sources, spec, PROGRAM_VIEW_ID,
    VIEW_ID,
};
use serde_json::json;
use viewdata::{EngineState, Error, MemoryCache, MetaLookupSpec, QueryOptionsBuilder, Row, Status};

fn cells(row: &Row, accessor: &str) -> serde_json::Value {
    row.cells.get(accessor).cloned().unwrap_or(serde_json::Value::Null)
}

#[test]
fn test_grouped_view_end_to_end() {
    let literal = spec(json!({
        "visibleCols": ["county", "sum(loss) AS loss"],
        "groupBy": ["county"],
    }));
    let sources = sources();
    let builder = QueryOptionsBuilder::new(&literal, sources[0].columns());
    assert_eq!(builder.check(), Ok(()));
    let descriptor = builder.build();
    assert!(descriptor.aggregated_len);
    assert_eq!(descriptor.group_by, vec!["county".to_string()]);

    let view_spec = spec(json!({
        "visibleCols": ["county", "loss"],
        "fn": {"loss": "sum(loss) AS loss"},
        "groupBy": ["county"],
    }));
    let rows = vec![
        json!({"county": "Albany", "sum(loss) AS loss": 10}),
        json!({"county": "Bronx", "sum(loss) AS loss": 20}),
        json!({"county": "Kings", "sum(loss) AS loss": 30}),
    ];
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &view_spec, rows.clone());

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().expect("view should resolve");
    assert_eq!(view.data.len(), 3, "Should return the three grouped rows");
    for (row, expected) in view.data.iter().zip(rows) {
        assert_eq!(serde_json::to_value(row).unwrap(), expected);
        assert!(row.expand.is_none());
        assert!(!row.total_row);
    }
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(
        engine.history(),
        &[
            EngineState::Idle,
            EngineState::Validating,
            EngineState::Fetching,
            EngineState::ResolvingMeta,
            EngineState::Transforming,
            EngineState::Ready,
        ]
    );
}

#[test]
fn test_page_is_capped() {
    let view_spec = spec(json!({"visibleCols": ["county"]}));
    let plan = plan_for(&view_spec);
    let mut cache = MemoryCache::default();
    seed(
        &mut cache,
        plan.view_id(),
        plan.descriptor(),
        5000,
        vec![json!({"county": "Albany"}), json!({"county": "Bronx"})],
    );

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(view.length, 5000);
    assert_eq!(view.data.len(), 2);
    assert_eq!(requested_ranges(&cache.requests()), vec![(0, 99)]);
}

#[test]
fn test_data_size_overrides_page_cap() {
    let view_spec = spec(json!({"visibleCols": ["county"], "dataSize": 500}));
    let plan = plan_for(&view_spec);
    let mut cache = MemoryCache::default();
    seed(&mut cache, plan.view_id(), plan.descriptor(), 5000, vec![]);

    let mut engine = engine();
    engine.update(view_spec, &cache).unwrap();
    assert_eq!(requested_ranges(&cache.requests()), vec![(0, 499)]);
}

#[test]
fn test_lookup_only_requests_observed_keys() {
    let view_spec = spec(json!({"visibleCols": ["county", "program"]}));
    let mut cache = MemoryCache::default();
    seed_view(
        &mut cache,
        &view_spec,
        vec![
            json!({"county": "Albany", "program": "7"}),
            json!({"county": "Bronx", "program": "12"}),
            json!({"county": "Kings", "program": "7, 12"}),
            json!({"county": "Queens", "program": null}),
        ],
    );
    let lookup = match MetaLookupSpec::parse(sources()[0].column("program").unwrap().meta_lookup.as_deref().unwrap()) {
        MetaLookupSpec::Remote(lookup) => lookup,
        other => panic!("expected a remote lookup, got {:?}", other),
    };
    let lookup_descriptor = lookup.descriptor("program", vec![json!("7"), json!("12")], None);
    seed(
        &mut cache,
        PROGRAM_VIEW_ID,
        &lookup_descriptor,
        2,
        vec![json!({"id": "7", "name": "A"}), json!({"id": "12", "name": "B"})],
    );

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    let programs = view.data.iter().map(|r| cells(r, "program")).collect::<Vec<_>>();
    assert_eq!(programs, vec![json!("A"), json!("B"), json!("A, B"), json!(null)]);

    let lookups = requested_descriptors(&cache.requests(), PROGRAM_VIEW_ID);
    assert!(!lookups.is_empty(), "Should query the lookup view");
    for descriptor in lookups {
        assert_eq!(
            descriptor.filter.get("program"),
            Some(&vec![json!("7"), json!("12")]),
            "Should only look up keys present in the page"
        );
    }
}

#[test]
fn test_lookup_skipped_without_keys() {
    let view_spec = spec(json!({"visibleCols": ["program"]}));
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &view_spec, vec![json!({"program": null})]);

    let mut engine = engine();
    engine.update(view_spec, &cache).unwrap();
    assert!(requested_descriptors(&cache.requests(), PROGRAM_VIEW_ID).is_empty());
}

#[test]
fn test_malformed_lookup_leaves_values() {
    let view_spec = spec(json!({"visibleCols": ["status"]}));
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &view_spec, vec![json!({"status": "O"})]);

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(cells(&view.data[0], "status"), json!("O"));
}

#[test]
fn test_settings_only_change_does_not_refetch() {
    let original = spec(json!({"visibleCols": ["county", "loss"]}));
    let mut cache = MemoryCache::default();
    seed_view(
        &mut cache,
        &original,
        vec![
            json!({"county": "Albany", "loss": 1}),
            json!({"county": "Bronx", "loss": 2}),
        ],
    );
    let mut engine = engine();
    engine.update(original.clone(), &cache).unwrap();
    cache.clear_requests();

    let mut restyled = original.clone();
    restyled.custom_col_name.insert("county".into(), "Name".into());
    restyled.filter_value.insert("county".into(), "bron".into());
    restyled.page_size = Some(5);
    let view = engine.update(restyled, &cache).unwrap().unwrap();
    assert_eq!(view.columns[0].header, "Name");
    assert_eq!(view.data.len(), 1);
    assert!(cache.requests().is_empty(), "Should not touch the cache");
    assert_eq!(
        engine.history(),
        &[EngineState::Idle, EngineState::Transforming, EngineState::Ready]
    );

    let mut refiltered = original;
    refiltered.not_null.push("loss".into());
    engine.update(refiltered, &cache).unwrap();
    assert!(!cache.requests().is_empty(), "Should fetch again");
    assert!(engine.history().contains(&EngineState::Fetching));
}

#[test]
fn test_sort_change_reorders_fetched_rows() {
    let original = spec(json!({"visibleCols": ["county", "loss"]}));
    let mut cache = MemoryCache::default();
    seed_view(
        &mut cache,
        &original,
        vec![
            json!({"county": "Albany", "loss": 1}),
            json!({"county": "Bronx", "loss": 3}),
            json!({"county": "Kings", "loss": 2}),
        ],
    );
    let mut engine = engine();
    engine.update(original.clone(), &cache).unwrap();
    cache.clear_requests();

    let mut sorted = original;
    sorted.sort_by.insert("loss".into(), "desc".into());
    let view = engine.update(sorted, &cache).unwrap().unwrap();
    let counties = view.data.iter().map(|r| cells(r, "county")).collect::<Vec<_>>();
    assert_eq!(counties, vec![json!("Bronx"), json!("Kings"), json!("Albany")]);
    assert!(cache.requests().is_empty(), "Should not touch the cache");
    assert_eq!(
        engine.history(),
        &[EngineState::Idle, EngineState::Transforming, EngineState::Ready]
    );
}

#[test]
fn test_stale_resolution_is_discarded() {
    let first = spec(json!({"visibleCols": ["county"]}));
    let second = spec(json!({"visibleCols": ["county", "loss"]}));
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &first, vec![json!({"county": "Albany"})]);
    seed_view(&mut cache, &second, vec![json!({"county": "Bronx", "loss": 5})]);

    let mut engine = engine();
    engine.set_spec(first);
    let plan = engine.plan().unwrap().unwrap();
    engine.set_spec(second);
    let fetch = plan.execute(&cache).unwrap();

    let err = engine.commit(fetch).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::StaleResolution { .. })
    ));
    assert!(engine.resolved().is_none(), "Stale rows must not be accepted");

    let view = engine.refresh(&cache).unwrap().unwrap().clone();
    assert_eq!(cells(&view.data[0], "county"), json!("Bronx"));
    assert_eq!(view.generation, engine.generation());
}

#[test]
fn test_missing_columns_are_dropped() {
    let view_spec = spec(json!({"visibleCols": ["county", "removed_column"]}));
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &view_spec, vec![json!({"county": "Albany"})]);

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(
        view.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["county"]
    );
    assert_eq!(view.data.len(), 1);
}

#[test]
fn test_invalid_grouping_blocks() {
    let view_spec = spec(json!({
        "visibleCols": ["county", "loss"],
        "fn": {"loss": "sum(loss) AS loss"},
    }));
    let cache = MemoryCache::default();
    let mut engine = engine();
    assert!(engine.update(view_spec, &cache).unwrap().is_none());
    assert_eq!(engine.status(), Some(Status::InvalidGrouping));
    assert_eq!(
        engine.status().unwrap().to_string(),
        "Please make appropriate grouping selections."
    );
    assert!(cache.requests().is_empty());
}

#[test]
fn test_expand_filter_and_total() {
    let view_spec = spec(json!({
        "visibleCols": ["county", "loss", "tags", "disaster_number"],
        "openOutCols": ["tags"],
        "disasterNumber": "4480",
        "showTotal": ["loss"],
        "formatFn": {"loss": "comma"},
    }));
    let mut cache = MemoryCache::default();
    seed_view(
        &mut cache,
        &view_spec,
        vec![
            json!({"county": "Albany", "loss": 1000, "tags": ["flood", "wind"], "disaster_number": "4480"}),
            json!({"county": "Bronx", "loss": 2000, "tags": [], "disaster_number": "4020"}),
            json!({"county": "Kings", "loss": 3000, "tags": "surge", "disaster_number": "4480, 4485"}),
        ],
    );

    let plan = plan_for(&view_spec);
    assert_eq!(
        plan.descriptor().filter.get("disaster_number"),
        Some(&vec![json!("4480")])
    );

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(view.data.len(), 3, "Two matching rows plus the total row");
    let albany = &view.data[0];
    assert!(albany.cells.get("tags").is_none());
    let expand = albany.expand.as_ref().unwrap();
    assert_eq!(expand[0].key, "Tags");
    assert_eq!(expand[0].value, json!("flood, wind"));
    assert_eq!(expand[0].original_value, json!(["flood", "wind"]));

    let total = view.data.last().unwrap();
    assert!(total.total_row);
    assert_eq!(cells(total, "loss"), json!(4000));

    let table = view.display_rows();
    assert_eq!(table.headers, vec!["county", "Loss", "disaster_number"]);
    assert_eq!(table.rows[0], vec!["Albany", "$1,000", "4480"]);
    assert_eq!(table.rows[2], vec!["", "$4,000", ""]);
}

#[test]
fn test_attribution_is_fetched() {
    let view_spec = spec(json!({"visibleCols": ["county"]}));
    let mut cache = MemoryCache::default();
    seed_view(&mut cache, &view_spec, vec![json!({"county": "Albany"})]);
    cache.insert(
        &viewdata::CachePath::new()
            .key("dama")
            .key("test")
            .key("views")
            .key("byId")
            .key(VIEW_ID)
            .key("attributes"),
        json!({"source_id": 1, "view_id": VIEW_ID, "version": "v1", "_modified_timestamp": "2024-01-02T03:04:05Z"}),
    );

    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(view.attribution_data.view_id, Some(VIEW_ID));
    assert_eq!(view.attribution_data.version.as_deref(), Some("v1"));
    assert_eq!(
        view.attribution_data.modified.map(|t| t.to_string()).as_deref(),
        Some("2024-01-02T03:04:05Z")
    );
}

#[test]
fn test_disaster_number_without_disaster_column() {
    let view_spec = spec(json!({
        "visibleCols": ["county", "loss"],
        "disasterNumber": "4480",
    }));
    let plan = plan_for(&view_spec);
    assert_eq!(
        plan.descriptor().filter.get("disaster_number"),
        Some(&vec![json!("4480")]),
        "The service still filters by disaster number"
    );

    let mut cache = MemoryCache::default();
    seed_view(
        &mut cache,
        &view_spec,
        vec![
            json!({"county": "Albany", "loss": 1}),
            json!({"county": "Bronx", "loss": 2}),
        ],
    );
    let mut engine = engine();
    let view = engine.update(view_spec, &cache).unwrap().unwrap();
    assert_eq!(view.data.len(), 2, "Rows without a disaster column are kept");
    assert_eq!(engine.state(), EngineState::Ready);
}
