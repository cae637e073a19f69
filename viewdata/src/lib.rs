//! Viewdata resolves the data behind dashboard widgets.
//!
//! A widget's user-editable [`ViewSpec`] is translated into a canonical
//! [`QueryDescriptor`], whose rows are fetched page by page through a
//! path-addressed [`LazyCache`]. Identifier columns are then resolved into
//! labels, expandable columns are moved into per-row details, and the rows
//! are filtered and totalled for rendering. [`ViewEngine`] drives the whole
//! cycle and guarantees that only results for the current spec are accepted.
//!
//! For a command line front end, see the `viewdata-cli` crate.

mod cache;
mod column;
mod config;
mod data;
mod datetime;
mod engine;
mod error;
mod fetch;
mod format;
mod hash;
mod meta;
mod metadata;
mod query;
mod spec;
mod transform;
mod value;

pub use cache::{CachePath, LazyCache, MemoryCache, PathSegment};
pub use column::{
    disaster_number_column, Align, ColumnDescriptor, ColumnDescriptorBuilder, LinkSpec,
    DEFAULT_DISASTER_NUMBER_COLUMN,
};
pub use config::EngineConfig;
pub use data::{load_as, load_from_file, SupportedFormat};
pub use datetime::Timestamp;
pub use engine::{
    DisplayTable, EngineState, FetchPlan, FetchedPage, Generation, RawFetch, ResolvedView, ViewEngine,
};
pub use error::Error;
pub use fetch::{Attribution, Page, PagedDatasetFetcher, ATTRIBUTION_ATTRIBUTES};
pub use format::Formatter;
pub use meta::{
    collect_distinct_keys, LabelMap, MetaLookupResolver, MetaLookupSpec, MetaLookupTable, RemoteLookupSpec,
    ValueMapping,
};
pub use metadata::{find_source, is_numeric_type, ColumnDisplay, ColumnMetadata, DataSource, SourceMetadata};
pub use query::{
    clean_col_name, geo_prefix_key, is_valid, null_sentinels, Aggregation, QueryDescriptor,
    QueryOptionsBuilder, Status,
};
pub use spec::{AdditionalVariable, ColumnOverride, FilterAction, ViewSpec};
pub use transform::{ExpandEntry, Row, RowTransformer};
pub use value::{Map, RawRow};
