//! The per-widget resolution engine.
//!
//! A full cycle runs `idle → validating → fetching → resolving-meta →
//! transforming → ready` (or `empty` when the service reports no rows), and
//! stops in `blocked` when the view's selections cannot be fetched. When only
//! presentation settings change, the engine re-runs `transforming` over the
//! rows it fetched last, without touching the cache.
//!
//! Fetching is split off from the engine itself: [`ViewEngine::plan`]
//! produces a [`FetchPlan`] stamped with the engine's current generation,
//! which can be executed against a cache without borrowing the engine.
//! [`ViewEngine::commit`] only accepts results whose stamp matches the
//! engine's generation at commit time.

use eyre::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    cache::LazyCache,
    column::{
        disaster_number_column, ColumnDescriptor, ColumnDescriptorBuilder, DEFAULT_DISASTER_NUMBER_COLUMN,
    },
    fetch::{Attribution, Page, PagedDatasetFetcher},
    meta::{MetaLookupResolver, MetaLookupTable},
    metadata::{find_source, DataSource},
    query::{QueryDescriptor, QueryOptionsBuilder, Status},
    transform::{Row, RowTransformer},
    value::RawRow,
    ColumnMetadata, EngineConfig, Error, ViewSpec,
};

/// Identifies the version of a view's spec that a resolution was started
/// for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an engine is in its resolution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    Idle,
    Validating,
    Fetching,
    ResolvingMeta,
    Transforming,
    Ready,
    /// The view cannot be fetched until the user changes a selection.
    Blocked(Status),
    /// The service reported no rows for the view.
    Empty,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Validating => write!(f, "validating"),
            Self::Fetching => write!(f, "fetching"),
            Self::ResolvingMeta => write!(f, "resolving-meta"),
            Self::Transforming => write!(f, "transforming"),
            Self::Ready => write!(f, "ready"),
            Self::Blocked(status) => write!(f, "blocked ({})", status),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Everything needed to fetch a view's rows and labels.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    generation: Generation,
    fingerprint: String,
    view_id: i64,
    descriptor: QueryDescriptor,
    attributes: Vec<String>,
    columns: Vec<ColumnDescriptor>,
    page_cap: usize,
    geoid: Option<String>,
    config: EngineConfig,
}

impl FetchPlan {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn view_id(&self) -> i64 {
        self.view_id
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// The accessor expressions requested for each row.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Fetches the capped page of rows and the version's attribution.
    pub fn fetch<C: LazyCache + ?Sized>(&self, cache: &C) -> Result<FetchedPage> {
        let fetcher = PagedDatasetFetcher::new(cache, &self.config).with_page_cap(self.page_cap);
        let page = fetcher.fetch(self.view_id, &self.descriptor, &self.attributes[..])?;
        let attribution = fetcher.attribution(self.view_id)?;
        Ok(FetchedPage { page, attribution })
    }

    /// Looks up labels for the fetched page.
    pub fn resolve_meta<C: LazyCache + ?Sized>(&self, fetched: FetchedPage, cache: &C) -> Result<RawFetch> {
        let meta = if fetched.page.is_empty() {
            MetaLookupTable::new()
        } else {
            MetaLookupResolver::new(PagedDatasetFetcher::new(cache, &self.config))
                .geoid(self.geoid.as_deref())
                .resolve(&self.columns, &fetched.page.rows)?
        };
        Ok(RawFetch {
            generation: self.generation,
            fingerprint: self.fingerprint.clone(),
            length: fetched.page.length,
            rows: fetched.page.rows,
            meta,
            attribution: fetched.attribution,
        })
    }

    /// Runs both stages.
    pub fn execute<C: LazyCache + ?Sized>(&self, cache: &C) -> Result<RawFetch> {
        let fetched = self.fetch(cache)?;
        self.resolve_meta(fetched, cache)
    }
}

/// Rows fetched for a plan, before label resolution.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    page: Page,
    attribution: Attribution,
}

/// The untransformed result of executing a [`FetchPlan`].
#[derive(Debug, Clone)]
pub struct RawFetch {
    generation: Generation,
    fingerprint: String,
    length: usize,
    rows: Vec<RawRow>,
    meta: MetaLookupTable,
    attribution: Attribution,
}

impl RawFetch {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }
}

/// A table of rendered cell strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A view's render-ready data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    pub generation: Generation,
    pub columns: Vec<ColumnDescriptor>,
    pub data: Vec<Row>,
    /// The number of rows the service reported, before capping.
    pub length: usize,
    pub attribution_data: Attribution,
    pub hidden_cols: Vec<String>,
}

impl ResolvedView {
    /// The cells of every shown column rendered through its formatter. Hidden
    /// and expandable columns are left out.
    pub fn display_rows(&self) -> DisplayTable {
        let shown = self
            .columns
            .iter()
            .filter(|c| !c.open_out && !self.hidden_cols.contains(&c.name))
            .collect::<Vec<_>>();
        DisplayTable {
            headers: shown.iter().map(|c| c.header.clone()).collect(),
            rows: self
                .data
                .iter()
                .map(|row| shown.iter().map(|c| c.render(row.value(&c.accessor))).collect())
                .collect(),
        }
    }
}

/// Resolves a single view.
#[derive(Debug)]
pub struct ViewEngine {
    config: EngineConfig,
    sources: Vec<DataSource>,
    spec: ViewSpec,
    generation: Generation,
    state: EngineState,
    history: Vec<EngineState>,
    last_fetch: Option<RawFetch>,
    resolved: Option<ResolvedView>,
}

impl ViewEngine {
    pub fn new(config: EngineConfig, sources: Vec<DataSource>) -> Self {
        Self {
            config,
            sources,
            spec: ViewSpec::default(),
            generation: Generation::default(),
            state: EngineState::Idle,
            history: vec![EngineState::Idle],
            last_fetch: None,
            resolved: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The states entered since the spec last changed.
    pub fn history(&self) -> &[EngineState] {
        &self.history
    }

    /// The status to show in place of data, if the view is blocked.
    pub fn status(&self) -> Option<Status> {
        match self.state {
            EngineState::Blocked(status) => Some(status),
            _ => None,
        }
    }

    /// The most recently accepted resolution.
    pub fn resolved(&self) -> Option<&ResolvedView> {
        self.resolved.as_ref()
    }

    fn enter(&mut self, state: EngineState) {
        debug!("View engine {} -> {} (generation {})", self.state, state, self.generation);
        self.state = state;
        self.history.push(state);
    }

    /// Replaces the spec, invalidating any resolution still in flight.
    pub fn set_spec(&mut self, spec: ViewSpec) -> Generation {
        self.spec = spec;
        self.generation = self.generation.next();
        self.history.clear();
        self.enter(EngineState::Idle);
        self.generation
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        let source = self
            .spec
            .data_source
            .and_then(|id| find_source(&self.sources, id));
        match (self.spec.data_source, source) {
            (Some(_), Some(source)) => source.columns(),
            (Some(id), None) => {
                warn!("{}; no columns can be shown", Error::NoSuchDataSource(id));
                &[]
            }
            (None, _) => &[],
        }
    }

    fn columns(&self) -> Vec<ColumnDescriptor> {
        ColumnDescriptorBuilder::new(&self.config.default_width).build(
            &self.spec.visible_cols,
            self.metadata(),
            &self.spec.column_overrides(),
        )
    }

    // The accessor of the visible disaster number column, if there is one.
    fn disaster_accessor(&self, columns: &[ColumnDescriptor]) -> Option<String> {
        disaster_number_column(columns).map(|name| self.spec.accessor(name).to_string())
    }

    /// Validates the current spec and, if it can be fetched, plans the
    /// fetch. A blocked view yields `None`; its status is available through
    /// [`ViewEngine::status`].
    pub fn plan(&mut self) -> Result<Option<FetchPlan>> {
        self.enter(EngineState::Validating);
        let metadata = self.metadata();
        let builder = QueryOptionsBuilder::new(&self.spec, metadata);
        if let Err(status) = builder.check() {
            info!("View blocked: {}", status);
            self.resolved = None;
            self.enter(EngineState::Blocked(status));
            return Ok(None);
        }
        let (view_id, source_id) = match (self.spec.version, self.spec.data_source) {
            (Some(v), Some(s)) => (v, s),
            _ => return Ok(None),
        };

        let columns = self.columns();
        let geo_attribute = self.spec.geo_attribute.clone().or_else(|| {
            find_source(&self.sources, source_id).and_then(DataSource::geo_attribute)
        });
        let disaster_accessor = self
            .disaster_accessor(&columns)
            .unwrap_or_else(|| self.spec.accessor(DEFAULT_DISASTER_NUMBER_COLUMN).to_string());
        let descriptor = builder
            .geo_attribute(geo_attribute.as_deref())
            .disaster_number_col(Some(disaster_accessor.as_str()))
            .build();
        let plan = FetchPlan {
            generation: self.generation,
            fingerprint: self.spec.fetch_fingerprint()?,
            view_id,
            attributes: self.spec.columns_to_fetch(),
            page_cap: self.spec.page_cap(&self.config),
            geoid: self.spec.geoid.clone(),
            config: self.config.clone(),
            descriptor,
            columns,
        };
        debug!(
            "Planned fetch of view {} with options {}",
            view_id,
            plan.descriptor.to_json()?
        );
        self.enter(EngineState::Fetching);
        Ok(Some(plan))
    }

    /// Accepts the result of a plan and transforms it. Results planned
    /// under an older generation are discarded.
    pub fn commit(&mut self, fetch: RawFetch) -> Result<&ResolvedView> {
        if fetch.generation != self.generation {
            warn!(
                "Discarding resolution for generation {}, current generation is {}",
                fetch.generation, self.generation
            );
            return Err(Error::StaleResolution {
                expected: self.generation,
                got: fetch.generation,
            }
            .into());
        }
        self.last_fetch = Some(fetch);
        self.transform()
    }

    /// Applies a spec that differs from the current one in presentation
    /// settings only, reusing the rows fetched last.
    pub fn apply_settings(&mut self, spec: ViewSpec) -> Result<&ResolvedView> {
        let fingerprint = spec.fetch_fingerprint()?;
        match &self.last_fetch {
            Some(last) if last.fingerprint == fingerprint => {}
            _ => return Err(Error::NothingFetched.into()),
        }
        let generation = self.set_spec(spec);
        if let Some(last) = self.last_fetch.as_mut() {
            last.generation = generation;
        }
        self.transform()
    }

    fn transform(&mut self) -> Result<&ResolvedView> {
        self.enter(EngineState::Transforming);
        let fetch = match &self.last_fetch {
            Some(fetch) => fetch,
            None => return Err(Error::NothingFetched.into()),
        };
        let columns = self.columns();
        let disaster_accessor = self.disaster_accessor(&columns);
        let data = RowTransformer::new(&columns)
            .meta(&fetch.meta)
            .disaster_filter(disaster_accessor.as_deref(), self.spec.disaster_number.as_deref())
            .filter_value(&self.spec.filter_value)
            .ext_filters(&self.spec.ext_filter_values)
            .sort_by(&self.spec.sort_by)
            .show_total(&self.spec.show_total)
            .transform(fetch.rows.clone());
        let next = if fetch.rows.is_empty() {
            EngineState::Empty
        } else {
            EngineState::Ready
        };
        let view = ResolvedView {
            generation: self.generation,
            length: fetch.length,
            attribution_data: fetch.attribution.clone(),
            hidden_cols: self.spec.hidden_cols.clone(),
            columns,
            data,
        };
        debug!("Resolved {} row(s) for generation {}", view.data.len(), self.generation);
        self.enter(next);
        let view: &ResolvedView = self.resolved.insert(view);
        Ok(view)
    }

    /// Brings the engine up to date with `spec`, fetching through `cache`
    /// only when something that determines the fetched rows has changed.
    ///
    /// Returns `None` when the view is blocked.
    pub fn update<C: LazyCache + ?Sized>(&mut self, spec: ViewSpec, cache: &C) -> Result<Option<&ResolvedView>> {
        let fingerprint = spec.fetch_fingerprint()?;
        let settings_only = matches!(&self.last_fetch, Some(last) if last.fingerprint == fingerprint);
        if settings_only {
            debug!("Only presentation settings changed, reusing fetched rows");
            return self.apply_settings(spec).map(Some);
        }
        self.set_spec(spec);
        self.refresh(cache)
    }

    /// Runs a full cycle for the current spec.
    pub fn refresh<C: LazyCache + ?Sized>(&mut self, cache: &C) -> Result<Option<&ResolvedView>> {
        let plan = match self.plan()? {
            Some(plan) => plan,
            None => return Ok(None),
        };
        let fetched = plan.fetch(cache)?;
        self.enter(EngineState::ResolvingMeta);
        let fetch = plan.resolve_meta(fetched, cache)?;
        self.commit(fetch).map(Some)
    }
}
