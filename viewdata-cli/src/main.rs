use std::{fs, path::PathBuf};

use clap::Parser;
use eyre::{Result, WrapErr};
use viewdata::{DataSource, EngineConfig, MemoryCache, ResolvedView, ViewEngine, ViewSpec};

#[derive(Parser, Debug)]
#[clap(name = "viewdata", about, version)]
struct Args {
    /// Increase output logging verbosity.
    #[clap(short, long)]
    verbose: bool,

    /// Engine configuration file (JSON or YAML).
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Data source catalogue (JSON or YAML).
    #[clap(short, long)]
    sources: PathBuf,

    /// Cache snapshot to resolve views against (JSON or YAML).
    #[clap(long)]
    cache: PathBuf,

    /// Print tab-separated display rows instead of JSON.
    #[clap(short, long)]
    plain: bool,

    /// Which persisted view(s) to resolve.
    views: Vec<String>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    }) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match resolve_views(&args) {
        Ok(n) => log::info!("Resolved {} view(s)", n),
        Err(e) => log::error!("Failed: {:?}", e),
    }
}

fn resolve_views(args: &Args) -> Result<usize> {
    let config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    let sources: Vec<DataSource> = viewdata::load_from_file(&args.sources)
        .wrap_err_with(|| format!("failed to load data sources from {}", args.sources.display()))?;
    let cache = MemoryCache::load_from_file(&args.cache)?;

    let patterns = if args.views.is_empty() {
        vec!["views/*.json"]
    } else {
        args.views.iter().map(AsRef::as_ref).collect::<Vec<&str>>()
    };

    let mut resolved = 0;
    for pattern in patterns {
        for entry in glob::glob(pattern)? {
            let path = entry?;
            log::debug!("Resolving view {}", path.display());
            let content = fs::read_to_string(&path)
                .wrap_err_with(|| format!("failed to read view {}", path.display()))?;
            let spec = ViewSpec::from_persisted(Some(&content));

            let mut engine = ViewEngine::new(config.clone(), sources.clone());
            let view = engine.update(spec, &cache)?.cloned();
            match view {
                Some(view) => {
                    println!("# {}", path.display());
                    print_view(&view, args.plain)?;
                    resolved += 1;
                }
                None => {
                    let status = engine
                        .status()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| engine.state().to_string());
                    log::warn!("{}: {}", path.display(), status);
                }
            }
        }
    }
    Ok(resolved)
}

fn print_view(view: &ResolvedView, plain: bool) -> Result<()> {
    if !plain {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }
    let table = view.display_rows();
    println!("{}", table.headers.join("\t"));
    for row in table.rows {
        println!("{}", row.join("\t"));
    }
    Ok(())
}
