use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use bibstack_core::config_file::load_config;
use bibstack_core::{
    AuthorRecord, AuthorSizeRecord, AuthorYearRecord, CacheRecord, CacheStore, Config,
    ParseKeyError, RecordKind, SourceYearRecord,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Inspect and seed the bibstack record cache
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the cache file (overrides BIBSTACK_CACHE and the config file)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the cache tables if they do not exist
    Init {
        /// Drop and recreate every table
        #[arg(long)]
        reset: bool,
    },

    /// Show row counts per table
    Stats,

    /// Show which keys are cached and which still need a search
    Lookup {
        /// Record kind: author, author_year, author_size or source
        kind: RecordKind,

        /// Keys: `<id>` for authors, `<id>:<year>` otherwise
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Insert records from a JSON array file
    Import {
        /// Record kind: author, author_year, author_size or source
        kind: RecordKind,

        /// Path to a JSON file holding an array of records
        file: PathBuf,
    },

    /// Remove keys from the cache
    Invalidate {
        /// Record kind: author, author_year, author_size or source
        kind: RecordKind,

        /// Keys: `<id>` for authors, `<id>:<year>` otherwise
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);
    let path = resolve_cache_path(cli.cache);
    tracing::debug!(path = %path.display(), "opening cache");
    let store = CacheStore::open(&path)
        .with_context(|| format!("Failed to open cache at {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Init { reset } => {
            store.ensure_schema(reset)?;
            if reset {
                writeln!(out, "Reset cache at {}", path.display())?;
            } else {
                writeln!(out, "Cache ready at {}", path.display())?;
            }
        }
        Command::Stats => {
            output::print_stats(&mut out, &path, &store.stats()?, color)?;
        }
        Command::Lookup { kind, keys } => match kind {
            RecordKind::Author => lookup::<AuthorRecord>(&store, &keys, &mut out, color)?,
            RecordKind::AuthorYear => lookup::<AuthorYearRecord>(&store, &keys, &mut out, color)?,
            RecordKind::AuthorSize => lookup::<AuthorSizeRecord>(&store, &keys, &mut out, color)?,
            RecordKind::SourceYear => lookup::<SourceYearRecord>(&store, &keys, &mut out, color)?,
        },
        Command::Import { kind, file } => match kind {
            RecordKind::Author => import::<AuthorRecord>(&store, &file, &mut out, color)?,
            RecordKind::AuthorYear => import::<AuthorYearRecord>(&store, &file, &mut out, color)?,
            RecordKind::AuthorSize => import::<AuthorSizeRecord>(&store, &file, &mut out, color)?,
            RecordKind::SourceYear => import::<SourceYearRecord>(&store, &file, &mut out, color)?,
        },
        Command::Invalidate { kind, keys } => match kind {
            RecordKind::Author => invalidate::<AuthorRecord>(&store, &keys, &mut out, color)?,
            RecordKind::AuthorYear => {
                invalidate::<AuthorYearRecord>(&store, &keys, &mut out, color)?
            }
            RecordKind::AuthorSize => {
                invalidate::<AuthorSizeRecord>(&store, &keys, &mut out, color)?
            }
            RecordKind::SourceYear => {
                invalidate::<SourceYearRecord>(&store, &keys, &mut out, color)?
            }
        },
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// CLI flag > BIBSTACK_CACHE > config file > platform default.
fn resolve_cache_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("BIBSTACK_CACHE").ok().map(PathBuf::from))
        .unwrap_or_else(|| Config::from_file(&load_config()).cache_path)
}

fn parse_keys<R>(keys: &[String]) -> anyhow::Result<Vec<R::Key>>
where
    R: CacheRecord,
    R::Key: FromStr<Err = ParseKeyError>,
{
    keys.iter()
        .map(|k| k.parse::<R::Key>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid key for {}", R::KIND))
}

fn lookup<R>(
    store: &CacheStore,
    keys: &[String],
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()>
where
    R: CacheRecord + Serialize,
    R::Key: FromStr<Err = ParseKeyError> + Display,
{
    let keys = parse_keys::<R>(keys)?;
    let partition = store.partition::<R>(&keys)?;
    output::print_partition(w, &partition, color)?;
    Ok(())
}

fn import<R>(
    store: &CacheStore,
    file: &Path,
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()>
where
    R: CacheRecord + DeserializeOwned,
{
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<R> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} records from {}", R::KIND, file.display()))?;
    let written = store.insert(&records)?;
    output::print_import_summary(w, R::KIND, records.len(), written, color)?;
    Ok(())
}

fn invalidate<R>(
    store: &CacheStore,
    keys: &[String],
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()>
where
    R: CacheRecord,
    R::Key: FromStr<Err = ParseKeyError>,
{
    let keys = parse_keys::<R>(keys)?;
    let removed = store.invalidate::<R>(&keys)?;
    output::print_invalidated(w, R::KIND, keys.len(), removed, color)?;
    Ok(())
}
