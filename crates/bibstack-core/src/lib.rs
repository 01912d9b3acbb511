use std::path::PathBuf;

use thiserror::Error;

pub mod backend;
pub mod cache;
pub mod config_file;
pub mod model;
pub mod partition;
pub mod query;
pub mod rate_limit;
pub mod resolve;
pub mod stacked;

// Re-export for convenience
pub use backend::{AuthorHit, DocumentHit, SearchBackend, SearchHit};
pub use cache::{CacheError, CacheStats, CacheStore};
pub use model::{
    AuthorKey, AuthorRecord, AuthorSizeRecord, AuthorYearKey, AuthorYearRecord, CacheKey,
    CacheRecord, ParseKeyError, RecordKind, SourceYearKey, SourceYearRecord,
};
pub use partition::Partition;
pub use query::{QueryError, QueryKind, QueryTemplate};
pub use rate_limit::Pacer;
pub use resolve::{
    Resolution, ResolveOptions, resolve_author_years, resolve_authors, resolve_source_years,
};
pub use stacked::{ProgressFn, ScopeFallback, StackedOutcome, StackedQuery};

/// Errors that can occur while resolving records.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Runtime settings, resolved once from the config file cascade.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_path: PathBuf,
    /// Pace searches at this rate; `None` leaves them unpaced.
    pub requests_per_second: Option<u32>,
    /// Whether resolution flows report `(done, total)` progress.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_path: config_file::default_cache_path(),
            requests_per_second: None,
            progress: false,
        }
    }
}

impl Config {
    /// Settings from a (possibly partial) config file, defaults elsewhere.
    pub fn from_file(file: &config_file::ConfigFile) -> Self {
        let defaults = Self::default();
        let query = file.query.as_ref();
        Self {
            cache_path: file
                .cache
                .as_ref()
                .and_then(|c| c.path.as_deref())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            requests_per_second: query.and_then(|q| q.requests_per_second),
            progress: query.and_then(|q| q.progress).unwrap_or(defaults.progress),
        }
    }

    /// A pacer for the configured rate, if any.
    pub fn pacer(&self) -> Option<Pacer> {
        self.requests_per_second.map(Pacer::per_second)
    }

    /// Options for a resolution flow. `report` is installed only when
    /// progress is enabled.
    pub fn resolve_options<'a>(
        &self,
        refresh: bool,
        pacer: Option<&'a Pacer>,
        report: ProgressFn<'a>,
    ) -> ResolveOptions<'a> {
        ResolveOptions {
            refresh,
            pacer,
            progress: self.progress.then_some(report),
        }
    }
}
