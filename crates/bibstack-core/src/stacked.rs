//! Resilient batch queries.
//!
//! A [`StackedQuery`] joins many identifiers into one search. When the
//! service rejects a batch as too complex (or falls over), the batch is
//! bisected and each half retried. A single identifier that still fails is
//! narrowed once more with a [`ScopeFallback`], which splits its query into
//! sub-queries over a partition of the result space. Whatever still fails
//! after that is reported as unresolved instead of aborting the run.

use std::fmt::Display;
use std::sync::Arc;

use crate::backend::{SearchBackend, SearchHit};
use crate::query::{QueryError, QueryKind, QueryTemplate, scope_marker};
use crate::rate_limit::{Pacer, query_with_retry};

/// Progress callback: `(done, total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// How a single failing identifier's query is split into smaller ones.
///
/// The query is rewritten to `<query> AND <clause>($fill)` and the slot is
/// filled with `tokens` joined on `joiner`. The token set is searched as two
/// halves from the start, each bisected like any other group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFallback {
    pub clause: String,
    pub tokens: Vec<String>,
    pub joiner: String,
}

impl ScopeFallback {
    /// Partition documents by the last digit of their EID: `*0` .. `*9`.
    pub fn eid_suffix() -> Self {
        Self {
            clause: "EID".to_string(),
            tokens: (0..10).map(|d| format!("*{d}")).collect(),
            joiner: " OR ".to_string(),
        }
    }

    /// Whether `query` has already been narrowed by this fallback.
    pub fn is_applied(&self, query: &str) -> bool {
        query.contains(&scope_marker(&self.clause))
    }

    /// Default strategy for a query kind. Only document ids are EID-shaped.
    pub fn default_for(kind: QueryKind) -> Option<Self> {
        match kind {
            QueryKind::Docs => Some(Self::eid_suffix()),
            QueryKind::Author => None,
        }
    }
}

/// Result of a [`StackedQuery`] run.
#[derive(Debug, Clone, Default)]
pub struct StackedOutcome {
    /// Every hit from every successful search, in completion order.
    pub hits: Vec<SearchHit>,
    /// Final value of the progress counter.
    pub progress: usize,
    /// Identifiers whose results could not be retrieved, in failure order.
    pub unresolved: Vec<String>,
    /// Number of queries issued, not counting retries of malformed responses.
    pub calls: usize,
}

impl StackedOutcome {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// A query narrowed by the fallback, remembering which identifier it serves.
#[derive(Debug)]
struct Scope {
    template: QueryTemplate,
    origin: String,
}

/// One unit on the work-list.
#[derive(Debug)]
struct Pending {
    group: Vec<String>,
    scope: Option<Arc<Scope>>,
}

/// Builder and runner for a batched search.
///
/// ```ignore
/// let outcome = StackedQuery::new(&backend, QueryKind::Docs, template, " OR ")
///     .total(ids.len())
///     .on_progress(&|done, total| eprintln!("{done}/{total}"))
///     .run(&ids)
///     .await?;
/// ```
pub struct StackedQuery<'a> {
    backend: &'a dyn SearchBackend,
    kind: QueryKind,
    template: QueryTemplate,
    joiner: String,
    refresh: bool,
    total: Option<usize>,
    fallback: Option<ScopeFallback>,
    pacer: Option<&'a Pacer>,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> StackedQuery<'a> {
    pub fn new(
        backend: &'a dyn SearchBackend,
        kind: QueryKind,
        template: QueryTemplate,
        joiner: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            kind,
            template,
            joiner: joiner.into(),
            refresh: false,
            total: None,
            fallback: ScopeFallback::default_for(kind),
            pacer: None,
            progress: None,
        }
    }

    /// Ask the backend to bypass its own response cache.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Enable progress reporting against `total` identifiers.
    pub fn total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    /// Replace (or with `None`, disable) the single-identifier fallback.
    pub fn fallback(mut self, fallback: Option<ScopeFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn pacer(mut self, pacer: Option<&'a Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Called with `(done, total)` after every successful primary search.
    /// Only fires when a total was given.
    pub fn on_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Search for every identifier in `ids`, starting the counter at zero.
    pub async fn run<T: Display>(&self, ids: &[T]) -> Result<StackedOutcome, QueryError> {
        self.run_from(ids, 0).await
    }

    /// Search for every identifier in `ids`, starting the counter at `start`.
    ///
    /// Splittable failures never escape: they are absorbed by bisection,
    /// the fallback, and finally the `unresolved` list. `TransientDecode`
    /// (after its retry) and `InvalidRequest` abort the run.
    pub async fn run_from<T: Display>(
        &self,
        ids: &[T],
        start: usize,
    ) -> Result<StackedOutcome, QueryError> {
        let mut outcome = StackedOutcome {
            progress: start,
            ..Default::default()
        };

        // LIFO: the first half of a split is pushed last so it runs first.
        let mut stack = vec![Pending {
            group: ids.iter().map(ToString::to_string).collect(),
            scope: None,
        }];

        while let Some(Pending { mut group, scope }) = stack.pop() {
            if group.is_empty() {
                continue;
            }

            let (template, joiner) = match (&scope, &self.fallback) {
                (Some(scope), Some(fallback)) => (&scope.template, fallback.joiner.as_str()),
                _ => (&self.template, self.joiner.as_str()),
            };
            let query = template.fill_group(&group, joiner);

            tracing::debug!(
                backend = self.backend.name(),
                kind = %self.kind,
                size = group.len(),
                scoped = scope.is_some(),
                "stacked search"
            );
            outcome.calls += 1;

            let err = match query_with_retry(
                self.backend,
                self.kind,
                &query,
                self.refresh,
                self.pacer,
            )
            .await
            {
                Ok(hits) => {
                    outcome.hits.extend(hits);
                    if scope.is_none()
                        && let Some(total) = self.total
                    {
                        outcome.progress += group.len();
                        if let Some(progress) = self.progress {
                            progress(outcome.progress, total);
                        }
                    }
                    continue;
                }
                Err(e) if e.is_splittable() => e,
                Err(e) => return Err(e),
            };

            if group.len() > 1 {
                let second = group.split_off(group.len() / 2);
                tracing::debug!(
                    first = group.len(),
                    second = second.len(),
                    error = %err,
                    "splitting batch"
                );
                stack.push(Pending {
                    group: second,
                    scope: scope.clone(),
                });
                stack.push(Pending { group, scope });
                continue;
            }

            if scope.is_none()
                && let Some(fallback) = &self.fallback
                && !fallback.is_applied(&query)
            {
                tracing::debug!(id = %group[0], clause = %fallback.clause, "scoping single identifier");
                let scope = Arc::new(Scope {
                    template: QueryTemplate::scoped(&query, &fallback.clause),
                    origin: group.swap_remove(0),
                });
                // Scoped searches start from two halves of the token set.
                let mut first = fallback.tokens.clone();
                let second = first.split_off(first.len() / 2);
                stack.push(Pending {
                    group: second,
                    scope: Some(Arc::clone(&scope)),
                });
                stack.push(Pending {
                    group: first,
                    scope: Some(scope),
                });
                continue;
            }

            let origin = match &scope {
                Some(scope) => scope.origin.clone(),
                None => group.swap_remove(0),
            };
            tracing::warn!(
                backend = self.backend.name(),
                id = %origin,
                query = %query,
                error = %err,
                "giving up on query"
            );
            if !outcome.unresolved.contains(&origin) {
                outcome.unresolved.push(origin);
            }
        }

        Ok(outcome)
    }
}
