//! Request pacing and the single-retry policy at the adapter boundary.
//!
//! Every search waits for its governor permit via `until_ready()`, which
//! spaces requests at the configured rate. Responses are validated before
//! they are handed on; a malformed response is retried exactly once.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::backend::{SearchBackend, SearchHit};
use crate::query::{QueryError, QueryKind};

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Calls made per query before a [`QueryError::TransientDecode`] is given up on.
pub const MAX_ATTEMPTS: usize = 2;

/// Spaces outgoing searches at a fixed rate.
pub struct Pacer {
    limiter: DirectLimiter,
    period: Duration,
}

impl Pacer {
    /// Allow one request every `period`. `None` for a zero period.
    pub fn new(period: Duration) -> Option<Self> {
        let quota = Quota::with_period(period)?;
        Some(Self {
            limiter: DirectLimiter::direct(quota),
            period,
        })
    }

    /// Allow `n` requests per second. Zero is treated as one.
    pub fn per_second(n: u32) -> Self {
        let n = NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: DirectLimiter::direct(Quota::per_second(n)),
            period: Duration::from_secs(1) / n.get(),
        }
    }

    /// Wait until the limiter allows a request.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer").field("period", &self.period).finish()
    }
}

/// Run one search through `backend`, paced by `pacer` when given.
///
/// 1. Waits for a pacer permit (if any)
/// 2. Calls `backend.search()` and validates the hits
/// 3. On `TransientDecode`: retries once, then returns the error
/// 4. On any other error or success: returns immediately
pub async fn query_with_retry(
    backend: &dyn SearchBackend,
    kind: QueryKind,
    query: &str,
    refresh: bool,
    pacer: Option<&Pacer>,
) -> Result<Vec<SearchHit>, QueryError> {
    let mut attempt = 1;
    loop {
        if let Some(p) = pacer {
            p.acquire().await;
        }

        let result = backend
            .search(kind, query, refresh)
            .await
            .and_then(|hits| validate(kind, hits));

        match result {
            Err(QueryError::TransientDecode(msg)) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    backend = backend.name(),
                    %kind,
                    attempt,
                    error = %msg,
                    "malformed response, retrying"
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Reject responses the rest of the crate could not use.
fn validate(kind: QueryKind, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>, QueryError> {
    for hit in &hits {
        match (kind, hit) {
            (QueryKind::Docs, SearchHit::Document(doc)) => {
                doc.year()?;
            }
            (QueryKind::Author, SearchHit::Author(author)) => {
                if author.auth_id().is_none() {
                    return Err(QueryError::TransientDecode(format!(
                        "author profile with unusable eid '{}'",
                        author.eid
                    )));
                }
            }
            (kind, _) => {
                return Err(QueryError::TransientDecode(format!(
                    "{kind} search returned a hit of the wrong type"
                )));
            }
        }
    }
    Ok(hits)
}
