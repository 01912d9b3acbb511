//! Mock search backend for testing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{SearchBackend, SearchFuture, SearchHit};
use crate::query::{QueryError, QueryKind};

type Handler = dyn Fn(QueryKind, &str) -> Result<Vec<SearchHit>, QueryError> + Send + Sync;

/// A hand-rolled mock implementing [`SearchBackend`] for tests.
///
/// Responses come from a handler closure that sees the query kind and the
/// concrete query string. Every call is counted and its query recorded.
pub struct MockBackend {
    name: &'static str,
    handler: Box<Handler>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a mock answering every query through `handler`.
    pub fn new<F>(name: &'static str, handler: F) -> Self
    where
        F: Fn(QueryKind, &str) -> Result<Vec<SearchHit>, QueryError> + Send + Sync + 'static,
    {
        Self {
            name,
            handler: Box::new(handler),
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns `response`.
    pub fn fixed(name: &'static str, response: Result<Vec<SearchHit>, QueryError>) -> Self {
        Self::new(name, move |_, _| response.clone())
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(
        name: &'static str,
        mut responses: Vec<Result<Vec<SearchHit>, QueryError>>,
    ) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        let remaining = Mutex::new(responses);
        Self::new(name, move |_, _| {
            let mut seq = remaining.lock().unwrap();
            if seq.len() > 1 {
                seq.pop().unwrap()
            } else {
                seq[0].clone()
            }
        })
    }

    /// How many times `search()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every query string seen so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchBackend for MockBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn search<'a>(&'a self, kind: QueryKind, query: &'a str, _refresh: bool) -> SearchFuture<'a> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        let response = (self.handler)(kind, query);
        Box::pin(async move { response })
    }
}
