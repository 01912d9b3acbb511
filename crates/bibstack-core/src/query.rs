//! Query kinds, query templates and the search error taxonomy.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Substitution slot in a [`QueryTemplate`].
pub const SLOT: &str = "$fill";

/// The entity type a search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Author profile search.
    Author,
    /// Document search.
    Docs,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Author => "author",
            QueryKind::Docs => "docs",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(QueryKind::Author),
            "docs" => Ok(QueryKind::Docs),
            other => Err(QueryError::InvalidRequest(format!(
                "unknown query type '{other}', expected 'author' or 'docs'"
            ))),
        }
    }
}

/// Errors a search can fail with.
///
/// `QueryTooComplex` and `ServiceUnavailable` are absorbed by the stacked
/// executor through splitting; the other two always reach the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Malformed or partial response. Retried once at the adapter boundary.
    #[error("malformed response: {0}")]
    TransientDecode(String),
    /// The service judged the query too long or too complex.
    #[error("query too large or complex: {0}")]
    QueryTooComplex(String),
    /// Server-side failure.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// The request itself is wrong; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl QueryError {
    /// Whether shrinking the query may make it succeed.
    pub fn is_splittable(&self) -> bool {
        matches!(
            self,
            QueryError::QueryTooComplex(_) | QueryError::ServiceUnavailable(_)
        )
    }
}

/// A query pattern with exactly one [`SLOT`].
///
/// Stored as the text around the slot, so filling never rescans
/// substituted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    prefix: String,
    suffix: String,
}

impl QueryTemplate {
    pub fn new(pattern: &str) -> Result<Self, QueryError> {
        match pattern.matches(SLOT).count() {
            1 => {
                let (prefix, suffix) = pattern.split_once(SLOT).unwrap_or((pattern, ""));
                Ok(Self {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                })
            }
            n => Err(QueryError::InvalidRequest(format!(
                "query template must contain exactly one {SLOT}, found {n}: {pattern}"
            ))),
        }
    }

    /// Substitute `value` into the slot.
    pub fn fill(&self, value: &str) -> String {
        let mut query = String::with_capacity(self.prefix.len() + value.len() + self.suffix.len());
        query.push_str(&self.prefix);
        query.push_str(value);
        query.push_str(&self.suffix);
        query
    }

    /// Fill the slot with `group` joined on `joiner`.
    pub fn fill_group(&self, group: &[String], joiner: &str) -> String {
        self.fill(&group.join(joiner))
    }

    /// `<query> AND <clause>($fill)`: narrows an already concrete query.
    pub fn scoped(query: &str, clause: &str) -> Self {
        Self {
            prefix: format!("{query}{}", scope_marker(clause)),
            suffix: ")".to_string(),
        }
    }
}

/// The text a scoped query carries, e.g. ` AND EID(`.
pub fn scope_marker(clause: &str) -> String {
    format!(" AND {clause}(")
}

impl FromStr for QueryTemplate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, SLOT, self.suffix)
    }
}
