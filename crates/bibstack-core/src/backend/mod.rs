//! Search backend trait and the records a search returns.
//!
//! Network transport and authentication live in the backend implementation;
//! the rest of the crate only sees [`SearchBackend::search`] and the
//! [`QueryError`] taxonomy.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::query::{QueryError, QueryKind};

/// Future returned by [`SearchBackend::search`].
pub type SearchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<SearchHit>, QueryError>> + Send + 'a>>;

/// A bibliographic search service.
pub trait SearchBackend: Send + Sync {
    /// The canonical name of this service (e.g., "Scopus").
    fn name(&self) -> &str;

    /// Run one search. `refresh` asks the backend to bypass any response
    /// cache of its own.
    fn search<'a>(&'a self, kind: QueryKind, query: &'a str, refresh: bool) -> SearchFuture<'a>;
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchHit {
    Author(AuthorHit),
    Document(DocumentHit),
}

/// An author profile from an author search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorHit {
    /// Profile EID, e.g. `9-s2.0-53164702100`.
    pub eid: String,
    pub surname: Option<String>,
    pub initials: Option<String>,
    pub givenname: Option<String>,
    pub affiliation: Option<String>,
    pub documents: i64,
    pub affiliation_id: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub areas: Option<String>,
}

impl AuthorHit {
    /// The numeric author id: the last `-` separated segment of the EID.
    pub fn auth_id(&self) -> Option<i64> {
        self.eid.rsplit('-').next()?.parse().ok()
    }
}

/// A document from a document search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHit {
    /// Document EID, e.g. `2-s2.0-85068268027`.
    pub eid: String,
    /// `YYYY-MM-DD`.
    pub cover_date: Option<String>,
    pub source_id: Option<String>,
    /// Semicolon-separated author ids.
    pub author_ids: Option<String>,
    /// Semicolon-separated affiliation ids.
    pub afid: Option<String>,
    pub subtype: Option<String>,
}

impl DocumentHit {
    /// Publication year parsed from the cover date.
    ///
    /// `Ok(None)` when no cover date is given, `Err` when one is given but
    /// does not start with a four-digit year.
    pub fn year(&self) -> Result<Option<i32>, QueryError> {
        let Some(date) = self.cover_date.as_deref() else {
            return Ok(None);
        };
        date.get(..4)
            .and_then(|y| y.parse().ok())
            .map(Some)
            .ok_or_else(|| {
                QueryError::TransientDecode(format!(
                    "document {} has unparseable cover date '{date}'",
                    self.eid
                ))
            })
    }

    /// Numeric author ids, skipping anything that does not parse.
    pub fn authors(&self) -> Vec<i64> {
        self.author_ids
            .as_deref()
            .map(|ids| {
                ids.split(';')
                    .filter_map(|id| id.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn source(&self) -> Option<i64> {
        self.source_id.as_deref()?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_id_from_eid() {
        let hit = AuthorHit {
            eid: "9-s2.0-53164702100".into(),
            ..Default::default()
        };
        assert_eq!(hit.auth_id(), Some(53164702100));

        let bad = AuthorHit {
            eid: "9-s2.0-".into(),
            ..Default::default()
        };
        assert_eq!(bad.auth_id(), None);
    }

    #[test]
    fn document_year() {
        let mut doc = DocumentHit {
            eid: "2-s2.0-1".into(),
            cover_date: Some("2016-05-01".into()),
            ..Default::default()
        };
        assert_eq!(doc.year().unwrap(), Some(2016));

        doc.cover_date = None;
        assert_eq!(doc.year().unwrap(), None);

        doc.cover_date = Some("n/a".into());
        assert!(matches!(doc.year(), Err(QueryError::TransientDecode(_))));
    }

    #[test]
    fn document_authors_skip_garbage() {
        let doc = DocumentHit {
            eid: "2-s2.0-1".into(),
            author_ids: Some("53164702100;x; 57197093438".into()),
            ..Default::default()
        };
        assert_eq!(doc.authors(), vec![53164702100, 57197093438]);
    }

    #[test]
    fn hit_serializes_with_type_tag() {
        let hit = SearchHit::Document(DocumentHit {
            eid: "2-s2.0-1".into(),
            ..Default::default()
        });
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["type"], "document");
        assert_eq!(json["eid"], "2-s2.0-1");
    }
}
