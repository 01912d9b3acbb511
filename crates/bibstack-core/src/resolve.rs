//! Cache-first resolution of author profiles, author histories and source
//! rosters.
//!
//! Each flow partitions the requested keys against the cache, runs one
//! stacked query for whatever is missing, turns the hits into records,
//! stores them, and returns cached and fresh records together in request
//! order.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::CoreError;
use crate::backend::{AuthorHit, DocumentHit, SearchBackend, SearchHit};
use crate::cache::CacheStore;
use crate::model::{
    AuthorKey, AuthorRecord, AuthorSizeRecord, AuthorYearKey, AuthorYearRecord, CacheRecord,
    SourceYearKey, SourceYearRecord,
};
use crate::partition::{Partition, dedup_keys};
use crate::query::{QueryKind, QueryTemplate, SLOT};
use crate::rate_limit::Pacer;
use crate::stacked::{ProgressFn, StackedOutcome, StackedQuery};

const AUTHOR_JOINER: &str = ") OR AU-ID(";
const SOURCE_JOINER: &str = " OR ";

/// Knobs shared by every resolution flow.
#[derive(Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Drop the requested keys from the cache and ask the backend to bypass
    /// its own cache.
    pub refresh: bool,
    pub pacer: Option<&'a Pacer>,
    /// Called with `(done, total)` while the missing keys are searched.
    pub progress: Option<ProgressFn<'a>>,
}

/// What a resolution flow produced.
#[derive(Debug, Clone)]
pub struct Resolution<R: CacheRecord> {
    /// Cached and freshly searched records, in request order.
    pub records: Vec<R>,
    /// Keys the backend answered for, but returned nothing usable.
    pub missing: Vec<R::Key>,
    /// Identifiers whose searches failed; nothing was stored for them.
    pub failed: Vec<String>,
    /// Records taken from the cache without searching.
    pub cached: usize,
}

impl<R: CacheRecord> Resolution<R> {
    fn cached_only(partition: Partition<R>) -> Self {
        let cached = partition.incache.len();
        Self {
            records: partition.incache,
            missing: Vec::new(),
            failed: Vec::new(),
            cached,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

fn partition_for<R: CacheRecord>(
    store: &CacheStore,
    keys: &[R::Key],
    refresh: bool,
) -> Result<Partition<R>, CoreError> {
    let partition = if refresh {
        store.partition_refresh::<R>(keys)?
    } else {
        store.partition::<R>(keys)?
    };
    Ok(partition)
}

async fn search_missing<'a, T: std::fmt::Display>(
    backend: &'a dyn SearchBackend,
    kind: QueryKind,
    template: QueryTemplate,
    joiner: &str,
    ids: &[T],
    options: &ResolveOptions<'a>,
) -> Result<StackedOutcome, CoreError> {
    let mut query = StackedQuery::new(backend, kind, template, joiner)
        .refresh(options.refresh)
        .pacer(options.pacer);
    if let Some(progress) = options.progress {
        query = query.total(ids.len()).on_progress(progress);
    }
    Ok(query.run(ids).await?)
}

/// Store `fresh`, then assemble the answer in request order.
fn finish<R: CacheRecord>(
    store: &CacheStore,
    requested: &[R::Key],
    partition: Partition<R>,
    fresh: Vec<R>,
    failed: Vec<String>,
    failed_keys: &HashSet<R::Key>,
) -> Result<Resolution<R>, CoreError> {
    let written = store.insert(&fresh)?;
    let cached = partition.incache.len();

    let mut by_key: HashMap<R::Key, R> = partition
        .incache
        .into_iter()
        .chain(fresh)
        .map(|r| (r.key(), r))
        .collect();

    let mut records = Vec::with_capacity(by_key.len());
    let mut missing = Vec::new();
    for key in dedup_keys(requested) {
        match by_key.remove(&key) {
            Some(record) => records.push(record),
            None if failed_keys.contains(&key) => {}
            None => missing.push(key),
        }
    }

    tracing::info!(
        table = R::KIND.table(),
        cached,
        written,
        missing = missing.len(),
        failed = failed.len(),
        "resolved records"
    );
    Ok(Resolution {
        records,
        missing,
        failed,
        cached,
    })
}

/// Resolve author profiles by author id.
pub async fn resolve_authors(
    store: &CacheStore,
    backend: &dyn SearchBackend,
    auth_ids: &[i64],
    options: &ResolveOptions<'_>,
) -> Result<Resolution<AuthorRecord>, CoreError> {
    let requested: Vec<AuthorKey> = auth_ids
        .iter()
        .map(|&auth_id| AuthorKey { auth_id })
        .collect();
    let partition = partition_for::<AuthorRecord>(store, &requested, options.refresh)?;
    if partition.is_complete() {
        return Ok(Resolution::cached_only(partition));
    }

    let ids: Vec<i64> = partition.tosearch.iter().map(|k| k.auth_id).collect();
    let template = QueryTemplate::new(&format!("AU-ID({SLOT})"))?;
    let outcome = search_missing(
        backend,
        QueryKind::Author,
        template,
        AUTHOR_JOINER,
        &ids,
        options,
    )
    .await?;

    let wanted: HashSet<i64> = ids.iter().copied().collect();
    let mut seen = HashSet::new();
    let fresh: Vec<AuthorRecord> = outcome
        .hits
        .into_iter()
        .filter_map(|hit| match hit {
            SearchHit::Author(author) => author_record(author),
            SearchHit::Document(_) => None,
        })
        .filter(|r| wanted.contains(&r.auth_id) && seen.insert(r.auth_id))
        .collect();

    let failed_keys = parse_failed(&outcome.unresolved, |auth_id| AuthorKey { auth_id });
    finish(
        store,
        &requested,
        partition,
        fresh,
        outcome.unresolved,
        &failed_keys,
    )
}

fn author_record(hit: AuthorHit) -> Option<AuthorRecord> {
    Some(AuthorRecord {
        auth_id: hit.auth_id()?,
        eid: hit.eid,
        surname: hit.surname,
        initials: hit.initials,
        givenname: hit.givenname,
        affiliation: hit.affiliation,
        documents: hit.documents,
        affiliation_id: hit.affiliation_id,
        city: hit.city,
        country: hit.country,
        areas: hit.areas,
    })
}

/// Resolve each author's publication history up to and including `year`.
///
/// Alongside each [`AuthorYearRecord`] the matching [`AuthorSizeRecord`] is
/// stored. Authors without any publication are stored with zero counts.
pub async fn resolve_author_years(
    store: &CacheStore,
    backend: &dyn SearchBackend,
    auth_ids: &[i64],
    year: i32,
    options: &ResolveOptions<'_>,
) -> Result<Resolution<AuthorYearRecord>, CoreError> {
    let requested: Vec<AuthorYearKey> = auth_ids
        .iter()
        .map(|&auth_id| AuthorYearKey { auth_id, year })
        .collect();
    let partition = partition_for::<AuthorYearRecord>(store, &requested, options.refresh)?;
    if partition.is_complete() {
        return Ok(Resolution::cached_only(partition));
    }

    let ids: Vec<i64> = partition.tosearch.iter().map(|k| k.auth_id).collect();
    let template =
        QueryTemplate::new(&format!("AU-ID({SLOT}) AND PUBYEAR BEF {}", year + 1))?;
    let outcome = search_missing(
        backend,
        QueryKind::Docs,
        template,
        AUTHOR_JOINER,
        &ids,
        options,
    )
    .await?;

    let failed_keys = parse_failed(&outcome.unresolved, |auth_id| AuthorYearKey {
        auth_id,
        year,
    });
    let docs: Vec<&DocumentHit> = documents(&outcome.hits).collect();
    let fresh: Vec<AuthorYearRecord> = partition
        .tosearch
        .iter()
        .filter(|key| !failed_keys.contains(*key))
        .map(|key| author_history(key.auth_id, year, &docs))
        .collect();

    let sizes: Vec<AuthorSizeRecord> = fresh
        .iter()
        .map(|r| AuthorSizeRecord {
            auth_id: r.auth_id,
            year: r.year,
            n_pubs: r.n_pubs,
        })
        .collect();
    if options.refresh {
        let keys: Vec<AuthorYearKey> = sizes.iter().map(|s| s.key()).collect();
        store.invalidate::<AuthorSizeRecord>(&keys)?;
    }
    store.insert(&sizes)?;

    finish(
        store,
        &requested,
        partition,
        fresh,
        outcome.unresolved,
        &failed_keys,
    )
}

/// Count distinct publications and co-authors of `auth_id` among `docs`.
fn author_history(auth_id: i64, year: i32, docs: &[&DocumentHit]) -> AuthorYearRecord {
    let mut pubs = HashSet::new();
    let mut coauthors = HashSet::new();
    let mut first_year: Option<i32> = None;

    for doc in docs {
        let authors = doc.authors();
        if !authors.contains(&auth_id) {
            continue;
        }
        if !pubs.insert(doc.eid.as_str()) {
            continue;
        }
        coauthors.extend(authors.into_iter().filter(|&a| a != auth_id));
        if let Ok(Some(y)) = doc.year() {
            first_year = Some(first_year.map_or(y, |f| f.min(y)));
        }
    }

    AuthorYearRecord {
        auth_id,
        year,
        first_year,
        n_pubs: pubs.len() as i64,
        n_coauth: coauthors.len() as i64,
    }
}

/// Resolve the publications and author roster of each source in `year`.
///
/// Sources without any publication are stored with `n_pubs = 0` so they
/// are not searched again.
pub async fn resolve_source_years(
    store: &CacheStore,
    backend: &dyn SearchBackend,
    source_ids: &[i64],
    year: i32,
    options: &ResolveOptions<'_>,
) -> Result<Resolution<SourceYearRecord>, CoreError> {
    let requested: Vec<SourceYearKey> = source_ids
        .iter()
        .map(|&source_id| SourceYearKey { source_id, year })
        .collect();
    let partition = partition_for::<SourceYearRecord>(store, &requested, options.refresh)?;
    if partition.is_complete() {
        return Ok(Resolution::cached_only(partition));
    }

    let mut ids: Vec<i64> = partition.tosearch.iter().map(|k| k.source_id).collect();
    ids.sort_unstable();
    let template = QueryTemplate::new(&format!("SOURCE-ID({SLOT}) AND PUBYEAR IS {year}"))?;
    let outcome = search_missing(
        backend,
        QueryKind::Docs,
        template,
        SOURCE_JOINER,
        &ids,
        options,
    )
    .await?;

    let mut by_source: HashMap<i64, (HashSet<&str>, BTreeSet<i64>)> = HashMap::new();
    for doc in documents(&outcome.hits) {
        let Some(source_id) = doc.source() else {
            continue;
        };
        let (eids, auids) = by_source.entry(source_id).or_default();
        eids.insert(doc.eid.as_str());
        auids.extend(doc.authors());
    }

    let failed_keys = parse_failed(&outcome.unresolved, |source_id| SourceYearKey {
        source_id,
        year,
    });
    let fresh: Vec<SourceYearRecord> = partition
        .tosearch
        .iter()
        .filter(|key| !failed_keys.contains(*key))
        .map(|key| match by_source.remove(&key.source_id) {
            Some((eids, auids)) => SourceYearRecord {
                source_id: key.source_id,
                year,
                n_pubs: eids.len() as i64,
                auids: auids.into_iter().collect(),
            },
            None => SourceYearRecord {
                source_id: key.source_id,
                year,
                n_pubs: 0,
                auids: Vec::new(),
            },
        })
        .collect();

    finish(
        store,
        &requested,
        partition,
        fresh,
        outcome.unresolved,
        &failed_keys,
    )
}

fn documents(hits: &[SearchHit]) -> impl Iterator<Item = &DocumentHit> {
    hits.iter().filter_map(|hit| match hit {
        SearchHit::Document(doc) => Some(doc),
        SearchHit::Author(_) => None,
    })
}

fn parse_failed<K, F>(unresolved: &[String], to_key: F) -> HashSet<K>
where
    K: Eq + std::hash::Hash,
    F: Fn(i64) -> K,
{
    unresolved
        .iter()
        .filter_map(|id| id.parse().ok())
        .map(to_key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::query::QueryError;

    fn paper(eid: &str, date: &str, source: i64, authors: &[i64]) -> SearchHit {
        SearchHit::Document(DocumentHit {
            eid: eid.into(),
            cover_date: Some(date.into()),
            source_id: Some(source.to_string()),
            author_ids: Some(
                authors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            afid: None,
            subtype: Some("ar".into()),
        })
    }

    #[test]
    fn history_counts_distinct_pubs_and_coauthors() {
        let hits = [
            paper("2-s2.0-1", "2012-01-01", 7, &[10, 20, 30]),
            paper("2-s2.0-1", "2012-01-01", 7, &[10, 20, 30]),
            paper("2-s2.0-2", "2010-06-01", 7, &[10, 20]),
            paper("2-s2.0-3", "2015-06-01", 7, &[99]),
        ];
        let docs: Vec<&DocumentHit> = documents(&hits).collect();
        let r = author_history(10, 2016, &docs);
        assert_eq!(r.n_pubs, 2);
        assert_eq!(r.n_coauth, 2);
        assert_eq!(r.first_year, Some(2010));

        let none = author_history(55, 2016, &docs);
        assert_eq!(none.n_pubs, 0);
        assert_eq!(none.first_year, None);
    }

    #[tokio::test]
    async fn authors_come_back_in_request_order() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .insert(&[AuthorRecord {
                auth_id: 2,
                eid: "9-s2.0-2".into(),
                surname: Some("Cached".into()),
                initials: None,
                givenname: None,
                affiliation: None,
                documents: 1,
                affiliation_id: None,
                city: None,
                country: None,
                areas: None,
            }])
            .unwrap();

        let mock = MockBackend::fixed(
            "Mock",
            Ok(vec![SearchHit::Author(AuthorHit {
                eid: "9-s2.0-1".into(),
                surname: Some("Fresh".into()),
                documents: 4,
                ..Default::default()
            })]),
        );
        let res = resolve_authors(&store, &mock, &[1, 2, 3], &ResolveOptions::default())
            .await
            .unwrap();

        let ids: Vec<i64> = res.records.iter().map(|r| r.auth_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(res.missing, vec![AuthorKey { auth_id: 3 }]);
        assert_eq!(res.cached, 1);
        assert_eq!(mock.queries(), vec!["AU-ID(1) OR AU-ID(3)"]);
        assert_eq!(store.count(crate::model::RecordKind::Author).unwrap(), 2);
    }

    #[tokio::test]
    async fn fully_cached_request_makes_no_calls() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .insert(&[SourceYearRecord {
                source_id: 22900,
                year: 2010,
                n_pubs: 3,
                auids: vec![1],
            }])
            .unwrap();
        let mock = MockBackend::fixed("Mock", Ok(vec![]));
        let res = resolve_source_years(&store, &mock, &[22900], 2010, &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(res.records.len(), 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_sources_are_not_stored() {
        let store = CacheStore::open_in_memory().unwrap();
        let mock = MockBackend::new("Mock", |_, q| {
            if q.contains("SOURCE-ID(2)") || q.contains(" OR 2") {
                Err(QueryError::QueryTooComplex("x".into()))
            } else {
                Ok(vec![paper("2-s2.0-11", "2010-01-01", 1, &[5, 6])])
            }
        });
        let res = resolve_source_years(&store, &mock, &[2, 1], 2010, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(res.failed, vec!["2"]);
        assert!(res.missing.is_empty());
        assert_eq!(res.records.len(), 1);
        assert_eq!(res.records[0].auids, vec![5, 6]);
        assert_eq!(store.count(crate::model::RecordKind::SourceYear).unwrap(), 1);
    }
}
