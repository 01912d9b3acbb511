//! Split requested keys into records already cached and keys still to search.

use std::collections::HashSet;

use crate::cache::{CacheError, CacheStore};
use crate::model::CacheRecord;

/// Outcome of partitioning a key set against the cache.
///
/// `incache` and `tosearch` are disjoint, and together cover every distinct
/// requested key. Both follow the first-occurrence order of the request.
#[derive(Debug, Clone)]
pub struct Partition<R: CacheRecord> {
    pub incache: Vec<R>,
    pub tosearch: Vec<R::Key>,
}

impl<R: CacheRecord> Partition<R> {
    pub fn empty() -> Self {
        Self {
            incache: Vec::new(),
            tosearch: Vec::new(),
        }
    }

    /// True when nothing needs to be searched.
    pub fn is_complete(&self) -> bool {
        self.tosearch.is_empty()
    }

    pub fn incache_keys(&self) -> Vec<R::Key> {
        self.incache.iter().map(|r| r.key()).collect()
    }
}

/// Drop repeated keys, keeping the first occurrence.
pub fn dedup_keys<K: Clone + Eq + std::hash::Hash>(keys: &[K]) -> Vec<K> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .filter(|k| seen.insert((*k).clone()))
        .cloned()
        .collect()
}

impl CacheStore {
    /// Partition `keys` into cached records and keys that must be queried.
    pub fn partition<R: CacheRecord>(&self, keys: &[R::Key]) -> Result<Partition<R>, CacheError> {
        let requested = dedup_keys(keys);
        if requested.is_empty() {
            return Ok(Partition::empty());
        }

        let present = self.lookup::<R>(&requested)?;
        let (hits, tosearch): (Vec<_>, Vec<_>) =
            requested.into_iter().partition(|k| present.contains(k));
        let incache = self.fetch::<R>(&hits)?;

        tracing::debug!(
            table = R::KIND.table(),
            incache = incache.len(),
            tosearch = tosearch.len(),
            "partitioned keys"
        );
        Ok(Partition { incache, tosearch })
    }

    /// Like [`partition`](Self::partition), but drops the requested keys from
    /// the cache first so every one of them is searched again.
    pub fn partition_refresh<R: CacheRecord>(
        &self,
        keys: &[R::Key],
    ) -> Result<Partition<R>, CacheError> {
        let requested = dedup_keys(keys);
        self.invalidate::<R>(&requested)?;
        Ok(Partition {
            incache: Vec::new(),
            tosearch: requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuthorKey, AuthorRecord, AuthorYearKey, AuthorYearRecord, SourceYearKey,
        SourceYearRecord,
    };

    fn author(auth_id: i64) -> AuthorRecord {
        AuthorRecord {
            auth_id,
            eid: format!("9-s2.0-{auth_id}"),
            surname: Some("Rose".into()),
            initials: Some("M.E.".into()),
            givenname: Some("Michael E.".into()),
            affiliation: None,
            documents: 12,
            affiliation_id: None,
            city: None,
            country: None,
            areas: None,
        }
    }

    fn keys(ids: &[i64]) -> Vec<AuthorKey> {
        ids.iter().map(|&auth_id| AuthorKey { auth_id }).collect()
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(dedup_keys(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn empty_request_yields_empty_outputs() {
        let store = CacheStore::open_in_memory().unwrap();
        let p = store.partition::<AuthorRecord>(&[]).unwrap();
        assert!(p.incache.is_empty());
        assert!(p.tosearch.is_empty());
        assert!(p.is_complete());
    }

    #[test]
    fn splits_cached_author_from_missing_one() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(53164702100)]).unwrap();

        let p = store
            .partition::<AuthorRecord>(&keys(&[53164702100, 57197093438]))
            .unwrap();
        assert_eq!(p.incache_keys(), keys(&[53164702100]));
        assert_eq!(p.incache[0].documents, 12);
        assert_eq!(p.tosearch, keys(&[57197093438]));
    }

    #[test]
    fn tosearch_preserves_request_order_and_collapses_duplicates() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(2)]).unwrap();
        let p = store
            .partition::<AuthorRecord>(&keys(&[5, 2, 4, 5, 1, 4]))
            .unwrap();
        assert_eq!(p.tosearch, keys(&[5, 4, 1]));
        assert_eq!(p.incache.len(), 1);
    }

    #[test]
    fn identifier_can_land_in_both_outputs_for_different_years() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .insert(&[SourceYearRecord {
                source_id: 22900,
                year: 2010,
                n_pubs: 4,
                auids: vec![1, 2],
            }])
            .unwrap();
        let request = [
            SourceYearKey {
                source_id: 22900,
                year: 2010,
            },
            SourceYearKey {
                source_id: 22900,
                year: 2005,
            },
        ];
        let p = store.partition::<SourceYearRecord>(&request).unwrap();
        assert_eq!(p.incache_keys(), vec![request[0]]);
        assert_eq!(p.tosearch, vec![request[1]]);
    }

    #[test]
    fn author_year_lookup_after_insert() {
        let store = CacheStore::open_in_memory().unwrap();
        let key = AuthorYearKey {
            auth_id: 53164702100,
            year: 2016,
        };

        let before = store.partition::<AuthorYearRecord>(&[key]).unwrap();
        assert!(before.incache.is_empty());
        assert_eq!(before.tosearch, vec![key]);

        store
            .insert(&[AuthorYearRecord {
                auth_id: 53164702100,
                year: 2016,
                first_year: Some(2012),
                n_pubs: 6,
                n_coauth: 9,
            }])
            .unwrap();

        let after = store.partition::<AuthorYearRecord>(&[key]).unwrap();
        assert!(after.tosearch.is_empty());
        assert_eq!(after.incache.len(), 1);
        assert_eq!(after.incache[0].year, 2016);
        assert_eq!(after.incache[0].first_year, Some(2012));
    }

    #[test]
    fn refresh_moves_everything_to_tosearch() {
        let store = CacheStore::open_in_memory().unwrap();
        store.insert(&[author(1), author(2)]).unwrap();
        let p = store
            .partition_refresh::<AuthorRecord>(&keys(&[2, 3, 2]))
            .unwrap();
        assert!(p.incache.is_empty());
        assert_eq!(p.tosearch, keys(&[2, 3]));

        let after = store.partition::<AuthorRecord>(&keys(&[1, 2])).unwrap();
        assert_eq!(after.incache_keys(), keys(&[1]));
        assert_eq!(after.tosearch, keys(&[2]));
    }
}
