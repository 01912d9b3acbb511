//! Record kinds stored in the cache, their composite keys and payload rows.
//!
//! Each [`RecordKind`] maps to one SQLite table. A record type implements
//! [`CacheRecord`], which ties it to its kind and to a [`CacheKey`] type whose
//! fields are exactly the table's primary-key columns.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::{Type, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four cached record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Author profile, keyed by `auth_id`.
    Author,
    /// Author publication history up to a year, keyed by `(auth_id, year)`.
    AuthorYear,
    /// Author publication count up to a year, keyed by `(auth_id, year)`.
    AuthorSize,
    /// Source publication count in a year, keyed by `(source_id, year)`.
    SourceYear,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Author,
        RecordKind::AuthorYear,
        RecordKind::AuthorSize,
        RecordKind::SourceYear,
    ];

    /// Name of the backing table.
    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Author => "authors",
            RecordKind::AuthorYear => "author_year",
            RecordKind::AuthorSize => "author_size",
            RecordKind::SourceYear => "sources",
        }
    }

    /// All columns with their SQL types, key columns first.
    pub fn columns(self) -> &'static [(&'static str, &'static str)] {
        match self {
            RecordKind::Author => &[
                ("auth_id", "INTEGER NOT NULL"),
                ("eid", "TEXT NOT NULL"),
                ("surname", "TEXT"),
                ("initials", "TEXT"),
                ("givenname", "TEXT"),
                ("affiliation", "TEXT"),
                ("documents", "INTEGER NOT NULL"),
                ("affiliation_id", "TEXT"),
                ("city", "TEXT"),
                ("country", "TEXT"),
                ("areas", "TEXT"),
            ],
            RecordKind::AuthorYear => &[
                ("auth_id", "INTEGER NOT NULL"),
                ("year", "INTEGER NOT NULL"),
                ("first_year", "INTEGER"),
                ("n_pubs", "INTEGER NOT NULL"),
                ("n_coauth", "INTEGER NOT NULL"),
            ],
            RecordKind::AuthorSize => &[
                ("auth_id", "INTEGER NOT NULL"),
                ("year", "INTEGER NOT NULL"),
                ("n_pubs", "INTEGER NOT NULL"),
            ],
            RecordKind::SourceYear => &[
                ("source_id", "INTEGER NOT NULL"),
                ("year", "INTEGER NOT NULL"),
                ("n_pubs", "INTEGER NOT NULL"),
                ("auids", "TEXT NOT NULL"),
            ],
        }
    }

    /// Primary-key columns.
    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            RecordKind::Author => &["auth_id"],
            RecordKind::AuthorYear | RecordKind::AuthorSize => &["auth_id", "year"],
            RecordKind::SourceYear => &["source_id", "year"],
        }
    }

    pub(crate) fn create_sql(self) -> String {
        let columns = self
            .columns()
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            self.table(),
            columns,
            self.key_columns().join(", ")
        )
    }

    /// `a = ?1 AND b = ?2` over the key columns.
    pub(crate) fn key_predicate(self) -> String {
        self.key_columns()
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub(crate) fn column_list(self) -> String {
        self.columns()
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for RecordKind {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "author" | "authors" => Ok(RecordKind::Author),
            "author_year" => Ok(RecordKind::AuthorYear),
            "author_size" => Ok(RecordKind::AuthorSize),
            "source" | "sources" | "source_year" => Ok(RecordKind::SourceYear),
            other => Err(ParseKeyError(format!("unknown record kind '{other}'"))),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseKeyError(pub String);

/// A composite primary key.
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug {
    /// Key values in key-column order.
    fn to_sql(&self) -> Vec<Value>;
}

/// A row of one record kind.
pub trait CacheRecord: Sized {
    type Key: CacheKey;

    const KIND: RecordKind;

    fn key(&self) -> Self::Key;

    /// All values in [`RecordKind::columns`] order.
    fn to_sql(&self) -> Vec<Value>;

    /// Decode a row selected with [`RecordKind::columns`] order.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorKey {
    pub auth_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorYearKey {
    pub auth_id: i64,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceYearKey {
    pub source_id: i64,
    pub year: i32,
}

impl CacheKey for AuthorKey {
    fn to_sql(&self) -> Vec<Value> {
        vec![Value::Integer(self.auth_id)]
    }
}

impl CacheKey for AuthorYearKey {
    fn to_sql(&self) -> Vec<Value> {
        vec![Value::Integer(self.auth_id), Value::Integer(self.year.into())]
    }
}

impl CacheKey for SourceYearKey {
    fn to_sql(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.source_id),
            Value::Integer(self.year.into()),
        ]
    }
}

impl fmt::Display for AuthorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.auth_id)
    }
}

impl fmt::Display for AuthorYearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.auth_id, self.year)
    }
}

impl fmt::Display for SourceYearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.year)
    }
}

fn parse_id(s: &str) -> Result<i64, ParseKeyError> {
    s.trim()
        .parse()
        .map_err(|_| ParseKeyError(format!("invalid identifier '{s}'")))
}

fn parse_id_year(s: &str) -> Result<(i64, i32), ParseKeyError> {
    let (id, year) = s
        .split_once(':')
        .ok_or_else(|| ParseKeyError(format!("expected <id>:<year>, got '{s}'")))?;
    let year = year
        .trim()
        .parse()
        .map_err(|_| ParseKeyError(format!("invalid year in '{s}'")))?;
    Ok((parse_id(id)?, year))
}

impl FromStr for AuthorKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AuthorKey {
            auth_id: parse_id(s)?,
        })
    }
}

impl FromStr for AuthorYearKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (auth_id, year) = parse_id_year(s)?;
        Ok(AuthorYearKey { auth_id, year })
    }
}

impl FromStr for SourceYearKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source_id, year) = parse_id_year(s)?;
        Ok(SourceYearKey { source_id, year })
    }
}

fn text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

/// Author profile as returned by an author search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub auth_id: i64,
    pub eid: String,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub initials: Option<String>,
    #[serde(default)]
    pub givenname: Option<String>,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub documents: i64,
    #[serde(default)]
    pub affiliation_id: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub areas: Option<String>,
}

impl CacheRecord for AuthorRecord {
    type Key = AuthorKey;

    const KIND: RecordKind = RecordKind::Author;

    fn key(&self) -> AuthorKey {
        AuthorKey {
            auth_id: self.auth_id,
        }
    }

    fn to_sql(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.auth_id),
            Value::Text(self.eid.clone()),
            text(&self.surname),
            text(&self.initials),
            text(&self.givenname),
            text(&self.affiliation),
            Value::Integer(self.documents),
            text(&self.affiliation_id),
            text(&self.city),
            text(&self.country),
            text(&self.areas),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuthorRecord {
            auth_id: row.get(0)?,
            eid: row.get(1)?,
            surname: row.get(2)?,
            initials: row.get(3)?,
            givenname: row.get(4)?,
            affiliation: row.get(5)?,
            documents: row.get(6)?,
            affiliation_id: row.get(7)?,
            city: row.get(8)?,
            country: row.get(9)?,
            areas: row.get(10)?,
        })
    }
}

/// An author's publication history up to and including `year`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorYearRecord {
    pub auth_id: i64,
    pub year: i32,
    /// Year of the earliest publication; `None` when no cover date was known.
    pub first_year: Option<i32>,
    pub n_pubs: i64,
    pub n_coauth: i64,
}

impl CacheRecord for AuthorYearRecord {
    type Key = AuthorYearKey;

    const KIND: RecordKind = RecordKind::AuthorYear;

    fn key(&self) -> AuthorYearKey {
        AuthorYearKey {
            auth_id: self.auth_id,
            year: self.year,
        }
    }

    fn to_sql(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.auth_id),
            Value::Integer(self.year.into()),
            self.first_year
                .map_or(Value::Null, |y| Value::Integer(y.into())),
            Value::Integer(self.n_pubs),
            Value::Integer(self.n_coauth),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuthorYearRecord {
            auth_id: row.get(0)?,
            year: row.get(1)?,
            first_year: row.get(2)?,
            n_pubs: row.get(3)?,
            n_coauth: row.get(4)?,
        })
    }
}

/// Number of publications of an author up to and including `year`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSizeRecord {
    pub auth_id: i64,
    pub year: i32,
    pub n_pubs: i64,
}

impl CacheRecord for AuthorSizeRecord {
    type Key = AuthorYearKey;

    const KIND: RecordKind = RecordKind::AuthorSize;

    fn key(&self) -> AuthorYearKey {
        AuthorYearKey {
            auth_id: self.auth_id,
            year: self.year,
        }
    }

    fn to_sql(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.auth_id),
            Value::Integer(self.year.into()),
            Value::Integer(self.n_pubs),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuthorSizeRecord {
            auth_id: row.get(0)?,
            year: row.get(1)?,
            n_pubs: row.get(2)?,
        })
    }
}

/// Publications of a source in one year and the authors behind them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceYearRecord {
    pub source_id: i64,
    pub year: i32,
    pub n_pubs: i64,
    /// Distinct author ids, stored comma-joined.
    #[serde(default)]
    pub auids: Vec<i64>,
}

impl CacheRecord for SourceYearRecord {
    type Key = SourceYearKey;

    const KIND: RecordKind = RecordKind::SourceYear;

    fn key(&self) -> SourceYearKey {
        SourceYearKey {
            source_id: self.source_id,
            year: self.year,
        }
    }

    fn to_sql(&self) -> Vec<Value> {
        let auids = self
            .auids
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            Value::Integer(self.source_id),
            Value::Integer(self.year.into()),
            Value::Integer(self.n_pubs),
            Value::Text(auids),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let joined: String = row.get(3)?;
        let auids = joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        Ok(SourceYearRecord {
            source_id: row.get(0)?,
            year: row.get(1)?,
            n_pubs: row.get(2)?,
            auids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sql_has_composite_primary_key() {
        let sql = RecordKind::AuthorYear.create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS author_year"));
        assert!(sql.ends_with("PRIMARY KEY (auth_id, year))"));
    }

    #[test]
    fn key_predicate_numbers_placeholders() {
        assert_eq!(
            RecordKind::SourceYear.key_predicate(),
            "source_id = ?1 AND year = ?2"
        );
        assert_eq!(RecordKind::Author.key_predicate(), "auth_id = ?1");
    }

    #[test]
    fn columns_start_with_key_columns() {
        for kind in RecordKind::ALL {
            let keys = kind.key_columns();
            let leading: Vec<&str> = kind.columns()[..keys.len()]
                .iter()
                .map(|(name, _)| *name)
                .collect();
            assert_eq!(leading, keys, "{kind}");
        }
    }

    #[test]
    fn record_values_match_column_count() {
        let author = AuthorRecord {
            auth_id: 1,
            eid: "9-s2.0-1".into(),
            surname: None,
            initials: None,
            givenname: None,
            affiliation: None,
            documents: 0,
            affiliation_id: None,
            city: None,
            country: None,
            areas: None,
        };
        assert_eq!(author.to_sql().len(), RecordKind::Author.columns().len());

        let source = SourceYearRecord {
            source_id: 22900,
            year: 2010,
            n_pubs: 2,
            auids: vec![1, 2],
        };
        assert_eq!(source.to_sql().len(), RecordKind::SourceYear.columns().len());
        assert_eq!(source.to_sql()[3], Value::Text("1,2".into()));
    }

    #[test]
    fn parse_keys() {
        assert_eq!(
            "53164702100".parse::<AuthorKey>().unwrap(),
            AuthorKey {
                auth_id: 53164702100
            }
        );
        assert_eq!(
            "53164702100:2016".parse::<AuthorYearKey>().unwrap(),
            AuthorYearKey {
                auth_id: 53164702100,
                year: 2016
            }
        );
        assert!("22900".parse::<SourceYearKey>().is_err());
        assert!("abc:2010".parse::<SourceYearKey>().is_err());
    }

    #[test]
    fn parse_record_kind_aliases() {
        assert_eq!("authors".parse::<RecordKind>().unwrap(), RecordKind::Author);
        assert_eq!(
            "author-year".parse::<RecordKind>().unwrap(),
            RecordKind::AuthorYear
        );
        assert_eq!(
            "sources".parse::<RecordKind>().unwrap(),
            RecordKind::SourceYear
        );
        assert!("journals".parse::<RecordKind>().is_err());
    }
}
