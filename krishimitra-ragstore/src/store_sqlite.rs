//! Durable [`VectorStore`] backed by `sqlite-vec`.
//!
//! One `chunks_<collection>` row table plus a matching `vec0` virtual table
//! per collection, with dimension tracked in a `collections` metadata table
//! so invariant 4 (spec §3) survives a process restart. Grounded directly
//! on `wg-ragsmith::stores::sqlite::SqliteChunkStore`'s raw-SQL search path
//! (the `rig-sqlite` typed `SqliteVectorStore` assumes one fixed row type
//! and table, which does not fit this store's many-named-collections
//! requirement).

use crate::document::{Document, Metadata, MetadataValue};
use crate::error::StoreError;
use crate::store::{Filter, ScoredDocument, VectorStore};
use async_trait::async_trait;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Mutex, Once};
use tokio_rusqlite::{ffi, Connection, OptionalExtension};

pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS collections (
                    name TEXT PRIMARY KEY,
                    dim  INTEGER NOT NULL
                );",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), StoreError> {
        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;
                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    std::mem::transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!("failed to register sqlite-vec extension (code {rc})"))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Backend)
    }

    fn rows_table(name: &str) -> String {
        format!("rows_{name}")
    }

    fn vec_table(name: &str) -> String {
        format!("vec_{name}")
    }
}

fn encode_metadata(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

fn decode_metadata(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, name: &str, dim: usize) -> Result<(), StoreError> {
        let name = name.to_string();
        let rows_table = Self::rows_table(&name);
        let vec_table = Self::vec_table(&name);
        self.conn
            .call(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT dim FROM collections WHERE name = ?",
                        [&name],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                match existing {
                    Some(existing_dim) if existing_dim as usize != dim => {
                        return Err(tokio_rusqlite::Error::Other(Box::new(
                            std::io::Error::other(format!(
                                "dimension-conflict:{name}:{existing_dim}:{dim}"
                            )),
                        )));
                    }
                    Some(_) => return Ok(()),
                    None => {}
                }

                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {rows_table} (
                            id TEXT PRIMARY KEY,
                            text TEXT NOT NULL,
                            metadata TEXT NOT NULL
                        )"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS {vec_table} USING vec0(
                            id TEXT PRIMARY KEY,
                            embedding FLOAT[{dim}]
                        )"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT INTO collections (name, dim) VALUES (?, ?)",
                    (&name, dim as i64),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| map_conflict(&err))
    }

    async fn upsert(
        &self,
        name: &str,
        docs: Vec<(Document, Vec<f32>)>,
    ) -> Result<(), StoreError> {
        let name_owned = name.to_string();
        let rows_table = Self::rows_table(name);
        let vec_table = Self::vec_table(name);
        self.conn
            .call(move |conn| {
                let dim: Option<i64> = conn
                    .query_row(
                        "SELECT dim FROM collections WHERE name = ?",
                        [&name_owned],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let Some(dim) = dim else {
                    return Err(tokio_rusqlite::Error::Other(Box::new(std::io::Error::other(
                        format!("not-found:{name_owned}"),
                    ))));
                };
                for (_, embedding) in &docs {
                    if embedding.len() as i64 != dim {
                        return Err(tokio_rusqlite::Error::Other(Box::new(std::io::Error::other(
                            format!("shape-mismatch:{name_owned}:{dim}:{}", embedding.len()),
                        ))));
                    }
                }

                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (doc, embedding) in &docs {
                    tx.execute(
                        &format!(
                            "INSERT INTO {rows_table} (id, text, metadata) VALUES (?, ?, ?)
                             ON CONFLICT(id) DO UPDATE SET text = excluded.text, metadata = excluded.metadata"
                        ),
                        (&doc.id, &doc.text, encode_metadata(&doc.metadata)),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let embedding_json = serde_json::to_string(embedding)
                        .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                    tx.execute(
                        &format!("DELETE FROM {vec_table} WHERE id = ?"),
                        [&doc.id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute(
                        &format!(
                            "INSERT INTO {vec_table} (id, embedding) VALUES (?, vec_f32(?))"
                        ),
                        (&doc.id, &embedding_json),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| map_conflict(&err))
    }

    async fn search(
        &self,
        name: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredDocument>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let name_owned = name.to_string();
        let rows_table = Self::rows_table(name);
        let vec_table = Self::vec_table(name);
        let embedding_json = serde_json::to_string(query_embedding)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let predicates: Vec<(String, MetadataValue)> = filter.predicates().to_vec();

        self.conn
            .call(move |conn| {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT dim FROM collections WHERE name = ?",
                        [&name_owned],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if exists.is_none() {
                    return Err(tokio_rusqlite::Error::Other(Box::new(std::io::Error::other(
                        format!("not-found:{name_owned}"),
                    ))));
                }

                // Over-fetch past the filter to still return up to `k` matches;
                // oversampling by 4x covers typical selectivity without a
                // second round trip. This is a pragmatic bound, not a spec
                // requirement.
                let oversample = (k * 4).max(k);
                let sql = format!(
                    "SELECT r.id, r.text, r.metadata, v.distance
                     FROM (
                         SELECT id, distance FROM {vec_table}
                         WHERE embedding MATCH vec_f32(?) AND k = {oversample}
                         ORDER BY distance ASC
                     ) v
                     JOIN {rows_table} r ON r.id = v.id"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&embedding_json], |row| {
                        let id: String = row.get(0)?;
                        let text: String = row.get(1)?;
                        let metadata_raw: String = row.get(2)?;
                        let distance: f64 = row.get(3)?;
                        Ok((id, text, metadata_raw, distance))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut scored = Vec::new();
                for row in rows {
                    let (id, text, metadata_raw, distance) =
                        row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let metadata = decode_metadata(&metadata_raw);
                    if !predicates
                        .iter()
                        .all(|(key, value)| metadata.get(key).is_some_and(|v| v == value))
                    {
                        continue;
                    }
                    let similarity = 1.0 - distance as f32;
                    scored.push(ScoredDocument {
                        document: Document {
                            id,
                            text,
                            metadata,
                        },
                        score: similarity,
                    });
                }
                scored.sort_by(|a, b| b.score.total_cmp(&a.score));
                scored.truncate(k);
                Ok(scored)
            })
            .await
            .map_err(|err| map_conflict(&err))
    }

    async fn rebuild(&self, name: &str, dim: usize) -> Result<(), StoreError> {
        let name_owned = name.to_string();
        let rows_table = Self::rows_table(name);
        let vec_table = Self::vec_table(name);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(&format!("DROP TABLE IF EXISTS {rows_table}"), [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(&format!("DROP TABLE IF EXISTS {vec_table}"), [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    &format!(
                        "CREATE TABLE {rows_table} (
                            id TEXT PRIMARY KEY,
                            text TEXT NOT NULL,
                            metadata TEXT NOT NULL
                        )"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE {vec_table} USING vec0(
                            id TEXT PRIMARY KEY,
                            embedding FLOAT[{dim}]
                        )"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT INTO collections (name, dim) VALUES (?, ?)
                     ON CONFLICT(name) DO UPDATE SET dim = excluded.dim",
                    (&name_owned, dim as i64),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM collections")
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(names)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

/// `tokio_rusqlite::Error::Other` is how closures smuggle typed failures
/// back out of `conn.call`; decode the tagged strings we encoded above into
/// the right `StoreError` variant instead of flattening everything to
/// `Backend`.
fn map_conflict(err: &tokio_rusqlite::Error) -> StoreError {
    let message = err.to_string();
    if let Some(rest) = message.strip_prefix("dimension-conflict:") {
        let mut parts = rest.splitn(3, ':');
        if let (Some(name), Some(existing), Some(requested)) =
            (parts.next(), parts.next(), parts.next())
        {
            if let (Ok(existing), Ok(requested)) =
                (existing.parse::<usize>(), requested.parse::<usize>())
            {
                return StoreError::DimensionConflict {
                    name: name.to_string(),
                    existing,
                    requested,
                };
            }
        }
    }
    if let Some(rest) = message.strip_prefix("shape-mismatch:") {
        let mut parts = rest.splitn(3, ':');
        if let (Some(name), Some(expected), Some(got)) = (parts.next(), parts.next(), parts.next())
        {
            if let (Ok(expected), Ok(got)) = (expected.parse::<usize>(), got.parse::<usize>()) {
                return StoreError::ShapeMismatch {
                    name: name.to_string(),
                    expected,
                    got,
                };
            }
        }
    }
    if let Some(name) = message.strip_prefix("not-found:") {
        return StoreError::NotFound {
            name: name.to_string(),
        };
    }
    StoreError::Backend(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    async fn open_tmp() -> (SqliteVectorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        (SqliteVectorStore::open(&path).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn create_upsert_search_roundtrip() {
        let (store, _dir) = open_tmp().await;
        store.create_collection("prices", 3).await.unwrap();
        store
            .upsert(
                "prices",
                vec![
                    (
                        Document::new("a", "tomato 20rs").with_field("market", "Bargarh"),
                        vec![1.0, 0.0, 0.0],
                    ),
                    (
                        Document::new("b", "wheat 25rs").with_field("market", "Cuttack"),
                        vec![0.0, 1.0, 0.0],
                    ),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("prices", &[1.0, 0.0, 0.0], 5, &Filter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "a");
    }

    #[tokio::test]
    async fn dimension_conflict_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let store = SqliteVectorStore::open(&path).await.unwrap();
        store.create_collection("soil", 4).await.unwrap();
        drop(store);
        let reopened = SqliteVectorStore::open(&path).await.unwrap();
        let err = reopened.create_collection("soil", 8).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionConflict { .. }));
    }

    #[tokio::test]
    async fn rebuild_drops_prior_documents() {
        let (store, _dir) = open_tmp().await;
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        store.rebuild("prices", 2).await.unwrap();
        let hits = store
            .search("prices", &[1.0, 0.0], 5, &Filter::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
