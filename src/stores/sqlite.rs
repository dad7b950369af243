//! SQLite-backed vector projection using the `sqlite-vec` extension.
//!
//! One table holds the whitelisted payload (JSON text) next to the embedding
//! (JSON array text, decoded by `vec_f32` at query time). Cosine search runs
//! fully inside SQLite via `vec_distance_cosine`. The table is a pure
//! projection; [`crate::pipeline::Pipeline::rebuild_projection`] can recreate
//! it wholesale from the graph store.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, ffi};

use super::{ChunkPayload, ScoredChunk, VectorStore};
use crate::error::StoreError;
use crate::types::{ChunkId, DocumentId};

/// Vector store persisted in a single SQLite database.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Open (or create) the projection database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Self::init(conn).await
    }

    /// Open a throwaway in-memory projection (tests, dry runs).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            // Fails early if the extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Error)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunk_projection (
                     chunk_id    TEXT PRIMARY KEY,
                     document_id TEXT NOT NULL,
                     payload     TEXT NOT NULL,
                     embedding   TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS chunk_projection_document
                     ON chunk_projection(document_id);",
            )
            .map_err(tokio_rusqlite::Error::Error)?;
            Ok::<_, tokio_rusqlite::Error>(())
        })
        .await
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_chunk(
        &self,
        payload: serde_json::Value,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError> {
        let payload = ChunkPayload::validate(payload)?;
        let chunk_id = payload.chunk_id.to_string();
        let document_id = payload.document_id.to_string();
        let payload_json = serde_json::to_string(&payload)?;
        let embedding_json = serde_json::to_string(&embedding)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO chunk_projection (chunk_id, document_id, payload, embedding)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(chunk_id) DO UPDATE SET
                         document_id = excluded.document_id,
                         payload = excluded.payload,
                         embedding = excluded.embedding",
                    (&chunk_id, &document_id, &payload_json, &embedding_json),
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn delete_document(&self, document: DocumentId) -> Result<usize, StoreError> {
        let document = document.to_string();
        self.conn
            .call(move |conn| {
                let deleted = conn
                    .execute(
                        "DELETE FROM chunk_projection WHERE document_id = ?1",
                        [&document],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(deleted)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let query_json = serde_json::to_string(query)?;
        let raw: Vec<(String, f32)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT payload, \
                         vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance \
                         FROM chunk_projection \
                         ORDER BY distance ASC \
                         LIMIT {top_k}"
                    ))
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([&query_json], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, f32>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok::<_, tokio_rusqlite::Error>(results)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        raw.into_iter()
            .map(|(payload_json, distance)| {
                let payload: ChunkPayload = serde_json::from_str(&payload_json)?;
                Ok(ScoredChunk {
                    payload,
                    similarity: 1.0 - distance,
                })
            })
            .collect()
    }

    async fn chunk_ids_for(&self, document: DocumentId) -> Result<Vec<ChunkId>, StoreError> {
        let document = document.to_string();
        let raw: Vec<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_id FROM chunk_projection \
                         WHERE document_id = ?1 ORDER BY chunk_id",
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([&document], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Error)?;
                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok::<_, tokio_rusqlite::Error>(results)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        raw.into_iter()
            .map(|id| {
                id.parse::<uuid::Uuid>()
                    .map(ChunkId::from)
                    .map_err(|err| StoreError::Backend(format!("corrupt chunk id: {err}")))
            })
            .collect()
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunk_projection", [], |row| {
                        row.get(0)
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(count as usize)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

/// Register `sqlite-vec` as an auto-extension, once per process.
fn register_sqlite_vec() -> Result<(), StoreError> {
    use std::sync::Mutex;

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
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(document: DocumentId, text: &str) -> serde_json::Value {
        serde_json::to_value(ChunkPayload {
            chunk_id: ChunkId::new(),
            document_id: document,
            text: text.into(),
            char_start: 0,
            char_end: text.len(),
            anchored_concepts: Vec::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_search_and_delete() {
        let store = SqliteVectorStore::open_in_memory().await.unwrap();
        let document = DocumentId::new();

        store
            .upsert_chunk(payload(document, "access control"), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .upsert_chunk(payload(document, "audit logging"), vec![0.0, 1.0, 0.0])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store.search(&[0.95, 0.05, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text, "access control");

        assert_eq!(store.delete_document(document).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_chunk() {
        let store = SqliteVectorStore::open_in_memory().await.unwrap();
        let document = DocumentId::new();
        let mut value = payload(document, "before");
        store
            .upsert_chunk(value.clone(), vec![1.0, 0.0])
            .await
            .unwrap();
        value["text"] = serde_json::json!("after");
        store.upsert_chunk(value, vec![0.0, 1.0]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].payload.text, "after");
    }

    #[tokio::test]
    async fn whitelist_holds_for_sqlite_too() {
        let store = SqliteVectorStore::open_in_memory().await.unwrap();
        let mut value = payload(DocumentId::new(), "x");
        value["centroid"] = serde_json::json!([0.1]);
        let err = store.upsert_chunk(value, vec![1.0]).await.unwrap_err();
        assert!(matches!(err, StoreError::PayloadRejected { .. }));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projection.db");
        let document = DocumentId::new();
        {
            let store = SqliteVectorStore::open(&path).await.unwrap();
            store
                .upsert_chunk(payload(document, "persisted"), vec![1.0])
                .await
                .unwrap();
        }
        let store = SqliteVectorStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.chunk_ids_for(document).await.unwrap().len(), 1);
    }
}
