//! rollcall-store: SQLite-backed enrollment store.
//!
//! One row per identity. Embeddings are stored as little-endian `f32` blobs
//! alongside their dimension and enrollment metadata. Rows are returned in
//! insertion order; re-enrolling updates the existing row in place.

use chrono::{DateTime, Utc};
use rollcall_core::{
    Embedding, EnrollmentRecord, EnrollmentStore, EnrollmentSummary, GalleryEntry, StoreError,
};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS enrollments (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        identity         TEXT NOT NULL UNIQUE,
        embedding        BLOB NOT NULL,
        dim              INTEGER NOT NULL,
        images_processed INTEGER NOT NULL,
        images_failed    INTEGER NOT NULL,
        enrolled_at      TEXT NOT NULL
    );
";

const SELECT_ENTRIES: &str = "SELECT id, identity, embedding, dim FROM enrollments";

/// Identities bound per `IN (...)` query, well under SQLite's host parameter limit.
const SUBSET_CHUNK: usize = 500;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "enrollment store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".into()))
    }
}

impl EnrollmentStore for SqliteStore {
    fn load_all(&self, subset: Option<&[String]>) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.lock_conn()?;

        let rows: Vec<EntryRow> = match subset {
            Some(ids) => {
                let mut rows = Vec::new();
                for chunk in ids.chunks(SUBSET_CHUNK) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!("{SELECT_ENTRIES} WHERE identity IN ({placeholders})");
                    let mut stmt = conn.prepare(&sql).map_err(backend)?;
                    let chunk_rows = stmt
                        .query_map(params_from_iter(chunk), entry_row)
                        .map_err(backend)?;
                    for row in chunk_rows {
                        rows.push(row.map_err(backend)?);
                    }
                }
                // An identity repeated across chunks matches its row twice.
                rows.sort_unstable_by_key(|row| row.0);
                rows.dedup_by_key(|row| row.0);
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!("{SELECT_ENTRIES} ORDER BY id"))
                    .map_err(backend)?;
                let rows = stmt.query_map([], entry_row).map_err(backend)?;
                rows.collect::<Result<_, _>>().map_err(backend)?
            }
        };

        rows.into_iter()
            .map(|(_, identity, blob, dim)| {
                let reference = decode_embedding(&identity, &blob, dim)?;
                Ok(GalleryEntry {
                    identity,
                    reference,
                })
            })
            .collect()
    }

    fn upsert(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO enrollments
                 (identity, embedding, dim, images_processed, images_failed, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(identity) DO UPDATE SET
                 embedding = excluded.embedding,
                 dim = excluded.dim,
                 images_processed = excluded.images_processed,
                 images_failed = excluded.images_failed,
                 enrolled_at = excluded.enrolled_at",
            params![
                record.identity,
                encode_embedding(&record.embedding),
                record.embedding.dim() as i64,
                record.images_processed as i64,
                record.images_failed as i64,
                record.enrolled_at.to_rfc3339(),
            ],
        )
        .map_err(backend)?;

        tracing::debug!(
            identity = %record.identity,
            dim = record.embedding.dim(),
            "enrollment upserted"
        );
        Ok(())
    }

    fn contains(&self, identity: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM enrollments WHERE identity = ?1)",
            params![identity],
            |row| row.get(0),
        )
        .map_err(backend)
    }

    fn list(&self) -> Result<Vec<EnrollmentSummary>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT identity, dim, images_processed, images_failed, enrolled_at
                 FROM enrollments ORDER BY id",
            )
            .map_err(backend)?;
        let rows: Vec<SummaryRow> = stmt
            .query_map([], summary_row)
            .map_err(backend)?
            .collect::<Result<_, _>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(identity, dim, processed, failed, enrolled_at)| {
                Ok(EnrollmentSummary {
                    dim: to_count(&identity, "dim", dim)?,
                    images_processed: to_count(&identity, "images_processed", processed)?,
                    images_failed: to_count(&identity, "images_failed", failed)?,
                    enrolled_at: parse_timestamp(&identity, &enrolled_at)?,
                    identity,
                })
            })
            .collect()
    }

    fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM enrollments WHERE identity = ?1",
                params![identity],
            )
            .map_err(backend)?;
        Ok(deleted > 0)
    }
}

/// row id, identity, embedding blob, dim
type EntryRow = (i64, String, Vec<u8>, i64);
/// identity, dim, images_processed, images_failed, enrolled_at
type SummaryRow = (String, i64, i64, i64, String);

fn entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn summary_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(identity: &str, blob: &[u8], dim: i64) -> Result<Embedding, StoreError> {
    let dim = to_count(identity, "dim", dim)?;
    if blob.len() != dim * 4 {
        return Err(StoreError::Corrupt {
            identity: identity.to_string(),
            reason: format!(
                "embedding blob is {} bytes, expected {}",
                blob.len(),
                dim * 4
            ),
        });
    }

    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::normalized(values))
}

fn to_count(identity: &str, column: &str, value: i64) -> Result<usize, StoreError> {
    usize::try_from(value).map_err(|_| StoreError::Corrupt {
        identity: identity.to_string(),
        reason: format!("{column} is negative: {value}"),
    })
}

fn parse_timestamp(identity: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            identity: identity.to_string(),
            reason: format!("bad enrolled_at {raw:?}: {e}"),
        })
}
