use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::config::StoreSettings;
use crate::error::{EngineError, Result};
use crate::schema::{Annotation, Document, Span, Vote};
use crate::store::{AnnotationFilter, DocumentFilter, Store, StoreTx};

/// SQLite-backed store. One connection per handle; several handles (or
/// processes) may open the same file and SQLite's write lock serializes them.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path, settings: &StoreSettings) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|err| EngineError::StoreUnavailable(format!("{}: {err}", db_path.display())))?;
        conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
              id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              content TEXT NOT NULL,
              created_by TEXT NOT NULL,
              created_at TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'active'
            );

            CREATE TABLE IF NOT EXISTS annotations (
              id TEXT PRIMARY KEY,
              document_id TEXT NOT NULL REFERENCES documents(id),
              start_pos INTEGER NOT NULL,
              end_pos INTEGER NOT NULL,
              label TEXT NOT NULL,
              span_text TEXT NOT NULL,
              annotator TEXT NOT NULL,
              created_at TEXT NOT NULL,
              confidence REAL NOT NULL,
              notes TEXT,
              source TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'pending'
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_document ON annotations(document_id);

            CREATE TABLE IF NOT EXISTS votes (
              id TEXT PRIMARY KEY,
              annotation_id TEXT NOT NULL REFERENCES annotations(id),
              voter TEXT NOT NULL,
              choice TEXT NOT NULL,
              cast_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_votes_annotation_voter
              ON votes(annotation_id, voter);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::StoreUnavailable("connection mutex poisoned".into()))
    }
}

impl Store for SqliteStore {
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&SqliteTx { conn: &conn })
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so a competing writer fails
        // (or waits out the busy timeout) before reading a stale tally.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&mut SqliteTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

const DOCUMENT_COLUMNS: &str = "id, title, content, created_by, created_at, status";
const ANNOTATION_COLUMNS: &str = "id, document_id, start_pos, end_pos, label, span_text, \
     annotator, created_at, confidence, notes, source, status";

impl StoreTx for SqliteTx<'_> {
    fn put_document(&mut self, document: &Document) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO documents (id, title, content, created_by, created_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
              title=excluded.title,
              content=excluded.content,
              created_by=excluded.created_by,
              created_at=excluded.created_at,
              status=excluded.status
            "#,
            params![
                document.id,
                document.title,
                document.content,
                document.created_by,
                document.created_at,
                document.status.as_str()
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, [id], DocumentRow::from_row)
            .optional()?;
        row.map(DocumentRow::into_document).transpose()
    }

    fn query_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let where_clause = if filter.include_archived {
            ""
        } else {
            "WHERE status = 'active'"
        };
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents {where_clause} ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], DocumentRow::from_row)?;
        let mut documents = Vec::new();
        for r in rows {
            documents.push(r?.into_document()?);
        }
        Ok(documents)
    }

    fn put_annotation(&mut self, annotation: &Annotation) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO annotations (
              id, document_id, start_pos, end_pos, label, span_text,
              annotator, created_at, confidence, notes, source, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
              document_id=excluded.document_id,
              start_pos=excluded.start_pos,
              end_pos=excluded.end_pos,
              label=excluded.label,
              span_text=excluded.span_text,
              annotator=excluded.annotator,
              created_at=excluded.created_at,
              confidence=excluded.confidence,
              notes=excluded.notes,
              source=excluded.source,
              status=excluded.status
            "#,
            params![
                annotation.id,
                annotation.document_id,
                to_sql_offset(annotation.span.start)?,
                to_sql_offset(annotation.span.end)?,
                annotation.label,
                annotation.text,
                annotation.annotator,
                annotation.created_at,
                annotation.confidence,
                annotation.notes,
                annotation.source.as_str(),
                annotation.status.as_str()
            ],
        )?;
        Ok(())
    }

    fn get_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        let sql = format!("SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, [id], AnnotationRow::from_row)
            .optional()?;
        row.map(AnnotationRow::into_annotation).transpose()
    }

    fn query_annotations(&self, filter: &AnnotationFilter) -> Result<Vec<Annotation>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(document_id) = &filter.document_id {
            clauses.push("document_id = ?");
            values.push(document_id.clone());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(label) = &filter.label {
            clauses.push("label = ?");
            values.push(label.clone());
        }
        if let Some(annotator) = &filter.annotator {
            clauses.push("annotator = ?");
            values.push(annotator.clone());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations {where_clause} ORDER BY created_at, id"
        );
        debug!(%sql, "query annotations");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), AnnotationRow::from_row)?;
        let mut annotations = Vec::new();
        for r in rows {
            annotations.push(r?.into_annotation()?);
        }
        Ok(annotations)
    }

    fn upsert_vote(&mut self, vote: &Vote) -> Result<Vote> {
        self.conn.execute(
            r#"
            INSERT INTO votes (id, annotation_id, voter, choice, cast_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(annotation_id, voter) DO UPDATE SET
              choice=excluded.choice,
              cast_at=excluded.cast_at
            "#,
            params![
                vote.id,
                vote.annotation_id,
                vote.voter,
                vote.choice.as_str(),
                vote.cast_at
            ],
        )?;
        let row = self.conn.query_row(
            "SELECT id, annotation_id, voter, choice, cast_at
             FROM votes WHERE annotation_id = ?1 AND voter = ?2",
            params![vote.annotation_id, vote.voter],
            VoteRow::from_row,
        )?;
        row.into_vote()
    }

    fn votes_for(&self, annotation_id: &str) -> Result<Vec<Vote>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, annotation_id, voter, choice, cast_at
            FROM votes
            WHERE annotation_id = ?1
            ORDER BY cast_at, voter
            "#,
        )?;
        let rows = stmt.query_map([annotation_id], VoteRow::from_row)?;
        let mut votes = Vec::new();
        for r in rows {
            votes.push(r?.into_vote()?);
        }
        Ok(votes)
    }
}

fn to_sql_offset(offset: usize) -> Result<i64> {
    i64::try_from(offset).map_err(|_| EngineError::Corrupt(format!("offset {offset} too large")))
}

fn from_sql_offset(offset: i64) -> Result<usize> {
    usize::try_from(offset).map_err(|_| EngineError::Corrupt(format!("negative offset {offset}")))
}

#[derive(Debug)]
struct DocumentRow {
    id: String,
    title: String,
    content: String,
    created_by: String,
    created_at: String,
    status: String,
}

impl DocumentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created_by: row.get(3)?,
            created_at: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_document(self) -> Result<Document> {
        Ok(Document {
            id: self.id,
            title: self.title,
            content: self.content,
            created_by: self.created_by,
            created_at: self.created_at,
            status: self.status.parse()?,
        })
    }
}

#[derive(Debug)]
struct AnnotationRow {
    id: String,
    document_id: String,
    start_pos: i64,
    end_pos: i64,
    label: String,
    span_text: String,
    annotator: String,
    created_at: String,
    confidence: f64,
    notes: Option<String>,
    source: String,
    status: String,
}

impl AnnotationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            start_pos: row.get(2)?,
            end_pos: row.get(3)?,
            label: row.get(4)?,
            span_text: row.get(5)?,
            annotator: row.get(6)?,
            created_at: row.get(7)?,
            confidence: row.get(8)?,
            notes: row.get(9)?,
            source: row.get(10)?,
            status: row.get(11)?,
        })
    }

    fn into_annotation(self) -> Result<Annotation> {
        Ok(Annotation {
            id: self.id,
            document_id: self.document_id,
            span: Span::new(from_sql_offset(self.start_pos)?, from_sql_offset(self.end_pos)?),
            label: self.label,
            text: self.span_text,
            annotator: self.annotator,
            created_at: self.created_at,
            confidence: self.confidence,
            notes: self.notes,
            source: self.source.parse()?,
            status: self.status.parse()?,
        })
    }
}

#[derive(Debug)]
struct VoteRow {
    id: String,
    annotation_id: String,
    voter: String,
    choice: String,
    cast_at: String,
}

impl VoteRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            annotation_id: row.get(1)?,
            voter: row.get(2)?,
            choice: row.get(3)?,
            cast_at: row.get(4)?,
        })
    }

    fn into_vote(self) -> Result<Vote> {
        Ok(Vote {
            id: self.id,
            annotation_id: self.annotation_id,
            voter: self.voter,
            choice: self.choice.parse()?,
            cast_at: self.cast_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentStatus, VoteChoice};

    fn document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            title: "Title".to_string(),
            content: "Some content".to_string(),
            created_by: "alice".to_string(),
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            status: DocumentStatus::Active,
        }
    }

    fn vote(id: &str, voter: &str, choice: VoteChoice, cast_at: &str) -> Vote {
        Vote {
            id: id.to_string(),
            annotation_id: "a1".to_string(),
            voter: voter.to_string(),
            choice,
            cast_at: cast_at.to_string(),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.put_document(&document("d1"))?;
                tx.put_annotation(&Annotation {
                    id: "a1".to_string(),
                    document_id: "d1".to_string(),
                    span: Span::new(0, 4),
                    label: "THING".to_string(),
                    text: "Some".to_string(),
                    annotator: "alice".to_string(),
                    created_at: "2024-01-01T00:00:01.000000Z".to_string(),
                    confidence: 0.5,
                    notes: None,
                    source: crate::schema::AnnotationSource::Manual,
                    status: crate::schema::AnnotationStatus::Pending,
                })
            })
            .unwrap();
        store
    }

    #[test]
    fn vote_upsert_keeps_one_row_per_voter() {
        let store = seeded();
        let first = store
            .transaction(|tx| tx.upsert_vote(&vote("v1", "bob", VoteChoice::Approve, "t1")))
            .unwrap();
        let second = store
            .transaction(|tx| tx.upsert_vote(&vote("v2", "bob", VoteChoice::Reject, "t2")))
            .unwrap();

        assert_eq!(first.id, "v1");
        assert_eq!(second.id, "v1");
        assert_eq!(second.choice, VoteChoice::Reject);

        let votes = store.read(|tx| tx.votes_for("a1")).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].cast_at, "t2");
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = seeded();
        let result: Result<()> = store.transaction(|tx| {
            tx.put_document(&document("d2"))?;
            Err(EngineError::InvalidLabel)
        });
        assert!(matches!(result, Err(EngineError::InvalidLabel)));
        assert!(store.read(|tx| tx.get_document("d2")).unwrap().is_none());
    }

    #[test]
    fn archived_documents_are_filtered_by_default() {
        let store = seeded();
        let mut archived = document("d2");
        archived.status = DocumentStatus::Archived;
        store.transaction(|tx| tx.put_document(&archived)).unwrap();

        let active = store
            .read(|tx| tx.query_documents(&DocumentFilter::default()))
            .unwrap();
        let all = store
            .read(|tx| {
                tx.query_documents(&DocumentFilter {
                    include_archived: true,
                })
            })
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unparseable_status_is_corrupt() {
        let store = seeded();
        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE annotations SET status = 'maybe' WHERE id = 'a1'", [])
                .unwrap();
        }
        let err = store.read(|tx| tx.get_annotation("a1")).unwrap_err();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }

    #[test]
    fn open_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("annotations.db");
        let err = SqliteStore::open(&path, &StoreSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }
}
