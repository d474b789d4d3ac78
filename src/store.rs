use crate::model::DiaryEntry;
use anyhow::Result;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};

/// Persistence for finished diary entries. Entries are append-only; the
/// only mutation after `create` is `delete`.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Entries for `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<DiaryEntry>>;

    /// The entry, if it exists and belongs to `user_id`.
    async fn get(
        &self,
        user_id: &str,
        entry_id: &str,
    ) -> Result<Option<DiaryEntry>>;

    async fn create(&self, entry: &DiaryEntry) -> Result<String>;

    /// Returns false if no such entry belongs to `user_id`.
    async fn delete(&self, user_id: &str, entry_id: &str) -> Result<bool>;
}

pub struct SqliteEntryStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteEntryStore {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    #[instrument(skip(self), err)]
    async fn list(&self, user_id: &str) -> Result<Vec<DiaryEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, date_label, created_at, text, annotation
             FROM diary_entries
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let entries = stmt
            .query_map([user_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Database error: {}", e))?;
        Ok(entries)
    }

    #[instrument(skip(self), err)]
    async fn get(
        &self,
        user_id: &str,
        entry_id: &str,
    ) -> Result<Option<DiaryEntry>> {
        let conn = self.pool.get()?;
        let entry = conn
            .query_row(
                "SELECT id, user_id, date_label, created_at, text, annotation
                 FROM diary_entries
                 WHERE id = ? AND user_id = ?",
                params![entry_id, user_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    #[instrument(skip_all, err)]
    async fn create(&self, entry: &DiaryEntry) -> Result<String> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO diary_entries (
                id, user_id, date_label, created_at, text, annotation
            ) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.id,
                entry.user_id,
                entry.date_label,
                entry.created_at,
                entry.text,
                entry.annotation,
            ],
        )
        .map_err(|e| anyhow::anyhow!("Failed to save diary entry: {}", e))?;
        info!("Saved diary entry for {}", entry.user_id);
        Ok(entry.id.clone())
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, user_id: &str, entry_id: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM diary_entries WHERE id = ? AND user_id = ?",
            params![entry_id, user_id],
        )?;
        Ok(removed > 0)
    }
}

fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<DiaryEntry> {
    Ok(DiaryEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date_label: row.get(2)?,
        created_at: row.get(3)?,
        text: row.get(4)?,
        annotation: row.get(5)?,
    })
}

/// Number of saved entries across all users.
pub fn count_entries(conn: &Connection) -> Result<i64> {
    let count =
        conn.query_row("SELECT COUNT(*) FROM diary_entries", [], |row| {
            row.get(0)
        })?;
    Ok(count)
}

// Database initialization
#[instrument(skip(conn))]
pub fn init_diary_db(conn: &mut Connection) -> Result<()> {
    info!("Initializing diary database");
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS diary_entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            date_label TEXT NOT NULL,
            created_at INTEGER NOT NULL,      -- Unix milliseconds
            text TEXT NOT NULL,
            annotation TEXT                   -- PNG data URL, if any
        );

        CREATE INDEX IF NOT EXISTS idx_diary_entries_user_created
            ON diary_entries(user_id, created_at DESC);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    fn temp_store() -> (SqliteEntryStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().expect("temp sqlite file");
        let manager = SqliteConnectionManager::file(temp_file.path());
        let pool = Pool::new(manager).expect("pool");
        let mut conn = pool.get().expect("connection");
        init_diary_db(&mut conn).expect("schema");
        (SqliteEntryStore::new(pool), temp_file)
    }

    fn entry(id: &str, user_id: &str, created_at: i64) -> DiaryEntry {
        DiaryEntry {
            id: id.to_string(),
            user_id: user_id.to_string(),
            date_label: "10月 19日".to_string(),
            created_at,
            text: format!("entry {}", id),
            annotation: None,
        }
    }

    #[test]
    fn test_init_is_idempotent() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        init_diary_db(&mut conn)?;
        init_diary_db(&mut conn)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_per_user() -> Result<()> {
        let (store, _file) = temp_store();
        store.create(&entry("a", "hana", 1_000)).await?;
        store.create(&entry("b", "hana", 3_000)).await?;
        store.create(&entry("c", "hana", 2_000)).await?;
        store.create(&entry("d", "ren", 4_000)).await?;

        let ids: Vec<String> = store
            .list("hana")
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(store.list("nobody").await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_annotation_round_trips() -> Result<()> {
        let (store, _file) = temp_store();
        let mut with_drawing = entry("a", "hana", 1);
        with_drawing.annotation =
            Some("data:image/png;base64,iVBORw0KGgo=".to_string());
        let id = store.create(&with_drawing).await?;
        assert_eq!(id, "a");
        assert_eq!(store.list("hana").await?, vec![with_drawing]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_user() -> Result<()> {
        let (store, _file) = temp_store();
        store.create(&entry("a", "hana", 1)).await?;

        assert!(!store.delete("ren", "a").await?);
        assert!(store.delete("hana", "a").await?);
        assert!(!store.delete("hana", "a").await?);
        assert!(store.list("hana").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_user() -> Result<()> {
        let (store, _file) = temp_store();
        let saved = entry("a", "hana", 1);
        store.create(&saved).await?;

        assert_eq!(store.get("hana", "a").await?, Some(saved));
        assert_eq!(store.get("ren", "a").await?, None);
        assert_eq!(store.get("hana", "missing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_count_entries() -> Result<()> {
        let (store, _file) = temp_store();
        store.create(&entry("a", "hana", 1)).await?;
        store.create(&entry("b", "ren", 2)).await?;

        let conn = store.pool.get()?;
        assert_eq!(count_entries(&conn)?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_id_is_an_error() {
        let (store, _file) = temp_store();
        store.create(&entry("a", "hana", 1)).await.unwrap();
        let err = store.create(&entry("a", "hana", 2)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to save diary entry"));
    }
}
