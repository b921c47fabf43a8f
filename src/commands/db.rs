use crate::commands::store::FeedbackStore;
use crate::error::StoreError;
use crate::models::feedback::{new_record_id, now_timestamp, FeedbackRecord, Submission};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde_json::Map;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_SCHEMA_VERSION: i64 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "id, tester_name, submission_type, title, description, severity, timestamp, status, sheets_synced, extra_json";

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Newer binary wrote this file; leave its version alone.
        log::warn!("Feedback database is at schema version {version}, newer than {DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS feedback (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            tester_name TEXT NOT NULL,
            submission_type TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'New',
            sheets_synced INTEGER NOT NULL DEFAULT 0
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "feedback", "extra_json TEXT NOT NULL DEFAULT '{}'")?;

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_feedback_tester_name ON feedback(tester_name);
        ",
    )
}

fn add_column_if_missing(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    let column_name = column_def
        .split_whitespace()
        .next()
        .unwrap_or(column_def)
        .to_string();

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|res| res.ok())
        .any(|name| name == column_name);

    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column_def}"), [])?;
    }

    Ok(())
}

fn record_from_row(row: &Row<'_>) -> Result<FeedbackRecord> {
    let id: String = row.get(0)?;
    let extra_json: String = row.get(9)?;
    let extra = parse_extra(&id, &extra_json);

    Ok(FeedbackRecord {
        id,
        tester_name: row.get(1)?,
        submission_type: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        severity: row.get(5)?,
        timestamp: row.get(6)?,
        status: row.get(7)?,
        sheets_synced: row.get::<_, i64>(8)? != 0,
        extra,
    })
}

/// A damaged extras column loses only the pass-through fields, never the record.
fn parse_extra(id: &str, raw: &str) -> Map<String, serde_json::Value> {
    match serde_json::from_str::<Map<String, serde_json::Value>>(raw) {
        Ok(extra) => extra,
        Err(e) => {
            log::error!("Corrupt extra_json for feedback {id}, dropping extra fields: {e}");
            Map::new()
        }
    }
}

/// Disk-backed store.
///
/// Every append is a single INSERT, so concurrent writers never overwrite
/// each other the way a read-whole-file-then-rewrite scheme would.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and runs migrations.
    pub fn open(db_path: impl Into<PathBuf>) -> std::result::Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        initialize_schema(&conn)?;
        log::info!("Feedback database ready at {}", db_path.display());

        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn query_records(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<FeedbackRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(args, record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl FeedbackStore for SqliteStore {
    fn append(&self, submission: Submission) -> std::result::Result<FeedbackRecord, StoreError> {
        let record = FeedbackRecord::new(submission, new_record_id(), now_timestamp());
        let extra_json = serde_json::to_string(&record.extra)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO feedback (id, tester_name, submission_type, title, description, severity, timestamp, status, sheets_synced, extra_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &record.id,
                &record.tester_name,
                &record.submission_type,
                &record.title,
                &record.description,
                record.severity.as_deref(),
                &record.timestamp,
                &record.status,
                record.sheets_synced as i64,
                extra_json,
            ],
        )?;

        Ok(record)
    }

    fn list_all(&self) -> std::result::Result<Vec<FeedbackRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM feedback ORDER BY seq ASC");
        Ok(self.query_records(&sql, params![])?)
    }

    fn get(&self, id: &str) -> std::result::Result<Option<FeedbackRecord>, StoreError> {
        let conn = self.connection()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM feedback WHERE id = ?1");
        let record = conn
            .query_row(&sql, params![id], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn list_by_tester(&self, tester_name: &str) -> std::result::Result<Vec<FeedbackRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM feedback WHERE tester_name = ?1 ORDER BY seq ASC");
        Ok(self.query_records(&sql, params![tester_name])?)
    }

    fn update_sync_flag(&self, id: &str, synced: bool) -> std::result::Result<(), StoreError> {
        if !synced {
            return Ok(());
        }

        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE feedback SET sheets_synced = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            log::debug!("Sync flag update skipped, no record with id {id}");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn submission(tester: &str, title: &str) -> Submission {
        Submission {
            tester_name: tester.to_string(),
            submission_type: "Bug".to_string(),
            title: title.to_string(),
            description: "App crashes when saving".to_string(),
            severity: Some("High".to_string()),
            extra: Map::new(),
        }
    }

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SqliteStore::open(dir.path().join("data").join("feedback.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn schema_initializes_with_expected_version() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, DB_SCHEMA_VERSION);
    }

    #[test]
    fn migration_adds_extra_column_to_version_one_tables() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        apply_migration_1(&conn).expect("v1 schema");
        conn.pragma_update(None, "user_version", 1).expect("set version");

        initialize_schema(&conn).expect("upgrade");

        let has_extra: bool = conn
            .prepare("PRAGMA table_info(feedback)")
            .expect("table info")
            .query_map([], |row| row.get::<_, String>(1))
            .expect("columns")
            .filter_map(|res| res.ok())
            .any(|name| name == "extra_json");
        assert!(has_extra);
    }

    #[test]
    fn record_round_trip_preserves_fields_and_extras() {
        let (_dir, store) = temp_store();
        let mut input = submission("tester1", "Crash on save");
        input.extra.insert("platform".to_string(), json!("android"));

        let stored = store.append(input).expect("append");
        let loaded = store.get(&stored.id).expect("get").expect("exists");

        assert_eq!(loaded, stored);
        assert_eq!(loaded.extra.get("platform"), Some(&json!("android")));
        assert_eq!(loaded.severity.as_deref(), Some("High"));
    }

    #[test]
    fn records_survive_reopening_the_database() {
        let (_dir, store) = temp_store();
        let stored = store.append(submission("tester1", "first")).expect("append");

        let reopened = SqliteStore::open(store.path()).expect("reopen");
        assert_eq!(reopened.list_all().expect("list"), vec![stored]);
    }

    #[test]
    fn list_all_keeps_insertion_order() {
        let (_dir, store) = temp_store();
        for title in ["a", "b", "c"] {
            store.append(submission("t", title)).expect("append");
        }

        let titles: Vec<String> = store
            .list_all()
            .expect("list")
            .into_iter()
            .map(|record| record.title)
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn sync_flag_only_moves_forward() {
        let (_dir, store) = temp_store();
        let stored = store.append(submission("t", "x")).expect("append");
        assert!(!stored.sheets_synced);

        store.update_sync_flag("unknown-id", true).expect("unknown id is a no-op");
        store.update_sync_flag(&stored.id, true).expect("set flag");
        store.update_sync_flag(&stored.id, false).expect("clear is ignored");

        let loaded = store.get(&stored.id).expect("get").expect("exists");
        assert!(loaded.sheets_synced);
    }

    #[test]
    fn list_by_tester_uses_index_and_order() {
        let (_dir, store) = temp_store();
        store.append(submission("alice", "one")).expect("append");
        store.append(submission("bob", "two")).expect("append");
        store.append(submission("alice", "three")).expect("append");

        let titles: Vec<String> = store
            .list_by_tester("alice")
            .expect("list")
            .into_iter()
            .map(|record| record.title)
            .collect();
        assert_eq!(titles, vec!["one", "three"]);
    }

    #[test]
    fn corrupt_extra_column_keeps_record_readable() {
        let (_dir, store) = temp_store();
        let stored = store.append(submission("tester1", "Crash on save")).expect("append");

        let conn = Connection::open(store.path()).expect("open db");
        conn.execute(
            "UPDATE feedback SET extra_json = 'not json' WHERE id = ?1",
            params![&stored.id],
        )
        .expect("corrupt extras");

        let all = store.list_all().expect("list");
        assert_eq!(all, vec![stored.clone()]);
        assert!(all[0].extra.is_empty());
        assert_eq!(store.get(&stored.id).expect("get"), Some(stored));
    }

    #[test]
    fn parse_extra_handles_valid_and_damaged_json() {
        assert_eq!(parse_extra("a", r#"{"platform":"ios"}"#)["platform"], json!("ios"));
        assert!(parse_extra("b", "not json").is_empty());
        assert!(parse_extra("c", "[1,2]").is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .append(submission(&format!("writer-{writer}"), &format!("item-{i}")))
                            .expect("concurrent append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let all = store.list_all().expect("list");
        assert_eq!(all.len(), 80);
        let ids: std::collections::HashSet<_> = all.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 80);
    }
}
