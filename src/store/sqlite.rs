use std::path::Path;
use std::time::Duration;
use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use crate::core::error::Result;
use crate::store::document::{DocumentStore, WriteOp};

/// Document store persisted in a SQLite database file.
///
/// Several processes may open the same file; conditional writes run inside
/// `IMMEDIATE` transactions so two lock attempts can never both succeed.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("SqliteDocumentStore: open {}", path.as_ref().display());
        let conn = Connection::open(path).map_err(|e| {
            warn!("SqliteDocumentStore: open db failed! {}", e);
            e
        })?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (collection, doc_key)
            ) WITHOUT ROWID",
            [],
        )
        .map_err(|e| {
            warn!("SqliteDocumentStore: create table failed! {}", e);
            e
        })?;

        Ok(SqliteDocumentStore {
            conn: Mutex::new(conn),
        })
    }
}

fn read_value(conn: &Connection, collection: &str, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM documents WHERE collection = ?1 AND doc_key = ?2",
        params![collection, key],
        |row| row.get(0),
    )
    .optional()
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        Ok(read_value(&conn, collection, key)?)
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO documents (collection, doc_key, value) VALUES (?1, ?2, ?3)",
            params![collection, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_key = ?2",
            params![collection, key],
        )?;
        Ok(removed > 0)
    }

    fn keys(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_key FROM documents WHERE collection = ?1 ORDER BY doc_key",
        )?;
        let keys = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_key, value FROM documents WHERE collection = ?1 ORDER BY doc_key",
        )?;
        let docs = stmt
            .query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, Vec<u8>)>>>()?;
        Ok(docs)
    }

    fn compare_and_set(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_value(&tx, collection, key)?;
        if current.as_deref() != expected {
            tx.rollback()?;
            return Ok(false);
        }

        match new {
            Some(value) => {
                tx.execute(
                    "INSERT OR REPLACE INTO documents (collection, doc_key, value) VALUES (?1, ?2, ?3)",
                    params![collection, key, value],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND doc_key = ?2",
                    params![collection, key],
                )?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for op in &ops {
            match op {
                WriteOp::Put { collection, key, value } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO documents (collection, doc_key, value) VALUES (?1, ?2, ?3)",
                        params![collection, key, value],
                    )?;
                }
                WriteOp::Delete { collection, key } => {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND doc_key = ?2",
                        params![collection, key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
