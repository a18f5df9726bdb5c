use crate::{Database, KvStore};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    pub fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| query_value(conn, key))
    }

    /// Insert or replace the whole value for `key` in one statement.
    pub fn put_value(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

impl KvStore for Database {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_value(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put_value(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.delete_value(key)
    }
}

fn query_value(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;

    let value = stmt
        .query_row([key], |row| row.get::<_, Vec<u8>>(0))
        .optional()?;

    Ok(value)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
