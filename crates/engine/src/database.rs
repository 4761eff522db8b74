//! Relational database adapter
//!
//! `Database` is the seam the dispatcher calls for `sql_execute` and
//! `sql_query`. `SqliteDatabase` is the bundled implementation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};

use crate::error::BridgeResult;

/// One result row. Keys are exactly the selected columns, in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Map<String, Value>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

pub trait Database: Send + Sync {
    /// Run a statement with no row-set result and return the affected row count.
    fn execute(&self, sql: &str) -> BridgeResult<u64>;

    /// Run a row-returning statement, preserving the statement's row order.
    fn query(&self, sql: &str) -> BridgeResult<Vec<Row>>;
}

/// Database open options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseOptions {
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_true")]
    pub create: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            create: true,
        }
    }
}

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &str, options: DatabaseOptions) -> BridgeResult<Self> {
        let flags = if options.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if options.create {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_URI)?;
        tracing::debug!(path, readonly = options.readonly, "opened sqlite database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> BridgeResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }
}

impl Database for SqliteDatabase {
    fn execute(&self, sql: &str) -> BridgeResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let changes = conn.execute(sql, [])?;
        Ok(changes as u64)
    }

    fn query(&self, sql: &str) -> BridgeResult<Vec<Row>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let rows = stmt.query_map([], |row| {
            let mut map = Map::with_capacity(column_names.len());
            for (index, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), sqlite_value_to_json(row.get_ref(index)?));
            }
            Ok(Row(map))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

/// Native column types survive: integers, reals, text and null map to their
/// JSON counterparts; blobs become base64 strings.
fn sqlite_value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn users() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age INTEGER, score REAL, avatar BLOB)",
        )
        .unwrap();
        db
    }

    #[test]
    fn execute_reports_affected_rows() {
        let db = users();
        assert_eq!(
            db.execute("INSERT INTO users (name, age) VALUES ('alice', 30)").unwrap(),
            1
        );
        db.execute("INSERT INTO users (name, age) VALUES ('bob', 30)").unwrap();
        db.execute("INSERT INTO users (name, age) VALUES ('carol', 41)").unwrap();

        assert_eq!(db.execute("UPDATE users SET score = 1.5 WHERE age = 30").unwrap(), 2);
        assert_eq!(db.execute("DELETE FROM users WHERE age > 100").unwrap(), 0);
    }

    #[test]
    fn query_rows_carry_exactly_the_selected_columns() {
        let db = users();
        db.execute("INSERT INTO users (name, age) VALUES ('alice', 30)").unwrap();
        db.execute("INSERT INTO users (name, age) VALUES ('bob', 25)").unwrap();

        let names = db.query("SELECT name FROM users ORDER BY id").unwrap();
        assert_eq!(names.len(), 2);
        for row in &names {
            assert_eq!(row.columns().collect::<Vec<_>>(), ["name"]);
        }

        let full = db
            .query("SELECT id, name, age, score FROM users ORDER BY id")
            .unwrap();
        assert_eq!(
            full[0].columns().collect::<Vec<_>>(),
            ["id", "name", "age", "score"]
        );
        assert_eq!(full[0].get("name"), Some(&json!("alice")));
        assert_eq!(full[1].get("name"), Some(&json!("bob")));
        assert_ne!(full[0].get("id"), full[1].get("id"));
    }

    #[test]
    fn query_preserves_native_types() {
        let db = users();
        db.execute("INSERT INTO users (name, age, score, avatar) VALUES ('alice', 30, 2.5, x'010203')")
            .unwrap();

        let rows = db
            .query("SELECT age, score, avatar, NULL AS missing FROM users")
            .unwrap();
        let row = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(
            row,
            json!({ "age": 30, "score": 2.5, "avatar": "AQID", "missing": null })
        );
    }

    #[test]
    fn driver_errors_become_operation_failed() {
        let db = users();
        let err = db.query("SELECT * FROM missing_table").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert!(err.to_string().contains("missing_table"));

        let err = db.execute("INSERT INTO users (age) VALUES (1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert!(err.to_string().contains("NOT NULL"));
    }

    #[test]
    fn file_database_respects_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");
        let path = path.to_str().unwrap();

        let db = SqliteDatabase::open(path, DatabaseOptions::default()).unwrap();
        db.execute("CREATE TABLE notes (body TEXT)").unwrap();
        drop(db);

        let readonly = SqliteDatabase::open(
            path,
            DatabaseOptions {
                readonly: true,
                create: false,
            },
        )
        .unwrap();
        assert!(readonly.query("SELECT body FROM notes").unwrap().is_empty());
        let err = readonly
            .execute("INSERT INTO notes (body) VALUES ('x')")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
    }
}
