use crate::error::EngineError;
use crate::method::Method;
use crate::stats::TriplicateSummary;
use chrono::Local;
use log::{debug, info};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Storage format of result timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One persisted analysis row. Field names and their order here are the
/// export contract; see [`crate::export::FIELD_ORDER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub user_id: i64,
    pub sample_name: String,
    pub method: Method,
    pub value1: f64,
    pub value2: f64,
    pub value3: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub coef_var: f64,
    pub recorded_at: String,
}

impl Analysis {
    /// One-line human-readable summary of the result.
    pub fn summary(&self) -> String {
        format!(
            "{} for sample '{}': mean {:.2}% | sd {:.2} | cv {:.2}% (replicates {:.2}, {:.2}, {:.2})",
            self.method,
            self.sample_name,
            self.mean,
            self.std_dev,
            self.coef_var,
            self.value1,
            self.value2,
            self.value3
        )
    }
}

/// A stored user account. Never serialized; the password hash stays in
/// the store and in [`crate::auth`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// A free-text lab note owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub created_at: String,
}

/// SQLite-backed persistent store for users, analyses and notes.
///
/// The analyses table carries `UNIQUE(user_id, sample_name, method)`:
/// re-recording a method for a sample is an update, and a second derived
/// Carbohydrate row for the same sample cannot exist no matter how the
/// duplicate check races.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        info!("opening analysis store at {}", path.display());
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&self) -> Result<(), EngineError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), EngineError> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            debug!("migrating analysis store to schema version 1");
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'standard'
                );

                CREATE TABLE IF NOT EXISTS analyses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    sample_name TEXT NOT NULL,
                    method TEXT NOT NULL,
                    value1 REAL NOT NULL,
                    value2 REAL NOT NULL,
                    value3 REAL NOT NULL,
                    mean REAL NOT NULL,
                    std_dev REAL NOT NULL,
                    coef_var REAL NOT NULL,
                    recorded_at TEXT NOT NULL,
                    UNIQUE(user_id, sample_name, method)
                );

                CREATE TABLE IF NOT EXISTS notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_analyses_user ON analyses(user_id);
                CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn analysis_from_row(row: &rusqlite::Row) -> rusqlite::Result<Analysis> {
        let method_name: String = row.get(3)?;
        let method = Method::from_name(&method_name).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown method '{method_name}'").into(),
            )
        })?;
        Ok(Analysis {
            id: row.get(0)?,
            user_id: row.get(1)?,
            sample_name: row.get(2)?,
            method,
            value1: row.get(4)?,
            value2: row.get(5)?,
            value3: row.get(6)?,
            mean: row.get(7)?,
            std_dev: row.get(8)?,
            coef_var: row.get(9)?,
            recorded_at: row.get(10)?,
        })
    }

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: row.get(4)?,
        })
    }

    fn note_from_row(row: &rusqlite::Row) -> rusqlite::Result<Note> {
        Ok(Note {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    // --- Users ---

    pub fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<i64, EngineError> {
        let result = self.conn.execute(
            "INSERT INTO users (name, email, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
            params![name, email, password_hash, role],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(EngineError::EmailTaken {
                    email: email.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, password_hash, role FROM users WHERE email = ?1",
        )?;
        let mut rows = stmt.query(params![email])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    // --- Analyses ---

    /// Insert or replace the triplicate result of (user, sample, method).
    /// The unique constraint turns a resubmission into an edit of the
    /// stored row. Returns the row as stored.
    pub fn upsert_analysis(
        &self,
        user_id: i64,
        sample_name: &str,
        method: Method,
        values: [f64; 3],
        summary: &TriplicateSummary,
    ) -> Result<Analysis, EngineError> {
        let now = timestamp_now();
        self.conn.execute(
            "INSERT INTO analyses (user_id, sample_name, method, value1, value2, value3,
                                   mean, std_dev, coef_var, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_id, sample_name, method) DO UPDATE SET
                 value1 = excluded.value1,
                 value2 = excluded.value2,
                 value3 = excluded.value3,
                 mean = excluded.mean,
                 std_dev = excluded.std_dev,
                 coef_var = excluded.coef_var,
                 recorded_at = excluded.recorded_at",
            params![
                user_id,
                sample_name,
                method.name(),
                values[0],
                values[1],
                values[2],
                summary.mean,
                summary.std_dev,
                summary.coef_var,
                now,
            ],
        )?;
        self.get_analysis(user_id, sample_name, method)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
            .map_err(EngineError::from)
    }

    /// Insert the derived Carbohydrate row for (user, sample), or fail
    /// with [`EngineError::DuplicateDerivedResult`] when one already
    /// exists. Insert-or-ignore against the unique constraint, no
    /// check-then-act window.
    pub fn insert_derived(
        &self,
        user_id: i64,
        sample_name: &str,
        carbohydrate: f64,
    ) -> Result<Analysis, EngineError> {
        let now = timestamp_now();
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO analyses (user_id, sample_name, method, value1, value2,
                                             value3, mean, std_dev, coef_var, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?4, ?4, ?4, 0, 0, ?5)",
            params![
                user_id,
                sample_name,
                Method::Carbohydrate.name(),
                carbohydrate,
                now,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::DuplicateDerivedResult {
                sample: sample_name.to_string(),
            });
        }
        self.get_analysis(user_id, sample_name, Method::Carbohydrate)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
            .map_err(EngineError::from)
    }

    /// Whether a derived Carbohydrate row exists for (user, sample).
    pub fn has_derived(&self, user_id: i64, sample_name: &str) -> Result<bool, EngineError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM analyses WHERE user_id = ?1 AND sample_name = ?2 AND method = ?3",
            params![user_id, sample_name, Method::Carbohydrate.name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Drop the derived Carbohydrate row of (user, sample), if any.
    /// Called whenever a mandatory analyte changes underneath it.
    pub fn delete_derived(&self, user_id: i64, sample_name: &str) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "DELETE FROM analyses WHERE user_id = ?1 AND sample_name = ?2 AND method = ?3",
            params![user_id, sample_name, Method::Carbohydrate.name()],
        )?;
        Ok(rows > 0)
    }

    pub fn get_analysis(
        &self,
        user_id: i64,
        sample_name: &str,
        method: Method,
    ) -> Result<Option<Analysis>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, sample_name, method, value1, value2, value3,
                    mean, std_dev, coef_var, recorded_at
             FROM analyses WHERE user_id = ?1 AND sample_name = ?2 AND method = ?3",
        )?;
        let mut rows = stmt.query(params![user_id, sample_name, method.name()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::analysis_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Stored mean per method for one sample, the deriver's input.
    pub fn means_for_sample(
        &self,
        user_id: i64,
        sample_name: &str,
    ) -> Result<HashMap<Method, f64>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT method, mean FROM analyses WHERE user_id = ?1 AND sample_name = ?2",
        )?;
        let mut rows = stmt.query(params![user_id, sample_name])?;
        let mut means = HashMap::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            if let Some(method) = Method::from_name(&name) {
                means.insert(method, row.get(1)?);
            }
        }
        Ok(means)
    }

    pub fn analyses_for_sample(
        &self,
        user_id: i64,
        sample_name: &str,
    ) -> Result<Vec<Analysis>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, sample_name, method, value1, value2, value3,
                    mean, std_dev, coef_var, recorded_at
             FROM analyses WHERE user_id = ?1 AND sample_name = ?2
             ORDER BY id",
        )?;
        let analyses = stmt
            .query_map(params![user_id, sample_name], Self::analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    /// Every analysis of one user, newest first.
    pub fn analyses_for_user(&self, user_id: i64) -> Result<Vec<Analysis>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, sample_name, method, value1, value2, value3,
                    mean, std_dev, coef_var, recorded_at
             FROM analyses WHERE user_id = ?1
             ORDER BY recorded_at DESC, id DESC",
        )?;
        let analyses = stmt
            .query_map(params![user_id], Self::analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    /// One user's analyses of one method, grouped by sample, newest first
    /// within a sample.
    pub fn analyses_for_user_method(
        &self,
        user_id: i64,
        method: Method,
    ) -> Result<Vec<Analysis>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, sample_name, method, value1, value2, value3,
                    mean, std_dev, coef_var, recorded_at
             FROM analyses WHERE user_id = ?1 AND method = ?2
             ORDER BY sample_name, recorded_at DESC, id DESC",
        )?;
        let analyses = stmt
            .query_map(params![user_id, method.name()], Self::analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    /// Every analysis of every user, for the administrator listing.
    pub fn all_analyses(&self) -> Result<Vec<Analysis>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, sample_name, method, value1, value2, value3,
                    mean, std_dev, coef_var, recorded_at
             FROM analyses ORDER BY user_id, recorded_at DESC, id DESC",
        )?;
        let analyses = stmt
            .query_map([], Self::analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }

    pub fn sample_names(&self, user_id: i64) -> Result<Vec<String>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT sample_name FROM analyses WHERE user_id = ?1 ORDER BY sample_name",
        )?;
        let names = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Terminal removal of one (user, sample, method) row.
    pub fn delete_analysis(
        &self,
        user_id: i64,
        sample_name: &str,
        method: Method,
    ) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "DELETE FROM analyses WHERE user_id = ?1 AND sample_name = ?2 AND method = ?3",
            params![user_id, sample_name, method.name()],
        )?;
        Ok(rows > 0)
    }

    // --- Notes ---

    pub fn add_note(&self, user_id: i64, title: &str, body: &str) -> Result<Note, EngineError> {
        let now = timestamp_now();
        self.conn.execute(
            "INSERT INTO notes (user_id, title, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, title, body, now],
        )?;
        Ok(Note {
            id: self.conn.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            created_at: now,
        })
    }

    pub fn notes_for_user(&self, user_id: i64) -> Result<Vec<Note>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, body, created_at FROM notes
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let notes = stmt
            .query_map(params![user_id], Self::note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    pub fn delete_note(&self, user_id: i64, note_id: i64) -> Result<bool, EngineError> {
        let rows = self.conn.execute(
            "DELETE FROM notes WHERE user_id = ?1 AND id = ?2",
            params![user_id, note_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(mean: f64, std_dev: f64, coef_var: f64) -> TriplicateSummary {
        TriplicateSummary {
            mean,
            std_dev,
            coef_var,
        }
    }

    fn store_with_user() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let user_id = store
            .insert_user("Ana", "ana@lab.example", "hash", "standard")
            .unwrap();
        (store, user_id)
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (store, _) = store_with_user();
        let err = store
            .insert_user("Other", "ana@lab.example", "hash2", "standard")
            .unwrap_err();
        assert!(matches!(err, EngineError::EmailTaken { .. }));
        assert!(store.user_by_email("ana@lab.example").unwrap().is_some());
    }

    #[test]
    fn upsert_replaces_instead_of_duplicating() {
        let (store, user_id) = store_with_user();

        let first = store
            .upsert_analysis(
                user_id,
                "corn flour",
                Method::Moisture,
                [20.0, 19.0, 21.0],
                &summary(20.0, 1.0, 5.0),
            )
            .unwrap();
        let second = store
            .upsert_analysis(
                user_id,
                "corn flour",
                Method::Moisture,
                [19.0, 19.0, 19.0],
                &summary(19.0, 0.0, 0.0),
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.mean, 19.0);
        assert_eq!(
            store.analyses_for_sample(user_id, "corn flour").unwrap().len(),
            1
        );
    }

    #[test]
    fn derived_insert_is_idempotent_at_the_constraint() {
        let (store, user_id) = store_with_user();

        let row = store.insert_derived(user_id, "corn flour", 61.84).unwrap();
        assert_eq!(row.method, Method::Carbohydrate);
        assert_eq!(row.value1, 61.84);
        assert_eq!(row.value3, 61.84);
        assert_eq!(row.mean, 61.84);
        assert_eq!(row.std_dev, 0.0);
        assert_eq!(row.coef_var, 0.0);
        assert!(store.has_derived(user_id, "corn flour").unwrap());

        let err = store.insert_derived(user_id, "corn flour", 61.84).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDerivedResult { .. }));
        assert_eq!(
            store.analyses_for_sample(user_id, "corn flour").unwrap().len(),
            1
        );
    }

    #[test]
    fn delete_derived_clears_the_row() {
        let (store, user_id) = store_with_user();
        store.insert_derived(user_id, "corn flour", 61.84).unwrap();
        assert!(store.delete_derived(user_id, "corn flour").unwrap());
        assert!(!store.has_derived(user_id, "corn flour").unwrap());
        assert!(!store.delete_derived(user_id, "corn flour").unwrap());
    }

    #[test]
    fn rows_are_scoped_to_their_user() {
        let (store, ana) = store_with_user();
        let rui = store
            .insert_user("Rui", "rui@lab.example", "hash", "standard")
            .unwrap();

        store
            .upsert_analysis(ana, "oat bran", Method::Ash, [3.0, 3.0, 3.0], &summary(3.0, 0.0, 0.0))
            .unwrap();

        assert_eq!(store.analyses_for_user(ana).unwrap().len(), 1);
        assert!(store.analyses_for_user(rui).unwrap().is_empty());
        assert_eq!(store.all_analyses().unwrap().len(), 1);
        assert_eq!(store.sample_names(ana).unwrap(), vec!["oat bran"]);
        assert!(store.sample_names(rui).unwrap().is_empty());
    }

    #[test]
    fn notes_round_trip() {
        let (store, user_id) = store_with_user();
        let note = store.add_note(user_id, "calibration", "balance drifts 0.01g").unwrap();
        assert_eq!(store.notes_for_user(user_id).unwrap(), vec![note.clone()]);
        assert!(store.delete_note(user_id, note.id).unwrap());
        assert!(store.notes_for_user(user_id).unwrap().is_empty());
    }

    #[test]
    fn file_backed_store_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.sqlite");

        {
            let store = Store::open(&path).unwrap();
            let user_id = store
                .insert_user("Ana", "ana@lab.example", "hash", "standard")
                .unwrap();
            store
                .upsert_analysis(
                    user_id,
                    "corn flour",
                    Method::Fiber,
                    [10.0, 10.0, 10.0],
                    &summary(10.0, 0.0, 0.0),
                )
                .unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        let user = reopened.user_by_email("ana@lab.example").unwrap().unwrap();
        let rows = reopened.analyses_for_user(user.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].method, Method::Fiber);
        assert_eq!(rows[0].mean, 10.0);
    }

    #[test]
    fn summary_line_reads_well() {
        let (store, user_id) = store_with_user();
        let row = store
            .upsert_analysis(
                user_id,
                "corn flour",
                Method::Moisture,
                [20.0, 19.0, 21.0],
                &summary(20.0, 1.0, 5.0),
            )
            .unwrap();
        assert_eq!(
            row.summary(),
            "Moisture for sample 'corn flour': mean 20.00% | sd 1.00 | cv 5.00% \
             (replicates 20.00, 19.00, 21.00)"
        );
    }
}
