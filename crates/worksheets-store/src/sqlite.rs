//! SQLite store backend.
//!
//! Schema and uniqueness constraints follow the record model: the
//! `worksheet_edits` uniqueness on `(worksheet_id, to_version)` plus the
//! conditional `worksheets.version` update are the two concurrent-update
//! triggers.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use uuid::Uuid;

use crate::backend::StoreTx;
use crate::error::StoreError;
use crate::records::{
    EditRec, ParentEdgeRec, SliceElementRec, ValueRec, VERSION_UNBOUNDED, WorksheetRec,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS worksheets (
  id      TEXT PRIMARY KEY,
  version INTEGER NOT NULL,
  name    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS worksheet_edits (
  edit_id      TEXT NOT NULL,
  created_at   TEXT NOT NULL,
  worksheet_id TEXT NOT NULL,
  to_version   INTEGER NOT NULL,
  PRIMARY KEY (edit_id, worksheet_id),
  UNIQUE (worksheet_id, to_version)
);

CREATE TABLE IF NOT EXISTS worksheet_values (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  worksheet_id TEXT NOT NULL,
  field_index  INTEGER NOT NULL,
  from_version INTEGER NOT NULL,
  to_version   INTEGER NOT NULL,
  value        TEXT
);
CREATE INDEX IF NOT EXISTS worksheet_values_by_ws
  ON worksheet_values (worksheet_id, field_index);

CREATE TABLE IF NOT EXISTS worksheet_parents (
  child_id           TEXT NOT NULL,
  parent_id          TEXT NOT NULL,
  parent_field_index INTEGER NOT NULL,
  PRIMARY KEY (child_id, parent_id, parent_field_index)
);

CREATE TABLE IF NOT EXISTS worksheet_slice_elements (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  slice_id     TEXT NOT NULL,
  rank         INTEGER NOT NULL,
  from_version INTEGER NOT NULL,
  to_version   INTEGER NOT NULL,
  value        TEXT
);
CREATE INDEX IF NOT EXISTS worksheet_slice_elements_by_slice
  ON worksheet_slice_elements (slice_id, rank);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    pub fn begin(&mut self) -> Result<SqliteTx<'_>, StoreError> {
        Ok(SqliteTx {
            tx: self.conn.transaction()?,
        })
    }
}

pub struct SqliteTx<'c> {
    tx: Transaction<'c>,
}

impl SqliteTx<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_uuid(text: String) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&text).map_err(|_| StoreError::CorruptRecord(format!("bad uuid {text:?}")))
}

fn parse_timestamp(text: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::CorruptRecord(format!("bad timestamp {text:?}")))
}

impl StoreTx for SqliteTx<'_> {
    fn insert_worksheet(&mut self, rec: &WorksheetRec) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO worksheets (id, version, name) VALUES (?1, ?2, ?3)",
            params![rec.id.to_string(), rec.version, rec.name],
        )?;
        Ok(())
    }

    fn update_worksheet_version(
        &mut self,
        id: Uuid,
        old_version: i64,
        new_version: i64,
    ) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE worksheets SET version = ?1 WHERE id = ?2 AND version = ?3",
            params![new_version, id.to_string(), old_version],
        )?;
        Ok(changed > 0)
    }

    fn get_worksheet(&mut self, id: Uuid) -> Result<Option<WorksheetRec>, StoreError> {
        let row = self
            .tx
            .query_row(
                "SELECT id, version, name FROM worksheets WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, version, name)) => Ok(Some(WorksheetRec {
                id: parse_uuid(id)?,
                version,
                name,
            })),
        }
    }

    fn insert_edit(&mut self, rec: &EditRec) -> Result<(), StoreError> {
        let inserted = self.tx.execute(
            "INSERT INTO worksheet_edits (edit_id, created_at, worksheet_id, to_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rec.edit_id.to_string(),
                rec.created_at.to_rfc3339(),
                rec.worksheet_id.to_string(),
                rec.to_version,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::ConcurrentUpdate),
            Err(e) => Err(e.into()),
        }
    }

    fn edit_records(&mut self, edit_id: Uuid) -> Result<Vec<EditRec>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT edit_id, created_at, worksheet_id, to_version
             FROM worksheet_edits WHERE edit_id = ?1",
        )?;
        let rows = stmt.query_map(params![edit_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (edit_id, created_at, worksheet_id, to_version) = row?;
            records.push(EditRec {
                edit_id: parse_uuid(edit_id)?,
                created_at: parse_timestamp(created_at)?,
                worksheet_id: parse_uuid(worksheet_id)?,
                to_version,
            });
        }
        Ok(records)
    }

    fn insert_value(&mut self, rec: &ValueRec) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO worksheet_values (worksheet_id, field_index, from_version, to_version, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rec.worksheet_id.to_string(),
                rec.field_index,
                rec.from_version,
                rec.to_version,
                rec.value,
            ],
        )?;
        Ok(())
    }

    fn close_value(
        &mut self,
        worksheet_id: Uuid,
        field_index: i32,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE worksheet_values SET to_version = ?1
             WHERE worksheet_id = ?2 AND field_index = ?3 AND to_version = ?4",
            params![
                to_version,
                worksheet_id.to_string(),
                field_index,
                VERSION_UNBOUNDED,
            ],
        )?;
        Ok(())
    }

    fn values_at(&mut self, worksheet_id: Uuid, version: i64) -> Result<Vec<ValueRec>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT field_index, from_version, to_version, value
             FROM worksheet_values
             WHERE worksheet_id = ?1 AND from_version <= ?2 AND ?2 <= to_version",
        )?;
        let rows = stmt.query_map(params![worksheet_id.to_string(), version], |row| {
            Ok(ValueRec {
                worksheet_id,
                field_index: row.get(0)?,
                from_version: row.get(1)?,
                to_version: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn insert_slice_element(&mut self, rec: &SliceElementRec) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO worksheet_slice_elements (slice_id, rank, from_version, to_version, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rec.slice_id.to_string(),
                rec.rank,
                rec.from_version,
                rec.to_version,
                rec.value,
            ],
        )?;
        Ok(())
    }

    fn close_slice_element(
        &mut self,
        slice_id: Uuid,
        rank: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE worksheet_slice_elements SET to_version = ?1
             WHERE slice_id = ?2 AND rank = ?3 AND to_version = ?4",
            params![to_version, slice_id.to_string(), rank, VERSION_UNBOUNDED],
        )?;
        Ok(())
    }

    fn slice_elements_at(
        &mut self,
        slice_ids: &[Uuid],
        version: i64,
    ) -> Result<Vec<SliceElementRec>, StoreError> {
        let mut records = Vec::new();
        let mut stmt = self.tx.prepare(
            "SELECT rank, from_version, to_version, value
             FROM worksheet_slice_elements
             WHERE slice_id = ?1 AND from_version <= ?2 AND ?2 <= to_version
             ORDER BY rank",
        )?;
        for slice_id in slice_ids {
            let rows = stmt.query_map(params![slice_id.to_string(), version], |row| {
                Ok(SliceElementRec {
                    slice_id: *slice_id,
                    rank: row.get(0)?,
                    from_version: row.get(1)?,
                    to_version: row.get(2)?,
                    value: row.get(3)?,
                })
            })?;
            for row in rows {
                records.push(row?);
            }
        }
        Ok(records)
    }

    fn insert_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT OR IGNORE INTO worksheet_parents (child_id, parent_id, parent_field_index)
             VALUES (?1, ?2, ?3)",
            params![
                rec.child_id.to_string(),
                rec.parent_id.to_string(),
                rec.parent_field_index,
            ],
        )?;
        Ok(())
    }

    fn delete_parent_edge(&mut self, rec: &ParentEdgeRec) -> Result<(), StoreError> {
        self.tx.execute(
            "DELETE FROM worksheet_parents
             WHERE child_id = ?1 AND parent_id = ?2 AND parent_field_index = ?3",
            params![
                rec.child_id.to_string(),
                rec.parent_id.to_string(),
                rec.parent_field_index,
            ],
        )?;
        Ok(())
    }

    fn parent_edges_of(&mut self, child_id: Uuid) -> Result<Vec<ParentEdgeRec>, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT parent_id, parent_field_index FROM worksheet_parents WHERE child_id = ?1",
        )?;
        let rows = stmt.query_map(params![child_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (parent_id, parent_field_index) = row?;
            records.push(ParentEdgeRec {
                child_id,
                parent_id: parse_uuid(parent_id)?,
                parent_field_index,
            });
        }
        Ok(records)
    }
}
