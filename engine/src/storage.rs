//! The storage collaborator.
//!
//! The merge engine never owns application tables. It writes winning cell
//! values through [`Storage`], which an embedding application implements on
//! top of its own datastore. [`MemoryStorage`] is an in-process
//! implementation used by tests, benches and the sync server.

use crate::row::Row;
use crate::{Dataset, RowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reported by a storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("write to {dataset}.{row}.{column} rejected: {reason}")]
    Rejected {
        dataset: String,
        row: String,
        column: String,
        reason: String,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Row/column read-write primitives with a transactional wrapper.
pub trait Storage {
    /// Current stored value of a cell.
    fn read_cell(&self, dataset: &str, row: &str, column: &str)
        -> Result<Option<Value>, StorageError>;

    /// Overwrite a cell.
    fn write_cell(
        &mut self,
        dataset: &str,
        row: &str,
        column: &str,
        value: Value,
    ) -> Result<(), StorageError>;

    /// Remove a cell. Removing the last cell of a row removes the row.
    fn remove_cell(&mut self, dataset: &str, row: &str, column: &str)
        -> Result<(), StorageError>;

    /// Run `f` so that either all of its writes land or none do.
    ///
    /// The default runs `f` directly, for backends without transactions.
    fn transaction<T, F>(&mut self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Self) -> Result<T, StorageError>,
    {
        f(self)
    }
}

/// A table: rows by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    rows: BTreeMap<RowId, Row>,
}

impl Table {
    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    /// Rows including deleted ones.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Rows whose tombstone is not set.
    pub fn active_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter(|r| !r.is_deleted())
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.active_rows().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStorage {
    tables: BTreeMap<Dataset, Table>,
    /// Undo records of the open transaction
    #[serde(skip)]
    journal: Option<Vec<Undo>>,
}

/// How to revert one cell write.
#[derive(Debug, Clone, PartialEq)]
struct Undo {
    dataset: Dataset,
    row: RowId,
    column: String,
    previous: Option<Value>,
    created_row: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, dataset: &str) -> Option<&Table> {
        self.tables.get(dataset)
    }

    /// Names of every table with at least one row.
    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// A live row; `None` when absent or deleted.
    pub fn get_row(&self, dataset: &str, id: &str) -> Option<&Row> {
        self.table(dataset)
            .and_then(|t| t.get(id))
            .filter(|r| !r.is_deleted())
    }

    /// Query a table. Returns `None` when the table has no rows.
    pub fn query(&self, dataset: &str) -> Option<QueryBuilder<'_>> {
        self.tables.get(dataset).map(QueryBuilder::new)
    }

    fn undo(&mut self, undo: Undo) {
        let table = self.tables.entry(undo.dataset.clone()).or_default();
        if undo.created_row {
            table.rows.remove(&undo.row);
        } else {
            // a removed row comes back with the cell it lost
            let row = table
                .rows
                .entry(undo.row.clone())
                .or_insert_with(|| Row::new(&undo.dataset, &undo.row));
            match undo.previous {
                Some(value) => row.set(undo.column, value),
                None => {
                    row.columns.remove(&undo.column);
                }
            }
        }
        if table.rows.is_empty() {
            self.tables.remove(&undo.dataset);
        }
    }
}

impl Storage for MemoryStorage {
    fn read_cell(
        &self,
        dataset: &str,
        row: &str,
        column: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .table(dataset)
            .and_then(|t| t.get(row))
            .and_then(|r| r.get(column))
            .cloned())
    }

    fn write_cell(
        &mut self,
        dataset: &str,
        row: &str,
        column: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        let rows = &mut self.tables.entry(dataset.to_string()).or_default().rows;
        let created_row = !rows.contains_key(row);
        let target = rows
            .entry(row.to_string())
            .or_insert_with(|| Row::new(dataset, row));

        if let Some(journal) = self.journal.as_mut() {
            journal.push(Undo {
                dataset: dataset.to_string(),
                row: row.to_string(),
                column: column.to_string(),
                previous: target.get(column).cloned(),
                created_row,
            });
        }
        target.set(column, value);
        Ok(())
    }

    fn remove_cell(&mut self, dataset: &str, row: &str, column: &str) -> Result<(), StorageError> {
        let Some(table) = self.tables.get_mut(dataset) else {
            return Ok(());
        };
        let Some(target) = table.rows.get_mut(row) else {
            return Ok(());
        };
        let Some(previous) = target.columns.remove(column) else {
            return Ok(());
        };
        if target.columns.is_empty() {
            table.rows.remove(row);
        }
        if table.rows.is_empty() {
            self.tables.remove(dataset);
        }

        if let Some(journal) = self.journal.as_mut() {
            journal.push(Undo {
                dataset: dataset.to_string(),
                row: row.to_string(),
                column: column.to_string(),
                previous: Some(previous),
                created_row: false,
            });
        }
        Ok(())
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Self) -> Result<T, StorageError>,
    {
        // nested transactions join the outer one
        if self.journal.is_some() {
            return f(self);
        }

        self.journal = Some(Vec::new());
        let result = f(self);
        let journal = self.journal.take().unwrap_or_default();
        if result.is_err() {
            for undo in journal.into_iter().rev() {
                self.undo(undo);
            }
        }
        result
    }
}

/// Query builder over one table.
pub struct QueryBuilder<'a> {
    table: &'a Table,
    include_deleted: bool,
}

impl<'a> QueryBuilder<'a> {
    fn new(table: &'a Table) -> Self {
        Self {
            table,
            include_deleted: false,
        }
    }

    /// Include deleted rows in results.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    fn rows(&self) -> Box<dyn Iterator<Item = &'a Row> + 'a> {
        if self.include_deleted {
            Box::new(self.table.all_rows())
        } else {
            Box::new(self.table.active_rows())
        }
    }

    /// Get all matching rows.
    pub fn all(self) -> Vec<&'a Row> {
        self.rows().collect()
    }

    /// Get the first matching row.
    pub fn first(self) -> Option<&'a Row> {
        self.rows().next()
    }

    /// Count matching rows.
    pub fn count(self) -> usize {
        self.rows().count()
    }

    /// Filter rows by a predicate on their columns.
    pub fn filter<F>(self, predicate: F) -> Vec<&'a Row>
    where
        F: Fn(&Row) -> bool,
    {
        self.rows().filter(|r| predicate(r)).collect()
    }
}
