//! Rows materialized from winning cell values.

use crate::message::{is_truthy, TOMBSTONE_COLUMN};
use crate::{Dataset, RowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row in the storage collaborator: the current value of each column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Row identifier
    pub id: RowId,
    /// Table this row belongs to
    pub dataset: Dataset,
    /// Column values, tombstone included
    pub columns: Map<String, Value>,
}

impl Row {
    pub fn new(dataset: impl Into<Dataset>, id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            dataset: dataset.into(),
            columns: Map::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    /// Whether the row's tombstone is set.
    pub fn is_deleted(&self) -> bool {
        self.columns.get(TOMBSTONE_COLUMN).map_or(false, is_truthy)
    }

    /// The row as a JSON object with its `id`, without the tombstone.
    pub fn to_value(&self) -> Value {
        let mut object: Map<String, Value> = self
            .columns
            .iter()
            .filter(|(column, _)| column.as_str() != TOMBSTONE_COLUMN)
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();
        object.insert("id".into(), Value::String(self.id.clone()));
        Value::Object(object)
    }
}
