//! Messages: immutable per-cell mutation facts.
//!
//! Every change to a replica is expressed as a message setting one column of
//! one row to a scalar value. Messages are never mutated or removed; the
//! current value of a cell is the value of its newest message.

use crate::{ColumnName, Dataset, Error, RowId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved column marking a row as logically deleted.
pub const TOMBSTONE_COLUMN: &str = "tombstone";

/// Address of a single cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub dataset: Dataset,
    pub row: RowId,
    pub column: ColumnName,
}

impl CellKey {
    pub fn new(
        dataset: impl Into<Dataset>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
        }
    }
}

/// An immutable fact: `column` of `row` in `dataset` was set to `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Table name
    pub dataset: Dataset,
    /// Row identifier
    pub row: RowId,
    /// Column name
    pub column: ColumnName,
    /// Scalar value (null, bool, number or string)
    pub value: Value,
    /// Unique timestamp identifying this message
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(
        dataset: impl Into<Dataset>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
        value: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value,
            timestamp,
        }
    }

    /// The cell this message writes.
    pub fn cell(&self) -> CellKey {
        CellKey::new(&*self.dataset, &*self.row, &*self.column)
    }

    pub fn is_tombstone(&self) -> bool {
        self.column == TOMBSTONE_COLUMN
    }

    /// Check the message is well-formed, returning the reason if not.
    pub fn check(&self) -> Result<(), String> {
        for (name, field) in [
            ("dataset", &self.dataset),
            ("row", &self.row),
            ("column", &self.column),
        ] {
            if field.is_empty() {
                return Err(format!("empty field '{}'", name));
            }
        }
        if !is_scalar(&self.value) {
            return Err(format!(
                "value for column '{}' is not a scalar",
                self.column
            ));
        }
        self.timestamp.validate().map_err(|e| e.to_string())
    }
}

/// Whether a JSON value may be stored in a cell.
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Whether a tombstone value marks the row deleted.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// A message as received off the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl RawMessage {
    /// Validate and convert into a [`Message`], returning the reason on failure.
    pub fn into_message(self) -> Result<Message, String> {
        let dataset = self.dataset.ok_or("missing field 'dataset'")?;
        let row = self.row.ok_or("missing field 'row'")?;
        let column = self.column.ok_or("missing field 'column'")?;
        let timestamp = self
            .timestamp
            .ok_or("missing field 'timestamp'")?
            .parse::<Timestamp>()
            .map_err(|e| e.to_string())?;

        let message = Message::new(dataset, row, column, self.value, timestamp);
        message.check()?;
        Ok(message)
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        Self {
            dataset: Some(message.dataset),
            row: Some(message.row),
            column: Some(message.column),
            value: message.value,
            timestamp: Some(message.timestamp.to_string()),
        }
    }
}

/// Convert a wire batch, rejecting the whole batch on the first bad entry.
pub fn parse_batch(raw: Vec<RawMessage>) -> crate::Result<Vec<Message>> {
    raw.into_iter()
        .enumerate()
        .map(|(index, raw)| {
            raw.into_message()
                .map_err(|reason| Error::MalformedMessage { index, reason })
        })
        .collect()
}

/// A local edit that has not been stamped yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub dataset: Dataset,
    pub row: RowId,
    pub column: ColumnName,
    pub value: Value,
}

impl Change {
    pub fn new(
        dataset: impl Into<Dataset>,
        row: impl Into<RowId>,
        column: impl Into<ColumnName>,
        value: Value,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value,
        }
    }

    /// Change marking a row deleted.
    pub fn tombstone(dataset: impl Into<Dataset>, row: impl Into<RowId>) -> Self {
        Self::new(dataset, row, TOMBSTONE_COLUMN, Value::from(1))
    }

    /// One change per field of `fields`, skipping `id`.
    pub fn for_fields(
        dataset: &str,
        row: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Vec<Self> {
        fields
            .iter()
            .filter(|(column, _)| column.as_str() != "id")
            .map(|(column, value)| Self::new(dataset, row, column.as_str(), value.clone()))
            .collect()
    }

    pub fn stamp(self, timestamp: Timestamp) -> Message {
        Message {
            dataset: self.dataset,
            row: self.row,
            column: self.column,
            value: self.value,
            timestamp,
        }
    }
}
