//! Database operations for the messages table.

use converge_engine::{Message, Timestamp};
use sqlx::{PgPool, Row};

/// A stored message row from the database.
#[derive(Debug)]
pub struct StoredMessage {
    pub timestamp: String,
    pub dataset: String,
    pub row_id: String,
    pub column_name: String,
    pub value: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredMessage {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMessage {
            timestamp: row.try_get("timestamp")?,
            dataset: row.try_get("dataset")?,
            row_id: row.try_get("row_id")?,
            column_name: row.try_get("column_name")?,
            value: row.try_get("value")?,
        })
    }
}

impl StoredMessage {
    /// Convert a database row into an engine message.
    pub fn to_message(&self) -> converge_engine::Result<Message> {
        let timestamp: Timestamp = self.timestamp.parse()?;
        Ok(Message::new(
            self.dataset.clone(),
            self.row_id.clone(),
            self.column_name.clone(),
            self.value.clone(),
            timestamp,
        ))
    }
}

/// Insert messages for a group, skipping any already stored.
///
/// Returns the number of rows actually inserted.
pub async fn insert_messages(
    pool: &PgPool,
    group_id: &str,
    messages: &[Message],
) -> Result<u64, sqlx::Error> {
    if messages.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for message in messages {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (group_id, timestamp, dataset, row_id, column_name, value)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (group_id, timestamp) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(message.timestamp.to_string())
        .bind(&message.dataset)
        .bind(&message.row)
        .bind(&message.column)
        .bind(&message.value)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Load every message of a group in timestamp order.
pub async fn load_messages(
    pool: &PgPool,
    group_id: &str,
) -> Result<Vec<StoredMessage>, sqlx::Error> {
    sqlx::query_as::<_, StoredMessage>(
        r#"
        SELECT timestamp, dataset, row_id, column_name, value
        FROM messages
        WHERE group_id = $1
        ORDER BY timestamp COLLATE "C" ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
}
