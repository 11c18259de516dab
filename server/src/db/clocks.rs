//! Database operations for the group_clocks table.

use converge_engine::Clock;
use sqlx::PgPool;

/// Load the persisted clock token of a group.
pub async fn load_clock(pool: &PgPool, group_id: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT clock FROM group_clocks WHERE group_id = $1")
        .bind(group_id)
        .fetch_optional(pool)
        .await
}

/// Store `clock` for a new group, returning the token that ends up stored.
///
/// When another caller created the group first, its clock is kept and
/// returned instead.
pub async fn claim_clock(
    pool: &PgPool,
    group_id: &str,
    clock: &Clock,
) -> Result<String, sqlx::Error> {
    let token = clock
        .serialize()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let state = clock.state();

    sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO group_clocks (group_id, millis, counter, clock, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (group_id) DO UPDATE SET group_id = group_clocks.group_id
        RETURNING clock
        "#,
    )
    .bind(group_id)
    .bind(state.millis as i64)
    .bind(i32::from(state.counter))
    .bind(token)
    .fetch_one(pool)
    .await
}

/// Persist a group's clock. An older clock never overwrites a newer one.
pub async fn save_clock(pool: &PgPool, group_id: &str, clock: &Clock) -> Result<(), sqlx::Error> {
    let token = clock
        .serialize()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let state = clock.state();

    sqlx::query(
        r#"
        INSERT INTO group_clocks (group_id, millis, counter, clock, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (group_id) DO UPDATE SET
            millis = EXCLUDED.millis,
            counter = EXCLUDED.counter,
            clock = EXCLUDED.clock,
            updated_at = NOW()
        WHERE (group_clocks.millis, group_clocks.counter)
            < (EXCLUDED.millis, EXCLUDED.counter)
        "#,
    )
    .bind(group_id)
    .bind(state.millis as i64)
    .bind(i32::from(state.counter))
    .bind(token)
    .execute(pool)
    .await?;

    Ok(())
}
