use sqlx::SqlitePool;

use crate::db::{self, Message, Millis, Role};

/// Persists the assistant reply and renames the room after it.
pub async fn commit_reply(db_pool: &SqlitePool, room_id: &str, content: &str) -> Result<Message, sqlx::Error> {
    let mut tx = db_pool.begin().await?;

    let message = db::insert_message(&mut *tx, room_id, Role::Assistant, content).await?;
    sqlx::query("UPDATE chat_rooms SET last_activity_at = ?, name = ? WHERE id = ?")
        .bind(Millis::now())
        .bind(content)
        .bind(room_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(message)
}
