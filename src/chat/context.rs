use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    db::{self, AuxiliaryRecord, Message, Millis, Role, Room},
    llm::{PromptMessage, PromptRole},
    AppError, AppResult,
};

pub const AUXILIARY_PREFIX: &str = "Health data sources: ";

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub role: Role,
}

/// Everything one turn needs, read in a single transaction.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub room: Room,
    pub user_message: Message,
    pub prompt: Vec<PromptMessage>,
}

/// Records `message` in the room and snapshots the prompt for the turn.
///
/// A missing room or assistant profile rolls the transaction back, so a failed
/// turn leaves no trace.
pub async fn open_turn(
    db_pool: &SqlitePool,
    room_id: &str,
    user_id: &str,
    message: &NewMessage,
) -> AppResult<TurnContext> {
    let mut tx = db_pool.begin().await?;

    // Write first so the transaction holds the write lock before it reads.
    let touched = sqlx::query("UPDATE chat_rooms SET last_activity_at = ? WHERE id = ?")
        .bind(Millis::now())
        .bind(room_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if touched == 0 {
        return Err(AppError::NotFound("chat room"));
    }

    let Some(room) = db::find_room(&mut *tx, room_id).await? else {
        return Err(AppError::NotFound("chat room"));
    };
    let Some(profile) = db::find_assistant_profile(&mut *tx, &room.assistant_profile_id).await? else {
        return Err(AppError::NotFound("assistant profile"));
    };

    let user_message = db::insert_message(&mut *tx, room_id, message.role, &message.content).await?;

    let history = db::list_messages(&mut *tx, room_id).await?;
    let records = db::list_auxiliary_records(&mut *tx, user_id).await?;

    tx.commit().await?;

    Ok(TurnContext {
        prompt: build_prompt(&profile.system_prompt, &records, &history),
        room,
        user_message,
    })
}

pub fn build_prompt(system_prompt: &str, records: &[AuxiliaryRecord], history: &[Message]) -> Vec<PromptMessage> {
    let sources = records
        .iter()
        .map(|record| format!("{}: {}", record.kind, record.data))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptMessage::new(PromptRole::System, system_prompt));
    prompt.push(PromptMessage::new(PromptRole::User, format!("{AUXILIARY_PREFIX}{sources}")));
    prompt.extend(history.iter().map(|message| {
        let role = match message.role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        };
        PromptMessage::new(role, message.content.clone())
    }));
    prompt
}
