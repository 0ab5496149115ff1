use axum::{body::Bytes, debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::{db::{self, AssistantProfile, Millis}, AppError, AppResult, AppState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub name: String,
    pub assistant_mode: AssistantProfile,
    pub llm_provider_id: Option<String>,
    pub llm_provider_model_id: Option<String>,
    pub created_at: Millis,
    pub last_activity_at: Millis,
}

pub async fn load_room_view(db: &mut sqlx::SqliteConnection, room_id: &str) -> AppResult<Option<RoomView>> {
    let Some(room) = db::find_room(&mut *db, room_id).await? else {
        return Ok(None);
    };
    let Some(assistant_mode) = db::find_assistant_profile(&mut *db, &room.assistant_profile_id).await? else {
        return Err(AppError::NotFound("assistant profile"));
    };

    Ok(Some(RoomView {
        id: room.id,
        name: room.name,
        assistant_mode,
        llm_provider_id: room.llm_provider_id,
        llm_provider_model_id: room.llm_provider_model_id,
        created_at: room.created_at,
        last_activity_at: room.last_activity_at,
    }))
}

/// `null` clears a provider column, an absent field leaves it alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoomPatch {
    assistant_mode_id: Option<String>,
    #[serde(default, deserialize_with = "present")]
    llm_provider_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    llm_provider_model_id: Option<Option<String>>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(deserializer).map(Some)
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Value>> {
    let mut conn = db_pool.acquire().await?;
    let Some(chat_room) = load_room_view(&mut conn, &room_id.to_string()).await? else {
        return Err(AppError::NotFound("chat room"));
    };

    Ok(Json(json!({ "chatRoom": chat_room })))
}

async fn exists(db: impl SqliteExecutor<'_>, table: &str, id: &str) -> Result<bool, sqlx::Error> {
    Ok(sqlx::query(&format!("SELECT 1 FROM {table} WHERE id=?"))
        .bind(id)
        .fetch_optional(db)
        .await?
        .is_some())
}

/// Applies a partial update. An empty or unreadable body changes nothing.
#[debug_handler(state = AppState)]
pub(crate) async fn update_room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let room_id = room_id.to_string();
    let patch: RoomPatch = serde_json::from_slice(&body).unwrap_or_default();

    let mut tx = db_pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE chat_rooms SET
            assistant_profile_id = COALESCE(?, assistant_profile_id),
            llm_provider_id = CASE WHEN ? THEN ? ELSE llm_provider_id END,
            llm_provider_model_id = CASE WHEN ? THEN ? ELSE llm_provider_model_id END
        WHERE id = ? AND (?1 IS NULL OR EXISTS (SELECT 1 FROM assistant_profiles WHERE id = ?1))
        "#,
    )
    .bind(&patch.assistant_mode_id)
    .bind(patch.llm_provider_id.is_some())
    .bind(patch.llm_provider_id.as_ref().and_then(Option::as_deref))
    .bind(patch.llm_provider_model_id.is_some())
    .bind(patch.llm_provider_model_id.as_ref().and_then(Option::as_deref))
    .bind(&room_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        if exists(&mut *tx, "chat_rooms", &room_id).await? {
            return Err(AppError::NotFound("assistant profile"));
        }
        return Err(AppError::NotFound("chat room"));
    }

    if let Some(Some(provider_id)) = &patch.llm_provider_id {
        if !exists(&mut *tx, "llm_providers", provider_id).await? {
            return Err(AppError::NotFound("llm provider"));
        }
    }

    let chat_room = load_room_view(&mut tx, &room_id).await?.ok_or(AppError::NotFound("chat room"))?;
    tx.commit().await?;

    Ok(Json(json!({ "chatRoom": chat_room })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<StatusCode> {
    let room_id = room_id.to_string();
    let mut tx = db_pool.begin().await?;

    sqlx::query("DELETE FROM chat_messages WHERE chat_room_id=?")
        .bind(&room_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM chat_rooms WHERE id=?")
        .bind(&room_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("chat room"));
    }

    tx.commit().await?;
    tracing::info!(room_id = %room_id, "deleted chat room");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_tells_null_from_absent() {
        let patch: RoomPatch = serde_json::from_str(r#"{"llmProviderId": "p1", "llmProviderModelId": null}"#).unwrap();
        assert_eq!(patch.llm_provider_id, Some(Some("p1".to_owned())));
        assert_eq!(patch.llm_provider_model_id, Some(None));
        assert_eq!(patch.assistant_mode_id, None);

        let patch: RoomPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.llm_provider_model_id, None);
    }
}
