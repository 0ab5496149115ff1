use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{auth::AuthUser, db, AppError, AppResult, AppState};

use super::room::{load_room_view, RoomView};

pub const NEW_ROOM_NAME: &str = "New Chat";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomRequest {
    assistant_mode_id: String,
    llm_provider_id: Option<String>,
    llm_provider_model_id: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
) -> AppResult<Json<Value>> {
    let room_ids = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM chat_rooms WHERE author_id=? ORDER BY last_activity_at DESC, id DESC",
    )
        .bind(&user.id)
        .fetch_all(&db_pool)
        .await?;

    let mut conn = db_pool.acquire().await?;
    let mut chat_rooms: Vec<RoomView> = Vec::with_capacity(room_ids.len());
    for (room_id,) in room_ids {
        if let Some(room) = load_room_view(&mut conn, &room_id).await? {
            chat_rooms.push(room);
        }
    }

    Ok(Json(json!({ "chatRooms": chat_rooms })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
    Json(NewRoomRequest { assistant_mode_id, llm_provider_id, llm_provider_model_id }): Json<NewRoomRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut tx = db_pool.begin().await?;

    let room = db::create_room(
        &mut *tx,
        &user.id,
        NEW_ROOM_NAME,
        &assistant_mode_id,
        llm_provider_id.as_deref(),
        llm_provider_model_id.as_deref(),
    )
    .await;
    let room = match room {
        Ok(room) => room,
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
            return Err(AppError::NotFound("assistant profile"));
        }
        Err(e) => return Err(e.into()),
    };

    let visible = sqlx::query(
        "SELECT 1 FROM assistant_profiles WHERE id=? AND (author_id=? OR visibility='PUBLIC')",
    )
        .bind(&assistant_mode_id)
        .bind(&user.id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
    if !visible {
        return Err(AppError::NotFound("assistant profile"));
    }

    let chat_room = load_room_view(&mut tx, &room.id).await?.ok_or(AppError::NotFound("chat room"))?;
    tx.commit().await?;

    tracing::info!(room_id = %room.id, user_id = %user.id, "created chat room");
    Ok((StatusCode::CREATED, Json(json!({ "chatRoom": chat_room }))))
}
