use axum::{debug_handler, extract::State, Json};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{auth::AuthUser, db::AssistantProfile, AppResult, AppState};

/// Profiles the user may attach to a room: their own private ones and every public one.
#[debug_handler(state = AppState)]
pub async fn list(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
) -> AppResult<Json<Value>> {
    let assistant_modes: Vec<AssistantProfile> = sqlx::query_as(
        r#"
        SELECT id, name, description, system_prompt FROM assistant_profiles
        WHERE (author_id=? AND visibility='PRIVATE') OR visibility='PUBLIC'
        ORDER BY name ASC
        "#,
    )
    .bind(&user.id)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(json!({ "assistantModes": assistant_modes })))
}
