use anyhow::anyhow;
use axum::{debug_handler, extract::{FromRequestParts, State}, http::request::Parts, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{session::USER_ID, AppError, AppResult};

/// The signed-in user, taken from the session. Rejects with 401 when absent.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::Internal(anyhow!(msg)))?;

        let Some(id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::Unauthorized);
        };

        Ok(AuthUser { id })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    id: String,
    alias: String,
    has_onboarded: bool,
}

#[debug_handler(state = crate::AppState)]
pub async fn me(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
) -> AppResult<Json<Me>> {
    let Some((alias, has_onboarded)): Option<(String, bool)> =
        sqlx::query_as("SELECT alias,has_onboarded FROM users WHERE id=?")
            .bind(&user.id)
            .fetch_optional(&db_pool)
            .await?
    else {
        return Err(AppError::Unauthorized);
    };

    Ok(Json(Me { id: user.id, alias, has_onboarded }))
}
