use axum::{debug_handler, extract::Query, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{session::USER_ID, AppResult};

use super::local_path;

#[derive(Deserialize)]
pub struct LogoutQuery {
    pub return_url: Option<String>,
}

/// Drops the whole session, signed in or not.
#[debug_handler]
pub async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    session: Session,
) -> AppResult<Redirect> {
    if let Some(user_id) = session.get::<String>(USER_ID).await? {
        tracing::info!("goodbye {user_id}");
    }
    session.flush().await?;

    let return_url = return_url.as_deref().and_then(local_path).unwrap_or("/");
    Ok(Redirect::to(return_url))
}
