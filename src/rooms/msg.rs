use std::sync::Arc;

use axum::{
    body::Body,
    debug_handler,
    extract::{Path, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
    BoxError, Json,
};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    chat::{self, NewMessage, TurnOutcome},
    config::Config,
    db,
    llm::CompletionProvider,
    AppResult, AppState,
};

const FRAME_BUFFER: usize = 64;

#[debug_handler(state = AppState)]
pub(crate) async fn list_messages(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Value>> {
    let chat_messages = db::list_messages(&db_pool, &room_id.to_string()).await?;
    Ok(Json(json!({ "chatMessages": chat_messages })))
}

/// Resolves once the turn task ends; yields a body error if the reply could not be stored.
async fn turn_result(turn: JoinHandle<Result<TurnOutcome, sqlx::Error>>) -> Option<Result<String, BoxError>> {
    match turn.await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::error!("failed to store assistant reply: {e}");
            Some(Err(e.into()))
        }
        Err(e) => {
            tracing::error!("chat turn task failed: {e}");
            Some(Err(e.into()))
        }
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(provider): State<Arc<dyn CompletionProvider>>,
    State(config): State<Arc<Config>>,
    user: AuthUser,
    Json(message): Json<NewMessage>,
) -> AppResult<Response> {
    let ctx = chat::open_turn(&db_pool, &room_id.to_string(), &user.id, &message).await?;

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
    let turn = tokio::spawn(async move {
        chat::stream_turn(&db_pool, provider.as_ref(), &config.fallback_model, ctx, &frame_tx).await
    });

    let frames = ReceiverStream::new(frame_rx).map(|frame: chat::Frame| Ok::<_, BoxError>(frame.to_line()));
    let tail = stream::once(turn_result(turn)).filter_map(|item| async move { item });

    Ok((
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames.chain(tail)),
    )
        .into_response())
}
