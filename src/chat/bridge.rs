use futures_util::StreamExt;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::{
    db::{Message, Room},
    llm::{CompletionProvider, PromptMessage, ProviderError},
};

use super::{commit_reply, Frame, TurnContext, TurnOutcome, TurnState};

pub const PROVIDER_FAILURE: &str = "Failed to get response from LLM";

struct Turn<'a> {
    room_id: &'a str,
    state: TurnState,
}

impl<'a> Turn<'a> {
    fn new(room_id: &'a str) -> Self {
        Self { room_id, state: TurnState::Idle }
    }

    fn advance(&mut self, next: TurnState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid turn transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(room_id = self.room_id, from = ?self.state, to = ?next, "turn state");
        self.state = next;
    }

    /// Ends the turn. Consuming `self` keeps a finished turn from moving again.
    fn finish(mut self, message: Option<Message>) -> TurnOutcome {
        let outcome = match message {
            Some(message) => {
                self.advance(TurnState::Committed);
                TurnOutcome::Committed(message)
            }
            None => {
                self.advance(TurnState::Failed);
                TurnOutcome::Failed
            }
        };
        debug_assert!(self.state.is_terminal());
        outcome
    }
}

/// Returns the room's model, assigning and persisting `fallback` when it has none.
///
/// The assignment only applies while the column is still empty, and the stored
/// value is what gets used.
pub async fn resolve_model(db_pool: &SqlitePool, room: &Room, fallback: &str) -> Result<String, sqlx::Error> {
    if let Some(model) = &room.llm_provider_model_id {
        return Ok(model.clone());
    }

    sqlx::query("UPDATE chat_rooms SET llm_provider_model_id = ? WHERE id = ? AND llm_provider_model_id IS NULL")
        .bind(fallback)
        .bind(&room.id)
        .execute(db_pool)
        .await?;

    let (model,): (Option<String>,) = sqlx::query_as("SELECT llm_provider_model_id FROM chat_rooms WHERE id = ?")
        .bind(&room.id)
        .fetch_one(db_pool)
        .await?;

    tracing::info!(room_id = %room.id, model = model.as_deref().unwrap_or(fallback), "assigned fallback model");
    Ok(model.unwrap_or_else(|| fallback.to_owned()))
}

async fn emit(frames: &mpsc::Sender<Frame>, frame: Frame) {
    // A closed receiver means the client went away; the turn still runs to completion.
    if frames.send(frame).await.is_err() {
        tracing::trace!("client stopped reading frames");
    }
}

async fn relay(
    provider: &dyn CompletionProvider,
    model: &str,
    prompt: &[PromptMessage],
    frames: &mpsc::Sender<Frame>,
) -> Result<String, ProviderError> {
    let mut deltas = provider.stream_completion(model, prompt).await?;
    let mut content = String::new();

    while let Some(delta) = deltas.next().await {
        content.push_str(&delta?);
        emit(frames, Frame::content(content.as_str())).await;
    }

    Ok(content)
}

/// Runs the streaming half of a turn and commits the reply.
///
/// Provider failures and a failed fallback-model write become a single error
/// frame and [`TurnOutcome::Failed`]. Only a failed commit is returned as `Err`.
pub async fn stream_turn(
    db_pool: &SqlitePool,
    provider: &dyn CompletionProvider,
    fallback_model: &str,
    ctx: TurnContext,
    frames: &mpsc::Sender<Frame>,
) -> Result<TurnOutcome, sqlx::Error> {
    let room_id = ctx.room.id.as_str();
    let mut turn = Turn::new(room_id);
    turn.advance(TurnState::ContextAssembled);

    let model = match resolve_model(db_pool, &ctx.room, fallback_model).await {
        Ok(model) => model,
        Err(e) => {
            tracing::warn!(room_id, "could not assign a model: {e}");
            emit(frames, Frame::error(PROVIDER_FAILURE)).await;
            return Ok(turn.finish(None));
        }
    };

    turn.advance(TurnState::Streaming);
    let content = match relay(provider, &model, &ctx.prompt, frames).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(room_id, model = %model, "chat stream failed: {e}");
            emit(frames, Frame::error(PROVIDER_FAILURE)).await;
            return Ok(turn.finish(None));
        }
    };

    let message = commit_reply(db_pool, room_id, &content).await?;
    tracing::info!(room_id, model = %model, chars = content.len(), "turn committed");

    Ok(turn.finish(Some(message)))
}
