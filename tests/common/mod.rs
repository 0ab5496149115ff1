#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carechat::{
    auth,
    chat::{self, Frame, NewMessage, TurnOutcome},
    config::Config,
    db::{self, Role, Room, Visibility},
    llm::{CompletionProvider, DeltaStream, PromptMessage, ProviderError, ProviderModel},
    session::USER_ID,
    AppState,
};
use futures_util::stream;
use serde_json::json;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tower_sessions::{
    session::{Id, Record},
    MemoryStore, SessionStore,
};

pub const FALLBACK_MODEL: &str = "gemini-2.5-pro";

pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

/// A room owned by `u1` on a public profile with the given system prompt.
pub async fn room(pool: &SqlitePool, system_prompt: &str, model: Option<&str>) -> Room {
    let profile = db::create_assistant_profile(pool, None, "Helper", "", system_prompt, Visibility::Public)
        .await
        .unwrap();
    db::create_room(pool, "u1", "New Chat", &profile, None, model).await.unwrap()
}

pub fn user_message(content: &str) -> NewMessage {
    NewMessage { content: content.to_owned(), role: Role::User }
}

#[derive(Debug, Clone)]
pub enum Script {
    /// Streams the deltas and ends cleanly.
    Reply(Vec<&'static str>),
    /// Fails before the stream opens.
    Refuse,
    /// Streams the deltas, then fails.
    BreakAfter(Vec<&'static str>),
    /// Deletes every room as the stream opens, then streams the deltas.
    DeleteRooms(SqlitePool, Vec<&'static str>),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub model: String,
    pub prompt: Vec<PromptMessage>,
}

pub struct ScriptedProvider {
    script: Script,
    pub calls: Mutex<Vec<Call>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider { script, calls: Mutex::new(Vec::new()) })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream_completion(&self, model: &str, messages: &[PromptMessage]) -> Result<DeltaStream, ProviderError> {
        self.calls.lock().unwrap().push(Call { model: model.to_owned(), prompt: messages.to_vec() });

        let items: Vec<Result<String, ProviderError>> = match &self.script {
            Script::Refuse => {
                return Err(ProviderError::Api { status: 503, body: "overloaded".into() });
            }
            Script::Reply(deltas) => deltas.iter().map(|d| Ok(d.to_string())).collect(),
            Script::BreakAfter(deltas) => deltas
                .iter()
                .map(|d| Ok(d.to_string()))
                .chain(std::iter::once(Err(ProviderError::Stream("connection reset".into()))))
                .collect(),
            Script::DeleteRooms(pool, deltas) => {
                sqlx::query("DELETE FROM chat_rooms").execute(pool).await.unwrap();
                deltas.iter().map(|d| Ok(d.to_string())).collect()
            }
        };
        Ok(Box::pin(stream::iter(items)))
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<ProviderModel>, ProviderError> {
        Ok(vec![
            ProviderModel { id: "models/gemini-2.0-flash".into(), name: "Gemini 2.0 Flash".into() },
            ProviderModel { id: "models/gemini-2.5-pro".into(), name: "Gemini 2.5 Pro".into() },
        ])
    }
}

/// Runs one full turn the way the message handler does, collecting every frame.
pub async fn run_turn(
    pool: &SqlitePool,
    provider: &dyn CompletionProvider,
    room_id: &str,
    content: &str,
) -> (Vec<Frame>, TurnOutcome) {
    let (frames, outcome) = try_turn(pool, provider, room_id, content).await;
    (frames, outcome.unwrap())
}

/// Like [`run_turn`], but hands back the turn's raw result.
pub async fn try_turn(
    pool: &SqlitePool,
    provider: &dyn CompletionProvider,
    room_id: &str,
    content: &str,
) -> (Vec<Frame>, Result<TurnOutcome, sqlx::Error>) {
    let ctx = chat::open_turn(pool, room_id, "u1", &user_message(content)).await.unwrap();

    let (frame_tx, mut frame_rx) = mpsc::channel(8);
    let turn = async move {
        let frame_tx = frame_tx;
        chat::stream_turn(pool, provider, FALLBACK_MODEL, ctx, &frame_tx).await
    };
    let collect = async {
        let mut frames = Vec::new();
        while let Some(frame) = frame_rx.recv().await {
            frames.push(frame);
        }
        frames
    };

    let (outcome, frames) = tokio::join!(turn, collect);
    (frames, outcome)
}

pub fn state(pool: SqlitePool, provider: Arc<dyn CompletionProvider>) -> AppState {
    AppState {
        db_pool: pool,
        clients: auth::Clients::default(),
        config: Arc::new(Config::for_database("sqlite::memory:").unwrap()),
        provider,
    }
}

/// A running server with its own session store.
pub struct TestServer {
    pub base_url: String,
    pub sessions: MemoryStore,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn start(state: AppState) -> TestServer {
        let sessions = MemoryStore::default();
        let app = carechat::app_with_store(state, sessions.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        TestServer { base_url: format!("http://{addr}"), sessions, client: reqwest::Client::new() }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Stores a session signed in as `user_id` and returns its cookie header value.
    pub async fn sign_in(&self, user_id: &str) -> String {
        let record = Record {
            id: Id::default(),
            data: [(USER_ID.to_owned(), json!(user_id))].into_iter().collect(),
            expiry_date: OffsetDateTime::now_utc() + time::Duration::hours(1),
        };
        self.sessions.save(&record).await.unwrap();
        format!("id={}", record.id)
    }
}
