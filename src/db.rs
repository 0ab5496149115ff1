use std::{str::FromStr, time::Duration};

use serde::{Serialize, Serializer};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqliteExecutor, SqlitePool,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

/// Unix time in milliseconds, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct Millis(pub i64);

impl Millis {
    pub fn now() -> Millis {
        Millis((OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64)
    }

    pub fn to_datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000).ok()
    }
}

impl Serialize for Millis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = self
            .to_datetime()
            .and_then(|dt| dt.format(&Rfc3339).ok())
            .ok_or_else(|| serde::ser::Error::custom(format!("timestamp out of range: {}", self.0)))?;
        serializer.serialize_str(&formatted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Visibility {
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: Millis,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AssistantProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Room {
    pub id: String,
    pub author_id: String,
    pub name: String,
    pub assistant_profile_id: String,
    pub llm_provider_id: Option<String>,
    pub llm_provider_model_id: Option<String>,
    pub created_at: Millis,
    pub last_activity_at: Millis,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LlmProvider {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub api_key: String,
    #[serde(rename = "apiURL")]
    pub api_url: String,
    #[serde(rename = "order")]
    pub sort_order: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuxiliaryRecord {
    pub kind: String,
    pub data: String,
}

/// Opens the pool in WAL mode. Writers that collide wait up to the busy timeout.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            alias TEXT NOT NULL,
            has_onboarded INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS assistant_profiles (
            id TEXT PRIMARY KEY,
            author_id TEXT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            system_prompt TEXT NOT NULL,
            visibility TEXT NOT NULL DEFAULT 'PRIVATE'
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS llm_providers (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            name TEXT NOT NULL,
            api_key TEXT NOT NULL DEFAULT '',
            api_url TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS chat_rooms (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            name TEXT NOT NULL,
            assistant_profile_id TEXT NOT NULL REFERENCES assistant_profiles(id),
            llm_provider_id TEXT,
            llm_provider_model_id TEXT,
            created_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            chat_room_id TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS chat_messages_room_created ON chat_messages (chat_room_id, created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS auxiliary_records (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(db_pool).await?;
    }

    Ok(())
}

/// Appends a message to a room. The timestamp is bumped past the room's latest
/// message so history stays strictly ordered even within one millisecond.
pub async fn insert_message(
    db: impl SqliteExecutor<'_>,
    room_id: &str,
    role: Role,
    content: &str,
) -> Result<Message, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO chat_messages (id, chat_room_id, role, content, created_at)
        SELECT ?, ?, ?, ?, MAX(?, COALESCE(MAX(created_at) + 1, 0))
        FROM chat_messages WHERE chat_room_id = ?
        RETURNING id, role, content, created_at
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(room_id)
    .bind(role)
    .bind(content)
    .bind(Millis::now())
    .bind(room_id)
    .fetch_one(db)
    .await
}

pub async fn list_messages(db: impl SqliteExecutor<'_>, room_id: &str) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, role, content, created_at FROM chat_messages WHERE chat_room_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(room_id)
    .fetch_all(db)
    .await
}

pub async fn find_room(db: impl SqliteExecutor<'_>, room_id: &str) -> Result<Option<Room>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, author_id, name, assistant_profile_id, llm_provider_id, llm_provider_model_id,
               created_at, last_activity_at
        FROM chat_rooms WHERE id = ?
        "#,
    )
    .bind(room_id)
    .fetch_optional(db)
    .await
}

pub async fn find_assistant_profile(
    db: impl SqliteExecutor<'_>,
    profile_id: &str,
) -> Result<Option<AssistantProfile>, sqlx::Error> {
    sqlx::query_as("SELECT id, name, description, system_prompt FROM assistant_profiles WHERE id = ?")
        .bind(profile_id)
        .fetch_optional(db)
        .await
}

pub async fn create_assistant_profile(
    db: impl SqliteExecutor<'_>,
    author_id: Option<&str>,
    name: &str,
    description: &str,
    system_prompt: &str,
    visibility: Visibility,
) -> Result<String, sqlx::Error> {
    let id = Uuid::now_v7().to_string();
    sqlx::query(
        "INSERT INTO assistant_profiles (id, author_id, name, description, system_prompt, visibility) VALUES (?,?,?,?,?,?)",
    )
    .bind(&id)
    .bind(author_id)
    .bind(name)
    .bind(description)
    .bind(system_prompt)
    .bind(visibility)
    .execute(db)
    .await?;
    Ok(id)
}

pub async fn create_room(
    db: impl SqliteExecutor<'_>,
    author_id: &str,
    name: &str,
    assistant_profile_id: &str,
    llm_provider_id: Option<&str>,
    llm_provider_model_id: Option<&str>,
) -> Result<Room, sqlx::Error> {
    let now = Millis::now();
    sqlx::query_as(
        r#"
        INSERT INTO chat_rooms
            (id, author_id, name, assistant_profile_id, llm_provider_id, llm_provider_model_id, created_at, last_activity_at)
        VALUES (?,?,?,?,?,?,?,?)
        RETURNING id, author_id, name, assistant_profile_id, llm_provider_id, llm_provider_model_id,
                  created_at, last_activity_at
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(author_id)
    .bind(name)
    .bind(assistant_profile_id)
    .bind(llm_provider_id)
    .bind(llm_provider_model_id)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await
}

pub async fn create_llm_provider(
    db: impl SqliteExecutor<'_>,
    author_id: &str,
    provider_id: &str,
    name: &str,
    api_key: &str,
    api_url: &str,
    sort_order: i64,
) -> Result<LlmProvider, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO llm_providers (id, author_id, provider_id, name, api_key, api_url, sort_order)
        VALUES (?,?,?,?,?,?,?)
        RETURNING id, provider_id, name, api_key, api_url, sort_order
        "#,
    )
    .bind(Uuid::now_v7().to_string())
    .bind(author_id)
    .bind(provider_id)
    .bind(name)
    .bind(api_key)
    .bind(api_url)
    .bind(sort_order)
    .fetch_one(db)
    .await
}

pub async fn list_auxiliary_records(
    db: impl SqliteExecutor<'_>,
    author_id: &str,
) -> Result<Vec<AuxiliaryRecord>, sqlx::Error> {
    sqlx::query_as("SELECT kind, data FROM auxiliary_records WHERE author_id = ? ORDER BY created_at ASC, id ASC")
        .bind(author_id)
        .fetch_all(db)
        .await
}

pub async fn insert_auxiliary_record(
    db: impl SqliteExecutor<'_>,
    author_id: &str,
    kind: &str,
    data: &serde_json::Value,
) -> Result<String, sqlx::Error> {
    let id = Uuid::now_v7().to_string();
    let now = Millis::now();
    sqlx::query("INSERT INTO auxiliary_records (id, author_id, kind, data, created_at, updated_at) VALUES (?,?,?,?,?,?)")
        .bind(&id)
        .bind(author_id)
        .bind(kind)
        .bind(data.to_string())
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;
    Ok(id)
}
