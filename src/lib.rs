pub mod appresult;
pub mod assistants;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod llm;
pub mod onboarding;
pub mod providers;
pub mod res;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};

use config::Config;
use llm::CompletionProvider;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub clients: auth::Clients,
    pub config: Arc<Config>,
    pub provider: Arc<dyn CompletionProvider>,
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(format!("expected {field} in {self}").into())
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = match origin.parse::<HeaderValue>() {
        Ok(origin) => origin,
        Err(e) => {
            tracing::warn!("ignoring CORS_ALLOW_ORIGIN {origin:?}: {e}");
            return None;
        }
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([CONTENT_TYPE]),
    )
}

/// Builds the full HTTP surface over `state`.
pub fn app(state: AppState) -> Router {
    app_with_store(state, MemoryStore::default())
}

pub fn app_with_store(state: AppState, session_store: MemoryStore) -> Router {
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(state.config.session_idle_minutes)));

    let api = Router::new()
        .route("/me", get(auth::me))
        .route("/assistant-modes", get(assistants::list))
        .route("/onboarding", post(onboarding::submit))
        .nest("/chat-rooms", rooms::router())
        .nest("/llm-providers", providers::router());

    let cors = state.config.cors_allow_origin.as_deref().and_then(cors_layer);

    let app = Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .nest("/api", api)
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_str_field_rejects_non_strings() {
        let body = json!({ "sub": "123", "id": 42 });
        assert_eq!(body.get_str_field("sub").unwrap(), "123");
        assert!(body.get_str_field("id").is_err());
        assert!(body.get_obj_field("missing").is_err());
    }

    #[test]
    fn bad_cors_origin_is_skipped() {
        assert!(cors_layer("http://localhost:3000").is_some());
        assert!(cors_layer("bad\norigin").is_none());
    }
}
