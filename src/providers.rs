use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, response::{IntoResponse, Response}, routing::get, Json, Router};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    config::{Config, DeploymentEnv},
    db::LlmProvider,
    llm::CompletionProvider,
    AppError, AppResult, AppState,
};

/// Only model offered in the cloud deployment.
const CLOUD_MODEL_NAME: &str = "Gemini 2.0 Flash";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_providers))
        .route("/{id}/models", get(list_models))
}

fn visible_in(env: DeploymentEnv, provider: &LlmProvider) -> bool {
    env != DeploymentEnv::Cloud || provider.provider_id != "ollama"
}

#[debug_handler(state = AppState)]
pub async fn list_providers(
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    user: AuthUser,
) -> AppResult<Response> {
    let llm_providers: Vec<LlmProvider> = sqlx::query_as(
        "SELECT id, provider_id, name, api_key, api_url, sort_order FROM llm_providers WHERE author_id=? ORDER BY sort_order ASC",
    )
    .bind(&user.id)
    .fetch_all(&db_pool)
    .await?;

    let llm_providers: Vec<LlmProvider> = llm_providers
        .into_iter()
        .filter(|provider| visible_in(config.deployment_env, provider))
        .collect();

    Ok(Json(json!({ "llmProviders": llm_providers })).into_response())
}

#[debug_handler(state = AppState)]
pub async fn list_models(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    State(provider): State<Arc<dyn CompletionProvider>>,
) -> AppResult<Response> {
    let Some((api_key,)): Option<(String,)> = sqlx::query_as("SELECT api_key FROM llm_providers WHERE id=?")
        .bind(&id)
        .fetch_optional(&db_pool)
        .await?
    else {
        return Err(AppError::NotFound("llm provider"));
    };

    let api_key = match config.deployment_env {
        DeploymentEnv::Cloud => config.google_api_key.clone().unwrap_or_default(),
        DeploymentEnv::Local => api_key,
    };
    if api_key.is_empty() {
        return Err(AppError::BadRequest("API key not set for this provider".into()));
    }

    let models = match provider.list_models(&api_key).await {
        Ok(models) => models,
        Err(e) => {
            tracing::error!(provider_id = %id, "failed to fetch models: {e}");
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "llmProviderModels": [] })),
            )
                .into_response());
        }
    };

    let llm_provider_models: Vec<_> = models
        .into_iter()
        .filter(|model| config.deployment_env != DeploymentEnv::Cloud || model.name == CLOUD_MODEL_NAME)
        .collect();

    Ok(Json(json!({ "llmProviderModels": llm_provider_models })).into_response())
}
