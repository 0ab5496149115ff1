use std::sync::Arc;

use axum::{debug_handler, extract::{Path, Query, State}, http::header::USER_AGENT, response::{IntoResponse, Redirect}};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{config::Config, session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, USER_ID}, AppError, AppResult, AppState};

use super::{clients::ClientProvider, ensure_user, local_path, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[debug_handler(state = AppState)]
pub async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or(AppError::BadRequest("OAuth: without state".into()))?);
    let code = AuthorizationCode::new(code.ok_or(AppError::BadRequest("OAuth: without code".into()))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(AppError::BadRequest("no csrf_state".into()));
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err(AppError::BadRequest("csrf tokens don't match".into()));
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(AppError::BadRequest("no pkce_verifier".into()));
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: serde_json::Value = http_client.get(provider.userinfo_url())
        .bearer_auth(access_token)
        .header(USER_AGENT, concat!("carechat/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let identity = provider.identity(&body)?;
    let user_id = format!("{}:{}", provider.id(), identity.subject);
    let created = ensure_user(&db_pool, &user_id, identity.name, config.google_api_key.as_deref()).await?;
    session.insert(USER_ID, user_id.clone()).await?;

    let return_url = session.remove::<String>(RETURN_URL).await?;

    tracing::info!("welcome {user_id}");

    let fallback = if created { "/onboarding" } else { "/" };
    let return_url = return_url.as_deref().and_then(local_path).unwrap_or(fallback);
    Ok(Redirect::to(return_url))
}
