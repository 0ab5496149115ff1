use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    config::{Config, DEFAULT_GEMINI_API_URL},
    db::{self, Millis},
    res,
    rooms::{load_room_view, NEW_ROOM_NAME},
    AppError, AppResult, AppState,
};

pub const PERSONAL_INFO: &str = "PERSONAL_INFO";
pub const SYMPTOMS: &str = "SYMPTOMS";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfo {
    pub gender: String,
    pub birth_date: String,
    pub height: String,
    pub height_unit: String,
    pub weight: String,
    pub weight_unit: String,
    pub ethnicity: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub symptoms: String,
    pub personal_info: PersonalInfo,
}

impl PersonalInfo {
    fn to_record(&self) -> Value {
        json!({
            "name": "",
            "height": { "unit": self.height_unit, "value": self.height },
            "weight": { "unit": self.weight_unit, "value": self.weight },
            "birthDate": self.birth_date,
            "gender": self.gender,
            "ethnicity": self.ethnicity,
            "country": self.country,
        })
    }
}

/// Stores the onboarding answers as auxiliary records and opens one room per
/// onboarding assistant profile.
#[debug_handler(state = AppState)]
pub async fn submit(
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    user: AuthUser,
    Json(OnboardingRequest { symptoms, personal_info }): Json<OnboardingRequest>,
) -> AppResult<Json<Value>> {
    let mut tx = db_pool.begin().await?;

    let onboarded = sqlx::query("UPDATE users SET has_onboarded=1 WHERE id=?")
        .bind(&user.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if onboarded == 0 {
        return Err(AppError::NotFound("user"));
    }

    let personal_info = personal_info.to_record();
    let updated = sqlx::query("UPDATE auxiliary_records SET data=?, updated_at=? WHERE author_id=? AND kind=?")
        .bind(personal_info.to_string())
        .bind(Millis::now())
        .bind(&user.id)
        .bind(PERSONAL_INFO)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if updated == 0 {
        db::insert_auxiliary_record(&mut *tx, &user.id, PERSONAL_INFO, &personal_info).await?;
    }

    db::insert_auxiliary_record(&mut *tx, &user.id, SYMPTOMS, &json!({ "description": symptoms })).await?;

    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM llm_providers WHERE author_id=? AND provider_id='google' ORDER BY sort_order ASC LIMIT 1",
    )
        .bind(&user.id)
        .fetch_optional(&mut *tx)
        .await?;
    let llm_provider_id = match existing {
        Some((id,)) => id,
        None => db::create_llm_provider(
            &mut *tx,
            &user.id,
            "google",
            "Google",
            config.google_api_key.as_deref().unwrap_or_default(),
            DEFAULT_GEMINI_API_URL,
            1,
        )
        .await?
        .id,
    };

    let onboarding_names: Vec<String> = res::assistant_seeds()?
        .into_iter()
        .filter(|seed| seed.onboarding)
        .map(|seed| seed.name)
        .collect();
    let profiles: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT id, name FROM assistant_profiles
        WHERE (author_id=? AND visibility='PRIVATE') OR visibility='PUBLIC'
        ORDER BY name ASC
        "#,
    )
        .bind(&user.id)
        .fetch_all(&mut *tx)
        .await?;

    let mut chat_rooms = Vec::new();
    for (profile_id, _) in profiles.iter().filter(|(_, name)| onboarding_names.contains(name)) {
        let room = db::create_room(
            &mut *tx,
            &user.id,
            NEW_ROOM_NAME,
            profile_id,
            Some(&llm_provider_id),
            Some(&config.fallback_model),
        )
        .await?;
        if let Some(view) = load_room_view(&mut tx, &room.id).await? {
            chat_rooms.push(view);
        }
    }

    tx.commit().await?;

    tracing::info!(user_id = %user.id, rooms = chat_rooms.len(), "onboarding complete");
    Ok(Json(json!({ "chatRooms": chat_rooms })))
}
