use axum::{routing::get, Router};
use rand::seq::IndexedRandom;
use sqlx::SqlitePool;

use crate::{db::{self, Millis, Visibility}, res, AppResult, AppState};

mod clients;
mod login;
mod lockin;
mod logout;
mod user;

pub use clients::{ClientProvider, Clients, Identity};
pub use login::login;
pub use lockin::lockin;
pub use logout::logout;
pub use user::{me, AuthUser};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/{provider}", get(login))
        .route("/lockin/{provider}", get(lockin))
        .route("/logout", get(logout))
}

/// Keeps `return_url` only when it is a path on this site.
pub(crate) fn local_path(return_url: &str) -> Option<&str> {
    let same_origin = return_url.starts_with('/')
        && !return_url.starts_with("//")
        && !return_url.contains('\\')
        && !return_url.chars().any(char::is_control);
    same_origin.then_some(return_url)
}

fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
        ];

    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    format!(
        "{} {}",
        adjectives.choose(&mut rng).copied().unwrap_or("Calm"),
        nouns.choose(&mut rng).copied().unwrap_or("Owl"),
    )
}

/// Creates the user on first sight, with private copies of the bundled assistant
/// profiles and providers. Returns whether the user was created.
pub async fn ensure_user(
    db_pool: &SqlitePool,
    user_id: &str,
    name: Option<String>,
    google_api_key: Option<&str>,
) -> AppResult<bool> {
    if sqlx::query("SELECT 1 FROM users WHERE id=?")
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let alias = name.unwrap_or_else(random_alias);
    let mut tx = db_pool.begin().await?;

    sqlx::query("INSERT INTO users (id,alias,has_onboarded,created_at) VALUES (?,?,0,?)")
        .bind(user_id)
        .bind(&alias)
        .bind(Millis::now())
        .execute(&mut *tx)
        .await?;

    for seed in res::assistant_seeds()? {
        db::create_assistant_profile(
            &mut *tx,
            Some(user_id),
            &seed.name,
            &seed.description,
            &seed.system_prompt,
            Visibility::Private,
        )
        .await?;
    }

    for seed in res::provider_seeds()? {
        let api_key = match seed.provider_id.as_str() {
            "google" => google_api_key.unwrap_or_default(),
            _ => "",
        };
        db::create_llm_provider(&mut *tx, user_id, &seed.provider_id, &seed.name, api_key, &seed.api_url, seed.order)
            .await?;
    }

    tx.commit().await?;

    tracing::info!("adding {user_id}, {alias}");
    Ok(true)
}
