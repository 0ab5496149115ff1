use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context};

pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.5-pro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnv {
    #[default]
    Local,
    Cloud,
}

impl FromStr for DeploymentEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(DeploymentEnv::Local),
            "cloud" => Ok(DeploymentEnv::Cloud),
            other => bail!("unknown DEPLOYMENT_ENV {other:?}, expected local or cloud"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Externally reachable base URL, used for OAuth redirect URIs.
    pub public_url: String,
    pub google_api_key: Option<String>,
    pub gemini_api_url: String,
    /// Model assigned to rooms that have none on their first turn.
    pub fallback_model: String,
    pub deployment_env: DeploymentEnv,
    pub oauth_secrets_path: Option<PathBuf>,
    pub session_idle_minutes: i64,
    pub cors_allow_origin: Option<String>,
}

impl Config {
    /// Reads the configuration from the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let session_idle_minutes = match var("SESSION_IDLE_MINUTES") {
            Some(minutes) => minutes
                .parse()
                .with_context(|| format!("SESSION_IDLE_MINUTES is not a number: {minutes}"))?,
            None => 60,
        };
        let deployment_env = var("DEPLOYMENT_ENV")
            .map(|env| env.parse::<DeploymentEnv>())
            .transpose()?
            .unwrap_or_default();

        Ok(Config {
            database_url,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            public_url: var("PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_owned())
                .trim_end_matches('/')
                .to_owned(),
            google_api_key: var("GOOGLE_API_KEY"),
            gemini_api_url: var("GEMINI_API_URL").unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_owned()),
            fallback_model: var("FALLBACK_MODEL").unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_owned()),
            deployment_env,
            oauth_secrets_path: var("OAUTH_SECRETS_PATH").map(PathBuf::from),
            session_idle_minutes,
            cors_allow_origin: var("CORS_ALLOW_ORIGIN"),
        })
    }

    /// Default configuration around a database URL, ignoring the environment.
    pub fn for_database(database_url: impl Into<String>) -> anyhow::Result<Config> {
        let database_url = database_url.into();
        Config::from_lookup(|key| (key == "DATABASE_URL").then(|| database_url.clone()))
    }
}
