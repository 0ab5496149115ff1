use serde::Deserialize;

#[macro_export]
macro_rules! include_res {
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSeed {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Gets a room created for it when the user finishes onboarding.
    #[serde(default)]
    pub onboarding: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSeed {
    pub provider_id: String,
    pub name: String,
    #[serde(rename = "apiURL")]
    pub api_url: String,
    pub order: i64,
}

pub fn assistant_seeds() -> serde_json::Result<Vec<AssistantSeed>> {
    serde_json::from_str(include_res!(str, "/seed/assistant_profiles.json"))
}

pub fn provider_seeds() -> serde_json::Result<Vec<ProviderSeed>> {
    serde_json::from_str(include_res!(str, "/seed/llm_providers.json"))
}
