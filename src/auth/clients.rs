use std::{fmt, path::Path};

use anyhow::Context;
use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, Scope, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

/// Who the provider says the user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub name: Option<String>,
}

impl ClientProvider {
    /// Prefix of the user ids minted for this provider.
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }

    pub fn userinfo_url(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Google => "https://openidconnect.googleapis.com/v1/userinfo",
            Github => "https://api.github.com/user",
        }
    }

    pub fn scopes(&self) -> Vec<Scope> {
        use ClientProvider::*;
        let scopes: &[&str] = match self {
            Google => &["openid", "profile"],
            Github => &["read:user"],
        };
        scopes.iter().map(|s| Scope::new(s.to_string())).collect()
    }

    pub fn identity(&self, body: &Value) -> AppResult<Identity> {
        use ClientProvider::*;
        let non_empty = |field: &str| {
            body.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_owned)
        };
        match self {
            Google => Ok(Identity {
                subject: body.get_str_field("sub")?,
                name: non_empty("name"),
            }),
            Github => {
                // GitHub ids are numbers.
                let subject = match body.get_obj_field("id")? {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    other => return Err(format!("unexpected GitHub id {other}").into()),
                };
                Ok(Identity { subject, name: non_empty("name").or_else(|| non_empty("login")) })
            }
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Default)]
pub struct Clients {
    google_client: Option<HappyClient>,
    github_client: Option<HappyClient>,
}

impl Clients {
    /// Reads `{google?: {client_id, client_secret}, github?: {...}}` from `path`.
    pub fn load(path: Option<&Path>, public_url: &str) -> anyhow::Result<Clients> {
        let Some(path) = path else {
            tracing::warn!("OAUTH_SECRETS_PATH not set, login is disabled");
            return Ok(Clients::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read OAuth secrets {}", path.display()))?;
        let json: Value = serde_json::from_str(&text)
            .with_context(|| format!("invalid OAuth secrets {}", path.display()))?;
        Clients::from_json(&json, public_url)
    }

    pub fn from_json(json: &Value, public_url: &str) -> anyhow::Result<Clients> {
        let build = |provider: ClientProvider| -> anyhow::Result<Option<HappyClient>> {
            let Some(json) = json.get(provider.id()) else {
                return Ok(None);
            };
            let client_id = ClientId::new(json.get_str_field("client_id")?);
            let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);

            let (auth_url, token_url) = provider.endpoints();
            let redirect_url = RedirectUrl::new(format!("{public_url}/lockin/{}", provider.id()))?;

            Ok(Some(
                BasicClient::new(client_id)
                .set_client_secret(client_secret)
                .set_auth_uri(AuthUrl::new(auth_url.to_owned())?)
                .set_token_uri(TokenUrl::new(token_url.to_owned())?)
                .set_redirect_uri(redirect_url)
            ))
        };

        Ok(
            Clients {
                google_client: build(ClientProvider::Google)?,
                github_client: build(ClientProvider::Github)?,
            }
        )
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<HappyClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or(format!("OAuth provider {provider} keys not supplied").into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn only_configured_providers_get_clients() {
        let clients = Clients::from_json(
            &json!({"google": {"client_id": "id", "client_secret": "secret"}}),
            "http://localhost:8080",
        )
        .unwrap();
        assert!(clients.get_client(ClientProvider::Google).is_ok());
        assert!(clients.get_client(ClientProvider::Github).is_err());
    }

    #[test]
    fn incomplete_secrets_are_rejected() {
        let result = Clients::from_json(&json!({"github": {"client_id": "id"}}), "http://localhost:8080");
        assert!(result.is_err());
    }

    #[test]
    fn google_identity_uses_sub() {
        let identity = ClientProvider::Google
            .identity(&json!({"sub": "1234", "name": "Ada"}))
            .unwrap();
        assert_eq!(identity, Identity { subject: "1234".into(), name: Some("Ada".into()) });
    }

    #[test]
    fn github_identity_falls_back_to_login() {
        let identity = ClientProvider::Github
            .identity(&json!({"id": 42, "login": "ada", "name": null}))
            .unwrap();
        assert_eq!(identity, Identity { subject: "42".into(), name: Some("ada".into()) });
    }
}
