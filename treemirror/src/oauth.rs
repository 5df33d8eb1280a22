use camino::Utf8Path;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenUrl};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Credentials of the Google application used to authorize the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
}

/// Loads a `client_secret.json` file as downloaded from the Google Cloud console.
pub async fn load_google_secret(path: &Utf8Path) -> crate::Result<Secret> {
    let json = fs::read(path).await.map_err(|err| {
        crate::Error::Config(format!("Can't read client secret {path}: {err}"))
    })?;
    parse_google_secret(&json)
}

pub fn parse_google_secret(json: &[u8]) -> crate::Result<Secret> {
    let goog: GoogleAppSecret = serde_json::from_slice(json)
        .map_err(|err| crate::Error::Config(format!("Invalid client secret: {err}")))?;
    match goog {
        GoogleAppSecret::Installed(secret) => Ok(Secret {
            client_id: ClientId::new(secret.client_id),
            client_secret: ClientSecret::new(secret.client_secret),
            auth_url: AuthUrl::new(secret.auth_uri)
                .map_err(|err| crate::Error::Config(format!("Invalid auth_uri: {err}")))?,
            token_url: TokenUrl::new(secret.token_uri)
                .map_err(|err| crate::Error::Config(format!("Invalid token_uri: {err}")))?,
        }),
        GoogleAppSecret::Web(_) => Err(crate::Error::Config(
            "Wrong kind of secret file. Please get a secret file with an \"installed\" field"
                .to_string(),
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GoogleSecret {
    client_id: String,
    client_secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    redirect_uris: Vec<String>,
    auth_uri: String,
    token_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_provider_x509_cert_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GoogleAppSecret {
    Installed(GoogleSecret),
    Web(GoogleSecret),
}

#[test]
fn test_parse_installed_secret() -> anyhow::Result<()> {
    const JSON: &str = r#"{
  "installed": {
    "client_id": "client id",
    "project_id": "some-project",
    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
    "token_uri": "https://oauth2.googleapis.com/token",
    "auth_provider_x509_cert_url": "https://www.googleapis.com/oauth2/v1/certs",
    "client_secret": "client secret",
    "redirect_uris": ["http://localhost"]
  }
}"#;
    let secret = parse_google_secret(JSON.as_bytes())?;
    assert_eq!(secret.client_id.as_str(), "client id");
    assert_eq!(secret.client_secret.secret(), "client secret");
    assert_eq!(
        secret.token_url.as_str(),
        "https://oauth2.googleapis.com/token"
    );
    Ok(())
}

#[test]
fn test_reject_web_secret() {
    const JSON: &str = r#"{
  "web": {
    "client_id": "client id",
    "client_secret": "client secret",
    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
    "token_uri": "https://oauth2.googleapis.com/token"
  }
}"#;
    let err = parse_google_secret(JSON.as_bytes()).unwrap_err();
    assert!(matches!(err, crate::Error::Config(..)));
}
