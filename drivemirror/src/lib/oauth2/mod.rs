use std::sync::Arc;

use camino::Utf8PathBuf;
use futures::prelude::*;
use oauth2::{basic::BasicClient, HttpRequest, HttpResponse, TokenResponse};
pub use oauth2::{AccessToken, RefreshToken, Scope};
use tokio::sync::RwLock;

mod pkce;
mod server;
mod token_cache;

use self::token_cache::{CacheResult, TokenCache};
use crate::{error, PersistCache};

/// Scope to read and write the whole Drive of the user
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
/// Scope to read and write Cloud Storage buckets
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// All the scopes a session needs, requested at once so that the user
/// is only asked for consent one time.
pub fn session_scopes() -> Vec<Scope> {
    vec![
        Scope::new(DRIVE_SCOPE.to_string()),
        Scope::new(STORAGE_SCOPE.to_string()),
    ]
}

pub trait GetToken: Send + Sync + 'static {
    fn get_token(
        &self,
        scopes: Vec<Scope>,
    ) -> impl Future<Output = treemirror::Result<AccessToken>> + Send;
}

#[derive(Debug)]
struct Inner {
    cache: RwLock<TokenCache>,
    http: reqwest::Client,
    oauth2: BasicClient,
}

#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Builds a client authorizing the application of `secret`.
    /// Tokens are loaded from `token_cache` and saved there by [`PersistCache::persist_cache`].
    pub async fn new(
        secret: treemirror::oauth::Secret,
        token_cache: Utf8PathBuf,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let cache = RwLock::new(TokenCache::load(token_cache).await?);
        let oauth2 = BasicClient::new(
            secret.client_id,
            Some(secret.client_secret),
            secret.auth_url,
            Some(secret.token_url),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                http,
                oauth2,
            }),
        })
    }

    async fn refresh_token(
        &self,
        refresh_token: RefreshToken,
        scopes: Vec<Scope>,
    ) -> treemirror::Result<AccessToken> {
        log::debug!("refreshing access token");
        let token_response = self
            .inner
            .oauth2
            .exchange_refresh_token(&refresh_token)
            .add_scopes(scopes.clone())
            .request_async(|req| async move { self.http(req).await })
            .await
            .map_err(error::auth)?;

        let access = token_response.access_token().to_owned();

        let mut cache = self.inner.cache.write().await;
        cache.put(&token_response, &scopes, Some(refresh_token));

        Ok(access)
    }

    async fn http(&self, req: HttpRequest) -> reqwest::Result<HttpResponse> {
        let method = req.method.clone();
        let url = req.url.clone();

        let resp = self
            .inner
            .http
            .request(req.method, req.url)
            .headers(req.headers)
            .body(req.body)
            .send()
            .await?;

        let status_code = resp.status();
        let headers = resp.headers().to_owned();
        let body = resp.bytes().await?.to_vec();

        if !status_code.is_success() {
            log::error!(
                "{method} {url} received error {status_code}: {}",
                String::from_utf8_lossy(&body)
            );
        }

        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }
}

impl GetToken for Client {
    async fn get_token(&self, scopes: Vec<Scope>) -> treemirror::Result<AccessToken> {
        let cache = self.inner.cache.read().await.check(&scopes);
        match cache {
            CacheResult::Ok(access_token) => Ok(access_token),
            CacheResult::Expired(refresh_token, scopes) => {
                self.refresh_token(refresh_token, scopes).await
            }
            CacheResult::None => {
                let resp = self.fetch_token_pkce(scopes.clone()).await?;
                let mut cache = self.inner.cache.write().await;
                cache.put(&resp, &scopes, None);
                Ok(resp.access_token().clone())
            }
        }
    }
}

impl PersistCache for Client {
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.inner.cache.read().await.persist_cache().await?;
        Ok(())
    }
}
