use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use oauth2::{AccessToken, RefreshToken, Scope, TokenResponse, TokenType};
use serde::{Deserialize, Serialize};

use crate::PersistCache;

/// Margin against a token expiring between the cache check and the request
const EXPIRATION_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEntry {
    scopes: Vec<Scope>,
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum CacheResult {
    None,
    Expired(RefreshToken, Vec<Scope>),
    Ok(AccessToken),
}

#[derive(Debug, Default)]
pub struct TokenStore {
    entries: Vec<TokenEntry>,
}

impl TokenStore {
    /// Attempts to read the cache from disk
    /// Returns `Ok(None)` if the path doesn't exist.
    /// Returns `Ok(Some)` if succesfully reads entries.
    /// Returns `Err` if the deserialization failed.
    async fn try_read_from_disk(path: &Utf8Path) -> anyhow::Result<Option<Self>> {
        let Ok(json) = tokio::fs::read_to_string(path).await else {
            return Ok(None);
        };
        log::info!("reading cached tokens from {path}");
        let entries = serde_json::from_str(&json)?;
        Ok(Some(TokenStore { entries }))
    }

    async fn write_to_disk(&self, path: &Utf8Path) -> anyhow::Result<()> {
        log::info!("caching tokens to {path}");
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Inserts a token response.
    ///
    /// `requested` is used when the response doesn't tell which scopes were granted.
    /// `prev_refresh` is kept when the response comes from a refresh that didn't
    /// issue a new refresh token.
    pub fn insert<T, TT>(&mut self, tok: &T, requested: &[Scope], prev_refresh: Option<RefreshToken>)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        let mut scopes = tok
            .scopes()
            .cloned()
            .unwrap_or_else(|| requested.to_vec());
        scopes.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        scopes.dedup_by(|a, b| a.as_str() == b.as_str());
        log::trace!(target: "drivemirror::oauth2::TokenStore", "inserting token for scopes {scopes:?}");

        let expiration = tok.expires_in().map(|exp| Utc::now() + exp);
        let entry = TokenEntry {
            scopes,
            access_token: tok.access_token().clone(),
            refresh_token: tok.refresh_token().cloned().or(prev_refresh),
            expiration,
        };
        self.emplace_entry(entry);
    }

    fn emplace_entry(&mut self, token: TokenEntry) {
        let same_scopes = |ent: &TokenEntry| {
            ent.scopes.len() == token.scopes.len()
                && ent
                    .scopes
                    .iter()
                    .zip(token.scopes.iter())
                    .all(|(a, b)| a.as_str() == b.as_str())
        };
        if let Some(ent) = self.entries.iter_mut().find(|ent| same_scopes(ent)) {
            *ent = token;
        } else {
            self.entries.push(token);
        }
    }

    /// Looks for a token granting all of `scopes`.
    /// A valid token is preferred over one that needs a refresh.
    /// Tokens expiring within `EXPIRATION_MARGIN_SECS` are treated as expired.
    pub fn get(&self, scopes: &[Scope]) -> CacheResult {
        let deadline = Utc::now() + Duration::seconds(EXPIRATION_MARGIN_SECS);
        let mut refreshable = None;
        for ent in self.entries.iter() {
            if !scopes.iter().all(|s| ent.scopes.contains(s)) {
                continue;
            }
            match (ent.expiration, &ent.refresh_token) {
                (Some(expiration), Some(refresh)) if expiration <= deadline => {
                    refreshable.get_or_insert_with(|| (refresh.clone(), ent.scopes.clone()));
                }
                (Some(expiration), None) if expiration <= deadline => {}
                _ => return CacheResult::Ok(ent.access_token.clone()),
            }
        }
        match refreshable {
            Some((refresh, scopes)) => CacheResult::Expired(refresh, scopes),
            None => CacheResult::None,
        }
    }
}

/// Tokens of the previous runs, saved to disk when the program exits
#[derive(Debug)]
pub struct TokenCache {
    path: Utf8PathBuf,
    store: TokenStore,
}

impl TokenCache {
    pub async fn load(path: Utf8PathBuf) -> anyhow::Result<Self> {
        let store = TokenStore::try_read_from_disk(&path)
            .await?
            .unwrap_or_default();
        Ok(TokenCache { path, store })
    }

    pub fn put<T, TT>(&mut self, tok: &T, requested: &[Scope], prev_refresh: Option<RefreshToken>)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        log::trace!(
            "Put token for scopes {:?}, expires in {:?}",
            tok.scopes(),
            tok.expires_in()
        );
        self.store.insert(tok, requested, prev_refresh);
    }

    pub fn check(&self, scopes: &[Scope]) -> CacheResult {
        let res = self.store.get(scopes);

        if log::max_level() >= log::LevelFilter::Trace {
            let res = match &res {
                CacheResult::None => "None",
                CacheResult::Expired(..) => "Expired",
                CacheResult::Ok(..) => "Ok",
            };
            let scopes: Vec<&str> = scopes.iter().map(|s| s.as_str()).collect();
            log::trace!("check token for scopes {}: {res}", scopes.join(", "));
        }

        res
    }
}

impl PersistCache for TokenCache {
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.store.write_to_disk(&self.path).await
    }
}
