//! Google Cloud Storage bucket, as a destination only.
//!
//! A bucket has no folders. Containers are name prefixes ending with `/`
//! and exist as soon as an object is stored under them.
use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::io;
use treemirror::{Result, TreeNode};

use super::rest::{check_response, num_from_str, num_to_str, url_with_query};
use crate::{
    error,
    oauth2::{AccessToken, GetToken, Scope, STORAGE_SCOPE},
    PersistCache,
};

/// Object name, or name prefix of a container, in a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// The container every object of a mirror pass is stored under.
    /// `prefix` may be given with or without surrounding slashes.
    pub fn root(prefix: Option<&str>) -> Key {
        let prefix = prefix.unwrap_or_default();
        let parts: Vec<&str> = prefix.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            Key::default()
        } else {
            Key(format!("{}/", parts.join("/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the key of a container
    pub fn is_prefix(&self) -> bool {
        self.0.is_empty() || self.0.ends_with('/')
    }

    pub fn child_container(&self, name: &str) -> Key {
        debug_assert!(self.is_prefix());
        Key(format!("{}{name}/", self.0))
    }

    pub fn child_object(&self, name: &str) -> Key {
        debug_assert!(self.is_prefix());
        Key(format!("{}{name}", self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Object names can't contain `/` in a single name component, nor line feeds.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\r') || name.contains('\n') {
        treemirror::api_bail!("Illegal object name component: {name:?}");
    }
    Ok(())
}

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Object {
    name: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "num_to_str",
        deserialize_with = "num_from_str"
    )]
    size: Option<i64>,
    /// Modification time of the mirrored file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_time: Option<DateTime<Utc>>,
}

#[derive(Default, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    items: Option<Vec<Object>>,
    prefixes: Option<Vec<String>>,
}

/// Cloud Storage bucket, through the JSON API
#[derive(Clone)]
pub struct Bucket<A> {
    client: reqwest::Client,
    auth: Arc<A>,
    name: String,
    base_url: &'static str,
    upload_base_url: &'static str,
    user_agent: String,
}

impl<A> Bucket<A>
where
    A: GetToken,
{
    pub fn new(auth: A, client: reqwest::Client, name: impl Into<String>) -> Self {
        let name = name.into();
        log::info!("Using bucket gs://{name}");
        Self {
            client,
            auth: Arc::new(auth),
            name,
            base_url: "https://storage.googleapis.com/storage/v1",
            upload_base_url: "https://storage.googleapis.com/upload/storage/v1",
            user_agent: format!("drivemirror/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let scope = Scope::new(STORAGE_SCOPE.to_string());
        self.auth.get_token(vec![scope]).await
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let token = self.fetch_token().await?;
        self.client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(error::api)
    }

    async fn object_get(&self, key: &Key) -> Result<Option<Object>> {
        let path = format!(
            "/b/{}/o/{}",
            self.name,
            urlencoding::encode(key.as_str())
        );
        let url = url_with_query(self.base_url, &path, &[("fields", "name,size,customTime")])?;
        let res = self.get(url).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = check_response("GET", &path, res).await?;
        Ok(Some(res.json().await.map_err(error::api)?))
    }

    async fn has_objects_under(&self, prefix: &Key) -> Result<bool> {
        let path = format!("/b/{}/o", self.name);
        let url = url_with_query(
            self.base_url,
            &path,
            &[
                ("prefix", prefix.as_str()),
                ("delimiter", "/"),
                ("maxResults", "1"),
                ("fields", "items(name),prefixes"),
            ],
        )?;
        let res = self.get(url).await?;
        let res = check_response("GET", &path, res).await?;
        let list: ObjectList = res.json().await.map_err(error::api)?;
        let has_items = list.items.is_some_and(|items| !items.is_empty());
        let has_prefixes = list.prefixes.is_some_and(|prefixes| !prefixes.is_empty());
        Ok(has_items || has_prefixes)
    }

    async fn upload(
        &self,
        key: &Key,
        mtime: Option<DateTime<Utc>>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()> {
        let path = format!("/b/{}/o", self.name);
        let url = url_with_query(
            self.upload_base_url,
            &path,
            &[("uploadType", "resumable"), ("name", key.as_str())],
        )?;
        let object = Object {
            name: key.as_str().to_string(),
            size: None,
            custom_time: mtime,
        };
        let token = self.fetch_token().await?;
        let res = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .header(header::USER_AGENT, &self.user_agent)
            .json(&object)
            .send()
            .await
            .map_err(error::api)?;
        let res = check_response("POST", &path, res).await?;
        let Some(location) = res.headers().get(header::LOCATION) else {
            treemirror::api_bail!("POST {path} returned no upload location");
        };
        let location = Url::parse(location.to_str().map_err(error::api)?).map_err(error::api)?;

        let res = super::upload::send_chunks(
            &self.client,
            self.auth.as_ref(),
            STORAGE_SCOPE,
            &self.user_agent,
            location,
            data,
        )
        .await?;
        let object: Object = res.json().await.map_err(error::api)?;
        log::trace!("uploaded {object:?}");
        Ok(())
    }
}

impl<A> treemirror::tree::Handles for Bucket<A> {
    type Handle = Key;
}

impl<A> treemirror::tree::FindChild for Bucket<A>
where
    A: GetToken,
{
    async fn find_child(&self, parent: &Key, name: &str) -> Result<Option<TreeNode<Key>>> {
        check_name(name)?;
        let key = parent.child_object(name);
        if let Some(object) = self.object_get(&key).await? {
            let size = object.size.and_then(|sz| u64::try_from(sz).ok());
            return Ok(Some(TreeNode::leaf(name, key, size, object.custom_time)));
        }
        let key = parent.child_container(name);
        if self.has_objects_under(&key).await? {
            return Ok(Some(TreeNode::container(name, key)));
        }
        Ok(None)
    }
}

impl<A> treemirror::tree::CreateContainer for Bucket<A>
where
    A: GetToken,
{
    async fn create_container(&self, parent: &Key, name: &str) -> Result<Key> {
        check_name(name)?;
        let key = parent.child_container(name);
        log::debug!("using prefix gs://{}/{}", self.name, key.as_str());
        Ok(key)
    }
}

impl<A> treemirror::tree::CreateLeaf for Bucket<A>
where
    A: GetToken,
{
    async fn create_leaf<H>(
        &self,
        parent: &Key,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        check_name(node.name())?;
        let key = parent.child_object(node.name());
        log::info!("uploading gs://{}/{}", self.name, key.as_str());
        self.upload(&key, node.mtime(), data).await
    }
}

impl<A> treemirror::tree::ReplaceLeaf for Bucket<A>
where
    A: GetToken,
{
    async fn replace_leaf<H>(
        &self,
        _parent: &Key,
        existing: &TreeNode<Key>,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        let key = existing.handle();
        log::info!("re-uploading gs://{}/{}", self.name, key.as_str());
        self.upload(key, node.mtime(), data).await
    }
}

impl<A> PersistCache for Bucket<A>
where
    A: PersistCache + Send + Sync,
{
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.auth.persist_cache().await
    }
}
