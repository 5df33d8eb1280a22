use std::sync::Arc;

use async_stream::try_stream;
use futures::prelude::*;
use tokio::io;
use treemirror::{Result, TreeNode};

use crate::{
    error,
    oauth2::{GetToken, Scope, DRIVE_SCOPE},
    storage::id::FileId,
    PersistCache,
};

const FOLDER_MIMETYPE: &str = "application/vnd.google-apps.folder";

/// Escapes a literal for the `q` parameter of `files.list`.
pub fn escape_query(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[test]
fn test_escape_query() {
    assert_eq!(escape_query("app_data"), "app_data");
    assert_eq!(escape_query("Tom's notes"), r"Tom\'s notes");
    assert_eq!(escape_query(r"a\b"), r"a\\b");
}

/// The Drive of the authenticated user, through the v3 REST API
#[derive(Clone)]
pub struct GoogleDrive<A> {
    client: reqwest::Client,
    auth: Arc<A>,
    base_url: &'static str,
    upload_base_url: &'static str,
    user_agent: String,

    user: api::User,
    quota: api::Quota,
}

impl<A> GoogleDrive<A>
where
    A: GetToken,
{
    pub async fn new(auth: A, client: reqwest::Client) -> Result<Self> {
        let user_agent = format!("drivemirror/{}", env!("CARGO_PKG_VERSION"));
        let mut drive = Self {
            auth: Arc::new(auth),
            client,
            base_url: "https://www.googleapis.com/drive/v3",
            upload_base_url: "https://www.googleapis.com/upload/drive/v3",
            user_agent,
            user: api::User::default(),
            quota: api::Quota::default(),
        };

        let about = drive.about_get().await?;
        drive.user = about.user;
        drive.quota = about.storage_quota;

        log::info!(
            "Access granted to Drive of {}{}",
            drive.user.display_name,
            drive
                .user
                .email_address
                .as_ref()
                .map(|em| format!(" <{em}>"))
                .unwrap_or_default(),
        );
        if let (Some(usage), Some(limit)) = (drive.quota.usage, drive.quota.limit) {
            use byte_unit::{Byte, UnitType};
            if let (Some(usage), Some(limit)) = (Byte::from_i64(usage), Byte::from_i64(limit)) {
                let usage = usage.get_appropriate_unit(UnitType::Binary);
                let limit = limit.get_appropriate_unit(UnitType::Binary);
                log::info!("Usage {usage:#.2} / {limit:#.3}");
            }
        }

        Ok(drive)
    }

    /// Resolves the folder reached by following `names` from the top of "My Drive".
    /// Missing folders are created.
    pub async fn resolve_root(&self, names: &[&str]) -> Result<FileId> {
        use treemirror::tree::{CreateContainer, FindChild};

        let mut cur = FileId::root();
        for name in names {
            let next = match self.find_child(&cur, name).await? {
                Some(node) if node.is_container() => node.into_handle(),
                Some(_) => {
                    treemirror::api_bail!("'{name}' exists in Drive but is not a folder");
                }
                None => self.create_container(&cur, name).await?,
            };
            cur = next;
        }
        log::info!("Remote root is /{} ({cur})", names.join("/"));
        Ok(cur)
    }

    fn files_in(&self, q: String) -> impl Stream<Item = Result<api::File>> + Send + '_ {
        let mut next_page_token = None;

        try_stream! {
            loop {
                let file_list = self.files_list(q.clone(), next_page_token).await?;
                next_page_token = file_list.next_page_token;
                if let Some(files) = file_list.files {
                    for f in files {
                        yield f;
                    }
                }
                if next_page_token.is_none() {
                    break;
                }
            }
        }
    }

    async fn upload(
        &self,
        method: reqwest::Method,
        path: &str,
        file: &api::File,
        data: impl io::AsyncRead + Send,
    ) -> Result<()> {
        let url = self.upload_request(method, path, file).await?;
        let res = super::upload::send_chunks(
            &self.client,
            self.auth.as_ref(),
            DRIVE_SCOPE,
            &self.user_agent,
            url,
            data,
        )
        .await?;
        let file: api::File = res.json().await.map_err(error::api)?;
        log::trace!("uploaded {file:?}");
        Ok(())
    }
}

impl<A> treemirror::tree::Handles for GoogleDrive<A> {
    type Handle = FileId;
}

impl<A> treemirror::tree::ListChildren for GoogleDrive<A>
where
    A: GetToken,
{
    async fn list(&self, handle: &FileId) -> Result<Vec<TreeNode<FileId>>> {
        log::trace!("listing entries of folder {handle}");
        let q = format!("'{}' in parents and trashed = false", escape_query(handle.as_str()));
        self.files_in(q)
            .and_then(|f| future::ready(map_file(f)))
            .try_collect()
            .await
    }
}

impl<A> treemirror::tree::ReadLeaf for GoogleDrive<A>
where
    A: GetToken,
{
    async fn read_leaf(&self, node: &TreeNode<FileId>) -> Result<impl io::AsyncRead + Send> {
        log::trace!("reading file {} ({})", node.name(), node.handle());
        match self.files_get_media(node.handle()).await? {
            Some(read) => Ok(read),
            None => {
                treemirror::api_bail!("Could not find file {}", node.handle());
            }
        }
    }
}

impl<A> treemirror::tree::FindChild for GoogleDrive<A>
where
    A: GetToken,
{
    async fn find_child(&self, parent: &FileId, name: &str) -> Result<Option<TreeNode<FileId>>> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(parent.as_str())
        );
        // the name comparison of Drive is not case-sensitive
        let mut matches: Vec<_> = self
            .files_in(q)
            .try_filter(|f| future::ready(f.name.as_deref() == Some(name)))
            .and_then(|f| future::ready(map_file(f)))
            .try_collect()
            .await?;

        if matches.len() > 1 {
            log::warn!("{} entries named '{name}' in folder {parent}", matches.len());
        }
        let idx = matches.iter().position(|n| n.is_container()).unwrap_or(0);
        if matches.is_empty() {
            Ok(None)
        } else {
            Ok(Some(matches.swap_remove(idx)))
        }
    }
}

impl<A> treemirror::tree::CreateContainer for GoogleDrive<A>
where
    A: GetToken,
{
    async fn create_container(&self, parent: &FileId, name: &str) -> Result<FileId> {
        log::info!("creating folder {name} in folder {parent}");
        let f = api::File {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIMETYPE.to_string()),
            parents: Some(vec![parent.clone()]),
            ..Default::default()
        };
        let res = self.files_create(&f).await?;
        res.id
            .ok_or_else(|| treemirror::api_error!("No ID returned for folder {name}"))
    }
}

impl<A> treemirror::tree::CreateLeaf for GoogleDrive<A>
where
    A: GetToken,
{
    async fn create_leaf<H>(
        &self,
        parent: &FileId,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        log::info!(
            "creating file {} in folder {parent} ({} bytes)",
            node.name(),
            node.size().unwrap_or(0)
        );
        let file = api::File {
            name: Some(node.name().to_string()),
            modified_time: node.mtime(),
            parents: Some(vec![parent.clone()]),
            ..Default::default()
        };
        self.upload(reqwest::Method::POST, "/files", &file, data).await
    }
}

impl<A> treemirror::tree::ReplaceLeaf for GoogleDrive<A>
where
    A: GetToken,
{
    async fn replace_leaf<H>(
        &self,
        _parent: &FileId,
        existing: &TreeNode<FileId>,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        let id = existing.handle();
        log::info!(
            "updating file {} ({id}, {} bytes)",
            node.name(),
            node.size().unwrap_or(0)
        );
        // parents can't be set in an update
        let file = api::File {
            modified_time: node.mtime(),
            ..Default::default()
        };
        let path = format!("/files/{id}");
        self.upload(reqwest::Method::PATCH, &path, &file, data).await
    }
}

impl<A> PersistCache for GoogleDrive<A>
where
    A: PersistCache + Send + Sync,
{
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.auth.persist_cache().await
    }
}

fn map_file(f: api::File) -> Result<TreeNode<FileId>> {
    let Some(name) = f.name else {
        treemirror::api_bail!("Expected to receive name from Google for {:?}", f.id);
    };
    let Some(id) = f.id else {
        treemirror::api_bail!("Expected to receive id from Google for {name}");
    };
    if f.mime_type.as_deref() == Some(FOLDER_MIMETYPE) {
        return Ok(TreeNode::container(name, id));
    }
    // Google Docs and the like have no size and can't be downloaded as is
    let size = f.size.and_then(|sz| u64::try_from(sz).ok());
    Ok(TreeNode::leaf(name, id, size, f.modified_time))
}

#[test]
fn test_map_file() {
    let folder = api::File {
        id: Some(FileId::from("f1")),
        name: Some("docs".into()),
        mime_type: Some(FOLDER_MIMETYPE.into()),
        ..Default::default()
    };
    let folder = map_file(folder).unwrap();
    assert!(folder.is_container());
    assert_eq!(folder.handle().as_str(), "f1");

    let file: api::File = serde_json::from_str(
        r#"{"id":"f2","name":"a.txt","size":"12","modifiedTime":"2024-03-01T10:00:00.123Z","mimeType":"text/plain"}"#,
    )
    .unwrap();
    let file = map_file(file).unwrap();
    assert!(file.is_leaf());
    assert_eq!(file.name(), "a.txt");
    assert_eq!(file.size(), Some(12));
    assert!(file.mtime().is_some());

    let nameless = api::File {
        id: Some(FileId::from("f3")),
        ..Default::default()
    };
    map_file(nameless).expect_err("a file needs a name");
}

mod api {
    use chrono::{DateTime, Utc};
    use http::StatusCode;
    use reqwest::{header, Url};
    use serde::{Deserialize, Serialize};
    use tokio::io;

    use super::super::rest::{check_response, num_from_str, num_to_str, url_with_query};
    use super::FileId;
    use crate::{
        error,
        oauth2::{AccessToken, GetToken},
    };

    #[derive(Default, Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct User {
        pub display_name: String,
        pub email_address: Option<String>,
    }

    #[derive(Default, Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Quota {
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            serialize_with = "num_to_str",
            deserialize_with = "num_from_str"
        )]
        pub limit: Option<i64>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            serialize_with = "num_to_str",
            deserialize_with = "num_from_str"
        )]
        pub usage: Option<i64>,
    }

    const ABOUT_FIELDS: &str = "kind,storageQuota,user";

    #[derive(Default, Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct About {
        kind: String,
        pub storage_quota: Quota,
        pub user: User,
    }

    const FILE_FIELDS: &str = "id,name,size,modifiedTime,mimeType";

    #[derive(Default, Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct File {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<FileId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub modified_time: Option<DateTime<Utc>>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            serialize_with = "num_to_str",
            deserialize_with = "num_from_str"
        )]
        pub size: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parents: Option<Vec<FileId>>,
    }

    #[derive(Default, Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileList {
        pub files: Option<Vec<File>>,
        pub next_page_token: Option<String>,
    }

    impl<A> super::GoogleDrive<A>
    where
        A: GetToken,
    {
        async fn fetch_token(&self) -> treemirror::Result<AccessToken> {
            let scope = super::Scope::new(super::DRIVE_SCOPE.to_string());
            self.auth.get_token(vec![scope]).await
        }

        pub async fn about_get(&self) -> treemirror::Result<About> {
            let path = "/about";
            let url = url_with_query(self.base_url, path, &[("fields", ABOUT_FIELDS)])?;

            let res = self.get(url).await?;
            let res = check_response("GET", path, res).await?;
            let about: About = res.json().await.map_err(error::api)?;
            if about.kind != "drive#about" {
                treemirror::api_bail!("/about returned wrong kind!");
            }
            Ok(about)
        }

        pub async fn files_list(
            &self,
            q: String,
            page_token: Option<String>,
        ) -> treemirror::Result<FileList> {
            let path = "/files";

            let mut query_params = vec![
                ("q", q),
                ("fields", format!("nextPageToken,files({FILE_FIELDS})")),
                ("pageSize", "1000".into()),
                ("alt", "json".into()),
            ];
            if let Some(page_token) = page_token {
                query_params.push(("pageToken", page_token));
            }
            let url = url_with_query(self.base_url, path, query_params)?;

            let res = self.get(url).await?;
            let res = check_response("GET", path, res).await?;
            res.json().await.map_err(error::api)
        }

        pub async fn files_get_media(
            &self,
            file_id: &FileId,
        ) -> treemirror::Result<Option<impl io::AsyncRead + Send>> {
            use futures::stream::{StreamExt, TryStreamExt};

            let path = format!("/files/{file_id}");
            let url = url_with_query(self.base_url, &path, &[("alt", "media")])?;

            let res = self.get(url).await?;
            if res.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let res = check_response("GET", &path, res).await?;

            let bytes = res
                .bytes_stream()
                .map(|res| res.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)));
            let read = bytes.into_async_read();

            Ok(Some(tokio_util::compat::FuturesAsyncReadCompatExt::compat(
                read,
            )))
        }

        pub async fn files_create(&self, file: &File) -> treemirror::Result<File> {
            let path = "/files";
            let url = url_with_query(self.base_url, path, &[("fields", FILE_FIELDS)])?;
            let token = self.fetch_token().await?;
            let res = self
                .client
                .post(url)
                .bearer_auth(token.secret())
                .header(header::USER_AGENT, &self.user_agent)
                .json(file)
                .send()
                .await
                .map_err(error::api)?;
            let res = check_response("POST", path, res).await?;
            res.json().await.map_err(error::api)
        }

        /// Starts a resumable upload session and returns its URI.
        pub async fn upload_request(
            &self,
            method: reqwest::Method,
            path: &str,
            file: &File,
        ) -> treemirror::Result<Url> {
            let url = url_with_query(
                self.upload_base_url,
                path,
                &[("uploadType", "resumable"), ("fields", FILE_FIELDS)],
            )?;
            let token = self.fetch_token().await?;
            let res = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token.secret())
                .header(header::USER_AGENT, &self.user_agent)
                .json(file)
                .send()
                .await
                .map_err(error::api)?;
            let res = check_response(method.as_str(), path, res).await?;

            let Some(location) = res.headers().get(header::LOCATION) else {
                treemirror::api_bail!("{method} {path} returned no upload location");
            };
            let location = location.to_str().map_err(error::api)?;
            Url::parse(location).map_err(error::api)
        }

        async fn get(&self, url: Url) -> treemirror::Result<reqwest::Response> {
            let token = self.fetch_token().await?;
            self.client
                .get(url)
                .header(header::USER_AGENT, &self.user_agent)
                .bearer_auth(token.secret())
                .send()
                .await
                .map_err(error::api)
        }
    }
}
