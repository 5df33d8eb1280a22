//! The state shared by the `start` and `end` steps.
//!
//! A session is opened once authorization succeeded and the remote root
//! is known. Every mirror pass of the session runs against the same trees.
use std::sync::Arc;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use treemirror::{
    config::PatternList, Config, Direction, LeafPolicy, MirrorResult, Progress, TreeMirror,
};

use crate::{
    oauth2::{self, GetToken},
    storage::{
        bucket::{Bucket, Key},
        fs::FileSystem,
        gdrive::GoogleDrive,
        id::FileId,
    },
    PersistCache,
};

/// Outcome of the passes run for one direction
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub direction: Direction,
    /// Between the staging directory and Drive
    pub drive: MirrorResult,
    /// From the staging directory to the bucket, pushes only
    pub bucket: Option<MirrorResult>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.drive.is_success() && self.bucket.as_ref().map_or(true, MirrorResult::is_success)
    }
}

pub struct Session<A> {
    auth: A,
    local: FileSystem,
    staging: Utf8PathBuf,
    remote: GoogleDrive<A>,
    remote_root: FileId,
    bucket: Option<(Bucket<A>, Key)>,
    leaf_policy: LeafPolicy,
    ignore: PatternList,
}

impl Session<oauth2::Client> {
    /// Authorizes the user and opens the session described by `config`.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        log::info!("Loading client secret from {}", config.client_secret);
        let secret = treemirror::oauth::load_google_secret(&config.client_secret).await?;
        log::info!(
            "Initializing Google Drive storage with client-id {}",
            secret.client_id.as_str()
        );

        let http = reqwest::Client::builder().build()?;
        let token_cache = treemirror::loc::token_cache_file()?;
        let auth = oauth2::Client::new(secret, token_cache, http.clone()).await?;
        Self::with_auth(config, auth, http).await
    }
}

impl<A> Session<A>
where
    A: GetToken + PersistCache + Clone,
{
    pub async fn with_auth(config: &Config, auth: A, http: reqwest::Client) -> anyhow::Result<Self> {
        let root_names = config.remote_root_components()?;
        let ignore = config.ignore_patterns()?;

        // all scopes are granted at once, before anything is touched
        auth.get_token(oauth2::session_scopes())
            .await
            .context("Authorization failed")?;

        log::trace!("mkdir -p {}", config.staging_dir);
        tokio::fs::create_dir_all(&config.staging_dir)
            .await
            .with_context(|| format!("Can't create staging directory {}", config.staging_dir))?;
        let local = FileSystem::new(&config.staging_dir)?;
        let staging = local.root().to_owned();

        let remote = GoogleDrive::new(auth.clone(), http.clone()).await?;
        let remote_root = remote.resolve_root(&root_names).await?;

        let bucket = config.bucket.as_ref().map(|b| {
            let bucket = Bucket::new(auth.clone(), http.clone(), &b.name);
            (bucket, Key::root(b.prefix.as_deref()))
        });

        Ok(Session {
            auth,
            local,
            staging,
            remote,
            remote_root,
            bucket,
            leaf_policy: config.leaf_policy,
            ignore,
        })
    }

    pub fn staging_dir(&self) -> &Utf8Path {
        &self.staging
    }

    fn tree_mirror(
        &self,
        direction: Direction,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> TreeMirror {
        let tm = TreeMirror::new(direction)
            .with_leaf_policy(self.leaf_policy)
            .with_ignore(self.ignore.clone());
        match progress {
            Some(tx) => tm.with_progress(tx),
            None => tm,
        }
    }

    /// Mirrors the remote root into the staging directory.
    pub async fn pull(
        &self,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> treemirror::Result<SessionReport> {
        let drive = self
            .tree_mirror(Direction::Pull, progress)
            .mirror(&self.remote, &self.local, &self.remote_root, &self.staging)
            .await?;
        Ok(SessionReport {
            direction: Direction::Pull,
            drive,
            bucket: None,
        })
    }

    /// Mirrors the staging directory into the bucket, if any, then into the remote root.
    pub async fn push(
        &self,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> treemirror::Result<SessionReport> {
        let bucket = match &self.bucket {
            Some((bucket, root)) => {
                log::info!("mirroring {} into gs://{}{root}", self.staging, bucket.name());
                let res = self
                    .tree_mirror(Direction::Push, progress.clone())
                    .mirror(&self.local, bucket, &self.staging, root)
                    .await?;
                Some(res)
            }
            None => None,
        };
        let drive = self
            .tree_mirror(Direction::Push, progress)
            .mirror(&self.local, &self.remote, &self.staging, &self.remote_root)
            .await?;
        Ok(SessionReport {
            direction: Direction::Push,
            drive,
            bucket,
        })
    }

    pub async fn mirror(
        &self,
        direction: Direction,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> treemirror::Result<SessionReport> {
        match direction {
            Direction::Pull => self.pull(progress).await,
            Direction::Push => self.push(progress).await,
        }
    }

    /// Saves the tokens for the next run.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.auth.persist_cache().await
    }
}

/// Runs a mirror pass in the background.
///
/// Progress events are received on the returned channel, which closes when the pass is over.
pub fn spawn_mirror<A>(
    session: Arc<Session<A>>,
    direction: Direction,
) -> (
    JoinHandle<treemirror::Result<SessionReport>>,
    mpsc::UnboundedReceiver<Progress>,
)
where
    A: GetToken + PersistCache + Clone,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move { session.mirror(direction, Some(tx)).await });
    (handle, rx)
}
