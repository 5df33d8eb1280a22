//! One-directional recursive copy between two trees.
//!
//! The source tree is walked exactly once, depth-first. A container is
//! resolved on the destination (reused or created) before any of its
//! children is visited, so every leaf has an existing destination parent
//! when it is transferred.
use std::cmp;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    config::PatternList,
    tree::{Destination, Source},
    Direction, Error, Result, TreeNode,
};

/// What to do when a leaf already exists on the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeafPolicy {
    /// Replace the content of the existing leaf
    #[default]
    Overwrite,
    /// Leave the existing leaf alone if it has the same size and
    /// modification time, replace it otherwise
    SkipUnchanged,
}

/// A node that could not be mirrored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    /// Path relative to the mirror root
    pub path: Utf8PathBuf,
    pub error: Error,
}

/// Event sent after each step of a mirror pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Progress {
    Container { path: Utf8PathBuf, created: bool },
    Leaf { path: Utf8PathBuf, bytes: u64 },
    Skipped { path: Utf8PathBuf },
    Failed(Failure),
}

/// Outcome of a mirror pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorResult {
    pub direction: Direction,
    pub containers_created: usize,
    pub containers_reused: usize,
    pub leaves_transferred: usize,
    pub leaves_skipped: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<Failure>,
}

impl MirrorResult {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            containers_created: 0,
            containers_reused: 0,
            leaves_transferred: 0,
            leaves_skipped: 0,
            bytes_transferred: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.failures.iter().map(|f| f.path.as_path())
    }
}

#[derive(Debug)]
struct Frame<S, D> {
    source: S,
    dest: D,
    path: Utf8PathBuf,
}

/// Mirrors a source tree into a destination tree.
#[derive(Debug)]
pub struct TreeMirror {
    direction: Direction,
    leaf_policy: LeafPolicy,
    ignore: PatternList,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl TreeMirror {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            leaf_policy: LeafPolicy::default(),
            ignore: PatternList::default(),
            progress: None,
        }
    }

    pub fn with_leaf_policy(mut self, leaf_policy: LeafPolicy) -> Self {
        self.leaf_policy = leaf_policy;
        self
    }

    /// Nodes whose path relative to the mirror root matches `ignore` are not mirrored.
    pub fn with_ignore(mut self, ignore: PatternList) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Copies the content of `source_root` into `dest_root`.
    ///
    /// Fails without touching the destination if `source_root` can't be listed.
    /// Other failures are recorded in the result and the traversal goes on,
    /// except authorization errors which abort the pass.
    pub async fn mirror<S, D>(
        &self,
        source: &S,
        dest: &D,
        source_root: &S::Handle,
        dest_root: &D::Handle,
    ) -> Result<MirrorResult>
    where
        S: Source,
        D: Destination,
    {
        log::info!("starting {} of {source_root:?} into {dest_root:?}", self.direction);

        let children = source
            .list(source_root)
            .await
            .map_err(|err| classify(err, |err| Error::list("", err)))?;

        let mut res = MirrorResult::new(self.direction);
        let mut stack = Vec::new();

        self.visit_children(
            source,
            dest,
            children,
            dest_root,
            Utf8Path::new(""),
            &mut stack,
            &mut res,
        )
        .await?;

        while let Some(frame) = stack.pop() {
            log::trace!("listing {}", frame.path);
            let children = match source.list(&frame.source).await {
                Ok(children) => children,
                Err(err) => {
                    let err = classify(err, |err| Error::list(&frame.path, err));
                    self.record(&mut res, frame.path, err)?;
                    continue;
                }
            };
            self.visit_children(
                source,
                dest,
                children,
                &frame.dest,
                &frame.path,
                &mut stack,
                &mut res,
            )
            .await?;
        }

        log::info!(
            "{} done: {} container(s) created, {} leaf(s) transferred, {} failure(s)",
            self.direction,
            res.containers_created,
            res.leaves_transferred,
            res.failures.len()
        );
        Ok(res)
    }

    #[allow(clippy::too_many_arguments)]
    async fn visit_children<S, D>(
        &self,
        source: &S,
        dest: &D,
        children: Vec<TreeNode<S::Handle>>,
        dest_parent: &D::Handle,
        parent_path: &Utf8Path,
        stack: &mut Vec<Frame<S::Handle, D::Handle>>,
        res: &mut MirrorResult,
    ) -> Result<()>
    where
        S: Source,
        D: Destination,
    {
        let mut frames = Vec::new();

        for child in children {
            let path = parent_path.join(child.name());
            if self.ignore.matches_with(&path) {
                log::debug!("ignoring {path}");
                continue;
            }

            if child.is_container() {
                let resolved = self
                    .resolve_container(dest, dest_parent, &child, &path, res)
                    .await;
                match resolved {
                    Ok(handle) => frames.push(Frame {
                        source: child.into_handle(),
                        dest: handle,
                        path,
                    }),
                    Err(err) => self.record(res, path, err)?,
                }
            } else {
                let transferred = self
                    .transfer_leaf(source, dest, &child, dest_parent, &path, res)
                    .await;
                if let Err(err) = transferred {
                    self.record(res, path, err)?;
                }
            }
        }

        // reversed so that containers pop in listing order
        stack.extend(frames.into_iter().rev());
        Ok(())
    }

    async fn resolve_container<H, D>(
        &self,
        dest: &D,
        parent: &D::Handle,
        node: &TreeNode<H>,
        path: &Utf8Path,
        res: &mut MirrorResult,
    ) -> Result<D::Handle>
    where
        D: Destination,
    {
        let wrap = |err| classify(err, |err| Error::create(path, err));

        match dest.find_child(parent, node.name()).await.map_err(wrap)? {
            Some(existing) if existing.is_container() => {
                log::debug!("reusing container {path}");
                res.containers_reused += 1;
                self.send(Progress::Container {
                    path: path.to_owned(),
                    created: false,
                });
                Ok(existing.into_handle())
            }
            Some(_) => Err(Error::create(path, "a leaf with the same name exists")),
            None => {
                let handle = dest
                    .create_container(parent, node.name())
                    .await
                    .map_err(wrap)?;
                log::info!("created container {path}");
                res.containers_created += 1;
                self.send(Progress::Container {
                    path: path.to_owned(),
                    created: true,
                });
                Ok(handle)
            }
        }
    }

    async fn transfer_leaf<S, D>(
        &self,
        source: &S,
        dest: &D,
        node: &TreeNode<S::Handle>,
        parent: &D::Handle,
        path: &Utf8Path,
        res: &mut MirrorResult,
    ) -> Result<()>
    where
        S: Source,
        D: Destination,
    {
        let wrap = |err| classify(err, |err| Error::transfer(path, err));

        let existing = dest.find_child(parent, node.name()).await.map_err(wrap)?;
        if let Some(existing) = &existing {
            if existing.is_container() {
                return Err(Error::transfer(
                    path,
                    "a container with the same name exists",
                ));
            }
            if self.leaf_policy == LeafPolicy::SkipUnchanged && is_unchanged(node, existing) {
                log::debug!("skipping unchanged {path}");
                res.leaves_skipped += 1;
                self.send(Progress::Skipped {
                    path: path.to_owned(),
                });
                return Ok(());
            }
        }

        let data = source.read_leaf(node).await.map_err(wrap)?;
        match &existing {
            Some(existing) => dest.replace_leaf(parent, existing, node, data).await,
            None => dest.create_leaf(parent, node, data).await,
        }
        .map_err(wrap)?;

        let bytes = node.size().unwrap_or(0);
        log::info!("transferred {path} ({bytes} bytes)");
        res.leaves_transferred += 1;
        res.bytes_transferred += bytes;
        self.send(Progress::Leaf {
            path: path.to_owned(),
            bytes,
        });
        Ok(())
    }

    /// Records a non-fatal failure, or returns the error if it is fatal.
    fn record(&self, res: &mut MirrorResult, path: Utf8PathBuf, error: Error) -> Result<()> {
        if error.is_auth() {
            log::error!("aborting {}: {error}", self.direction);
            return Err(error);
        }
        log::error!("{error}");
        let failure = Failure { path, error };
        self.send(Progress::Failed(failure.clone()));
        res.failures.push(failure);
        Ok(())
    }

    fn send(&self, progress: Progress) {
        if let Some(tx) = &self.progress {
            // the receiver may have gone away, this is not our concern
            let _ = tx.send(progress);
        }
    }
}

fn classify<F>(err: Error, f: F) -> Error
where
    F: FnOnce(Error) -> Error,
{
    if err.is_auth() {
        err
    } else {
        f(err)
    }
}

fn is_unchanged<S, D>(node: &TreeNode<S>, existing: &TreeNode<D>) -> bool {
    matches!((node.size(), existing.size()), (Some(a), Some(b)) if a == b)
        && crate::compare_mtime_opt(node.mtime(), existing.mtime()) == Some(cmp::Ordering::Equal)
}
