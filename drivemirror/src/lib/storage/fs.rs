use camino::{Utf8Path, Utf8PathBuf};
use tokio::{
    fs::{self, DirEntry},
    io,
};
use treemirror::{TreeNode, Result};

/// Rejects names that would escape `parent` or address something else than a direct child.
/// Drive allows any character in a file name, including `/`.
fn check_name(name: &str) -> Result<()> {
    let illegal = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
        || (cfg!(windows) && name.contains('\\'));
    if illegal {
        treemirror::io_bail!("Illegal file name for the local file system: {name:?}");
    }
    Ok(())
}

#[test]
fn test_check_name() {
    check_name("report.pdf").unwrap();
    check_name(".hidden").unwrap();
    check_name("with space").unwrap();
    check_name("").expect_err("");
    check_name("..").expect_err("");
    check_name("a/b").expect_err("");
    check_name("nul\0").expect_err("");
}

/// Local directory tree. Handles are absolute paths.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root: Utf8PathBuf,
}

impl FileSystem {
    /// Build a new filesystem tree.
    /// `root` must be an existing directory.
    pub fn new<P>(root: P) -> anyhow::Result<Self>
    where
        P: AsRef<Utf8Path>,
    {
        let root = root.as_ref().canonicalize_utf8()?;
        if !root.is_dir() {
            anyhow::bail!("{root} is not a directory");
        }
        log::info!("Initializing FS tree in {root}");

        Ok(FileSystem { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    async fn do_write<H>(
        &self,
        mut f: fs::File,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()> {
        tokio::pin!(data);

        io::copy(&mut data, &mut f).await?;

        let f = f.into_std().await;
        if let Some(mtime) = node.mtime() {
            f.set_modified(mtime.into())?;
        }
        Ok(())
    }

    /// Writes `data` next to `path`, then moves it over `path`.
    /// `path` is left untouched if `data` fails.
    async fn write_leaf<H>(
        &self,
        path: &Utf8Path,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()> {
        let part = part_path(path);
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part)
            .await?;
        let res = match self.do_write(f, node, data).await {
            Ok(()) => fs::rename(&part, path).await.map_err(Into::into),
            Err(err) => Err(err),
        };
        if res.is_err() {
            if let Err(err) = fs::remove_file(&part).await {
                log::warn!("could not remove {part}: {err}");
            }
        }
        res
    }
}

/// Where the content of `path` is written before it is complete
fn part_path(path: &Utf8Path) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or_default();
    path.with_file_name(format!(".{name}.part"))
}

#[test]
fn test_part_path() {
    assert_eq!(
        part_path(Utf8Path::new("/staging/docs/a.txt")),
        Utf8Path::new("/staging/docs/.a.txt.part")
    );
}

impl treemirror::tree::Handles for FileSystem {
    type Handle = Utf8PathBuf;
}

impl treemirror::tree::ListChildren for FileSystem {
    async fn list(&self, handle: &Utf8PathBuf) -> Result<Vec<TreeNode<Utf8PathBuf>>> {
        log::trace!("listing entries of {handle}");
        let mut read_dir = fs::read_dir(handle).await?;
        let mut nodes = Vec::new();
        while let Some(direntry) = read_dir.next_entry().await? {
            if let Some(node) = map_direntry(&direntry).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

impl treemirror::tree::ReadLeaf for FileSystem {
    async fn read_leaf(
        &self,
        node: &TreeNode<Utf8PathBuf>,
    ) -> Result<impl io::AsyncRead + Send> {
        log::trace!("reading {}", node.handle());
        Ok(fs::File::open(node.handle()).await?)
    }
}

impl treemirror::tree::FindChild for FileSystem {
    async fn find_child(
        &self,
        parent: &Utf8PathBuf,
        name: &str,
    ) -> Result<Option<TreeNode<Utf8PathBuf>>> {
        check_name(name)?;
        let path = parent.join(name);
        match fs::symlink_metadata(&path).await {
            Ok(metadata) => Ok(map_metadata(name, path, &metadata)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl treemirror::tree::CreateContainer for FileSystem {
    async fn create_container(&self, parent: &Utf8PathBuf, name: &str) -> Result<Utf8PathBuf> {
        check_name(name)?;
        let path = parent.join(name);
        log::info!("mkdir {path}");
        fs::create_dir(&path).await?;
        Ok(path)
    }
}

impl treemirror::tree::CreateLeaf for FileSystem {
    async fn create_leaf<H>(
        &self,
        parent: &Utf8PathBuf,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        check_name(node.name())?;
        let path = parent.join(node.name());
        log::info!("creating {path}");
        if fs::symlink_metadata(&path).await.is_ok() {
            treemirror::io_bail!("{path} already exists");
        }
        self.write_leaf(&path, node, data).await
    }
}

impl treemirror::tree::ReplaceLeaf for FileSystem {
    async fn replace_leaf<H>(
        &self,
        _parent: &Utf8PathBuf,
        existing: &TreeNode<Utf8PathBuf>,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> Result<()>
    where
        H: Sync,
    {
        let path = existing.handle();
        log::info!("writing {path}");
        if path.is_dir() {
            treemirror::io_bail!("{path} is a directory");
        }
        self.write_leaf(path, node, data).await
    }
}

async fn map_direntry(direntry: &DirEntry) -> Result<Option<TreeNode<Utf8PathBuf>>> {
    let path = Utf8PathBuf::try_from(direntry.path())?;
    let name = String::from_utf8(direntry.file_name().into_encoded_bytes())?;
    let metadata = direntry.metadata().await?;
    Ok(map_metadata(&name, path, &metadata))
}

/// Symbolic links and special files are neither containers nor leaves and map to `None`.
fn map_metadata(
    name: &str,
    path: Utf8PathBuf,
    metadata: &std::fs::Metadata,
) -> Option<TreeNode<Utf8PathBuf>> {
    if metadata.is_symlink() {
        log::warn!("skipping symlink {path}");
        None
    } else if metadata.is_dir() {
        Some(TreeNode::container(name, path))
    } else if metadata.is_file() {
        let mtime = metadata.modified().ok().map(Into::into);
        Some(TreeNode::leaf(name, path, Some(metadata.len()), mtime))
    } else {
        log::warn!("skipping special file {path}");
        None
    }
}
