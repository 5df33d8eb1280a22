use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use tokio::fs;

pub fn temp_path(prefix: Option<&str>, ext: Option<&str>) -> Utf8PathBuf {
    use rand::{distributions::Alphanumeric, Rng};

    let mut filename = String::new();
    if let Some(prefix) = prefix {
        filename.push_str(prefix);
        filename.push('-');
    }
    let rnd: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    filename.push_str(&rnd);
    if let Some(ext) = ext {
        filename.push('.');
        filename.push_str(ext);
    }
    let mut p = std::env::temp_dir();
    p.push(filename);
    p.try_into().unwrap()
}

/// A directory removed when dropped
pub struct TempDir(Utf8PathBuf);

impl TempDir {
    pub async fn new(prefix: &str) -> anyhow::Result<Self> {
        let path = temp_path(Some(prefix), None);
        fs::create_dir(&path).await?;
        Ok(TempDir(path))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Every path under `root`, relative to it, mapped to the file content,
/// or to `None` for directories.
pub fn dir_snapshot<'a>(
    root: &'a Utf8Path,
    rel: &'a str,
    snapshot: &'a mut Vec<(String, Option<String>)>,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        let dir = if rel.is_empty() {
            root.to_owned()
        } else {
            root.join(rel)
        };
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| anyhow::anyhow!("non UTF-8 name: {name:?}"))?;
            let path = crate::dataset::join(rel, &name);
            if entry.file_type().await?.is_dir() {
                snapshot.push((path.clone(), None));
                dir_snapshot(root, &path, snapshot).await?;
            } else {
                let content = fs::read_to_string(entry.path()).await?;
                snapshot.push((path, Some(content)));
            }
        }
        Ok(())
    })
}

pub async fn fs_snapshot(root: &Utf8Path) -> anyhow::Result<Vec<(String, Option<String>)>> {
    let mut snapshot = Vec::new();
    dir_snapshot(root, "", &mut snapshot).await?;
    snapshot.sort();
    Ok(snapshot)
}
