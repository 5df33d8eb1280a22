use std::{
    collections::{BTreeMap, HashMap},
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use chrono::{DateTime, Utc};
use tokio::io;
use treemirror::{
    tree::{CreateContainer, CreateLeaf, FindChild, Handles, ListChildren, ReadLeaf, ReplaceLeaf},
    Error, TreeNode,
};

/// Operation of the stub that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    List,
    Read,
    Find,
    Create,
    Write,
    /// Reading the leaf fails after half of its content
    Interrupt,
    /// Any operation on the path fails with an authorization error
    Auth,
}

#[derive(Debug, Clone)]
enum Content {
    Dir(Vec<u64>),
    File(Vec<u8>, DateTime<Utc>),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<u64>,
    content: Content,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    faults: Vec<(String, Fault)>,
    mutations: Vec<String>,
}

impl Inner {
    fn path(&self, id: u64) -> String {
        let mut names = Vec::new();
        let mut cur = Some(id);
        while let Some(id) = cur {
            let node = &self.nodes[&id];
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            cur = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    fn child_path(&self, parent: u64, name: &str) -> String {
        let parent = self.path(parent);
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        }
    }

    fn check(&self, path: &str, op: Fault) -> treemirror::Result<()> {
        for (p, f) in self.faults.iter() {
            if p != path {
                continue;
            }
            if *f == Fault::Auth {
                return Err(Error::Auth(format!("token revoked ({path})")));
            }
            if *f == op {
                return Err(Error::Io(format!("injected {op:?} failure on '{path}'")));
            }
        }
        Ok(())
    }

    fn has_fault(&self, path: &str, op: Fault) -> bool {
        self.faults.iter().any(|(p, f)| p == path && *f == op)
    }

    fn children(&self, id: u64) -> treemirror::Result<&[u64]> {
        match self.nodes.get(&id).map(|n| &n.content) {
            Some(Content::Dir(children)) => Ok(children),
            Some(Content::File(..)) => Err(Error::Io(format!("{} is not a directory", self.path(id)))),
            None => Err(Error::Io(format!("no such node: {id}"))),
        }
    }

    fn find(&self, parent: u64, name: &str) -> Option<u64> {
        self.children(parent)
            .ok()?
            .iter()
            .copied()
            .find(|id| self.nodes[id].name == name)
    }

    fn insert(&mut self, parent: u64, name: &str, content: Content) -> treemirror::Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        match self.nodes.get_mut(&parent).map(|n| &mut n.content) {
            Some(Content::Dir(children)) => children.push(id),
            _ => return Err(Error::Io(format!("can't insert {name} in {parent}"))),
        }
        self.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                parent: Some(parent),
                content,
            },
        );
        Ok(id)
    }

    fn tree_node(&self, id: u64) -> TreeNode<u64> {
        let node = &self.nodes[&id];
        match &node.content {
            Content::Dir(_) => TreeNode::container(&node.name, id),
            Content::File(data, mtime) => {
                TreeNode::leaf(&node.name, id, Some(data.len() as u64), Some(*mtime))
            }
        }
    }
}

/// In-memory tree with node ids as handles. The root has id 0.
#[derive(Debug)]
pub struct MemTree {
    inner: Mutex<Inner>,
}

impl Default for MemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTree {
    pub const ROOT: u64 = 0;

    pub fn new() -> Self {
        let mut inner = Inner {
            next_id: 1,
            ..Default::default()
        };
        inner.nodes.insert(
            Self::ROOT,
            Node {
                name: String::new(),
                parent: None,
                content: Content::Dir(Vec::new()),
            },
        );
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn resolve_parent(inner: &mut Inner, path: &str) -> (u64, String) {
        let mut comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let name = comps.pop().expect("empty path").to_string();
        let mut cur = Self::ROOT;
        for comp in comps {
            cur = match inner.find(cur, comp) {
                Some(id) => id,
                None => inner
                    .insert(cur, comp, Content::Dir(Vec::new()))
                    .expect("parent is a directory"),
            };
        }
        (cur, name)
    }

    /// Adds a directory at `path`, creating the missing parents.
    pub fn add_dir(&self, path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let (parent, name) = Self::resolve_parent(&mut inner, path);
        inner
            .insert(parent, &name, Content::Dir(Vec::new()))
            .unwrap()
    }

    /// Adds a file at `path`, creating the missing parents.
    pub fn add_file(&self, path: &str, content: &str, mtime: DateTime<Utc>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let (parent, name) = Self::resolve_parent(&mut inner, path);
        inner
            .insert(
                parent,
                &name,
                Content::File(content.as_bytes().to_vec(), mtime),
            )
            .unwrap()
    }

    /// Makes `op` fail on `path` (relative to the root).
    pub fn fail(&self, path: &str, op: Fault) {
        let mut inner = self.inner.lock().unwrap();
        inner.faults.push((path.to_string(), op));
    }

    pub fn clear_faults(&self) {
        self.inner.lock().unwrap().faults.clear();
    }

    /// Log of the mutations performed, e.g. `mkdir docs` or `create docs/a.txt`.
    pub fn mutations(&self) -> Vec<String> {
        self.inner.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.inner.lock().unwrap().mutations.clear();
    }

    /// Every path of the tree, mapped to the file content, or to `None` for directories.
    pub fn snapshot(&self) -> BTreeMap<String, Option<String>> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .iter()
            .filter(|(id, _)| **id != Self::ROOT)
            .map(|(id, node)| {
                let content = match &node.content {
                    Content::Dir(_) => None,
                    Content::File(data, _) => Some(String::from_utf8_lossy(data).into_owned()),
                };
                (inner.path(*id), content)
            })
            .collect()
    }

    /// Number of children of `parent` named `name`
    pub fn count_named(&self, parent: &str, name: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        let parent = inner
            .nodes
            .keys()
            .copied()
            .find(|id| inner.path(*id) == parent)
            .expect("no such parent");
        inner
            .children(parent)
            .unwrap()
            .iter()
            .filter(|id| inner.nodes[*id].name == name)
            .count()
    }

    pub fn id_of(&self, path: &str) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        let found = inner.nodes.keys().copied().find(|id| inner.path(*id) == path);
        found
    }

    /// Nested directories `d0/d1/.../d{depth-1}` with a file at the bottom
    pub fn add_deep(&self, depth: usize, mtime: DateTime<Utc>) -> String {
        let dirs: Vec<String> = (0..depth).map(|i| format!("d{i}")).collect();
        let path = format!("{}/bottom.txt", dirs.join("/"));
        self.add_file(&path, "bottom", mtime);
        path
    }
}

/// Content of a leaf, possibly failing at `cut` like a dropped connection
struct LeafReader {
    data: Vec<u8>,
    pos: usize,
    cut: Option<usize>,
}

impl io::AsyncRead for LeafReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let end = self.cut.unwrap_or(self.data.len());
        if self.pos >= end {
            if self.cut.is_some() {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection dropped",
                )));
            }
            return Poll::Ready(Ok(()));
        }
        let n = buf.remaining().min(end - self.pos);
        let pos = self.pos;
        buf.put_slice(&self.data[pos..pos + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl Handles for MemTree {
    type Handle = u64;
}

impl ListChildren for MemTree {
    async fn list(&self, handle: &u64) -> treemirror::Result<Vec<TreeNode<u64>>> {
        let inner = self.inner.lock().unwrap();
        inner.check(&inner.path(*handle), Fault::List)?;
        let children = inner.children(*handle)?;
        Ok(children.iter().map(|id| inner.tree_node(*id)).collect())
    }
}

impl ReadLeaf for MemTree {
    async fn read_leaf(
        &self,
        node: &TreeNode<u64>,
    ) -> treemirror::Result<impl io::AsyncRead + Send> {
        let inner = self.inner.lock().unwrap();
        let path = inner.path(*node.handle());
        inner.check(&path, Fault::Read)?;
        match &inner.nodes[node.handle()].content {
            Content::File(data, _) => {
                let cut = inner
                    .has_fault(&path, Fault::Interrupt)
                    .then_some(data.len() / 2);
                Ok(LeafReader {
                    data: data.clone(),
                    pos: 0,
                    cut,
                })
            }
            Content::Dir(_) => Err(Error::Io(format!("{} is a directory", node.name()))),
        }
    }
}

impl FindChild for MemTree {
    async fn find_child(
        &self,
        parent: &u64,
        name: &str,
    ) -> treemirror::Result<Option<TreeNode<u64>>> {
        let inner = self.inner.lock().unwrap();
        inner.check(&inner.child_path(*parent, name), Fault::Find)?;
        Ok(inner.find(*parent, name).map(|id| inner.tree_node(id)))
    }
}

impl CreateContainer for MemTree {
    async fn create_container(&self, parent: &u64, name: &str) -> treemirror::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let path = inner.child_path(*parent, name);
        inner.check(&path, Fault::Create)?;
        let id = inner.insert(*parent, name, Content::Dir(Vec::new()))?;
        inner.mutations.push(format!("mkdir {path}"));
        Ok(id)
    }
}

async fn read_all(data: impl io::AsyncRead) -> treemirror::Result<Vec<u8>> {
    use io::AsyncReadExt;

    tokio::pin!(data);
    let mut buf = Vec::new();
    data.read_to_end(&mut buf).await?;
    Ok(buf)
}

impl CreateLeaf for MemTree {
    async fn create_leaf<H>(
        &self,
        parent: &u64,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> treemirror::Result<()>
    where
        H: Sync,
    {
        {
            let inner = self.inner.lock().unwrap();
            inner.check(&inner.child_path(*parent, node.name()), Fault::Write)?;
        }
        let data = read_all(data).await?;
        let mtime = node.mtime().unwrap_or_else(Utc::now);

        let mut inner = self.inner.lock().unwrap();
        let path = inner.child_path(*parent, node.name());
        inner.insert(*parent, node.name(), Content::File(data, mtime))?;
        inner.mutations.push(format!("create {path}"));
        Ok(())
    }
}

impl ReplaceLeaf for MemTree {
    async fn replace_leaf<H>(
        &self,
        _parent: &u64,
        existing: &TreeNode<u64>,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> treemirror::Result<()>
    where
        H: Sync,
    {
        {
            let inner = self.inner.lock().unwrap();
            inner.check(&inner.path(*existing.handle()), Fault::Write)?;
        }
        let data = read_all(data).await?;
        let mtime = node.mtime().unwrap_or_else(Utc::now);

        let mut inner = self.inner.lock().unwrap();
        let path = inner.path(*existing.handle());
        match inner.nodes.get_mut(existing.handle()) {
            Some(n) => n.content = Content::File(data, mtime),
            None => return Err(Error::Io(format!("no such node: {path}"))),
        }
        inner.mutations.push(format!("replace {path}"));
        Ok(())
    }
}
