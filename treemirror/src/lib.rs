#![allow(async_fn_in_trait)]

use std::{cmp, fmt, time};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
mod error;
pub mod loc;
pub mod mirror;
pub mod oauth;
pub mod tree;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::mirror::{Failure, LeafPolicy, MirrorResult, Progress, TreeMirror};

/// Direction of a mirror pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Remote to local
    Pull,
    /// Local to remote
    Push,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => f.write_str("pull"),
            Direction::Push => f.write_str("push"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Container,
    Leaf,
}

/// A node of a source or destination tree.
///
/// `handle` is whatever the tree uses to address the node:
/// a file id on Google Drive, an absolute path on the local file system,
/// an object key prefix in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode<H> {
    name: String,
    kind: NodeKind,
    handle: H,
    size: Option<u64>,
    mtime: Option<DateTime<Utc>>,
}

impl<H> TreeNode<H> {
    pub fn container(name: impl Into<String>, handle: H) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Container,
            handle,
            size: None,
            mtime: None,
        }
    }

    pub fn leaf(
        name: impl Into<String>,
        handle: H,
        size: Option<u64>,
        mtime: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf,
            handle,
            size,
            mtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn into_handle(self) -> H {
        self.handle
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.mtime
    }
}

pub const MTIME_TOL: time::Duration = time::Duration::from_secs(1);

pub fn compare_mtime(lhs: DateTime<Utc>, rhs: DateTime<Utc>) -> cmp::Ordering {
    if lhs + MTIME_TOL < rhs {
        cmp::Ordering::Less
    } else if lhs - MTIME_TOL > rhs {
        cmp::Ordering::Greater
    } else {
        cmp::Ordering::Equal
    }
}

pub fn compare_mtime_opt(
    lhs: Option<DateTime<Utc>>,
    rhs: Option<DateTime<Utc>>,
) -> Option<cmp::Ordering> {
    if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
        Some(compare_mtime(lhs, rhs))
    } else {
        None
    }
}
