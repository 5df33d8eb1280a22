//! Operations a tree must provide to take part in a mirror pass.
//!
//! A tree plays the source role ([`Source`]), the destination role
//! ([`Destination`]) or both. Every operation completes or fails before
//! the traversal proceeds.
use std::fmt;

use futures::Future;
use tokio::io;

use crate::{Result, TreeNode};

pub trait Handles {
    /// Opaque reference to a location in the tree
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;
}

pub trait ListChildren: Handles {
    /// Lists the immediate children of `handle`.
    /// Trashed entries are not listed.
    fn list(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<Vec<TreeNode<Self::Handle>>>> + Send;
}

pub trait ReadLeaf: Handles {
    fn read_leaf(
        &self,
        node: &TreeNode<Self::Handle>,
    ) -> impl Future<Output = Result<impl io::AsyncRead + Send>> + Send;
}

pub trait FindChild: Handles {
    /// Looks up the immediate child of `parent` named exactly `name` (case-sensitive).
    fn find_child(
        &self,
        parent: &Self::Handle,
        name: &str,
    ) -> impl Future<Output = Result<Option<TreeNode<Self::Handle>>>> + Send;
}

pub trait CreateContainer: Handles {
    /// Creates an empty container `name` in `parent` and returns its handle.
    fn create_container(
        &self,
        parent: &Self::Handle,
        name: &str,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;
}

pub trait CreateLeaf: Handles {
    /// Creates a new leaf in `parent`, named and dated after `node`, with content `data`.
    /// `node` belongs to the source tree.
    fn create_leaf<H>(
        &self,
        parent: &Self::Handle,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> impl Future<Output = Result<()>> + Send
    where
        H: Sync;
}

pub trait ReplaceLeaf: Handles {
    /// Overwrites the content of the `existing` leaf of `parent` with `data`.
    fn replace_leaf<H>(
        &self,
        parent: &Self::Handle,
        existing: &TreeNode<Self::Handle>,
        node: &TreeNode<H>,
        data: impl io::AsyncRead + Send,
    ) -> impl Future<Output = Result<()>> + Send
    where
        H: Sync;
}

/// A tree that can be read from
pub trait Source: ListChildren + ReadLeaf + Send + Sync {}

impl<T> Source for T where T: ListChildren + ReadLeaf + Send + Sync {}

/// A tree that can be written to
pub trait Destination: FindChild + CreateContainer + CreateLeaf + ReplaceLeaf + Send + Sync {}

impl<T> Destination for T where T: FindChild + CreateContainer + CreateLeaf + ReplaceLeaf + Send + Sync {}
