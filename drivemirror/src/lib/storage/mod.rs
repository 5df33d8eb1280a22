//! Trees taking part in a mirror pass.
//!
//! Each module implements the operations of [`treemirror::tree`] for one kind of store.

pub mod bucket;
pub mod fs;
pub mod gdrive;
pub mod id;

mod rest;
mod upload;

pub use treemirror::tree::{
    CreateContainer, CreateLeaf, Destination, FindChild, Handles, ListChildren, ReadLeaf,
    ReplaceLeaf, Source,
};
