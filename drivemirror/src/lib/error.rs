//! Conversions of third-party errors into [`treemirror::Error`]
use std::fmt;

pub fn api<E: fmt::Display>(err: E) -> treemirror::Error {
    treemirror::Error::Api(err.to_string())
}

pub fn io<E: fmt::Display>(err: E) -> treemirror::Error {
    treemirror::Error::Io(err.to_string())
}

pub fn auth<E: fmt::Display>(err: E) -> treemirror::Error {
    treemirror::Error::Auth(err.to_string())
}
