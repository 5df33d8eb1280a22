use std::{error, fmt, io, string::FromUtf8Error};

use camino::{FromPathBufError, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Error type of the mirror traversal and of its collaborators.
///
/// `List`, `Create` and `Transfer` are raised by the traversal itself and carry
/// the path of the node, relative to the mirror root.
/// The other variants are raised by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    List { path: Utf8PathBuf, reason: String },
    Create { path: Utf8PathBuf, reason: String },
    Transfer { path: Utf8PathBuf, reason: String },
    Utf8(String),
    Io(String),
    Auth(String),
    Api(String),
    Config(String),
    Bug(String),
    Other(String),
}

impl Error {
    pub fn list<E: fmt::Display>(path: impl Into<Utf8PathBuf>, err: E) -> Self {
        Self::List {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn create<E: fmt::Display>(path: impl Into<Utf8PathBuf>, err: E) -> Self {
        Self::Create {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn transfer<E: fmt::Display>(path: impl Into<Utf8PathBuf>, err: E) -> Self {
        Self::Transfer {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(..))
    }
}

fn or_root(path: &Utf8PathBuf) -> &str {
    if path.as_str().is_empty() {
        "(root)"
    } else {
        path.as_str()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List { path, reason } => {
                write!(f, "Could not list {}: {reason}", or_root(path))
            }
            Self::Create { path, reason } => {
                write!(f, "Could not create {}: {reason}", or_root(path))
            }
            Self::Transfer { path, reason } => {
                write!(f, "Could not transfer {}: {reason}", or_root(path))
            }
            Self::Utf8(msg) => write!(f, "Non UTF-8 string: {msg}"),
            Self::Auth(msg) => write!(f, "Authorization error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Api(msg) => write!(f, "API error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Bug(msg) => write!(f, "drivemirror bug: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for Error {}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Self::Utf8(String::from_utf8_lossy(&value.into_bytes()).to_string())
    }
}

impl From<FromPathBufError> for Error {
    fn from(value: FromPathBufError) -> Self {
        Self::Utf8(value.as_path().as_os_str().to_string_lossy().to_string())
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {value}"))
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        // keep the auth class when an auth error went through anyhow
        match value.downcast::<Error>() {
            Ok(err) => err,
            Err(value) => Self::Other(format!("{value:#}")),
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}


pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! io_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Io(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! api_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Api(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! auth_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Auth(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! auth_error {
    ($($t:tt)*) => {
        $crate::Error::Auth(format!($($t)*))
    };
}

#[macro_export]
macro_rules! api_error {
    ($($t:tt)*) => {
        $crate::Error::Api(format!($($t)*))
    };
}
