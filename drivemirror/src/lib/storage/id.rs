//! Identifiers of Google Drive files
use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of a file or folder in Drive
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Alias of the top folder of "My Drive"
    pub fn root() -> FileId {
        FileId::from("root")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        FileId(value)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        FileId(value.to_string())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({:?})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[test]
fn test_file_id() {
    let id = FileId::from("1a2B3c");
    assert_eq!(id.as_str(), "1a2B3c");
    assert_eq!(format!("{id:?}"), "FileId(\"1a2B3c\")");
    assert_eq!(FileId::root().to_string(), "root");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"1a2B3c\"");
    let id: FileId = serde_json::from_str("\"xyz\"").unwrap();
    assert_eq!(id, FileId::from("xyz"));
}
