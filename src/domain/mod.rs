pub mod commit;
pub mod file_entry;
pub mod project_state;
pub mod session_index;

pub use commit::{CommitMeta, CommitStatus, ProjectDoc};
pub use file_entry::FileEntry;
pub use project_state::ProjectState;
pub use session_index::SessionIndex;

use serde::{Deserialize, Serialize};

/// Digest algorithm a `ProjectState` was built with. Every `FileEntry.hash`
/// inside a given state is in this one algorithm — states are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algo {
    Sha256,
    Blake3,
}

impl Algo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algo::Sha256 => "sha256",
            Algo::Blake3 => "blake3",
        }
    }
}

impl std::str::FromStr for Algo {
    type Err = AlgoParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algo::Sha256),
            "blake3" => Ok(Algo::Blake3),
            other => Err(AlgoParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Algo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown digest algorithm: '{0}'. Expected 'sha256' or 'blake3'.")]
pub struct AlgoParseError(String);

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("path '{0}' contains a '..' segment")]
    PathTraversal(String),

    #[error("path '{0}' is empty")]
    EmptyPath(String),

    #[error("duplicate path in project state: '{0}'")]
    DuplicatePath(String),

    #[error("files are not sorted ascending by path: '{0}' appears after '{1}'")]
    NotSorted(String, String),

    #[error("path '{0}' falls under the reserved '.portsy/' directory")]
    ReservedDirectory(String),
}
