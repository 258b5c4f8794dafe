use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatus {
    Pending,
    Final,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Pending => "pending",
            CommitStatus::Final => "final",
        }
    }
}

impl std::str::FromStr for CommitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommitStatus::Pending),
            "final" => Ok(CommitStatus::Final),
            other => Err(format!("unknown commit status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMeta {
    pub id: Uuid,
    pub message: String,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub status: CommitStatus,
}

impl CommitMeta {
    pub fn new(message: impl Into<String>, timestamp: i64, user_id: Option<String>, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            timestamp,
            user_id,
            parent_id,
            status: CommitStatus::Pending,
        }
    }

    pub fn finalized(mut self) -> Self {
        self.status = CommitStatus::Final;
        self
    }
}

/// HEAD pointer for a project. `last5` is a bounded FIFO of the five most
/// recent commit ids, oldest first: appended on each advance and trimmed
/// from the front once it exceeds capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDoc {
    pub name: String,
    pub last_commit_id: Option<Uuid>,
    pub last_commit_at: Option<i64>,
    pub last5: VecDeque<Uuid>,
}

pub const LAST5_CAPACITY: usize = 5;

impl ProjectDoc {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_commit_id: None,
            last_commit_at: None,
            last5: VecDeque::new(),
        }
    }

    /// Advances HEAD to `commit_id`/`at` and appends it to `last5`, trimming
    /// the oldest entry once the FIFO exceeds `LAST5_CAPACITY`.
    pub fn advance(&mut self, commit_id: Uuid, at: i64) {
        self.last_commit_id = Some(commit_id);
        self.last_commit_at = Some(at);

        self.last5.push_back(commit_id);
        while self.last5.len() > LAST5_CAPACITY {
            self.last5.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last5_trims_oldest() {
        let mut doc = ProjectDoc::empty("proj");
        let ids: Vec<Uuid> = (0..7).map(|_| Uuid::new_v4()).collect();

        for (i, id) in ids.iter().enumerate() {
            doc.advance(*id, i as i64);
        }

        assert_eq!(doc.last5.len(), LAST5_CAPACITY);
        assert_eq!(doc.last5.iter().copied().collect::<Vec<_>>(), ids[2..7].to_vec());
        assert_eq!(doc.last_commit_id, Some(ids[6]));
    }
}
