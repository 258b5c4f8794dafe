use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Extracted semantic content of an `.als` session file: the set of audio
/// samples it references, and a per-clip content fingerprint. Produced by
/// `services::als::ALSReader`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionIndex {
    pub sample_paths: BTreeSet<String>,
    pub clip_hashes: BTreeMap<String, String>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Classification of a sample reference shared between two `SessionIndex`
/// values, computed by `SessionIndex::logical_diff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleChange {
    Added,
    Removed,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalDiff {
    pub samples: BTreeMap<String, SampleChange>,
    pub clips_added: BTreeSet<String>,
    pub clips_removed: BTreeSet<String>,
    pub clips_changed: BTreeSet<String>,
}

impl SessionIndex {
    /// Compares `self` (current) against `prev` (prior revision). `current_hash`
    /// resolves a sample path's live content digest (normally backed by the
    /// current `ProjectState` manifest); `prev_hash` resolves the digest it
    /// had at the prior revision. A shared path is `Changed` only when both digests are known
    /// and differ — an unresolvable digest on either side is treated as
    /// `Unchanged` rather than guessed at.
    pub fn logical_diff<FCur, FPrev>(&self, prev: &SessionIndex, mut current_hash: FCur, mut prev_hash: FPrev) -> LogicalDiff
    where
        FCur: FnMut(&str) -> Option<String>,
        FPrev: FnMut(&str) -> Option<String>,
    {
        let mut diff = LogicalDiff::default();

        for path in self.sample_paths.union(&prev.sample_paths) {
            let in_current = self.sample_paths.contains(path);
            let in_prev = prev.sample_paths.contains(path);

            let change = match (in_current, in_prev) {
                (true, false) => SampleChange::Added,
                (false, true) => SampleChange::Removed,
                (true, true) => match (current_hash(path), prev_hash(path)) {
                    (Some(cur), Some(prior)) if cur != prior => SampleChange::Changed,
                    _ => SampleChange::Unchanged,
                },
                (false, false) => continue,
            };

            diff.samples.insert(path.clone(), change);
        }

        for clip in self.clip_hashes.keys() {
            if !prev.clip_hashes.contains_key(clip) {
                diff.clips_added.insert(clip.clone());
            } else if prev.clip_hashes.get(clip) != self.clip_hashes.get(clip) {
                diff.clips_changed.insert(clip.clone());
            }
        }

        for clip in prev.clip_hashes.keys() {
            if !self.clip_hashes.contains_key(clip) {
                diff.clips_removed.insert(clip.clone());
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_added_removed_and_changed_samples() {
        let mut current = SessionIndex::new();
        current.sample_paths.insert("samples/kick.wav".to_string());
        current.sample_paths.insert("samples/snare.wav".to_string());

        let mut prev = SessionIndex::new();
        prev.sample_paths.insert("samples/kick.wav".to_string());
        prev.sample_paths.insert("samples/hat.wav".to_string());

        let diff = current.logical_diff(
            &prev,
            |p| if p == "samples/kick.wav" { Some("H2".into()) } else { Some("H1".into()) },
            |p| if p == "samples/kick.wav" { Some("H1".into()) } else { Some("H1".into()) },
        );

        assert_eq!(diff.samples.get("samples/snare.wav"), Some(&SampleChange::Added));
        assert_eq!(diff.samples.get("samples/hat.wav"), Some(&SampleChange::Removed));
        assert_eq!(diff.samples.get("samples/kick.wav"), Some(&SampleChange::Changed));
    }

    #[test]
    fn clip_hash_changes_are_tracked_independently_of_samples() {
        let mut current = SessionIndex::new();
        current.clip_hashes.insert("clip-1".to_string(), "a".to_string());
        current.clip_hashes.insert("clip-2".to_string(), "b".to_string());

        let mut prev = SessionIndex::new();
        prev.clip_hashes.insert("clip-1".to_string(), "a".to_string());
        prev.clip_hashes.insert("clip-3".to_string(), "c".to_string());

        let diff = current.logical_diff(&prev, |_| None, |_| None);

        assert!(diff.clips_added.contains("clip-2"));
        assert!(diff.clips_removed.contains("clip-3"));
        assert!(!diff.clips_changed.contains("clip-1"));
    }
}
