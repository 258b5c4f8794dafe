use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classifies every path in `current` against `cached` by content hash
/// alone: `added` is present only in `current`, `deleted`
/// only in `cached`, `modified` is present in both with differing hashes.
/// Pure function, touches no disk; output is sorted within each bucket
/// since `BTreeMap` iteration is already path-ordered.
pub fn diff_manifests(cached: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> ManifestDiff {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for (path, hash) in current {
        match cached.get(path) {
            None => added.push(path.clone()),
            Some(cached_hash) if cached_hash != hash => modified.push(path.clone()),
            Some(_) => {}
        }
    }

    for path in cached.keys() {
        if !current.contains_key(path) {
            deleted.push(path.clone());
        }
    }

    ManifestDiff { added, modified, deleted }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(p, h)| (p.to_string(), h.to_string())).collect()
    }

    #[test]
    fn reflexive_diff_is_empty() {
        let m = manifest(&[("a.als", "h1"), ("b.wav", "h2")]);
        let diff = diff_manifests(&m, &m);
        assert!(diff.is_empty());
    }

    #[test]
    fn detects_added_modified_and_deleted() {
        let cached = manifest(&[("a.als", "h1"), ("b.wav", "h2"), ("c.wav", "h3")]);
        let current = manifest(&[("a.als", "h1-changed"), ("c.wav", "h3"), ("d.wav", "h4")]);

        let diff = diff_manifests(&cached, &current);

        assert_eq!(diff.added, vec!["d.wav"]);
        assert_eq!(diff.modified, vec!["a.als"]);
        assert_eq!(diff.deleted, vec!["b.wav"]);
    }

    #[test]
    fn empty_cache_marks_everything_added() {
        let cached = BTreeMap::new();
        let current = manifest(&[("a.als", "h1")]);

        let diff = diff_manifests(&cached, &current);
        assert_eq!(diff.added, vec!["a.als"]);
        assert!(diff.modified.is_empty());
        assert!(diff.deleted.is_empty());
    }
}
