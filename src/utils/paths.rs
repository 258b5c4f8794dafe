use std::path::{Path, PathBuf};

/// Directory names the Scanner never descends into.
pub const IGNORED_DIRS: &[&str] = &[
    ".portsy",
    "Build",
    "Cache",
    ".git",
    ".idea",
    ".vs",
    ".svn",
    ".hg",
    "Ableton Project Info",
];

/// Filenames the Scanner skips regardless of directory.
pub const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.iter().any(|ignored| ignored.eq_ignore_ascii_case(name))
}

pub fn is_ignored_file(name: &str) -> bool {
    IGNORED_FILES.iter().any(|ignored| ignored.eq_ignore_ascii_case(name))
}

/// Same normalization rule the Scanner and LocalCache must agree on:
/// separators become `/`, and on a case-insensitive filesystem the result
/// is lowercased so the same file never produces two manifest keys.
pub fn normalize_relative_path(path: &Path, case_insensitive: bool) -> String {
    let slashed = path.to_string_lossy().replace('\\', "/");
    if case_insensitive {
        slashed.to_lowercase()
    } else {
        slashed
    }
}

/// Whether this host's default filesystem is case-insensitive. Windows and
/// macOS (the two platforms Ableton Live ships on) both default to
/// case-insensitive, case-preserving filesystems; everything else assumed
/// case-sensitive.
#[cfg(any(target_os = "windows", target_os = "macos"))]
pub fn host_is_case_insensitive() -> bool {
    true
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn host_is_case_insensitive() -> bool {
    false
}

pub fn relativize(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(|p| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_to_forward_slashes() {
        let normalized = normalize_relative_path(Path::new("Samples\\Kick.wav"), false);
        assert_eq!(normalized, "Samples/Kick.wav");
    }

    #[test]
    fn lowercases_when_case_insensitive() {
        let normalized = normalize_relative_path(Path::new("Samples/Kick.wav"), true);
        assert_eq!(normalized, "samples/kick.wav");
    }

    #[test]
    fn ignored_dir_matching_is_case_insensitive_by_name() {
        assert!(is_ignored_dir(".git"));
        assert!(is_ignored_dir(".GIT"));
        assert!(!is_ignored_dir("samples"));
    }
}
