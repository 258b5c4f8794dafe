use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use notify::{Config as NotifyConfig, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::utils::config::WatcherConfig;

use super::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to read directory {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SaveEvent {
    pub project_name: String,
    pub project_path: PathBuf,
    pub als_path: PathBuf,
    pub detected_at: chrono::DateTime<Utc>,
}

/// Picks the session file a per-project watcher tracks: prefer
/// `<folderName>.als` (case-insensitive), else the lexicographically
/// smallest top-level `*.als`, excluding `.als~`/`.als.tmp`.
pub fn resolve_session_file(project_root: &Path) -> Option<PathBuf> {
    let folder_name = project_root.file_name()?.to_string_lossy().to_string();
    let preferred = format!("{folder_name}.als");

    let mut candidates = Vec::new();
    let entries = std::fs::read_dir(project_root).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.to_lowercase().ends_with(".als") || name.ends_with(".als~") || name.ends_with(".als.tmp") {
            continue;
        }
        if name.eq_ignore_ascii_case(&preferred) {
            return Some(entry.path());
        }
        candidates.push(name);
    }

    candidates.sort();
    candidates.into_iter().next().map(|name| project_root.join(name))
}

pub struct ProjectWatcher {
    project_name: String,
    project_root: PathBuf,
    config: WatcherConfig,
}

impl ProjectWatcher {
    pub fn new(project_name: impl Into<String>, project_root: PathBuf, config: WatcherConfig) -> Self {
        Self { project_name: project_name.into(), project_root, config }
    }

    /// Runs the debounce/stability state machine until `cancel` fires.
    /// Per-project events are strictly serial: the debounce timer guarantees
    /// at most one in-flight stability check at a time.
    pub async fn run(&self, cancel: CancellationToken, bus: EventBus) -> Result<(), WatcherError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<NotifyEvent>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&self.project_root, RecursiveMode::NonRecursive)?;

        let mut tracked = resolve_session_file(&self.project_root);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = rx.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    let Ok(event) = event else { continue };
                    if !self.is_qualifying(&event, &tracked) {
                        continue;
                    }

                    if !self.debounce_and_check_stable(&mut rx, &cancel).await {
                        continue;
                    }

                    if tracked.is_none() || !tracked.as_ref().unwrap().is_file() {
                        tracked = resolve_session_file(&self.project_root);
                    }
                    let Some(als_path) = tracked.clone() else { continue };

                    bus.publish(Event::AlsSaved {
                        project: self.project_name.clone(),
                        path: als_path.to_string_lossy().to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }
    }

    fn is_qualifying(&self, event: &NotifyEvent, tracked: &Option<PathBuf>) -> bool {
        let is_relevant_kind = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Other
        ) || matches!(event.kind, EventKind::Access(notify::event::AccessKind::Close(notify::event::AccessMode::Write)));

        if !is_relevant_kind {
            return false;
        }

        let Some(tracked) = tracked else { return false };
        event.paths.iter().any(|p| p == tracked || p.file_name() == tracked.file_name())
    }

    /// Restarts a debounce timer on every qualifying event; once it fires,
    /// polls for stability (unchanged size+mtime across consecutive polls,
    /// and openable read-only) for up to `stability_attempts` iterations.
    async fn debounce_and_check_stable(&self, rx: &mut mpsc::UnboundedReceiver<notify::Result<NotifyEvent>>, cancel: &CancellationToken) -> bool {
        let debounce = Duration::from_millis(self.config.debounce_ms);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(debounce) => break,
                event = rx.recv() => {
                    match event {
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => continue,
                        None => return false,
                    }
                }
            }
        }

        let Some(path) = resolve_session_file(&self.project_root) else { return false };
        let poll = Duration::from_millis(self.config.stability_poll_ms);

        let mut last: Option<(u64, std::time::SystemTime)> = None;
        for _ in 0..self.config.stability_attempts {
            if cancel.is_cancelled() {
                return false;
            }

            let Ok(metadata) = std::fs::metadata(&path) else {
                tokio::time::sleep(poll).await;
                continue;
            };
            let current = (metadata.len(), metadata.modified().unwrap_or(std::time::UNIX_EPOCH));

            let opens_read_only = std::fs::File::open(&path).is_ok();

            if Some(current) == last && opens_read_only {
                return true;
            }

            last = Some(current);
            tokio::time::sleep(poll).await;
        }

        false
    }
}

/// Watches `root` for project directories appearing/disappearing and starts
/// a `ProjectWatcher` under a child cancellation scope for each one
/// Per-project disappearance is a SHOULD for stopping the
/// corresponding watcher; the primary shutdown path is cancelling `cancel`.
pub struct FleetWatcher {
    root: PathBuf,
    config: WatcherConfig,
}

impl FleetWatcher {
    pub fn new(root: PathBuf, config: WatcherConfig) -> Self {
        Self { root, config }
    }

    pub fn qualifying_projects(&self) -> Result<Vec<(String, PathBuf)>, WatcherError> {
        let entries = std::fs::read_dir(&self.root).map_err(|err| WatcherError::ReadDir(self.root.clone(), err))?;
        let mut projects = Vec::new();

        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if resolve_session_file(&path).is_some() {
                let name = entry.file_name().to_string_lossy().to_string();
                projects.push((name, path));
            }
        }

        projects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(projects)
    }

    pub async fn run(&self, cancel: CancellationToken, bus: EventBus) -> Result<(), WatcherError> {
        let mut active: HashMap<String, CancellationToken> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (name, path) in self.qualifying_projects()? {
            self.spawn_project_watcher(&mut active, &mut tasks, name, path, &cancel, bus.clone());
        }

        let rescan_interval = Duration::from_millis(self.config.fleet_rescan_debounce_ms.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(rescan_interval) => {
                    if let Ok(current) = self.qualifying_projects() {
                        for (name, path) in current {
                            if !active.contains_key(&name) {
                                self.spawn_project_watcher(&mut active, &mut tasks, name, path, &cancel, bus.clone());
                            }
                        }
                    }
                }
                Some(_) = tasks.join_next() => {}
            }
        }

        for token in active.values() {
            token.cancel();
        }
        while tasks.join_next().await.is_some() {}

        Ok(())
    }

    fn spawn_project_watcher(
        &self,
        active: &mut HashMap<String, CancellationToken>,
        tasks: &mut JoinSet<()>,
        name: String,
        path: PathBuf,
        parent: &CancellationToken,
        bus: EventBus,
    ) {
        let child_token = parent.child_token();
        active.insert(name.clone(), child_token.clone());

        let watcher = ProjectWatcher::new(name.clone(), path, self.config.clone());
        tasks.spawn(async move {
            if let Err(err) = watcher.run(child_token, bus).await {
                log::warn!("project watcher for {name} exited with error: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_folder_named_session_file_preferentially() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("MySet");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("MySet.als"), b"x").unwrap();
        fs::write(project.join("backup.als"), b"x").unwrap();

        let resolved = resolve_session_file(&project).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "MySet.als");
    }

    #[test]
    fn falls_back_to_lexicographically_smallest_als() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("MySet");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("zeta.als"), b"x").unwrap();
        fs::write(project.join("alpha.als"), b"x").unwrap();

        let resolved = resolve_session_file(&project).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "alpha.als");
    }

    #[test]
    fn excludes_tilde_and_tmp_backups() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("MySet");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("MySet.als~"), b"x").unwrap();
        fs::write(project.join("MySet.als.tmp"), b"x").unwrap();
        fs::write(project.join("real.als"), b"x").unwrap();

        let resolved = resolve_session_file(&project).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "real.als");
    }

    #[test]
    fn fleet_watcher_finds_qualifying_project_dirs_only() {
        let root = tempfile::tempdir().unwrap();
        let with_als = root.path().join("has-als");
        fs::create_dir(&with_als).unwrap();
        fs::write(with_als.join("track.als"), b"x").unwrap();

        let without_als = root.path().join("no-als");
        fs::create_dir(&without_als).unwrap();

        let fleet = FleetWatcher::new(root.path().to_path_buf(), WatcherConfig::default());
        let projects = fleet.qualifying_projects().unwrap();

        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].0, "has-als");
    }
}
