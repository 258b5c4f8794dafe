use clap::Parser;

use portsy_core::cli::{Cli, Command};
use portsy_core::engine::Engine;
use portsy_core::services::change_tracker::ChangeTracker;
use portsy_core::services::diff::diff_manifests;
use portsy_core::services::scanner::Scanner;
use portsy_core::utils::config::{self, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    if let Some(path) = cli.config.clone() {
        config::set_config_path(path);
    }
    let config: &Config = config::get_config()?;

    match cli.command {
        Command::Scan { root, json } => {
            let scanner = Scanner::new(&root);
            let result = scanner.scan("scan", config.algo, chrono::Utc::now().timestamp())?;
            if json {
                println!("{}", serde_json::to_string(&result.state.manifest())?);
            } else {
                for (path, hash) in result.state.manifest() {
                    println!("{path}  {hash}");
                }
            }
        }

        Command::Pending { root, json } => {
            let tracker = ChangeTracker::new(&root, config.algo);
            let changes = tracker.pending()?;
            if json {
                let payload: Vec<_> = changes
                    .iter()
                    .map(|c| serde_json::json!({ "name": c.name, "added": c.diff.added, "modified": c.diff.modified, "deleted": c.diff.deleted, "total": c.total }))
                    .collect();
                println!("{}", serde_json::to_string(&payload)?);
            } else {
                for change in &changes {
                    println!("{} — {} changes", change.name, change.total);
                }
            }
        }

        Command::Diff { root, project, json } => {
            let project_root = root.join(&project);
            let scanner = Scanner::new(&project_root);
            let scan = scanner.scan(&project, config.algo, chrono::Utc::now().timestamp())?;
            let cache = portsy_core::services::cache::LocalCache::new(&project_root);
            let cached = cache.load(config.algo)?;
            let diff = diff_manifests(&cached.manifest, &scan.state.manifest());

            if json {
                println!("{}", serde_json::to_string(&serde_json::json!({ "added": diff.added, "modified": diff.modified, "deleted": diff.deleted }))?);
            } else {
                for path in &diff.added {
                    println!("+ {path}");
                }
                for path in &diff.modified {
                    println!("~ {path}");
                }
                for path in &diff.deleted {
                    println!("- {path}");
                }
            }
        }

        Command::Push { root, project, msg } => {
            let engine = Engine::new(config).await?;
            let project_root = root.join(&project);
            let stats = engine.push(&project_root, &project, &msg, None).await?;
            println!("uploaded={} migrated={} unchanged={}", stats.uploaded, stats.migrated, stats.unchanged);
        }

        Command::Pull { project, dest, commit, force } => {
            let engine = Engine::new(config).await?;
            let dest_path = dest.unwrap_or_else(|| std::path::PathBuf::from(&project));
            let stats = engine.pull(&project, &dest_path, commit, force).await?;
            println!(
                "to_download={} downloaded={} verified={} skipped={} deleted={}",
                stats.to_download, stats.downloaded, stats.verified, stats.skipped, stats.deleted
            );
        }

        // Rollback is a pull pinned to an explicit commit id — it shares
        // Pull's verify/atomic-download machinery rather than duplicating it.
        Command::Rollback { project, commit, dest } => {
            let engine = Engine::new(config).await?;
            let dest_path = dest.unwrap_or_else(|| std::path::PathBuf::from(&project));
            let stats = engine.pull(&project, &dest_path, Some(commit), true).await?;
            println!("rolled back to {commit}: downloaded={} deleted={}", stats.downloaded, stats.deleted);
        }

        Command::Watch { root, project, autopush: _ } => {
            let engine = Engine::new(config).await?;
            if let Some(project) = project {
                log::info!("watching single project {project} under {}", root.display());
            } else {
                log::info!("watching fleet under {}", root.display());
            }
            engine.watch(&root, config.watcher.clone()).await?;
        }
    }

    Ok(())
}
