use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "portsy", about = "content-addressed version control for Ableton Live projects")]
pub struct Cli {
    /// Path to portsy.toml; defaults to ./portsy.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan a project root and print its current manifest.
    Scan {
        #[arg(long = "root")]
        root: PathBuf,
        #[arg(long = "json")]
        json: bool,
    },

    /// List projects under `root` with uncommitted local changes.
    Pending {
        #[arg(long = "root")]
        root: PathBuf,
        #[arg(long = "json")]
        json: bool,
    },

    /// Diff one project's current state against its cache.
    Diff {
        #[arg(long = "root")]
        root: PathBuf,
        #[arg(long = "project")]
        project: String,
        #[arg(long = "json")]
        json: bool,
    },

    /// Push a project's current state as a new commit.
    Push {
        #[arg(long = "root")]
        root: PathBuf,
        #[arg(long = "project")]
        project: String,
        #[arg(long = "msg")]
        msg: String,
    },

    /// Pull a project's latest (or a specific) commit to a destination.
    Pull {
        #[arg(long = "project")]
        project: String,
        #[arg(long = "dest")]
        dest: Option<PathBuf>,
        #[arg(long = "commit")]
        commit: Option<Uuid>,
        #[arg(long = "force")]
        force: bool,
    },

    /// Pull an older commit, restoring a project to a prior revision.
    Rollback {
        #[arg(long = "project")]
        project: String,
        #[arg(long = "commit")]
        commit: Uuid,
        #[arg(long = "dest")]
        dest: Option<PathBuf>,
    },

    /// Watch a root (or single project) for `.als` saves.
    Watch {
        #[arg(long = "root")]
        root: PathBuf,
        #[arg(long = "project")]
        project: Option<String>,
        #[arg(long = "autopush")]
        autopush: bool,
    },
}
