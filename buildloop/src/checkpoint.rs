//! Version-control checkpoints of the project working tree.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::types::Phase;
use crate::io::git::Git;

/// Result of one checkpoint attempt. Never an error: failures are reported
/// and the loop carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Committed { files: usize },
    NoChanges,
    NotVersioned,
    Failed(String),
}

impl CheckpointOutcome {
    pub fn committed(&self) -> bool {
        matches!(self, CheckpointOutcome::Committed { .. })
    }
}

pub fn cycle_message(cycle: u32, phase: Phase) -> String {
    format!("buildloop: cycle {cycle} ({phase})")
}

/// Stage and commit everything under `root` if there is anything to commit.
pub fn checkpoint(root: &Path, message: &str) -> CheckpointOutcome {
    let git = Git::new(root);
    if !git.is_repo() {
        debug!(root = %root.display(), "not a git repository, skipping checkpoint");
        return CheckpointOutcome::NotVersioned;
    }

    let result = try_checkpoint(&git, message);

    match result {
        Ok(outcome) => {
            match &outcome {
                CheckpointOutcome::Committed { files } => {
                    info!(files, message, "checkpoint committed");
                }
                _ => debug!("nothing to checkpoint"),
            }
            outcome
        }
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(err = %reason, "checkpoint failed (ignored)");
            CheckpointOutcome::Failed(reason)
        }
    }
}

fn try_checkpoint(git: &Git, message: &str) -> Result<CheckpointOutcome> {
    let staged = git.stage_all()?;
    if staged.is_empty() {
        return Ok(CheckpointOutcome::NoChanges);
    }
    git.commit(message)?;
    Ok(CheckpointOutcome::Committed {
        files: staged.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::TestProject;

    #[test]
    fn commits_changes_then_is_idempotent() {
        let project = TestProject::new().expect("project");
        fs::write(project.root().join("index.html"), "<html></html>").expect("write");

        let first = checkpoint(project.root(), &cycle_message(1, Phase::Improve));
        assert_eq!(first, CheckpointOutcome::Committed { files: 1 });
        let count = Git::new(project.root()).commit_count().expect("count");

        let second = checkpoint(project.root(), &cycle_message(2, Phase::Polish));
        assert_eq!(second, CheckpointOutcome::NoChanges);
        assert_eq!(Git::new(project.root()).commit_count().expect("count"), count);
    }

    #[test]
    fn plain_directory_is_not_versioned() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        assert_eq!(
            checkpoint(temp.path(), "msg"),
            CheckpointOutcome::NotVersioned
        );
    }

    #[test]
    fn message_names_cycle_and_phase() {
        assert_eq!(cycle_message(7, Phase::Docs), "buildloop: cycle 7 (docs)");
    }
}
