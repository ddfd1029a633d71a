//! Git adapter for project checkpoints.
//!
//! The project directory is the repository. Everything the engine needs is
//! stage-all-and-commit, so this stays a thin wrapper over `git` invocations.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if the working directory is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.output(&["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|out| out.status.success() && out.stdout.trim_ascii() == b"true")
    }

    #[instrument(skip_all)]
    pub fn init(&self) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "git init");
        self.git(&["init", "--quiet"]).map(drop)
    }

    /// Set a local commit identity unless one is already configured.
    pub fn ensure_identity(&self, name: &str, email: &str) -> Result<()> {
        let configured = self.output(&["config", "user.email"])?;
        if configured.status.success() && !configured.stdout.trim_ascii().is_empty() {
            return Ok(());
        }
        debug!(name, email, "setting local git identity");
        self.git(&["config", "user.name", name])?;
        self.git(&["config", "user.email", email])?;
        Ok(())
    }

    /// Stage every change (honouring `.gitignore`) and return the staged paths.
    #[instrument(skip_all)]
    pub fn stage_all(&self) -> Result<Vec<String>> {
        self.git(&["add", "--all"])?;
        let staged = self.git(&["diff", "--cached", "--name-only", "-z"])?;
        Ok(split_nul(&staged))
    }

    /// Commit whatever is staged.
    #[instrument(skip_all, fields(message))]
    pub fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "--quiet", "--no-verify", "-m", message])
            .map(drop)
    }

    /// Number of commits reachable from HEAD (0 before the first commit).
    #[cfg(any(test, feature = "test-support"))]
    pub fn commit_count(&self) -> Result<u32> {
        let out = self.output(&["rev-list", "--count", "HEAD"])?;
        if !out.status.success() {
            return Ok(0);
        }
        let text = String::from_utf8_lossy(&out.stdout);
        text.trim()
            .parse()
            .with_context(|| format!("parse commit count '{}'", text.trim()))
    }

    /// Run git and return stdout, failing on a non-zero exit.
    fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let out = self.output(args)?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(out.stdout)
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Split `-z` output into paths.
fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|path| !path.is_empty())
        .map(|path| String::from_utf8_lossy(path).into_owned())
        .collect()
}
