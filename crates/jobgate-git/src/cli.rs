//! Working copies backed by the `git` binary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::client::{RepoClient, RepoClientFactory};
use crate::{GitError, GitResult};

/// Author used for local merge commits; they are never pushed.
const MERGE_IDENTITY: [&str; 4] = [
    "-c",
    "user.name=jobgate",
    "-c",
    "user.email=jobgate@localhost",
];

/// Clones repositories from `{base_url}/{org}/{repo}` into a cache directory.
pub struct GitCliFactory {
    /// Remote base, e.g. `https://github.com`.
    base_url: String,
    /// Base directory for cloned repositories
    work_dir: PathBuf,
    access_token: Option<String>,
}

impl GitCliFactory {
    pub fn new(base_url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            work_dir: work_dir.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Local path for a repository; stable across restarts.
    pub fn repo_path(&self, org: &str, repo: &str) -> PathBuf {
        let repo_hash = format!("{:x}", md5::compute(format!("{org}/{repo}")));
        self.work_dir.join(repo_hash)
    }

    fn remote_url(&self, org: &str, repo: &str) -> String {
        let url = format!("{}/{}/{}.git", self.base_url, org, repo);
        match (&self.access_token, url.strip_prefix("https://")) {
            // https://github.com/owner/repo.git -> https://token@github.com/owner/repo.git
            (Some(token), Some(rest)) => format!("https://{}@{}", token, rest),
            _ => url,
        }
    }
}

#[async_trait]
impl RepoClientFactory for GitCliFactory {
    async fn client_for(&self, org: &str, repo: &str) -> GitResult<Box<dyn RepoClient>> {
        if org.is_empty() || repo.is_empty() {
            return Err(GitError::InvalidIdentifier(format!("{org}/{repo}")));
        }
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let path = self.repo_path(org, repo);
        let client = GitCliClient {
            dir: path.clone(),
            secret: self.access_token.clone(),
        };

        if path.join(".git").exists() {
            // Left over from a previous process; reuse instead of re-cloning.
            debug!(org, repo, path = %path.display(), "Reusing existing clone");
            client.fetch().await?;
            return Ok(Box::new(client));
        }
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }

        info!(org, repo, path = %path.display(), "Cloning repository");
        let path_str = path.to_string_lossy().to_string();
        run_git(
            &self.work_dir,
            &["clone", "--no-tags", &self.remote_url(org, repo), &path_str],
            self.access_token.as_deref(),
        )
        .await?;
        info!(org, repo, "Repository cloned successfully");

        Ok(Box::new(client))
    }
}

/// A clone on local disk.
pub struct GitCliClient {
    dir: PathBuf,
    secret: Option<String>,
}

impl GitCliClient {
    async fn git(&self, args: &[&str]) -> GitResult<String> {
        run_git(&self.dir, args, self.secret.as_deref()).await
    }

    async fn has_commit(&self, sha: &str) -> bool {
        let object = format!("{sha}^{{commit}}");
        self.git(&["cat-file", "-e", &object]).await.is_ok()
    }

    /// Fetch a revision by SHA when it is not reachable from any fetched ref.
    async fn ensure_commit(&self, sha: &str) -> GitResult<()> {
        if !self.has_commit(sha).await {
            debug!(sha, "Fetching missing revision");
            self.git(&["fetch", "origin", sha]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RepoClient for GitCliClient {
    fn directory(&self) -> &Path {
        &self.dir
    }

    async fn fetch(&self) -> GitResult<()> {
        self.git(&["fetch", "--prune", "origin"]).await?;
        Ok(())
    }

    async fn checkout(&self, revision: &str) -> GitResult<()> {
        self.ensure_commit(revision).await?;
        self.git(&["checkout", "--force", "--detach", revision]).await?;
        Ok(())
    }

    async fn merge_and_checkout(&self, base: &str, heads: &[String]) -> GitResult<()> {
        self.checkout(base).await?;
        if heads.is_empty() {
            return Ok(());
        }
        for head in heads {
            self.ensure_commit(head).await?;
        }

        let mut args: Vec<&str> = MERGE_IDENTITY.to_vec();
        args.extend(["merge", "--no-ff", "--no-stat", "-m", "jobgate merge"]);
        args.extend(heads.iter().map(String::as_str));

        if let Err(err) = self.git(&args).await {
            if let Err(abort) = self.git(&["merge", "--abort"]).await {
                warn!(error = %abort, "Failed to abort merge");
            }
            let stderr = match err {
                GitError::CommandFailed { stderr, .. } => stderr,
                other => other.to_string(),
            };
            return Err(GitError::MergeConflict {
                base: base.to_string(),
                heads: heads.join(","),
                stderr,
            });
        }
        Ok(())
    }

    async fn clean(&self) -> GitResult<()> {
        self.git(&["reset", "--hard"]).await?;
        self.git(&["clean", "-ffdx"]).await?;
        Ok(())
    }

    async fn close(&self) -> GitResult<()> {
        if self.dir.exists() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}

async fn run_git(dir: &Path, args: &[&str], secret: Option<&str>) -> GitResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        // Don't leak the token through error messages
        let stderr = match secret {
            Some(token) if !token.is_empty() => stderr.replace(token, "[REDACTED]"),
            _ => stderr,
        };
        let command = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .copied()
            .unwrap_or("")
            .to_string();
        return Err(GitError::CommandFailed { command, stderr });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
