use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::classify::{
    classify_commit_failure, classify_pull_failure, classify_push_failure,
    classify_stage_failure, classify_upstream_failure, CommitFailure, PullFailure, PushFailure,
    StageFailure, UpstreamFailure,
};
use super::{CallContext, Commit, VcsError, VcsGateway};
use crate::config::Config;

const LOG_FORMAT: &str = "--pretty=%H%x00%an%x00%ae%x00%at%x00%s";

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Git working tree driven through the `git` executable.
#[derive(Debug)]
pub struct GitRepository {
    dir: PathBuf,
    remote: String,
    git_bin: String,
    timeout: Duration,
    lock: Mutex<()>,
}

impl GitRepository {
    /// Open the working tree at `dir`, cloning `remote` (or running `git init`
    /// when no remote is configured) if it is not a repository yet.
    pub async fn open(
        dir: impl Into<PathBuf>,
        remote: impl Into<String>,
        git_bin: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VcsError> {
        let repo = Self {
            dir: dir.into(),
            remote: remote.into().trim().to_string(),
            git_bin: git_bin.into(),
            timeout,
            lock: Mutex::new(()),
        };
        repo.ensure_clone().await?;
        Ok(repo)
    }

    pub async fn from_config(config: &Config) -> Result<Self, VcsError> {
        Self::open(
            config.repo_dir(),
            config.git.remote.clone(),
            config.git.bin.clone(),
            config.command_timeout(),
        )
        .await
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    async fn ensure_clone(&self) -> Result<(), VcsError> {
        if self.dir.join(".git").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let ctx = CallContext::background();
        let _guard = self.lock.lock().await;
        if self.remote.is_empty() {
            info!(dir = %self.dir.display(), "initializing local repository");
            self.git(&ctx, ["init"]).await?;
        } else {
            info!(
                remote = %self.remote,
                dir = %self.dir.display(),
                "cloning repository"
            );
            self.git(&ctx, ["clone", self.remote.as_str(), "."]).await?;
        }
        Ok(())
    }

    /// Run git and require a zero exit status; returns stdout.
    async fn git<I, S>(&self, ctx: &CallContext, args: I) -> Result<String, VcsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let output = self.git_output(ctx, &args).await?;
        if !output.success {
            return Err(command_error(&args, &output));
        }
        Ok(output.stdout)
    }

    async fn git_output<S: AsRef<str>>(
        &self,
        ctx: &CallContext,
        args: &[S],
    ) -> Result<GitOutput, VcsError> {
        let command = args
            .first()
            .map(|a| a.as_ref().to_string())
            .unwrap_or_default();
        let timeout = ctx.effective_timeout(self.timeout);
        if timeout.is_zero() {
            return Err(VcsError::Timeout { command, timeout });
        }

        let mut cmd = Command::new(&self.git_bin);
        cmd.current_dir(&self.dir)
            .arg("-c")
            .arg("credential.helper=")
            .args(args.iter().map(|a| a.as_ref()))
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(command = %command, dir = %self.dir.display(), "running git");
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %command, ?timeout, "git command timed out");
                return Err(VcsError::Timeout { command, timeout });
            }
        };

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn head_unlocked(&self, ctx: &CallContext) -> Result<Option<String>, VcsError> {
        let output = self
            .git_output(ctx, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?;
        if !output.success {
            return Ok(None);
        }
        let hash = output.stdout.trim();
        Ok((!hash.is_empty()).then(|| hash.to_string()))
    }

    async fn stage(&self, ctx: &CallContext, paths: &[String]) -> Result<(), VcsError> {
        let mut args = vec!["add".to_string()];
        if paths.is_empty() {
            args.push("--all".to_string());
        } else {
            args.push("--".to_string());
            args.extend(paths.iter().cloned());
        }

        let output = self.git_output(ctx, &args).await?;
        if output.success {
            return Ok(());
        }
        if paths.is_empty() || classify_stage_failure(&output.combined()) != StageFailure::NoMatch
        {
            return Err(command_error(&args, &output));
        }

        // Paths that vanished from disk can only be staged as removals.
        let mut fallback = vec![
            "add".to_string(),
            "--update".to_string(),
            "--".to_string(),
        ];
        fallback.extend(paths.iter().cloned());
        self.git(ctx, &fallback).await?;
        Ok(())
    }

    async fn commit_staged(
        &self,
        ctx: &CallContext,
        message: &str,
        author: &str,
    ) -> Result<GitOutput, VcsError> {
        let mut args = vec!["commit", "-m", message];
        if !author.trim().is_empty() {
            args.push("--author");
            args.push(author);
        }
        self.git_output(ctx, &args).await
    }
}

#[async_trait]
impl VcsGateway for GitRepository {
    fn work_dir(&self) -> &Path {
        &self.dir
    }

    fn has_remote(&self) -> bool {
        !self.remote.is_empty()
    }

    #[instrument(skip_all)]
    async fn pull(&self, ctx: &CallContext) -> Result<bool, VcsError> {
        if !self.has_remote() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;
        let before = self.head_unlocked(ctx).await?;

        let args = ["pull", "--ff-only"];
        let output = self.git_output(ctx, &args).await?;
        if !output.success {
            match classify_pull_failure(&output.combined()) {
                PullFailure::FastForwardBlocked => {
                    info!("fast-forward pull refused, retrying with rebase");
                    self.git(ctx, ["pull", "--rebase"]).await?;
                }
                PullFailure::UnfinishedMerge | PullFailure::Other => {
                    return Err(command_error(&args, &output));
                }
            }
        }

        let after = self.head_unlocked(ctx).await?;
        Ok(before != after)
    }

    #[instrument(skip_all)]
    async fn push(&self, ctx: &CallContext) -> Result<(), VcsError> {
        if !self.has_remote() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let args = ["push"];
        let output = self.git_output(ctx, &args).await?;
        if output.success {
            return Ok(());
        }
        let combined = output.combined();
        match classify_push_failure(&combined) {
            PushFailure::NonFastForward => Err(VcsError::RemoteAhead(combined)),
            PushFailure::Other => Err(command_error(&args, &output)),
        }
    }

    async fn fetch_and_is_remote_ahead(&self, ctx: &CallContext) -> Result<bool, VcsError> {
        if !self.has_remote() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;
        self.git(ctx, ["fetch", "--quiet"]).await?;

        let args = ["rev-list", "--left-right", "--count", "HEAD...@{u}"];
        let output = self.git_output(ctx, &args).await?;
        if !output.success {
            return match classify_upstream_failure(&output.combined()) {
                UpstreamFailure::MissingUpstream => Ok(false),
                UpstreamFailure::Other => Err(command_error(&args, &output)),
            };
        }
        let (_, behind) = parse_left_right_counts(&output.stdout)?;
        Ok(behind > 0)
    }

    async fn log(
        &self,
        ctx: &CallContext,
        path: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Commit>, bool), VcsError> {
        if page_size == 0 {
            return Err(VcsError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }
        let (skip, limit) = page_window(page, page_size)?;
        let _guard = self.lock.lock().await;
        let mut args = vec![
            "log".to_string(),
            format!("--skip={}", skip),
            format!("-n{}", limit),
            "--date=unix".to_string(),
            LOG_FORMAT.to_string(),
        ];
        let path = to_slash(path);
        if !path.is_empty() {
            args.push("--".to_string());
            args.push(path);
        }
        let stdout = self.git(ctx, &args).await?;
        let mut commits = parse_log(&stdout)?;
        let has_more = commits.len() > page_size;
        commits.truncate(page_size);
        Ok((commits, has_more))
    }

    async fn diff(
        &self,
        ctx: &CallContext,
        path: &str,
        from: &str,
        to: &str,
    ) -> Result<String, VcsError> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "from and to commit hashes are required".to_string(),
            ));
        }
        let _guard = self.lock.lock().await;
        let range = format!("{}..{}", from.trim(), to.trim());
        self.git(ctx, ["diff", range.as_str(), "--", to_slash(path).as_str()])
            .await
    }

    #[instrument(skip(self, ctx, message, author))]
    async fn commit(
        &self,
        ctx: &CallContext,
        paths: &[String],
        message: &str,
        author: &str,
    ) -> Result<(), VcsError> {
        if message.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "commit message required".to_string(),
            ));
        }
        let paths: Vec<String> = paths
            .iter()
            .map(|p| to_slash(p))
            .filter(|p| !p.is_empty())
            .collect();

        let _guard = self.lock.lock().await;
        self.stage(ctx, &paths).await?;

        let output = self.commit_staged(ctx, message, author).await?;
        if output.success {
            return Ok(());
        }
        match classify_commit_failure(&output.combined()) {
            CommitFailure::NothingStaged => {}
            CommitFailure::NoChanges => return Err(VcsError::NoChanges),
            CommitFailure::Other => return Err(command_error(&["commit"], &output)),
        }

        debug!("nothing staged for commit, staging all changes and retrying");
        self.git(ctx, ["add", "--all"]).await?;
        let retry = self.commit_staged(ctx, message, author).await?;
        if retry.success {
            return Ok(());
        }
        match classify_commit_failure(&retry.combined()) {
            CommitFailure::NoChanges => Err(VcsError::NoChanges),
            _ => Err(command_error(&["commit"], &retry)),
        }
    }

    async fn rename(&self, ctx: &CallContext, old: &str, new: &str) -> Result<(), VcsError> {
        let _guard = self.lock.lock().await;
        self.git(ctx, ["mv", to_slash(old).as_str(), to_slash(new).as_str()])
            .await?;
        Ok(())
    }

    async fn soft_reset(&self, ctx: &CallContext, target: &str) -> Result<(), VcsError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(VcsError::InvalidArgument(
                "reset target required".to_string(),
            ));
        }
        let _guard = self.lock.lock().await;
        warn!(target, "soft-resetting repository");
        self.git(ctx, ["reset", "--soft", target]).await?;
        Ok(())
    }

    async fn head(&self, ctx: &CallContext) -> Result<Option<String>, VcsError> {
        let _guard = self.lock.lock().await;
        self.head_unlocked(ctx).await
    }

    async fn list_tracked(&self, ctx: &CallContext) -> Result<Vec<String>, VcsError> {
        let _guard = self.lock.lock().await;
        let stdout = self.git(ctx, ["ls-files", "-z"]).await?;
        Ok(stdout
            .split('\0')
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn command_error<S: AsRef<str>>(args: &[S], output: &GitOutput) -> VcsError {
    VcsError::Command {
        command: args
            .first()
            .map(|a| a.as_ref().to_string())
            .unwrap_or_default(),
        output: output.combined(),
    }
}

/// `--skip` and `-n` values for one history page, fetching one extra entry
/// to detect whether more pages follow.
fn page_window(page: usize, page_size: usize) -> Result<(usize, usize), VcsError> {
    let skip = page
        .checked_mul(page_size)
        .ok_or_else(|| VcsError::InvalidArgument(format!("history page {} out of range", page)))?;
    let limit = page_size.checked_add(1).ok_or_else(|| {
        VcsError::InvalidArgument(format!("history page size {} out of range", page_size))
    })?;
    Ok((skip, limit))
}

fn to_slash(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Parse `rev-list --left-right --count` output into (ahead, behind).
fn parse_left_right_counts(output: &str) -> Result<(u64, u64), VcsError> {
    let mut fields = output.split_whitespace();
    let mut next = || -> Result<u64, VcsError> {
        fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| VcsError::Parse(format!("rev-list counts: {:?}", output.trim())))
    };
    let ahead = next()?;
    let behind = next()?;
    Ok((ahead, behind))
}

fn parse_log(output: &str) -> Result<Vec<Commit>, VcsError> {
    let mut commits = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split('\0').collect();
        if parts.len() != 5 {
            continue;
        }
        let seconds: i64 = parts[3]
            .trim()
            .parse()
            .map_err(|_| VcsError::Parse(format!("commit timestamp {:?}", parts[3])))?;
        let committed_at = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| VcsError::Parse(format!("commit timestamp {}", seconds)))?;
        commits.push(Commit {
            hash: parts[0].to_string(),
            author: parts[1].to_string(),
            email: parts[2].to_string(),
            message: parts[4].to_string(),
            committed_at,
        });
    }
    Ok(commits)
}
