//! Shared fixtures: a scripted in-memory gateway and minimal templates.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;

use gitwiki_core::page::{PageData, PageTemplates, TemplateError};
use gitwiki_core::vcs::{CallContext, Commit, VcsError, VcsGateway};
use gitwiki_core::{Config, MarkdownRenderer, SiteService};

#[derive(Debug, Clone)]
pub struct RecordedCommit {
    pub commit: Commit,
    pub paths: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub commits: Vec<RecordedCommit>,
    pub tracked: BTreeSet<String>,
    /// Answers for successive freshness checks; `false` once exhausted.
    pub ahead: VecDeque<bool>,
    /// Answers for successive pulls; `false` once exhausted.
    pub pulls: VecDeque<bool>,
    pub reject_push: bool,
    pub fail_reset: bool,
    pub pushes: usize,
    pub resets: Vec<String>,
}

/// Gateway over a plain directory that records every call.
pub struct FakeVcs {
    dir: PathBuf,
    remote: bool,
    pub state: Mutex<FakeState>,
    /// Commits wait on this lock; a test holds it to park an edit mid-commit.
    pub hold_commits: tokio::sync::Mutex<()>,
}

impl FakeVcs {
    pub fn new(dir: &Path, remote: bool) -> Self {
        fs::create_dir_all(dir).unwrap();
        Self {
            dir: dir.to_path_buf(),
            remote,
            state: Mutex::new(FakeState::default()),
            hold_commits: tokio::sync::Mutex::new(()),
        }
    }

    fn full(&self, rel: &str) -> PathBuf {
        let mut path = self.dir.clone();
        path.extend(rel.split('/'));
        path
    }

    /// Write and commit a document outside of any transaction.
    pub fn seed(&self, rel: &str, content: impl AsRef<[u8]>) -> String {
        let full = self.full(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
        let mut state = self.state.lock();
        state.tracked.insert(rel.to_string());
        record(&mut state, &[rel.to_string()], &format!("seed {}", rel), "Seeder <seed@localhost>")
    }

    pub fn script_ahead(&self, answers: &[bool]) {
        self.state.lock().ahead.extend(answers.iter().copied());
    }

    pub fn script_pulls(&self, answers: &[bool]) {
        self.state.lock().pulls.extend(answers.iter().copied());
    }

    pub fn head_hash(&self) -> Option<String> {
        self.state.lock().commits.last().map(|c| c.commit.hash.clone())
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().commits.len()
    }

    pub fn last_message(&self) -> Option<String> {
        self.state
            .lock()
            .commits
            .last()
            .map(|c| c.commit.message.clone())
    }
}

fn record(state: &mut FakeState, paths: &[String], message: &str, author: &str) -> String {
    let n = state.commits.len() as i64 + 1;
    let hash = format!("{:040x}", n);
    let committed_at: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000 + n * 60, 0).unwrap();
    state.commits.push(RecordedCommit {
        commit: Commit {
            hash: hash.clone(),
            author: author.to_string(),
            email: String::new(),
            message: message.to_string(),
            committed_at,
        },
        paths: paths.to_vec(),
    });
    hash
}

#[async_trait]
impl VcsGateway for FakeVcs {
    fn work_dir(&self) -> &Path {
        &self.dir
    }

    fn has_remote(&self) -> bool {
        self.remote
    }

    async fn pull(&self, _ctx: &CallContext) -> Result<bool, VcsError> {
        Ok(self.state.lock().pulls.pop_front().unwrap_or(false))
    }

    async fn push(&self, _ctx: &CallContext) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.pushes += 1;
        if state.reject_push {
            return Err(VcsError::RemoteAhead(
                " ! [rejected] main -> main (fetch first)".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_and_is_remote_ahead(&self, _ctx: &CallContext) -> Result<bool, VcsError> {
        Ok(self.state.lock().ahead.pop_front().unwrap_or(false))
    }

    async fn log(
        &self,
        _ctx: &CallContext,
        path: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Commit>, bool), VcsError> {
        if page_size == 0 {
            return Err(VcsError::InvalidArgument("page size must be positive".into()));
        }
        let state = self.state.lock();
        let mut matching: Vec<Commit> = state
            .commits
            .iter()
            .rev()
            .filter(|c| path.is_empty() || c.paths.iter().any(|p| p == path))
            .map(|c| c.commit.clone())
            .skip(page * page_size)
            .take(page_size + 1)
            .collect();
        let has_more = matching.len() > page_size;
        matching.truncate(page_size);
        Ok((matching, has_more))
    }

    async fn diff(
        &self,
        _ctx: &CallContext,
        path: &str,
        from: &str,
        to: &str,
    ) -> Result<String, VcsError> {
        Ok(format!("diff {} {}..{}", path, from, to))
    }

    async fn commit(
        &self,
        _ctx: &CallContext,
        paths: &[String],
        message: &str,
        author: &str,
    ) -> Result<(), VcsError> {
        let _hold = self.hold_commits.lock().await;
        let mut state = self.state.lock();
        for path in paths {
            if self.full(path).exists() {
                state.tracked.insert(path.clone());
            } else {
                state.tracked.remove(path);
            }
        }
        record(&mut state, paths, message, author);
        Ok(())
    }

    async fn rename(&self, _ctx: &CallContext, old: &str, new: &str) -> Result<(), VcsError> {
        fs::rename(self.full(old), self.full(new))?;
        let mut state = self.state.lock();
        state.tracked.remove(old);
        state.tracked.insert(new.to_string());
        Ok(())
    }

    async fn soft_reset(&self, _ctx: &CallContext, target: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.resets.push(target.to_string());
        if state.fail_reset {
            return Err(VcsError::Command {
                command: "reset".to_string(),
                output: "fatal: unable to write new index file".to_string(),
            });
        }
        match state.commits.iter().position(|c| c.commit.hash == target) {
            Some(index) => state.commits.truncate(index + 1),
            None => {
                state.commits.pop();
            }
        }
        Ok(())
    }

    async fn head(&self, _ctx: &CallContext) -> Result<Option<String>, VcsError> {
        Ok(self.head_hash())
    }

    async fn list_tracked(&self, _ctx: &CallContext) -> Result<Vec<String>, VcsError> {
        Ok(self.state.lock().tracked.iter().cloned().collect())
    }
}

/// Bare-bones page shell; enough to assert on what reaches the output.
pub struct StubTemplates;

impl PageTemplates for StubTemplates {
    fn render_page(&self, data: &PageData) -> Result<String, TemplateError> {
        Ok(format!(
            "<html><head><title>{}</title></head><body data-kind=\"{:?}\">{}</body></html>",
            data.page_title, data.kind, data.content_html
        ))
    }

    fn write_assets(&self, dest: &Path) -> Result<(), TemplateError> {
        fs::create_dir_all(dest)?;
        fs::write(dest.join("site.css"), "body {}")?;
        Ok(())
    }
}

pub struct Harness {
    pub root: TempDir,
    pub vcs: Arc<FakeVcs>,
    pub service: SiteService,
}

impl Harness {
    /// Service over a fake gateway. `yaml` is extra configuration.
    pub fn new(yaml: &str, remote: bool) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::from_yaml(yaml).unwrap();
        config.paths.repo = root.path().join("repo");
        config.paths.output = root.path().join("dist");

        let vcs = Arc::new(FakeVcs::new(&config.paths.repo, remote));
        let service = SiteService::new(
            config,
            vcs.clone(),
            Arc::new(MarkdownRenderer::new()),
            Arc::new(StubTemplates),
        );
        Self { root, vcs, service }
    }

    pub fn editable() -> Self {
        Self::new("editable: true", true)
    }

    pub fn output(&self) -> PathBuf {
        self.root.path().join("dist")
    }

    pub fn repo(&self) -> PathBuf {
        self.root.path().join("repo")
    }
}
