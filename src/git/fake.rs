//! In-memory [`GitOperations`] used by unit tests.
//!
//! Models just enough repository state (head, branches, dirtiness, stash
//! depth) for saga steps and compensations to be checked, and records every
//! call in order. Any operation can be made to fail by name.

use crate::error::{GitError, Result};
use crate::git::{CloneRequest, GitOperations, HeadRef, ProgressFn};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct FakeState {
    head: HeadRef,
    sha: String,
    clean: bool,
    stashes: usize,
    branches: BTreeSet<String>,
    default_branch: Option<String>,
    calls: Vec<String>,
    failures: HashMap<String, String>,
    /// Whether a stash push records a new entry (git no-ops on a clean tree)
    stash_creates_entry: bool,
    /// Pull moves to this sha on success
    upstream_sha: String,
    /// A failing clone writes partial output first
    partial_clone: bool,
    /// A failing command leaves `index.lock` behind, like a crashed git
    crash_leaves_lock: bool,
}

#[derive(Debug)]
pub(crate) struct FakeGit {
    work_dir: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeGit {
    pub(crate) fn new(work_dir: impl Into<PathBuf>) -> Self {
        let mut branches = BTreeSet::new();
        branches.insert("main".to_string());
        Self {
            work_dir: work_dir.into(),
            state: Mutex::new(FakeState {
                head: HeadRef::Branch("main".to_string()),
                sha: "a".repeat(40),
                clean: true,
                stashes: 0,
                branches,
                default_branch: Some("main".to_string()),
                calls: Vec::new(),
                failures: HashMap::new(),
                stash_creates_entry: true,
                upstream_sha: "b".repeat(40),
                partial_clone: true,
                crash_leaves_lock: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make every call to `op` fail with `stderr`
    pub(crate) fn fail(&self, op: &str, stderr: &str) -> &Self {
        self.state()
            .failures
            .insert(op.to_string(), stderr.to_string());
        self
    }

    pub(crate) fn set_dirty(&self) -> &Self {
        self.state().clean = false;
        self
    }

    pub(crate) fn add_branch(&self, name: &str) -> &Self {
        self.state().branches.insert(name.to_string());
        self
    }

    pub(crate) fn set_head(&self, head: HeadRef) -> &Self {
        self.state().head = head;
        self
    }

    pub(crate) fn stash_is_noop(&self) -> &Self {
        self.state().stash_creates_entry = false;
        self
    }

    pub(crate) fn crash_leaves_lock(&self) -> &Self {
        self.state().crash_leaves_lock = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn head(&self) -> HeadRef {
        self.state().head.clone()
    }

    pub(crate) fn sha(&self) -> String {
        self.state().sha.clone()
    }

    pub(crate) fn clean(&self) -> bool {
        self.state().clean
    }

    pub(crate) fn stashes(&self) -> usize {
        self.state().stashes
    }

    pub(crate) fn branches(&self) -> Vec<String> {
        self.state().branches.iter().cloned().collect()
    }

    /// Record `call` and fail if `op` is set to fail
    fn enter(&self, op: &str, call: String) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(call.clone());
        if let Some(stderr) = state.failures.get(op) {
            if state.crash_leaves_lock {
                let marker = crate::lock::ExternalLockDetector::lock_path(&self.work_dir);
                let _ = std::fs::write(marker, b"");
            }
            return Err(GitError::CommandFailed {
                command: format!("git {call}"),
                code: Some(1),
                stderr: stderr.clone(),
            }
            .into());
        }
        Ok(state)
    }
}

impl GitOperations for FakeGit {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn head_sha(&self) -> Result<String> {
        let state = self.enter("head_sha", "rev-parse HEAD".into())?;
        Ok(state.sha.clone())
    }

    async fn current_head(&self) -> Result<HeadRef> {
        let state = self.enter("current_head", "symbolic-ref HEAD".into())?;
        Ok(state.head.clone())
    }

    async fn is_clean(&self) -> Result<bool> {
        let state = self.enter("is_clean", "status".into())?;
        Ok(state.clean)
    }

    async fn stash_count(&self) -> Result<usize> {
        let state = self.enter("stash_count", "stash list".into())?;
        Ok(state.stashes)
    }

    async fn stash_push(&self, message: &str, include_untracked: bool) -> Result<()> {
        let flag = if include_untracked { " -u" } else { "" };
        let mut state = self.enter("stash_push", format!("stash push{flag} -m {message}"))?;
        if state.stash_creates_entry && !state.clean {
            state.stashes += 1;
            state.clean = true;
        }
        Ok(())
    }

    async fn stash_pop(&self) -> Result<()> {
        let mut state = self.enter("stash_pop", "stash pop".into())?;
        if state.stashes == 0 {
            return Err(GitError::CommandFailed {
                command: "git stash pop".into(),
                code: Some(1),
                stderr: "No stash entries found.".into(),
            }
            .into());
        }
        state.stashes -= 1;
        state.clean = false;
        Ok(())
    }

    async fn pull(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        let call = match branch {
            Some(b) => format!("pull {remote} {b}"),
            None => format!("pull {remote}"),
        };
        let mut state = self.enter("pull", call)?;
        state.sha = state.upstream_sha.clone();
        Ok(())
    }

    async fn fetch(&self, remote: &str) -> Result<()> {
        self.enter("fetch", format!("fetch {remote}"))?;
        Ok(())
    }

    async fn reset_hard(&self, rev: &str) -> Result<()> {
        let mut state = self.enter("reset_hard", format!("reset --hard {rev}"))?;
        state.sha = rev.to_string();
        state.clean = true;
        Ok(())
    }

    async fn reset_index(&self) -> Result<()> {
        self.enter("reset_index", "reset".into())?;
        Ok(())
    }

    async fn restore_worktree(&self) -> Result<()> {
        self.enter("restore_worktree", "restore .".into())?;
        Ok(())
    }

    async fn clean_untracked(&self) -> Result<()> {
        let mut state = self.enter("clean_untracked", "clean -fd".into())?;
        state.clean = true;
        Ok(())
    }

    async fn checkout(&self, target: &str) -> Result<()> {
        let mut state = self.enter("checkout", format!("checkout {target}"))?;
        state.head = if state.branches.contains(target) {
            HeadRef::Branch(target.to_string())
        } else {
            HeadRef::Detached(target.to_string())
        };
        Ok(())
    }

    async fn create_branch(&self, name: &str, start_point: Option<&str>) -> Result<()> {
        let call = match start_point {
            Some(start) => format!("checkout -b {name} {start}"),
            None => format!("checkout -b {name}"),
        };
        let mut state = self.enter("create_branch", call)?;
        if !state.branches.insert(name.to_string()) {
            return Err(GitError::CommandFailed {
                command: format!("git checkout -b {name}"),
                code: Some(128),
                stderr: format!("fatal: a branch named '{name}' already exists"),
            }
            .into());
        }
        state.head = HeadRef::Branch(name.to_string());
        Ok(())
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        let mut state = self.enter("delete_branch", format!("branch {flag} {name}"))?;
        state.branches.remove(name);
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        let state = self.enter("branch_exists", format!("show-ref {name}"))?;
        Ok(state.branches.contains(name))
    }

    async fn default_branch(&self, remote: &str) -> Result<String> {
        let state = self.enter("default_branch", format!("default-branch {remote}"))?;
        state.default_branch.clone().ok_or_else(|| {
            GitError::DefaultBranchUnknown {
                remote: remote.to_string(),
            }
            .into()
        })
    }

    async fn clone_repo(&self, request: &CloneRequest, progress: Option<&ProgressFn>) -> Result<()> {
        let call = format!("clone {} {}", request.url, request.target.display());
        let (failure, partial) = {
            let mut state = self.state();
            state.calls.push(call.clone());
            (state.failures.get("clone_repo").cloned(), state.partial_clone)
        };

        if let Some(callback) = progress {
            callback(&crate::git::CloneProgress {
                stage: "Receiving objects".into(),
                percent: 50,
            });
        }

        if let Some(stderr) = failure {
            if partial {
                std::fs::create_dir_all(request.target.join(".git"))?;
                std::fs::write(request.target.join("partial.pack"), b"half")?;
            }
            return Err(GitError::CommandFailed {
                command: format!("git {call}"),
                code: Some(128),
                stderr,
            }
            .into());
        }

        std::fs::create_dir_all(request.target.join(".git"))?;
        std::fs::write(request.target.join("README.md"), b"cloned")?;
        Ok(())
    }
}
