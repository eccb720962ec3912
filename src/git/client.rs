//! Subprocess git client.
//!
//! Every git call is a child process. The only surface consumed is the
//! working directory, a few environment variables and the cancellation token:
//!
//! - `GIT_TERMINAL_PROMPT=0` so credential prompts fail instead of hanging
//! - `LC_ALL=C` so output we parse is not localized
//! - `GIT_OPTIONAL_LOCKS=0` on read handles, so inspection commands such as
//!   `git status` do not take the index lock and contend with writers
//!
//! A cancelled token kills the child (`kill_on_drop`) and surfaces
//! [`GitError::Aborted`]. Only the first command to observe the cancellation
//! is aborted; commands issued afterwards, such as saga compensations, run to
//! completion.

use crate::error::{GitError, Result};
use crate::git::progress::LineSplitter;
use crate::git::{CloneProgress, CloneRequest, GitOperations, HeadRef, ProgressFn, redact_url};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Environment variable overriding the git executable
pub const GIT_BINARY_ENV: &str = "KODEGEN_GIT_BINARY";

/// Lines of stderr kept for error messages from streamed commands
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a successful git command
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error (git writes progress and hints here)
    pub stderr: String,
}

/// Handle for running git in one work tree
#[derive(Debug, Clone)]
pub struct GitClient {
    binary: PathBuf,
    work_dir: PathBuf,
    optional_locks: bool,
    cancel: Option<CancellationToken>,
    aborted: Arc<AtomicBool>,
}

impl GitClient {
    /// Create a client for `work_dir` using an explicit git executable
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            optional_locks: true,
            cancel: None,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a client for `work_dir`, locating git on `PATH`
    pub fn discover(work_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(locate_git()?, work_dir))
    }

    /// Same client with git's optional locks disabled (for read paths)
    pub fn read_only(mut self) -> Self {
        self.optional_locks = false;
        self
    }

    /// Same client bound to a cancellation token
    pub fn with_cancellation(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self.aborted = Arc::new(AtomicBool::new(false));
        self
    }

    /// Git executable in use
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether optional locks are disabled
    pub fn is_read_only(&self) -> bool {
        !self.optional_locks
    }

    /// Run git in the work tree and return its output; non-zero exit is an error
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        self.run_in(&self.work_dir, args).await
    }

    /// Run git where exit code 0 means `true` and 1 means `false`
    pub async fn run_status(&self, args: &[&str]) -> Result<bool> {
        let display = display_command(args);
        let output = self
            .wait_output(self.command(&self.work_dir, args), &display)
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(GitError::CommandFailed {
                command: display,
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into()),
        }
    }

    async fn run_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        let display = display_command(args);
        log::debug!("{} (in {})", display, dir.display());
        let output = self.wait_output(self.command(dir, args), &display).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: display,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }
        Ok(GitOutput { stdout, stderr })
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.optional_locks {
            cmd.env("GIT_OPTIONAL_LOCKS", "0");
        }
        cmd
    }

    fn spawn(&self, cmd: &mut Command, display: &str) -> Result<tokio::process::Child> {
        cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                GitError::NotFound {
                    reason: format!("{} ({})", self.binary.display(), source),
                }
                .into()
            } else {
                GitError::SpawnFailed {
                    command: display.to_string(),
                    source,
                }
                .into()
            }
        })
    }

    /// Token that may still abort a command
    fn live_token(&self) -> Option<&CancellationToken> {
        if self.aborted.load(Ordering::Acquire) {
            None
        } else {
            self.cancel.as_ref()
        }
    }

    async fn wait_output(&self, mut cmd: Command, display: &str) -> Result<std::process::Output> {
        let child = self.spawn(&mut cmd, display)?;
        let waited = match self.live_token() {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.aborted.store(true, Ordering::Release);
                        log::warn!("{} aborted", display);
                        return Err(GitError::Aborted { command: display.to_string() }.into());
                    }
                    out = child.wait_with_output() => out,
                }
            }
            None => child.wait_with_output().await,
        };
        Ok(waited?)
    }

    /// Run a clone, streaming stderr progress to `progress`
    async fn clone_streaming(
        &self,
        request: &CloneRequest,
        progress: Option<&ProgressFn>,
    ) -> Result<()> {
        // Run in the parent so a relative target is not resolved twice.
        let Some(dir_name) = request.target.file_name() else {
            return Err(GitError::InvalidTarget {
                path: request.target.clone(),
                reason: "target has no directory name".to_string(),
            }
            .into());
        };
        let target = dir_name.to_string_lossy().into_owned();
        let depth = request.depth.map(|d| d.to_string());
        let mut args: Vec<&str> = vec!["clone", "--progress"];
        if let Some(branch) = &request.branch {
            args.extend(["--branch", branch.as_str()]);
        }
        if let Some(depth) = &depth {
            args.extend(["--depth", depth.as_str()]);
        }
        args.extend(["--", request.url.as_str(), target.as_str()]);

        let parent = match request.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        let display = format!(
            "git clone {} {}",
            redact_url(&request.url),
            request.target.display()
        );
        log::info!("{}", display);

        let mut cmd = self.command(&parent, &args);
        let mut child = self.spawn(&mut cmd, &display)?;
        let stderr = child.stderr.take();

        let drive = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(mut stderr) = stderr {
                let mut splitter = LineSplitter::default();
                let mut buf = [0u8; 4096];
                loop {
                    let n = stderr.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    for line in splitter.push(&buf[..n]) {
                        handle_clone_line(line, progress, &mut tail);
                    }
                }
                if let Some(line) = splitter.finish() {
                    handle_clone_line(line, progress, &mut tail);
                }
            }
            let status: ExitStatus = child.wait().await?;
            Ok::<_, std::io::Error>((status, tail))
        };

        let (status, tail) = match self.live_token() {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.aborted.store(true, Ordering::Release);
                        log::warn!("{} aborted", display);
                        return Err(GitError::Aborted { command: display }.into());
                    }
                    out = drive => out?,
                }
            }
            None => drive.await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(GitError::CommandFailed {
                command: display,
                code: status.code(),
                stderr: Vec::from(tail).join("\n"),
            }
            .into())
        }
    }
}

fn handle_clone_line(line: String, progress: Option<&ProgressFn>, tail: &mut VecDeque<String>) {
    if let Some(update) = CloneProgress::parse(&line) {
        if let Some(callback) = progress {
            callback(&update);
        }
        return;
    }
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

fn display_command(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

/// Locate the git executable: `KODEGEN_GIT_BINARY` first, then `PATH`
pub fn locate_git() -> Result<PathBuf> {
    if let Some(explicit) = std::env::var_os(GIT_BINARY_ENV) {
        return Ok(PathBuf::from(explicit));
    }
    which::which("git").map_err(|e| {
        GitError::NotFound {
            reason: e.to_string(),
        }
        .into()
    })
}

impl GitOperations for GitClient {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn head_sha(&self) -> Result<String> {
        let out = self.run(&["rev-parse", "HEAD"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn current_head(&self) -> Result<HeadRef> {
        let out = self
            .wait_output(
                self.command(&self.work_dir, &["symbolic-ref", "--quiet", "--short", "HEAD"]),
                "git symbolic-ref --quiet --short HEAD",
            )
            .await?;
        if output_ok(&out) {
            return Ok(HeadRef::Branch(
                String::from_utf8_lossy(&out.stdout).trim().to_string(),
            ));
        }
        Ok(HeadRef::Detached(self.head_sha().await?))
    }

    async fn is_clean(&self) -> Result<bool> {
        let out = self.run(&["status", "--porcelain"]).await?;
        Ok(out.stdout.trim().is_empty())
    }

    async fn stash_count(&self) -> Result<usize> {
        let out = self.run(&["stash", "list"]).await?;
        Ok(out.stdout.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn stash_push(&self, message: &str, include_untracked: bool) -> Result<()> {
        let mut args = vec!["stash", "push"];
        if include_untracked {
            args.push("--include-untracked");
        }
        args.extend(["-m", message]);
        self.run(&args).await.map(|_| ())
    }

    async fn stash_pop(&self) -> Result<()> {
        self.run(&["stash", "pop"]).await.map(|_| ())
    }

    async fn pull(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        let mut args = vec!["pull", "--no-rebase", "--no-edit", remote];
        if let Some(branch) = branch {
            args.push(branch);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run(&["fetch", "--prune", remote]).await.map(|_| ())
    }

    async fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["reset", "--hard", rev]).await.map(|_| ())
    }

    async fn reset_index(&self) -> Result<()> {
        self.run(&["reset", "--quiet"]).await.map(|_| ())
    }

    async fn restore_worktree(&self) -> Result<()> {
        self.run(&["restore", "."]).await.map(|_| ())
    }

    async fn clean_untracked(&self) -> Result<()> {
        self.run(&["clean", "-fd"]).await.map(|_| ())
    }

    async fn checkout(&self, target: &str) -> Result<()> {
        self.run(&["checkout", target]).await.map(|_| ())
    }

    async fn create_branch(&self, name: &str, start_point: Option<&str>) -> Result<()> {
        let mut args = vec!["checkout", "-b", name];
        if let Some(start) = start_point {
            args.push(start);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name]).await.map(|_| ())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{name}");
        self.run_status(&["show-ref", "--verify", "--quiet", &refname])
            .await
    }

    async fn default_branch(&self, remote: &str) -> Result<String> {
        let symbolic = format!("refs/remotes/{remote}/HEAD");
        if let Ok(out) = self
            .run(&["symbolic-ref", "--quiet", "--short", &symbolic])
            .await
        {
            let short = out.stdout.trim();
            let prefix = format!("{remote}/");
            if let Some(name) = short.strip_prefix(&prefix)
                && !name.is_empty()
            {
                return Ok(name.to_string());
            }
        }

        for candidate in ["main", "master"] {
            let remote_ref = format!("refs/remotes/{remote}/{candidate}");
            if self
                .run_status(&["show-ref", "--verify", "--quiet", &remote_ref])
                .await?
                || self.branch_exists(candidate).await?
            {
                return Ok(candidate.to_string());
            }
        }

        Err(GitError::DefaultBranchUnknown {
            remote: remote.to_string(),
        }
        .into())
    }

    async fn clone_repo(&self, request: &CloneRequest, progress: Option<&ProgressFn>) -> Result<()> {
        self.clone_streaming(request, progress).await
    }
}

fn output_ok(output: &std::process::Output) -> bool {
    output.status.success()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_and_cancellation_are_layered() {
        let token = CancellationToken::new();
        let client = GitClient::new("git", "/tmp/repo")
            .read_only()
            .with_cancellation(Some(token));

        assert!(client.is_read_only());
        assert_eq!(client.work_dir(), Path::new("/tmp/repo"));
        assert!(client.cancel.is_some());
        assert!(!GitClient::new("git", "/tmp/repo").is_read_only());
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_not_found() {
        let temp = tempfile::TempDir::new().expect("create temp dir");
        let client = GitClient::new(temp.path().join("no-such-git"), temp.path());

        let err = client.run(&["status"]).await.expect_err("spawn must fail");
        assert!(matches!(
            err,
            crate::error::OperationError::Git(GitError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_completion() {
        let Ok(git) = locate_git() else {
            return;
        };
        let temp = tempfile::TempDir::new().expect("create temp dir");
        let token = CancellationToken::new();
        token.cancel();
        let client = GitClient::new(git, temp.path()).with_cancellation(Some(token));

        let err = client.run(&["--version"]).await.expect_err("must abort");
        assert!(matches!(
            err,
            crate::error::OperationError::Git(GitError::Aborted { .. })
        ));

        // Compensations issued after the abort still run
        let out = client.run(&["--version"]).await.expect("second command runs");
        assert!(out.stdout.starts_with("git version"));
    }

    #[test]
    fn clone_lines_feed_progress_or_tail() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Arc<ProgressFn> =
            Arc::new(move |p: &CloneProgress| sink.lock().unwrap().push(p.percent));
        let mut tail = VecDeque::new();

        handle_clone_line("Receiving objects:  50% (1/2)".into(), Some(&*callback), &mut tail);
        handle_clone_line("fatal: could not read from remote".into(), Some(&*callback), &mut tail);

        assert_eq!(*seen.lock().unwrap(), vec![50]);
        assert_eq!(tail, ["fatal: could not read from remote"]);
    }

    #[test]
    fn stderr_tail_keeps_only_the_latest_lines() {
        let mut tail = VecDeque::new();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            handle_clone_line(format!("remote: line {i}"), None, &mut tail);
        }

        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.front().map(String::as_str), Some("remote: line 5"));
        let last = format!("remote: line {}", STDERR_TAIL_LINES + 4);
        assert_eq!(tail.back(), Some(&last));
    }
}
