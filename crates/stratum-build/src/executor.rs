//! Execution of `RUN` steps.
//!
//! The engine hands each command to a [`StepExecutor`]. The host executor
//! runs it as a plain child process inside the build root; sandboxed
//! executors plug in behind the same trait.

use std::path::PathBuf;

use stratum_common::constants::{DEFAULT_PATH, ROOTFS_ENV};
use stratum_common::error::{Result, StratumError};

/// A command to run against a build root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Program and arguments.
    pub argv: Vec<String>,
    /// Environment set by the recipe so far.
    pub env: Vec<(String, String)>,
    /// Absolute working directory inside the build root.
    pub workdir: String,
    /// Host path of the build root.
    pub rootfs: PathBuf,
}

impl RunRequest {
    /// Host directory matching `workdir`.
    #[must_use]
    pub fn host_workdir(&self) -> PathBuf {
        self.rootfs.join(self.workdir.trim_start_matches('/'))
    }
}

/// Output from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code returned by the command (`-1` when killed by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl RunOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs build commands.
///
/// Implementors must leave every filesystem effect of the command under
/// `request.rootfs`, which the engine diffs afterwards.
pub trait StepExecutor: Send + Sync {
    /// Runs one command to completion.
    ///
    /// A non-zero exit is reported in [`RunOutput::exit_code`], not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be started.
    fn run(&self, request: &RunRequest) -> Result<RunOutput>;
}

/// Runs commands directly on the host with the build root as the current
/// directory.
///
/// The child sees only the recipe's environment plus a default `PATH` and
/// `STRATUM_ROOTFS` pointing at the build root.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostExecutor;

impl StepExecutor for HostExecutor {
    fn run(&self, request: &RunRequest) -> Result<RunOutput> {
        let Some((program, args)) = request.argv.split_first() else {
            return Err(StratumError::Config {
                message: "RUN command is empty".into(),
            });
        };
        let cwd = request.host_workdir();
        std::fs::create_dir_all(&cwd).map_err(|e| StratumError::io(&cwd, e))?;
        tracing::debug!(cmd = ?request.argv, cwd = %cwd.display(), "spawning host command");

        let output = std::process::Command::new(program)
            .args(args)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .envs(request.env.iter().map(|(k, v)| (k, v)))
            .env(ROOTFS_ENV, &request.rootfs)
            .current_dir(&cwd)
            .output()
            .map_err(|e| StratumError::io(program, e))?;

        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(rootfs: &std::path::Path, argv: &[&str]) -> RunRequest {
        RunRequest {
            argv: argv.iter().map(|s| (*s).to_owned()).collect(),
            env: vec![("GREETING".into(), "hi".into())],
            workdir: "/work".into(),
            rootfs: rootfs.to_path_buf(),
        }
    }

    #[test]
    fn host_executor_runs_in_workdir_with_recipe_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = HostExecutor
            .run(&request(dir.path(), &["/bin/sh", "-c", "echo $GREETING > out.txt"]))
            .expect("run");
        assert!(out.success());
        let written = std::fs::read_to_string(dir.path().join("work/out.txt")).expect("read");
        assert_eq!(written, "hi\n");
    }

    #[test]
    fn host_executor_clears_inherited_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = HostExecutor
            .run(&request(dir.path(), &["/bin/sh", "-c", "echo \"[$HOME]\""]))
            .expect("run");
        assert_eq!(out.stdout, "[]\n");
    }

    #[test]
    fn host_executor_exports_rootfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = HostExecutor
            .run(&request(dir.path(), &["/bin/sh", "-c", "printf %s \"$STRATUM_ROOTFS\""]))
            .expect("run");
        assert_eq!(out.stdout, dir.path().display().to_string());
    }

    #[test]
    fn host_executor_reports_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = HostExecutor
            .run(&request(dir.path(), &["/bin/sh", "-c", "exit 3"]))
            .expect("run");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn host_executor_fails_for_missing_program() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = HostExecutor.run(&request(dir.path(), &["/definitely/not/here"]));
        assert!(result.is_err());
    }
}
