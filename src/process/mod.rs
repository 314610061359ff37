//! Engine process management: executable lookup, launch and log capture.

use std::{
    env,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{process::Command, time::timeout};
use tracing::{info, warn};

use crate::error::{CambError, Result};

/// Name of the engine binary looked up next to the running executable.
pub const DEFAULT_ENGINE_NAME: &str = "camb";

/// Output of one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    /// stdout and stderr, interleaved as written
    pub log: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl EngineRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn resolve_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(p) => p.to_path_buf(),
        None => env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_ENGINE_NAME)))
            .filter(|p| p.is_file())
            .ok_or_else(|| CambError::ExecutableNotFound(PathBuf::from(DEFAULT_ENGINE_NAME)))?,
    };
    if !candidate.is_file() {
        return Err(CambError::ExecutableNotFound(candidate));
    }
    candidate
        .canonicalize()
        .map_err(|_| CambError::ExecutableNotFound(candidate))
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    executable: PathBuf,
    log_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// `executable` should be absolute, see [`resolve_executable`].
    pub fn new(executable: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            log_dir: log_dir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Runs the engine on `param_path`. A failing engine is not an error: the
    /// caller still collects whatever outputs exist.
    pub async fn run(&self, param_path: &Path) -> Result<EngineRun> {
        let scratch = |source| CambError::Scratch {
            path: self.log_dir.clone(),
            source,
        };
        // Unnamed file, both streams share its offset.
        let mut capture = tempfile::tempfile_in(&self.log_dir).map_err(scratch)?;
        let stdout = capture.try_clone().map_err(scratch)?;
        let stderr = capture.try_clone().map_err(scratch)?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg(param_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(dir) = self.executable.parent() {
            cmd.current_dir(dir);
        }

        info!("Launching {} {}", self.executable.display(), param_path.display());
        let mut child = cmd.spawn().map_err(CambError::Spawn)?;

        let (exit_code, timed_out) = match self.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => (status.map_err(CambError::Spawn)?.code(), false),
                Err(_) => {
                    warn!("Engine exceeded {:?}, killing it", limit);
                    let _ = child.kill().await;
                    (None, true)
                }
            },
            None => (child.wait().await.map_err(CambError::Spawn)?.code(), false),
        };

        let mut raw = Vec::new();
        capture.seek(SeekFrom::Start(0)).map_err(scratch)?;
        capture.read_to_end(&mut raw).map_err(scratch)?;
        let log = String::from_utf8_lossy(&raw).into_owned();

        if exit_code != Some(0) && !timed_out {
            match exit_code {
                Some(code) => warn!("CAMB failed with exit code {}", code),
                None => warn!("CAMB was terminated by a signal"),
            }
        }

        Ok(EngineRun { log, exit_code, timed_out })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_merges_streams_and_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "engine", "echo \"out $1\"\necho err >&2\necho done\nexit 3");
        let runner = ProcessRunner::new(&exe, dir.path());

        let run = runner.run(Path::new("params.ini")).await.unwrap();
        assert_eq!(run.exit_code, Some(3));
        assert!(!run.success());
        assert_eq!(run.log, "out params.ini\nerr\ndone\n");
    }

    #[tokio::test]
    async fn test_run_uses_executable_directory_as_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let exe = script(&bin, "engine", "pwd");
        let runner = ProcessRunner::new(exe.canonicalize().unwrap(), dir.path());

        let run = runner.run(Path::new("x")).await.unwrap();
        assert!(run.success());
        assert_eq!(run.log.trim(), bin.canonicalize().unwrap().to_str().unwrap());
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "engine", "echo started\nexec sleep 30");
        let runner = ProcessRunner::new(&exe, dir.path()).with_timeout(Some(Duration::from_millis(200)));

        let run = runner.run(Path::new("x")).await.unwrap();
        assert!(run.timed_out);
        assert_eq!(run.exit_code, None);
        assert!(run.log.contains("started"));
    }

    #[test]
    fn test_resolve_missing_executable() {
        let err = resolve_executable(Some(Path::new("/definitely/not/camb"))).unwrap_err();
        assert!(matches!(err, CambError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_resolve_canonicalizes() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "camb", "exit 0");
        let resolved = resolve_executable(Some(&exe)).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, exe.canonicalize().unwrap());
    }
}
