// DbgMux - platform/process.rs
//
// Child process spawning with captured stdout/stderr and exit observation.
//
// The child is handed to a waiter thread that polls for exit (so it can also
// honour a kill request) and fires the paired `ProcessExit` once the child has
// ended and the caller's `before_exit` hook has run.

use crate::core::process::{ExitStatus, ProcessExit, ProcessHandle};
use crate::util::constants::PROCESS_WAIT_POLL_MS;
use crate::util::error::SourceError;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A spawned child whose output pipes are still to be consumed.
#[derive(Debug)]
pub struct CapturedChild {
    pub handle: ProcessHandle,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    child: Child,
    exit: ProcessExit,
}

/// Display name for a program path: its file stem.
pub fn program_name(program: &str) -> String {
    Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Spawn `program args...` with stdout and stderr piped, stdin closed.
pub fn spawn_captured(program: &str, args: &[String]) -> Result<CapturedChild, SourceError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SourceError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    let (handle, exit) = ProcessHandle::new(child.id(), program_name(program));
    tracing::info!(pid = child.id(), program, "Spawned child process");
    Ok(CapturedChild {
        handle,
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
        exit,
    })
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Code(i64::from(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signal(signal);
        }
    }
    ExitStatus::Unknown
}

/// Requests termination of a watched child.
#[derive(Debug, Clone)]
pub struct ChildKiller {
    kill: Arc<AtomicBool>,
}

impl ChildKiller {
    /// Ask the waiter thread to kill the child. Returns immediately.
    pub fn kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }
}

impl CapturedChild {
    /// Move the child to a waiter thread. `before_exit` runs after the child
    /// has ended and before its exit is signalled.
    pub fn watch<F>(self, before_exit: F) -> std::io::Result<ChildKiller>
    where
        F: FnOnce() + Send + 'static,
    {
        let kill = Arc::new(AtomicBool::new(false));
        let killer = ChildKiller {
            kill: Arc::clone(&kill),
        };
        let CapturedChild {
            mut child, exit, handle, ..
        } = self;
        std::thread::Builder::new()
            .name(format!("dbgmux-wait-{}", handle.pid()))
            .spawn(move || {
                let status = wait_child(&mut child, &kill);
                before_exit();
                tracing::debug!(pid = handle.pid(), status = %status, "Child process exited");
                exit.exited(status);
            })?;
        Ok(killer)
    }
}

fn wait_child(child: &mut Child, kill: &AtomicBool) -> ExitStatus {
    let mut kill_sent = false;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return convert_status(status),
            Ok(None) => {
                if !kill_sent && kill.load(Ordering::SeqCst) {
                    kill_sent = true;
                    if let Err(e) = child.kill() {
                        tracing::warn!(pid = child.id(), error = %e, "Failed to kill child process");
                    }
                }
                std::thread::sleep(Duration::from_millis(PROCESS_WAIT_POLL_MS));
            }
            Err(e) => {
                tracing::warn!(pid = child.id(), error = %e, "Cannot query child process status");
                return ExitStatus::Unknown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name_is_file_stem() {
        assert_eq!(program_name("/usr/bin/python3"), "python3");
        assert_eq!(program_name("tool.exe"), "tool");
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let result = spawn_captured("/definitely/not/a/program", &[]);
        assert!(matches!(result, Err(SourceError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_is_reported() {
        let child = spawn_captured("sh", &["-c".to_string(), "exit 3".to_string()]).unwrap();
        let handle = child.handle.clone();
        let _killer = child.watch(|| {}).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !handle.has_exited() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.exit_status(), Some(ExitStatus::Code(3)));
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_terminates_child() {
        let child = spawn_captured("sleep", &["30".to_string()]).unwrap();
        let handle = child.handle.clone();
        let killer = child.watch(|| {}).unwrap();
        killer.kill();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !handle.has_exited() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.exit_status(), Some(ExitStatus::Signal(9)));
    }
}
