use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from child-process operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "I/O error: {err}"),
            PtyError::ResizeFailed(msg) => write!(f, "resize failed: {msg}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// How a child is attached to the session.
///
/// `Pty` runs the child inside a pseudo-terminal, so full-screen programs,
/// shell aliases, and interactive builtins behave as in a real terminal.
/// `Plain` is a cheaper ordinary child with piped stdio for callers that
/// need neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Pty,
    Plain,
}

/// Everything needed to spawn one child process.
///
/// The environment is exactly `env` — the host environment is never
/// inherited, so the shell's own startup files are the single source of
/// truth for PATH and aliases.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    pub mode: ExecutionMode,
}

enum ChildProc {
    Pty {
        master: Box<dyn MasterPty + Send>,
        child: Box<dyn Child + Send + Sync>,
    },
    Plain(std::process::Child),
}

/// Owns one spawned child: its reader, writer, and process handle.
pub struct ProcessHandle {
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    proc: ChildProc,
}

impl ProcessHandle {
    /// Spawn a child according to `spec`.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, PtyError> {
        match spec.mode {
            ExecutionMode::Pty => Self::spawn_pty(spec),
            ExecutionMode::Plain => Self::spawn_plain(spec),
        }
    }

    fn spawn_pty(spec: &SpawnSpec) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            reader: Some(reader),
            writer,
            proc: ChildProc::Pty {
                master: pair.master,
                child,
            },
        })
    }

    fn spawn_plain(spec: &SpawnSpec) -> Result<Self, PtyError> {
        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PtyError::SpawnFailed("child stdout missing".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PtyError::SpawnFailed("child stdin missing".to_string()))?;

        Ok(Self {
            reader: Some(Box::new(stdout)),
            writer: Box::new(stdin),
            proc: ChildProc::Plain(child),
        })
    }

    /// Resize the pseudo-terminal. A no-op for plain children.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        match &self.proc {
            ChildProc::Pty { master, .. } => master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| PtyError::ResizeFailed(format!("{e}"))),
            ChildProc::Plain(_) => Ok(()),
        }
    }

    /// Write bytes to the child (user input -> child stdin).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Extract the output reader for use on a dedicated I/O thread.
    ///
    /// Reads block, so callers must not read on the thread that owns the
    /// session state. Returns `None` if the reader was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// The child's OS process id, if still known.
    pub fn process_id(&self) -> Option<u32> {
        match &self.proc {
            ChildProc::Pty { child, .. } => child.process_id(),
            ChildProc::Plain(child) => Some(child.id()),
        }
    }

    /// Exit code if the child has exited, `None` while it is running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match &mut self.proc {
            ChildProc::Pty { child, .. } => match child.try_wait() {
                Ok(Some(status)) => Some(status.exit_code()),
                _ => None,
            },
            ChildProc::Plain(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.code().map(|c| c as u32).unwrap_or(1)),
                _ => None,
            },
        }
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Force-terminate the child, best-effort.
    ///
    /// PTY children are session leaders, so the whole process group is
    /// signalled first; a plain child shares our group and only gets the
    /// direct kill.
    pub fn kill(&mut self) {
        #[cfg(unix)]
        if let (ChildProc::Pty { .. }, Some(pid)) = (&self.proc, self.process_id()) {
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }

        match &mut self.proc {
            ChildProc::Pty { child, .. } => {
                if let Err(e) = child.kill() {
                    log::debug!("kill: child already gone: {e}");
                }
            }
            ChildProc::Plain(child) => {
                if let Err(e) = child.kill() {
                    log::debug!("kill: child already gone: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn sh_spec(mode: ExecutionMode) -> SpawnSpec {
        SpawnSpec {
            program: "/bin/sh".to_string(),
            args: vec![],
            cwd: std::env::temp_dir(),
            env: vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
            ],
            cols: 80,
            rows: 24,
            mode,
        }
    }

    fn read_until(handle: &mut ProcessHandle, needle: &str) -> String {
        let mut reader = handle.take_reader().unwrap();
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        loop {
            if std::time::Instant::now() > deadline {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_spawn_pty() {
        let handle = ProcessHandle::spawn(&sh_spec(ExecutionMode::Pty));
        assert!(handle.is_ok(), "failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
        handle.kill();
    }

    #[test]
    fn test_pty_write_read_echo() {
        let mut handle = ProcessHandle::spawn(&sh_spec(ExecutionMode::Pty)).unwrap();
        handle.write(b"echo HEXDESK_PTY_OK\n").unwrap();
        thread::sleep(Duration::from_millis(300));

        let text = read_until(&mut handle, "HEXDESK_PTY_OK");
        assert!(
            text.contains("HEXDESK_PTY_OK"),
            "expected output to contain HEXDESK_PTY_OK, got: {text}"
        );
        handle.kill();
    }

    #[test]
    fn test_plain_spawn_and_output() {
        let mut spec = sh_spec(ExecutionMode::Plain);
        spec.args = vec!["-c".to_string(), "echo HEXDESK_PLAIN_OK".to_string()];

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        let text = read_until(&mut handle, "HEXDESK_PLAIN_OK");
        assert!(
            text.contains("HEXDESK_PLAIN_OK"),
            "expected output to contain HEXDESK_PLAIN_OK, got: {text}"
        );
    }

    #[test]
    fn test_env_is_explicit_not_inherited() {
        // The spec env is the whole child environment; a host-only variable
        // must not leak through.
        std::env::set_var("HEXDESK_LEAK_CHECK", "leaked");
        let mut spec = sh_spec(ExecutionMode::Plain);
        spec.args = vec![
            "-c".to_string(),
            "echo start${HEXDESK_LEAK_CHECK}end".to_string(),
        ];

        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        let text = read_until(&mut handle, "end");
        assert!(text.contains("startend"), "host env leaked into child: {text}");
        std::env::remove_var("HEXDESK_LEAK_CHECK");
    }

    #[test]
    fn test_resize_pty() {
        let mut handle = ProcessHandle::spawn(&sh_spec(ExecutionMode::Pty)).unwrap();
        let result = handle.resize(120, 40);
        assert!(result.is_ok(), "resize failed: {:?}", result.err());
        handle.kill();
    }

    #[test]
    fn test_resize_plain_is_noop() {
        let mut spec = sh_spec(ExecutionMode::Plain);
        spec.args = vec!["-c".to_string(), "sleep 1".to_string()];
        let mut handle = ProcessHandle::spawn(&spec).unwrap();
        assert!(handle.resize(120, 40).is_ok());
        handle.kill();
    }

    #[test]
    fn test_child_exit_code() {
        let mut spec = sh_spec(ExecutionMode::Plain);
        spec.args = vec!["-c".to_string(), "exit 7".to_string()];
        let mut handle = ProcessHandle::spawn(&spec).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        loop {
            if std::time::Instant::now() > deadline {
                break;
            }
            if handle.try_wait().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        assert_eq!(handle.try_wait(), Some(7));
    }

    #[test]
    fn test_kill_is_idempotent() {
        let mut handle = ProcessHandle::spawn(&sh_spec(ExecutionMode::Pty)).unwrap();
        handle.kill();
        handle.kill();
    }
}
