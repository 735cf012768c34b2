//! One terminal session: prompt surface, built-in commands, real execution.
//!
//! A session owns at most one child at a time. Built-ins short-circuit
//! without spawning; everything else runs through the user's login shell
//! inside a pseudo-terminal with a deliberately minimal, explicitly-built
//! environment.

use std::io::Read;
use std::path::{Path, PathBuf};

use hexdesk_pty::{ExecutionMode, ProcessHandle, SpawnSpec};
use hexdesk_shell::ShellEnvironmentResolver;

use crate::editor::{EditorEvent, LineEditor};
use crate::events::{SessionEvent, SessionEventSender};

/// A numbered terminal position the UI multiplexes sessions into.
pub type SlotId = usize;

/// Prompt printed at the start of every editable line.
pub const PROMPT: &str = "$ ";

/// Agent CLI binary invoked in agent sessions; known to leave the PTY in a
/// corrupted mode on exit, which triggers a full shell restart.
pub const DEFAULT_AGENT_BINARY: &str = "claude";

/// Per-session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub agent_binary: String,
    pub shell_override: Option<String>,
    pub home: PathBuf,
}

impl SessionConfig {
    pub fn new(home: PathBuf) -> Self {
        Self {
            agent_binary: DEFAULT_AGENT_BINARY.to_string(),
            shell_override: None,
            home,
        }
    }
}

struct ActiveChild {
    handle: ProcessHandle,
    /// First whitespace token of the original command, for exit policy.
    program: String,
}

/// A freshly spawned child's reader, handed to the caller so it can start a
/// dedicated I/O thread. The session keeps the write half.
pub struct SpawnedChild {
    pub reader: Box<dyn Read + Send>,
    pub program: String,
}

/// A minimal line-oriented terminal surface bound to one slot.
pub struct TerminalSession {
    slot: SlotId,
    workdir: Option<PathBuf>,
    active: bool,
    editor: LineEditor,
    resolver: ShellEnvironmentResolver,
    child: Option<ActiveChild>,
    spawned: Option<SpawnedChild>,
    agent_binary: String,
    cols: u16,
    rows: u16,
    events: SessionEventSender,
}

impl TerminalSession {
    /// Allocate session state. Nothing is spawned until the first real
    /// command.
    pub fn new(
        slot: SlotId,
        workdir: PathBuf,
        config: &SessionConfig,
        events: SessionEventSender,
    ) -> Self {
        let resolver =
            ShellEnvironmentResolver::new(&config.home, config.shell_override.as_deref());
        if let Err(e) = resolver.ensure_init_script() {
            log::warn!("slot {slot}: could not write init script: {e}");
        }

        Self {
            slot,
            workdir: Some(workdir),
            active: true,
            editor: LineEditor::new(),
            resolver,
            child: None,
            spawned: None,
            agent_binary: config.agent_binary.clone(),
            cols: 80,
            rows: 24,
            events,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn workdir(&self) -> Option<&PathBuf> {
        self.workdir.as_ref()
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn history(&self) -> &[String] {
        self.editor.history()
    }

    /// Print a fresh prompt. The bridge calls this once after attaching.
    pub fn show_prompt(&self) {
        self.emit(PROMPT.to_string());
    }

    /// Reader of the most recently spawned child, if one is waiting for an
    /// I/O thread. The caller must collect this after any input that may
    /// have spawned a command.
    pub fn take_spawned_child(&mut self) -> Option<SpawnedChild> {
        self.spawned.take()
    }

    /// Entry point for keystroke bytes from the UI bridge.
    ///
    /// With a child attached, bytes are forwarded verbatim (raw
    /// pass-through); otherwise they drive the line editor.
    pub fn handle_input(&mut self, bytes: &[u8]) {
        if !self.active {
            return;
        }

        if let Some(child) = &mut self.child {
            if let Err(e) = child.handle.write(bytes) {
                log::debug!("slot {}: input write failed: {e}", self.slot);
            }
            return;
        }

        for event in self.editor.feed(bytes) {
            match event {
                EditorEvent::Redraw => {
                    let frame = self.editor.redraw_frame(PROMPT);
                    self.emit(frame);
                }
                EditorEvent::Submit(text) => {
                    self.emit("\r\n".to_string());
                    self.execute_command(&text, false);
                }
                EditorEvent::Abort => {
                    self.emit(format!("^C\r\n{PROMPT}"));
                }
            }
        }
    }

    /// Dispatch a command line: built-ins run inline, anything else spawns.
    pub fn execute_command(&mut self, text: &str, silent: bool) {
        if !self.active {
            return;
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            if !silent {
                self.show_prompt();
            }
            return;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match tokens.as_slice() {
            ["clear"] => self.emit(format!("\x1b[2J\x1b[H{PROMPT}")),
            ["cd"] => {
                let home = self.resolver.home().to_path_buf();
                self.change_dir(&home, "~");
            }
            ["cd", arg] => {
                let target = self.resolve_dir(arg);
                self.change_dir(&target, arg);
            }
            ["pwd"] => {
                let dir = self
                    .workdir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                self.emit(format!("{dir}\r\n{PROMPT}"));
            }
            ["echo", "$PATH"] => {
                let path = self.resolver.derived_path();
                self.emit(format!("{path}\r\n{PROMPT}"));
            }
            ["echo", "$HEXDESK_SLOT"] => {
                let slot = self.slot + 1;
                self.emit(format!("{slot}\r\n{PROMPT}"));
            }
            _ => self.execute_real_command(trimmed),
        }
    }

    /// Spawn `command` through the login shell inside a pseudo-terminal.
    ///
    /// The command string is wrapped so the init script and the user's rc
    /// file are sourced first; aliases and shell functions therefore work
    /// the same as in a real terminal.
    fn execute_real_command(&mut self, command: &str) {
        let program = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        let cwd = match &self.workdir {
            Some(dir) => dir.clone(),
            None => return,
        };

        // A missing shell would otherwise surface only as an instant child
        // exit; report it up front like any other spawn failure.
        if !self.resolver.shell().exists() {
            let shell = self.resolver.shell().display().to_string();
            log::warn!("slot {}: shell not found: {shell}", self.slot);
            self.emit(format!("hexdesk: spawn failed: {shell}: no such file\r\n{PROMPT}"));
            return;
        }

        let spec = SpawnSpec {
            program: self.resolver.shell().display().to_string(),
            args: vec!["-c".to_string(), self.resolver.wrapped_command(command)],
            cwd,
            env: self.child_env(),
            cols: self.cols,
            rows: self.rows,
            mode: execution_mode(command),
        };

        match ProcessHandle::spawn(&spec) {
            Ok(mut handle) => {
                let reader = handle.take_reader();
                self.child = Some(ActiveChild {
                    handle,
                    program: program.clone(),
                });
                if let Some(reader) = reader {
                    self.spawned = Some(SpawnedChild { reader, program });
                }
            }
            Err(e) => {
                log::warn!("slot {}: spawn failed: {e}", self.slot);
                self.emit(format!("hexdesk: {e}\r\n{PROMPT}"));
            }
        }
    }

    /// The entire child environment. The host environment is never
    /// inherited; the two HEXDESK variables let the child self-report
    /// which slot it runs under.
    fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "HOME".to_string(),
                self.resolver.home().display().to_string(),
            ),
            (
                "USER".to_string(),
                std::env::var("USER").unwrap_or_else(|_| "user".to_string()),
            ),
            (
                "SHELL".to_string(),
                self.resolver.shell().display().to_string(),
            ),
            ("TERM".to_string(), "xterm-256color".to_string()),
            (
                "LANG".to_string(),
                std::env::var("LANG").unwrap_or_else(|_| "en_US.UTF-8".to_string()),
            ),
        ];
        env.push((format!("HEXDESK_SESSION_{}", self.slot), "1".to_string()));
        env.push(("HEXDESK_SLOT".to_string(), (self.slot + 1).to_string()));
        env
    }

    /// Called by the I/O thread when the child's output stream ends.
    ///
    /// The agent CLI is known to leave the PTY in raw/alternate-screen
    /// mode, so its exit forces a full shell restart; any other command
    /// just gets a fresh prompt.
    pub fn handle_child_exit(&mut self, program: &str) {
        if !self.active {
            return;
        }

        if let Some(mut child) = self.child.take() {
            if let Some(code) = child.handle.try_wait() {
                log::debug!("slot {}: `{program}` exited with {code}", self.slot);
            }
        }

        if program == self.agent_binary {
            self.restart_shell();
        } else {
            self.emit(format!("\r\n{PROMPT}"));
        }
    }

    /// Cheap recovery from terminal-state corruption: keep the working
    /// directory and history, drop any lingering child, clear the screen,
    /// and print a fresh prompt.
    pub fn restart_shell(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.handle.kill();
        }
        self.editor.reset_line();
        self.emit(format!("\x1b[2J\x1b[H{PROMPT}"));
    }

    /// Propagate a window-size change to the child. Best-effort.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
        if let Some(child) = &self.child {
            if let Err(e) = child.handle.resize(cols, rows) {
                log::debug!("slot {}: resize failed: {e}", self.slot);
            }
        }
    }

    /// Permanently deactivate the session. All further input and output
    /// become no-ops; in-flight callbacks are dropped by the `active`
    /// guard.
    pub fn kill(&mut self) {
        self.active = false;
        self.workdir = None;
        if let Some(mut child) = self.child.take() {
            child.handle.kill();
        }
    }

    /// Forward filtered child output to the UI bridge. Dropped after kill.
    pub fn emit_output(&self, data: String) {
        self.emit(data);
    }

    fn emit(&self, data: String) {
        if !self.active || data.is_empty() {
            return;
        }
        let _ = self.events.send(SessionEvent::Output {
            slot: self.slot,
            data,
        });
    }

    fn resolve_dir(&self, arg: &str) -> PathBuf {
        let path = PathBuf::from(arg);
        if path.is_absolute() {
            return path;
        }
        match &self.workdir {
            Some(dir) => dir.join(path),
            None => path,
        }
    }

    fn change_dir(&mut self, target: &Path, arg: &str) {
        // Existence is the only check; permissions surface when a command
        // actually runs there.
        if target.is_dir() {
            self.workdir = Some(target.canonicalize().unwrap_or_else(|_| target.to_path_buf()));
            self.show_prompt();
        } else {
            self.emit(format!(
                "cd: no such file or directory: {arg}\r\n{PROMPT}"
            ));
        }
    }
}

/// Which way to run a command.
///
/// Aliases and shell builtins only behave like a real terminal inside an
/// interactive PTY, so every session command goes through one; `Plain`
/// remains available for callers that want a cheap piped child.
fn execution_mode(_command: &str) -> ExecutionMode {
    ExecutionMode::Pty
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_session(workdir: &std::path::Path) -> (TerminalSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let home = tempfile::tempdir().unwrap().keep();
        let config = SessionConfig::new(home);
        let session = TerminalSession::new(0, workdir.to_path_buf(), &config, tx);
        (session, rx)
    }

    fn drain_output(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> String {
        let mut out = String::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Output { data, .. } = event {
                out.push_str(&data);
            }
        }
        out
    }

    #[test]
    fn test_create_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _rx) = test_session(dir.path());
        assert!(session.is_active());
        assert!(!session.has_child());
    }

    #[test]
    fn test_pwd_prints_workdir_and_fresh_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"pwd\n");
        let out = drain_output(&mut rx);

        let expected_tail = format!("{}\r\n{PROMPT}", dir.path().display());
        assert!(
            out.ends_with(&expected_tail),
            "expected output to end with {expected_tail:?}, got {out:?}"
        );
        assert!(!session.has_child());
    }

    #[test]
    fn test_cd_nonexistent_reports_and_keeps_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"cd nope\n");
        let out = drain_output(&mut rx);

        assert!(out.contains("no such file or directory"));
        assert_eq!(session.workdir().unwrap(), &dir.path().to_path_buf());
    }

    #[test]
    fn test_cd_moves_into_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"cd sub\n");
        drain_output(&mut rx);

        assert!(session.workdir().unwrap().ends_with("sub"));
    }

    #[test]
    fn test_clear_builtin_repaints_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"clear\n");
        let out = drain_output(&mut rx);

        assert!(out.contains("\x1b[2J\x1b[H"));
        assert!(!session.has_child());
    }

    #[test]
    fn test_slot_identity_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"echo $HEXDESK_SLOT\n");
        let out = drain_output(&mut rx);

        // Slot 0 reports as 1 (1-based).
        assert!(out.contains("1\r\n"));
        assert!(!session.has_child());
    }

    #[test]
    fn test_empty_enter_just_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"\n");
        let out = drain_output(&mut rx);
        assert_eq!(out, format!("\r\n{PROMPT}"));
    }

    #[test]
    fn test_silent_empty_command_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.execute_command("", true);
        assert_eq!(drain_output(&mut rx), "");
    }

    #[test]
    fn test_ctrl_c_marks_and_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"doomed");
        drain_output(&mut rx);
        session.handle_input(&[0x03]);
        let out = drain_output(&mut rx);
        assert_eq!(out, format!("^C\r\n{PROMPT}"));
    }

    #[test]
    fn test_kill_silences_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.kill();
        assert!(!session.is_active());
        assert!(session.workdir().is_none());

        // Input, output, and exit callbacks arriving after kill are all
        // dropped.
        session.handle_input(b"pwd\n");
        session.emit_output("late data".to_string());
        session.handle_child_exit("claude");
        assert_eq!(drain_output(&mut rx), "");
    }

    #[test]
    fn test_resize_without_child_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.resize(120, 40);
        assert!(session.is_active());
        assert_eq!(drain_output(&mut rx), "");
    }

    #[test]
    fn test_agent_exit_restarts_shell() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());
        let workdir_before = session.workdir().cloned();

        session.handle_child_exit("claude");
        let out = drain_output(&mut rx);

        // Clear screen plus fresh prompt; working directory preserved.
        assert!(out.contains("\x1b[2J\x1b[H"));
        assert!(out.ends_with(PROMPT));
        assert_eq!(session.workdir().cloned(), workdir_before);
    }

    #[test]
    fn test_ordinary_exit_just_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_child_exit("ls");
        let out = drain_output(&mut rx);
        assert_eq!(out, format!("\r\n{PROMPT}"));
    }

    fn sh_session(
        workdir: &std::path::Path,
    ) -> (TerminalSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let home = tempfile::tempdir().unwrap().keep();
        let mut config = SessionConfig::new(home);
        config.shell_override = Some("/bin/sh".to_string());
        let session = TerminalSession::new(0, workdir.to_path_buf(), &config, tx);
        (session, rx)
    }

    fn read_child_until(child: &mut SpawnedChild, needle: &str) -> String {
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if std::time::Instant::now() > deadline {
                break;
            }
            match child.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains(needle) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[test]
    fn test_real_command_runs_in_pty_child() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = sh_session(dir.path());

        session.handle_input(b"echo HEXDESK_E2E\n");
        drain_output(&mut rx);

        assert!(session.has_child());
        let mut child = session.take_spawned_child().expect("child reader");
        let text = read_child_until(&mut child, "HEXDESK_E2E");
        assert!(text.contains("HEXDESK_E2E"), "missing echo output: {text:?}");

        session.kill();
    }

    #[test]
    fn test_child_sees_slot_identity_env() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = sh_session(dir.path());

        session.execute_command("echo slot=$HEXDESK_SLOT marker=$HEXDESK_SESSION_0", true);
        drain_output(&mut rx);

        let mut child = session.take_spawned_child().expect("child reader");
        let text = read_child_until(&mut child, "marker=");
        assert!(text.contains("slot=1"), "missing HEXDESK_SLOT: {text:?}");
        assert!(text.contains("marker=1"), "missing per-slot marker: {text:?}");

        session.kill();
    }

    #[test]
    fn test_input_passes_through_to_attached_child() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = sh_session(dir.path());

        session.handle_input(b"cat\n");
        drain_output(&mut rx);
        let mut child = session.take_spawned_child().expect("child reader");

        // Bytes typed while a child is attached go to the child, not the
        // line editor; the PTY echoes them back.
        session.handle_input(b"ping\n");
        let text = read_child_until(&mut child, "ping");
        assert!(text.contains("ping"), "expected PTY echo of input: {text:?}");
        assert_eq!(drain_output(&mut rx), "");

        session.kill();
    }

    #[test]
    fn test_spawn_failure_reports_inline_and_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let home = tempfile::tempdir().unwrap().keep();
        let mut config = SessionConfig::new(home);
        config.shell_override = Some("/nonexistent/hexdesk-shell".to_string());
        let mut session = TerminalSession::new(0, dir.path().to_path_buf(), &config, tx);

        session.handle_input(b"ls\n");
        let out = drain_output(&mut rx);

        assert!(out.contains("hexdesk: "), "missing inline error: {out:?}");
        assert!(out.ends_with(PROMPT));
        assert!(!session.has_child());
        assert!(session.is_active());
    }

    #[test]
    fn test_restart_preserves_history() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, mut rx) = test_session(dir.path());

        session.handle_input(b"pwd\n");
        drain_output(&mut rx);
        session.restart_shell();

        assert_eq!(session.history(), &["pwd".to_string()]);
    }
}
