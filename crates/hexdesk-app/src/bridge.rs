//! UI bridge: the command surface the frontend drives sessions through.
//!
//! Mirrors the create / input / resize / kill contract, pushing
//! `SessionEvent`s out on one channel. Agent-kind sessions get a deferred
//! auto-invocation of the agent CLI once the slot has had a moment to
//! settle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use hexdesk_term::{
    SessionConfig, SessionEvent, SessionRegistry, SlotId, TerminalSession,
};

use crate::io_thread::start_io_thread;

/// Delay before an agent session auto-invokes the agent CLI.
pub const AGENT_WARMUP: Duration = Duration::from_millis(1000);

/// What a newly created slot is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Auto-launches the agent CLI after the warm-up delay.
    Agent,
    /// A plain prompt; the user types commands themselves.
    Terminal,
}

/// Bridge-level configuration, defaulted by `main`.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub home: PathBuf,
    pub agent_binary: String,
    pub shell_override: Option<String>,
}

/// Command surface over the session registry.
pub struct Bridge {
    registry: Arc<Mutex<SessionRegistry>>,
    agent_binary: String,
}

impl Bridge {
    /// Build the bridge and the event channel the frontend consumes.
    pub fn new(config: BridgeConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_config = SessionConfig {
            agent_binary: config.agent_binary.clone(),
            shell_override: config.shell_override,
            home: config.home,
        };
        let registry = SessionRegistry::new(session_config, tx);
        (
            Self {
                registry: Arc::new(Mutex::new(registry)),
                agent_binary: config.agent_binary,
            },
            rx,
        )
    }

    /// Reserve a slot before its working directory is known.
    pub fn reserve(&self, slot: SlotId) -> Result<(), String> {
        let mut registry = self.lock_registry()?;
        registry.reserve(slot).map_err(|e| e.to_string())
    }

    /// Attach a session to a slot and show its first prompt.
    ///
    /// Must be called from within a tokio runtime: agent sessions schedule
    /// their deferred CLI launch as a task.
    pub fn create(
        &self,
        slot: SlotId,
        workdir: PathBuf,
        kind: SessionKind,
    ) -> Result<SlotId, String> {
        let session = {
            let mut registry = self.lock_registry()?;
            registry.attach(slot, workdir).map_err(|e| e.to_string())?
        };
        session
            .lock()
            .map_err(|e| format!("lock error: {e}"))?
            .show_prompt();

        if kind == SessionKind::Agent {
            let agent = self.agent_binary.clone();
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                tokio::time::sleep(AGENT_WARMUP).await;
                launch_agent(slot, &session, &agent);
            });
        }

        Ok(slot)
    }

    /// Keystroke bytes from the frontend.
    pub fn input(&self, slot: SlotId, bytes: &[u8]) -> Result<(), String> {
        let session = self.session(slot)?;
        let mut guard = session.lock().map_err(|e| format!("lock error: {e}"))?;
        guard.handle_input(bytes);
        if let Some(child) = guard.take_spawned_child() {
            drop(guard);
            start_io_thread(slot, Arc::clone(&session), child);
        }
        Ok(())
    }

    /// Window-size change; best-effort, never an error to the frontend.
    pub fn resize(&self, slot: SlotId, cols: u16, rows: u16) -> Result<(), String> {
        let session = self.session(slot)?;
        let mut guard = session.lock().map_err(|e| format!("lock error: {e}"))?;
        guard.resize(cols, rows);
        Ok(())
    }

    /// Kill a session. The slot stays occupied until `remove`.
    pub fn kill(&self, slot: SlotId) -> Result<(), String> {
        let mut registry = self.lock_registry()?;
        registry.kill(slot).map_err(|e| e.to_string())
    }

    /// Free a slot for re-use.
    pub fn remove(&self, slot: SlotId) -> Result<(), String> {
        let mut registry = self.lock_registry()?;
        registry.remove(slot).map_err(|e| e.to_string())
    }

    fn session(&self, slot: SlotId) -> Result<Arc<Mutex<TerminalSession>>, String> {
        self.lock_registry()?
            .get(slot)
            .ok_or_else(|| format!("slot {slot} has no session"))
    }

    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, SessionRegistry>, String> {
        self.registry.lock().map_err(|e| format!("lock error: {e}"))
    }
}

/// Deferred agent-CLI launch. A session killed during the warm-up delay is
/// left alone.
fn launch_agent(slot: SlotId, session: &Arc<Mutex<TerminalSession>>, agent: &str) {
    let Ok(mut guard) = session.lock() else { return };
    if !guard.is_active() {
        return;
    }
    guard.execute_command(agent, true);
    if let Some(child) = guard.take_spawned_child() {
        drop(guard);
        start_io_thread(slot, Arc::clone(session), child);
    }
}
