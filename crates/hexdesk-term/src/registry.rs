//! Fixed-size slot registry for terminal sessions.
//!
//! The UI multiplexes sessions into six numbered slots. A slot can be
//! reserved as a placeholder before a working directory is chosen, then
//! upgraded to a live session. Killed sessions keep their slot occupied
//! until explicitly removed, so slot ids are never silently recycled.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::events::{SessionEvent, SessionEventSender};
use crate::session::{SessionConfig, SlotId, TerminalSession};

/// Number of terminal slots the UI exposes.
pub const MAX_SLOTS: usize = 6;

/// Errors from slot allocation.
#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    SlotOutOfRange(SlotId),
    SlotOccupied(SlotId),
    NoSession(SlotId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::SlotOutOfRange(slot) => {
                write!(f, "slot {slot} is out of range (0..{MAX_SLOTS})")
            }
            RegistryError::SlotOccupied(slot) => write!(f, "slot {slot} is already occupied"),
            RegistryError::NoSession(slot) => write!(f, "slot {slot} has no session"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// State of one slot.
#[derive(Clone)]
pub enum SlotState {
    Free,
    /// Reserved by the UI; no working directory chosen yet.
    Placeholder,
    Live(Arc<Mutex<TerminalSession>>),
}

/// Owns the slot space and relays lifecycle events to the UI bridge.
pub struct SessionRegistry {
    slots: Vec<SlotState>,
    config: SessionConfig,
    events: SessionEventSender,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, events: SessionEventSender) -> Self {
        Self {
            slots: vec![SlotState::Free; MAX_SLOTS],
            config,
            events,
        }
    }

    /// Reserve a free slot as a placeholder.
    pub fn reserve(&mut self, slot: SlotId) -> Result<(), RegistryError> {
        self.check_range(slot)?;
        match self.slots[slot] {
            SlotState::Free => {
                self.slots[slot] = SlotState::Placeholder;
                Ok(())
            }
            _ => Err(RegistryError::SlotOccupied(slot)),
        }
    }

    /// Attach a live session to a free or placeholder slot.
    pub fn attach(
        &mut self,
        slot: SlotId,
        workdir: PathBuf,
    ) -> Result<Arc<Mutex<TerminalSession>>, RegistryError> {
        self.check_range(slot)?;
        match self.slots[slot] {
            SlotState::Free | SlotState::Placeholder => {}
            SlotState::Live(_) => return Err(RegistryError::SlotOccupied(slot)),
        }

        let session = Arc::new(Mutex::new(TerminalSession::new(
            slot,
            workdir,
            &self.config,
            self.events.clone(),
        )));
        self.slots[slot] = SlotState::Live(Arc::clone(&session));
        let _ = self.events.send(SessionEvent::Created { slot });
        Ok(session)
    }

    pub fn get(&self, slot: SlotId) -> Option<Arc<Mutex<TerminalSession>>> {
        match self.slots.get(slot) {
            Some(SlotState::Live(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Kill the session in a slot. The slot stays occupied (the dead
    /// session is still addressable) until [`SessionRegistry::remove`].
    pub fn kill(&mut self, slot: SlotId) -> Result<(), RegistryError> {
        self.check_range(slot)?;
        let session = self.get(slot).ok_or(RegistryError::NoSession(slot))?;
        if let Ok(mut session) = session.lock() {
            session.kill();
        }
        let _ = self.events.send(SessionEvent::Closed { slot });
        Ok(())
    }

    /// Free a slot for re-use, killing its session first if still live.
    pub fn remove(&mut self, slot: SlotId) -> Result<(), RegistryError> {
        self.check_range(slot)?;
        if let Some(session) = self.get(slot) {
            if let Ok(mut session) = session.lock() {
                if session.is_active() {
                    session.kill();
                    let _ = self.events.send(SessionEvent::Closed { slot });
                }
            }
        }
        self.slots[slot] = SlotState::Free;
        Ok(())
    }

    /// Slot ids currently holding a live session.
    pub fn live_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, state)| matches!(state, SlotState::Live(_)).then_some(slot))
            .collect()
    }

    fn check_range(&self, slot: SlotId) -> Result<(), RegistryError> {
        if slot >= MAX_SLOTS {
            return Err(RegistryError::SlotOutOfRange(slot));
        }
        Ok(())
    }
}
