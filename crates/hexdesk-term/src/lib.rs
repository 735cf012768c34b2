//! hexdesk-term: terminal session management for hexdesk.
//!
//! A [`TerminalSession`] presents a minimal line-oriented surface (prompt,
//! line editing, history) and delegates real work to a child spawned through
//! `hexdesk-pty`. The [`SessionRegistry`] owns the fixed six-slot space the
//! UI multiplexes sessions into.
//!
//! # Architecture
//!
//! - [`LineEditor`] — buffer, cursor, history, CSI input parsing, redraw frames.
//! - [`JobControlFilter`] — standalone pipeline stage dropping shell
//!   job-notification lines from child output.
//! - [`TerminalSession`] — built-in commands, real execution through the
//!   shell resolver, child lifecycle and crash recovery.
//! - [`SessionRegistry`] — slot allocation and lifecycle event relay.

pub mod editor;
pub mod events;
pub mod filter;
pub mod registry;
pub mod session;

pub use editor::{EditorEvent, LineEditor};
pub use events::{SessionEvent, SessionEventSender};
pub use filter::JobControlFilter;
pub use registry::{RegistryError, SessionRegistry, SlotState, MAX_SLOTS};
pub use session::{SessionConfig, SlotId, SpawnedChild, TerminalSession, PROMPT};
