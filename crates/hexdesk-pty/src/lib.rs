//! hexdesk-pty: child-process spawning for hexdesk terminal sessions.
//!
//! Every command a session runs goes through [`ProcessHandle::spawn`] with an
//! explicit [`SpawnSpec`]: the child never inherits the host environment, and
//! the caller decides between a pseudo-terminal ([`ExecutionMode::Pty`]) and a
//! plain piped child ([`ExecutionMode::Plain`]).

pub mod pty;

pub use pty::{ExecutionMode, ProcessHandle, PtyError, SpawnSpec};
