//! hexdesk-supervisor: keeps the one background protocol-server process
//! alive for the application's lifetime.
//!
//! The restart policy lives in a pure state machine ([`SupervisorCore`]) so
//! the backoff ladder and budget exhaustion are testable without timers or
//! real processes; [`ProcessSupervisor`] drives it with tokio.

pub mod backoff;
pub mod supervisor;

pub use backoff::{BackoffPolicy, ExitDecision, SupervisorCore, SupervisorState};
pub use supervisor::{
    ProcessSupervisor, ServerSpec, SupervisorError, SupervisorEvent, SupervisorOptions,
};
