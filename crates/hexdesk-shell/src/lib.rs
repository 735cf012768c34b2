//! hexdesk-shell: resolves the user's login shell environment for sessions.
//!
//! Spawned children get a deliberately minimal environment, so the shell's
//! own startup files are the single source of truth for PATH and aliases.
//! This crate finds the shell, its startup file, and a derived PATH, and
//! builds the wrapped command string that sources both an application-owned
//! init script and the user's rc file before every real command.

pub mod resolver;

pub use resolver::{ShellConfig, ShellEnvironmentResolver, ShellError};
