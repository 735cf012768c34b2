//! Per-child I/O thread that streams filtered output to the UI bridge.
//!
//! PTY reads block, so each spawned child gets its own OS thread. The
//! thread owns the reader directly (never the session mutex), locking the
//! session only briefly to emit a chunk. Killing the session terminates the
//! child, which closes the PTY and unblocks the read with EOF.

use std::io::Read;
use std::sync::{Arc, Mutex};

use hexdesk_term::{JobControlFilter, SlotId, SpawnedChild, TerminalSession};

/// Start the read loop for a freshly spawned child.
///
/// On EOF the child's exit policy runs inside the session (prompt reissue,
/// or a full shell restart for the agent CLI). All emits are dropped by the
/// session itself once it has been killed.
pub fn start_io_thread(
    slot: SlotId,
    session: Arc<Mutex<TerminalSession>>,
    child: SpawnedChild,
) {
    std::thread::Builder::new()
        .name(format!("pty-io-{slot}"))
        .spawn(move || io_loop(session, child))
        .expect("failed to spawn I/O thread");
}

fn io_loop(session: Arc<Mutex<TerminalSession>>, child: SpawnedChild) {
    let SpawnedChild { mut reader, program } = child;
    let mut filter = JobControlFilter::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,          // EOF, child exited
            Ok(n) => n,
            Err(_) => break,         // PTY closed under us
        };

        let text = String::from_utf8_lossy(&buf[..n]);
        let filtered = filter.feed(&text);
        if filtered.is_empty() {
            continue;
        }

        let Ok(session) = session.lock() else { return };
        if !session.is_active() {
            return;
        }
        session.emit_output(filtered);
    }

    let tail = filter.flush();
    let Ok(mut session) = session.lock() else { return };
    if !tail.is_empty() {
        session.emit_output(tail);
    }
    session.handle_child_exit(&program);
}
