//! Job-control-notification filter for child output.
//!
//! The init script asks the shell not to print job notifications, but not
//! every shell honors the options, so output additionally passes through
//! this stage before reaching the UI bridge. It drops whole lines of the
//! `[1] 12345` / `[1]  + 12345 done …` shape and passes everything else
//! through untouched.
//!
//! Data that could still turn into a notification (a line starting with a
//! bracketed job number, not yet terminated) is held back until the line
//! completes; all other partial data is flushed immediately so full-screen
//! programs stay responsive.

use regex::Regex;

/// Filters bracketed-job-number-plus-PID lines out of an output stream.
pub struct JobControlFilter {
    drop_line: Regex,
    maybe_prefix: Regex,
    held: String,
}

impl JobControlFilter {
    pub fn new() -> Self {
        Self {
            // "[1] 12345", "[1]  + 12345 done sleep 1", "[2]- 4242 ..."
            drop_line: Regex::new(r"^\[[0-9]+\][ \t]*[+-]?[ \t]*[0-9]+").unwrap(),
            // Any prefix of the above shape; used to decide whether an
            // unterminated trailing line must be held back.
            maybe_prefix: Regex::new(r"^\[[0-9]*(\][ \t]*[+-]?[ \t]*[0-9]*.*)?$").unwrap(),
            held: String::new(),
        }
    }

    /// Feed a chunk of output; returns the bytes safe to forward now.
    pub fn feed(&mut self, chunk: &str) -> String {
        let mut pending = std::mem::take(&mut self.held);
        pending.push_str(chunk);

        let mut out = String::new();
        while let Some(nl) = pending.find('\n') {
            let line: String = pending.drain(..=nl).collect();
            if !self.is_job_notification(&line) {
                out.push_str(&line);
            }
        }

        // Unterminated tail: hold it only while it could still become a
        // job notification.
        if self.maybe_prefix.is_match(pending.trim_end_matches('\r')) && !pending.is_empty() {
            self.held = pending;
        } else {
            out.push_str(&pending);
        }

        out
    }

    /// Flush anything still held (stream end).
    pub fn flush(&mut self) -> String {
        let tail = std::mem::take(&mut self.held);
        if self.is_job_notification(&tail) {
            String::new()
        } else {
            tail
        }
    }

    fn is_job_notification(&self, line: &str) -> bool {
        self.drop_line.is_match(line.trim_start_matches('\r').trim_start())
    }
}

impl Default for JobControlFilter {
    fn default() -> Self {
        Self::new()
    }
}
