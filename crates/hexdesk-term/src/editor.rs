//! Raw-keystroke line editing for a session prompt.
//!
//! The editor consumes input bytes exactly as the terminal delivers them,
//! including escape sequences split across read chunks, and reports what
//! the session must do: redraw the line, submit a command, or abort it.

/// What the session should do after feeding bytes to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Buffer or cursor changed; repaint the line.
    Redraw,
    /// Enter was pressed; run this text as a command.
    Submit(String),
    /// Ctrl-C; drop the current line and show a fresh prompt.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    None,
    /// Saw ESC, waiting for `[`.
    Escape,
    /// Inside a CSI sequence, collecting parameter bytes.
    Csi,
}

/// Line buffer, cursor, and command history for one session.
///
/// The cursor is a char offset, always within `0..=chars(buffer)`.
/// `history_index == history.len()` means a fresh (not yet recalled) line.
pub struct LineEditor {
    buffer: String,
    cursor: usize,
    history: Vec<String>,
    history_index: usize,
    escape_state: EscapeState,
    csi_params: Vec<u8>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            history: Vec::new(),
            history_index: 0,
            escape_state: EscapeState::None,
            csi_params: Vec::new(),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Cursor position as a char offset into the buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Reset the in-progress line. History is kept.
    pub fn reset_line(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_index = self.history.len();
        self.escape_state = EscapeState::None;
        self.csi_params.clear();
    }

    /// Consume a chunk of input bytes, returning the resulting events in
    /// order. Printable runs are inserted as one edit; a partial escape
    /// sequence at the end of the chunk is carried to the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        let mut printable: Vec<u8> = Vec::new();

        for &byte in bytes {
            match self.escape_state {
                EscapeState::Escape => {
                    if byte == b'[' {
                        self.escape_state = EscapeState::Csi;
                        self.csi_params.clear();
                    } else {
                        // Bare ESC followed by something else; swallow both.
                        self.escape_state = EscapeState::None;
                    }
                    continue;
                }
                EscapeState::Csi => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.escape_state = EscapeState::None;
                        if let Some(event) = self.handle_csi(byte) {
                            events.push(event);
                        }
                    } else {
                        self.csi_params.push(byte);
                    }
                    continue;
                }
                EscapeState::None => {}
            }

            if byte >= 0x20 && byte != 0x7f {
                printable.push(byte);
                continue;
            }

            // Control byte: flush any pending printable run first.
            if !printable.is_empty() {
                self.insert_run(&printable);
                printable.clear();
                events.push(EditorEvent::Redraw);
            }

            match byte {
                0x1b => self.escape_state = EscapeState::Escape,
                b'\r' | b'\n' => events.push(self.submit()),
                0x7f | 0x08 => {
                    if self.backspace() {
                        events.push(EditorEvent::Redraw);
                    }
                }
                0x03 => {
                    self.reset_line();
                    events.push(EditorEvent::Abort);
                }
                _ => {}
            }
        }

        if !printable.is_empty() {
            self.insert_run(&printable);
            events.push(EditorEvent::Redraw);
        }

        events
    }

    /// Full single-line repaint: clear the line, reprint prompt and buffer,
    /// then step the cursor back to its offset.
    pub fn redraw_frame(&self, prompt: &str) -> String {
        let mut frame = String::from("\r\x1b[K");
        frame.push_str(prompt);
        frame.push_str(&self.buffer);
        let behind = self.buffer.chars().count() - self.cursor;
        for _ in 0..behind {
            frame.push_str("\x1b[D");
        }
        frame
    }

    fn insert_run(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let at = self.byte_offset(self.cursor);
        self.buffer.insert_str(at, &text);
        self.cursor += text.chars().count();
    }

    fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let start = self.byte_offset(self.cursor - 1);
        let end = self.byte_offset(self.cursor);
        self.buffer.replace_range(start..end, "");
        self.cursor -= 1;
        true
    }

    fn submit(&mut self) -> EditorEvent {
        let text = std::mem::take(&mut self.buffer);
        if !text.trim().is_empty() {
            self.history.push(text.clone());
        }
        self.cursor = 0;
        self.history_index = self.history.len();
        EditorEvent::Submit(text)
    }

    fn handle_csi(&mut self, final_byte: u8) -> Option<EditorEvent> {
        match final_byte {
            b'A' => self.history_up(),
            b'B' => self.history_down(),
            b'C' => {
                if self.cursor < self.buffer.chars().count() {
                    self.cursor += 1;
                    return Some(EditorEvent::Redraw);
                }
                None
            }
            b'D' => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    return Some(EditorEvent::Redraw);
                }
                None
            }
            b'H' => self.move_home(),
            b'F' => self.move_end(),
            b'~' => match self.csi_params.as_slice() {
                b"1" => self.move_home(),
                b"4" => self.move_end(),
                _ => None,
            },
            _ => None,
        }
    }

    fn move_home(&mut self) -> Option<EditorEvent> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor = 0;
        Some(EditorEvent::Redraw)
    }

    fn move_end(&mut self) -> Option<EditorEvent> {
        let len = self.buffer.chars().count();
        if self.cursor == len {
            return None;
        }
        self.cursor = len;
        Some(EditorEvent::Redraw)
    }

    /// Up is clamped at the oldest entry; recalling always puts the cursor
    /// at line end.
    fn history_up(&mut self) -> Option<EditorEvent> {
        if self.history_index == 0 {
            return None;
        }
        self.history_index -= 1;
        self.buffer = self.history[self.history_index].clone();
        self.cursor = self.buffer.chars().count();
        Some(EditorEvent::Redraw)
    }

    /// Down past the newest entry clears the buffer.
    fn history_down(&mut self) -> Option<EditorEvent> {
        if self.history_index >= self.history.len() {
            return None;
        }
        self.history_index += 1;
        if self.history_index == self.history.len() {
            self.buffer.clear();
        } else {
            self.buffer = self.history[self.history_index].clone();
        }
        self.cursor = self.buffer.chars().count();
        Some(EditorEvent::Redraw)
    }

    fn byte_offset(&self, char_idx: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len())
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}
