//! Bounded, line-oriented output buffer shared by reader threads and callers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Output buffer handle as shared between a backend's readers and its owner.
pub type SharedBuffer = Arc<Mutex<OutputBuffer>>;

/// Lock a shared buffer, recovering the data if a reader panicked while
/// holding the lock.
pub fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, OutputBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output buffer holding at most `history_limit` complete lines plus one
/// unterminated trailing line.
///
/// Every entry except possibly the last ends with `'\n'`. Once the limit is
/// exceeded the oldest lines are evicted.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Lines in arrival order
    lines: VecDeque<String>,
    /// Maximum number of complete lines retained
    history_limit: usize,
}

impl OutputBuffer {
    /// Create an empty buffer retaining `history_limit` complete lines.
    pub fn new(history_limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Create a buffer already wrapped for sharing with reader threads.
    pub fn shared(history_limit: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(history_limit)))
    }

    /// Append streamed text, splitting it into entries at newline boundaries.
    ///
    /// Text without a newline extends the current partial line.
    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut rest = text;
        if let Some(last) = self.lines.back_mut() {
            if !last.ends_with('\n') {
                match rest.find('\n') {
                    Some(idx) => {
                        last.push_str(&rest[..=idx]);
                        rest = &rest[idx + 1..];
                    }
                    None => {
                        last.push_str(rest);
                        return;
                    }
                }
            }
        }

        for piece in rest.split_inclusive('\n') {
            self.lines.push_back(piece.to_string());
        }
        self.evict();
    }

    /// Replace the whole content with a snapshot (poll-based readers).
    pub fn replace(&mut self, snapshot: &str) {
        self.lines = snapshot
            .split_inclusive('\n')
            .map(str::to_string)
            .collect();
        self.evict();
    }

    /// Whole buffer as one string, without consuming it.
    pub fn contents(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(String::len).sum());
        for line in &self.lines {
            out.push_str(line);
        }
        out
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Number of entries, counting a partial trailing line.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Whether the last entry is unterminated.
    pub fn has_partial(&self) -> bool {
        self.lines.back().is_some_and(|line| !line.ends_with('\n'))
    }

    /// Number of newline-terminated entries.
    pub fn complete_lines(&self) -> usize {
        self.lines.len() - usize::from(self.has_partial())
    }

    /// Whether the buffer holds no text.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn evict(&mut self) {
        while self.complete_lines() > self.history_limit {
            self.lines.pop_front();
        }
    }
}
