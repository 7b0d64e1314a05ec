//! Control-sequence stripping using the VTE crate.
//!
//! Backends feed raw bytes through an [`AnsiStripper`] so that only printable
//! text and line structure reach the output buffer. Nothing is rendered:
//! cursor movement, colors and OSC titles are dropped.

use vte::{Params, Perform};

/// Collects the printable content of a byte stream.
#[derive(Debug, Default)]
struct TextSink {
    out: String,
}

impl Perform for TextSink {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // Line Feed (LF)
            0x0A => self.out.push('\n'),
            // Horizontal Tab (HT)
            0x09 => self.out.push('\t'),
            // CR, BS, BEL and the rest carry no text
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

/// Stateful stripper: escape sequences and UTF-8 characters split across
/// reads are reassembled before output.
pub struct AnsiStripper {
    parser: vte::Parser,
    sink: TextSink,
}

impl std::fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiStripper").finish_non_exhaustive()
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiStripper {
    /// Create a stripper in the ground state.
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            sink: TextSink::default(),
        }
    }

    /// Feed bytes and return the text they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        for byte in bytes {
            self.parser.advance(&mut self.sink, *byte);
        }
        std::mem::take(&mut self.sink.out)
    }

    /// Strip a complete string in one go.
    pub fn strip(text: &str) -> String {
        Self::new().feed(text.as_bytes())
    }
}
