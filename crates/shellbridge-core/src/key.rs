//! Control keys that can be sent to a shell session.
//!
//! Only a small set of control sequences has a meaningful mapping on every
//! backend. Anything else is sent as literal text.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Control key recognized by `send_keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ControlKey {
    /// Ctrl+C (SIGINT)
    Interrupt,
    /// Ctrl+D (end of input)
    Eof,
    /// Ctrl+Z (SIGTSTP)
    Suspend,
    /// Ctrl+\ (SIGQUIT)
    Quit,
    /// Ctrl+L (redraw)
    ClearScreen,
}

impl ControlKey {
    /// Parse a control key from its textual spelling.
    ///
    /// Accepts the multiplexer style `C-c`, the `Ctrl+c` style and the caret
    /// style `^C`, case-insensitively. Returns `None` for anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// use shellbridge_core::ControlKey;
    ///
    /// assert_eq!(ControlKey::parse("C-c"), Some(ControlKey::Interrupt));
    /// assert_eq!(ControlKey::parse("Ctrl+D"), Some(ControlKey::Eof));
    /// assert_eq!(ControlKey::parse("^Z"), Some(ControlKey::Suspend));
    /// assert_eq!(ControlKey::parse("ls -la"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        let rest = lower
            .strip_prefix("c-")
            .or_else(|| lower.strip_prefix("ctrl+"))
            .or_else(|| lower.strip_prefix("ctrl-"))
            .or_else(|| lower.strip_prefix('^'))?;

        let mut chars = rest.chars();
        let ch = chars.next()?;
        if chars.next().is_some() {
            return None;
        }

        match ch {
            'c' => Some(ControlKey::Interrupt),
            'd' => Some(ControlKey::Eof),
            'z' => Some(ControlKey::Suspend),
            '\\' => Some(ControlKey::Quit),
            'l' => Some(ControlKey::ClearScreen),
            _ => None,
        }
    }

    /// Byte a terminal line discipline turns into this key.
    pub fn to_byte(&self) -> u8 {
        match self {
            ControlKey::Interrupt => 0x03,
            ControlKey::Eof => 0x04,
            ControlKey::Suspend => 0x1a,
            ControlKey::Quit => 0x1c,
            ControlKey::ClearScreen => 0x0c,
        }
    }

    /// Key name understood by `tmux send-keys`.
    pub fn tmux_name(&self) -> &'static str {
        match self {
            ControlKey::Interrupt => "C-c",
            ControlKey::Eof => "C-d",
            ControlKey::Suspend => "C-z",
            ControlKey::Quit => "C-\\",
            ControlKey::ClearScreen => "C-l",
        }
    }
}

impl std::fmt::Display for ControlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tmux_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings() {
        for s in ["C-c", "c-c", "C-C", "Ctrl+c", "ctrl-C", "^C", " ^c "] {
            assert_eq!(ControlKey::parse(s), Some(ControlKey::Interrupt), "{s}");
        }
        assert_eq!(ControlKey::parse("C-\\"), Some(ControlKey::Quit));
        assert_eq!(ControlKey::parse("C-l"), Some(ControlKey::ClearScreen));
    }

    #[test]
    fn test_parse_rejects_text() {
        assert_eq!(ControlKey::parse("C-cc"), None);
        assert_eq!(ControlKey::parse("C-x"), None);
        assert_eq!(ControlKey::parse("echo C-c"), None);
        assert_eq!(ControlKey::parse("^"), None);
        assert_eq!(ControlKey::parse(""), None);
    }

    #[test]
    fn test_bytes() {
        assert_eq!(ControlKey::Interrupt.to_byte(), 0x03);
        assert_eq!(ControlKey::Eof.to_byte(), 0x04);
        assert_eq!(ControlKey::Suspend.to_byte(), 0x1a);
    }

    #[test]
    fn test_tmux_names_round_trip() {
        for key in [
            ControlKey::Interrupt,
            ControlKey::Eof,
            ControlKey::Suspend,
            ControlKey::Quit,
            ControlKey::ClearScreen,
        ] {
            assert_eq!(ControlKey::parse(key.tmux_name()), Some(key));
        }
    }
}
