//! Turning raw screen text into per-command results.

use shellbridge_core::{PromptIdentity, PromptMetadata, PromptProtocol};

/// The prompt on screen at the moment a command was sent.
///
/// Only prompts carrying the shell's nonce are considered. A later one counts
/// as the command's completion when its identity differs from the
/// baseline's, or when more of them are on screen than there were before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    nonce: String,
    identity: Option<PromptIdentity>,
    count: usize,
}

impl Baseline {
    /// Record the prompt state of `screen` for the shell holding `nonce`.
    pub fn capture(screen: &str, nonce: &str) -> Self {
        let prompts = PromptProtocol::parse_all_from(screen, nonce);
        Self {
            nonce: nonce.to_string(),
            identity: prompts.last().map(PromptMetadata::identity),
            count: prompts.len(),
        }
    }

    /// The prompt that completed the command, if `screen` ends with one
    /// newer than this baseline.
    pub fn completion(&self, screen: &str) -> Option<PromptMetadata> {
        let last = PromptProtocol::trailing_prompt(screen, &self.nonce)?;
        let count = PromptProtocol::parse_all_from(screen, &self.nonce).len();
        let newer = match &self.identity {
            None => true,
            Some(identity) => last.identity() != *identity || count > self.count,
        };
        newer.then_some(last)
    }

    /// Output of the command completed by `completion`, or produced so far
    /// when it has not completed.
    pub fn output(&self, screen: &str, command: &str, completion: Option<&PromptMetadata>) -> String {
        let until = completion.map_or(screen.len(), |meta| meta.begin);
        let start = self.output_start(screen, until);
        clean_output(&screen[start..until], command)
    }

    /// Offset just past the prompt the command was typed at.
    fn output_start(&self, screen: &str, until: usize) -> usize {
        let earlier: Vec<PromptMetadata> = PromptProtocol::parse_all_from(screen, &self.nonce)
            .into_iter()
            .filter(|meta| meta.end <= until)
            .collect();
        let matching = self.identity.as_ref().and_then(|identity| {
            earlier
                .iter()
                .rev()
                .find(|meta| meta.identity() == *identity)
        });
        let start = matching
            .or_else(|| earlier.last())
            .map_or(0, |meta| meta.end);
        // The prompt's own trailing newline is not output.
        match &screen[start..until] {
            rest if rest.starts_with("\r\n") => start + 2,
            rest if rest.starts_with('\n') => start + 1,
            _ => start,
        }
    }
}

/// Remove echoed input, stray prompt blocks and trailing line breaks.
pub fn clean_output(raw: &str, command: &str) -> String {
    let without_prompts = PromptProtocol::strip_prompts(raw);
    let mut rest = without_prompts.as_str();

    for line in command.lines() {
        let echoed = line.trim();
        if echoed.is_empty() {
            continue;
        }
        let (first, tail) = match rest.split_once('\n') {
            Some((first, tail)) => (first, tail),
            None => (rest, ""),
        };
        if first.trim_end().ends_with(echoed) {
            rest = tail;
        } else {
            break;
        }
    }

    rest.trim_end_matches(['\n', '\r']).to_string()
}

/// Whether `text` is one command the shell will run as a unit.
///
/// Multi-line input is accepted only as a heredoc or with every line but the
/// last continued by a trailing backslash.
pub fn is_single_command(text: &str) -> bool {
    let trimmed = text.trim_end_matches(['\n', '\r']);
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() <= 1 {
        return true;
    }
    if lines[0].contains("<<") {
        return true;
    }
    lines[..lines.len() - 1]
        .iter()
        .all(|line| line.trim_end().ends_with('\\'))
}
