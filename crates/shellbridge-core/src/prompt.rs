//! Instrumented prompt protocol.
//!
//! The shell prompt is replaced by a block that the shell prints after every
//! command:
//!
//! ```text
//! ###PS1JSON###
//! {"pid": "", "exit_code": "0", "username": "me", "hostname": "box", "working_dir": "/tmp", "timestamp": "1700000000", "sequence": "12", "nonce": "3f1c…"}
//! ###PS1END###
//! ```
//!
//! A prompt occurrence is trusted only when both sentinels are present, the
//! end sentinel is complete, and the payload between them is a single
//! well-formed object. Each shell is given its own `nonce`; a block carrying
//! any other nonce (or none) was printed by a command, not by the shell. Command output is always printed before the prompt
//! that follows it, so the rightmost well-formed occurrence is the one that
//! marks the most recent command boundary.

use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sentinel line opening a prompt block.
pub const PROMPT_BEGIN: &str = "###PS1JSON###";

/// Sentinel line closing a prompt block.
pub const PROMPT_END: &str = "###PS1END###";

/// Exit code recorded when the shell reported none.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

const FIELDS: [&str; 8] = [
    "pid",
    "exit_code",
    "username",
    "hostname",
    "working_dir",
    "timestamp",
    "sequence",
    "nonce",
];

const POWERSHELL_TEMPLATE: &str = concat!(
    "function prompt { \"`n@BEGIN@`n{",
    "`\"pid`\": `\"$PID`\", ",
    "`\"exit_code`\": `\"$(if ($LASTEXITCODE) { $LASTEXITCODE } else { 0 })`\", ",
    "`\"username`\": `\"$env:USERNAME`\", ",
    "`\"hostname`\": `\"$env:COMPUTERNAME`\", ",
    "`\"working_dir`\": `\"$($PWD.Path -replace '\\\\','\\\\')`\", ",
    "`\"timestamp`\": `\"$([DateTimeOffset]::Now.ToUnixTimeSeconds())`\", ",
    "`\"sequence`\": `\"$((Get-History -Count 1).Id)`\", ",
    "`\"nonce`\": `\"@NONCE@`\"",
    "}`n@END@`n\" }"
);

lazy_static! {
    static ref FIELD_PATTERNS: Vec<(&'static str, Regex)> = FIELDS
        .iter()
        .map(|field| {
            let pattern = format!(r#""{field}"\s*:\s*"(.*?)"\s*[,}}]"#);
            // Field names are fixed identifiers, the pattern always compiles.
            (*field, Regex::new(&pattern).expect("static field pattern"))
        })
        .collect();
}

/// Structured record parsed from one completed prompt occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PromptMetadata {
    /// Byte offset of the begin sentinel in the parsed text
    pub begin: usize,
    /// Byte offset just past the end sentinel in the parsed text
    pub end: usize,
    /// Exit code of the previous command (`-1` when unknown)
    pub exit_code: i32,
    /// Working directory after the previous command
    pub working_dir: String,
    /// User the shell runs as
    pub username: Option<String>,
    /// Host the shell runs on
    pub hostname: Option<String>,
    /// Pid of the most recent background job
    pub pid: Option<i64>,
    /// Prompt render time (seconds since the epoch, opaque)
    pub timestamp: Option<String>,
    /// Shell command number, opaque
    pub sequence: Option<String>,
    /// Token of the shell that rendered the prompt
    pub nonce: Option<String>,
}

/// Values that tell two prompt renderings apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PromptIdentity {
    /// Render timestamp
    pub timestamp: Option<String>,
    /// Command number
    pub sequence: Option<String>,
}

impl PromptMetadata {
    /// Identity of this prompt rendering.
    pub fn identity(&self) -> PromptIdentity {
        PromptIdentity {
            timestamp: self.timestamp.clone(),
            sequence: self.sequence.clone(),
        }
    }

    /// Whether this block was rendered by the shell holding `nonce`.
    pub fn is_from(&self, nonce: &str) -> bool {
        self.nonce.as_deref() == Some(nonce)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    pid: Option<String>,
    #[serde(default)]
    exit_code: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    sequence: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

impl RawPayload {
    /// Per-field extraction for payloads that are not valid JSON, e.g. a
    /// working directory containing a quote or backslash.
    fn from_fields(payload: &str) -> Option<Self> {
        let mut raw = RawPayload::default();
        let mut matched = 0;
        for (field, regex) in FIELD_PATTERNS.iter() {
            let Some(value) = regex.captures(payload).map(|c| c[1].to_string()) else {
                continue;
            };
            matched += 1;
            match *field {
                "pid" => raw.pid = Some(value),
                "exit_code" => raw.exit_code = Some(value),
                "username" => raw.username = Some(value),
                "hostname" => raw.hostname = Some(value),
                "working_dir" => raw.working_dir = Some(value),
                "timestamp" => raw.timestamp = Some(value),
                "sequence" => raw.sequence = Some(value),
                _ => raw.nonce = Some(value),
            }
        }
        (matched > 0 && raw.exit_code.is_some()).then_some(raw)
    }

    fn into_metadata(self, begin: usize, end: usize) -> PromptMetadata {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        PromptMetadata {
            begin,
            end,
            exit_code: self
                .exit_code
                .and_then(|code| code.trim().parse().ok())
                .unwrap_or(UNKNOWN_EXIT_CODE),
            working_dir: self.working_dir.unwrap_or_default(),
            username: non_empty(self.username),
            hostname: non_empty(self.hostname),
            pid: self.pid.and_then(|pid| pid.trim().parse().ok()),
            timestamp: non_empty(self.timestamp),
            sequence: non_empty(self.sequence),
            nonce: non_empty(self.nonce),
        }
    }
}

/// The prompt text and directives installed into a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptProtocol;

impl PromptProtocol {
    /// Fresh random token to embed in one shell's prompt.
    pub fn new_nonce() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// PS1 value for bash.
    ///
    /// Uses the `\n` prompt escape rather than raw newlines so the directive
    /// installing it stays on a single input line.
    pub fn render_prompt(nonce: &str) -> String {
        format!(
            concat!(
                r#"\n{begin}\n{{"pid": "$!", "exit_code": "$?", "username": "\u", "#,
                r#""hostname": "\h", "working_dir": "$(pwd)", "timestamp": "\D{{%s}}", "#,
                r#""sequence": "\#", "nonce": "{nonce}"}}\n{end}\n"#
            ),
            begin = PROMPT_BEGIN,
            end = PROMPT_END,
            nonce = nonce
        )
    }

    /// Bash directive re-exporting PS1 before every prompt.
    ///
    /// Rc files routinely overwrite PS1; re-exporting from `PROMPT_COMMAND`
    /// keeps the instrumented prompt in place. PS2 is emptied so continuation
    /// lines do not leak into captured output.
    pub fn prompt_command(nonce: &str) -> String {
        let escaped = Self::render_prompt(nonce).replace('"', "\\\"");
        format!("export PROMPT_COMMAND='export PS1=\"{escaped}\"'; export PS2=\"\"")
    }

    /// `prompt` function emitting the same grammar from PowerShell.
    pub fn render_powershell_prompt(nonce: &str) -> String {
        POWERSHELL_TEMPLATE
            .replace("@BEGIN@", PROMPT_BEGIN)
            .replace("@END@", PROMPT_END)
            .replace("@NONCE@", nonce)
    }

    /// Parse the rightmost well-formed prompt occurrence in `text`.
    pub fn parse(text: &str) -> Option<PromptMetadata> {
        let mut search_end = text.len();
        while let Some(end_start) = text[..search_end].rfind(PROMPT_END) {
            if let Some(meta) = Self::parse_span_ending_at(text, end_start) {
                return Some(meta);
            }
            search_end = end_start;
        }
        None
    }

    /// Every well-formed prompt occurrence in `text`, in order of appearance.
    pub fn parse_all(text: &str) -> Vec<PromptMetadata> {
        let mut found = Vec::new();
        let mut cursor = 0;
        while let Some(rel) = text[cursor..].find(PROMPT_END) {
            let end_start = cursor + rel;
            if let Some(meta) = Self::parse_span_ending_at(text, end_start) {
                found.push(meta);
            }
            cursor = end_start + PROMPT_END.len();
        }
        found
    }

    /// Prompts rendered by the shell holding `nonce`, in order of appearance.
    pub fn parse_all_from(text: &str, nonce: &str) -> Vec<PromptMetadata> {
        Self::parse_all(text)
            .into_iter()
            .filter(|meta| meta.is_from(nonce))
            .collect()
    }

    /// Whether `text` ends (ignoring trailing whitespace) with a complete prompt.
    pub fn ends_with_prompt(text: &str) -> bool {
        let trimmed = text.trim_end();
        Self::parse(trimmed).is_some_and(|meta| meta.end == trimmed.len())
    }

    /// The prompt `text` ends with, if the shell holding `nonce` rendered it.
    ///
    /// A look-alike block printed last by a running command yields `None`.
    pub fn trailing_prompt(text: &str, nonce: &str) -> Option<PromptMetadata> {
        let trimmed = text.trim_end();
        Self::parse(trimmed).filter(|meta| meta.end == trimmed.len() && meta.is_from(nonce))
    }

    /// Remove every well-formed prompt block from `text`.
    pub fn strip_prompts(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for meta in Self::parse_all(text) {
            out.push_str(&text[cursor..meta.begin]);
            cursor = meta.end;
            if text[cursor..].starts_with("\r\n") {
                cursor += 2;
            } else if text[cursor..].starts_with('\n') {
                cursor += 1;
            }
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Parse the span closed by the end sentinel starting at `end_start`.
    ///
    /// The opening sentinel is the nearest one to the left, so a stray begin
    /// sentinel printed by a command never swallows a real prompt. The payload
    /// must be exactly one object and contain neither sentinel.
    fn parse_span_ending_at(text: &str, end_start: usize) -> Option<PromptMetadata> {
        let begin = text[..end_start].rfind(PROMPT_BEGIN)?;
        let payload = text[begin + PROMPT_BEGIN.len()..end_start].trim();
        if payload.contains(PROMPT_END) || !payload.starts_with('{') || !payload.ends_with('}') {
            return None;
        }

        let raw = serde_json::from_str::<RawPayload>(payload)
            .ok()
            .or_else(|| RawPayload::from_fields(payload))?;
        Some(raw.into_metadata(begin, end_start + PROMPT_END.len()))
    }
}
