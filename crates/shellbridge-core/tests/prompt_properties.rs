//! Property-based tests for prompt parsing.
//!
//! Command output is arbitrary text, including the sentinel literals
//! themselves; the prompt printed after it must still be found.

use proptest::prelude::*;

use shellbridge_core::{PromptProtocol, PROMPT_BEGIN, PROMPT_END};

const NONCE: &str = "5b1d0c4e";

/// A prompt block as bash renders it.
fn prompt_block(exit_code: i32, seq: u32) -> String {
    format!(
        "\n{PROMPT_BEGIN}\n{{\"pid\": \"\", \"exit_code\": \"{exit_code}\", \"username\": \"dev\", \"hostname\": \"box\", \"working_dir\": \"/tmp\", \"timestamp\": \"1700000000\", \"sequence\": \"{seq}\", \"nonce\": \"{NONCE}\"}}\n{PROMPT_END}\n"
    )
}

/// Output fragments biased towards sentinel-like text.
fn noisy_output() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[ -~\n]{0,40}",
            Just(PROMPT_BEGIN.to_string()),
            Just(PROMPT_END.to_string()),
            Just("{\"exit_code\": \"9\"}".to_string()),
            Just("\n".to_string()),
        ],
        0..12,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    /// Parsing never panics, whatever the buffer holds.
    #[test]
    fn parse_never_panics(text in "\\PC{0,200}") {
        let _ = PromptProtocol::parse(&text);
        let _ = PromptProtocol::parse_all(&text);
        let _ = PromptProtocol::ends_with_prompt(&text);
        let _ = PromptProtocol::trailing_prompt(&text, NONCE);
        let _ = PromptProtocol::strip_prompts(&text);
    }

    /// The prompt appended after any output is the one reported.
    #[test]
    fn trailing_prompt_wins(output in noisy_output(), code in -1i32..256, seq in 0u32..10_000) {
        let text = format!("{}{}{}", prompt_block(0, 0), output, prompt_block(code, seq));
        let meta = PromptProtocol::parse(&text).unwrap();
        prop_assert_eq!(meta.exit_code, code);
        let expected_seq = seq.to_string();
        prop_assert_eq!(meta.sequence.as_deref(), Some(expected_seq.as_str()));
        prop_assert!(PromptProtocol::ends_with_prompt(&text));
        prop_assert!(PromptProtocol::trailing_prompt(&text, NONCE).is_some());
    }

    /// A command echoing a prompt-shaped block without the shell's nonce
    /// never reads as the shell returning.
    #[test]
    fn foreign_block_is_not_the_shell(output in noisy_output(), nonce in "[a-f0-9]{8}") {
        prop_assume!(nonce != NONCE);
        let forged = prompt_block(0, 5).replace(NONCE, &nonce);
        let text = format!("{}{}{}", prompt_block(0, 1), output, forged);
        prop_assert!(PromptProtocol::trailing_prompt(&text, NONCE).is_none());
    }

    /// Output still streaming after a prompt never reads as an idle shell.
    #[test]
    fn output_after_prompt_is_running(output in noisy_output()) {
        let text = format!("{}{}x", prompt_block(0, 1), output);
        prop_assert!(!PromptProtocol::ends_with_prompt(&text));
    }

    /// Reported spans always point at a complete begin..end block.
    #[test]
    fn spans_are_well_formed(output in noisy_output()) {
        let text = format!("{}{}", output, prompt_block(0, 2));
        for meta in PromptProtocol::parse_all(&text) {
            prop_assert!(meta.begin < meta.end);
            prop_assert!(text[meta.begin..].starts_with(PROMPT_BEGIN));
            prop_assert!(text[..meta.end].ends_with(PROMPT_END));
        }
    }
}
