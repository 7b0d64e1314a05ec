//! Property-based tests for the output buffer and ANSI stripping.

use proptest::prelude::*;

use shellbridge_backend::{AnsiStripper, OutputBuffer};

/// Streamed text made of short lines, with and without terminators.
fn stream_chunks() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9 ]{0,12}\n?", 0..200)
}

proptest! {
    /// The buffer never holds more than `limit` complete lines plus one partial.
    #[test]
    fn buffer_respects_history_limit(limit in 1usize..50, chunks in stream_chunks()) {
        let mut buffer = OutputBuffer::new(limit);
        for chunk in &chunks {
            buffer.push_str(chunk);
            prop_assert!(buffer.complete_lines() <= limit);
            prop_assert!(buffer.line_count() <= limit + 1);
        }
    }

    /// Without eviction, the buffer reproduces the stream exactly.
    #[test]
    fn buffer_preserves_stream(chunks in stream_chunks()) {
        let mut buffer = OutputBuffer::new(10_000);
        for chunk in &chunks {
            buffer.push_str(chunk);
        }
        prop_assert_eq!(buffer.contents(), chunks.concat());
    }

    /// Only the last entry may lack a newline.
    #[test]
    fn only_last_line_is_partial(chunks in stream_chunks()) {
        let mut buffer = OutputBuffer::new(100);
        for chunk in &chunks {
            buffer.push_str(chunk);
        }
        let contents = buffer.contents();
        let lines: Vec<&str> = contents.split_inclusive('\n').collect();
        prop_assert_eq!(lines.len(), buffer.line_count());
    }

    /// Text without escape sequences passes through the stripper unchanged,
    /// however it is split into reads.
    #[test]
    fn plain_text_survives_stripping(text in "[ -~\n]{0,200}", split in 0usize..200) {
        let split = split.min(text.len());
        let mut stripper = AnsiStripper::new();
        let mut out = stripper.feed(&text.as_bytes()[..split]);
        out.push_str(&stripper.feed(&text.as_bytes()[split..]));
        prop_assert_eq!(out, text);
    }

    /// The stripper never panics on arbitrary bytes.
    #[test]
    fn stripper_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = AnsiStripper::new().feed(&bytes);
    }
}
