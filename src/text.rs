//! Transcript sanitation.
//!
//! Whisper emits bracketed non-speech markers like `[BLANK_AUDIO]` or
//! `(wind blowing)` for segments with no usable speech. Strip them and
//! collapse the remaining whitespace before showing anything to the user.

use regex::Regex;
use std::sync::OnceLock;

pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(sanitize_transcript("  hello   world  "), "hello world");
    }

    #[test]
    fn strips_non_speech_markers() {
        assert_eq!(sanitize_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(sanitize_transcript("hi [noise] there"), "hi there");
        assert_eq!(sanitize_transcript("(wind blowing) ok"), "ok");
    }

    #[test]
    fn keeps_ordinary_brackets() {
        assert_eq!(sanitize_transcript("array[0] is set"), "array[0] is set");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(sanitize_transcript("   "), "");
    }
}
