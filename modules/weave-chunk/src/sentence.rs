//! Sentence splitting shared by the semantic chunker's stage 1 boundary
//! detection and the stage 2 safety-net re-split.

use regex::Regex;
use std::sync::OnceLock;

static SENTENCE_BOUNDARY: OnceLock<Regex> = OnceLock::new();

/// Splits on `.`/`!`/`?` followed by whitespace, returning byte offsets
/// into `text` so callers can slice the original string (preserving
/// exact formatting) instead of rejoining trimmed fragments.
/// Deliberately simple (no abbreviation dictionary): over-splitting only
/// costs a slightly smaller chunk, never correctness.
pub fn split_sentences(text: &str) -> Vec<(usize, usize)> {
    let re = SENTENCE_BOUNDARY.get_or_init(|| Regex::new(r"(?:[.!?])\s+").unwrap());
    let mut spans = Vec::new();
    let mut last = 0;
    for m in re.find_iter(text) {
        let end = m.end();
        push_trimmed_span(text, last, end, &mut spans);
        last = end;
    }
    push_trimmed_span(text, last, text.len(), &mut spans);
    if spans.is_empty() && !text.trim().is_empty() {
        spans.push((0, text.len()));
    }
    spans
}

fn push_trimmed_span(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail < slice.len() {
        out.push((start + lead, end - trail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        let text = "First sentence. Second sentence! Third?";
        let spans = split_sentences(text);
        assert_eq!(spans.len(), 3);
        assert_eq!(&text[spans[0].0..spans[0].1], "First sentence.");
    }

    #[test]
    fn single_sentence_with_no_terminator_is_kept_whole() {
        let text = "no terminal punctuation here";
        let spans = split_sentences(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[spans[0].0..spans[0].1], text);
    }
}
