//! Reasoning extraction from marker-delimited text streams
//!
//! Converts a raw fragment sequence into mode-tagged segments, recognizing
//! case-insensitive `<think>` / `</think>` markers that may be split
//! arbitrarily across fragment boundaries. The final partition of reasoning
//! vs. content text is independent of how the transport chunked the bytes.

use crate::types::StreamFragment;

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

/// Stateful scanner over one stream of raw text fragments.
///
/// Feed fragments with [`push`](Self::push); call [`finish`](Self::finish)
/// once the underlying stream completes to flush the residual buffer. One
/// extractor serves exactly one stream.
///
/// An unterminated open marker leaves the scanner in reasoning mode until
/// end-of-sequence; that is accepted behavior, not an error.
#[derive(Debug, Default)]
pub struct ReasoningExtractor {
    reasoning: bool,
    buffer: String,
}

impl ReasoningExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one raw fragment and drain every segment it completes.
    ///
    /// Text before each recognized marker is emitted tagged with the mode in
    /// force at that point; the marker itself is discarded. A trailing run
    /// that could still grow into a marker is held back so that
    /// one-character chunking round-trips exactly.
    pub fn push(&mut self, fragment: &str) -> Vec<StreamFragment> {
        self.buffer.push_str(fragment);
        let mut out = Vec::new();

        loop {
            let marker = if self.reasoning {
                CLOSE_MARKER
            } else {
                OPEN_MARKER
            };

            if let Some(idx) = find_ignore_ascii_case(&self.buffer, marker) {
                if idx > 0 {
                    out.push(StreamFragment {
                        is_reasoning: self.reasoning,
                        text: self.buffer[..idx].to_string(),
                    });
                }
                self.buffer.drain(..idx + marker.len());
                self.reasoning = !self.reasoning;
                // multiple markers may arrive in one fragment
                continue;
            }

            // No complete marker: emit the steady-state text, holding back
            // any suffix that is still a viable marker prefix.
            let keep = trailing_marker_prefix_len(&self.buffer, marker);
            let emit = self.buffer.len() - keep;
            if emit > 0 {
                let text: String = self.buffer.drain(..emit).collect();
                out.push(StreamFragment {
                    is_reasoning: self.reasoning,
                    text,
                });
            }
            break;
        }

        out
    }

    /// Flush whatever remains, tagged with the current mode.
    pub fn finish(&mut self) -> Option<StreamFragment> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(StreamFragment {
            is_reasoning: self.reasoning,
            text,
        })
    }

    /// One-shot split of a complete (non-streamed) text.
    ///
    /// Returns `(reasoning, content)`, with `reasoning` `None` when the text
    /// carried no marked region. This is the normalization path for backends
    /// that return marker-bearing text in a single response body.
    pub fn split(text: &str) -> (Option<String>, String) {
        let mut extractor = Self::new();
        let mut segments = extractor.push(text);
        segments.extend(extractor.finish());

        let mut reasoning = String::new();
        let mut content = String::new();
        let mut saw_marker = false;
        for seg in &segments {
            if seg.is_reasoning {
                reasoning.push_str(&seg.text);
                saw_marker = true;
            } else {
                content.push_str(&seg.text);
            }
        }
        // A marker pair with empty inner text still counts as reasoning seen,
        // but there is nothing useful to report.
        if !saw_marker || reasoning.is_empty() {
            (None, content)
        } else {
            (Some(reasoning), content)
        }
    }
}

/// Byte index of the first case-insensitive occurrence of `needle`.
/// Both sides are ASCII-lowercased; the markers are pure ASCII so byte
/// positions are preserved.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    let haystack_lower = haystack.to_ascii_lowercase();
    haystack_lower.find(needle)
}

/// Length of the longest proper prefix of `marker` that the buffer ends
/// with, compared case-insensitively. Zero when the tail cannot become a
/// marker no matter what arrives next.
fn trailing_marker_prefix_len(buffer: &str, marker: &str) -> usize {
    let max = (marker.len() - 1).min(buffer.len());
    for k in (1..=max).rev() {
        // candidate tail must sit on a char boundary; markers are ASCII so a
        // non-boundary slice means multi-byte text that cannot match anyway
        if !buffer.is_char_boundary(buffer.len() - k) {
            continue;
        }
        let tail = &buffer[buffer.len() - k..];
        if tail.eq_ignore_ascii_case(&marker[..k]) {
            return k;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(extractor: &mut ReasoningExtractor, fragments: &[&str]) -> Vec<StreamFragment> {
        let mut out = Vec::new();
        for f in fragments {
            out.extend(extractor.push(f));
        }
        out.extend(extractor.finish());
        out
    }

    fn partition(segments: &[StreamFragment]) -> (String, String) {
        let mut reasoning = String::new();
        let mut content = String::new();
        for s in segments {
            if s.is_reasoning {
                reasoning.push_str(&s.text);
            } else {
                content.push_str(&s.text);
            }
        }
        (reasoning, content)
    }

    #[test]
    fn plain_text_passes_through_as_content() {
        let mut e = ReasoningExtractor::new();
        let segments = collect(&mut e, &["hello ", "world"]);
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "");
        assert_eq!(content, "hello world");
    }

    #[test]
    fn marker_pair_in_one_fragment() {
        let mut e = ReasoningExtractor::new();
        let segments = collect(&mut e, &["a<think>deep thought</think>b"]);
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "deep thought");
        assert_eq!(content, "ab");
    }

    #[test]
    fn marker_split_across_fragments() {
        let mut e = ReasoningExtractor::new();
        let segments = collect(&mut e, &["a<thi", "nk>x</th", "ink>b"]);
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "x");
        assert_eq!(content, "ab");
    }

    #[test]
    fn one_character_fragments_round_trip() {
        let input = "pre<THINK>inner</think>post<think>more</THINK>tail";
        let mut e = ReasoningExtractor::new();
        let fragments: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        let mut segments = Vec::new();
        for f in &fragments {
            segments.extend(e.push(f));
        }
        segments.extend(e.finish());
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "innermore");
        assert_eq!(content, "preposttail");
    }

    #[test]
    fn markers_are_case_insensitive() {
        let (reasoning, content) = ReasoningExtractor::split("<Think>r</THINK>c");
        assert_eq!(reasoning.as_deref(), Some("r"));
        assert_eq!(content, "c");
    }

    #[test]
    fn unterminated_marker_flushes_as_reasoning() {
        let mut e = ReasoningExtractor::new();
        let segments = collect(&mut e, &["a<think>never closed"]);
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "never closed");
        assert_eq!(content, "a");
    }

    #[test]
    fn false_prefix_is_released() {
        // "<th" held back until "e" proves it cannot become a marker
        let mut e = ReasoningExtractor::new();
        let segments = collect(&mut e, &["a<th", "em>b"]);
        let (reasoning, content) = partition(&segments);
        assert_eq!(reasoning, "");
        assert_eq!(content, "a<them>b");
    }

    #[test]
    fn close_marker_in_content_mode_is_literal() {
        let (reasoning, content) = ReasoningExtractor::split("a</think>b");
        assert_eq!(reasoning, None);
        assert_eq!(content, "a</think>b");
    }

    #[test]
    fn empty_reasoning_region_reports_none() {
        let (reasoning, content) = ReasoningExtractor::split("a<think></think>b");
        assert_eq!(reasoning, None);
        assert_eq!(content, "ab");
    }

    #[test]
    fn split_handles_multibyte_text() {
        let (reasoning, content) = ReasoningExtractor::split("héllo<think>ü</think>wörld");
        assert_eq!(reasoning.as_deref(), Some("ü"));
        assert_eq!(content, "héllowörld");
    }
}
