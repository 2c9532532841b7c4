//! Removal of `<think>…</think>` reasoning blocks that some hosted models
//! emit ahead of the answer.

use std::sync::LazyLock;

use regex::Regex;

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid reasoning regex"));

/// Strip every reasoning block from a complete answer. An unterminated block
/// swallows the rest of the text.
pub fn strip_reasoning(text: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(text, "");
    let visible = match stripped.find(OPEN) {
        Some(pos) => &stripped[..pos],
        None => &stripped[..],
    };
    visible.trim().to_string()
}

/// Incremental version of [`strip_reasoning`] for streamed fragments.
///
/// Tags may be split across fragments, so a tail that could be the start of a
/// tag is held back until the next fragment decides it.
#[derive(Debug)]
pub struct ReasoningFilter {
    inside: bool,
    carry: String,
    trim_next: bool,
}

impl Default for ReasoningFilter {
    fn default() -> Self {
        Self {
            inside: false,
            carry: String::new(),
            trim_next: true,
        }
    }
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning the visible text it released (possibly empty).
    pub fn push(&mut self, fragment: &str) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(fragment);

        let mut out = String::new();
        let mut rest = input.as_str();
        loop {
            if self.inside {
                match rest.find(CLOSE) {
                    Some(pos) => {
                        rest = &rest[pos + CLOSE.len()..];
                        self.inside = false;
                        self.trim_next = true;
                    }
                    None => {
                        let keep = partial_tag_len(rest, CLOSE);
                        self.carry = rest[rest.len() - keep..].to_string();
                        break;
                    }
                }
            } else {
                match rest.find(OPEN) {
                    Some(pos) => {
                        self.emit(&mut out, &rest[..pos]);
                        rest = &rest[pos + OPEN.len()..];
                        self.inside = true;
                    }
                    None => {
                        let keep = partial_tag_len(rest, OPEN);
                        let split = rest.len() - keep;
                        self.emit(&mut out, &rest[..split]);
                        self.carry = rest[split..].to_string();
                        break;
                    }
                }
            }
        }
        out
    }

    /// Release held-back text once the stream has ended.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        if self.inside {
            return String::new();
        }
        let mut out = String::new();
        self.emit(&mut out, &carry);
        out
    }

    fn emit(&mut self, out: &mut String, text: &str) {
        if self.trim_next {
            let text = text.trim_start();
            if !text.is_empty() {
                self.trim_next = false;
            }
            out.push_str(text);
        } else {
            out.push_str(text);
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.as_bytes().ends_with(&tag.as_bytes()[..k]))
        .unwrap_or(0)
}
