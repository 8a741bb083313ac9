//! Sentence boundary detection for sentence-paced rendering
//!
//! A sentence ends at a run of `.`, `!` or `?` that is followed by whitespace
//! or by the end of the text. The trailing whitespace belongs to the sentence,
//! so concatenating the sentences and the residue reproduces the input exactly.

use regex::Regex;
use std::sync::OnceLock;

fn boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid boundary pattern"))
}

/// Byte offsets (exclusive) at which sentences end in `text`
///
/// # Examples
///
/// ```
/// use avatalk::renderer::sentence::sentence_ends;
///
/// assert_eq!(sentence_ends("Hi. Bye"), vec![4]);
/// assert_eq!(sentence_ends("Hi! Bye?"), vec![4, 8]);
/// ```
pub fn sentence_ends(text: &str) -> Vec<usize> {
    boundary_regex().find_iter(text).map(|m| m.end()).collect()
}

/// Split `text` into complete sentences and the trailing residue
///
/// # Examples
///
/// ```
/// use avatalk::renderer::sentence::split_sentences;
///
/// let (sentences, residue) = split_sentences("One. Two! Thr");
/// assert_eq!(sentences, vec!["One. ", "Two! "]);
/// assert_eq!(residue, "Thr");
/// ```
pub fn split_sentences(text: &str) -> (Vec<&str>, &str) {
    let mut sentences = Vec::new();
    let mut start = 0;
    for end in sentence_ends(text) {
        sentences.push(&text[start..end]);
        start = end;
    }
    (sentences, &text[start..])
}
