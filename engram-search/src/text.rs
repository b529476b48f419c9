//! Tokenization for the verbatim-match bonus.

/// Words ignored when comparing query and document tokens. Closed list.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "be", "is", "are", "was", "to", "of", "and", "in", "that", "have", "it",
    "for", "not", "on", "with", "as", "you", "do", "at", "this", "but", "by", "from",
];

/// Punctuation stripped from both ends of each token.
const PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '[', ']', '{', '}', '\u{2014}', '\u{2013}',
    '-',
];

/// Split on whitespace, lowercase, trim punctuation, and drop stop words
/// and empty tokens.
pub fn tokenize_and_filter(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.to_lowercase().trim_matches(PUNCTUATION).to_string())
        .filter(|cleaned| !cleaned.is_empty() && !STOP_WORDS.contains(&cleaned.as_str()))
        .collect()
}

/// Whether every filtered query token appears among the document's filtered
/// tokens. A query with no surviving tokens matches nothing.
pub fn contains_all_query_words(document: &str, query: &str) -> bool {
    let query_words = tokenize_and_filter(query);
    if query_words.is_empty() {
        return false;
    }

    let document_words: std::collections::HashSet<String> =
        tokenize_and_filter(document).into_iter().collect();
    query_words
        .iter()
        .all(|word| document_words.contains(word))
}
