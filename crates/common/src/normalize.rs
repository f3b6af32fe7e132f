use unicode_normalization::UnicodeNormalization;

/// Canonical comparable form of a free-text title.
///
/// Compatibility folding runs before and after lowercasing so that case
/// mappings which expand into decomposed sequences are folded back, which
/// keeps the function idempotent. Every character that is not a letter,
/// digit, underscore or whitespace becomes a space, whitespace runs collapse
/// to one space and the result is trimmed.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let folded: String = text.nfkc().collect();
    let lowered: String = folded.to_lowercase().nfkc().collect();
    let mut out = String::with_capacity(lowered.len());
    let mut last_space = true;
    for ch in lowered.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Removes every `(...)` and `[...]` aside. Pairs do not nest: an opener is
/// closed by the next closer of the same kind. An opener without a closer is
/// left in place.
pub fn strip_bracketed_aside(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(|c| c == '(' || c == '[') {
        let close = if rest[start..].starts_with('(') { ')' } else { ']' };
        match rest[start + 1..].find(close) {
            Some(offset) => {
                out.push_str(&rest[..start]);
                out.push(' ');
                rest = &rest[start + 1 + offset + 1..];
            }
            None => {
                out.push_str(&rest[..=start]);
                rest = &rest[start + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Word set used for token-subset matching. Falls back to the words of the
/// full normalized title when stripping asides leaves nothing.
pub fn match_tokens(title: &str) -> Vec<String> {
    let folded: String = title.nfkc().collect();
    let stripped = normalize(&strip_bracketed_aside(&folded));
    let source = if stripped.is_empty() {
        normalize(&folded)
    } else {
        stripped
    };
    let mut tokens: Vec<String> = Vec::new();
    for word in source.split(' ').filter(|word| !word.is_empty()) {
        if !tokens.iter().any(|existing| existing == word) {
            tokens.push(word.to_string());
        }
    }
    tokens
}
