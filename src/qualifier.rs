/// Minimum number of characters left after stripping for a post to count
/// as real content.
pub const MIN_MEANINGFUL_CHARS: usize = 20;

/// Punctuation removed before measuring a post.
const STRIPPED_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ':', ';', '-', '—', '–', '\'', '"', '(', ')', '[',
    ']', '{', '}',
];

/// Emoji, pictographs, dingbats, variation selectors, the zero-width
/// joiner and the keycap combining mark.
fn is_pictographic(c: char) -> bool {
    matches!(
        c,
        '\u{1F000}'..='\u{1FFFF}'
            | '\u{2600}'..='\u{27BF}'
            | '\u{FE00}'..='\u{FEFF}'
            | '\u{200D}'
            | '\u{20E3}'
    )
}

fn is_filler(c: char) -> bool {
    c.is_whitespace() || STRIPPED_PUNCTUATION.contains(&c)
}

/// Return the characters of `text` that carry content, dropping emoji,
/// whitespace and common punctuation.
pub fn strip_noise(text: &str) -> String {
    text.chars()
        .filter(|&c| !is_pictographic(c) && !is_filler(c))
        .collect()
}

/// Decide whether a post body has enough real text to be worth embedding.
///
/// Emoji-only, punctuation-only and very short posts would otherwise land
/// as near-identical vectors and crowd real results out of the index.
///
/// ```
/// use postseek::qualifier::is_meaningful;
///
/// assert!(is_meaningful("Grøn omstilling kræver investeringer nu"));
/// assert!(!is_meaningful("🎉🎉🎉 !!!"));
/// ```
pub fn is_meaningful(text: &str) -> bool {
    text.chars()
        .filter(|&c| !is_pictographic(c) && !is_filler(c))
        .take(MIN_MEANINGFUL_CHARS)
        .count()
        >= MIN_MEANINGFUL_CHARS
}
