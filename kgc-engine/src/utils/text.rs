//! Text normalization shared by matching, merging and relationship discovery

/// Lowercase and strip Spanish diacritics
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Folded alphanumeric tokens
pub fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Folded text with punctuation removed and whitespace collapsed
pub fn normalize(text: &str) -> String {
    tokens(text).join(" ")
}

/// Whole-word containment of `needle` inside `haystack` (both normalized)
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    let needle = normalize(needle);
    if needle.is_empty() {
        return false;
    }
    format!(" {} ", normalize(haystack)).contains(&format!(" {needle} "))
}
