//! Text similarity primitives for overlap deduplication.

/// Case-fold and strip punctuation, keeping letters, digits and spaces.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Levenshtein distance over characters, single-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (diagonal + cost).min(row[j] + 1).min(row[j + 1] + 1);
            diagonal = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Normalized edit similarity in [0, 1].
///
/// Both inputs are normalized and truncated to `max_len` characters
/// before comparison. Strings whose lengths differ by more than half of
/// the longer one score 0.
pub fn text_similarity(a: &str, b: &str, max_len: usize) -> f64 {
    let a: String = normalize(a).chars().take(max_len).collect();
    let b: String = normalize(b).chars().take(max_len).collect();

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max = len_a.max(len_b);
    if max == 0 {
        return 1.0;
    }
    let min = len_a.min(len_b);
    if (max - min) as f64 > max as f64 * 0.5 {
        return 0.0;
    }

    1.0 - levenshtein(&a, &b) as f64 / max as f64
}

/// Jaccard similarity over character sets, used as a cheap pre-filter
/// before the quadratic edit distance.
pub fn jaccard_chars(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<char> = normalize(a).chars().collect();
    let set_b: std::collections::HashSet<char> = normalize(b).chars().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}
