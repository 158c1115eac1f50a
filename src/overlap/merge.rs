//! Language-aware merging of sentences broken across window boundaries.
//!
//! Batch windows routinely split a sentence in half; adjacent segments
//! are rejoined when the gap is small and the trailing punctuation of the
//! first half says the sentence is unfinished.

use crate::align::Segment;

/// Period-preceding tokens that do not end an English sentence.
const EN_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "etc", "e.g", "i.e", "vs", "ph.d", "no",
    "vol", "approx",
];

/// Resolve a BCP-47 tag (or "multi"/"auto") to a merge-rule family.
pub fn resolve_language(language: &str, combined_text: &str) -> &'static str {
    let lower = language.to_ascii_lowercase();
    if lower.starts_with("zh") {
        "zh"
    } else if lower.starts_with("ja") {
        "ja"
    } else if lower.starts_with("ko") {
        "ko"
    } else if lower == "multi" || lower == "auto" || lower.is_empty() {
        detect_script(combined_text)
    } else {
        "en"
    }
}

/// Classify text by dominant script.
pub fn detect_script(text: &str) -> &'static str {
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut han = 0usize;
    for c in text.chars() {
        let cp = c as u32;
        match cp {
            0x3040..=0x30FF => kana += 1,
            0x1100..=0x11FF | 0xAC00..=0xD7AF => hangul += 1,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => han += 1,
            _ => {}
        }
    }
    if kana > 0 {
        "ja"
    } else if hangul > 0 {
        "ko"
    } else if han > 0 {
        "zh"
    } else {
        "en"
    }
}

/// Decide whether `next` continues the sentence `prev` started.
pub fn should_merge(prev: &Segment, next: &Segment, language: &str, gap_limit_sec: f64) -> bool {
    if next.start_sec - prev.end_sec > gap_limit_sec {
        return false;
    }

    let text = prev.text.trim_end();
    let Some(last) = text.chars().last() else {
        return false;
    };

    let combined = format!("{}{}", prev.text, next.text);
    match resolve_language(language, &combined) {
        "zh" => match last {
            '。' | '！' | '？' | '；' | '：' | '.' | '!' | '?' | ';' | ':' => false,
            '，' | '、' | ',' => true,
            _ => has_open_quote(text) || !is_punctuation(last),
        },
        "ja" => match last {
            '。' | '！' | '？' | '!' | '?' => false,
            '、' | '，' | ',' => true,
            _ => !is_punctuation(last),
        },
        // Korean and European languages share the Latin punctuation rules.
        _ => match last {
            '!' | '?' | ';' | ':' => false,
            ',' => true,
            '.' => ends_with_abbreviation(text),
            _ => !is_punctuation(last),
        },
    }
}

/// Walk adjacent pairs, concatenating texts and unioning time ranges
/// wherever `should_merge` holds.
pub fn merge_broken_sentences(
    segments: Vec<Segment>,
    language: &str,
    gap_limit_sec: f64,
) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for next in segments {
        match merged.last_mut() {
            Some(prev) if should_merge(prev, &next, language, gap_limit_sec) => {
                prev.text = format!("{} {}", prev.text, next.text);
                prev.start_sec = prev.start_sec.min(next.start_sec);
                prev.end_sec = prev.end_sec.max(next.end_sec);
                prev.arrival_ms = prev.arrival_ms.max(next.arrival_ms);
                if let (Some(a), Some(b)) = (prev.confidence, next.confidence) {
                    prev.confidence = Some(a.min(b));
                }
            }
            _ => merged.push(next),
        }
    }
    merged
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '。' | '！' | '？' | '；' | '：' | '，' | '、' | '「' | '」' | '『' | '』' | '…'
        )
}

fn has_open_quote(text: &str) -> bool {
    let mut corner = 0i32;
    let mut white_corner = 0i32;
    let mut curly = 0i32;
    for c in text.chars() {
        match c {
            '「' => corner += 1,
            '」' => corner -= 1,
            '『' => white_corner += 1,
            '』' => white_corner -= 1,
            '“' => curly += 1,
            '”' => curly -= 1,
            _ => {}
        }
    }
    corner > 0 || white_corner > 0 || curly > 0
}

fn ends_with_abbreviation(text: &str) -> bool {
    let last_token = text
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("");
    let token = last_token.trim_end_matches('.').to_ascii_lowercase();
    EN_ABBREVIATIONS.contains(&token.as_str())
}
